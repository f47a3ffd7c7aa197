//!
//! 集成测试的通用辅助函数
//!

use envelope_kit::prelude::*;
use std::path::Path;
use std::sync::Arc;

/// 测试用配置：小 RSA 密钥加快生成，密钥目录指向临时路径。
pub fn test_config(dir: &Path) -> SecurityConfig {
    SecurityConfig {
        rsa_key_bits: 1024,
        key_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

/// 在临时目录上打开一个密钥仓库。
pub fn open_keystore(dir: &Path) -> Arc<KeyStore> {
    Arc::new(KeyStore::open(test_config(dir), None).unwrap())
}

/// 构建完整的响应编解码器。
pub fn build_codec(dir: &Path) -> (ResponseCodec, Arc<KeyStore>, Arc<ClientKeyRegistry>) {
    let keystore = open_keystore(dir);
    let registry = Arc::new(ClientKeyRegistry::new());
    let codec = ResponseCodec::new(keystore.clone(), registry.clone());
    (codec, keystore, registry)
}

/// 生成一个独立的客户端密钥对，返回 (私钥, 公钥PEM)。
pub fn client_keypair() -> (rsa::RsaPrivateKey, String) {
    use rsa::pkcs8::EncodePublicKey;
    let private = rsa::RsaPrivateKey::new(&mut rsa::rand_core::OsRng, 1024).unwrap();
    let pem = rsa::RsaPublicKey::from(&private)
        .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
        .unwrap();
    (private, pem)
}

/// 确定性的测试数据。
pub fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
