//! 加密引擎：按数据量和客户端密钥可用性选择策略，失败逐级回退。
//!
//! 三种基础策略：
//! - 标准 RSA-OAEP：小数据直接用接收方公钥加密；
//! - 混合加密（[`hybrid`]）：中等数据用 AES-CBC + OAEP 包裹会话密钥；
//! - 分块混合（[`chunked`]）：超大数据切块后逐块混合加密。
//!
//! 策略梯子按保密性从强到弱排列，前一级失败（客户端公钥损坏、
//! 容量不足等）自动落到下一级，最后一级总是服务端公钥，保证回退
//! 路径上的输出始终是密文。

pub mod chunked;
pub mod hybrid;
pub mod padding;

use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::registry::{normalize_pem, ClientKeyRegistry};
use crate::util::decode_urlsafe;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::sha2::Sha256;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use std::sync::Arc;
use tracing::{debug, error, info};

/// 加密策略，按回退顺序排列。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// 分块混合加密（客户端或服务端公钥）
    ChunkedHybrid,
    /// 混合加密（客户端或服务端公钥）
    Hybrid,
    /// 标准 RSA-OAEP，客户端公钥
    StandardRsa,
    /// 标准 RSA-OAEP，服务端公钥（最后防线）
    ServerRsa,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ChunkedHybrid => "chunked_hybrid",
            Strategy::Hybrid => "hybrid",
            Strategy::StandardRsa => "standard_rsa",
            Strategy::ServerRsa => "server_rsa",
        }
    }
}

/// 标准 RSA-OAEP 加密，带容量预检。
///
/// 输出标准字母表 Base64：URL 安全变换只用于混合载荷的内部字段。
pub fn standard_rsa_encrypt(public_key: &RsaPublicKey, data: &[u8]) -> Result<String> {
    let capacity = hybrid::oaep_capacity(public_key);
    if data.len() > capacity {
        return Err(Error::EncryptionCapacity {
            size: data.len(),
            capacity,
        });
    }
    let ciphertext = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), data)
        .map_err(|e| Error::Crypto(format!("RSA-OAEP加密失败: {}", e)))?;
    Ok(STANDARD.encode(&ciphertext))
}

/// 标准 RSA-OAEP 解密。
pub fn standard_rsa_decrypt(private_key: &RsaPrivateKey, data: &str) -> Result<Vec<u8>> {
    let ciphertext = decode_urlsafe(data)?;
    private_key
        .decrypt(Oaep::new::<Sha256>(), &ciphertext)
        .map_err(|e| Error::DecryptionIntegrity(format!("RSA-OAEP解密失败: {}", e)))
}

/// 加密引擎。
pub struct EncryptionEngine {
    keystore: Arc<KeyStore>,
    registry: Arc<ClientKeyRegistry>,
    config: SecurityConfig,
}

impl EncryptionEngine {
    pub fn new(keystore: Arc<KeyStore>, registry: Arc<ClientKeyRegistry>) -> Self {
        let config = keystore.config().clone();
        Self {
            keystore,
            registry,
            config,
        }
    }

    /// 根据数据量、客户端密钥可用性和目标密钥的 OAEP 容量规划策略梯子。
    ///
    /// 标准 RSA 的适用上限取配置阈值与目标容量中的较小者：数据装不进
    /// 一次 OAEP 时即使低于 200 字节阈值也必须走混合加密，否则梯子上
    /// 没有任何一级能成功。
    pub fn plan(&self, data_size: usize, has_client_key: bool, oaep_capacity: usize) -> Vec<Strategy> {
        let large = data_size > self.config.chunk_threshold;
        let medium = data_size > self.config.hybrid_threshold.min(oaep_capacity);

        match (large, medium, has_client_key) {
            (true, _, true) => vec![
                Strategy::ChunkedHybrid,
                Strategy::Hybrid,
                Strategy::StandardRsa,
                Strategy::ServerRsa,
            ],
            (true, _, false) => vec![
                Strategy::ChunkedHybrid,
                Strategy::Hybrid,
                Strategy::ServerRsa,
            ],
            (false, true, true) => vec![
                Strategy::Hybrid,
                Strategy::StandardRsa,
                Strategy::ServerRsa,
            ],
            (false, true, false) => vec![Strategy::Hybrid, Strategy::ServerRsa],
            (false, false, true) => vec![Strategy::StandardRsa, Strategy::ServerRsa],
            (false, false, false) => vec![Strategy::ServerRsa],
        }
    }

    /// 沿策略梯子加密数据，返回编码后的载荷和生效的策略。
    ///
    /// 每一级独立解析目标公钥，损坏的客户端密钥只会导致该级失败并
    /// 落到下一级。全部失败时返回最后一级的错误。
    pub fn encrypt(&self, client_id: Option<&str>, data: &[u8]) -> Result<(String, Strategy)> {
        let client_pem = client_id.and_then(|id| self.registry.get(id));

        // 规划以可能成为目标的密钥中最小的 OAEP 容量为准；
        // 无法解析的客户端密钥不参与容量计算，由对应的梯级自行失败
        let server_capacity = hybrid::oaep_capacity(&self.keystore.public_key()?);
        let capacity = client_pem
            .as_deref()
            .and_then(|pem| parse_public_key(pem).ok())
            .map(|key| hybrid::oaep_capacity(&key).min(server_capacity))
            .unwrap_or(server_capacity);

        let ladder = self.plan(data.len(), client_pem.is_some(), capacity);

        let mut last_err = Error::Crypto("策略梯子为空".to_string());
        for strategy in ladder {
            match self.try_strategy(strategy, client_pem.as_deref(), data) {
                Ok(encoded) => {
                    debug!(strategy = strategy.as_str(), size = data.len(), "加密策略生效");
                    return Ok((encoded, strategy));
                }
                Err(e) => {
                    error!(strategy = strategy.as_str(), "加密策略失败: {}", e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn try_strategy(
        &self,
        strategy: Strategy,
        client_pem: Option<&str>,
        data: &[u8],
    ) -> Result<String> {
        match strategy {
            Strategy::ChunkedHybrid => {
                let key = self.target_key(client_pem)?;
                let payload = chunked::encrypt(&key, &self.config, data)?;
                Ok(serde_json::to_string(&payload)?)
            }
            Strategy::Hybrid => {
                let key = self.target_key(client_pem)?;
                let payload = hybrid::encrypt(&key, data)?;
                Ok(serde_json::to_string(&payload)?)
            }
            Strategy::StandardRsa => {
                let pem = client_pem
                    .ok_or_else(|| Error::KeyNotFound("客户端公钥未注册".to_string()))?;
                let key = parse_public_key(pem)?;
                standard_rsa_encrypt(&key, data)
            }
            Strategy::ServerRsa => {
                let key = self.keystore.public_key()?;
                standard_rsa_encrypt(&key, data)
            }
        }
    }

    /// 混合与分块策略的目标公钥：优先客户端密钥，未注册时用服务端公钥。
    fn target_key(&self, client_pem: Option<&str>) -> Result<RsaPublicKey> {
        match client_pem {
            Some(pem) => parse_public_key(pem),
            None => self.keystore.public_key(),
        }
    }

    /// 按载荷格式分派解密。
    ///
    /// JSON 对象按 `encryption_method` 标签分派到混合或分块解密，
    /// 其余输入按标准 RSA-OAEP 的 Base64 密文处理。
    pub fn decrypt(&self, data: &str) -> Result<Vec<u8>> {
        let private_key = self.keystore.private_key()?;

        if let Ok(value) = serde_json::from_str::<serde_json::Value>(data) {
            if let Some(method) = value.get("encryption_method").and_then(|m| m.as_str()) {
                return match method {
                    "chunked_hybrid" => {
                        let payload: chunked::ChunkedPayload = serde_json::from_value(value)?;
                        chunked::decrypt(&private_key, &payload)
                    }
                    "hybrid" => {
                        let payload: hybrid::HybridPayload = serde_json::from_value(value)?;
                        hybrid::decrypt(&private_key, &payload)
                    }
                    other => Err(Error::Format(format!("未知的加密方法标签: {}", other))),
                };
            }
        }

        standard_rsa_decrypt(&private_key, data)
    }

    /// 加密引擎当前可见的服务端 OAEP 容量，便于调用方预估策略。
    pub fn server_capacity(&self) -> Result<usize> {
        let key = self.keystore.public_key()?;
        let capacity = hybrid::oaep_capacity(&key);
        info!(key_bits = key.size() * 8, capacity, "服务端RSA容量");
        Ok(capacity)
    }
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey> {
    let normalized = normalize_pem(pem);
    RsaPublicKey::from_public_key_pem(&normalized)
        .map_err(|e| Error::Format(format!("解析客户端公钥失败: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs8::EncodePublicKey;
    use tempfile::tempdir;

    fn test_engine(dir: &std::path::Path) -> EncryptionEngine {
        let config = SecurityConfig {
            rsa_key_bits: 1024,
            key_dir: dir.to_path_buf(),
            ..Default::default()
        };
        let keystore = Arc::new(KeyStore::open(config, None).unwrap());
        EncryptionEngine::new(keystore, Arc::new(ClientKeyRegistry::new()))
    }

    fn client_pem() -> String {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        RsaPublicKey::from(&private)
            .to_public_key_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
    }

    #[test]
    fn test_plan_follows_size_and_key_availability() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        // 2048位密钥的 OAEP 容量
        let cap = 190;

        assert_eq!(engine.plan(100, false, cap), vec![Strategy::ServerRsa]);
        assert_eq!(
            engine.plan(100, true, cap),
            vec![Strategy::StandardRsa, Strategy::ServerRsa]
        );
        assert_eq!(
            engine.plan(201, true, cap),
            vec![Strategy::Hybrid, Strategy::StandardRsa, Strategy::ServerRsa]
        );
        // 1 MiB 是分块阈值本身
        assert_eq!(
            engine.plan(1024 * 1024, false, cap),
            vec![Strategy::Hybrid, Strategy::ServerRsa]
        );
        assert_eq!(
            engine.plan(1024 * 1024 + 1, true, cap),
            vec![
                Strategy::ChunkedHybrid,
                Strategy::Hybrid,
                Strategy::StandardRsa,
                Strategy::ServerRsa
            ]
        );
    }

    #[test]
    fn test_plan_hybridizes_between_capacity_and_threshold() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());

        // 容量低于 200 字节阈值时上限取容量：195 字节对 2048 位密钥
        // 装不进一次 OAEP，必须有混合梯级兜底
        assert_eq!(
            engine.plan(195, true, 190),
            vec![Strategy::Hybrid, Strategy::StandardRsa, Strategy::ServerRsa]
        );
        assert_eq!(
            engine.plan(190, true, 190),
            vec![Strategy::StandardRsa, Strategy::ServerRsa]
        );
        // 1024 位密钥容量 62 字节，100 字节同样落入混合档
        assert_eq!(
            engine.plan(100, false, 62),
            vec![Strategy::Hybrid, Strategy::ServerRsa]
        );
    }

    #[test]
    fn test_small_data_server_rsa_roundtrip() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());

        let (encoded, strategy) = engine.encrypt(None, b"tiny").unwrap();
        assert_eq!(strategy, Strategy::ServerRsa);
        assert_eq!(engine.decrypt(&encoded).unwrap(), b"tiny");
    }

    #[test]
    fn test_payload_over_capacity_below_threshold_uses_hybrid() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());

        // 100 字节超过 1024 位密钥的 62 字节容量但低于 200 字节阈值
        let data = vec![3u8; 100];
        let (encoded, strategy) = engine.encrypt(None, &data).unwrap();
        assert_eq!(strategy, Strategy::Hybrid);
        assert_eq!(engine.decrypt(&encoded).unwrap(), data);
    }

    #[test]
    fn test_standard_rsa_emits_standard_base64() {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);

        // 1024 位密文 128 字节，标准 Base64 必然带 '=' 填充
        let encoded = standard_rsa_encrypt(&public, b"wire format").unwrap();
        assert!(encoded.ends_with('='));
        assert!(!encoded.contains('-') && !encoded.contains('_'));
        assert_eq!(
            standard_rsa_decrypt(&private, &encoded).unwrap(),
            b"wire format"
        );
    }

    #[test]
    fn test_medium_data_selects_hybrid() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());

        let data = vec![7u8; 5 * 1024];
        let (encoded, strategy) = engine.encrypt(None, &data).unwrap();
        assert_eq!(strategy, Strategy::Hybrid);
        assert_eq!(engine.decrypt(&encoded).unwrap(), data);
    }

    #[test]
    fn test_large_data_selects_chunked() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());

        let data = vec![9u8; 1_500_000];
        let (encoded, strategy) = engine.encrypt(None, &data).unwrap();
        assert_eq!(strategy, Strategy::ChunkedHybrid);
        assert_eq!(engine.decrypt(&encoded).unwrap(), data);
    }

    #[test]
    fn test_malformed_client_key_falls_back_to_server() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine
            .registry
            .register("client-1", "not a real pem ###");

        // 小数据：StandardRsa 失败后落到 ServerRsa，输出仍可被服务端解开
        let (encoded, strategy) = engine.encrypt(Some("client-1"), b"secret").unwrap();
        assert_eq!(strategy, Strategy::ServerRsa);
        assert_eq!(engine.decrypt(&encoded).unwrap(), b"secret");
    }

    #[test]
    fn test_registered_client_key_is_used() {
        let dir = tempdir().unwrap();
        let engine = test_engine(dir.path());
        engine.registry.register("client-2", &client_pem());

        let (_, strategy) = engine.encrypt(Some("client-2"), b"for the client").unwrap();
        assert_eq!(strategy, Strategy::StandardRsa);
    }

    #[test]
    fn test_capacity_precheck_rejects_oversized_standard_rsa() {
        let private = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        // 1024位密钥容量为 128 - 66 = 62 字节
        assert!(standard_rsa_encrypt(&public, &[0u8; 62]).is_ok());
        assert!(matches!(
            standard_rsa_encrypt(&public, &[0u8; 63]),
            Err(Error::EncryptionCapacity { .. })
        ));
    }
}
