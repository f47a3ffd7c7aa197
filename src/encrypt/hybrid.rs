//! 混合加密：AES-256-CBC 加密数据 + RSA-OAEP 包裹会话密钥。
//!
//! 每次加密生成一次性的 AES 密钥和 IV，数据用 AES-CBC（PKCS#7 填充）
//! 加密，`密钥 || IV` 拼接后用接收方 RSA 公钥做 OAEP-SHA256 包裹。
//! AES 密钥长度根据 RSA 密钥的 OAEP 载荷容量自适应：容量不足以装下
//! AES-256 的密钥加 IV 时逐级降到 AES-192、AES-128。

use crate::encrypt::padding::{self, BLOCK_SIZE};
use crate::error::{Error, Result};
use crate::util::{decode_urlsafe, encode_urlsafe, now_millis};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rsa::rand_core::{OsRng, RngCore};
use rsa::sha2::Sha256;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// OAEP-SHA256 的固定开销：2 * 32（摘要） + 2 字节。
pub const OAEP_OVERHEAD: usize = 66;

/// RSA 公钥在 OAEP-SHA256 下的最大明文载荷（字节）。
pub fn oaep_capacity(public_key: &RsaPublicKey) -> usize {
    public_key.size().saturating_sub(OAEP_OVERHEAD)
}

/// 根据 OAEP 载荷容量选择 AES 密钥长度（字节）。
///
/// 载荷需要同时装下密钥和 16 字节 IV，因此阈值为密钥长度 + 16。
/// 容量连 AES-128 都装不下时拒绝该公钥。
pub fn select_aes_key_len(capacity: usize) -> Result<usize> {
    if capacity >= 32 + BLOCK_SIZE {
        Ok(32)
    } else if capacity >= 24 + BLOCK_SIZE {
        Ok(24)
    } else if capacity >= 16 + BLOCK_SIZE {
        Ok(16)
    } else {
        Err(Error::RsaKeyTooSmall(capacity))
    }
}

/// 混合加密的线上载荷。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridPayload {
    pub success: bool,
    /// URL 安全 Base64 编码的 AES-CBC 密文
    pub encrypted_data: String,
    /// URL 安全 Base64 编码的 OAEP 包裹 `密钥 || IV`
    pub encrypted_key: String,
    pub encryption_method: String,
    /// AES 密钥长度（比特）
    pub aes_key_size: u16,
    pub aes_mode: String,
    pub timestamp: i64,
}

/// 对数据做混合加密。
pub fn encrypt(public_key: &RsaPublicKey, data: &[u8]) -> Result<HybridPayload> {
    let key_len = select_aes_key_len(oaep_capacity(public_key))?;

    let mut key = Zeroizing::new(vec![0u8; key_len]);
    let mut iv = [0u8; BLOCK_SIZE];
    OsRng.fill_bytes(&mut key);
    OsRng.fill_bytes(&mut iv);

    let padded = padding::pad(data);
    let ciphertext = cbc_encrypt(&key, &iv, &padded)?;

    // 密钥和 IV 拼接后一次 OAEP 包裹
    let mut key_blob = Zeroizing::new(Vec::with_capacity(key_len + BLOCK_SIZE));
    key_blob.extend_from_slice(&key);
    key_blob.extend_from_slice(&iv);
    let encrypted_key = public_key
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key_blob)
        .map_err(|e| Error::Crypto(format!("OAEP包裹会话密钥失败: {}", e)))?;

    Ok(HybridPayload {
        success: true,
        encrypted_data: encode_urlsafe(&ciphertext),
        encrypted_key: encode_urlsafe(&encrypted_key),
        encryption_method: "hybrid".to_string(),
        aes_key_size: (key_len * 8) as u16,
        aes_mode: "CBC".to_string(),
        timestamp: now_millis(),
    })
}

/// 解开混合加密载荷。
pub fn decrypt(private_key: &RsaPrivateKey, payload: &HybridPayload) -> Result<Vec<u8>> {
    let ciphertext = decode_urlsafe(&payload.encrypted_data)?;
    let wrapped_key = decode_urlsafe(&payload.encrypted_key)?;

    let key_blob = Zeroizing::new(
        private_key
            .decrypt(Oaep::new::<Sha256>(), &wrapped_key)
            .map_err(|e| Error::DecryptionIntegrity(format!("OAEP解包会话密钥失败: {}", e)))?,
    );

    let key_len = payload.aes_key_size as usize / 8;
    if key_blob.len() != key_len + BLOCK_SIZE {
        return Err(Error::DecryptionIntegrity(format!(
            "会话密钥长度不符: 期望 {}，实际 {}",
            key_len + BLOCK_SIZE,
            key_blob.len()
        )));
    }
    let (key, iv) = key_blob.split_at(key_len);

    let padded = cbc_decrypt(key, iv, &ciphertext)?;
    padding::unpad(&padded)
}

fn cbc_encrypt(key: &[u8], iv: &[u8], padded: &[u8]) -> Result<Vec<u8>> {
    let map_err = |e: cbc::cipher::InvalidLength| Error::Crypto(format!("AES密钥或IV长度无效: {}", e));
    let out = match key.len() {
        16 => cbc::Encryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(map_err)?
            .encrypt_padded_vec_mut::<NoPadding>(padded),
        24 => cbc::Encryptor::<aes::Aes192>::new_from_slices(key, iv)
            .map_err(map_err)?
            .encrypt_padded_vec_mut::<NoPadding>(padded),
        32 => cbc::Encryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(map_err)?
            .encrypt_padded_vec_mut::<NoPadding>(padded),
        other => return Err(Error::Crypto(format!("不支持的AES密钥长度: {}", other))),
    };
    Ok(out)
}

fn cbc_decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let map_len = |e: cbc::cipher::InvalidLength| Error::Crypto(format!("AES密钥或IV长度无效: {}", e));
    let map_unpad =
        |_| Error::DecryptionIntegrity("密文长度未对齐块边界".to_string());
    let out = match key.len() {
        16 => cbc::Decryptor::<aes::Aes128>::new_from_slices(key, iv)
            .map_err(map_len)?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(map_unpad)?,
        24 => cbc::Decryptor::<aes::Aes192>::new_from_slices(key, iv)
            .map_err(map_len)?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(map_unpad)?,
        32 => cbc::Decryptor::<aes::Aes256>::new_from_slices(key, iv)
            .map_err(map_len)?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .map_err(map_unpad)?,
        other => return Err(Error::Crypto(format!("不支持的AES密钥长度: {}", other))),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair(bits: usize) -> (RsaPrivateKey, RsaPublicKey) {
        let private = RsaPrivateKey::new(&mut OsRng, bits).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn test_select_aes_key_len_thresholds() {
        // 2048位密钥：256 - 66 = 190，选 AES-256
        assert_eq!(select_aes_key_len(190).unwrap(), 32);
        // 1024位密钥：128 - 66 = 62，仍足够 AES-256
        assert_eq!(select_aes_key_len(62).unwrap(), 32);
        // 边界值
        assert_eq!(select_aes_key_len(48).unwrap(), 32);
        assert_eq!(select_aes_key_len(47).unwrap(), 24);
        assert_eq!(select_aes_key_len(40).unwrap(), 24);
        assert_eq!(select_aes_key_len(39).unwrap(), 16);
        assert_eq!(select_aes_key_len(32).unwrap(), 16);
        assert!(select_aes_key_len(31).is_err());
    }

    #[test]
    fn test_hybrid_roundtrip_2048() {
        let (private, public) = keypair(2048);
        let data = vec![0x5Au8; 5 * 1024];

        let payload = encrypt(&public, &data).unwrap();
        assert!(payload.success);
        assert_eq!(payload.encryption_method, "hybrid");
        assert_eq!(payload.aes_key_size, 256);
        assert_eq!(payload.aes_mode, "CBC");

        assert_eq!(decrypt(&private, &payload).unwrap(), data);
    }

    #[test]
    fn test_hybrid_roundtrip_1024() {
        let (private, public) = keypair(1024);
        let data = b"small key still carries AES-256 session material".to_vec();

        let payload = encrypt(&public, &data).unwrap();
        assert_eq!(payload.aes_key_size, 256);
        assert_eq!(decrypt(&private, &payload).unwrap(), data);
    }

    #[test]
    fn test_hybrid_empty_input() {
        let (private, public) = keypair(1024);
        let payload = encrypt(&public, &[]).unwrap();
        assert_eq!(decrypt(&private, &payload).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_tampered_ciphertext_fails_integrity() {
        let (private, public) = keypair(1024);
        let mut payload = encrypt(&public, b"integrity matters").unwrap();
        // 替换密文为另一段合法 Base64
        payload.encrypted_data = encode_urlsafe(&vec![0u8; 32]);
        assert!(decrypt(&private, &payload).is_err());
    }

    #[test]
    fn test_mismatched_key_size_field_rejected() {
        let (private, public) = keypair(1024);
        let mut payload = encrypt(&public, b"check the declared size").unwrap();
        payload.aes_key_size = 128;
        assert!(matches!(
            decrypt(&private, &payload),
            Err(Error::DecryptionIntegrity(_))
        ));
    }
}
