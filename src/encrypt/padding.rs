//! PKCS#7 填充。
//!
//! 加密侧总是追加填充：明文长度恰好对齐块边界时追加一个完整的
//! 填充块，保证去填充无歧义。解密侧做严格校验，任何不一致都按
//! 完整性错误拒绝，绝不静默截断。

use crate::error::{Error, Result};

/// AES 块大小（字节）。
pub const BLOCK_SIZE: usize = 16;

/// 追加 PKCS#7 填充。输入对齐时追加一个完整块。
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.extend(std::iter::repeat(pad_len as u8).take(pad_len));
    padded
}

/// 严格校验并去除 PKCS#7 填充。
///
/// 输入为空、长度未对齐、填充值越界或填充字节不一致时返回
/// [`Error::DecryptionIntegrity`]。
pub fn unpad(data: &[u8]) -> Result<Vec<u8>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(Error::DecryptionIntegrity(format!(
            "密文长度未对齐块边界: {}",
            data.len()
        )));
    }

    let pad_len = data[data.len() - 1] as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE {
        return Err(Error::DecryptionIntegrity(format!(
            "填充值越界: {}",
            pad_len
        )));
    }

    let (body, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|&b| b as usize != pad_len) {
        return Err(Error::DecryptionIntegrity("填充字节不一致".to_string()));
    }

    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_unpad_roundtrip() {
        for len in [0, 1, 15, 16, 17, 31, 32, 1000] {
            let data = vec![0xABu8; len];
            let padded = pad(&data);
            assert_eq!(padded.len() % BLOCK_SIZE, 0);
            assert_eq!(unpad(&padded).unwrap(), data);
        }
    }

    #[test]
    fn test_aligned_input_gains_full_block() {
        let data = [0u8; 32];
        let padded = pad(&data);
        assert_eq!(padded.len(), 48);
        assert_eq!(&padded[32..], &[16u8; 16]);
    }

    #[test]
    fn test_empty_input_pads_to_one_block() {
        let padded = pad(&[]);
        assert_eq!(padded, vec![16u8; 16]);
        assert_eq!(unpad(&padded).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_unpad_rejects_misaligned() {
        assert!(unpad(&[1u8; 15]).is_err());
        assert!(unpad(&[]).is_err());
    }

    #[test]
    fn test_unpad_rejects_bad_padding_value() {
        let mut block = vec![0u8; 16];
        block[15] = 0;
        assert!(unpad(&block).is_err());
        block[15] = 17;
        assert!(unpad(&block).is_err());
    }

    #[test]
    fn test_unpad_rejects_inconsistent_padding_bytes() {
        let mut block = vec![3u8; 16];
        block[14] = 2;
        assert!(unpad(&block).is_err());
    }
}
