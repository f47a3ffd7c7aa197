//! 分块混合加密：超大载荷切分后逐块做混合加密。
//!
//! 分块大小取数据量的十分之一并夹在配置的上下限之间。每块独立
//! 生成会话密钥，块序号和原始长度随块记录，解密端按序号重组并
//! 校验总长度。启用 `parallel` 特性时各块并行加密，输出顺序不变。
//!
//! 单块失败不会中断整体加密：失败块以 `success: false` 占位进入
//! 载荷，解密端发现任何失败块即拒绝整体重组。

use crate::config::SecurityConfig;
use crate::encrypt::hybrid::{self, HybridPayload};
use crate::error::{Error, Result};
use crate::util::now_millis;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// 单个数据块的加密结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub success: bool,
    pub chunk_index: u32,
    pub total_chunks: u32,
    /// 本块明文的原始长度（字节）
    pub original_length: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aes_key_size: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aes_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 分块混合加密的线上载荷。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkedPayload {
    pub success: bool,
    pub encryption_method: String,
    pub chunks: Vec<ChunkPayload>,
    pub total_chunks: u32,
    pub successful_chunks: u32,
    pub original_size: u64,
    pub chunk_size: u64,
    pub timestamp: i64,
}

fn encrypt_chunk(
    public_key: &RsaPublicKey,
    index: usize,
    total: usize,
    chunk: &[u8],
) -> ChunkPayload {
    match hybrid::encrypt(public_key, chunk) {
        Ok(HybridPayload {
            encrypted_data,
            encrypted_key,
            aes_key_size,
            aes_mode,
            ..
        }) => ChunkPayload {
            success: true,
            chunk_index: index as u32,
            total_chunks: total as u32,
            original_length: chunk.len() as u64,
            encrypted_data: Some(encrypted_data),
            encrypted_key: Some(encrypted_key),
            aes_key_size: Some(aes_key_size),
            aes_mode: Some(aes_mode),
            error: None,
        },
        Err(e) => {
            error!(chunk_index = index, "数据块加密失败: {}", e);
            ChunkPayload {
                success: false,
                chunk_index: index as u32,
                total_chunks: total as u32,
                original_length: chunk.len() as u64,
                encrypted_data: None,
                encrypted_key: None,
                aes_key_size: None,
                aes_mode: None,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(feature = "parallel")]
fn encrypt_chunks(public_key: &RsaPublicKey, chunks: &[&[u8]]) -> Vec<ChunkPayload> {
    use rayon::prelude::*;
    let total = chunks.len();
    // par_iter 的 collect 保持与输入相同的顺序
    chunks
        .par_iter()
        .enumerate()
        .map(|(index, chunk)| encrypt_chunk(public_key, index, total, chunk))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn encrypt_chunks(public_key: &RsaPublicKey, chunks: &[&[u8]]) -> Vec<ChunkPayload> {
    let total = chunks.len();
    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| encrypt_chunk(public_key, index, total, chunk))
        .collect()
}

/// 对大块数据做分块混合加密。
///
/// 单块失败不中断整体操作：失败块以 `success: false` 加错误描述随
/// 载荷返回，`successful_chunks` 与 `total_chunks` 的差值由调用方
/// 裁决。只有所有块都失败时才返回 [`Error::ChunkPartialFailure`]，
/// 让上层回退到下一级策略。
pub fn encrypt(
    public_key: &RsaPublicKey,
    config: &SecurityConfig,
    data: &[u8],
) -> Result<ChunkedPayload> {
    let chunk_size = config.chunk_size_for(data.len());
    let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();

    info!(
        original_size = data.len(),
        chunk_size,
        total_chunks = chunks.len(),
        "开始分块混合加密"
    );

    let results = encrypt_chunks(public_key, &chunks);
    assemble(results, data.len() as u64, chunk_size as u64)
}

/// 汇总各块结果为整体载荷。
fn assemble(results: Vec<ChunkPayload>, original_size: u64, chunk_size: u64) -> Result<ChunkedPayload> {
    let total = results.len();
    let successful = results.iter().filter(|c| c.success).count();

    if successful == 0 {
        return Err(Error::ChunkPartialFailure {
            failed: total,
            total,
        });
    }
    if successful != total {
        warn!(
            successful,
            total_chunks = total,
            "分块加密部分失败，失败块随载荷返回"
        );
    }

    Ok(ChunkedPayload {
        success: true,
        encryption_method: "chunked_hybrid".to_string(),
        chunks: results,
        total_chunks: total as u32,
        successful_chunks: successful as u32,
        original_size,
        chunk_size,
        timestamp: now_millis(),
    })
}

/// 重组并解密分块载荷。
///
/// 块按 `chunk_index` 排序后必须构成 `0..total_chunks` 的完整序列，
/// 且每块都成功；重组后的总长度必须等于 `original_size`。
pub fn decrypt(private_key: &RsaPrivateKey, payload: &ChunkedPayload) -> Result<Vec<u8>> {
    let total = payload.total_chunks as usize;

    let failed = payload.chunks.iter().filter(|c| !c.success).count();
    if failed > 0 {
        return Err(Error::ChunkPartialFailure { failed, total });
    }
    if payload.chunks.len() != total {
        return Err(Error::DecryptionIntegrity(format!(
            "块数量不符: 期望 {}，实际 {}",
            total,
            payload.chunks.len()
        )));
    }

    // 块可能乱序到达，按序号重排
    let mut ordered: Vec<&ChunkPayload> = payload.chunks.iter().collect();
    ordered.sort_by_key(|c| c.chunk_index);
    for (expected, chunk) in ordered.iter().enumerate() {
        if chunk.chunk_index as usize != expected {
            return Err(Error::DecryptionIntegrity(format!(
                "块序号不连续: 期望 {}，实际 {}",
                expected, chunk.chunk_index
            )));
        }
    }

    let mut plaintext = Vec::with_capacity(payload.original_size as usize);
    for chunk in ordered {
        let (Some(encrypted_data), Some(encrypted_key), Some(aes_key_size)) = (
            chunk.encrypted_data.as_ref(),
            chunk.encrypted_key.as_ref(),
            chunk.aes_key_size,
        ) else {
            return Err(Error::DecryptionIntegrity(format!(
                "块 {} 缺少密文字段",
                chunk.chunk_index
            )));
        };

        let hybrid_view = HybridPayload {
            success: true,
            encrypted_data: encrypted_data.clone(),
            encrypted_key: encrypted_key.clone(),
            encryption_method: "hybrid".to_string(),
            aes_key_size,
            aes_mode: chunk.aes_mode.clone().unwrap_or_else(|| "CBC".to_string()),
            timestamp: payload.timestamp,
        };
        let block = hybrid::decrypt(private_key, &hybrid_view)?;

        if block.len() as u64 != chunk.original_length {
            return Err(Error::DecryptionIntegrity(format!(
                "块 {} 长度不符: 期望 {}，实际 {}",
                chunk.chunk_index,
                chunk.original_length,
                block.len()
            )));
        }
        plaintext.extend_from_slice(&block);
    }

    if plaintext.len() as u64 != payload.original_size {
        return Err(Error::DecryptionIntegrity(format!(
            "重组后长度不符: 期望 {}，实际 {}",
            payload.original_size,
            plaintext.len()
        )));
    }

    Ok(plaintext)
}
