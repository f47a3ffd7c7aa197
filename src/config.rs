//!
//! # 安全配置模块
//!
//! 集中定义密钥生命周期、加密策略阈值与信封新鲜度窗口的全部可调参数。
//! 所有字段都有经过实际部署校准的默认值，可整体从 JSON/TOML 反序列化。
//!

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 安全子系统的完整配置。
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// RSA 密钥位数
    #[serde(default = "default_rsa_key_bits")]
    pub rsa_key_bits: usize,
    /// RSA 密钥对有效期（天）。镜像中的 `fixed_time` 超龄即强制重新生成。
    #[serde(default = "default_rsa_validity_days")]
    pub rsa_validity_days: i64,
    /// API 密钥（HMAC 签名用）有效期（天）
    #[serde(default = "default_secret_validity_days")]
    pub api_secret_validity_days: i64,
    /// JWT 密钥有效期（天）
    #[serde(default = "default_secret_validity_days")]
    pub jwt_secret_validity_days: i64,
    /// 请求/响应时间戳的新鲜度窗口（毫秒）
    #[serde(default = "default_timestamp_window_ms")]
    pub timestamp_window_ms: i64,
    /// 超过该字节数改用混合加密（AES+RSA）
    #[serde(default = "default_hybrid_threshold")]
    pub hybrid_threshold: usize,
    /// 超过该字节数改用分块混合加密
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,
    /// 单块最大字节数
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    /// 单块最小字节数
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    /// 密钥文件存储目录
    #[serde(default = "default_key_dir")]
    pub key_dir: PathBuf,
    /// 密钥文件权限（Unix 文件模式）
    #[serde(default = "default_file_permissions")]
    pub file_permissions: u32,
}

fn default_rsa_key_bits() -> usize {
    2048
}

fn default_rsa_validity_days() -> i64 {
    30
}

fn default_secret_validity_days() -> i64 {
    7
}

fn default_timestamp_window_ms() -> i64 {
    60_000
}

fn default_hybrid_threshold() -> usize {
    200
}

fn default_chunk_threshold() -> usize {
    1024 * 1024
}

fn default_max_chunk_size() -> usize {
    256 * 1024
}

fn default_min_chunk_size() -> usize {
    10 * 1024
}

fn default_key_dir() -> PathBuf {
    PathBuf::from("./secret")
}

fn default_file_permissions() -> u32 {
    0o600 // 等同于 -rw-------
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rsa_key_bits: default_rsa_key_bits(),
            rsa_validity_days: default_rsa_validity_days(),
            api_secret_validity_days: default_secret_validity_days(),
            jwt_secret_validity_days: default_secret_validity_days(),
            timestamp_window_ms: default_timestamp_window_ms(),
            hybrid_threshold: default_hybrid_threshold(),
            chunk_threshold: default_chunk_threshold(),
            max_chunk_size: default_max_chunk_size(),
            min_chunk_size: default_min_chunk_size(),
            key_dir: default_key_dir(),
            file_permissions: default_file_permissions(),
        }
    }
}

impl SecurityConfig {
    /// 根据数据总量推导分块大小：默认取数据大小的 1/10，
    /// 上限 `max_chunk_size`，下限 `min_chunk_size`。
    pub fn chunk_size_for(&self, data_size: usize) -> usize {
        (data_size / 10).clamp(self.min_chunk_size, self.max_chunk_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SecurityConfig::default();
        assert_eq!(config.rsa_key_bits, 2048);
        assert_eq!(config.rsa_validity_days, 30);
        assert_eq!(config.api_secret_validity_days, 7);
        assert_eq!(config.timestamp_window_ms, 60_000);
        assert_eq!(config.hybrid_threshold, 200);
        assert_eq!(config.chunk_threshold, 1024 * 1024);
        assert_eq!(config.file_permissions, 0o600);
    }

    #[test]
    fn test_chunk_size_derivation() {
        let config = SecurityConfig::default();
        // 3MB 数据：1/10 超过上限，取 256KB
        assert_eq!(config.chunk_size_for(3 * 1024 * 1024), 256 * 1024);
        // 小数据：1/10 低于下限，取 10KB
        assert_eq!(config.chunk_size_for(50 * 1024), 10 * 1024);
        // 中间值：正好取 1/10
        assert_eq!(config.chunk_size_for(1_200_000), 120_000);
    }

    #[test]
    fn test_partial_deserialization_uses_defaults() {
        let config: SecurityConfig = serde_json::from_str(r#"{"rsa_key_bits": 4096}"#).unwrap();
        assert_eq!(config.rsa_key_bits, 4096);
        assert_eq!(config.hybrid_threshold, 200);
    }
}
