//! 通用工具：常量时间比较、敏感数据容器、URL 安全 Base64 与时间戳。

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 安全地比较两个字节序列，防止时序攻击
///
/// 无论输入如何，此函数总是比较所有字节，但只有所有字节都匹配才返回true
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0;
    for (byte_a, byte_b) in a.iter().zip(b.iter()) {
        result |= byte_a ^ byte_b;
    }

    result == 0
}

/// 自动清零的字节向量，用于私钥等敏感数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingVec(#[serde(with = "serde_bytes")] pub Vec<u8>);

impl std::ops::Deref for ZeroizingVec {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for ZeroizingVec {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// 编码为 URL 安全的 Base64：`+`→`-`、`/`→`_`、去掉尾部 `=` 填充。
///
/// 浏览器端的 `atob()` 解码器不需要为标准字母表做特殊处理。
pub fn encode_urlsafe(data: &[u8]) -> String {
    STANDARD
        .encode(data)
        .replace('+', "-")
        .replace('/', "_")
        .replace('=', "")
}

/// 解码 URL 安全的 Base64：还原 `+`/`/`，补齐 `=` 填充到 4 的倍数。
///
/// 同时兼容未经转换的标准 Base64 输入。
pub fn decode_urlsafe(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let mut normalized = data.replace('-', "+").replace('_', "/");
    let remainder = normalized.len() % 4;
    if remainder != 0 {
        normalized.push_str(&"=".repeat(4 - remainder));
    }
    STANDARD.decode(normalized)
}

/// 当前 Unix 毫秒时间戳。
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
