//! 客户端公钥注册表。
//!
//! 维护客户端标识符到其 PEM 公钥的进程内映射，用于选择按客户端的
//! 加密目标。条目在重复注册时被覆盖，随进程生命周期存在，无持久化。

use dashmap::DashMap;
use tracing::{debug, info};

const PEM_HEADER: &str = "-----BEGIN PUBLIC KEY-----";
const PEM_FOOTER: &str = "-----END PUBLIC KEY-----";

/// 客户端公钥注册表。
#[derive(Debug, Default)]
pub struct ClientKeyRegistry {
    keys: DashMap<String, String>,
}

impl ClientKeyRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    /// 注册客户端公钥，已有条目直接覆盖。
    pub fn register(&self, client_id: &str, public_key_pem: &str) {
        self.keys
            .insert(client_id.to_string(), public_key_pem.to_string());
        info!(client_id, "已存储客户端公钥");
    }

    /// 查找客户端公钥。
    pub fn get(&self, client_id: &str) -> Option<String> {
        let key = self.keys.get(client_id).map(|entry| entry.value().clone());
        if key.is_some() {
            debug!(client_id, "找到客户端公钥");
        } else {
            debug!(client_id, "未找到客户端公钥");
        }
        key
    }

    pub fn remove(&self, client_id: &str) -> Option<String> {
        self.keys.remove(client_id).map(|(_, pem)| pem)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// 补全缺失的 PEM 头尾。浏览器端常只上传 Base64 主体。
///
/// 主体按 RFC 7468 要求重新折行到 64 字符，单行长主体也能被
/// 严格模式的 PEM 解析器接受。
pub fn normalize_pem(pem: &str) -> String {
    let trimmed = pem.trim();
    if trimmed.starts_with(PEM_HEADER) {
        return trimmed.to_string();
    }

    let body: String = trimmed.split_whitespace().collect();
    let wrapped: Vec<&str> = body
        .as_bytes()
        .chunks(64)
        .map(|line| std::str::from_utf8(line).unwrap_or(""))
        .collect();
    format!("{}\n{}\n{}", PEM_HEADER, wrapped.join("\n"), PEM_FOOTER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = ClientKeyRegistry::new();
        assert!(registry.is_empty());

        registry.register("client-1", "PEM-A");
        assert_eq!(registry.get("client-1").as_deref(), Some("PEM-A"));
        assert_eq!(registry.get("client-2"), None);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_reregistration_overwrites() {
        let registry = ClientKeyRegistry::new();
        registry.register("client-1", "PEM-A");
        registry.register("client-1", "PEM-B");

        assert_eq!(registry.get("client-1").as_deref(), Some("PEM-B"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = ClientKeyRegistry::new();
        registry.register("client-1", "PEM-A");
        assert_eq!(registry.remove("client-1").as_deref(), Some("PEM-A"));
        assert!(registry.get("client-1").is_none());
    }

    #[test]
    fn test_normalize_pem_wraps_bare_body() {
        let bare = "MIIBIjANBg";
        let normalized = normalize_pem(bare);
        assert!(normalized.starts_with(PEM_HEADER));
        assert!(normalized.ends_with(PEM_FOOTER));

        // 已经完整的 PEM 保持不变
        assert_eq!(normalize_pem(&normalized), normalized);
    }
}
