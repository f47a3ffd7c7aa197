//! 响应信封：加密、签名与请求解密的外层封装。
//!
//! [`ResponseCodec`] 把加密引擎和签名引擎组合成单一出入口：出站
//! 响应沿策略梯子加密并附带 RSA-PSS 签名；入站请求做单向新鲜度
//! 校验后用服务端私钥解密。
//!
//! 加密梯子全部失败时不会把原始载荷泄漏出去：信封携带一段固定
//! 结构的明文错误 JSON（同样签名），调用方据此向客户端报错。

use crate::encrypt::EncryptionEngine;
use crate::error::{Error, Result};
use crate::keystore::KeyStore;
use crate::registry::ClientKeyRegistry;
use crate::signature::SignatureEngine;
use crate::util::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

/// 签名的加密响应信封。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// 加密载荷（或加密失败时的明文错误 JSON）
    pub data: String,
    /// 信封时间戳（Unix 毫秒），参与签名
    pub timestamp: i64,
    /// `"{data}{timestamp}"` 的 RSA-PSS 签名，URL 安全 Base64
    pub signature: String,
}

/// 响应编解码器。
pub struct ResponseCodec {
    engine: EncryptionEngine,
    signer: SignatureEngine,
    keystore: Arc<KeyStore>,
}

impl ResponseCodec {
    pub fn new(keystore: Arc<KeyStore>, registry: Arc<ClientKeyRegistry>) -> Self {
        Self {
            engine: EncryptionEngine::new(keystore.clone(), registry),
            signer: SignatureEngine::new(keystore.clone()),
            keystore,
        }
    }

    pub fn engine(&self) -> &EncryptionEngine {
        &self.engine
    }

    pub fn signer(&self) -> &SignatureEngine {
        &self.signer
    }

    /// 加密并签名一个响应载荷。
    ///
    /// 梯子全部失败时降级为明文错误信封，原始载荷绝不进入信封。
    /// 签名失败始终上抛：未签名的响应不允许出站。
    pub fn encrypt_response(&self, client_id: Option<&str>, payload: &Value) -> Result<EncryptedEnvelope> {
        let serialized = serde_json::to_string(payload)?;
        let timestamp = now_millis();

        let data = match self.engine.encrypt(client_id, serialized.as_bytes()) {
            Ok((encoded, strategy)) => {
                info!(strategy = strategy.as_str(), "响应加密完成");
                encoded
            }
            Err(e) => {
                error!("所有加密策略均失败，返回明文错误信封: {}", e);
                serde_json::to_string(&json!({
                    "error": "encryption_failed",
                    "message": e.to_string(),
                    "timestamp": timestamp,
                }))?
            }
        };

        let signature = self.signer.sign_response(&data, timestamp)?;
        Ok(EncryptedEnvelope {
            data,
            timestamp,
            signature,
        })
    }

    /// 解密入站请求。
    ///
    /// 新鲜度是单向窗口：只拒绝过旧的时间戳，客户端时钟略快不算错。
    /// 载荷必须是服务端公钥加密的标准 RSA 密文。
    pub fn decrypt_request(&self, data: &str, timestamp: i64) -> Result<Value> {
        let window_ms = self.keystore.config().timestamp_window_ms;
        let age_ms = now_millis() - timestamp;
        if age_ms > window_ms {
            return Err(Error::TimestampExpired { age_ms, window_ms });
        }

        let private_key = self.keystore.private_key()?;
        let plaintext = crate::encrypt::standard_rsa_decrypt(&private_key, data)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    /// 解开一个响应信封：校验签名后按载荷格式分派解密。
    ///
    /// 明文错误信封（加密降级产物）在签名校验通过后原样返回。
    pub fn decrypt_response(&self, envelope: &EncryptedEnvelope) -> Result<Value> {
        self.signer
            .verify_response(&envelope.data, envelope.timestamp, &envelope.signature)?;

        if let Ok(value) = serde_json::from_str::<Value>(&envelope.data) {
            if value.get("error").is_some() {
                return Ok(value);
            }
        }

        let plaintext = self.engine.decrypt(&envelope.data)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
