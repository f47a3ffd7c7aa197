//! 签名引擎：HMAC 请求签名校验与 RSA-PSS 响应签名。
//!
//! 请求方向使用 API 密钥做 HMAC-SHA256，消息为 `"{api_key}{timestamp}"`；
//! 响应方向使用服务端 RSA 私钥做 PSS-SHA256，消息为 `"{data}{timestamp}"`。
//! 两个方向都要求时间戳在配置的新鲜度窗口内。
//!
//! 历史遗留：前端客户端不持有 API 密钥，发送字面量 `"frontend"` 作为
//! 签名占位。这类请求跳过 HMAC 比较，只做新鲜度校验，结果标记为
//! [`VerifyOutcome::DegradedUnsigned`] 并记录审计日志，由调用方决定
//! 是否放行。

use crate::error::{Error, Result};
use crate::keystore::{KeyStore, SecretKind};
use crate::util::{constant_time_eq, decode_urlsafe, encode_urlsafe, now_millis};
use hmac::{Hmac, Mac};
use rsa::pss::{Signature as PssSignature, SigningKey, VerifyingKey};
use rsa::rand_core::OsRng;
use rsa::sha2::Sha256;
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use std::sync::Arc;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// 前端降级签名的字面量占位值。
pub const FRONTEND_SIGNATURE: &str = "frontend";

/// 请求签名校验的三种结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// HMAC 校验通过
    Verified,
    /// 前端降级请求，仅通过了新鲜度校验
    DegradedUnsigned,
    /// 签名不匹配
    Invalid,
}

/// 从传输层提取并格式校验后的安全头。
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    pub api_key: String,
    pub timestamp: i64,
    pub signature: String,
}

/// 签名引擎。
pub struct SignatureEngine {
    keystore: Arc<KeyStore>,
    window_ms: i64,
}

impl SignatureEngine {
    pub fn new(keystore: Arc<KeyStore>) -> Self {
        let window_ms = keystore.config().timestamp_window_ms;
        Self { keystore, window_ms }
    }

    // --- 响应签名（RSA-PSS） ---

    /// 用服务端私钥对 `"{data}{timestamp}"` 做 PSS-SHA256 签名，
    /// 返回 URL 安全 Base64 编码的签名。
    pub fn sign_response(&self, data: &str, timestamp: i64) -> Result<String> {
        let private_key = self.keystore.private_key()?;
        let signing_key = SigningKey::<Sha256>::new(private_key);
        let message = format!("{}{}", data, timestamp);

        let mut rng = OsRng;
        let signature = signing_key.sign_with_rng(&mut rng, message.as_bytes());
        Ok(encode_urlsafe(&signature.to_bytes()))
    }

    /// 校验响应签名。签名无效返回 [`Error::SignatureInvalid`]。
    pub fn verify_response(&self, data: &str, timestamp: i64, signature: &str) -> Result<()> {
        let public_key = self.keystore.public_key()?;
        let verifying_key = VerifyingKey::<Sha256>::new(public_key);
        let message = format!("{}{}", data, timestamp);

        let signature_bytes = decode_urlsafe(signature)?;
        let signature_obj = PssSignature::try_from(signature_bytes.as_slice())
            .map_err(|_| Error::SignatureInvalid)?;

        verifying_key
            .verify(message.as_bytes(), &signature_obj)
            .map_err(|_| Error::SignatureInvalid)
    }

    // --- 请求签名（HMAC-SHA256） ---

    /// 用 API 密钥对 `"{api_key}{timestamp}"` 计算 HMAC-SHA256，
    /// 返回 URL 安全 Base64 编码的摘要。
    pub fn sign_request(&self, api_key: &str, timestamp: i64) -> Result<String> {
        Ok(encode_urlsafe(&self.request_digest(api_key, timestamp)?))
    }

    fn request_digest(&self, api_key: &str, timestamp: i64) -> Result<Vec<u8>> {
        let secret = self.keystore.secret(SecretKind::ApiSecret)?;
        let mut mac = HmacSha256::new_from_slice(&secret)
            .map_err(|e| Error::Crypto(format!("初始化HMAC失败: {}", e)))?;
        mac.update(format!("{}{}", api_key, timestamp).as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// 校验请求签名。
    ///
    /// 先做新鲜度校验（任一方向偏差超过窗口即拒绝），再比较 HMAC。
    /// 签名头先做 Base64 解码再比较原始摘要，标准与 URL 安全两种
    /// 字母表都接受。签名为 `"frontend"` 时跳过比较并返回降级结果。
    pub fn verify_request(
        &self,
        api_key: &str,
        timestamp: i64,
        signature: &str,
    ) -> Result<VerifyOutcome> {
        self.check_freshness(timestamp)?;

        if signature == FRONTEND_SIGNATURE {
            warn!(
                api_key = %mask_api_key(api_key),
                "前端降级请求：跳过HMAC校验，仅验证时间戳新鲜度"
            );
            return Ok(VerifyOutcome::DegradedUnsigned);
        }

        let Ok(provided) = decode_urlsafe(signature) else {
            warn!(api_key = %mask_api_key(api_key), "请求签名不是合法的Base64");
            return Ok(VerifyOutcome::Invalid);
        };

        let expected = self.request_digest(api_key, timestamp)?;
        if constant_time_eq(&expected, &provided) {
            debug!(api_key = %mask_api_key(api_key), "请求签名校验通过");
            Ok(VerifyOutcome::Verified)
        } else {
            warn!(api_key = %mask_api_key(api_key), "请求签名校验失败");
            Ok(VerifyOutcome::Invalid)
        }
    }

    /// 时间戳新鲜度校验，双向窗口。
    pub fn check_freshness(&self, timestamp: i64) -> Result<()> {
        let age_ms = (now_millis() - timestamp).abs();
        if age_ms > self.window_ms {
            return Err(Error::TimestampExpired {
                age_ms,
                window_ms: self.window_ms,
            });
        }
        Ok(())
    }

    /// 从传输层原始头字段提取并校验格式与新鲜度。
    ///
    /// 签名头缺失按前端降级占位处理，并记录脱敏审计日志。
    pub fn verify_headers(
        &self,
        api_key: Option<&str>,
        timestamp: Option<&str>,
        signature: Option<&str>,
    ) -> Result<SecurityHeaders> {
        let (Some(api_key), Some(timestamp)) = (api_key, timestamp) else {
            return Err(Error::MissingHeaders);
        };

        let timestamp: i64 = timestamp
            .parse()
            .map_err(|_| Error::Format(format!("时间戳格式无效: {}", timestamp)))?;
        self.check_freshness(timestamp)?;

        let signature = match signature {
            Some(sig) => sig.to_string(),
            None => {
                warn!(
                    api_key = %mask_api_key(api_key),
                    "请求缺少签名头，按前端降级请求处理"
                );
                FRONTEND_SIGNATURE.to_string()
            }
        };

        Ok(SecurityHeaders {
            api_key: api_key.to_string(),
            timestamp,
            signature,
        })
    }
}

/// API 密钥脱敏，只保留前 8 个字符用于日志定位。
fn mask_api_key(api_key: &str) -> String {
    let prefix: String = api_key.chars().take(8).collect();
    format!("{}...", prefix)
}
