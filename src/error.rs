//! 定义 `envelope-kit` 的统一错误类型。

use thiserror::Error;

/// `envelope-kit` 的主错误类型。
///
/// 变体划分遵循各子系统的失败语义：密钥生成失败是致命的（进程无法在
/// 无密钥状态下提供服务），而加密策略的单次失败由回退阶梯捕获并继续。
#[derive(Debug, Error)]
pub enum Error {
    /// 密钥生成、加载或持久化失败。启动期出现时应中止进程。
    #[error("密钥生成或加载失败: {0}")]
    KeyGeneration(String),

    /// 明文超过所选 RSA 密钥的 OAEP 容量。必须在加密前抛出。
    #[error("明文大小 {size} 字节超过 RSA-OAEP 容量 {capacity} 字节")]
    EncryptionCapacity { size: usize, capacity: usize },

    /// 接收方 RSA 密钥太小，连 AES-128 密钥加 IV 都无法封装。
    #[error("RSA 密钥太小，无法进行混合加密 (OAEP 容量仅 {0} 字节)")]
    RsaKeyTooSmall(usize),

    /// 签名校验失败。
    #[error("签名验证失败")]
    SignatureInvalid,

    /// 请求时间戳超出新鲜度窗口。终态错误，不可重试。
    #[error("请求已过期: 时间差 {age_ms} 毫秒超过窗口 {window_ms} 毫秒")]
    TimestampExpired { age_ms: i64, window_ms: i64 },

    /// 解密完整性失败：填充损坏或密文被篡改。
    #[error("解密完整性校验失败: {0}")]
    DecryptionIntegrity(String),

    /// 分块操作无法继续：加密时所有块都失败，或解密时载荷中存在失败块。
    /// 部分成功的加密不走这里，失败块随载荷返回由调用方裁决。
    #[error("分块操作部分失败: {failed}/{total} 个块出错")]
    ChunkPartialFailure { failed: usize, total: usize },

    /// 缺少必需的安全请求头。
    #[error("缺少必需的安全请求头")]
    MissingHeaders,

    /// 数据库密钥镜像操作失败。
    #[error("密钥镜像错误: {0}")]
    Mirror(String),

    /// 请求的密钥不存在。
    #[error("密钥不存在: {0}")]
    KeyNotFound(String),

    /// 数据格式不合法。
    #[error("无效的数据格式: {0}")]
    Format(String),

    /// 底层加解密原语失败。
    #[error("加密或解密失败: {0}")]
    Crypto(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化失败: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Base64 解码失败: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

/// 统一的结果类型别名。
pub type Result<T> = std::result::Result<T, Error>;
