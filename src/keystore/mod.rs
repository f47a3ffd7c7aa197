//! 密钥仓库：三类长期凭据的生成、持久化与轮换。
//!
//! `KeyStore` 管理 RSA 密钥对（签名与加密）、API 密钥（HMAC 请求签名）
//! 和 JWT 密钥，每类凭据有独立的有效期窗口。RSA 密钥对额外与数据库
//! 镜像保持同步：镜像是多实例部署下的系统记录源，内容不一致时以镜像
//! 为准覆盖本地文件。
//!
//! 服务对象在进程启动时显式构造并注入，取代模块级全局可变状态。
//! 所有生成路径上的文件系统或镜像错误都会被记录并上抛——没有可校验
//! 的密钥时拒绝启动，而不是带病运行。

pub mod mirror;

use crate::config::SecurityConfig;
use crate::error::{Error, Result};
use crate::util::{encode_urlsafe, ZeroizingVec};
use chrono::{DateTime, Duration, Utc};
use mirror::KeyMirror;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::rand_core::{OsRng, RngCore};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

/// 镜像中 RSA 私钥记录的名称。
pub const MIRROR_PRIVATE_KEY: &str = "private_key";
/// 镜像中 RSA 公钥记录的名称。
pub const MIRROR_PUBLIC_KEY: &str = "public_key";

const PRIVATE_KEY_FILE: &str = "server-private.pem";
const PUBLIC_KEY_FILE: &str = "server-public.pem";

/// 对称密钥的最小长度要求
const API_SECRET_MIN_BYTES: usize = 16;
const JWT_SECRET_MIN_CHARS: usize = 32;

/// 对称密钥的种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    /// 用于 HMAC-SHA256 请求签名的 API 密钥（32 随机字节）
    ApiSecret,
    /// 用于 JWT 签发的密钥（64 随机字节的 URL 安全 Base64 串）
    JwtSecret,
}

impl SecretKind {
    fn key_file(&self) -> &'static str {
        match self {
            SecretKind::ApiSecret => "api_secret.key",
            SecretKind::JwtSecret => "jwt_secret.key",
        }
    }

    fn timestamp_file(&self) -> &'static str {
        match self {
            SecretKind::ApiSecret => "api_secret.timestamp",
            SecretKind::JwtSecret => "jwt_secret.timestamp",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            SecretKind::ApiSecret => "API密钥",
            SecretKind::JwtSecret => "JWT密钥",
        }
    }
}

/// 单个密钥的有效期信息，用于监控与调试。
#[derive(Debug, Clone, Serialize)]
pub struct SecretValidity {
    pub exists: bool,
    pub expired: bool,
    pub validity_days: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_days: Option<i64>,
}

/// 全部对称密钥的有效期信息。
#[derive(Debug, Clone, Serialize)]
pub struct AllSecretsValidity {
    pub api_secret: SecretValidity,
    pub jwt_secret: SecretValidity,
}

struct CachedKeypair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

/// 密钥仓库服务。
pub struct KeyStore {
    config: SecurityConfig,
    mirror: Option<Arc<dyn KeyMirror>>,
    keypair: RwLock<Option<CachedKeypair>>,
}

impl KeyStore {
    /// 打开密钥仓库并立即装载全部凭据。
    ///
    /// 任何一类凭据无法生成或加载都会失败——调用方应将其视为致命的
    /// 启动错误。
    pub fn open(config: SecurityConfig, mirror: Option<Arc<dyn KeyMirror>>) -> Result<Self> {
        fs::create_dir_all(&config.key_dir).map_err(|e| {
            Error::KeyGeneration(format!(
                "无法创建密钥存储目录 {}: {}",
                config.key_dir.display(),
                e
            ))
        })?;

        let store = Self {
            config,
            mirror,
            keypair: RwLock::new(None),
        };

        store.rsa_keypair()?;
        store.secret(SecretKind::ApiSecret)?;
        store.secret(SecretKind::JwtSecret)?;
        Ok(store)
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    // --- RSA 密钥对 ---

    /// 获取 RSA 密钥对，必要时加载、同步或重新生成。
    ///
    /// 加载顺序：进程内缓存 → 镜像校正（镜像为准） → 镜像超龄检查
    /// （独立于加载路径，超过 `rsa_validity_days` 无条件重新生成） →
    /// 本地 PEM 文件 → 全新生成并双写（本地 + 镜像）。
    pub fn rsa_keypair(&self) -> Result<(RsaPrivateKey, RsaPublicKey)> {
        if let Some(pair) = self.cached_keypair() {
            return Ok(pair);
        }

        // 镜像同步与超龄检查都在进程锁之外进行，不跨数据库往返持锁
        if self.mirror.is_some() {
            self.sync_with_mirror()?;
            if self.mirror_expired()? {
                info!("镜像中的RSA密钥已超过有效期，强制重新生成");
                return self.generate_and_persist();
            }
        }

        if let Some((private, public)) = self.load_local_keypair()? {
            self.cache_keypair(private.clone(), public.clone());
            return Ok((private, public));
        }

        self.generate_and_persist()
    }

    /// 服务端公钥。
    pub fn public_key(&self) -> Result<RsaPublicKey> {
        Ok(self.rsa_keypair()?.1)
    }

    /// 服务端私钥。
    pub fn private_key(&self) -> Result<RsaPrivateKey> {
        Ok(self.rsa_keypair()?.0)
    }

    /// 强制重新生成 RSA 密钥对，忽略有效期。
    pub fn force_regenerate_rsa(&self) -> Result<(RsaPrivateKey, RsaPublicKey)> {
        info!("强制重新生成RSA密钥对");
        self.generate_and_persist()
    }

    /// 公钥 PEM 去掉头尾与换行后的主体，供 `/security-info` 类端点下发。
    pub fn public_key_pem_body(&self) -> Result<String> {
        let (_, public) = self.rsa_keypair()?;
        let pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::Crypto(format!("导出RSA公钥失败: {}", e)))?;
        Ok(pem
            .replace("-----BEGIN PUBLIC KEY-----", "")
            .replace("-----END PUBLIC KEY-----", "")
            .replace('\n', ""))
    }

    fn cached_keypair(&self) -> Option<(RsaPrivateKey, RsaPublicKey)> {
        let guard = self.keypair.read().ok()?;
        guard
            .as_ref()
            .map(|pair| (pair.private.clone(), pair.public.clone()))
    }

    fn cache_keypair(&self, private: RsaPrivateKey, public: RsaPublicKey) {
        if let Ok(mut guard) = self.keypair.write() {
            *guard = Some(CachedKeypair { private, public });
        }
    }

    /// 校验本地文件与镜像中的密钥是否一致，不一致则以镜像为准覆盖本地。
    fn sync_with_mirror(&self) -> Result<()> {
        let Some(mirror) = &self.mirror else {
            return Ok(());
        };

        let db_private = mirror.fetch(MIRROR_PRIVATE_KEY)?;
        let db_public = mirror.fetch(MIRROR_PUBLIC_KEY)?;

        let (Some(db_private), Some(db_public)) = (db_private, db_public) else {
            return Ok(());
        };

        let private_path = self.key_path(PRIVATE_KEY_FILE);
        let public_path = self.key_path(PUBLIC_KEY_FILE);

        if !private_path.exists() || !public_path.exists() {
            self.write_protected(&private_path, db_private.value.as_bytes())?;
            self.write_protected(&public_path, db_public.value.as_bytes())?;
            info!("从数据库镜像同步密钥到本地文件");
            return Ok(());
        }

        let local_private = fs::read(&private_path)?;
        let local_public = fs::read(&public_path)?;

        if local_private != db_private.value.as_bytes() || local_public != db_public.value.as_bytes()
        {
            self.write_protected(&private_path, db_private.value.as_bytes())?;
            self.write_protected(&public_path, db_public.value.as_bytes())?;
            info!("检测到密钥不一致，已从数据库镜像更新本地密钥");
        }

        Ok(())
    }

    /// 检查镜像中密钥的 `fixed_time` 是否超过有效期。
    fn mirror_expired(&self) -> Result<bool> {
        let Some(mirror) = &self.mirror else {
            return Ok(false);
        };
        let Some(entry) = mirror.fetch(MIRROR_PRIVATE_KEY)? else {
            return Ok(false);
        };
        let Some(fixed_time) = entry.fixed_time else {
            return Ok(false);
        };
        Ok(Utc::now() - fixed_time > Duration::days(self.config.rsa_validity_days))
    }

    fn load_local_keypair(&self) -> Result<Option<(RsaPrivateKey, RsaPublicKey)>> {
        let private_path = self.key_path(PRIVATE_KEY_FILE);
        let public_path = self.key_path(PUBLIC_KEY_FILE);

        if !private_path.exists() || !public_path.exists() {
            return Ok(None);
        }

        // 本地文件损坏不做降级处理：带未经校验的密钥运行不可接受
        let private_pem = fs::read_to_string(&private_path)?;
        let public_pem = fs::read_to_string(&public_path)?;

        let private = RsaPrivateKey::from_pkcs8_pem(&private_pem)
            .map_err(|e| Error::KeyGeneration(format!("解析本地RSA私钥失败: {}", e)))?;
        let public = RsaPublicKey::from_public_key_pem(&public_pem)
            .map_err(|e| Error::KeyGeneration(format!("解析本地RSA公钥失败: {}", e)))?;

        Ok(Some((private, public)))
    }

    fn generate_and_persist(&self) -> Result<(RsaPrivateKey, RsaPublicKey)> {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, self.config.rsa_key_bits).map_err(|e| {
            let err = Error::KeyGeneration(format!("生成RSA密钥失败: {}", e));
            error!("{}", err);
            err
        })?;
        let public = RsaPublicKey::from(&private);

        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::KeyGeneration(format!("导出RSA私钥PEM失败: {}", e)))?;
        let public_pem = public
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| Error::KeyGeneration(format!("导出RSA公钥PEM失败: {}", e)))?;

        self.write_protected(&self.key_path(PRIVATE_KEY_FILE), private_pem.as_bytes())?;
        self.write_protected(&self.key_path(PUBLIC_KEY_FILE), public_pem.as_bytes())?;

        if let Some(mirror) = &self.mirror {
            let now = Utc::now();
            mirror.upsert(MIRROR_PRIVATE_KEY, &private_pem, now)?;
            mirror.upsert(MIRROR_PUBLIC_KEY, &public_pem, now)?;
        }

        info!(bits = self.config.rsa_key_bits, "已生成并持久化新的RSA密钥对");
        self.cache_keypair(private.clone(), public.clone());
        Ok((private, public))
    }

    // --- 对称密钥 ---

    /// 获取对称密钥，过期或损坏时自动重新生成。
    ///
    /// 同一有效期窗口内的重复调用返回相同的密钥。
    pub fn secret(&self, kind: SecretKind) -> Result<ZeroizingVec> {
        if self.is_secret_expired(kind) {
            info!("{}已过期或不存在，正在重新生成", kind.label());
            return self.generate_secret(kind);
        }

        let path = self.key_path(kind.key_file());
        if path.exists() {
            match self.load_secret(kind, &path) {
                Ok(secret) => return Ok(secret),
                Err(e) => {
                    warn!("读取现有{}失败: {}，重新生成", kind.label(), e);
                }
            }
        }

        self.generate_secret(kind)
    }

    /// 强制重新生成对称密钥，忽略有效期。
    pub fn force_regenerate(&self, kind: SecretKind) -> Result<ZeroizingVec> {
        info!("强制重新生成{}", kind.label());
        self.generate_secret(kind)
    }

    /// 强制重新生成全部对称密钥。
    pub fn force_regenerate_all(&self) -> Result<AllSecretsValidity> {
        self.force_regenerate(SecretKind::ApiSecret)?;
        self.force_regenerate(SecretKind::JwtSecret)?;
        Ok(self.all_validity_info())
    }

    /// 只读的有效期信息，用于监控。
    pub fn validity_info(&self, kind: SecretKind) -> SecretValidity {
        let exists = self.key_path(kind.key_file()).exists();
        let validity_days = self.validity_days(kind);
        let created_at = self.secret_created_at(kind);
        let age_days = created_at.map(|created| (Utc::now() - created).num_days());

        SecretValidity {
            exists,
            expired: self.is_secret_expired(kind),
            validity_days,
            created_at: created_at.map(|dt| dt.to_rfc3339()),
            age_days,
            expires_in_days: age_days.map(|age| (validity_days - age).max(0)),
        }
    }

    /// 全部对称密钥的有效期信息。
    pub fn all_validity_info(&self) -> AllSecretsValidity {
        AllSecretsValidity {
            api_secret: self.validity_info(SecretKind::ApiSecret),
            jwt_secret: self.validity_info(SecretKind::JwtSecret),
        }
    }

    fn validity_days(&self, kind: SecretKind) -> i64 {
        match kind {
            SecretKind::ApiSecret => self.config.api_secret_validity_days,
            SecretKind::JwtSecret => self.config.jwt_secret_validity_days,
        }
    }

    fn secret_created_at(&self, kind: SecretKind) -> Option<DateTime<Utc>> {
        let path = self.key_path(kind.timestamp_file());
        let content = fs::read_to_string(path).ok()?;
        DateTime::parse_from_rfc3339(content.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn is_secret_expired(&self, kind: SecretKind) -> bool {
        let Some(created) = self.secret_created_at(kind) else {
            // 时间戳缺失或无法解析都按过期处理，触发重新生成
            return true;
        };
        (Utc::now() - created).num_days() >= self.validity_days(kind)
    }

    fn load_secret(&self, kind: SecretKind, path: &Path) -> Result<ZeroizingVec> {
        match kind {
            SecretKind::ApiSecret => {
                let bytes = fs::read(path)?;
                if bytes.len() < API_SECRET_MIN_BYTES {
                    return Err(Error::Format(format!(
                        "API密钥长度不足: {} < {}",
                        bytes.len(),
                        API_SECRET_MIN_BYTES
                    )));
                }
                Ok(ZeroizingVec(bytes))
            }
            SecretKind::JwtSecret => {
                let content = fs::read_to_string(path)?;
                let trimmed = content.trim();
                if trimmed.len() < JWT_SECRET_MIN_CHARS {
                    return Err(Error::Format(format!(
                        "JWT密钥长度不足: {} < {}",
                        trimmed.len(),
                        JWT_SECRET_MIN_CHARS
                    )));
                }
                Ok(ZeroizingVec(trimmed.as_bytes().to_vec()))
            }
        }
    }

    fn generate_secret(&self, kind: SecretKind) -> Result<ZeroizingVec> {
        let secret = match kind {
            SecretKind::ApiSecret => {
                let mut bytes = vec![0u8; 32];
                OsRng.fill_bytes(&mut bytes);
                ZeroizingVec(bytes)
            }
            SecretKind::JwtSecret => {
                let mut seed = [0u8; 64];
                OsRng.fill_bytes(&mut seed);
                ZeroizingVec(encode_urlsafe(&seed).into_bytes())
            }
        };

        self.write_protected(&self.key_path(kind.key_file()), &secret)
            .map_err(|e| {
                let err = Error::KeyGeneration(format!("写入{}失败: {}", kind.label(), e));
                error!("{}", err);
                err
            })?;
        self.write_protected(
            &self.key_path(kind.timestamp_file()),
            Utc::now().to_rfc3339().as_bytes(),
        )?;

        info!("已生成并保存新的{}", kind.label());
        Ok(secret)
    }

    // --- 文件辅助 ---

    fn key_path(&self, file: &str) -> PathBuf {
        self.config.key_dir.join(file)
    }

    fn write_protected(&self, path: &Path, content: &[u8]) -> Result<()> {
        fs::write(path, content)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(self.config.file_permissions))?;
        }
        Ok(())
    }
}
