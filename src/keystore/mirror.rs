//! 密钥镜像：跨实例一致性的系统记录源。
//!
//! 多实例部署时各进程的本地 PEM 文件可能分叉，`global_options` 表
//! 作为仲裁者：镜像中的内容总是覆盖本地文件。写入在显式事务中完成，
//! 出错时回滚。

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};

/// 镜像中的一条密钥记录。
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEntry {
    /// 密钥内容（PEM 或密钥字符串）
    pub value: String,
    /// 最近一次写入时间，轮换检查的依据
    pub fixed_time: Option<DateTime<Utc>>,
}

/// 密钥镜像接口。
///
/// 实现方保证 `upsert` 的原子性：同名记录要么整体替换，要么保持原值。
pub trait KeyMirror: Send + Sync {
    /// 按名称读取记录。
    fn fetch(&self, name: &str) -> Result<Option<MirrorEntry>>;

    /// 插入或整体替换记录。
    fn upsert(&self, name: &str, value: &str, fixed_time: DateTime<Utc>) -> Result<()>;
}

/// 基于 SQLite 的镜像实现，表结构与部署共享的 `global_options` 一致。
#[cfg(feature = "sqlite-mirror")]
pub use sqlite::SqliteMirror;

#[cfg(feature = "sqlite-mirror")]
mod sqlite {
    use super::*;
    use rusqlite::{params, Connection, OptionalExtension};
    use std::path::Path;
    use std::sync::Mutex;
    use uuid::Uuid;

    pub struct SqliteMirror {
        conn: Mutex<Connection>,
    }

    impl SqliteMirror {
        /// 打开（必要时建表）镜像数据库。
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
            let conn = Connection::open(path.as_ref())
                .map_err(|e| Error::Mirror(format!("打开镜像数据库失败: {}", e)))?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS global_options (
                     id TEXT PRIMARY KEY,
                     varb TEXT UNIQUE NOT NULL,
                     options TEXT,
                     reserve TEXT,
                     reserve1 TEXT,
                     fixed_time TEXT
                 )",
                [],
            )
            .map_err(|e| Error::Mirror(format!("初始化 global_options 表失败: {}", e)))?;
            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        /// 内存数据库，测试用。
        pub fn open_in_memory() -> Result<Self> {
            Self::open(":memory:")
        }
    }

    impl KeyMirror for SqliteMirror {
        fn fetch(&self, name: &str) -> Result<Option<MirrorEntry>> {
            let conn = self
                .conn
                .lock()
                .map_err(|_| Error::Mirror("镜像连接锁已中毒".to_string()))?;
            let row: Option<(String, Option<String>)> = conn
                .query_row(
                    "SELECT options, fixed_time FROM global_options WHERE varb = ?1",
                    params![name],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(|e| Error::Mirror(format!("查询 {} 失败: {}", name, e)))?;

            Ok(row.map(|(value, fixed_time)| MirrorEntry {
                value,
                fixed_time: fixed_time
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
            }))
        }

        fn upsert(&self, name: &str, value: &str, fixed_time: DateTime<Utc>) -> Result<()> {
            let mut conn = self
                .conn
                .lock()
                .map_err(|_| Error::Mirror("镜像连接锁已中毒".to_string()))?;
            // 显式事务：出错时整体回滚
            let tx = conn
                .transaction()
                .map_err(|e| Error::Mirror(format!("开启事务失败: {}", e)))?;

            let updated = tx
                .execute(
                    "UPDATE global_options SET options = ?1, fixed_time = ?2 WHERE varb = ?3",
                    params![value, fixed_time.to_rfc3339(), name],
                )
                .map_err(|e| Error::Mirror(format!("更新 {} 失败: {}", name, e)))?;

            if updated == 0 {
                tx.execute(
                    "INSERT INTO global_options (id, varb, options, fixed_time)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        Uuid::new_v4().to_string(),
                        name,
                        value,
                        fixed_time.to_rfc3339()
                    ],
                )
                .map_err(|e| Error::Mirror(format!("插入 {} 失败: {}", name, e)))?;
            }

            tx.commit()
                .map_err(|e| Error::Mirror(format!("提交事务失败: {}", e)))
        }
    }
}

/// 纯内存镜像，供测试与单实例部署使用。
#[derive(Debug, Default)]
pub struct MemoryMirror {
    rows: std::sync::Mutex<std::collections::HashMap<String, MirrorEntry>>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Default::default()
    }
}

impl KeyMirror for MemoryMirror {
    fn fetch(&self, name: &str) -> Result<Option<MirrorEntry>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| Error::Mirror("内存镜像锁已中毒".to_string()))?;
        Ok(rows.get(name).cloned())
    }

    fn upsert(&self, name: &str, value: &str, fixed_time: DateTime<Utc>) -> Result<()> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| Error::Mirror("内存镜像锁已中毒".to_string()))?;
        rows.insert(
            name.to_string(),
            MirrorEntry {
                value: value.to_string(),
                fixed_time: Some(fixed_time),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(mirror: &dyn KeyMirror) {
        assert!(mirror.fetch("private_key").unwrap().is_none());

        let now = Utc::now();
        mirror.upsert("private_key", "PEM-1", now).unwrap();
        let entry = mirror.fetch("private_key").unwrap().unwrap();
        assert_eq!(entry.value, "PEM-1");
        assert!(entry.fixed_time.is_some());

        // upsert 覆盖旧值
        mirror.upsert("private_key", "PEM-2", now).unwrap();
        let entry = mirror.fetch("private_key").unwrap().unwrap();
        assert_eq!(entry.value, "PEM-2");
    }

    #[test]
    fn test_memory_mirror_roundtrip() {
        roundtrip(&MemoryMirror::new());
    }

    #[cfg(feature = "sqlite-mirror")]
    #[test]
    fn test_sqlite_mirror_roundtrip() {
        roundtrip(&SqliteMirror::open_in_memory().unwrap());
    }

    #[cfg(feature = "sqlite-mirror")]
    #[test]
    fn test_sqlite_mirror_fixed_time_roundtrip() {
        let mirror = SqliteMirror::open_in_memory().unwrap();
        let stamp = Utc::now();
        mirror.upsert("public_key", "PEM", stamp).unwrap();

        let entry = mirror.fetch("public_key").unwrap().unwrap();
        let loaded = entry.fixed_time.unwrap();
        // RFC3339 往返精度到秒以内
        assert!((loaded - stamp).num_seconds().abs() <= 1);
    }
}
