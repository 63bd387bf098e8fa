//! clfs_journal_core: 共享盘集群文件系统的日志事务层
//!
//! 这是一个纯 Rust 实现的 WAL 事务/日志缓冲区追踪核心，提供：
//! - **先预留后修改**的日志空间记账
//! - **集群锁下的原子提交**（事务共享持锁，刷写独占）
//! - **严格的记账不变量**，违规快速失败并撤回挂载
//!
//! 物理日志写入、盘上记录编码、分布式锁协议与缓冲区缓存实现都是
//! 外部协作者，以 trait 形式注入。
//!
//! # 示例
//!
//! ```rust,ignore
//! use clfs_journal_core::journal::{Mount, MountConfig, NullCommitter, Trans};
//! use clfs_journal_core::lock::LocalLockManager;
//! use std::sync::Arc;
//!
//! let mount = Mount::new(
//!     MountConfig::default(),
//!     Arc::new(LocalLockManager::new()),
//!     Box::new(NullCommitter),
//! );
//!
//! let mut tr = Trans::begin(&mount, 2, 0)?;
//! tr.add_meta(&inode_lock, &buf)?;
//! tr.end()?;
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`consts`] - 常量定义
//! - [`cache`] - 块缓存
//! - [`lock`] - 集群锁接口
//! - [`journal`] - 日志事务核心

#![forbid(unsafe_code)]
#![warn(missing_docs)]

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 常量定义
pub mod consts;

/// 块缓存
pub mod cache;

/// 集群锁接口
pub mod lock;

/// 日志事务核心
pub mod journal;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块缓存
pub use cache::{BlockCache, BufGuard, CacheBuffer, CacheFlags, CacheStats, DEFAULT_CACHE_SIZE};

// 集群锁
pub use lock::{ClusterLock, LocalLockManager, LockFlags, LockManager, LockMode};

// 日志事务
pub use journal::{
    BufDesc, BufRole, LogCommitter, LogSpace, Mount, MountConfig, MountFlags, NullCommitter,
    RevokeLedger, RevokeRecord, SetMember, Trans, TransFlags,
};
