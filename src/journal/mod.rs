//! 日志事务核心
//!
//! 共享盘集群文件系统 WAL 的事务与日志缓冲区追踪层。每一次结构性
//! 修改都满足三条保证：
//!
//! 1. 动手之前先预留日志空间（[`space`]）；
//! 2. 精确追踪回放所需的脏元数据/数据块与被 revoke 的块
//!    （[`bufdesc`]、[`revoke`]）；
//! 3. 提交相对于集群级排序锁原子（[`trans`]、[`commit`]），
//!    崩溃不可能留下不一致的盘上结构。
//!
//! # 核心组件
//!
//! - [`Mount`] - 挂载级日志状态与 withdraw 转变
//! - [`LogSpace`] - 日志空间预留计数器
//! - [`BufDesc`] - 缓冲区描述符（缓存块 × 集群锁 × 日志角色）
//! - [`RevokeLedger`] - 待写 revoke 台账
//! - [`Trans`] - 事务对象与缓冲区/revoke 注册
//! - [`LogCommitter`] - 外部日志提交方接口
//!
//! # 使用示例
//!
//! ```rust,ignore
//! let mount = Mount::new(MountConfig::default(), lock_mgr, committer);
//!
//! let mut tr = Trans::begin(&mount, blocks, revokes)?;
//! tr.add_meta(&resource_lock, &buf)?;
//! tr.end()?;
//! ```

pub mod bufdesc;
pub mod commit;
pub mod mount;
pub mod revoke;
pub mod space;
pub mod trans;

pub use bufdesc::{BufDesc, BufRole, SetMember};
pub use commit::{LogCommitter, NullCommitter};
pub use mount::{Mount, MountConfig, MountFlags};
pub use revoke::{RevokeLedger, RevokeRecord};
pub use space::LogSpace;
pub use trans::{Trans, TransFlags};
