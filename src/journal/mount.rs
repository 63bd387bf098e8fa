//! 挂载级日志状态
//!
//! 每个挂载持有：日志空间计数器、描述符表与 revoke 台账（记账锁
//! 保护）、集群事务锁、写保护计数器，以及挂载标志位。检测到元数据
//! 损坏或记账失衡时，挂载整体撤回（withdraw）为只读——这是影响所有
//! 在途事务的全局转变，区别于单个调用的局部错误。

use crate::cache::CacheBuffer;
use crate::consts::{LOG_DESC_OVERHEAD_BLOCKS, LOG_HDR_BLOCKS, REVOKE_REC_BYTES};
use crate::error::{Error, ErrorKind, Result};
use crate::journal::bufdesc::{BufDesc, BufRole};
use crate::journal::commit::LogCommitter;
use crate::journal::revoke::RevokeLedger;
use crate::journal::space::LogSpace;
use crate::lock::{ClusterLock, LockManager, LockMode};
use bitflags::bitflags;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

bitflags! {
    /// 挂载标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MountFlags: u32 {
        /// 日志已激活，允许开启事务
        const JOURNAL_LIVE = 0x01;
        /// 挂载已撤回为只读
        const WITHDRAWN    = 0x02;
        /// 每个事务结束时立即刷日志
        const SYNCHRONOUS  = 0x04;
    }
}

/// 挂载配置
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// 文件系统名（日志输出前缀）
    pub fsname: String,
    /// 本节点的 journal id，注册元数据块时盖入块头
    pub jid: u32,
    /// 块大小（字节）
    pub block_size: u32,
    /// 日志总容量（块）
    pub journal_blocks: u64,
    /// 同步挂载：每个事务结束立即刷日志
    pub synchronous: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            fsname: String::from("clfs0"),
            jid: 0,
            block_size: crate::consts::DEFAULT_BLOCK_SIZE,
            journal_blocks: 8192,
            synchronous: false,
        }
    }
}

/// 记账锁保护的挂载级日志状态
pub(crate) struct LogState {
    /// 描述符表：按块号索引，替代缓存块上的无类型扩展槽
    pub(crate) descs: HashMap<u64, Arc<BufDesc>>,
    /// 待写 revoke 集
    pub(crate) revokes: RevokeLedger,
}

impl LogState {
    /// 查找或惰性创建缓冲区的描述符
    ///
    /// 已有描述符必须绑定在同一把集群锁上，否则返回 `None`
    /// （调用方契约违规，由调用方升级处理）。
    pub(crate) fn find_or_create(
        &mut self,
        buf: &Arc<CacheBuffer>,
        gl: &Arc<ClusterLock>,
        role: BufRole,
    ) -> Option<Arc<BufDesc>> {
        match self.descs.get(&buf.lba()) {
            Some(d) => {
                if !Arc::ptr_eq(d.lock(), gl) {
                    return None;
                }
                Some(d.clone())
            }
            None => {
                let d = Arc::new(BufDesc::new(buf.clone(), gl.clone(), role));
                self.descs.insert(buf.lba(), d.clone());
                Some(d)
            }
        }
    }
}

/// 挂载实例
pub struct Mount {
    fsname: String,
    jid: u32,
    block_size: u32,
    flags: AtomicU32,
    space: LogSpace,
    log: Mutex<LogState>,
    trans_lock: Arc<ClusterLock>,
    lock_mgr: Arc<dyn LockManager>,
    committer: Box<dyn LogCommitter>,
    intwrite: AtomicU32,
}

impl Mount {
    /// 创建挂载实例
    ///
    /// 日志初始为激活状态；`lock_mgr` 是集群锁提供者，`committer`
    /// 是外部日志提交方。
    pub fn new(
        config: MountConfig,
        lock_mgr: Arc<dyn LockManager>,
        committer: Box<dyn LogCommitter>,
    ) -> Arc<Self> {
        let mut flags = MountFlags::JOURNAL_LIVE;
        if config.synchronous {
            flags |= MountFlags::SYNCHRONOUS;
        }
        Arc::new(Self {
            fsname: config.fsname,
            jid: config.jid,
            block_size: config.block_size,
            flags: AtomicU32::new(flags.bits()),
            space: LogSpace::new(config.journal_blocks),
            log: Mutex::new(LogState {
                descs: HashMap::new(),
                revokes: RevokeLedger::new(),
            }),
            trans_lock: Arc::new(ClusterLock::new(0)),
            lock_mgr,
            committer,
            intwrite: AtomicU32::new(0),
        })
    }

    /// 文件系统名
    pub fn fsname(&self) -> &str {
        &self.fsname
    }

    /// 本节点 journal id
    pub fn jid(&self) -> u32 {
        self.jid
    }

    /// 块大小（字节）
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// 检查挂载标志
    pub fn test_flags(&self, flags: MountFlags) -> bool {
        MountFlags::from_bits_truncate(self.flags.load(Ordering::Acquire)).contains(flags)
    }

    fn set_flags(&self, flags: MountFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    fn clear_flags(&self, flags: MountFlags) {
        self.flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// 日志是否激活
    pub fn journal_live(&self) -> bool {
        self.test_flags(MountFlags::JOURNAL_LIVE)
    }

    /// 设置日志激活状态（挂载/卸载路径使用）
    pub fn set_journal_live(&self, live: bool) {
        if live {
            self.set_flags(MountFlags::JOURNAL_LIVE);
        } else {
            self.clear_flags(MountFlags::JOURNAL_LIVE);
        }
    }

    /// 挂载是否已撤回
    pub fn withdrawn(&self) -> bool {
        self.test_flags(MountFlags::WITHDRAWN)
    }

    /// 撤回挂载
    ///
    /// 设置 WITHDRAWN、熄灭日志、唤醒所有阻塞在空间预留上的等待者。
    /// 幂等：重复撤回只生效一次。
    pub fn withdraw(&self, reason: &str) {
        if self.test_flags(MountFlags::WITHDRAWN) {
            return;
        }
        log::error!("{}: withdrawing from cluster: {}", self.fsname, reason);
        self.set_flags(MountFlags::WITHDRAWN);
        self.clear_flags(MountFlags::JOURNAL_LIVE);
        self.space.shutdown();
    }

    /// 断言 `cond` 成立，否则撤回挂载
    ///
    /// 返回断言是否失败，便于调用方在失败后补充诊断输出。
    pub fn assert_withdraw(&self, cond: bool, what: &'static str) -> bool {
        if cond {
            return false;
        }
        log::error!("{}: assertion failed: {}", self.fsname, what);
        self.withdraw(what);
        true
    }

    /// 按声明的缓冲区/revoke 数计算预留块数
    ///
    /// 预留 = 1 个日志头 + 声明了缓冲区时的 6 块描述符开销加每块一条
    /// 记录 + revoke 记录按每条 8 字节折算的块数（向上取整）。
    pub fn reserved_blocks(&self, blocks: u32, revokes: u32) -> u64 {
        let mut reserved = LOG_HDR_BLOCKS;
        if blocks > 0 {
            reserved += LOG_DESC_OVERHEAD_BLOCKS + u64::from(blocks);
        }
        if revokes > 0 {
            let bytes = u64::from(revokes) * REVOKE_REC_BYTES;
            reserved += bytes.div_ceil(u64::from(self.block_size));
        }
        reserved
    }

    /// 预留日志空间，可能阻塞
    pub fn log_reserve(&self, blocks: u64) -> Result<()> {
        self.space.reserve(blocks)
    }

    /// 归还日志空间
    ///
    /// 归还后空闲量超出容量说明记账失衡，撤回挂载。
    pub fn log_release(&self, blocks: u64) {
        let overflow = self.space.release(blocks);
        self.assert_withdraw(!overflow, "log space released past journal capacity");
    }

    /// 当前空闲日志块数
    pub fn free_log_blocks(&self) -> u64 {
        self.space.free()
    }

    /// 日志总容量（块）
    pub fn log_capacity(&self) -> u64 {
        self.space.capacity()
    }

    /// 进入受写保护的区段（事务 begin 时调用）
    pub fn begin_write(&self) {
        self.intwrite.fetch_add(1, Ordering::AcqRel);
    }

    /// 离开受写保护的区段（事务 end 时调用）
    pub fn end_write(&self) {
        self.intwrite.fetch_sub(1, Ordering::AcqRel);
    }

    /// 当前持有写保护的事务数
    pub fn writer_count(&self) -> u32 {
        self.intwrite.load(Ordering::Acquire)
    }

    /// 集群事务锁
    pub fn trans_lock(&self) -> &Arc<ClusterLock> {
        &self.trans_lock
    }

    /// 集群锁提供者
    pub fn lock_manager(&self) -> &Arc<dyn LockManager> {
        &self.lock_mgr
    }

    /// 以指定模式获取集群事务锁
    ///
    /// 事务路径只用共享模式；独占模式留给外部刷写路径。
    pub fn acquire_trans_lock(&self, mode: LockMode) -> Result<()> {
        self.lock_mgr.acquire(&self.trans_lock, mode)
    }

    /// 释放以指定模式持有的集群事务锁
    pub fn release_trans_lock(&self, mode: LockMode) {
        self.lock_mgr.release(&self.trans_lock, mode);
    }

    pub(crate) fn committer(&self) -> &dyn LogCommitter {
        self.committer.as_ref()
    }

    /// 获取记账锁
    ///
    /// 保护描述符表与 revoke 台账的短锁，只跨成员关系更新持有，
    /// 绝不跨 I/O。
    pub(crate) fn log_lock(&self) -> MutexGuard<'_, LogState> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 查找块号对应的描述符
    pub fn descriptor(&self, blkno: u64) -> Option<Arc<BufDesc>> {
        self.log_lock().descs.get(&blkno).cloned()
    }

    /// 查找或创建缓冲区的描述符（块释放路径在 revoke 前使用）
    ///
    /// 已有描述符绑定在别的集群锁上属调用方契约违规：撤回挂载并
    /// 返回 `FatalInconsistency`。
    pub fn descriptor_for(
        &self,
        gl: &Arc<ClusterLock>,
        buf: &Arc<CacheBuffer>,
        role: BufRole,
    ) -> Result<Arc<BufDesc>> {
        match self.log_lock().find_or_create(buf, gl, role) {
            Some(d) => Ok(d),
            None => {
                log::error!(
                    "{}: descriptor for block {:#x} bound to a different cluster lock",
                    self.fsname,
                    buf.lba()
                );
                self.withdraw("buffer descriptor bound to a different cluster lock");
                Err(Error::new(
                    ErrorKind::FatalInconsistency,
                    "buffer descriptor bound to a different cluster lock",
                ))
            }
        }
    }

    /// 移除块号对应的描述符
    ///
    /// 提交方在日志记录持久化、缓冲区解除 pin 之后调用。
    pub fn remove_descriptor(&self, blkno: u64) -> Option<Arc<BufDesc>> {
        self.log_lock().descs.remove(&blkno)
    }

    /// 当前待写 revoke 记录数
    pub fn pending_revokes(&self) -> usize {
        self.log_lock().revokes.pending()
    }
}

impl core::fmt::Debug for Mount {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Mount")
            .field("fsname", &self.fsname)
            .field("jid", &self.jid)
            .field(
                "flags",
                &MountFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed)),
            )
            .field("free_log_blocks", &self.free_log_blocks())
            .field("writers", &self.writer_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::commit::NullCommitter;
    use crate::lock::LocalLockManager;

    fn test_mount() -> Arc<Mount> {
        Mount::new(
            MountConfig {
                journal_blocks: 128,
                ..MountConfig::default()
            },
            Arc::new(LocalLockManager::new()),
            Box::new(NullCommitter),
        )
    }

    #[test]
    fn test_initial_state() {
        let mount = test_mount();
        assert!(mount.journal_live());
        assert!(!mount.withdrawn());
        assert_eq!(mount.free_log_blocks(), 128);
        assert_eq!(mount.writer_count(), 0);
        assert_eq!(mount.pending_revokes(), 0);
    }

    #[test]
    fn test_withdraw_is_terminal() {
        let mount = test_mount();

        mount.withdraw("test corruption");
        assert!(mount.withdrawn());
        assert!(!mount.journal_live());

        // 撤回后预留立即失败
        assert!(mount.log_reserve(1).is_err());
    }

    #[test]
    fn test_assert_withdraw() {
        let mount = test_mount();

        assert!(!mount.assert_withdraw(true, "fine"));
        assert!(!mount.withdrawn());

        assert!(mount.assert_withdraw(false, "broken accounting"));
        assert!(mount.withdrawn());
    }

    #[test]
    fn test_reserved_blocks_formula() {
        let mount = test_mount();
        let bs = u64::from(mount.block_size());

        // 只有缓冲区：1 + 6 + blocks
        assert_eq!(mount.reserved_blocks(10, 0), 17);
        // 只有 revoke：1 + ceil(revokes*8/block_size)
        assert_eq!(mount.reserved_blocks(0, 5), 1 + (5 * 8 + bs - 1) / bs);
        // 两者都有
        assert_eq!(
            mount.reserved_blocks(3, 700),
            1 + 6 + 3 + (700 * 8 + bs - 1) / bs
        );
    }

    #[test]
    fn test_release_overflow_withdraws() {
        let mount = test_mount();
        mount.log_release(1);
        assert!(mount.withdrawn());
    }

    #[test]
    fn test_write_protection_counter() {
        let mount = test_mount();
        mount.begin_write();
        mount.begin_write();
        assert_eq!(mount.writer_count(), 2);
        mount.end_write();
        mount.end_write();
        assert_eq!(mount.writer_count(), 0);
    }
}
