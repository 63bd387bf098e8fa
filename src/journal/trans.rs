//! 事务对象与缓冲区注册
//!
//! 事务把一组有上界的缓冲区/revoke 操作捆绑在一份日志空间预留和
//! 一把共享持有的集群事务锁之下。净新增缓冲区数不得超过声明的
//! `blocks`，执行的 revoke 数不得超过声明的 `revokes`——超出是调用方
//! bug，在 end 时升级为挂载级 withdraw，绝不静默修正。
//!
//! 每个执行上下文（线程）同一时刻至多一个活动事务：事务句柄显式
//! 穿过调用链，线程本地的占用标记挡住重复 begin。

use crate::cache::CacheBuffer;
use crate::consts::{META_HDR_JID_OFF, META_HDR_MAGIC_OFF, META_HDR_PAD_OFF, META_HDR_SIZE, META_MAGIC};
use crate::error::{Error, ErrorKind, Result};
use crate::journal::bufdesc::{BufDesc, BufRole, SetMember};
use crate::journal::mount::Mount;
use crate::lock::{ClusterLock, LockFlags, LockMode};
use bitflags::bitflags;
use byteorder::{BigEndian, ByteOrder};
use core::marker::PhantomData;
use core::panic::Location;
use std::cell::Cell;
use std::sync::Arc;

bitflags! {
    /// 事务标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TransFlags: u32 {
        /// 事务注册过缓冲区或 revoke，end 时走提交路径
        const TOUCHED  = 0x01;
        /// 提交方保留了事务状态，延迟到持久化后释放
        const ATTACHED = 0x02;
    }
}

thread_local! {
    static CONTEXT_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

pub(crate) fn clear_context() {
    CONTEXT_ACTIVE.set(false);
}

/// 事务
///
/// 由 [`Trans::begin`] 创建，必须在同一上下文中以
/// [`Trans::end`](crate::journal::commit) 结束。句柄被刻意标记为
/// 非 `Send`：事务不跨线程移动。
pub struct Trans {
    pub(crate) mount: Arc<Mount>,
    pub(crate) origin: &'static Location<'static>,
    pub(crate) blocks: u32,
    pub(crate) revokes: u32,
    pub(crate) reserved: u64,
    pub(crate) flags: TransFlags,
    pub(crate) num_buf_new: u32,
    pub(crate) num_buf_rm: u32,
    pub(crate) num_databuf_new: u32,
    pub(crate) num_databuf_rm: u32,
    pub(crate) num_revoke: u32,
    pub(crate) num_revoke_rm: u32,
    pub(crate) meta_bufs: Vec<Arc<BufDesc>>,
    pub(crate) data_bufs: Vec<Arc<BufDesc>>,
    pub(crate) lock_held: bool,
    pub(crate) ended: bool,
    _ctx: PhantomData<*mut ()>,
}

impl Trans {
    /// 开启事务
    ///
    /// `blocks`/`revokes` 是调用方声明的操作上界，预留块数由此一次性
    /// 算出并从日志空间扣除（可能阻塞）。成功后：写保护 +1，共享持有
    /// 集群事务锁，当前线程被标记为已绑定。任一步失败都完整回退已产生
    /// 的副作用。
    ///
    /// 失败：日志未激活返回 `ReadOnly`；挂载撤回返回 `Shutdown`；
    /// 零尺寸事务或重复 begin 属调用方契约违规，返回
    /// `FatalInconsistency` 并撤回挂载。
    #[track_caller]
    pub fn begin(mount: &Arc<Mount>, blocks: u32, revokes: u32) -> Result<Trans> {
        let origin = Location::caller();

        if blocks == 0 && revokes == 0 {
            return Err(contract_violation(
                mount,
                "transaction declares no blocks and no revokes",
            ));
        }
        if CONTEXT_ACTIVE.get() {
            return Err(contract_violation(
                mount,
                "context already owns an active transaction",
            ));
        }
        if !mount.journal_live() {
            return Err(Error::new(ErrorKind::ReadOnly, "journal is not live"));
        }

        let reserved = mount.reserved_blocks(blocks, revokes);

        mount.begin_write();
        if let Err(e) = mount.acquire_trans_lock(LockMode::Shared) {
            mount.end_write();
            return Err(e);
        }
        if let Err(e) = mount.log_reserve(reserved) {
            mount.release_trans_lock(LockMode::Shared);
            mount.end_write();
            return Err(e);
        }

        CONTEXT_ACTIVE.set(true);
        log::trace!(
            "{}: trans begin at {}: blocks={} revokes={} reserved={}",
            mount.fsname(),
            origin,
            blocks,
            revokes,
            reserved
        );

        Ok(Trans {
            mount: mount.clone(),
            origin,
            blocks,
            revokes,
            reserved,
            flags: TransFlags::empty(),
            num_buf_new: 0,
            num_buf_rm: 0,
            num_databuf_new: 0,
            num_databuf_rm: 0,
            num_revoke: 0,
            num_revoke_rm: 0,
            meta_bufs: Vec::new(),
            data_bufs: Vec::new(),
            lock_held: true,
            ended: false,
            _ctx: PhantomData,
        })
    }

    /// 注册元数据缓冲区
    ///
    /// 幂等：同一缓冲区重复注册只重复标记 Touched。首次入集时校验
    /// 块头 magic（注册未初始化的块是调用方 bug），pin 住缓冲区，
    /// 并把日志所有者盖入块头。
    pub fn add_meta(&mut self, lock: &Arc<ClusterLock>, buf: &Arc<CacheBuffer>) -> Result<()> {
        self.register(lock, buf, BufRole::Meta)
    }

    /// 注册数据缓冲区（journaled data 模式）
    pub fn add_data(&mut self, lock: &Arc<ClusterLock>, buf: &Arc<CacheBuffer>) -> Result<()> {
        self.register(lock, buf, BufRole::Data)
    }

    fn register(
        &mut self,
        gl: &Arc<ClusterLock>,
        buf: &Arc<CacheBuffer>,
        role: BufRole,
    ) -> Result<()> {
        let mount = self.mount.clone();
        // 锁序：缓冲区内容锁 → 记账锁
        let mut bh = buf.lock();

        if bh.pinned() {
            // 已被日志记账，只需标记本事务动过手
            self.flags.insert(TransFlags::TOUCHED);
            return Ok(());
        }

        let mut log = mount.log_lock();
        let desc = match log.find_or_create(buf, gl, role) {
            Some(d) => d,
            None => {
                drop(log);
                drop(bh);
                return Err(contract_violation(
                    &mount,
                    "buffer descriptor bound to a different cluster lock",
                ));
            }
        };

        self.flags.insert(TransFlags::TOUCHED);
        if desc.member() != SetMember::None {
            // 已是某个集合的成员
            return Ok(());
        }

        gl.set_flags(LockFlags::NEEDS_FLUSH | LockFlags::DIRTY);

        match role {
            BufRole::Meta => {
                let ok = bh.data().len() >= META_HDR_SIZE
                    && BigEndian::read_u32(&bh.data()[META_HDR_MAGIC_OFF..META_HDR_MAGIC_OFF + 4])
                        == META_MAGIC;
                if !ok {
                    log::error!(
                        "{}: attempting to journal uninitialised block {:#x}",
                        mount.fsname(),
                        buf.lba()
                    );
                    drop(log);
                    drop(bh);
                    return Err(contract_violation(&mount, "uninitialised metadata block"));
                }
                if mount.withdrawn() {
                    // withdraw 已在别处阻止进一步破坏，这里只留痕
                    log::warn!(
                        "{}: adding buffer {:#x} while withdrawn",
                        mount.fsname(),
                        buf.lba()
                    );
                }
                bh.pin();
                let data = bh.data_mut();
                BigEndian::write_u64(&mut data[META_HDR_PAD_OFF..META_HDR_PAD_OFF + 8], 0);
                BigEndian::write_u32(
                    &mut data[META_HDR_JID_OFF..META_HDR_JID_OFF + 4],
                    mount.jid(),
                );
                desc.set_member(SetMember::Meta);
                self.meta_bufs.push(desc);
                self.num_buf_new += 1;
            }
            BufRole::Data => {
                bh.pin();
                desc.set_member(SetMember::Data);
                self.data_bufs.push(desc);
                self.num_databuf_new += 1;
            }
        }
        Ok(())
    }

    /// 记入一条 revoke
    ///
    /// 只有不属于任何事务集合的描述符才能被 revoke（块上不得有
    /// 未落盘的日志数据）。
    pub fn add_revoke(&mut self, desc: &Arc<BufDesc>) -> Result<()> {
        let mount = self.mount.clone();
        let mut log = mount.log_lock();

        if desc.member() != SetMember::None {
            drop(log);
            return Err(contract_violation(
                &mount,
                "revoking a buffer with pending journaled data",
            ));
        }

        desc.set_member(SetMember::Revoke);
        log.revokes.insert(desc.clone());
        drop(log);

        self.flags.insert(TransFlags::TOUCHED);
        self.num_revoke += 1;
        Ok(())
    }

    /// 撤回目标落在 `[blkno, blkno+len)` 内的待写 revoke，至多 `len` 条
    ///
    /// 块重分配可能抢在刷写方写出旧 revoke 之前，此时旧记录必须先被
    /// 移除。被移除记录的描述符随之销毁。待写计数下穿零说明记账被
    /// 破坏，撤回挂载。
    pub fn add_unrevoke(&mut self, blkno: u64, len: u32) {
        let mount = self.mount.clone();
        let mut log = mount.log_lock();

        let (removed, consistent) = log.revokes.remove_range(blkno, len);
        for rec in &removed {
            rec.descriptor().set_member(SetMember::None);
            log.descs.remove(&rec.blkno());
        }
        let n = removed.len() as u32;
        drop(log);

        mount.assert_withdraw(consistent, "pending revoke count underflow");
        self.num_revoke_rm += n;
    }

    /// 把缓冲区从本事务的集合中移除（块释放路径）
    ///
    /// 解除 pin、退出集合并累加移除计数；描述符保留在表中，块随后
    /// 通常会被 [`Trans::add_revoke`]。不属于本事务集合的描述符不受
    /// 影响。
    pub fn remove_buffer(&mut self, desc: &Arc<BufDesc>) {
        let mount = self.mount.clone();
        // 锁序：缓冲区内容锁 → 记账锁
        let mut bh = desc.buffer().lock();
        let log = mount.log_lock();

        let removed = match desc.member() {
            SetMember::Meta => {
                match self.meta_bufs.iter().position(|d| Arc::ptr_eq(d, desc)) {
                    Some(pos) => {
                        self.meta_bufs.remove(pos);
                        self.num_buf_rm += 1;
                        true
                    }
                    None => false,
                }
            }
            SetMember::Data => {
                match self.data_bufs.iter().position(|d| Arc::ptr_eq(d, desc)) {
                    Some(pos) => {
                        self.data_bufs.remove(pos);
                        self.num_databuf_rm += 1;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        };
        if removed {
            desc.set_member(SetMember::None);
            bh.unpin();
        }
        drop(log);
    }

    /// 事务创建位置（诊断用）
    pub fn origin(&self) -> &'static Location<'static> {
        self.origin
    }

    /// 声明的缓冲区上界
    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    /// 声明的 revoke 上界
    pub fn revokes(&self) -> u32 {
        self.revokes
    }

    /// begin 时扣除的预留块数
    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    /// 事务是否动过手（注册过缓冲区或 revoke）
    pub fn touched(&self) -> bool {
        self.flags.contains(TransFlags::TOUCHED)
    }

    /// 提交方是否保留了事务状态
    pub fn attached(&self) -> bool {
        self.flags.contains(TransFlags::ATTACHED)
    }

    /// 由提交方调用：保留事务状态，延迟到持久化后释放
    pub fn set_attached(&mut self) {
        self.flags.insert(TransFlags::ATTACHED);
    }

    /// 新注册的元数据缓冲区数
    pub fn num_buf_new(&self) -> u32 {
        self.num_buf_new
    }

    /// 新注册的数据缓冲区数
    pub fn num_databuf_new(&self) -> u32 {
        self.num_databuf_new
    }

    /// 已执行的 revoke 数
    pub fn num_revoke(&self) -> u32 {
        self.num_revoke
    }

    /// 已撤回的 revoke 数
    pub fn num_revoke_rm(&self) -> u32 {
        self.num_revoke_rm
    }

    /// 元数据集（注册顺序）
    pub fn meta_bufs(&self) -> &[Arc<BufDesc>] {
        &self.meta_bufs
    }

    /// 数据集（注册顺序）
    pub fn data_bufs(&self) -> &[Arc<BufDesc>] {
        &self.data_bufs
    }

    /// 由提交方调用：取走两个缓冲区集
    pub fn take_buffers(&mut self) -> (Vec<Arc<BufDesc>>, Vec<Arc<BufDesc>>) {
        (
            core::mem::take(&mut self.meta_bufs),
            core::mem::take(&mut self.data_bufs),
        )
    }
}

impl Drop for Trans {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        // 未 end 就丢弃是调用方 bug；按未动手路径清理，
        // 避免泄漏的句柄永久霸占共享锁和日志空间
        clear_context();
        log::error!(
            "{}: transaction created at {} dropped without end",
            self.mount.fsname(),
            self.origin
        );
        if self.lock_held {
            self.mount.release_trans_lock(LockMode::Shared);
            self.lock_held = false;
        }
        self.mount.log_release(self.reserved);
        self.mount.end_write();
    }
}

impl core::fmt::Debug for Trans {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Trans")
            .field("origin", &format_args!("{}", self.origin))
            .field("blocks", &self.blocks)
            .field("revokes", &self.revokes)
            .field("reserved", &self.reserved)
            .field("flags", &self.flags)
            .finish()
    }
}

fn contract_violation(mount: &Arc<Mount>, what: &'static str) -> Error {
    log::error!("{}: caller contract violated: {}", mount.fsname(), what);
    mount.withdraw(what);
    Error::new(ErrorKind::FatalInconsistency, what)
}
