//! 事务提交协议
//!
//! end 是事务状态机的唯一出口：未动手的事务原路归还预留并放锁；
//! 动过手的事务先核对记账不变量，再把缓冲区集和 revoke 增量整体
//! 交给外部提交方。不变量被破坏时撤回挂载，但提交仍然尝试——
//! 已 pin 的数据拒绝落盘只会雪上加霜，先写出去再说。
//!
//! 预留空间在提交路径上整体移交：未用尽的部分不在这里拆账归还，
//! 由提交方在日志记录持久化后一并释放。

use crate::error::{Error, ErrorKind, Result};
use crate::journal::bufdesc::SetMember;
use crate::journal::mount::Mount;
use crate::journal::revoke::RevokeRecord;
use crate::journal::trans::{clear_context, Trans, TransFlags};
use crate::lock::LockMode;

/// 外部日志提交方
///
/// `commit` 消费事务的缓冲区集与 revoke 增量，可以调用
/// [`Trans::set_attached`] 保留事务状态、延迟到持久化后释放。
/// 缓冲区解除 pin、描述符销毁和预留空间的归还都由提交方在
/// 日志记录持久化之后负责。
pub trait LogCommitter: Send + Sync {
    /// 提交一个动过手的事务
    fn commit(&self, mount: &Mount, tr: &mut Trans);

    /// 立即刷日志（同步挂载在每个事务 end 时调用）
    fn log_flush(&self, mount: &Mount);
}

/// 即时持久化的提交方
///
/// 把每次提交当作立刻持久：解除 pin、销毁描述符、归还预留。
/// 供单节点场景和测试使用。
pub struct NullCommitter;

impl LogCommitter for NullCommitter {
    fn commit(&self, mount: &Mount, tr: &mut Trans) {
        let (meta, data) = tr.take_buffers();
        for desc in meta.iter().chain(data.iter()) {
            desc.buffer().lock().unpin();
            desc.set_member(SetMember::None);
            mount.remove_descriptor(desc.blkno());
        }
        mount.log_release(tr.reserved());
    }

    fn log_flush(&self, mount: &Mount) {
        // 待写 revoke 视作已写出
        let written = mount.take_pending_revokes();
        log::debug!(
            "{}: flushed {} pending revokes",
            mount.fsname(),
            written.len()
        );
    }
}

impl Mount {
    /// 取走全部待写 revoke 记录（刷写路径）
    ///
    /// 记录对应的描述符随之销毁。
    pub fn take_pending_revokes(&self) -> Vec<RevokeRecord> {
        let mut log = self.log_lock();
        let drained = log.revokes.drain_all();
        for rec in &drained {
            rec.descriptor().set_member(SetMember::None);
            log.descs.remove(&rec.blkno());
        }
        drained
    }
}

impl Trans {
    /// 结束事务
    ///
    /// 最先清除上下文绑定，重入方不可能看到半途的事务。未动手路径
    /// 归还全部预留、放锁、退出写保护；动过手路径校验记账不变量后
    /// 交给提交方，随后放锁、退出写保护，同步挂载再补一次立即刷写。
    ///
    /// 不变量被破坏时输出完整诊断、撤回挂载，提交依然尝试；协议
    /// 走完后向调用方返回 `FatalInconsistency`。
    pub fn end(mut self) -> Result<()> {
        self.ended = true;
        clear_context();
        let mount = self.mount.clone();

        if !self.flags.contains(TransFlags::TOUCHED) {
            mount.log_release(self.reserved);
            if self.lock_held {
                mount.release_trans_lock(LockMode::Shared);
                self.lock_held = false;
            }
            mount.end_write();
            return Ok(());
        }

        let nbuf = i64::from(self.num_buf_new) + i64::from(self.num_databuf_new)
            - i64::from(self.num_buf_rm)
            - i64::from(self.num_databuf_rm);
        let buf_overrun = mount.assert_withdraw(
            nbuf <= i64::from(self.blocks),
            "transaction dirtied more buffers than declared",
        );
        let revoke_overrun = mount.assert_withdraw(
            self.num_revoke <= self.revokes,
            "transaction revoked more blocks than declared",
        );
        if buf_overrun || revoke_overrun {
            self.dump();
        }

        mount.committer().commit(&mount, &mut self);

        if self.lock_held {
            mount.release_trans_lock(LockMode::Shared);
            self.lock_held = false;
        }
        if mount.test_flags(crate::journal::mount::MountFlags::SYNCHRONOUS) {
            mount.committer().log_flush(&mount);
        }
        mount.end_write();

        if buf_overrun || revoke_overrun {
            Err(Error::new(
                ErrorKind::FatalInconsistency,
                "transaction accounting invariants violated",
            ))
        } else {
            Ok(())
        }
    }

    /// 输出事务的完整诊断状态
    fn dump(&self) {
        let fsname = self.mount.fsname();
        log::warn!("{}: transaction created at: {}", fsname, self.origin);
        log::warn!(
            "{}: blocks={} revokes={} reserved={} touched={}",
            fsname,
            self.blocks,
            self.revokes,
            self.reserved,
            self.flags.contains(TransFlags::TOUCHED)
        );
        log::warn!(
            "{}: buf {}/{} databuf {}/{} revoke {}/{}",
            fsname,
            self.num_buf_new,
            self.num_buf_rm,
            self.num_databuf_new,
            self.num_databuf_rm,
            self.num_revoke,
            self.num_revoke_rm
        );
    }
}
