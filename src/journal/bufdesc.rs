//! 缓冲区描述符
//!
//! 描述符把一个缓存块绑定到其所属资源的集群锁和日志角色上，
//! 并记录它当前属于哪个集合：某个事务的元数据集、数据集、
//! 待写 revoke 集，或者尚未入集。成员关系只在持有挂载的
//! 记账锁时变更。

use crate::cache::CacheBuffer;
use crate::lock::ClusterLock;
use std::sync::{Arc, Mutex, PoisonError};

/// 日志角色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufRole {
    /// 元数据块：注册时校验块头并盖上日志所有者
    Meta,
    /// 数据块（journaled data 模式）
    Data,
}

/// 描述符的集合成员状态
///
/// 任一时刻恰好属于一个集合。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMember {
    /// 未入集
    None,
    /// 某个事务的元数据集
    Meta,
    /// 某个事务的数据集
    Data,
    /// 挂载级待写 revoke 集
    Revoke,
}

/// 缓冲区描述符
pub struct BufDesc {
    buf: Arc<CacheBuffer>,
    lock: Arc<ClusterLock>,
    role: BufRole,
    member: Mutex<SetMember>,
}

impl BufDesc {
    /// 创建描述符，初始未入集
    pub fn new(buf: Arc<CacheBuffer>, lock: Arc<ClusterLock>, role: BufRole) -> Self {
        Self {
            buf,
            lock,
            role,
            member: Mutex::new(SetMember::None),
        }
    }

    /// 目标块号
    pub fn blkno(&self) -> u64 {
        self.buf.lba()
    }

    /// 引用的缓存块
    pub fn buffer(&self) -> &Arc<CacheBuffer> {
        &self.buf
    }

    /// 所属资源的集群锁
    pub fn lock(&self) -> &Arc<ClusterLock> {
        &self.lock
    }

    /// 日志角色
    pub fn role(&self) -> BufRole {
        self.role
    }

    /// 当前集合成员状态
    pub fn member(&self) -> SetMember {
        *self.member.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 变更集合成员状态
    ///
    /// 调用方必须持有挂载的记账锁。
    pub(crate) fn set_member(&self, m: SetMember) {
        *self.member.lock().unwrap_or_else(PoisonError::into_inner) = m;
    }
}

impl core::fmt::Debug for BufDesc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufDesc")
            .field("blkno", &self.blkno())
            .field("lock", &self.lock.name())
            .field("role", &self.role)
            .field("member", &self.member())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_binding() {
        let buf = Arc::new(CacheBuffer::new(42, 4096));
        let lock = Arc::new(ClusterLock::new(7));
        let desc = BufDesc::new(buf.clone(), lock.clone(), BufRole::Meta);

        assert_eq!(desc.blkno(), 42);
        assert_eq!(desc.lock().name(), 7);
        assert_eq!(desc.role(), BufRole::Meta);
        assert_eq!(desc.member(), SetMember::None);
        assert!(Arc::ptr_eq(desc.buffer(), &buf));
    }

    #[test]
    fn test_member_transitions() {
        let buf = Arc::new(CacheBuffer::new(1, 4096));
        let lock = Arc::new(ClusterLock::new(1));
        let desc = BufDesc::new(buf, lock, BufRole::Data);

        desc.set_member(SetMember::Data);
        assert_eq!(desc.member(), SetMember::Data);

        desc.set_member(SetMember::None);
        assert_eq!(desc.member(), SetMember::None);
    }
}
