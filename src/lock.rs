//! 集群锁接口
//!
//! 事务与外部刷写路径之间的互斥通过集群事务锁表达：事务以共享模式
//! 持锁，刷写方以独占模式持锁，因此刷写绝不会与任何在途事务并发。
//! 锁的获取/释放委托给 [`LockManager`]，分布式锁管理器的线协议不在
//! 本 crate 范围内；[`LocalLockManager`] 提供单节点进程内实现。

use crate::error::Result;
use bitflags::bitflags;
use std::sync::{Condvar, Mutex, PoisonError};

bitflags! {
    /// 集群锁标志
    ///
    /// 注册缓冲区时点亮，提示锁的持有资源有待刷写的日志数据。
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LockFlags: u8 {
        /// 释放锁之前需要先刷日志
        const NEEDS_FLUSH = 0x01;
        /// 持有资源有脏缓冲区
        const DIRTY       = 0x02;
    }
}

/// 锁模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// 共享：所有在途事务共同持有
    Shared,
    /// 独占：外部刷写路径专用
    Exclusive,
}

/// 集群锁
///
/// 进程内的锁状态镜像。`name` 是锁在集群命名空间中的编号；
/// 共享/独占计数由 [`LocalLockManager`] 维护，其他提供者可以
/// 只把它当作带标志位的名字使用。
pub struct ClusterLock {
    name: u64,
    state: Mutex<LockState>,
    cond: Condvar,
    flags: Mutex<LockFlags>,
}

#[derive(Debug, Default)]
struct LockState {
    shared: u32,
    exclusive: bool,
}

impl ClusterLock {
    /// 创建新锁
    pub fn new(name: u64) -> Self {
        Self {
            name,
            state: Mutex::new(LockState::default()),
            cond: Condvar::new(),
            flags: Mutex::new(LockFlags::empty()),
        }
    }

    /// 锁编号
    pub fn name(&self) -> u64 {
        self.name
    }

    /// 检查标志位
    pub fn test_flags(&self, flags: LockFlags) -> bool {
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(flags)
    }

    /// 设置标志位
    pub fn set_flags(&self, flags: LockFlags) {
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(flags);
    }

    /// 清除标志位
    pub fn clear_flags(&self, flags: LockFlags) {
        self.flags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(flags);
    }
}

impl core::fmt::Debug for ClusterLock {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ClusterLock")
            .field("name", &self.name)
            .field("state", &*self.state.lock().unwrap_or_else(PoisonError::into_inner))
            .finish()
    }
}

/// 集群锁提供者
///
/// 事务核心只以共享模式请求锁；独占模式留给外部刷写路径。
pub trait LockManager: Send + Sync {
    /// 以指定模式获取锁，必要时阻塞等待
    fn acquire(&self, lock: &ClusterLock, mode: LockMode) -> Result<()>;

    /// 释放以指定模式持有的锁
    fn release(&self, lock: &ClusterLock, mode: LockMode);
}

/// 进程内锁提供者
///
/// 共享模式可并发持有，独占模式等待所有共享持有者退出；
/// 等待独占不会阻止新的共享获取（事务优先于刷写）。
#[derive(Debug, Default)]
pub struct LocalLockManager;

impl LocalLockManager {
    /// 创建进程内锁提供者
    pub fn new() -> Self {
        Self
    }
}

impl LockManager for LocalLockManager {
    fn acquire(&self, lock: &ClusterLock, mode: LockMode) -> Result<()> {
        let mut st = lock.state.lock().unwrap_or_else(PoisonError::into_inner);
        match mode {
            LockMode::Shared => {
                while st.exclusive {
                    st = lock
                        .cond
                        .wait(st)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                st.shared += 1;
            }
            LockMode::Exclusive => {
                while st.exclusive || st.shared > 0 {
                    st = lock
                        .cond
                        .wait(st)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                st.exclusive = true;
            }
        }
        Ok(())
    }

    fn release(&self, lock: &ClusterLock, mode: LockMode) {
        let mut st = lock.state.lock().unwrap_or_else(PoisonError::into_inner);
        match mode {
            LockMode::Shared => {
                debug_assert!(st.shared > 0);
                st.shared = st.shared.saturating_sub(1);
            }
            LockMode::Exclusive => {
                debug_assert!(st.exclusive);
                st.exclusive = false;
            }
        }
        drop(st);
        lock.cond.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_shared_does_not_serialize() {
        let mgr = LocalLockManager::new();
        let lock = ClusterLock::new(1);

        mgr.acquire(&lock, LockMode::Shared).unwrap();
        mgr.acquire(&lock, LockMode::Shared).unwrap();

        mgr.release(&lock, LockMode::Shared);
        mgr.release(&lock, LockMode::Shared);
    }

    #[test]
    fn test_exclusive_waits_for_shared() {
        let mgr = Arc::new(LocalLockManager::new());
        let lock = Arc::new(ClusterLock::new(1));
        let acquired = Arc::new(AtomicBool::new(false));

        mgr.acquire(&lock, LockMode::Shared).unwrap();

        let t = {
            let (mgr, lock, acquired) = (mgr.clone(), lock.clone(), acquired.clone());
            thread::spawn(move || {
                mgr.acquire(&lock, LockMode::Exclusive).unwrap();
                acquired.store(true, Ordering::SeqCst);
                mgr.release(&lock, LockMode::Exclusive);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        mgr.release(&lock, LockMode::Shared);
        t.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shared_waits_for_exclusive() {
        let mgr = Arc::new(LocalLockManager::new());
        let lock = Arc::new(ClusterLock::new(2));
        let acquired = Arc::new(AtomicBool::new(false));

        mgr.acquire(&lock, LockMode::Exclusive).unwrap();

        let t = {
            let (mgr, lock, acquired) = (mgr.clone(), lock.clone(), acquired.clone());
            thread::spawn(move || {
                mgr.acquire(&lock, LockMode::Shared).unwrap();
                acquired.store(true, Ordering::SeqCst);
                mgr.release(&lock, LockMode::Shared);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        mgr.release(&lock, LockMode::Exclusive);
        t.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_lock_flags() {
        let lock = ClusterLock::new(3);

        assert!(!lock.test_flags(LockFlags::NEEDS_FLUSH));
        lock.set_flags(LockFlags::NEEDS_FLUSH | LockFlags::DIRTY);
        assert!(lock.test_flags(LockFlags::NEEDS_FLUSH));
        assert!(lock.test_flags(LockFlags::DIRTY));

        lock.clear_flags(LockFlags::DIRTY);
        assert!(!lock.test_flags(LockFlags::DIRTY));
    }
}
