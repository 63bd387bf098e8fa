//! 日志空间预留
//!
//! 每个挂载维护一个空闲块计数器，上限为日志总容量。预留在事务
//! begin 时一次性扣除，由刷写/回收路径归还；日志满时预留方协作
//! 阻塞，直到空间被释放或挂载被撤回。

use crate::error::{Error, ErrorKind, Result};
use std::sync::{Condvar, Mutex, PoisonError};

/// 日志空间计数器
#[derive(Debug)]
pub struct LogSpace {
    capacity: u64,
    state: Mutex<SpaceState>,
    cond: Condvar,
}

#[derive(Debug)]
struct SpaceState {
    free: u64,
    shutdown: bool,
}

impl LogSpace {
    /// 创建计数器，初始空闲量等于日志总容量
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            state: Mutex::new(SpaceState {
                free: capacity,
                shutdown: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// 日志总容量（块）
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// 当前空闲块数
    pub fn free(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .free
    }

    /// 预留 `n` 个日志块
    ///
    /// 空闲量不足时阻塞等待，空间被 [`LogSpace::release`] 归还后重试；
    /// 挂载撤回后所有等待者以 `Shutdown` 失败。
    pub fn reserve(&self, n: u64) -> Result<()> {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if st.shutdown {
                return Err(Error::new(ErrorKind::Shutdown, "journal withdrawn"));
            }
            if st.free >= n {
                st.free -= n;
                log::trace!("[LOG] reserve {} blocks, {} free", n, st.free);
                return Ok(());
            }
            log::debug!("[LOG] reserve {} blocks blocked, {} free", n, st.free);
            st = self
                .cond
                .wait(st)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 归还 `n` 个日志块并唤醒等待者
    ///
    /// 返回归还后是否超出容量；超出说明预留/归还记账已经失衡，
    /// 由调用方升级为挂载级 withdraw。
    #[must_use]
    pub fn release(&self, n: u64) -> bool {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.free += n;
        let overflow = st.free > self.capacity;
        log::trace!("[LOG] release {} blocks, {} free", n, st.free);
        drop(st);
        self.cond.notify_all();
        overflow
    }

    /// 关停计数器：标记 shutdown 并唤醒所有阻塞的预留方
    pub fn shutdown(&self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.shutdown = true;
        drop(st);
        self.cond.notify_all();
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
    fn test_reserve_release_round_trip() {
        let space = LogSpace::new(100);

        space.reserve(30).unwrap();
        assert_eq!(space.free(), 70);

        assert!(!space.release(30));
        assert_eq!(space.free(), 100);
    }

    #[test]
    fn test_release_overflow_detected() {
        let space = LogSpace::new(100);
        assert!(space.release(1));
    }

    #[test]
    fn test_reserve_blocks_until_release() {
        let space = Arc::new(LogSpace::new(10));
        let resumed = Arc::new(AtomicBool::new(false));

        space.reserve(10).unwrap();

        let t = {
            let (space, resumed) = (space.clone(), resumed.clone());
            thread::spawn(move || {
                space.reserve(5).unwrap();
                resumed.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!resumed.load(Ordering::SeqCst));

        assert!(!space.release(10));
        t.join().unwrap();
        assert!(resumed.load(Ordering::SeqCst));
        assert_eq!(space.free(), 5);
    }

    #[test]
    fn test_shutdown_fails_blocked_reserver() {
        let space = Arc::new(LogSpace::new(10));

        space.reserve(10).unwrap();

        let t = {
            let space = space.clone();
            thread::spawn(move || space.reserve(1))
        };

        thread::sleep(Duration::from_millis(50));
        space.shutdown();

        let err = t.join().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shutdown);
    }

    #[test]
    fn test_shutdown_fails_new_reserver() {
        let space = LogSpace::new(10);
        space.shutdown();
        assert_eq!(space.reserve(1).unwrap_err().kind(), ErrorKind::Shutdown);
    }
}
