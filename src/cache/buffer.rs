//! 缓存块结构
//!
//! 缓存块带有内容锁与 pin 状态：块一旦进入某个事务的日志记录，
//! 就会被 pin 住，在对应日志记录落盘之前不允许写回。

use bitflags::bitflags;
use std::sync::{Mutex, MutexGuard, PoisonError};

bitflags! {
    /// 缓存块标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u8 {
        /// 数据已更新（有效）
        const UPTODATE = 0x01;
        /// 数据已修改（脏）
        const DIRTY    = 0x02;
        /// 已被日志 pin 住，落盘前不得写回
        const PINNED   = 0x04;
    }
}

/// 缓存块
///
/// `lba` 是块在共享盘上的逻辑块地址，同时作为块的身份；
/// 数据与标志位由内容锁保护，持锁期间不做 I/O。
pub struct CacheBuffer {
    /// 逻辑块地址
    lba: u64,
    inner: Mutex<BufInner>,
}

struct BufInner {
    data: Vec<u8>,
    flags: CacheFlags,
}

/// 缓存块内容锁守卫
///
/// 通过 [`CacheBuffer::lock`] 获得，持有期间独占访问块数据与标志位。
pub struct BufGuard<'a> {
    inner: MutexGuard<'a, BufInner>,
}

impl CacheBuffer {
    /// 创建新的缓存块（数据清零）
    pub fn new(lba: u64, block_size: usize) -> Self {
        Self {
            lba,
            inner: Mutex::new(BufInner {
                data: vec![0u8; block_size],
                flags: CacheFlags::empty(),
            }),
        }
    }

    /// 逻辑块地址
    pub fn lba(&self) -> u64 {
        self.lba
    }

    /// 获取内容锁
    pub fn lock(&self) -> BufGuard<'_> {
        BufGuard {
            inner: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// 检查块是否被 pin 住（短暂加锁）
    pub fn is_pinned(&self) -> bool {
        self.lock().pinned()
    }

    /// 检查块是否为脏（短暂加锁）
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty()
    }
}

impl BufGuard<'_> {
    /// 块数据
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// 块数据（可变）
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.inner.data
    }

    /// 是否被 pin 住
    pub fn pinned(&self) -> bool {
        self.inner.flags.contains(CacheFlags::PINNED)
    }

    /// Pin 住该块，阻止写回
    pub fn pin(&mut self) {
        self.inner.flags.insert(CacheFlags::PINNED);
    }

    /// 解除 pin（仅在日志记录持久化之后由提交方调用）
    pub fn unpin(&mut self) {
        self.inner.flags.remove(CacheFlags::PINNED);
    }

    /// 是否为脏
    pub fn dirty(&self) -> bool {
        self.inner.flags.contains(CacheFlags::DIRTY)
    }

    /// 标记为脏
    pub fn mark_dirty(&mut self) {
        self.inner.flags.insert(CacheFlags::DIRTY);
    }

    /// 标记为干净
    pub fn mark_clean(&mut self) {
        self.inner.flags.remove(CacheFlags::DIRTY);
    }

    /// 数据是否有效
    pub fn uptodate(&self) -> bool {
        self.inner.flags.contains(CacheFlags::UPTODATE)
    }

    /// 标记数据有效
    pub fn mark_uptodate(&mut self) {
        self.inner.flags.insert(CacheFlags::UPTODATE);
    }
}

impl core::fmt::Debug for CacheBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let g = self.lock();
        f.debug_struct("CacheBuffer")
            .field("lba", &self.lba)
            .field("data_len", &g.data().len())
            .field("flags", &g.inner.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_creation() {
        let buf = CacheBuffer::new(100, 4096);
        assert_eq!(buf.lba(), 100);
        let g = buf.lock();
        assert_eq!(g.data().len(), 4096);
        assert!(!g.pinned());
        assert!(!g.dirty());
    }

    #[test]
    fn test_pin_unpin() {
        let buf = CacheBuffer::new(100, 4096);

        assert!(!buf.is_pinned());

        buf.lock().pin();
        assert!(buf.is_pinned());

        buf.lock().unpin();
        assert!(!buf.is_pinned());
    }

    #[test]
    fn test_dirty_flag() {
        let buf = CacheBuffer::new(100, 4096);

        buf.lock().mark_dirty();
        assert!(buf.is_dirty());

        buf.lock().mark_clean();
        assert!(!buf.is_dirty());
    }

    #[test]
    fn test_data_write() {
        let buf = CacheBuffer::new(100, 64);
        {
            let mut g = buf.lock();
            g.data_mut()[0] = 0x42;
            g.mark_uptodate();
        }
        let g = buf.lock();
        assert_eq!(g.data()[0], 0x42);
        assert!(g.uptodate());
    }
}
