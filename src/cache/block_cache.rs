//! 块缓存实现（基于 lru crate）
//!
//! 为事务层提供缓存块：按 LBA 查找或分配，满时从 LRU 端驱逐。
//! 被 pin 住或脏的块绝不驱逐，驱逐脏块会导致数据丢失。

use crate::error::{Error, ErrorKind, Result};

use super::buffer::CacheBuffer;
use core::num::NonZeroUsize;
use lru::LruCache;
use std::sync::Arc;

/// 默认缓存块数量
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// 缓存统计信息
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
}

/// 块缓存
///
/// 块以 `Arc<CacheBuffer>` 形式共享：即使块被驱逐出缓存，
/// 持有描述符的事务仍保有对它的引用。
pub struct BlockCache {
    cache: LruCache<u64, Arc<CacheBuffer>>,
    block_size: usize,
    stats: CacheStats,
}

impl BlockCache {
    /// 创建新的块缓存
    ///
    /// # 参数
    ///
    /// * `capacity` - 缓存容量（块数量）
    /// * `block_size` - 块大小（字节）
    pub fn new(capacity: usize, block_size: usize) -> Self {
        Self {
            cache: LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            ),
            block_size,
            stats: CacheStats::default(),
        }
    }

    /// 查找或分配缓存块
    ///
    /// 已存在的块自动移到 MRU 端；不存在时分配新块（数据清零），
    /// 缓存满时先从 LRU 端驱逐一个既不脏也未被 pin 的块。
    pub fn get_or_alloc(&mut self, lba: u64) -> Result<Arc<CacheBuffer>> {
        if let Some(buf) = self.cache.get(&lba) {
            self.stats.hits += 1;
            return Ok(buf.clone());
        }
        self.stats.misses += 1;

        if self.cache.len() >= self.cache.cap().get() {
            self.evict_one()?;
        }

        let buf = Arc::new(CacheBuffer::new(lba, self.block_size));
        self.cache.put(lba, buf.clone());
        log::trace!("[CACHE] alloc lba={:#x}", lba);
        Ok(buf)
    }

    /// 查找缓存块（不分配）
    pub fn find_get(&mut self, lba: u64) -> Option<Arc<CacheBuffer>> {
        match self.cache.get(&lba) {
            Some(buf) => {
                self.stats.hits += 1;
                Some(buf.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// 从 LRU 端驱逐第一个可驱逐的块
    ///
    /// pin 住或脏的块跳过；全部不可驱逐时返回 NoSpace，
    /// 调用方应先等待日志落盘再重试。
    fn evict_one(&mut self) -> Result<()> {
        // iter() 按 MRU→LRU 顺序，驱逐从最旧端找起
        let keys: Vec<u64> = self.cache.iter().map(|(lba, _)| *lba).collect();
        for &lba in keys.iter().rev() {
            let evictable = self
                .cache
                .peek(&lba)
                .is_some_and(|buf| !buf.is_pinned() && !buf.is_dirty());
            if evictable {
                self.cache.pop(&lba);
                log::debug!("[CACHE] evicted lba={:#x}", lba);
                return Ok(());
            }
        }

        log::error!(
            "[CACHE] cannot evict: all {} blocks pinned or dirty",
            self.cache.len()
        );
        Err(Error::new(
            ErrorKind::NoSpace,
            "all cache blocks pinned or dirty, cannot evict",
        ))
    }

    /// 使块无效（从缓存中移除）
    pub fn invalidate(&mut self, lba: u64) {
        self.cache.pop(&lba);
    }

    /// 缓存统计信息
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// 缓存容量
    pub fn capacity(&self) -> usize {
        self.cache.cap().get()
    }

    /// 当前缓存块数量
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// 缓存是否为空
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

impl core::fmt::Debug for BlockCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockCache")
            .field("capacity", &self.cache.cap())
            .field("len", &self.cache.len())
            .field("block_size", &self.block_size)
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_creation() {
        let cache = BlockCache::new(8, 4096);
        assert_eq!(cache.capacity(), 8);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_alloc_and_hit() {
        let mut cache = BlockCache::new(8, 4096);

        let a = cache.get_or_alloc(100).unwrap();
        assert_eq!(cache.stats().misses, 1);

        let b = cache.get_or_alloc(100).unwrap();
        assert_eq!(cache.stats().hits, 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = BlockCache::new(4, 4096);

        for i in 0..4 {
            cache.get_or_alloc(i).unwrap();
        }

        // 访问块 0 使其成为 MRU
        cache.get_or_alloc(0).unwrap();

        cache.get_or_alloc(10).unwrap();
        assert_eq!(cache.len(), 4);

        assert!(cache.find_get(0).is_some());
        assert!(cache.find_get(1).is_none());
    }

    #[test]
    fn test_pinned_blocks_survive_pressure() {
        let mut cache = BlockCache::new(2, 4096);

        let pinned = cache.get_or_alloc(1).unwrap();
        pinned.lock().pin();
        cache.get_or_alloc(2).unwrap();

        // 压力下驱逐的必须是未 pin 的块 2
        cache.get_or_alloc(3).unwrap();
        assert!(cache.find_get(1).is_some());
        assert!(cache.find_get(2).is_none());
    }

    #[test]
    fn test_all_unevictable() {
        let mut cache = BlockCache::new(2, 4096);

        cache.get_or_alloc(1).unwrap().lock().pin();
        cache.get_or_alloc(2).unwrap().lock().mark_dirty();

        let err = cache.get_or_alloc(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpace);
    }

    #[test]
    fn test_invalidate() {
        let mut cache = BlockCache::new(4, 4096);
        cache.get_or_alloc(7).unwrap();
        cache.invalidate(7);
        assert!(cache.find_get(7).is_none());
    }
}
