//! 常量定义
//!
//! 元数据块头布局与日志空间预留的基本常量。

/// 元数据块头 magic number
///
/// 每个已初始化的元数据块都以该值（大端序）开头，注册未初始化的块
/// 属于调用方 bug。
pub const META_MAGIC: u32 = 0x0C1F_5D19;

/// 块头内 magic 字段的偏移
pub const META_HDR_MAGIC_OFF: usize = 0;

/// 块头内块类型字段的偏移
pub const META_HDR_TYPE_OFF: usize = 4;

/// 块头内保留字段的偏移（注册时清零）
pub const META_HDR_PAD_OFF: usize = 8;

/// 块头内日志所有者（journal id）字段的偏移
pub const META_HDR_JID_OFF: usize = 16;

/// 元数据块头总长度（字节）
pub const META_HDR_SIZE: usize = 20;

/// 每个事务固定预留的日志头块数
pub const LOG_HDR_BLOCKS: u64 = 1;

/// 声明了缓冲区的事务额外预留的描述符开销（块数）
pub const LOG_DESC_OVERHEAD_BLOCKS: u64 = 6;

/// 单条 revoke 记录在日志中占用的字节数
pub const REVOKE_REC_BYTES: u64 = 8;

/// 默认块大小（字节）
pub const DEFAULT_BLOCK_SIZE: u32 = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        // 字段不重叠且位于头部长度之内
        assert!(META_HDR_MAGIC_OFF + 4 <= META_HDR_TYPE_OFF);
        assert!(META_HDR_TYPE_OFF + 4 <= META_HDR_PAD_OFF);
        assert!(META_HDR_PAD_OFF + 8 <= META_HDR_JID_OFF);
        assert_eq!(META_HDR_JID_OFF + 4, META_HDR_SIZE);
        assert!(META_HDR_SIZE <= DEFAULT_BLOCK_SIZE as usize);
    }
}
