//! Revoke 台账
//!
//! revoke 记录表示"该块先前的日志记录在回放时应当忽略"。记录在
//! 块被释放时加入，在刷写方写出之前可以被撤回（un-revoke）——
//! 块重分配可能抢在刷写方前面，旧地址上的 revoke 必须先于新数据
//! 的日志记录被移除。台账随挂载存在，由记账锁保护。

use super::bufdesc::BufDesc;
use std::sync::Arc;

/// 单条 revoke 记录：目标块与其描述符
pub struct RevokeRecord {
    blkno: u64,
    desc: Arc<BufDesc>,
}

impl RevokeRecord {
    /// 创建记录
    pub fn new(desc: Arc<BufDesc>) -> Self {
        Self {
            blkno: desc.blkno(),
            desc,
        }
    }

    /// 目标块号
    pub fn blkno(&self) -> u64 {
        self.blkno
    }

    /// 拥有该记录的描述符
    pub fn descriptor(&self) -> &Arc<BufDesc> {
        &self.desc
    }
}

impl core::fmt::Debug for RevokeRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RevokeRecord")
            .field("blkno", &self.blkno)
            .finish()
    }
}

/// 挂载级待写 revoke 集
///
/// `pending` 与记录条数一一对应地增减，两者失配说明记账被破坏。
#[derive(Debug, Default)]
pub struct RevokeLedger {
    records: Vec<RevokeRecord>,
    pending: usize,
}

impl RevokeLedger {
    /// 创建空台账
    pub fn new() -> Self {
        Self::default()
    }

    /// 待写记录数
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// 加入一条记录
    pub fn insert(&mut self, desc: Arc<BufDesc>) {
        self.records.push(RevokeRecord::new(desc));
        self.pending += 1;
    }

    /// 撤回目标落在 `[blkno, blkno+len)` 内的记录，至多 `len` 条
    ///
    /// 返回被移除的记录和记账是否仍一致：移除时计数已为零说明
    /// `pending` 与记录列表失配，由调用方升级处理。
    pub fn remove_range(&mut self, blkno: u64, len: u32) -> (Vec<RevokeRecord>, bool) {
        let end = blkno + u64::from(len);
        let mut removed = Vec::new();
        let mut budget = len;

        let mut i = 0;
        while i < self.records.len() && budget > 0 {
            let b = self.records[i].blkno();
            if b < blkno || b >= end {
                i += 1;
                continue;
            }
            if self.pending == 0 {
                return (removed, false);
            }
            self.pending -= 1;
            budget -= 1;
            removed.push(self.records.remove(i));
        }
        (removed, true)
    }

    /// 取走全部记录（刷写路径写出时调用）
    pub fn drain_all(&mut self) -> Vec<RevokeRecord> {
        self.pending = 0;
        core::mem::take(&mut self.records)
    }
}
