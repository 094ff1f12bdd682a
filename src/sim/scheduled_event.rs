//! 调度事件
//!
//! 定义事件句柄与排序键。队列按 `(时间, 序列号)` 的字典序出队，
//! 序列号在创建时分配且在重新调度时保持不变，用来确定性地打破同时刻的平局。

use super::time::SimTime;

/// 已调度事件的句柄（即其创建时分配的序列号）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventId(pub u64);

/// 队列排序键。字段顺序即比较顺序：先时间，再序列号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub at: SimTime,
    pub seq: u64,
}

impl EventKey {
    pub fn id(&self) -> EventId {
        EventId(self.seq)
    }
}

/// 出队后的事件。
#[derive(Debug)]
pub struct ScheduledEvent<E> {
    pub id: EventId,
    pub at: SimTime,
    pub ev: E,
}
