//! 仿真器
//!
//! 定义事件驱动仿真器，维护当前时间与事件队列。
//!
//! 队列是以 `(时间, 序列号)` 为键的有序树（`BTreeMap`），另有一张
//! 句柄 -> 时间 的索引，因此插入、取消、重新调度与取最小值都是 O(log n)。

use super::error::SimError;
use super::scheduled_event::{EventId, EventKey, ScheduledEvent};
use super::time::SimTime;
use super::world::World;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, trace};

/// 运行结果摘要
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub events: u64,
    pub final_time: SimTime,
}

/// 事件驱动仿真器：维护当前时间与事件队列。
pub struct Simulator<E> {
    now: SimTime,
    next_seq: u64,
    q: BTreeMap<EventKey, E>,
    index: HashMap<EventId, SimTime>,
    dispatched: u64,
}

impl<E> Default for Simulator<E> {
    fn default() -> Self {
        Self {
            now: SimTime::ZERO,
            next_seq: 0,
            q: BTreeMap::new(),
            index: HashMap::new(),
            dispatched: 0,
        }
    }
}

impl<E> Simulator<E> {
    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn len(&self) -> usize {
        self.q.len()
    }

    pub fn is_empty(&self) -> bool {
        self.q.is_empty()
    }

    /// 已分发的事件总数
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn is_scheduled(&self, id: EventId) -> bool {
        self.index.contains_key(&id)
    }

    /// 事件当前的触发时间（未被调度时为 None）
    pub fn scheduled_at(&self, id: EventId) -> Option<SimTime> {
        self.index.get(&id).copied()
    }

    /// 下一个待分发事件的时间
    pub fn peek_time(&self) -> Option<SimTime> {
        self.q.keys().next().map(|k| k.at)
    }

    /// 调度事件在指定时间执行。早于当前时间的请求被钳制到当前时间。
    pub fn schedule(&mut self, at: SimTime, ev: E) -> EventId {
        let at = at.max(self.now);
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        trace!(now = ?self.now, seq, schedule_at = ?at, "调度事件");

        let key = EventKey { at, seq };
        self.q.insert(key, ev);
        self.index.insert(key.id(), at);
        key.id()
    }

    /// 取消一个尚未触发的事件，返回其负载。
    pub fn cancel(&mut self, id: EventId) -> Result<E, SimError> {
        let at = self.index.remove(&id).ok_or(SimError::UnknownEvent(id))?;
        let ev = self
            .q
            .remove(&EventKey { at, seq: id.0 })
            .ok_or(SimError::UnknownEvent(id))?;
        trace!(seq = id.0, at = ?at, "取消事件");
        Ok(ev)
    }

    /// 修改事件触发时间（移除后按新键重新插入，保留原序列号）。
    pub fn reschedule(&mut self, id: EventId, at: SimTime) -> Result<(), SimError> {
        let at = at.max(self.now);
        let old = self.index.get_mut(&id).ok_or(SimError::UnknownEvent(id))?;
        if *old == at {
            return Ok(());
        }
        let ev = self
            .q
            .remove(&EventKey { at: *old, seq: id.0 })
            .ok_or(SimError::UnknownEvent(id))?;
        trace!(seq = id.0, from = ?*old, to = ?at, "重新调度事件");
        *old = at;
        self.q.insert(EventKey { at, seq: id.0 }, ev);
        Ok(())
    }

    /// 取出 `(时间, 序列号)` 最小的事件并推进时钟。
    pub fn pop_min(&mut self) -> Option<ScheduledEvent<E>> {
        let (key, ev) = self.q.pop_first()?;
        self.index.remove(&key.id());
        self.now = key.at;
        Some(ScheduledEvent {
            id: key.id(),
            at: key.at,
            ev,
        })
    }

    /// 运行直到事件队列为空、世界报告完成或到达 `until`。
    pub fn run_until<W>(&mut self, until: SimTime, world: &mut W) -> Result<RunSummary, SimError>
    where
        W: World<Event = E>,
    {
        let start = self.dispatched;
        while !world.is_done() {
            match self.peek_time() {
                Some(at) if at <= until => {}
                _ => break,
            }
            let Some(item) = self.pop_min() else {
                break;
            };
            self.dispatched += 1;
            world.handle(item.ev, self)?;
        }
        self.now = self.now.max(until);
        Ok(RunSummary {
            events: self.dispatched - start,
            final_time: self.now,
        })
    }

    /// 运行所有事件直到队列为空或世界报告完成。
    #[tracing::instrument(skip(self, world))]
    pub fn run<W>(&mut self, world: &mut W) -> Result<RunSummary, SimError>
    where
        W: World<Event = E>,
    {
        info!("▶️  开始运行仿真");
        debug!(now = ?self.now, queue_size = self.q.len(), "初始状态");

        let start = self.dispatched;
        while !world.is_done() {
            let Some(item) = self.pop_min() else {
                break;
            };
            self.dispatched += 1;
            trace!(
                event_num = self.dispatched,
                now = ?self.now,
                seq = item.id.0,
                remaining_queue = self.q.len(),
                "执行事件"
            );
            world.handle(item.ev, self)?;
        }

        let summary = RunSummary {
            events: self.dispatched - start,
            final_time: self.now,
        };
        info!(
            total_events = summary.events,
            final_time = ?summary.final_time,
            pending = self.q.len(),
            "✅ 仿真完成"
        );
        Ok(summary)
    }
}
