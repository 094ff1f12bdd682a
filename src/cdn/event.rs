//! 事件负载
//!
//! 带标签的事件枚举：每个事件指明拥有者（流、缓存节点或路由器）以及类型，
//! `CdnWorld::handle` 对其穷尽匹配后交给拥有者处理。

use crate::feed::SessionRequest;
use crate::net::{CacheId, StreamId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamEvent {
    Start,
    TransmissionComplete,
    /// 周期性尝试提升速率
    Expand,
    ConsumeBegin,
    SwitchToLive,
    ConsumeComplete,
    BufferEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheEvent {
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RouterEvent {
    SessionRequest(SessionRequest),
    NoiseRequest(SessionRequest),
    /// 停止产生新请求
    Finalize,
    PeriodicStats,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CdnEvent {
    Stream { id: StreamId, kind: StreamEvent },
    Cache { id: CacheId, kind: CacheEvent },
    Router(RouterEvent),
}

impl CdnEvent {
    pub fn stream(id: StreamId, kind: StreamEvent) -> Self {
        CdnEvent::Stream { id, kind }
    }
}
