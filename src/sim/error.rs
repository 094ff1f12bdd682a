//! 致命错误分类
//!
//! 这些错误都表示核心逻辑缺陷而非输入问题：一旦出现，仿真立即中止。

use crate::net::{CacheId, NodeId, StreamId};

use super::scheduled_event::EventId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error("event {0:?} is not owned by the scheduler")]
    UnknownEvent(EventId),

    #[error(
        "stream {stream:?}: buffer cannot empty (transmit {transmit_rate} b/s >= consume {consume_rate} b/s)"
    )]
    BufferCannotEmpty {
        stream: Option<StreamId>,
        transmit_rate: f64,
        consume_rate: f64,
    },

    #[error("stream {0:?} does not exist")]
    UnknownStream(StreamId),

    #[error("cache {0:?} does not exist")]
    UnknownCache(CacheId),

    #[error("stream {0:?} has an empty path")]
    EmptyPath(StreamId),

    #[error("no route from {from:?} to {to:?}")]
    NoRoute { from: NodeId, to: NodeId },

    #[error("stream {stream:?}: non-finite {what} projection")]
    NonFiniteProjection { stream: StreamId, what: &'static str },
}
