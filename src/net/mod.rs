//! 网络模型模块
//!
//! 此模块包含流级网络模型的组件：标识符、共享容量链路、数据流以及瓶颈探测。

// 子模块声明
mod bottleneck;
mod id;
mod link;
mod links;
mod stream;
mod streams;

// 重新导出公共接口
pub use bottleneck::{Bottleneck, ProbePolicy, ProbeTiming, probe, probe_parallel, probe_sequential};
pub use id::{CacheId, LinkId, NodeId, StreamId};
pub use link::{FlowState, Link};
pub use links::LinkTable;
pub use stream::{BUFFER_TOLERANCE_BITS, Stream, StreamKind, StreamStats, StreamTimers, buffer_empty_time};
pub use streams::StreamTable;
