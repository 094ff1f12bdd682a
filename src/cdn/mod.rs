//! CDN 仿真模块
//!
//! 事件负载、流状态机、缓存节点层级与路由器，都挂在 [`CdnWorld`] 上。

mod cache;
mod caching;
mod event;
mod router;
mod stream_fsm;
mod world;

pub use cache::{CacheNode, CacheSite, CacheSlot, CacheTable, SlotKey};
pub use event::{CacheEvent, CdnEvent, RouterEvent, StreamEvent};
pub use router::RouterState;
pub use world::CdnWorld;
