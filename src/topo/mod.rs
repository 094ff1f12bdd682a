//! 拓扑模块
//!
//! 拓扑提供者接口、内存中的拓扑图以及常用拓扑构建器。

mod graph;
mod star;

pub use graph::{NodeKind, Topology, TopologyProvider};
pub use star::{StarOpts, StarTopology, build_star};
