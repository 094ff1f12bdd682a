//! 星形拓扑构建
//!
//! 拓扑结构：cp <-> core <-> a{0..n}
//!
//! 一个内容提供者经一个转接节点连到若干接入节点，是最小的
//! “多用户共享一段骨干”的场景。

use super::graph::{NodeKind, Topology};
use crate::net::NodeId;

/// 星形拓扑配置选项
#[derive(Debug, Clone)]
pub struct StarOpts {
    pub access_nodes: usize,
    /// 所有接入节点都是静态缓存站点
    pub static_cache_at_access: bool,
    /// 转接节点是静态缓存站点
    pub static_cache_at_core: bool,
}

impl Default for StarOpts {
    fn default() -> Self {
        Self {
            access_nodes: 2,
            static_cache_at_access: false,
            static_cache_at_core: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StarTopology {
    pub topo: Topology,
    pub provider: NodeId,
    pub core: NodeId,
    pub access: Vec<NodeId>,
}

/// 构建星形拓扑
pub fn build_star(opts: &StarOpts) -> StarTopology {
    let mut topo = Topology::default();
    let provider = topo.add_node("cp", NodeKind::Content);
    let core = topo.add_node("core", NodeKind::Transit);
    topo.connect(provider, core);
    topo.set_static_cache(core, opts.static_cache_at_core);

    let access = (0..opts.access_nodes)
        .map(|i| {
            let a = topo.add_node(format!("a{i}"), NodeKind::Access);
            topo.connect(core, a);
            topo.set_static_cache(a, opts.static_cache_at_access);
            a
        })
        .collect();

    StarTopology {
        topo,
        provider,
        core,
        access,
    }
}
