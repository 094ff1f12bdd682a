//! 链路表
//!
//! 拓扑边上的链路在第一次有路径经过时惰性创建，此后一直存在。
//! 边是无向的：两个方向共用同一条链路。

use std::collections::HashMap;

use super::id::{LinkId, NodeId};
use super::link::Link;
use tracing::debug;

#[derive(Debug, Default)]
pub struct LinkTable {
    links: Vec<Link>,
    edges: HashMap<(NodeId, NodeId), LinkId>,
}

impl LinkTable {
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, id: LinkId) -> &Link {
        &self.links[id.0]
    }

    pub fn get_mut(&mut self, id: LinkId) -> &mut Link {
        &mut self.links[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    /// 为单条流添加一条私有接入链路
    pub fn add_access_link(&mut self, capacity: f64) -> LinkId {
        let id = LinkId(self.links.len());
        self.links.push(Link::new(id, capacity));
        id
    }

    /// 已经为 (a, b) 创建过的链路
    pub fn edge(&self, a: NodeId, b: NodeId) -> Option<LinkId> {
        self.edges.get(&edge_key(a, b)).copied()
    }

    /// 取得 (a, b) 边上的链路，不存在时按给定容量创建。
    pub fn edge_link(&mut self, a: NodeId, b: NodeId, capacity: f64, unlimited: bool) -> LinkId {
        let key = edge_key(a, b);
        if let Some(id) = self.edges.get(&key) {
            return *id;
        }
        let id = LinkId(self.links.len());
        let mut link = Link::new(id, capacity);
        link.unlimited = unlimited;
        link.endpoints = Some(key);
        self.links.push(link);
        self.edges.insert(key, id);
        debug!(link_id = ?id, a = ?key.0, b = ?key.1, capacity, unlimited, "创建拓扑链路");
        id
    }
}

fn edge_key(a: NodeId, b: NodeId) -> (NodeId, NodeId) {
    if a <= b { (a, b) } else { (b, a) }
}
