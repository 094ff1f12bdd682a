//! 拓扑图与最短路径
//!
//! 节点是 AS 级拓扑节点（接入/内容/转接），边无向。最短路径按跳数，
//! 用 BFS 求得；邻居按加边顺序遍历，同长路径中总是选先加入的那条，
//! 因此结果在多次运行间稳定。

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::net::NodeId;

/// 拓扑节点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Access,
    Content,
    Transit,
}

/// 核心逻辑需要的拓扑接口。
pub trait TopologyProvider {
    /// `from` 到 `to` 的最短路径（含两端）；不可达时为 None。
    fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>>;
    fn node_kind(&self, node: NodeId) -> NodeKind;
    /// 节点被预先选为静态缓存站点
    fn is_static_cache(&self, node: NodeId) -> bool;
    /// 默认的内容提供者（用户会话的源）
    fn content_provider(&self) -> NodeId;
}

#[derive(Debug, Clone)]
struct TopoNode {
    name: String,
    kind: NodeKind,
    static_cache: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<TopoNode>,
    adj: Vec<Vec<NodeId>>,
    by_name: HashMap<String, NodeId>,
    content_provider: Option<NodeId>,
}

impl Topology {
    pub fn add_node(&mut self, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        let name = name.into();
        self.by_name.insert(name.clone(), id);
        self.nodes.push(TopoNode {
            name,
            kind,
            static_cache: false,
        });
        self.adj.push(Vec::new());
        if kind == NodeKind::Content && self.content_provider.is_none() {
            self.content_provider = Some(id);
        }
        id
    }

    /// 添加无向边（重复边忽略）
    pub fn connect(&mut self, a: NodeId, b: NodeId) {
        if a == b || self.adj[a.0].contains(&b) {
            return;
        }
        self.adj[a.0].push(b);
        self.adj[b.0].push(a);
    }

    pub fn set_static_cache(&mut self, node: NodeId, on: bool) {
        self.nodes[node.0].static_cache = on;
    }

    pub fn set_content_provider(&mut self, node: NodeId) {
        self.content_provider = Some(node);
    }

    pub fn lookup(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, id: NodeId) -> &str {
        &self.nodes[id.0].name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        &self.adj[id.0]
    }

    pub fn has_content_provider(&self) -> bool {
        self.content_provider.is_some()
    }
}

impl TopologyProvider for Topology {
    fn shortest_path(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let n = self.nodes.len();
        if from.0 >= n || to.0 >= n {
            return None;
        }
        if from == to {
            return Some(vec![from]);
        }

        // 从 from 出发做 BFS，记录前驱，到达 to 即停止
        let mut prev: Vec<Option<NodeId>> = vec![None; n];
        let mut seen = vec![false; n];
        let mut q = VecDeque::new();
        seen[from.0] = true;
        q.push_back(from);
        while let Some(v) = q.pop_front() {
            if v == to {
                break;
            }
            for &nb in &self.adj[v.0] {
                if !seen[nb.0] {
                    seen[nb.0] = true;
                    prev[nb.0] = Some(v);
                    q.push_back(nb);
                }
            }
        }
        if !seen[to.0] {
            return None;
        }

        let mut path = vec![to];
        let mut cur = to;
        while let Some(p) = prev[cur.0] {
            path.push(p);
            cur = p;
        }
        path.reverse();
        Some(path)
    }

    fn node_kind(&self, node: NodeId) -> NodeKind {
        self.nodes[node.0].kind
    }

    fn is_static_cache(&self, node: NodeId) -> bool {
        self.nodes[node.0].static_cache
    }

    fn content_provider(&self) -> NodeId {
        self.content_provider.unwrap_or(NodeId(0))
    }
}
