//! 缓存节点
//!
//! 每个 (拓扑节点, 频道) 最多一个缓存节点。缓存节点把同一码率/频道的
//! 多个下游消费流复用到一条上游回源流上。这里只有数据结构与统计；
//! 挂接/摘除逻辑需要同时改动流与链路，在 `caching` 中实现。

use std::collections::{BTreeMap, HashMap};

use crate::net::{CacheId, NodeId, StreamId};
use crate::sim::SimError;

/// 槽位键：码率档位 + 频道
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotKey {
    pub rate_bps: u64,
    pub channel: u32,
}

/// 一条上游回源流及依赖它的下游流
#[derive(Debug, Clone)]
pub struct CacheSlot {
    pub upstream: StreamId,
    pub consumers: Vec<StreamId>,
}

#[derive(Debug, Clone)]
pub struct CacheNode {
    pub id: CacheId,
    pub node: NodeId,
    pub channel: u32,
    /// 静态站点上的缓存不会被拆除
    pub pinned: bool,
    pub ready: bool,
    /// 启动期间到达、等待挂接的流
    pub waiting: Vec<StreamId>,
    pub slots: BTreeMap<SlotKey, CacheSlot>,
    pub connections: u32,
    pub throughput: f64,
    pub max_connections: u32,
    pub max_throughput: f64,
}

impl CacheNode {
    pub fn new(id: CacheId, node: NodeId, channel: u32, pinned: bool) -> Self {
        Self {
            id,
            node,
            channel,
            pinned,
            ready: false,
            waiting: Vec::new(),
            slots: BTreeMap::new(),
            connections: 0,
            throughput: 0.0,
            max_connections: 0,
            max_throughput: 0.0,
        }
    }

    /// 一个消费流所在槽位的上游流
    pub fn upstream(&self, key: SlotKey) -> Option<StreamId> {
        self.slots.get(&key).map(|s| s.upstream)
    }

    pub fn dependents(&self) -> usize {
        self.slots.values().map(|s| s.consumers.len()).sum::<usize>() + self.waiting.len()
    }
}

/// 缓存站点：一个拓扑节点上所有缓存节点的汇总
#[derive(Debug, Clone, Default)]
pub struct CacheSite {
    /// 频道 -> 缓存节点
    pub caches: BTreeMap<u32, CacheId>,
    /// 频道 -> 经过此节点的请求计数
    pub request_counts: HashMap<u32, u32>,
    pub connections: u32,
    pub max_connections: u32,
    pub throughput: f64,
    pub max_throughput: f64,
    pub vms: u32,
    pub max_vms: u32,
}

impl CacheSite {
    pub fn request_count(&self, channel: u32) -> u32 {
        self.request_counts.get(&channel).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct CacheTable {
    nodes: HashMap<CacheId, CacheNode>,
    pub sites: BTreeMap<NodeId, CacheSite>,
    next_id: u64,
}

impl CacheTable {
    pub fn get(&self, id: CacheId) -> Result<&CacheNode, SimError> {
        self.nodes.get(&id).ok_or(SimError::UnknownCache(id))
    }

    pub fn get_mut(&mut self, id: CacheId) -> Result<&mut CacheNode, SimError> {
        self.nodes.get_mut(&id).ok_or(SimError::UnknownCache(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CacheNode> {
        self.nodes.values()
    }

    pub fn site(&self, node: NodeId) -> Option<&CacheSite> {
        self.sites.get(&node)
    }

    /// 节点上该频道已有的缓存
    pub fn at(&self, node: NodeId, channel: u32) -> Option<CacheId> {
        self.sites.get(&node).and_then(|s| s.caches.get(&channel).copied())
    }

    /// 请求计数加一，返回新值
    pub fn bump_requests(&mut self, node: NodeId, channel: u32) -> u32 {
        let count = self
            .sites
            .entry(node)
            .or_default()
            .request_counts
            .entry(channel)
            .or_insert(0);
        *count += 1;
        *count
    }

    /// 新建缓存节点并登记到站点
    pub fn create(&mut self, node: NodeId, channel: u32, pinned: bool) -> CacheId {
        let id = CacheId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, CacheNode::new(id, node, channel, pinned));
        let site = self.sites.entry(node).or_default();
        site.caches.insert(channel, id);
        site.vms += 1;
        site.max_vms = site.max_vms.max(site.vms);
        id
    }

    /// 拆除缓存节点：从站点注销并把该频道的请求计数清零
    pub fn remove(&mut self, id: CacheId) -> Result<CacheNode, SimError> {
        let cache = self.nodes.remove(&id).ok_or(SimError::UnknownCache(id))?;
        if let Some(site) = self.sites.get_mut(&cache.node) {
            site.caches.remove(&cache.channel);
            site.request_counts.insert(cache.channel, 0);
            site.vms = site.vms.saturating_sub(1);
        }
        Ok(cache)
    }

    pub fn connect(&mut self, id: CacheId) -> Result<(), SimError> {
        let cache = self.nodes.get_mut(&id).ok_or(SimError::UnknownCache(id))?;
        cache.connections += 1;
        cache.max_connections = cache.max_connections.max(cache.connections);
        let site = self.sites.entry(cache.node).or_default();
        site.connections += 1;
        site.max_connections = site.max_connections.max(site.connections);
        Ok(())
    }

    pub fn disconnect(&mut self, id: CacheId) -> Result<(), SimError> {
        let cache = self.nodes.get_mut(&id).ok_or(SimError::UnknownCache(id))?;
        cache.connections = cache.connections.saturating_sub(1);
        if let Some(site) = self.sites.get_mut(&cache.node) {
            site.connections = site.connections.saturating_sub(1);
        }
        Ok(())
    }

    /// 下游流速率变化时更新缓存与站点的吞吐统计
    pub fn update_throughput(&mut self, id: CacheId, old_rate: f64, new_rate: f64) -> Result<(), SimError> {
        let cache = self.nodes.get_mut(&id).ok_or(SimError::UnknownCache(id))?;
        let delta = new_rate - old_rate;
        cache.throughput += delta;
        cache.max_throughput = cache.max_throughput.max(cache.throughput);
        let site = self.sites.entry(cache.node).or_default();
        site.throughput += delta;
        site.max_throughput = site.max_throughput.max(site.throughput);
        Ok(())
    }
}
