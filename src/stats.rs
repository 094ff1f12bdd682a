//! 统计信息
//!
//! 仿真过程中产生的全部统计记录，可以整体序列化为 JSON。

use serde::{Deserialize, Serialize};

use crate::net::{CacheId, NodeId, StreamId, StreamKind};

/// 一条用户流完成播放时的记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRecord {
    pub kind: StreamKind,
    pub id: StreamId,
    pub channel: u32,
    /// 启动时延（秒）
    pub start_time: f64,
    pub buffering_time: f64,
    pub buffering_events: u32,
    /// 名义播放时长 `size / consume_rate`
    pub play_duration: f64,
    pub avg_transmit_rate: f64,
    pub consume_rate: f64,
    pub connected_to_cache: bool,
    pub src: NodeId,
    pub dst: NodeId,
}

/// 一个缓存节点被拆除时的记录
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub node: NodeId,
    pub cache_id: CacheId,
    pub max_throughput: f64,
    pub max_connections: u32,
}

/// 缓存站点（拓扑节点）的汇总，运行结束时输出
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteRecord {
    pub node: NodeId,
    pub max_connections: u32,
    pub max_throughput: f64,
    pub max_caches: u32,
}

/// 周期采样
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSample {
    pub time: f64,
    pub active_sessions: u64,
    pub active_noise: u64,
    /// 自上次采样以来接纳的请求数
    pub requests: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimStats {
    pub streams: Vec<StreamRecord>,
    pub caches: Vec<CacheRecord>,
    pub sites: Vec<SiteRecord>,
    pub samples: Vec<StatsSample>,
}

/// 一行摘要
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub sessions: usize,
    pub cached_sessions: usize,
    pub mean_start_time: f64,
    pub total_buffering_events: u64,
    pub caches_torn_down: usize,
}

impl SimStats {
    pub fn summary(&self) -> StatsSummary {
        let sessions = self.streams.len();
        let mean_start_time = if sessions > 0 {
            self.streams.iter().map(|r| r.start_time).sum::<f64>() / sessions as f64
        } else {
            0.0
        };
        StatsSummary {
            sessions,
            cached_sessions: self.streams.iter().filter(|r| r.connected_to_cache).count(),
            mean_start_time,
            total_buffering_events: self.streams.iter().map(|r| r.buffering_events as u64).sum(),
            caches_torn_down: self.caches.len(),
        }
    }
}
