//! 仿真配置
//!
//! 核心逻辑识别的全部选项。每个字段都有默认值，场景文件只需写出要改的项。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::net::ProbePolicy;
use crate::sim::SimTime;

/// 流媒体模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// 直播：缓冲填满后跟随直播码率，可经缓存节点复用上游
    #[default]
    Live,
    /// 点播：可以一直预取到内容结束
    Vod,
}

/// 配置/输入错误：启动时报告一次并终止运行。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid option {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown node {0:?}")]
    UnknownNode(String),

    #[error("no route from {host:?} to {target:?}")]
    Unreachable { host: String, target: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// 开始播放所需的缓冲深度（秒）
    pub cache_seconds: f64,
    /// 按需缓存节点的启动时延（秒）
    pub cache_init_latency: f64,
    /// 节点每频道请求数达到此值时放置缓存
    pub cache_request_threshold: u32,
    pub hierarchical_caches: bool,
    pub on_demand_caches: bool,
    /// 缓存启动期间到达的流排队等待；否则直接回源
    pub wait_for_cache_boot: bool,
    /// 只在路径第一个节点计数/放置缓存
    pub local_cache_only: bool,
    pub streaming_mode: StreamingMode,
    /// 拓扑边链路视为无限容量
    pub unlimited_backbone_capacity: bool,
    pub expand_interval: f64,
    pub propagation_delay_per_hop: f64,
    pub lan_link_rate: f64,
    pub backbone_link_rate: f64,
    pub fast_backbone_link_rate: f64,
    pub parallel_probe: bool,
    pub parallel_min_path_len: usize,
    pub stats_interval: f64,
    /// 背景噪声流的目标并发数；0 表示按请求时间表全部放出
    pub noise_population: usize,
    /// 停止产生新请求的时间
    pub end_time: Option<f64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            cache_seconds: 10.0,
            cache_init_latency: 0.1,
            cache_request_threshold: 1,
            hierarchical_caches: false,
            on_demand_caches: false,
            wait_for_cache_boot: true,
            local_cache_only: true,
            streaming_mode: StreamingMode::Live,
            unlimited_backbone_capacity: false,
            expand_interval: 1.0,
            propagation_delay_per_hop: 0.01,
            lan_link_rate: 25e6,
            backbone_link_rate: 10e9,
            fast_backbone_link_rate: 40e9,
            parallel_probe: false,
            parallel_min_path_len: 8,
            stats_interval: 1.0,
            noise_population: 0,
            end_time: None,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("cache_seconds", self.cache_seconds),
            ("expand_interval", self.expand_interval),
            ("lan_link_rate", self.lan_link_rate),
            ("backbone_link_rate", self.backbone_link_rate),
            ("fast_backbone_link_rate", self.fast_backbone_link_rate),
            ("stats_interval", self.stats_interval),
        ];
        for (field, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(invalid(field, format!("must be positive, got {v}")));
            }
        }
        let non_negative = [
            ("cache_init_latency", self.cache_init_latency),
            ("propagation_delay_per_hop", self.propagation_delay_per_hop),
        ];
        for (field, v) in non_negative {
            if !(v.is_finite() && v >= 0.0) {
                return Err(invalid(field, format!("must not be negative, got {v}")));
            }
        }
        if self.cache_request_threshold == 0 {
            return Err(invalid("cache_request_threshold", "must be at least 1"));
        }
        if let Some(t) = self.end_time {
            if !(t.is_finite() && t >= 0.0) {
                return Err(invalid("end_time", format!("must not be negative, got {t}")));
            }
        }
        Ok(())
    }

    pub fn is_live(&self) -> bool {
        self.streaming_mode == StreamingMode::Live
    }

    pub fn probe_policy(&self) -> ProbePolicy {
        ProbePolicy {
            parallel: self.parallel_probe,
            min_parallel_path: self.parallel_min_path_len,
        }
    }

    pub fn propagation_delay(&self) -> SimTime {
        SimTime::from_secs_f64(self.propagation_delay_per_hop)
    }
}
