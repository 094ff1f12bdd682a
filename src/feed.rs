//! 请求来源
//!
//! 路由器每处理一个到达就从来源里拉下一条。来源本身（统计分布或
//! 真实 trace）不属于核心逻辑；这里只给出接口和按时间表回放的实现。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::net::NodeId;
use crate::sim::SimTime;

/// 一次会话请求
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionRequest {
    /// 用户所在的接入节点
    pub host: NodeId,
    pub rate_bps: u64,
    pub size_bits: f64,
    pub channel: u32,
    /// 显式指定的源；None 表示拓扑的内容提供者
    pub source: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedRequest {
    pub at: SimTime,
    pub req: SessionRequest,
}

/// 请求到达序列
pub trait RequestFeed {
    /// 取下一条到达。`now` 是当前仿真时间，实现可以据此生成相对时间。
    fn next_request(&mut self, now: SimTime) -> Option<TimedRequest>;
}

/// 按预先给定的时间表回放
#[derive(Debug, Clone, Default)]
pub struct TraceFeed {
    items: VecDeque<TimedRequest>,
}

impl TraceFeed {
    /// 条目按到达时间排序（同时到达保持给定顺序）。
    pub fn new(mut items: Vec<TimedRequest>) -> Self {
        items.sort_by_key(|r| r.at);
        Self {
            items: items.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl RequestFeed for TraceFeed {
    fn next_request(&mut self, _now: SimTime) -> Option<TimedRequest> {
        self.items.pop_front()
    }
}
