//! 数据流
//!
//! 一条活跃的数据流（用户流、缓存回源流或背景噪声流）沿一串链路传输。
//! 下载/播放计数采用“拉取式”惰性更新：只在读取或依赖计算前通过
//! [`Stream::advance`] 按 `经过时间 * 速率` 推进。
//!
//! 状态机本身（事件处理与定时器级联）在 `cdn::stream_fsm` 中实现。

use serde::{Deserialize, Serialize};

use super::bottleneck::ProbeTiming;
use super::id::{CacheId, LinkId, NodeId, StreamId};
use crate::sim::{EventId, SimError, SimTime};

/// 缓冲区容差：绝对值小于 1 bit 视为 0，吸收浮点漂移。
pub const BUFFER_TOLERANCE_BITS: f64 = 1.0;

/// 缓冲耗尽时间几何级数求和的精度（秒）
const BUFFER_EMPTY_ACCURACY_SECS: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Normal,
    Cache,
    Noise,
}

/// 每个语义定时器槽位最多一个未触发事件；None 表示“未调度”。
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamTimers {
    pub start: Option<EventId>,
    pub transmission_complete: Option<EventId>,
    pub buffer_empty: Option<EventId>,
    pub consume_begin: Option<EventId>,
    pub consume_complete: Option<EventId>,
    pub switch_to_live: Option<EventId>,
    pub expand: Option<EventId>,
}

impl StreamTimers {
    pub fn iter(&self) -> impl Iterator<Item = EventId> {
        [
            self.start,
            self.transmission_complete,
            self.buffer_empty,
            self.consume_begin,
            self.consume_complete,
            self.switch_to_live,
            self.expand,
        ]
        .into_iter()
        .flatten()
    }

    pub fn take_all(&mut self) -> Vec<EventId> {
        let ids = self.iter().collect();
        *self = StreamTimers::default();
        ids
    }
}

/// 单条流的统计
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamStats {
    /// 从请求到第一次开始播放的时长
    pub startup_delay: Option<f64>,
    pub buffering_time: f64,
    pub buffering_events: u32,
    sum_rate_time: f64,
    sum_time: f64,
    last_rate_change: SimTime,
}

impl StreamStats {
    /// 时间加权平均传输速率
    pub fn avg_transmit_rate(&self) -> f64 {
        if self.sum_time > 0.0 {
            self.sum_rate_time / self.sum_time
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stream {
    pub id: StreamId,
    pub kind: StreamKind,
    pub channel: u32,
    /// 源（内容提供者）
    pub src: NodeId,
    /// 目的（用户接入节点或缓存所在节点）
    pub dst: NodeId,
    /// 名义码率档位
    pub rate_bps: u64,
    /// 播放码率，生命周期内不变
    pub consume_rate: f64,
    /// 总大小；缓存回源流没有固定大小
    pub size_bits: f64,
    pub transmit_rate: f64,
    pub downloaded_bits: f64,
    pub consumed_bits: f64,
    transmit_point: SimTime,
    consume_point: SimTime,
    pub links: Vec<LinkId>,
    pub bottleneck: Option<LinkId>,
    pub being_transmitted: bool,
    pub being_consumed: bool,
    pub transmitting_live: bool,
    /// 播放已经完整结束
    pub consume_done: bool,
    pub connected_to_cache: bool,
    /// 为本流提供数据的缓存
    pub up_cache: Option<CacheId>,
    /// 本流（作为回源流）为之供数的缓存
    pub down_cache: Option<CacheId>,
    pub timers: StreamTimers,
    pub probe: ProbeTiming,
    /// 正在缓冲：开始时间（首次为请求到达时间）
    pub buffering_since: Option<SimTime>,
    pub requested_at: SimTime,
    pub stats: StreamStats,
}

impl Stream {
    pub fn new(
        id: StreamId,
        kind: StreamKind,
        src: NodeId,
        dst: NodeId,
        rate_bps: u64,
        size_bits: f64,
        channel: u32,
        now: SimTime,
    ) -> Self {
        Self {
            id,
            kind,
            channel,
            src,
            dst,
            rate_bps,
            consume_rate: rate_bps as f64,
            size_bits,
            transmit_rate: 0.0,
            downloaded_bits: 0.0,
            consumed_bits: 0.0,
            transmit_point: now,
            consume_point: now,
            links: Vec::new(),
            bottleneck: None,
            being_transmitted: false,
            being_consumed: false,
            transmitting_live: false,
            consume_done: false,
            connected_to_cache: false,
            up_cache: None,
            down_cache: None,
            timers: StreamTimers::default(),
            probe: ProbeTiming::default(),
            buffering_since: Some(now),
            requested_at: now,
            stats: StreamStats::default(),
        }
    }

    /// 把下载/播放计数推进到 `now`（使用当前速率）。
    pub fn advance(&mut self, now: SimTime) {
        if self.being_transmitted {
            self.downloaded_bits += now.secs_since(self.transmit_point) * self.transmit_rate;
            self.transmit_point = now;
        }
        if self.being_consumed {
            // 直播模式下回源流拿不满码率时，按实际到达速率“播放”
            let rate = if self.kind == StreamKind::Cache
                && self.transmitting_live
                && self.consume_rate > self.transmit_rate
            {
                self.transmit_rate
            } else {
                self.consume_rate
            };
            self.consumed_bits += now.secs_since(self.consume_point) * rate;
            self.consume_point = now;
        }
    }

    pub fn begin_transmission(&mut self, now: SimTime) {
        self.being_transmitted = true;
        self.transmit_point = now;
        self.stats.last_rate_change = now;
    }

    pub fn begin_consumption(&mut self, now: SimTime) {
        self.being_consumed = true;
        self.consume_point = now;
    }

    /// 累积时间加权速率，然后切换到新速率。调用前须已 `advance`。
    pub fn record_rate(&mut self, now: SimTime, new_rate: f64) {
        let dt = now.secs_since(self.stats.last_rate_change);
        self.stats.sum_rate_time += dt * self.transmit_rate;
        self.stats.sum_time += dt;
        self.stats.last_rate_change = now;
        self.transmit_rate = new_rate;
    }

    /// 已缓冲的数据量（容差带内归零）
    pub fn in_buffer(&self) -> f64 {
        let b = self.downloaded_bits - self.consumed_bits;
        if b.abs() < BUFFER_TOLERANCE_BITS { 0.0 } else { b }
    }

    /// 尚未下载的数据量
    pub fn remaining_bits(&self) -> f64 {
        (self.size_bits - self.downloaded_bits).max(0.0)
    }

    /// 开始播放所需的缓冲目标。
    ///
    /// `consume_rate * cache_seconds`，非缓存流不超过“已缓冲 + 未下载”，
    /// 且不低于已缓冲量。
    pub fn target_buffer(&self, cache_seconds: f64) -> f64 {
        let in_buffer = self.in_buffer();
        let mut target = self.consume_rate * cache_seconds;
        if self.kind != StreamKind::Cache {
            target = target.min(in_buffer + self.remaining_bits());
        }
        target.max(in_buffer)
    }
}

/// 缓冲区以 `vi` 注入、`vo` 排出时，从 `buffered` 到耗尽的时间。
///
/// 按“边下边播”的几何级数前 N 项求和（N 由精度决定）。`vi >= vo` 时级数
/// 发散，缓冲永不耗尽，此时请求投影是逻辑错误。
pub fn buffer_empty_time(buffered: f64, vi: f64, vo: f64) -> Result<f64, SimError> {
    if vi >= vo {
        return Err(SimError::BufferCannotEmpty {
            stream: None,
            transmit_rate: vi,
            consume_rate: vo,
        });
    }
    let t0 = buffered / vo;
    if vi > 0.0 {
        let b = vi / vo;
        let n = (BUFFER_EMPTY_ACCURACY_SECS.ln() / b.ln()).ceil();
        Ok(t0 * (1.0 - b.powf(n)) / (1.0 - b))
    } else {
        Ok(t0)
    }
}
