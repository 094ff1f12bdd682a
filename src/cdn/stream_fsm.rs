//! 流状态机
//!
//! 流的生命周期：`空闲 -> 传输中 -> {缓冲 <-> 播放} -> 完成`，外加正交的
//! “跟随直播码率”标志。
//!
//! 任何改变 `transmit_rate` 的调用都按同一顺序进行：先用旧速率把计数推进到
//! 当前时间，记录新速率，再根据当前状态重算所有依赖定时器（不再适用的取消，
//! 触发时间变化的重新调度）。定时器槽位为 None 即表示未调度。

use tracing::{debug, trace, warn};

use super::event::{CdnEvent, StreamEvent};
use super::world::CdnWorld;
use crate::net::{BUFFER_TOLERANCE_BITS, Bottleneck, StreamId, StreamKind, buffer_empty_time, probe};
use crate::sim::{EventId, SimError, SimTime, Simulator};
use crate::stats::StreamRecord;

type Sim = Simulator<CdnEvent>;

/// 以 `rate` 传输/消耗 `bits` 所需的秒数；速率为 0 时永远达不到。
fn secs_at_rate(bits: f64, rate: f64) -> f64 {
    if bits <= 0.0 {
        0.0
    } else if rate > 0.0 {
        bits / rate
    } else {
        f64::INFINITY
    }
}

/// `now + secs`。无穷远表示“不会发生”，NaN 是逻辑错误。
fn project(sid: StreamId, now: SimTime, secs: f64, what: &'static str) -> Result<Option<SimTime>, SimError> {
    if secs.is_nan() {
        return Err(SimError::NonFiniteProjection { stream: sid, what });
    }
    if secs.is_infinite() {
        return Ok(None);
    }
    Ok(Some(now.after_secs(secs.max(0.0))))
}

/// 槽位已有事件时重新调度，否则新建。`at` 为 None 时取消。
fn arm(sim: &mut Sim, slot: &mut Option<EventId>, at: Option<SimTime>, ev: CdnEvent) -> Result<(), SimError> {
    match (at, *slot) {
        (Some(at), Some(id)) => sim.reschedule(id, at),
        (Some(at), None) => {
            *slot = Some(sim.schedule(at, ev));
            Ok(())
        }
        (None, _) => disarm(sim, slot),
    }
}

fn disarm(sim: &mut Sim, slot: &mut Option<EventId>) -> Result<(), SimError> {
    if let Some(id) = slot.take() {
        sim.cancel(id)?;
    }
    Ok(())
}

impl CdnWorld {
    #[tracing::instrument(skip(self, sim), fields(now = ?sim.now()))]
    pub(crate) fn on_stream_event(&mut self, sid: StreamId, kind: StreamEvent, sim: &mut Sim) -> Result<(), SimError> {
        // 已触发的事件不再属于调度器
        let timers = &mut self.streams.get_mut(sid)?.timers;
        match kind {
            StreamEvent::Start => timers.start = None,
            StreamEvent::TransmissionComplete => timers.transmission_complete = None,
            StreamEvent::Expand => timers.expand = None,
            StreamEvent::ConsumeBegin => timers.consume_begin = None,
            StreamEvent::SwitchToLive => timers.switch_to_live = None,
            StreamEvent::ConsumeComplete => timers.consume_complete = None,
            StreamEvent::BufferEmpty => timers.buffer_empty = None,
        }

        match kind {
            StreamEvent::Start => self.start_transmission(sid, sim),
            StreamEvent::TransmissionComplete => self.complete_transmission(sid, sim),
            StreamEvent::Expand => self.on_expand(sid, sim),
            StreamEvent::ConsumeBegin => self.on_consume_begin(sid, sim),
            StreamEvent::SwitchToLive => {
                self.streams.get_mut(sid)?.transmitting_live = true;
                self.try_use_max_rate(sid, sim)
            }
            StreamEvent::ConsumeComplete => self.on_consume_complete(sid, sim),
            StreamEvent::BufferEmpty => self.on_buffer_empty(sid, sim),
        }
    }

    /// 调度开始传输；已有更早的待触发开始事件时保持不变。
    pub fn schedule_start(&mut self, sid: StreamId, at: SimTime, sim: &mut Sim) -> Result<(), SimError> {
        let s = self.streams.get_mut(sid)?;
        match s.timers.start {
            Some(id) => match sim.scheduled_at(id) {
                Some(cur) if cur <= at => Ok(()),
                Some(_) => sim.reschedule(id, at),
                None => Err(SimError::UnknownEvent(id)),
            },
            None => {
                s.timers.start = Some(sim.schedule(at, CdnEvent::stream(sid, StreamEvent::Start)));
                Ok(())
            }
        }
    }

    /// 求路径瓶颈并记录到流上
    fn probe_bottleneck(&mut self, sid: StreamId, new_streams: usize) -> Result<Bottleneck, SimError> {
        let policy = self.cfg.probe_policy();
        let s = self.streams.get(sid)?;
        let path = s.links.clone();
        let mut timing = s.probe;
        let found = probe(&path, &self.links, new_streams, &self.streams, policy, &mut timing)
            .ok_or(SimError::EmptyPath(sid))?;
        let s = self.streams.get_mut(sid)?;
        s.probe = timing;
        s.bottleneck = Some(found.link);
        Ok(found)
    }

    fn start_transmission(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let s = self.streams.get_mut(sid)?;
        if s.being_transmitted {
            debug!(stream = ?sid, "已在传输，忽略重复的开始事件");
            return Ok(());
        }
        s.begin_transmission(now);

        let found = self.probe_bottleneck(sid, 1)?;
        let rate = found.rate.max(0.0);
        trace!(stream = ?sid, bottleneck = ?found.link, rate, "开始传输");
        self.set_transmit_rate(sid, rate, sim)?;

        // 新流只压低已有流，不直接提升它们
        let path = self.streams.get(sid)?.links.clone();
        for link in path {
            let depressed = self.links.get(link).allocate_for_new_stream(rate, &self.streams);
            for other in depressed {
                self.set_transmit_rate(other, rate, sim)?;
            }
            self.links.get_mut(link).attach(sid);
        }

        let at = now.after_secs(self.cfg.expand_interval);
        let s = self.streams.get_mut(sid)?;
        arm(sim, &mut s.timers.expand, Some(at), CdnEvent::stream(sid, StreamEvent::Expand))
    }

    /// 结束传输：速率归零、离开所有链路并从上游缓存摘除。
    ///
    /// 也被缓存节点直接调用，用来终止不再有消费者的回源流。
    pub fn complete_transmission(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let s = self.streams.get_mut(sid)?;
        s.advance(now);
        s.being_transmitted = false;
        disarm(sim, &mut s.timers.transmission_complete)?;
        self.set_transmit_rate(sid, 0.0, sim)?;
        // 速率本来就是 0 时上一步不会重算定时器
        self.refresh_timers(sid, sim)?;

        let s = self.streams.get(sid)?;
        let (path, up_cache) = (s.links.clone(), s.up_cache);
        for link in path {
            self.links.get_mut(link).detach(sid);
        }
        if let Some(cache) = up_cache {
            self.detach_from_cache(cache, sid, sim)?;
        }
        debug!(stream = ?sid, "传输完成");
        self.retire_if_finished(sid, sim)
    }

    fn on_expand(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        if !self.streams.get(sid)?.being_transmitted {
            return Ok(());
        }
        self.try_use_max_rate(sid, sim)?;
        let at = sim.now().after_secs(self.cfg.expand_interval);
        let s = self.streams.get_mut(sid)?;
        // 速率变化可能已经因停止传输取消了扩张
        if s.being_transmitted {
            arm(sim, &mut s.timers.expand, Some(at), CdnEvent::stream(sid, StreamEvent::Expand))?;
        }
        Ok(())
    }

    fn on_consume_begin(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let s = self.streams.get_mut(sid)?;
        s.advance(now);
        s.begin_consumption(now);
        if s.stats.startup_delay.is_none() {
            let since = s.buffering_since.unwrap_or(s.requested_at);
            s.stats.startup_delay = Some(now.secs_since(since));
        }
        if let Some(since) = s.buffering_since.take() {
            s.stats.buffering_time += now.secs_since(since);
        }
        let (kind, down_cache) = (s.kind, s.down_cache);

        self.refresh_consume_complete(sid, sim)?;
        self.refresh_buffer_empty(sid, sim)?;
        if kind == StreamKind::Cache {
            if let Some(cache) = down_cache {
                self.start_dependents(cache, sid, sim)?;
            }
        }
        Ok(())
    }

    fn on_consume_complete(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let s = self.streams.get_mut(sid)?;
        s.advance(sim.now());
        s.being_consumed = false;
        s.consume_done = true;
        self.refresh_timers(sid, sim)?;
        self.retire_if_finished(sid, sim)
    }

    fn on_buffer_empty(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let s = self.streams.get_mut(sid)?;
        s.advance(now);
        if !s.being_consumed {
            return Ok(());
        }
        // 回源流继续向下游供数
        if s.kind != StreamKind::Cache {
            s.being_consumed = false;
        }
        s.buffering_since = Some(now);
        let transmitting = s.being_transmitted;
        self.refresh_consume_begin(sid, sim)?;
        if transmitting {
            self.refresh_consume_complete(sid, sim)?;
            self.streams.get_mut(sid)?.stats.buffering_events += 1;
        }
        Ok(())
    }

    /// 按当前瓶颈份额尝试使用最大速率；直播流不超过上游回源流（或播放码率）。
    pub fn try_use_max_rate(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        if !self.streams.get(sid)?.being_transmitted {
            return Ok(());
        }
        let mut rate = self.probe_bottleneck(sid, 0)?.rate.max(0.0);
        let s = self.streams.get(sid)?;
        if s.transmitting_live {
            let cap = match self.parent_stream(sid)? {
                Some(parent) => self.streams.get(parent)?.transmit_rate,
                None => s.consume_rate,
            };
            rate = rate.min(cap);
        }
        if self.streams.get(sid)?.transmit_rate != rate {
            self.set_transmit_rate(sid, rate, sim)?;
            if let Some(link) = self.streams.get(sid)?.bottleneck {
                let left = self.links.get(link).capacity_left(&self.streams);
                if left < -1.0 {
                    debug!(stream = ?sid, ?link, overcommit = -left, "链路超额分配，等待其他流重算");
                }
            }
        }
        Ok(())
    }

    /// 修改传输速率并级联重算定时器、下游直播流与缓存吞吐统计。
    pub fn set_transmit_rate(&mut self, sid: StreamId, rate: f64, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let s = self.streams.get_mut(sid)?;
        if s.transmit_rate == rate {
            return Ok(());
        }
        let old = s.transmit_rate;
        s.advance(now);
        s.record_rate(now, rate);
        let (kind, down_cache, up_cache) = (s.kind, s.down_cache, s.up_cache);
        trace!(stream = ?sid, old, new = rate, "速率变化");

        self.refresh_timers(sid, sim)?;
        if kind == StreamKind::Cache {
            if let Some(cache) = down_cache {
                self.update_dependents(cache, sid, sim)?;
            }
        }
        if let Some(cache) = up_cache {
            self.caches.update_throughput(cache, old, rate)?;
        }
        Ok(())
    }

    /// 根据当前状态重算所有依赖定时器
    pub fn refresh_timers(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        self.refresh_transmission_complete(sid, sim)?;
        if self.cfg.is_live() {
            self.refresh_switch_to_live(sid, sim)?;
        }
        if self.streams.get(sid)?.kind != StreamKind::Noise {
            self.refresh_buffer_empty(sid, sim)?;
            self.refresh_consume_begin(sid, sim)?;
        }
        let s = self.streams.get_mut(sid)?;
        if !s.being_transmitted {
            disarm(sim, &mut s.timers.expand)?;
            disarm(sim, &mut s.timers.switch_to_live)?;
        }
        Ok(())
    }

    fn refresh_transmission_complete(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let s = self.streams.get_mut(sid)?;
        s.advance(now);
        let at = if s.being_transmitted && s.kind != StreamKind::Cache {
            project(sid, now, secs_at_rate(s.remaining_bits(), s.transmit_rate), "transmission-complete")?
        } else {
            None
        };
        let ev = CdnEvent::stream(sid, StreamEvent::TransmissionComplete);
        arm(sim, &mut s.timers.transmission_complete, at, ev)
    }

    fn refresh_switch_to_live(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let cache_seconds = self.cfg.cache_seconds;
        let parent_buffer = match self.parent_stream(sid)? {
            Some(parent) => {
                let p = self.streams.get_mut(parent)?;
                p.advance(now);
                Some(p.in_buffer())
            }
            None => None,
        };
        let s = self.streams.get_mut(sid)?;
        if s.transmitting_live || !s.being_transmitted {
            return Ok(());
        }
        s.advance(now);
        let bits = match parent_buffer {
            Some(buffered) => buffered,
            None => s.target_buffer(cache_seconds) - s.in_buffer(),
        };
        let at = project(sid, now, secs_at_rate(bits, s.transmit_rate), "switch-to-live")?;
        let ev = CdnEvent::stream(sid, StreamEvent::SwitchToLive);
        arm(sim, &mut s.timers.switch_to_live, at, ev)
    }

    fn refresh_buffer_empty(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let s = self.streams.get_mut(sid)?;
        s.advance(now);
        let at = if s.being_consumed && s.transmit_rate < s.consume_rate {
            let secs = buffer_empty_time(s.in_buffer(), s.transmit_rate, s.consume_rate).map_err(|e| match e {
                SimError::BufferCannotEmpty {
                    transmit_rate,
                    consume_rate,
                    ..
                } => SimError::BufferCannotEmpty {
                    stream: Some(sid),
                    transmit_rate,
                    consume_rate,
                },
                other => other,
            })?;
            project(sid, now, secs, "buffer-empty")?
        } else {
            None
        };
        let ev = CdnEvent::stream(sid, StreamEvent::BufferEmpty);
        arm(sim, &mut s.timers.buffer_empty, at, ev)
    }

    fn refresh_consume_begin(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let cache_seconds = self.cfg.cache_seconds;
        let s = self.streams.get_mut(sid)?;
        if s.being_consumed || s.consume_done {
            return Ok(());
        }
        s.advance(now);
        let in_buffer = s.in_buffer();
        let target = s.target_buffer(cache_seconds);
        let ev = CdnEvent::stream(sid, StreamEvent::ConsumeBegin);
        if s.being_transmitted {
            let at = project(sid, now, secs_at_rate(target - in_buffer, s.transmit_rate), "consume-begin")?;
            arm(sim, &mut s.timers.consume_begin, at, ev)
        } else if in_buffer > 0.0 && (target - in_buffer).abs() < BUFFER_TOLERANCE_BITS {
            // 下载已结束而缓冲足够：现在开始播放
            arm(sim, &mut s.timers.consume_begin, Some(now), ev)
        } else {
            disarm(sim, &mut s.timers.consume_begin)
        }
    }

    fn refresh_consume_complete(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let now = sim.now();
        let s = self.streams.get_mut(sid)?;
        if s.kind == StreamKind::Cache {
            return Ok(());
        }
        s.advance(now);
        let at = if s.being_consumed {
            let left = s.size_bits - s.consumed_bits;
            project(sid, now, secs_at_rate(left, s.consume_rate), "consume-complete")?
        } else {
            None
        };
        let ev = CdnEvent::stream(sid, StreamEvent::ConsumeComplete);
        arm(sim, &mut s.timers.consume_complete, at, ev)
    }

    /// 停止传输且（用户流）播放完毕的流被移除，剩余定时器全部取消。
    fn retire_if_finished(&mut self, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let s = self.streams.get_mut(sid)?;
        let finished = !s.being_transmitted && (s.kind != StreamKind::Normal || s.consume_done);
        if !finished {
            return Ok(());
        }
        for id in s.timers.take_all() {
            sim.cancel(id)?;
        }
        let Some(s) = self.streams.remove(sid) else {
            return Err(SimError::UnknownStream(sid));
        };

        match s.kind {
            StreamKind::Normal => {
                self.router.sessions_in_flight = self.router.sessions_in_flight.saturating_sub(1);
                let start_time = s.stats.startup_delay.unwrap_or_else(|| {
                    warn!(stream = ?sid, "流结束时没有启动时间");
                    0.0
                });
                self.stats.streams.push(StreamRecord {
                    kind: s.kind,
                    id: s.id,
                    channel: s.channel,
                    start_time,
                    buffering_time: s.stats.buffering_time,
                    buffering_events: s.stats.buffering_events,
                    play_duration: s.size_bits / s.consume_rate,
                    avg_transmit_rate: s.stats.avg_transmit_rate(),
                    consume_rate: s.consume_rate,
                    connected_to_cache: s.connected_to_cache,
                    src: s.src,
                    dst: s.dst,
                });
                debug!(
                    stream = ?sid,
                    start_time,
                    buffering_events = s.stats.buffering_events,
                    remaining_sessions = self.router.sessions_in_flight,
                    "会话结束"
                );
            }
            StreamKind::Noise => {
                self.router.noise_in_flight = self.router.noise_in_flight.saturating_sub(1);
                // 完成的噪声流由下一条补上，保持背景负载
                self.pull_noise(sim);
            }
            StreamKind::Cache => {
                trace!(stream = ?sid, "回源流结束");
            }
        }
        Ok(())
    }
}
