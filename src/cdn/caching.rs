//! 缓存挂接与摘除
//!
//! 缓存就绪后，消费流按 (码率, 频道) 归入槽位；槽位第一次出现时创建一条
//! 上游回源流，按普通流的路由逻辑回源（分层缓存时可以再挂到上一级缓存）。
//! 槽位清空时终止其回源流；非静态缓存失去全部连接后被拆除。

use tracing::{debug, info};

use super::cache::{CacheSlot, SlotKey};
use super::event::{CacheEvent, CdnEvent};
use super::world::CdnWorld;
use crate::net::{CacheId, NodeId, Stream, StreamId, StreamKind};
use crate::sim::{SimError, Simulator};
use crate::stats::CacheRecord;

type Sim = Simulator<CdnEvent>;

impl CdnWorld {
    fn slot_key(&self, sid: StreamId) -> Result<SlotKey, SimError> {
        let s = self.streams.get(sid)?;
        Ok(SlotKey {
            rate_bps: s.rate_bps,
            channel: s.channel,
        })
    }

    /// 为本流供数的上游回源流（未挂接或缓存尚未为其建槽时为 None）
    pub(crate) fn parent_stream(&self, sid: StreamId) -> Result<Option<StreamId>, SimError> {
        let s = self.streams.get(sid)?;
        let Some(cache) = s.up_cache.filter(|_| s.connected_to_cache) else {
            return Ok(None);
        };
        Ok(self.caches.get(cache)?.upstream(self.slot_key(sid)?))
    }

    /// 在节点上为频道放置缓存（已存在时直接返回）。
    ///
    /// 静态缓存立即就绪；按需缓存在启动时延后就绪。
    pub fn provision_cache(&mut self, node: NodeId, channel: u32, pinned: bool, sim: &mut Sim) -> Result<CacheId, SimError> {
        if let Some(existing) = self.caches.at(node, channel) {
            return Ok(existing);
        }
        let id = self.caches.create(node, channel, pinned);
        if pinned {
            info!(cache = ?id, node = ?node, channel, "🗄️  静态缓存就绪");
            self.on_cache_ready(id, sim)?;
        } else {
            let at = sim.now().after_secs(self.cfg.cache_init_latency);
            sim.schedule(at, CdnEvent::Cache { id, kind: CacheEvent::Ready });
            info!(cache = ?id, node = ?node, channel, ready_at = ?at, "🗄️  按需缓存启动中");
        }
        Ok(id)
    }

    pub(crate) fn on_cache_event(&mut self, id: CacheId, kind: CacheEvent, sim: &mut Sim) -> Result<(), SimError> {
        match kind {
            CacheEvent::Ready => self.on_cache_ready(id, sim),
        }
    }

    fn on_cache_ready(&mut self, id: CacheId, sim: &mut Sim) -> Result<(), SimError> {
        let cache = self.caches.get_mut(id)?;
        cache.ready = true;
        let waiting = std::mem::take(&mut cache.waiting);
        debug!(cache = ?id, waiting = waiting.len(), "缓存就绪");
        for sid in waiting {
            self.attach_to_cache(id, sid, sim)?;
        }
        Ok(())
    }

    /// 把流挂到缓存上。缓存未就绪且不等待启动时返回 false，调用者继续回源路由。
    pub fn attach_to_cache(&mut self, id: CacheId, sid: StreamId, sim: &mut Sim) -> Result<bool, SimError> {
        let now = sim.now();
        if self.caches.get(id)?.ready {
            let key = self.slot_key(sid)?;
            let cache = self.caches.get_mut(id)?;
            match cache.slots.get_mut(&key) {
                Some(slot) => {
                    slot.consumers.push(sid);
                    let upstream = slot.upstream;
                    if self.streams.get(upstream)?.being_consumed {
                        let at = now.saturating_add(self.cfg.propagation_delay());
                        self.schedule_start(sid, at, sim)?;
                    }
                }
                None => {
                    let upstream = self.streams.next_id();
                    cache.slots.insert(
                        key,
                        CacheSlot {
                            upstream,
                            consumers: vec![sid],
                        },
                    );
                    self.spawn_cache_stream(id, upstream, sid, sim)?;
                }
            }
        } else if self.cfg.wait_for_cache_boot {
            self.caches.get_mut(id)?.waiting.push(sid);
        } else {
            return Ok(false);
        }

        let s = self.streams.get_mut(sid)?;
        if !s.connected_to_cache {
            s.connected_to_cache = true;
            s.up_cache = Some(id);
            self.caches.connect(id)?;
        }
        Ok(true)
    }

    /// 创建槽位的上游回源流：源与消费流相同，目的为缓存所在节点。
    fn spawn_cache_stream(&mut self, cache: CacheId, upstream: StreamId, consumer: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let node = self.caches.get(cache)?.node;
        let c = self.streams.get(consumer)?;
        let mut s = Stream::new(
            upstream,
            StreamKind::Cache,
            c.src,
            node,
            c.rate_bps,
            0.0,
            c.channel,
            sim.now(),
        );
        s.down_cache = Some(cache);
        let src = s.src;
        self.streams.insert(s);
        debug!(cache = ?cache, stream = ?upstream, "创建回源流");

        let path = self
            .topo
            .shortest_path(node, src)
            .ok_or(SimError::NoRoute { from: node, to: src })?;
        if self.cfg.hierarchical_caches {
            // 分层缓存时回源流不触发按需放置
            self.route_with_caches(upstream, &path, false, sim)
        } else {
            self.route_plain(upstream, &path, sim)
        }
    }

    /// 从缓存摘除流；槽位清空时终止回源流，非静态缓存失去全部连接时拆除。
    pub fn detach_from_cache(&mut self, id: CacheId, sid: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let key = self.slot_key(sid)?;
        let cache = self.caches.get_mut(id)?;
        cache.waiting.retain(|w| *w != sid);
        let emptied = match cache.slots.get_mut(&key) {
            Some(slot) => {
                slot.consumers.retain(|c| *c != sid);
                slot.consumers.is_empty()
            }
            None => false,
        };
        self.caches.disconnect(id)?;
        self.streams.get_mut(sid)?.up_cache = None;

        if !emptied {
            return Ok(());
        }
        let cache = self.caches.get_mut(id)?;
        if let Some(slot) = cache.slots.remove(&key) {
            self.complete_transmission(slot.upstream, sim)?;
        }

        let cache = self.caches.get(id)?;
        if !cache.pinned && cache.connections == 0 {
            let cache = self.caches.remove(id)?;
            info!(
                cache = ?id,
                node = ?cache.node,
                max_connections = cache.max_connections,
                max_throughput = cache.max_throughput,
                "🧹 拆除缓存"
            );
            self.stats.caches.push(CacheRecord {
                node: cache.node,
                cache_id: cache.id,
                max_throughput: cache.max_throughput,
                max_connections: cache.max_connections,
            });
        }
        Ok(())
    }

    /// 回源流开始播放：尚未传输的下游流在一个传播时延后开始。
    pub(crate) fn start_dependents(&mut self, id: CacheId, upstream: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let key = self.slot_key(upstream)?;
        let consumers = match self.caches.get(id)?.slots.get(&key) {
            Some(slot) => slot.consumers.clone(),
            None => return Ok(()),
        };
        let at = sim.now().saturating_add(self.cfg.propagation_delay());
        for c in consumers {
            if !self.streams.get(c)?.being_transmitted {
                self.schedule_start(c, at, sim)?;
            }
        }
        Ok(())
    }

    /// 回源流速率变化后重新评估跟随直播码率的下游流。
    pub(crate) fn update_dependents(&mut self, id: CacheId, upstream: StreamId, sim: &mut Sim) -> Result<(), SimError> {
        let key = self.slot_key(upstream)?;
        let consumers = match self.caches.get(id)?.slots.get(&key) {
            Some(slot) if slot.upstream == upstream => slot.consumers.clone(),
            _ => return Ok(()),
        };
        for c in consumers {
            if self.streams.get(c)?.transmitting_live {
                self.try_use_max_rate(c, sim)?;
            }
        }
        Ok(())
    }
}
