//! 路由与请求接纳
//!
//! 路由器把请求来源产生的会话变成流，沿拓扑最短路径建立链路序列，
//! 并在直播模式下沿途放置/挂接缓存。

use tracing::{debug, info};

use super::event::{CdnEvent, RouterEvent};
use super::world::CdnWorld;
use crate::feed::{RequestFeed, SessionRequest};
use crate::net::{LinkId, NodeId, Stream, StreamId, StreamKind};
use crate::sim::{SimError, Simulator};
use crate::stats::StatsSample;
use crate::topo::NodeKind;

type Sim = Simulator<CdnEvent>;

pub struct RouterState {
    pub sessions: Box<dyn RequestFeed>,
    pub noise: Box<dyn RequestFeed>,
    /// 仍在产生新的会话请求
    pub generating: bool,
    pub sessions_in_flight: u64,
    pub noise_in_flight: u64,
    pub admitted: u64,
    pub noise_admitted: u64,
    requests_since_sample: u64,
}

impl RouterState {
    pub fn new(sessions: Box<dyn RequestFeed>, noise: Box<dyn RequestFeed>) -> Self {
        Self {
            sessions,
            noise,
            generating: true,
            sessions_in_flight: 0,
            noise_in_flight: 0,
            admitted: 0,
            noise_admitted: 0,
            requests_since_sample: 0,
        }
    }
}

impl CdnWorld {
    #[tracing::instrument(skip(self, sim), fields(now = ?sim.now()))]
    pub(crate) fn on_router_event(&mut self, ev: RouterEvent, sim: &mut Sim) -> Result<(), SimError> {
        match ev {
            RouterEvent::SessionRequest(req) => {
                self.router.sessions_in_flight += 1;
                self.router.admitted += 1;
                self.router.requests_since_sample += 1;
                self.admit(req, StreamKind::Normal, sim)?;
                if self.router.generating {
                    match self.router.sessions.next_request(sim.now()) {
                        Some(next) => {
                            sim.schedule(next.at, CdnEvent::Router(RouterEvent::SessionRequest(next.req)));
                        }
                        None => {
                            info!("请求源耗尽，停止产生新会话");
                            self.router.generating = false;
                        }
                    }
                }
                Ok(())
            }
            RouterEvent::NoiseRequest(req) => {
                self.router.noise_in_flight += 1;
                self.router.noise_admitted += 1;
                self.admit(req, StreamKind::Noise, sim)?;
                // 达到目标并发后只由完成的噪声流补位
                let target = self.cfg.noise_population as u64;
                if target == 0 || self.router.noise_in_flight < target {
                    self.pull_noise(sim);
                }
                Ok(())
            }
            RouterEvent::Finalize => {
                info!(
                    sessions_in_flight = self.router.sessions_in_flight,
                    "🏁 到达结束时间，不再产生新会话"
                );
                self.router.generating = false;
                Ok(())
            }
            RouterEvent::PeriodicStats => {
                self.stats.samples.push(StatsSample {
                    time: sim.now().as_secs_f64(),
                    active_sessions: self.router.sessions_in_flight,
                    active_noise: self.router.noise_in_flight,
                    requests: self.router.requests_since_sample,
                });
                self.router.requests_since_sample = 0;
                if self.simulation_active() {
                    let at = sim.now().after_secs(self.cfg.stats_interval);
                    sim.schedule(at, CdnEvent::Router(RouterEvent::PeriodicStats));
                }
                Ok(())
            }
        }
    }

    /// 仿真未结束时从噪声来源取下一条到达并调度。
    pub(crate) fn pull_noise(&mut self, sim: &mut Sim) {
        if !self.simulation_active() {
            return;
        }
        if let Some(next) = self.router.noise.next_request(sim.now()) {
            sim.schedule(next.at, CdnEvent::Router(RouterEvent::NoiseRequest(next.req)));
        }
    }

    /// 接纳一条用户流或噪声流：私有接入链路在前，然后沿最短路径路由。
    pub fn admit(&mut self, req: SessionRequest, kind: StreamKind, sim: &mut Sim) -> Result<StreamId, SimError> {
        let now = sim.now();
        let src = req.source.unwrap_or_else(|| self.topo.content_provider());
        let sid = self.streams.next_id();
        let mut s = Stream::new(sid, kind, src, req.host, req.rate_bps, req.size_bits, req.channel, now);
        s.links.push(self.links.add_access_link(self.cfg.lan_link_rate));
        self.streams.insert(s);

        let path = self
            .topo
            .shortest_path(req.host, src)
            .ok_or(SimError::NoRoute { from: req.host, to: src })?;
        debug!(stream = ?sid, ?kind, host = ?req.host, src = ?src, hops = path.len(), "接纳请求");
        if kind == StreamKind::Normal && self.cfg.is_live() {
            self.route_with_caches(sid, &path, true, sim)?;
        } else {
            self.route_plain(sid, &path, sim)?;
        }
        Ok(sid)
    }

    /// 拓扑边 (a, b) 上的链路：与接入节点相连的是普通骨干，其余是高速骨干。
    fn edge_link(&mut self, a: NodeId, b: NodeId) -> LinkId {
        let access = |n| self.topo.node_kind(n) == NodeKind::Access;
        let capacity = if access(a) || access(b) {
            self.cfg.backbone_link_rate
        } else {
            self.cfg.fast_backbone_link_rate
        };
        self.links
            .edge_link(a, b, capacity, self.cfg.unlimited_backbone_capacity)
    }

    /// 直接回源：路径上每条边都成为流的链路。
    pub fn route_plain(&mut self, sid: StreamId, path: &[NodeId], sim: &mut Sim) -> Result<(), SimError> {
        for hop in path.windows(2) {
            let link = self.edge_link(hop[0], hop[1]);
            self.streams.get_mut(sid)?.links.push(link);
        }
        let at = sim
            .now()
            .after_secs(self.cfg.propagation_delay_per_hop * path.len() as f64);
        self.schedule_start(sid, at, sim)
    }

    /// 带缓存放置的路由：从用户侧向源走，按请求计数在节点上放置/挂接缓存。
    ///
    /// 挂接成功即停止；没有挂接上的流得到下一条边并在传播时延后开始。
    /// 路径最后一个节点（源）从不作为缓存位置。
    pub fn route_with_caches(
        &mut self,
        sid: StreamId,
        path: &[NodeId],
        allow_on_demand: bool,
        sim: &mut Sim,
    ) -> Result<(), SimError> {
        let (channel, down_cache) = {
            let s = self.streams.get(sid)?;
            (s.channel, s.down_cache)
        };
        for (i, hop) in path.windows(2).enumerate() {
            let (a, b) = (hop[0], hop[1]);
            if i == 0 || !self.cfg.local_cache_only {
                let count = self.caches.bump_requests(a, channel);
                if count >= self.cfg.cache_request_threshold {
                    let cache = if self.topo.is_static_cache(a) {
                        Some(self.provision_cache(a, channel, true, sim)?)
                    } else if self.cfg.on_demand_caches && allow_on_demand {
                        Some(self.provision_cache(a, channel, false, sim)?)
                    } else {
                        None
                    };
                    // 回源流不能挂到它自己供数的缓存上
                    if let Some(cache) = cache.filter(|c| Some(*c) != down_cache) {
                        if self.attach_to_cache(cache, sid, sim)? {
                            debug!(stream = ?sid, cache = ?cache, node = ?a, "挂接到缓存");
                            break;
                        }
                    }
                }
            }
            if !self.streams.get(sid)?.connected_to_cache {
                let link = self.edge_link(a, b);
                self.streams.get_mut(sid)?.links.push(link);
            }
        }

        if !self.streams.get(sid)?.connected_to_cache {
            let at = sim
                .now()
                .after_secs(self.cfg.propagation_delay_per_hop * path.len() as f64);
            self.schedule_start(sid, at, sim)?;
        }
        Ok(())
    }
}
