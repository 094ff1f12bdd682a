//! CDN 仿真世界
//!
//! 持有配置、拓扑、链路表、流表、缓存表、路由器状态与统计，是仿真中
//! 唯一的可变上下文，以引用传给每个处理函数。

use tracing::{debug, info};

use super::cache::CacheTable;
use super::event::{CdnEvent, RouterEvent};
use super::router::RouterState;
use crate::config::SimConfig;
use crate::feed::{RequestFeed, TraceFeed};
use crate::net::{LinkTable, StreamTable};
use crate::sim::{SimError, SimTime, Simulator, World};
use crate::stats::{SimStats, SiteRecord};
use crate::topo::TopologyProvider;

pub struct CdnWorld {
    pub cfg: SimConfig,
    pub topo: Box<dyn TopologyProvider>,
    pub links: LinkTable,
    pub streams: StreamTable,
    pub caches: CacheTable,
    pub router: RouterState,
    pub stats: SimStats,
}

impl CdnWorld {
    pub fn new(cfg: SimConfig, topo: Box<dyn TopologyProvider>, sessions: Box<dyn RequestFeed>) -> Self {
        Self {
            cfg,
            topo,
            links: LinkTable::default(),
            streams: StreamTable::default(),
            caches: CacheTable::default(),
            router: RouterState::new(sessions, Box::new(TraceFeed::default())),
            stats: SimStats::default(),
        }
    }

    /// 设置背景噪声流来源
    pub fn with_noise(mut self, noise: Box<dyn RequestFeed>) -> Self {
        self.router.noise = noise;
        self
    }

    /// 调度首个会话/噪声请求、结束事件与周期统计。
    pub fn prime(&mut self, sim: &mut Simulator<CdnEvent>) {
        let now = sim.now();
        match self.router.sessions.next_request(now) {
            Some(first) => {
                sim.schedule(first.at, CdnEvent::Router(RouterEvent::SessionRequest(first.req)));
            }
            None => {
                info!("会话请求为空，不产生用户流");
                self.router.generating = false;
            }
        }
        if let Some(first) = self.router.noise.next_request(now) {
            sim.schedule(first.at, CdnEvent::Router(RouterEvent::NoiseRequest(first.req)));
        }
        if let Some(end) = self.cfg.end_time {
            sim.schedule(SimTime::from_secs_f64(end), CdnEvent::Router(RouterEvent::Finalize));
        }
        sim.schedule(
            now.after_secs(self.cfg.stats_interval),
            CdnEvent::Router(RouterEvent::PeriodicStats),
        );
        debug!(queue_size = sim.len(), "初始事件已调度");
    }

    /// 仍在产生会话，或还有会话未结束
    pub fn simulation_active(&self) -> bool {
        self.router.generating || self.router.sessions_in_flight > 0
    }

    /// 当前全部统计记录，站点汇总按节点顺序附在末尾。
    pub fn stats_snapshot(&self) -> SimStats {
        let mut stats = self.stats.clone();
        stats.sites = self
            .caches
            .sites
            .iter()
            .filter(|(_, site)| site.max_vms > 0)
            .map(|(&node, site)| SiteRecord {
                node,
                max_connections: site.max_connections,
                max_throughput: site.max_throughput,
                max_caches: site.max_vms,
            })
            .collect();
        stats
    }
}

impl World for CdnWorld {
    type Event = CdnEvent;

    #[tracing::instrument(skip(self, ev, sim), fields(now = ?sim.now()))]
    fn handle(&mut self, ev: CdnEvent, sim: &mut Simulator<CdnEvent>) -> Result<(), SimError> {
        match ev {
            CdnEvent::Stream { id, kind } => self.on_stream_event(id, kind, sim),
            CdnEvent::Cache { id, kind } => self.on_cache_event(id, kind, sim),
            CdnEvent::Router(ev) => self.on_router_event(ev, sim),
        }
    }

    fn is_done(&self) -> bool {
        !self.simulation_active()
    }
}
