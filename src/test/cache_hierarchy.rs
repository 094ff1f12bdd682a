use crate::cdn::{CdnEvent, CdnWorld};
use crate::config::SimConfig;
use crate::feed::{SessionRequest, TimedRequest, TraceFeed};
use crate::net::{NodeId, StreamKind};
use crate::sim::{SimTime, Simulator};
use crate::topo::{NodeKind, StarOpts, Topology, TopologyProvider, build_star};

fn live_config() -> SimConfig {
    SimConfig {
        lan_link_rate: 1e8,
        ..SimConfig::default()
    }
}

fn session(at_s: f64, host: NodeId) -> TimedRequest {
    TimedRequest {
        at: SimTime::from_secs_f64(at_s),
        req: SessionRequest {
            host,
            rate_bps: 1_000_000,
            size_bits: 2e7,
            channel: 0,
            source: None,
        },
    }
}

fn world(cfg: SimConfig, topo: impl TopologyProvider + 'static, reqs: Vec<TimedRequest>) -> (CdnWorld, Simulator<CdnEvent>) {
    let mut world = CdnWorld::new(cfg, Box::new(topo), Box::new(TraceFeed::new(reqs)));
    let mut sim = Simulator::default();
    world.prime(&mut sim);
    (world, sim)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * b.abs().max(1.0)
}

#[test]
fn static_access_cache_feeds_live_session() {
    let star = build_star(&StarOpts {
        access_nodes: 2,
        static_cache_at_access: true,
        static_cache_at_core: false,
    });
    let host = star.access[0];
    let (mut world, mut sim) = world(live_config(), star.topo, vec![session(0.0, host)]);

    sim.run_until(SimTime::from_secs(1), &mut world).expect("run_until");
    assert_eq!(world.streams.count_kind(StreamKind::Cache), 1);
    let cache = world.caches.at(host, 0).expect("cache at access node");
    let c = world.caches.get(cache).expect("cache");
    assert!(c.pinned && c.ready);
    assert_eq!(c.connections, 1);

    // 用户流只有私有接入链路；回源流走完整的骨干路径
    let user = world
        .streams
        .iter()
        .find(|s| s.kind == StreamKind::Normal)
        .expect("user stream");
    assert_eq!(user.links.len(), 1);
    assert!(user.transmitting_live);
    assert_eq!(user.transmit_rate, 1e6);
    let upstream = world
        .streams
        .iter()
        .find(|s| s.kind == StreamKind::Cache)
        .expect("upstream");
    assert_eq!(upstream.links.len(), 2);
    assert_eq!(upstream.dst, host);
    assert_eq!(upstream.down_cache, Some(cache));

    sim.run(&mut world).expect("run");
    assert_eq!(world.stats.streams.len(), 1);
    let rec = &world.stats.streams[0];
    assert!(rec.connected_to_cache);
    // 回源流 0.03s 开始、1ms 填满缓冲；用户流再经一跳时延与 1e7 bit 缓冲
    assert!(approx(rec.start_time, 0.141), "start_time {}", rec.start_time);
    assert_eq!(rec.buffering_events, 0);

    // 静态缓存不会被拆除，但回源流随最后一个消费者结束
    assert!(world.stats.caches.is_empty());
    assert_eq!(world.caches.len(), 1);
    assert!(world.streams.is_empty());
    assert_eq!(world.caches.get(cache).expect("cache").connections, 0);

    let snapshot = world.stats_snapshot();
    assert_eq!(snapshot.sites.len(), 1);
    assert_eq!(snapshot.sites[0].node, host);
    assert_eq!(snapshot.sites[0].max_connections, 1);
    assert!(approx(snapshot.sites[0].max_throughput, 1e8));
}

#[test]
fn second_viewer_reuses_the_upstream_stream() {
    let star = build_star(&StarOpts {
        access_nodes: 1,
        static_cache_at_access: true,
        static_cache_at_core: false,
    });
    let host = star.access[0];
    let (mut world, mut sim) = world(
        live_config(),
        star.topo,
        vec![session(0.0, host), session(1.0, host)],
    );

    sim.run_until(SimTime::from_secs(2), &mut world).expect("run_until");
    assert_eq!(world.streams.count_kind(StreamKind::Cache), 1);
    assert_eq!(world.streams.count_kind(StreamKind::Normal), 2);
    let cache = world.caches.at(host, 0).expect("cache");
    let c = world.caches.get(cache).expect("cache");
    assert_eq!(c.connections, 2);
    assert_eq!(c.slots.len(), 1);
    assert_eq!(c.dependents(), 2);
    assert_eq!(world.caches.site(host).expect("site").request_count(0), 2);

    sim.run(&mut world).expect("run");
    let summary = world.stats.summary();
    assert_eq!(summary.sessions, 2);
    assert_eq!(summary.cached_sessions, 2);
    assert!(world.streams.is_empty());
}

#[test]
fn on_demand_cache_boots_then_is_torn_down() {
    let star = build_star(&StarOpts::default());
    let host = star.access[0];
    let cfg = SimConfig {
        on_demand_caches: true,
        wait_for_cache_boot: true,
        cache_init_latency: 0.1,
        ..live_config()
    };
    let (mut world, mut sim) = world(cfg, star.topo, vec![session(0.0, host)]);

    // 缓存启动中：流排队等待，尚无回源流
    sim.run_until(SimTime::from_millis(50), &mut world).expect("run_until");
    let cache = world.caches.at(host, 0).expect("booting cache");
    let c = world.caches.get(cache).expect("cache");
    assert!(!c.ready && !c.pinned);
    assert_eq!(c.waiting.len(), 1);
    assert_eq!(world.streams.count_kind(StreamKind::Cache), 0);

    sim.run(&mut world).expect("run");
    let rec = &world.stats.streams[0];
    assert!(rec.connected_to_cache);
    assert!(approx(rec.start_time, 0.241), "start_time {}", rec.start_time);

    assert!(world.caches.is_empty());
    assert_eq!(world.stats.caches.len(), 1);
    let torn = world.stats.caches[0];
    assert_eq!(torn.node, host);
    assert_eq!(torn.max_connections, 1);
    assert!(approx(torn.max_throughput, 1e8));
    // 拆除后该频道重新从零开始计数
    assert_eq!(world.caches.site(host).expect("site").request_count(0), 0);
    assert_eq!(world.stats.summary().caches_torn_down, 1);
}

#[test]
fn without_waiting_for_boot_the_first_viewer_goes_to_origin() {
    let star = build_star(&StarOpts::default());
    let host = star.access[0];
    let cfg = SimConfig {
        on_demand_caches: true,
        wait_for_cache_boot: false,
        ..live_config()
    };
    let (mut world, mut sim) = world(cfg, star.topo, vec![session(0.0, host)]);

    sim.run_until(SimTime::from_secs(1), &mut world).expect("run_until");
    let user = world.streams.iter().next().expect("user stream");
    assert!(!user.connected_to_cache);
    assert_eq!(user.links.len(), 3);
    assert!(world.caches.get(world.caches.at(host, 0).expect("cache")).expect("cache").ready);

    sim.run(&mut world).expect("run");
    assert!(!world.stats.streams[0].connected_to_cache);
}

#[test]
fn hierarchical_upstream_attaches_to_next_cache() {
    let mut topo = Topology::default();
    let provider = topo.add_node("P", NodeKind::Content);
    let transit = topo.add_node("T", NodeKind::Transit);
    let access = topo.add_node("A", NodeKind::Access);
    topo.connect(access, transit);
    topo.connect(transit, provider);
    topo.set_static_cache(access, true);
    topo.set_static_cache(transit, true);
    let cfg = SimConfig {
        hierarchical_caches: true,
        local_cache_only: false,
        ..live_config()
    };
    let (mut world, mut sim) = world(cfg, topo, vec![session(0.0, access)]);

    sim.run_until(SimTime::from_secs(1), &mut world).expect("run_until");
    assert_eq!(world.caches.len(), 2);
    assert_eq!(world.streams.count_kind(StreamKind::Cache), 2);
    let access_cache = world.caches.at(access, 0).expect("access cache");
    let transit_cache = world.caches.at(transit, 0).expect("transit cache");

    // 接入缓存的回源流只走到上一级缓存
    let first = world
        .streams
        .iter()
        .find(|s| s.down_cache == Some(access_cache))
        .expect("access upstream");
    assert_eq!(first.up_cache, Some(transit_cache));
    assert_eq!(first.links, vec![world.links.edge(access, transit).expect("edge")]);
    let second = world
        .streams
        .iter()
        .find(|s| s.down_cache == Some(transit_cache))
        .expect("transit upstream");
    assert_eq!(second.up_cache, None);
    assert_eq!(second.links, vec![world.links.edge(transit, provider).expect("edge")]);
    assert!(second.transmitting_live && first.transmitting_live);

    sim.run(&mut world).expect("run");
    let rec = &world.stats.streams[0];
    assert!(rec.connected_to_cache);
    assert!(approx(rec.start_time, 0.142), "start_time {}", rec.start_time);
    // 两级回源流都随唯一的用户流结束
    assert!(world.streams.is_empty());
    assert_eq!(world.caches.len(), 2);
}

#[test]
fn vod_mode_never_uses_caches() {
    let star = build_star(&StarOpts {
        access_nodes: 1,
        static_cache_at_access: true,
        static_cache_at_core: true,
    });
    let host = star.access[0];
    let cfg = SimConfig {
        streaming_mode: crate::config::StreamingMode::Vod,
        ..live_config()
    };
    let (mut world, mut sim) = world(cfg, star.topo, vec![session(0.0, host)]);
    sim.run(&mut world).expect("run");

    assert!(world.caches.is_empty());
    assert!(!world.stats.streams[0].connected_to_cache);
}

#[test]
fn live_rate_is_capped_by_a_bottlenecked_upstream() {
    let star = build_star(&StarOpts {
        access_nodes: 1,
        static_cache_at_access: true,
        static_cache_at_core: false,
    });
    let host = star.access[0];
    // 回源流只能拿到 5e5，低于 1e6 的播放码率
    let cfg = SimConfig {
        backbone_link_rate: 5e5,
        ..live_config()
    };
    let (mut world, mut sim) = world(cfg, star.topo, vec![session(0.0, host)]);

    sim.run_until(SimTime::from_secs(30), &mut world).expect("run_until");
    let upstream = world
        .streams
        .iter()
        .find(|s| s.kind == StreamKind::Cache)
        .expect("upstream");
    assert!(upstream.transmitting_live);
    assert_eq!(upstream.transmit_rate, 5e5);

    let user = world
        .streams
        .iter()
        .find(|s| s.kind == StreamKind::Normal)
        .expect("user stream");
    assert!(user.being_transmitted);
    assert!(user.transmitting_live);
    // 接入链路有 1e8，但跟随直播后不超过上游
    assert_eq!(user.transmit_rate, upstream.transmit_rate);
    assert!(user.transmit_rate < user.consume_rate);

    sim.run(&mut world).expect("run");
    assert_eq!(world.stats.streams.len(), 1);
    assert!(world.stats.streams[0].connected_to_cache);
}
