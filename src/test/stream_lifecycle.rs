use crate::cdn::{CdnEvent, CdnWorld};
use crate::config::{SimConfig, StreamingMode};
use crate::feed::{SessionRequest, TimedRequest, TraceFeed};
use crate::net::{NodeId, StreamKind};
use crate::sim::{SimTime, Simulator, World};
use crate::topo::{NodeKind, Topology};

/// A(接入) -- P(内容)
fn line_topology() -> (Topology, NodeId, NodeId) {
    let mut topo = Topology::default();
    let provider = topo.add_node("P", NodeKind::Content);
    let access = topo.add_node("A", NodeKind::Access);
    topo.connect(access, provider);
    (topo, provider, access)
}

fn vod_config() -> SimConfig {
    SimConfig {
        streaming_mode: StreamingMode::Vod,
        lan_link_rate: 1e12,
        ..SimConfig::default()
    }
}

fn session(at_s: f64, host: NodeId, rate_bps: u64, size_bits: f64) -> TimedRequest {
    TimedRequest {
        at: SimTime::from_secs_f64(at_s),
        req: SessionRequest {
            host,
            rate_bps,
            size_bits,
            channel: 0,
            source: None,
        },
    }
}

fn world(cfg: SimConfig, topo: Topology, reqs: Vec<TimedRequest>) -> (CdnWorld, Simulator<CdnEvent>) {
    let mut world = CdnWorld::new(cfg, Box::new(topo), Box::new(TraceFeed::new(reqs)));
    let mut sim = Simulator::default();
    world.prime(&mut sim);
    (world, sim)
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * b.abs().max(1.0)
}

#[test]
fn vod_session_buffers_plays_and_retires() {
    let (topo, _, access) = line_topology();
    let (mut world, mut sim) = world(vod_config(), topo, vec![session(0.0, access, 1_000_000, 20e6)]);

    let summary = sim.run(&mut world).expect("run");

    // 两跳传播时延后以骨干速率 1e10 开始；1e7 bit 的缓冲目标 1ms 填满
    assert_eq!(world.stats.streams.len(), 1);
    let rec = &world.stats.streams[0];
    assert_eq!(rec.kind, StreamKind::Normal);
    assert!(approx(rec.start_time, 0.021), "start_time {}", rec.start_time);
    assert!(approx(rec.avg_transmit_rate, 1e10), "avg {}", rec.avg_transmit_rate);
    assert_eq!(rec.buffering_events, 0);
    assert!(approx(rec.play_duration, 20.0));
    assert!(!rec.connected_to_cache);
    assert_eq!(rec.dst, access);

    assert!(approx(summary.final_time.as_secs_f64(), 20.021));
    assert!(world.streams.is_empty());
    assert!(world.is_done());
    for link in world.links.iter() {
        assert_eq!(link.attached_count(), 0);
    }
}

#[test]
fn rate_change_moves_pending_timers_in_place() {
    let (topo, _, access) = line_topology();
    let cfg = SimConfig {
        backbone_link_rate: 2e6,
        ..vod_config()
    };
    let (mut world, mut sim) = world(cfg, topo, vec![session(0.0, access, 1_000_000, 1e9)]);
    sim.run_until(SimTime::from_secs(6), &mut world).expect("run_until");

    let sid = world.streams.iter().next().expect("stream").id;
    let s = world.streams.get(sid).expect("stream");
    assert!(s.being_transmitted && s.being_consumed);
    assert_eq!(s.transmit_rate, 2e6);
    // 传输快于播放：缓冲不会耗尽
    assert!(s.timers.buffer_empty.is_none());
    let complete = s.timers.transmission_complete.expect("transmission complete armed");
    let complete_at = sim.scheduled_at(complete).expect("scheduled");

    world.set_transmit_rate(sid, 5e5, &mut sim).expect("slow down");
    let s = world.streams.get(sid).expect("stream");
    let empty = s.timers.buffer_empty.expect("buffer empty armed");
    let first_empty_at = sim.scheduled_at(empty).expect("scheduled");
    assert_eq!(s.timers.transmission_complete, Some(complete));
    assert!(sim.scheduled_at(complete).expect("scheduled") > complete_at);
    let queued = sim.len();

    world.set_transmit_rate(sid, 2.5e5, &mut sim).expect("slow down again");
    let s = world.streams.get(sid).expect("stream");
    assert_eq!(s.timers.buffer_empty, Some(empty));
    assert!(sim.scheduled_at(empty).expect("scheduled") < first_empty_at);
    assert_eq!(sim.len(), queued);
}

#[test]
fn starved_session_records_buffering_events() {
    let (topo, _, access) = line_topology();
    let cfg = SimConfig {
        backbone_link_rate: 5e5,
        ..vod_config()
    };
    let (mut world, mut sim) = world(cfg, topo, vec![session(0.0, access, 1_000_000, 2e7)]);
    sim.run(&mut world).expect("run");

    assert_eq!(world.stats.streams.len(), 1);
    let rec = &world.stats.streams[0];
    // 1e7 bit 的缓冲目标以 5e5 b/s 填满需要 20s
    assert!(approx(rec.start_time, 20.02), "start_time {}", rec.start_time);
    assert!(rec.buffering_events >= 1);
    assert!(rec.buffering_time > rec.start_time);
    assert!(world.streams.is_empty());
}

#[test]
fn schedule_start_keeps_the_earliest_pending_time() {
    let (topo, _, access) = line_topology();
    let (mut world, mut sim) = world(vod_config(), topo, vec![]);
    let req = session(0.0, access, 1_000_000, 1e7).req;
    let sid = world.admit(req, StreamKind::Normal, &mut sim).expect("admit");

    let start = world.streams.get(sid).expect("stream").timers.start.expect("start armed");
    assert_eq!(sim.scheduled_at(start), Some(SimTime::from_millis(20)));

    world.schedule_start(sid, SimTime::from_millis(500), &mut sim).expect("later");
    assert_eq!(sim.scheduled_at(start), Some(SimTime::from_millis(20)));

    world.schedule_start(sid, SimTime::from_millis(5), &mut sim).expect("earlier");
    assert_eq!(sim.scheduled_at(start), Some(SimTime::from_millis(5)));
    assert_eq!(world.streams.get(sid).expect("stream").timers.start, Some(start));
}

#[test]
fn admitted_stream_gets_access_link_then_edge_links() {
    let mut topo = Topology::default();
    let provider = topo.add_node("P", NodeKind::Content);
    let transit = topo.add_node("T", NodeKind::Transit);
    let access = topo.add_node("A", NodeKind::Access);
    topo.connect(provider, transit);
    topo.connect(transit, access);
    let (mut world, mut sim) = world(vod_config(), topo, vec![]);

    let req = session(0.0, access, 1_000_000, 1e7).req;
    let sid = world.admit(req, StreamKind::Normal, &mut sim).expect("admit");
    let s = world.streams.get(sid).expect("stream");
    assert_eq!(s.links.len(), 3);
    assert_eq!(s.src, provider);

    let access_link = world.links.get(s.links[0]);
    assert_eq!(access_link.capacity, 1e12);
    assert!(access_link.endpoints.is_none());
    // 接入节点一侧是普通骨干，核心一侧是高速骨干
    assert_eq!(world.links.get(s.links[1]).capacity, world.cfg.backbone_link_rate);
    assert_eq!(world.links.get(s.links[2]).capacity, world.cfg.fast_backbone_link_rate);
    assert_eq!(world.links.edge(access, transit), Some(s.links[1]));

    // 三跳传播时延
    let start = s.timers.start.expect("start armed");
    assert_eq!(sim.scheduled_at(start), Some(SimTime::from_millis(30)));
}

#[test]
fn noise_streams_share_links_but_leave_no_session_record() {
    let (topo, _, access) = line_topology();
    let noise = TraceFeed::new(vec![session(0.0, access, 1_000_000, 1e6)]);
    let mut world = CdnWorld::new(
        vod_config(),
        Box::new(topo),
        Box::new(TraceFeed::new(vec![session(0.0, access, 1_000_000, 20e6)])),
    )
    .with_noise(Box::new(noise));
    let mut sim = Simulator::default();
    world.prime(&mut sim);

    sim.run(&mut world).expect("run");
    assert_eq!(world.stats.streams.len(), 1);
    assert_eq!(world.router.noise_in_flight, 0);
    assert_eq!(world.router.sessions_in_flight, 0);
    assert_eq!(world.streams.count_kind(StreamKind::Noise), 0);
    assert!(world.stats.samples.iter().any(|s| s.requests > 0));
}

#[test]
fn periodic_stats_sample_active_sessions() {
    let (topo, _, access) = line_topology();
    let (mut world, mut sim) = world(vod_config(), topo, vec![session(0.0, access, 1_000_000, 5e6)]);
    sim.run(&mut world).expect("run");

    // 会话播放 5s，期间每秒一次采样
    let samples = &world.stats.samples;
    assert!(samples.len() >= 4, "samples {}", samples.len());
    assert_eq!(samples[0].active_sessions, 1);
    assert_eq!(samples[0].requests, 1);
    assert!(samples.windows(2).all(|w| w[0].time < w[1].time));
}

#[test]
fn finished_noise_is_replaced_to_hold_the_population() {
    let (topo, _, access) = line_topology();
    let cfg = SimConfig {
        noise_population: 2,
        ..vod_config()
    };
    let noise = (0..5).map(|_| session(0.0, access, 1_000_000, 1e6)).collect();
    let mut world = CdnWorld::new(
        cfg,
        Box::new(topo),
        Box::new(TraceFeed::new(vec![session(0.0, access, 1_000_000, 20e6)])),
    )
    .with_noise(Box::new(TraceFeed::new(noise)));
    let mut sim = Simulator::default();
    world.prime(&mut sim);

    // 来源未耗尽时，每次有噪声流结束都立即补上一条
    let mut t = 0.0;
    while world.router.noise_admitted < 5 {
        t += 0.001;
        assert!(t < 1.0, "noise never drained");
        sim.run_until(SimTime::from_secs_f64(t), &mut world).expect("run_until");
        assert!(world.router.noise_in_flight <= 2);
        if world.router.noise_admitted < 5 {
            assert_eq!(world.router.noise_in_flight, 2, "t={t}");
        }
    }

    sim.run(&mut world).expect("run");
    assert_eq!(world.router.noise_admitted, 5);
    assert_eq!(world.router.noise_in_flight, 0);
    assert_eq!(world.stats.streams.len(), 1);
}
