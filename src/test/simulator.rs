use crate::sim::{EventId, SimError, SimTime, Simulator, World};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ev {
    Push(u32),
    PushThenScheduleNow(u32, u32),
    Stop,
}

#[derive(Default)]
struct LogWorld {
    log: Vec<u32>,
    stopped: bool,
}

impl World for LogWorld {
    type Event = Ev;

    fn handle(&mut self, ev: Ev, sim: &mut Simulator<Ev>) -> Result<(), SimError> {
        match ev {
            Ev::Push(id) => self.log.push(id),
            Ev::PushThenScheduleNow(id, next) => {
                self.log.push(id);
                sim.schedule(sim.now(), Ev::Push(next));
            }
            Ev::Stop => self.stopped = true,
        }
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.stopped
    }
}

#[test]
fn scheduled_events_order_by_time_then_seq() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime(10), Ev::Push(1));
    sim.schedule(SimTime(5), Ev::Push(2));
    sim.schedule(SimTime(10), Ev::Push(3));

    let mut world = LogWorld::default();
    let summary = sim.run(&mut world).expect("run");

    assert_eq!(world.log, vec![2, 1, 3]);
    assert_eq!(summary.events, 3);
    assert_eq!(sim.now(), SimTime(10));
}

#[test]
fn event_scheduled_at_same_time_inside_event_runs_after_current_event() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime::ZERO, Ev::PushThenScheduleNow(1, 2));

    let mut world = LogWorld::default();
    sim.run(&mut world).expect("run");

    assert_eq!(world.log, vec![1, 2]);
    assert_eq!(sim.now(), SimTime::ZERO);
}

#[test]
fn cancel_removes_event_and_returns_payload() {
    let mut sim = Simulator::default();
    let a = sim.schedule(SimTime(5), Ev::Push(1));
    sim.schedule(SimTime(6), Ev::Push(2));

    assert_eq!(sim.cancel(a), Ok(Ev::Push(1)));
    assert!(!sim.is_scheduled(a));
    assert_eq!(sim.len(), 1);

    let mut world = LogWorld::default();
    sim.run(&mut world).expect("run");
    assert_eq!(world.log, vec![2]);
}

#[test]
fn cancel_or_reschedule_unknown_event_is_an_error() {
    let mut sim: Simulator<Ev> = Simulator::default();
    let id = sim.schedule(SimTime(1), Ev::Push(1));
    sim.cancel(id).expect("first cancel");

    assert_eq!(sim.cancel(id), Err(SimError::UnknownEvent(id)));
    assert_eq!(sim.reschedule(id, SimTime(3)), Err(SimError::UnknownEvent(id)));
    assert_eq!(
        sim.cancel(EventId(999)),
        Err(SimError::UnknownEvent(EventId(999)))
    );
}

#[test]
fn reschedule_moves_event_and_keeps_its_sequence_number() {
    let mut sim = Simulator::default();
    let early = sim.schedule(SimTime(1), Ev::Push(1));
    sim.schedule(SimTime(5), Ev::Push(2));

    // 保留原序列号：与 2 同时触发时仍然排在 2 之前
    sim.reschedule(early, SimTime(5)).expect("reschedule");
    assert_eq!(sim.scheduled_at(early), Some(SimTime(5)));
    assert_eq!(sim.len(), 2);

    let mut world = LogWorld::default();
    sim.run(&mut world).expect("run");
    assert_eq!(world.log, vec![1, 2]);
}

#[test]
fn schedule_in_the_past_is_clamped_to_now() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime(10), Ev::Push(1));
    let mut world = LogWorld::default();
    sim.run(&mut world).expect("run");

    let id = sim.schedule(SimTime(3), Ev::Push(2));
    assert_eq!(sim.scheduled_at(id), Some(SimTime(10)));
    sim.reschedule(id, SimTime(4)).expect("reschedule");
    assert_eq!(sim.scheduled_at(id), Some(SimTime(10)));
}

#[test]
fn pop_min_advances_clock() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime(7), Ev::Push(1));
    let ev = sim.pop_min().expect("event");
    assert_eq!(ev.at, SimTime(7));
    assert_eq!(ev.ev, Ev::Push(1));
    assert_eq!(sim.now(), SimTime(7));
    assert!(sim.pop_min().is_none());
}

#[test]
fn world_done_stops_the_loop_with_events_pending() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime(1), Ev::Stop);
    sim.schedule(SimTime(2), Ev::Push(1));

    let mut world = LogWorld::default();
    sim.run(&mut world).expect("run");
    assert!(world.log.is_empty());
    assert_eq!(sim.len(), 1);
    assert_eq!(sim.now(), SimTime(1));
}

#[test]
fn run_until_skips_events_after_until_and_advances_time() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime::ZERO, Ev::Push(1));
    sim.schedule(SimTime(10), Ev::Push(2));

    let mut world = LogWorld::default();
    sim.run_until(SimTime(5), &mut world).expect("run_until");
    assert_eq!(world.log, vec![1]);
    assert_eq!(sim.now(), SimTime(5));

    sim.run(&mut world).expect("run");
    assert_eq!(world.log, vec![1, 2]);
    assert_eq!(sim.now(), SimTime(10));
}

#[test]
fn run_until_executes_events_scheduled_exactly_at_until() {
    let mut sim = Simulator::default();
    sim.schedule(SimTime(5), Ev::Push(1));

    let mut world = LogWorld::default();
    sim.run_until(SimTime(5), &mut world).expect("run_until");
    assert_eq!(world.log, vec![1]);
    assert_eq!(sim.now(), SimTime(5));
}

#[test]
fn run_until_advances_time_even_if_there_are_no_events() {
    let mut sim: Simulator<Ev> = Simulator::default();
    let mut world = LogWorld::default();

    sim.run_until(SimTime(7), &mut world).expect("run_until");
    assert_eq!(sim.now(), SimTime(7));
    assert!(world.log.is_empty());
}

#[test]
fn handler_error_aborts_the_run() {
    struct Failing;
    impl World for Failing {
        type Event = Ev;
        fn handle(&mut self, _ev: Ev, _sim: &mut Simulator<Ev>) -> Result<(), SimError> {
            Err(SimError::UnknownEvent(EventId(42)))
        }
    }

    let mut sim = Simulator::default();
    sim.schedule(SimTime(1), Ev::Push(1));
    sim.schedule(SimTime(2), Ev::Push(2));
    let err = sim.run(&mut Failing).expect_err("must fail");
    assert_eq!(err, SimError::UnknownEvent(EventId(42)));
    assert_eq!(sim.len(), 1);
}
