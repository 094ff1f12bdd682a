use crate::sim::SimTime;

#[test]
fn sim_time_unit_conversions() {
    assert_eq!(SimTime::from_micros(1), SimTime(1_000));
    assert_eq!(SimTime::from_millis(1), SimTime(1_000_000));
    assert_eq!(SimTime::from_secs(1), SimTime(1_000_000_000));
}

#[test]
fn sim_time_unit_conversions_saturate_on_overflow() {
    assert_eq!(SimTime::from_micros(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::from_millis(u64::MAX), SimTime(u64::MAX));
    assert_eq!(SimTime::from_secs(u64::MAX), SimTime(u64::MAX));
}

#[test]
fn float_seconds_round_to_nanos() {
    assert_eq!(SimTime::from_secs_f64(0.01), SimTime::from_millis(10));
    assert_eq!(SimTime::from_secs_f64(1.5), SimTime(1_500_000_000));
    assert_eq!(SimTime::from_secs_f64(-3.0), SimTime::ZERO);
    assert_eq!(SimTime::from_secs_f64(f64::NAN), SimTime::ZERO);
    assert_eq!(SimTime::from_secs_f64(1e30), SimTime::MAX);
    assert!((SimTime::from_millis(250).as_secs_f64() - 0.25).abs() < 1e-12);
}

#[test]
fn secs_since_saturates_for_future_points() {
    let a = SimTime::from_millis(100);
    let b = SimTime::from_millis(350);
    assert!((b.secs_since(a) - 0.25).abs() < 1e-12);
    assert_eq!(a.secs_since(b), 0.0);
    assert_eq!(a.after_secs(0.25), b);
}
