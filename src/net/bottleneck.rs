//! 瓶颈链路探测
//!
//! 对路径上每条链路求 `fair_throughput`，取最小值所在的链路为瓶颈。
//! 路径较长时可以用 rayon 并行求值；并行区域只读链路与流状态，
//! 归约规则固定为“份额最小、并列时取路径上最靠前的链路”，
//! 因此结果与调度顺序无关。

use std::time::Instant;

use rayon::prelude::*;

use super::id::LinkId;
use super::link::FlowState;
use super::links::LinkTable;

/// 并行探测策略
#[derive(Debug, Clone, Copy)]
pub struct ProbePolicy {
    pub parallel: bool,
    /// 路径短于此长度时总是顺序求值
    pub min_parallel_path: usize,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            parallel: false,
            min_parallel_path: 8,
        }
    }
}

/// 每条流各自记录的顺序/并行耗时，用于自适应选择求值方式。
///
/// 当前方式的耗时超过另一种方式上次的耗时就切换过去；否则把另一种方式的
/// 记录按 0.9 衰减，使其迟早被再试一次。
#[derive(Debug, Clone, Copy)]
pub struct ProbeTiming {
    pub use_parallel: bool,
    t_seq: f64,
    t_par: f64,
}

impl Default for ProbeTiming {
    fn default() -> Self {
        Self {
            use_parallel: true,
            t_seq: 0.0,
            t_par: 0.0,
        }
    }
}

impl ProbeTiming {
    fn record_parallel(&mut self, secs: f64) {
        if secs > self.t_seq {
            self.use_parallel = false;
            self.t_par = secs;
        } else {
            self.t_seq *= 0.9;
        }
    }

    fn record_sequential(&mut self, secs: f64) {
        if secs > self.t_par {
            self.use_parallel = true;
            self.t_seq = secs;
        } else {
            self.t_par *= 0.9;
        }
    }
}

/// 探测结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bottleneck {
    pub link: LinkId,
    pub rate: f64,
}

/// 顺序求路径瓶颈。空路径返回 None。
pub fn probe_sequential<F>(path: &[LinkId], links: &LinkTable, new_streams: usize, flows: &F) -> Option<Bottleneck>
where
    F: FlowState + ?Sized,
{
    let mut best: Option<Bottleneck> = None;
    for &id in path {
        let rate = links.get(id).fair_throughput(new_streams, flows);
        if best.is_none_or(|b| rate < b.rate) {
            best = Some(Bottleneck { link: id, rate });
        }
    }
    best
}

/// 并行求路径瓶颈，结果与 [`probe_sequential`] 相同。
pub fn probe_parallel<F>(path: &[LinkId], links: &LinkTable, new_streams: usize, flows: &F) -> Option<Bottleneck>
where
    F: FlowState + Sync + ?Sized,
{
    path.par_iter()
        .enumerate()
        .map(|(pos, &id)| (pos, id, links.get(id).fair_throughput(new_streams, flows)))
        .min_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)))
        .map(|(_, link, rate)| Bottleneck { link, rate })
}

/// 按策略与流自身的计时记录选择求值方式。
pub fn probe<F>(
    path: &[LinkId],
    links: &LinkTable,
    new_streams: usize,
    flows: &F,
    policy: ProbePolicy,
    timing: &mut ProbeTiming,
) -> Option<Bottleneck>
where
    F: FlowState + Sync + ?Sized,
{
    if !policy.parallel || path.len() < policy.min_parallel_path {
        return probe_sequential(path, links, new_streams, flows);
    }
    let t0 = Instant::now();
    if timing.use_parallel {
        let res = probe_parallel(path, links, new_streams, flows);
        timing.record_parallel(t0.elapsed().as_secs_f64());
        res
    } else {
        let res = probe_sequential(path, links, new_streams, flows);
        timing.record_sequential(t0.elapsed().as_secs_f64());
        res
    }
}
