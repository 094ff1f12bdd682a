//! 链路类型
//!
//! 定义共享容量的链路及其公平带宽份额计算。
//!
//! 份额计算是单遍的 max-min 近似：不迭代到不动点，被排除的流在同一次调用里
//! 不会被重新审视。因此 `Expand` 抬高一条流时不压低其他流，链路负载可能
//! 短暂超过容量，直到其他流下次重算。

use std::collections::{BTreeMap, HashMap};

use super::id::{LinkId, NodeId, StreamId};

/// 链路计算公平份额时需要读取的流状态。
pub trait FlowState {
    /// 流当前获得的带宽（b/s）
    fn transmit_rate(&self, id: StreamId) -> f64;
    /// 流当前的瓶颈链路
    fn bottleneck(&self, id: StreamId) -> Option<LinkId>;
}

/// 网络链路
#[derive(Debug, Clone)]
pub struct Link {
    pub id: LinkId,
    /// 容量（b/s）
    pub capacity: f64,
    /// 视为无限容量（骨干链路），不参与份额约束
    pub unlimited: bool,
    /// 拓扑边的两个端点；接入链路为 None
    pub endpoints: Option<(NodeId, NodeId)>,
    /// 加入序号 -> 流；保持加入顺序，增删 O(log n)
    attached: BTreeMap<u64, StreamId>,
    joined: HashMap<StreamId, u64>,
    next_seq: u64,
}

impl Link {
    /// 创建新链路
    pub fn new(id: LinkId, capacity: f64) -> Self {
        Self {
            id,
            capacity,
            unlimited: false,
            endpoints: None,
            attached: BTreeMap::new(),
            joined: HashMap::new(),
            next_seq: 0,
        }
    }

    /// 当前经过此链路的流（按加入顺序）
    pub fn attached(&self) -> impl Iterator<Item = StreamId> + '_ {
        self.attached.values().copied()
    }

    pub fn attached_count(&self) -> usize {
        self.attached.len()
    }

    pub fn attach(&mut self, id: StreamId) {
        if self.joined.contains_key(&id) {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.joined.insert(id, seq);
        self.attached.insert(seq, id);
    }

    pub fn detach(&mut self, id: StreamId) -> bool {
        match self.joined.remove(&id) {
            Some(seq) => {
                self.attached.remove(&seq);
                true
            }
            None => false,
        }
    }

    /// 若再加入 `new_streams` 条流，一条流在此链路上能得到的带宽。不修改状态。
    pub fn fair_throughput<F: FlowState + ?Sized>(&self, new_streams: usize, flows: &F) -> f64 {
        if self.unlimited {
            return self.capacity;
        }
        let total = self.attached_count() + new_streams;
        if total == 0 {
            return self.capacity;
        }

        let share = self.capacity / total as f64;
        let mut remaining_capacity = self.capacity;
        let mut remaining = total;
        for s in self.attached() {
            // 瓶颈在别处且拿不满一个份额：按其实际速率扣除
            let rate = flows.transmit_rate(s);
            if flows.bottleneck(s) != Some(self.id) && rate < share {
                remaining_capacity -= rate;
                remaining -= 1;
            }
        }
        if remaining > 0 {
            remaining_capacity / remaining as f64
        } else {
            remaining_capacity
        }
    }

    /// 新流以 `new_rate` 加入时，需要被压低到 `new_rate` 的已有流。
    ///
    /// 新流只会压低已有流，不会直接提升它们。
    pub fn allocate_for_new_stream<F: FlowState + ?Sized>(&self, new_rate: f64, flows: &F) -> Vec<StreamId> {
        if self.unlimited {
            return Vec::new();
        }
        self.attached()
            .filter(|&s| flows.transmit_rate(s) > new_rate)
            .collect()
    }

    /// 已占用带宽
    pub fn load<F: FlowState + ?Sized>(&self, flows: &F) -> f64 {
        self.attached().map(|s| flows.transmit_rate(s)).sum()
    }

    /// 剩余容量；超额占用时为负
    pub fn capacity_left<F: FlowState + ?Sized>(&self, flows: &F) -> f64 {
        self.capacity - self.load(flows)
    }
}
