//! 世界 trait
//!
//! 定义仿真世界接口。

use super::error::SimError;
use super::simulator::Simulator;

/// 仿真世界：由业务层实现（例如 CDN 拓扑/流/缓存等）。
///
/// 事件负载是一个带标签的枚举，`handle` 对其做穷尽匹配后交给拥有者处理。
pub trait World {
    type Event;

    fn handle(&mut self, ev: Self::Event, sim: &mut Simulator<Self::Event>) -> Result<(), SimError>;

    /// 返回 true 时主循环提前结束（即使队列非空）。
    fn is_done(&self) -> bool {
        false
    }
}
