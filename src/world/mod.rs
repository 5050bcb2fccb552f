//! 宿主世界接口：编排器对模拟世界的全部只读查询
//!
//! 核心逻辑不直接依赖具体游戏；宿主实现 World（资格判断、危险状态、附近角色、状态描述、时间天气），
//! 测试与演示使用内存实现 SandboxWorld。

pub mod sandbox;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use sandbox::{SandboxAgent, SandboxWorld};

/// 每秒对应的 tick 数（宿主时钟单位）
pub const TICKS_PER_SECOND: u64 = 60;

/// 将秒数换算为 tick
pub fn ticks_for_secs(secs: f64) -> u64 {
    (secs * TICKS_PER_SECOND as f64).round().max(0.0) as u64
}

/// 自 `since` 起是否已过去至少 `interval_ticks`
pub fn has_passed(since: u64, now: u64, interval_ticks: u64) -> bool {
    now.saturating_sub(since) >= interval_ticks
}

/// Agent 的不透明标识（宿主实体 ID）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId(pub u64);

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 区域标识（地图），用于请求池的认领范围
pub type RegionId = u32;

/// 阵营分类：仅用于加权选择时分桶
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Faction {
    FreeColonist,
    Slave,
    Prisoner,
    Visitor,
    Enemy,
}

/// 注册时由宿主提供的静态信息
#[derive(Clone, Debug)]
pub struct AgentProfile {
    pub id: AgentId,
    /// 显示名（流式输出按此名路由到说话人）
    pub name: String,
    pub faction: Faction,
    pub personality: String,
    /// 相对发言意愿，≥ 0
    pub chattiness: f64,
}

/// 当前状态描述与是否处于危险
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AgentStatus {
    pub text: String,
    pub in_danger: bool,
}

/// 时间 / 天气 / 季节，拼入 prompt
#[derive(Clone, Debug, Default)]
pub struct Situation {
    pub date: String,
    pub time_of_day: String,
    pub season: String,
    pub weather: String,
}

/// 宿主世界：编排器只通过这些查询读取世界状态
pub trait World: Send + Sync {
    /// 当前 tick
    fn current_tick(&self) -> u64;

    /// 当前所有可参与对话的 Agent
    fn eligible_agents(&self) -> Vec<AgentProfile>;

    fn is_eligible(&self, id: AgentId) -> bool;

    /// 宽松显示条件（已生成的台词能否展示）
    fn can_display(&self, id: AgentId) -> bool;

    /// 严格显示条件（清醒、未卧床等），决定能否发起新对话
    fn can_display_strict(&self, id: AgentId) -> bool;

    fn is_in_danger(&self, id: AgentId) -> bool;

    /// 触发 Thought 请求的心理状态是否仍然存在
    fn is_thought_active(&self, id: AgentId, thought: &str) -> bool;

    fn region_of(&self, id: AgentId) -> Option<RegionId>;

    /// 附近能听到的 Agent，按距离排序，最多 `max` 个
    fn nearby_agents(&self, id: AgentId, max: usize) -> Vec<AgentId>;

    /// 对外可见的状态文本（与上次相同则触发防复读）
    fn status(&self, id: AgentId, nearby: &[AgentId]) -> AgentStatus;

    /// 单个 Agent 的上下文描述块
    fn describe(&self, id: AgentId) -> String;

    fn situation(&self) -> Situation;

    /// 宿主是否仍在运行；为 false 时在途结果直接丢弃
    fn is_running(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_for_secs() {
        assert_eq!(ticks_for_secs(5.0), 300);
        assert_eq!(ticks_for_secs(0.5), 30);
        assert_eq!(ticks_for_secs(-1.0), 0);
    }

    #[test]
    fn test_has_passed() {
        assert!(has_passed(0, 300, 300));
        assert!(!has_passed(100, 300, 300));
        // 时钟回拨时不算已过去
        assert!(!has_passed(500, 300, 10));
    }
}
