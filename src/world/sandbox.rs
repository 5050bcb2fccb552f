//! 内存沙盒世界：供演示程序与测试使用的 World 实现
//!
//! 手动推进的 tick 时钟；Agent 带阵营、区域、坐标、危险标记、活跃 Thought 与显示开关。

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use super::{AgentId, AgentProfile, AgentStatus, Faction, RegionId, Situation, World};

/// 听觉范围（坐标单位）
const HEARING_RANGE: f32 = 10.0;

/// 沙盒中的单个 Agent
#[derive(Clone, Debug)]
pub struct SandboxAgent {
    pub id: AgentId,
    pub name: String,
    pub faction: Faction,
    pub personality: String,
    pub chattiness: f64,
    pub region: RegionId,
    pub position: (f32, f32),
    pub activity: String,
    pub in_danger: bool,
    pub thoughts: HashSet<String>,
    /// 是否仍可参与对话（离开地图 / 死亡时为 false）
    pub eligible: bool,
    pub displayable: bool,
    /// 清醒且未卧床
    pub awake: bool,
}

impl SandboxAgent {
    pub fn new(id: u64, name: impl Into<String>, faction: Faction) -> Self {
        Self {
            id: AgentId(id),
            name: name.into(),
            faction,
            personality: String::new(),
            chattiness: 1.0,
            region: 0,
            position: (0.0, 0.0),
            activity: "idling".to_string(),
            in_danger: false,
            thoughts: HashSet::new(),
            eligible: true,
            displayable: true,
            awake: true,
        }
    }

    pub fn with_chattiness(mut self, chattiness: f64) -> Self {
        self.chattiness = chattiness;
        self
    }

    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = personality.into();
        self
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = (x, y);
        self
    }

    pub fn in_region(mut self, region: RegionId) -> Self {
        self.region = region;
        self
    }

    pub fn doing(mut self, activity: impl Into<String>) -> Self {
        self.activity = activity.into();
        self
    }

    fn profile(&self) -> AgentProfile {
        AgentProfile {
            id: self.id,
            name: self.name.clone(),
            faction: self.faction,
            personality: self.personality.clone(),
            chattiness: self.chattiness,
        }
    }

    fn distance_to(&self, other: &SandboxAgent) -> f32 {
        let dx = self.position.0 - other.position.0;
        let dy = self.position.1 - other.position.1;
        (dx * dx + dy * dy).sqrt()
    }
}

/// 内存世界
pub struct SandboxWorld {
    agents: RwLock<HashMap<AgentId, SandboxAgent>>,
    tick: AtomicU64,
    running: AtomicBool,
    situation: RwLock<Situation>,
}

impl SandboxWorld {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            tick: AtomicU64::new(0),
            running: AtomicBool::new(true),
            situation: RwLock::new(Situation {
                date: "5th of Aprimay, 5500".to_string(),
                time_of_day: "morning".to_string(),
                season: "spring".to_string(),
                weather: "clear".to_string(),
            }),
        }
    }

    pub fn add(&self, agent: SandboxAgent) {
        self.agents.write().insert(agent.id, agent);
    }

    /// 修改单个 Agent；不存在时返回 false
    pub fn update(&self, id: AgentId, f: impl FnOnce(&mut SandboxAgent)) -> bool {
        match self.agents.write().get_mut(&id) {
            Some(agent) => {
                f(agent);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: AgentId) {
        self.agents.write().remove(&id);
    }

    pub fn set_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    /// 推进 n 个 tick，返回新的 tick
    pub fn advance(&self, ticks: u64) -> u64 {
        self.tick.fetch_add(ticks, Ordering::SeqCst) + ticks
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_situation(&self, situation: Situation) {
        *self.situation.write() = situation;
    }

    fn with_agent<R>(&self, id: AgentId, f: impl FnOnce(&SandboxAgent) -> R) -> Option<R> {
        self.agents.read().get(&id).map(f)
    }
}

impl Default for SandboxWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl World for SandboxWorld {
    fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    fn eligible_agents(&self) -> Vec<AgentProfile> {
        let agents = self.agents.read();
        let mut profiles: Vec<AgentProfile> = agents
            .values()
            .filter(|a| a.eligible)
            .map(SandboxAgent::profile)
            .collect();
        profiles.sort_by_key(|p| p.id);
        profiles
    }

    fn is_eligible(&self, id: AgentId) -> bool {
        self.with_agent(id, |a| a.eligible).unwrap_or(false)
    }

    fn can_display(&self, id: AgentId) -> bool {
        self.with_agent(id, |a| a.eligible && a.displayable)
            .unwrap_or(false)
    }

    fn can_display_strict(&self, id: AgentId) -> bool {
        self.with_agent(id, |a| a.eligible && a.displayable && a.awake)
            .unwrap_or(false)
    }

    fn is_in_danger(&self, id: AgentId) -> bool {
        self.with_agent(id, |a| a.in_danger).unwrap_or(false)
    }

    fn is_thought_active(&self, id: AgentId, thought: &str) -> bool {
        self.with_agent(id, |a| a.thoughts.contains(thought))
            .unwrap_or(false)
    }

    fn region_of(&self, id: AgentId) -> Option<RegionId> {
        self.with_agent(id, |a| a.region)
    }

    fn nearby_agents(&self, id: AgentId, max: usize) -> Vec<AgentId> {
        let agents = self.agents.read();
        let Some(me) = agents.get(&id) else {
            return Vec::new();
        };
        let mut near: Vec<(f32, AgentId)> = agents
            .values()
            .filter(|a| a.id != id && a.eligible && a.region == me.region)
            .map(|a| (me.distance_to(a), a.id))
            .filter(|(d, _)| *d <= HEARING_RANGE)
            .collect();
        near.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        near.into_iter().take(max).map(|(_, id)| id).collect()
    }

    fn status(&self, id: AgentId, nearby: &[AgentId]) -> AgentStatus {
        let agents = self.agents.read();
        let Some(me) = agents.get(&id) else {
            return AgentStatus::default();
        };
        let mut text = format!("{} is {}", me.name, me.activity);
        let names: Vec<&str> = nearby
            .iter()
            .filter_map(|n| agents.get(n).map(|a| a.name.as_str()))
            .collect();
        if !names.is_empty() {
            text.push_str(&format!("; nearby: {}", names.join(", ")));
        }
        if me.in_danger {
            text.push_str(" (in danger)");
        }
        AgentStatus {
            text,
            in_danger: me.in_danger,
        }
    }

    fn describe(&self, id: AgentId) -> String {
        self.with_agent(id, |a| {
            format!(
                "Name: {}\nFaction: {:?}\nActivity: {}",
                a.name, a.faction, a.activity
            )
        })
        .unwrap_or_default()
    }

    fn situation(&self) -> Situation {
        self.situation.read().clone()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearby_sorted_and_region_bound() {
        let world = SandboxWorld::new();
        world.add(SandboxAgent::new(1, "Ann", Faction::FreeColonist));
        world.add(SandboxAgent::new(2, "Bob", Faction::FreeColonist).at(5.0, 0.0));
        world.add(SandboxAgent::new(3, "Cid", Faction::Prisoner).at(2.0, 0.0));
        world.add(SandboxAgent::new(4, "Dee", Faction::Visitor).at(1.0, 0.0).in_region(7));
        world.add(SandboxAgent::new(5, "Eve", Faction::Enemy).at(50.0, 0.0));

        let near = world.nearby_agents(AgentId(1), 10);
        assert_eq!(near, vec![AgentId(3), AgentId(2)]);
        assert_eq!(world.nearby_agents(AgentId(1), 1), vec![AgentId(3)]);
    }

    #[test]
    fn test_status_reflects_danger() {
        let world = SandboxWorld::new();
        world.add(SandboxAgent::new(1, "Ann", Faction::FreeColonist).doing("cooking"));
        let calm = world.status(AgentId(1), &[]);
        assert_eq!(calm.text, "Ann is cooking");
        assert!(!calm.in_danger);

        world.update(AgentId(1), |a| a.in_danger = true);
        let scared = world.status(AgentId(1), &[]);
        assert!(scared.in_danger);
        assert_ne!(calm, scared);
    }

    #[test]
    fn test_ineligible_agents_are_hidden() {
        let world = SandboxWorld::new();
        world.add(SandboxAgent::new(1, "Ann", Faction::FreeColonist));
        world.update(AgentId(1), |a| a.eligible = false);
        assert!(world.eligible_agents().is_empty());
        assert!(!world.can_display(AgentId(1)));
    }
}
