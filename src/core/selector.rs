//! 调度：每个 tick 至多选出一个发起者
//!
//! 1. 任意 Agent 队列中最早的 User 请求绝对优先
//! 2. 否则在可发起对话的 Agent 中做分组归一化的加权随机选择

use rand::Rng;

use crate::talk::AgentRegistry;
use crate::world::{AgentId, World};

/// 本 tick 选中的 Agent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Selection {
    pub agent: AgentId,
    /// 因待处理的 User 请求被选中
    pub user_request: bool,
}

pub fn select_next<R: Rng + ?Sized>(
    registry: &AgentRegistry,
    world: &dyn World,
    now: u64,
    talk_interval_ticks: u64,
    rng: &mut R,
) -> Option<Selection> {
    let mut oldest_user: Option<(u64, AgentId)> = None;
    let mut ready = Vec::new();

    for id in registry.ids() {
        let Some(state) = registry.get(id) else {
            continue;
        };
        let display_strict = world.can_display_strict(id);
        let state = state.lock();
        if let Some(tick) = state.oldest_user_request() {
            if oldest_user.map_or(true, |(best, _)| tick < best) {
                oldest_user = Some((tick, id));
            }
        }
        if state.can_generate(display_strict, now, talk_interval_ticks) {
            ready.push(id);
        }
    }

    if let Some((_, agent)) = oldest_user {
        return Some(Selection {
            agent,
            user_request: true,
        });
    }
    registry.select_weighted(&ready, rng).map(|agent| Selection {
        agent,
        user_request: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::TalkLog;
    use crate::talk::DialogueRequest;
    use crate::world::{Faction, SandboxAgent, SandboxWorld};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn setup(agents: Vec<SandboxAgent>) -> (SandboxWorld, AgentRegistry) {
        let world = SandboxWorld::new();
        for a in agents {
            world.add(a);
        }
        let registry = AgentRegistry::new(Arc::new(TalkLog::new()));
        registry.refresh(&world);
        (world, registry)
    }

    #[test]
    fn test_oldest_user_request_wins() {
        let (world, registry) = setup(vec![
            SandboxAgent::new(1, "Ann", Faction::FreeColonist),
            SandboxAgent::new(2, "Bob", Faction::FreeColonist),
            SandboxAgent::new(3, "Cid", Faction::FreeColonist),
        ]);
        registry.enqueue(DialogueRequest::user("late", AgentId(1), None, 50));
        registry.enqueue(DialogueRequest::user("early", AgentId(3), None, 20));
        // 正在生成也不影响 User 优先
        registry.get(AgentId(3)).unwrap().lock().set_generating(true);

        let mut rng = StdRng::seed_from_u64(3);
        let pick = select_next(&registry, &world, 1000, 300, &mut rng).unwrap();
        assert_eq!(pick, Selection { agent: AgentId(3), user_request: true });
    }

    #[test]
    fn test_none_when_nobody_can_generate() {
        let (world, registry) = setup(vec![SandboxAgent::new(1, "Ann", Faction::FreeColonist)]);
        registry.get(AgentId(1)).unwrap().lock().last_talk_tick = 900;
        let mut rng = StdRng::seed_from_u64(3);
        assert!(select_next(&registry, &world, 1000, 300, &mut rng).is_none());

        world.update(AgentId(1), |a| a.awake = false);
        assert!(select_next(&registry, &world, 5000, 300, &mut rng).is_none());
    }

    #[test]
    fn test_weighted_share_with_enemy_group() {
        // 殖民者 1.0 + 1.3，十个敌人各 1.0：敌人桶被缩放到 2.3
        let mut agents = vec![
            SandboxAgent::new(1, "Ann", Faction::FreeColonist).with_chattiness(1.0),
            SandboxAgent::new(2, "Bob", Faction::FreeColonist).with_chattiness(1.3),
        ];
        for i in 10..20 {
            agents.push(SandboxAgent::new(i, format!("Raider{i}"), Faction::Enemy));
        }
        let (world, registry) = setup(agents);

        let mut rng = StdRng::seed_from_u64(2024);
        let trials = 20_000;
        let mut colonists = 0;
        let mut ann = 0;
        for _ in 0..trials {
            let pick = select_next(&registry, &world, 1000, 300, &mut rng).unwrap();
            assert!(!pick.user_request);
            if pick.agent.0 < 10 {
                colonists += 1;
            }
            if pick.agent == AgentId(1) {
                ann += 1;
            }
        }
        let colonist_share = colonists as f64 / trials as f64;
        assert!((colonist_share - 0.5).abs() < 0.03, "colonist share = {colonist_share}");
        let ann_share = ann as f64 / colonists as f64;
        assert!((ann_share - 1.0 / 2.3).abs() < 0.03, "ann share = {ann_share}");
    }
}
