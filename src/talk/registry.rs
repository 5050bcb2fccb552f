//! Agent 注册表：当前可发言的 Agent 集合、名字索引与分组归一化的加权随机选择
//!
//! 注册表会被刷新与查询并发访问，使用 DashMap；单个 Agent 的状态放在 Mutex 中，只短暂持有。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;

use uuid::Uuid;

use crate::memory::talk_log::RETENTION_SECS;
use crate::memory::TalkLog;
use crate::talk::{AgentState, DialogueRequest};
use crate::world::{ticks_for_secs, AgentId, AgentProfile, Faction, World};

pub type SharedState = Arc<Mutex<AgentState>>;

pub struct AgentRegistry {
    agents: DashMap<AgentId, SharedState>,
    names: DashMap<String, AgentId>,
    talk_log: Arc<TalkLog>,
}

impl AgentRegistry {
    pub fn new(talk_log: Arc<TalkLog>) -> Self {
        Self {
            agents: DashMap::new(),
            names: DashMap::new(),
            talk_log,
        }
    }

    pub fn talk_log(&self) -> &Arc<TalkLog> {
        &self.talk_log
    }

    /// 与世界同步：移除不再合格的 Agent，加入新合格的，已有状态保留
    pub fn refresh(&self, world: &dyn World) {
        let profiles = world.eligible_agents();
        let live: HashSet<AgentId> = profiles.iter().map(|p| p.id).collect();

        let stale: Vec<AgentId> = self
            .agents
            .iter()
            .map(|e| *e.key())
            .filter(|id| !live.contains(id))
            .collect();
        for id in stale {
            self.deregister(id);
        }

        for profile in &profiles {
            if !self.agents.contains_key(&profile.id) {
                self.register(profile);
            }
        }

        self.prune_talk_log(world.current_tick());
    }

    /// 清理过期的展示记录；待展示台词的父句要留着，否则回复会一直等下去
    fn prune_talk_log(&self, now: u64) {
        let Some(before) = now.checked_sub(ticks_for_secs(RETENTION_SECS)) else {
            return;
        };
        let referenced: HashSet<Uuid> = self
            .agents
            .iter()
            .flat_map(|e| e.value().lock().responses().map(|r| r.parent).collect::<Vec<_>>())
            .collect();
        let removed = self.talk_log.prune(before, &referenced);
        if removed > 0 {
            tracing::debug!(removed, "Pruned talk log");
        }
    }

    pub fn register(&self, profile: &AgentProfile) -> SharedState {
        let state = self
            .agents
            .entry(profile.id)
            .or_insert_with(|| Arc::new(Mutex::new(AgentState::new(profile))))
            .clone();

        match self.names.get(&profile.name).map(|e| *e) {
            None => {
                self.names.insert(profile.name.clone(), profile.id);
            }
            Some(existing) if existing != profile.id => {
                tracing::warn!(
                    name = %profile.name,
                    kept = %existing,
                    skipped = %profile.id,
                    "Duplicate agent name, keeping first mapping"
                );
            }
            Some(_) => {}
        }
        tracing::debug!(agent = %profile.name, id = %profile.id, "Agent registered");
        state
    }

    pub fn deregister(&self, id: AgentId) -> Option<SharedState> {
        let (_, state) = self.agents.remove(&id)?;
        let name = state.lock().name.clone();
        self.names.remove_if(&name, |_, mapped| *mapped == id);
        tracing::debug!(agent = %name, id = %id, "Agent deregistered");
        Some(state)
    }

    pub fn get(&self, id: AgentId) -> Option<SharedState> {
        self.agents.get(&id).map(|e| e.value().clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<AgentId> {
        self.names.get(name).map(|e| *e)
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.agents.contains_key(&id)
    }

    /// 按 ID 排序的全部 Agent
    pub fn ids(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self.agents.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn clear(&self) {
        self.agents.clear();
        self.names.clear();
    }

    /// 是否有任何 Agent 还有未展示的台词
    pub fn any_unread(&self) -> bool {
        self.agents.iter().any(|e| e.value().lock().has_unread())
    }

    /// 把请求放入发起者队列；User 请求同时清理接收者的队列，被丢弃的台词记为 ignored
    pub fn enqueue(&self, request: DialogueRequest) -> bool {
        let Some(initiator) = request.initiator else {
            tracing::warn!(kind = %request.kind, "Request without initiator not enqueued");
            return false;
        };
        let Some(state) = self.get(initiator) else {
            tracing::debug!(id = %initiator, "Request for unknown agent dropped");
            return false;
        };

        let tick = request.created_tick;
        if request.is_user() {
            if let Some(other) = request.recipient.filter(|r| *r != initiator).and_then(|r| self.get(r)) {
                let dropped = other.lock().clear_for_user();
                self.ignore_all(&dropped, tick);
            }
        }
        let dropped = state.lock().add_request(request);
        self.ignore_all(&dropped, tick);
        true
    }

    fn ignore_all(&self, dropped: &[crate::talk::DialogueResponse], tick: u64) {
        for response in dropped {
            self.talk_log.ignore(response.id, tick);
        }
    }

    /// 在候选中做分组归一化的加权随机选择
    pub fn select_weighted<R: Rng + ?Sized>(&self, candidates: &[AgentId], rng: &mut R) -> Option<AgentId> {
        let weighted: Vec<(AgentId, Faction, f64)> = candidates
            .iter()
            .filter_map(|id| {
                self.get(*id).map(|s| {
                    let s = s.lock();
                    (*id, s.faction, s.chattiness)
                })
            })
            .collect();
        weighted_pick(&weighted, rng)
    }
}

/// 可参与计算的权重：非有限值与负值记为 0
fn usable_weight(weight: f64) -> f64 {
    if weight.is_finite() {
        weight.max(0.0)
    } else {
        0.0
    }
}

/// 阵营分桶的缩放系数：任何桶的总权重都不超过基准桶
///
/// 基准：自由殖民者桶总权重（非零时），否则取其余桶的最大值。
pub fn bucket_scales(candidates: &[(AgentId, Faction, f64)]) -> HashMap<Faction, f64> {
    let mut totals: HashMap<Faction, f64> = HashMap::new();
    for (_, faction, weight) in candidates {
        *totals.entry(*faction).or_insert(0.0) += usable_weight(*weight);
    }

    let colonists = totals.get(&Faction::FreeColonist).copied().unwrap_or(0.0);
    let baseline = if colonists > 0.0 {
        colonists
    } else {
        totals.values().copied().fold(0.0, f64::max)
    };

    totals
        .into_iter()
        .map(|(faction, total)| {
            let scale = if total <= 0.0 || baseline <= 0.0 {
                0.0
            } else if total > baseline {
                baseline / total
            } else {
                1.0
            };
            (faction, scale)
        })
        .collect()
}

/// 线性扫描累积有效权重；总有效权重为 0 时返回 None
pub fn weighted_pick<R: Rng + ?Sized>(candidates: &[(AgentId, Faction, f64)], rng: &mut R) -> Option<AgentId> {
    let scales = bucket_scales(candidates);
    let effective: Vec<(AgentId, f64)> = candidates
        .iter()
        .map(|(id, faction, weight)| {
            let scale = scales.get(faction).copied().unwrap_or(0.0);
            (*id, usable_weight(*weight) * scale)
        })
        .collect();

    let total: f64 = effective.iter().map(|(_, w)| w).sum();
    if !total.is_finite() || total <= 0.0 {
        return None;
    }

    let draw = rng.gen_range(0.0..total);
    let mut acc = 0.0;
    for (id, weight) in &effective {
        if *weight <= 0.0 {
            continue;
        }
        acc += weight;
        if draw < acc {
            return Some(*id);
        }
    }
    // 浮点误差兜底
    effective.iter().rev().find(|(_, w)| *w > 0.0).map(|(id, _)| *id)
}
