//! 单个 Agent 的运行时状态：待处理请求队列、待展示台词队列、生成标记与冷却计数
//!
//! 入队规则：
//! - User：清空非 User 请求与未读台词，排在所有非 User 请求之前。
//!   User 之间有意保持 FIFO（新的 User 请求不插到最前），与调度时“最早的 User 请求优先”一致
//! - Urgent：清空非 User 请求，紧跟在 User 之后
//! - Event / QuestOffer：插到队首，但在开头的 User / Urgent 之后
//! - 其余：追加到队尾

use std::collections::VecDeque;

use crate::memory::ConversationMemory;
use crate::talk::{DialogueRequest, DialogueResponse, TalkKind};
use crate::world::{has_passed, AgentId, AgentProfile, Faction, World};

/// 每个 Agent 保留的历史消息条数
pub const HISTORY_MAX_MESSAGES: usize = 5;

/// 状态未变时最多连续拒绝的次数
const MAX_STATUS_REJECTS: u32 = 2;

/// 非有限值（NaN / 无穷）按 0 处理，负值截到 0
fn sanitize_chattiness(c: f64) -> f64 {
    if c.is_finite() {
        c.max(0.0)
    } else {
        0.0
    }
}

#[derive(Debug)]
pub struct AgentState {
    pub id: AgentId,
    pub name: String,
    pub faction: Faction,
    pub personality: String,
    pub chattiness: f64,
    /// 最近一次构建的上下文描述
    pub context: String,
    pub last_talk_tick: u64,
    pub last_status: String,
    pub reject_count: u32,
    pub history: ConversationMemory,
    pending: VecDeque<DialogueRequest>,
    ready: VecDeque<DialogueResponse>,
    generating: bool,
}

impl AgentState {
    pub fn new(profile: &AgentProfile) -> Self {
        Self {
            id: profile.id,
            name: profile.name.clone(),
            faction: profile.faction,
            personality: profile.personality.clone(),
            chattiness: sanitize_chattiness(profile.chattiness),
            context: String::new(),
            last_talk_tick: 0,
            last_status: String::new(),
            reject_count: 0,
            history: ConversationMemory::new(HISTORY_MAX_MESSAGES),
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            generating: false,
        }
    }

    /// 按类型入队；User 请求会丢弃未读台词，返回被丢弃的台词（调用方记为 ignored）
    pub fn add_request(&mut self, request: DialogueRequest) -> Vec<DialogueResponse> {
        match request.kind {
            TalkKind::User => {
                let dropped = self.clear_for_user();
                let at = self.count_leading(|k| k == TalkKind::User);
                self.pending.insert(at, request);
                dropped
            }
            TalkKind::Urgent => {
                self.pending.retain(|r| r.is_user());
                self.pending.push_back(request);
                Vec::new()
            }
            TalkKind::Event | TalkKind::QuestOffer => {
                let at = self.count_leading(|k| matches!(k, TalkKind::User | TalkKind::Urgent));
                self.pending.insert(at, request);
                Vec::new()
            }
            _ => {
                self.pending.push_back(request);
                Vec::new()
            }
        }
    }

    /// 为 User 指令让路：移除所有非 User 请求并清空未读台词
    pub fn clear_for_user(&mut self) -> Vec<DialogueResponse> {
        self.pending.retain(|r| r.is_user());
        self.ready.drain(..).collect()
    }

    fn count_leading(&self, pred: impl Fn(TalkKind) -> bool) -> usize {
        self.pending.iter().take_while(|r| pred(r.kind)).count()
    }

    /// 丢弃队首已过期的请求，返回第一个仍有效的请求（不移除）
    pub fn next_request(&mut self, world: &dyn World, now: u64) -> Option<&DialogueRequest> {
        while let Some(front) = self.pending.front() {
            if !front.is_expired(world, now) {
                break;
            }
            if let Some(expired) = self.pending.pop_front() {
                tracing::debug!(agent = %self.name, kind = %expired.kind, "Dropped expired request");
            }
        }
        self.pending.front()
    }

    /// 成功开始生成后移除队首
    pub fn take_request(&mut self) -> Option<DialogueRequest> {
        self.pending.pop_front()
    }

    pub fn pending(&self) -> impl Iterator<Item = &DialogueRequest> {
        self.pending.iter()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 队列中最早的 User 请求的创建 tick
    pub fn oldest_user_request(&self) -> Option<u64> {
        self.pending
            .iter()
            .filter(|r| r.is_user())
            .map(|r| r.created_tick)
            .min()
    }

    pub fn push_response(&mut self, response: DialogueResponse) {
        self.ready.push_back(response);
    }

    /// 待展示的全部台词（按展示顺序）
    pub fn responses(&self) -> impl Iterator<Item = &DialogueResponse> {
        self.ready.iter()
    }

    pub fn peek_response(&self) -> Option<&DialogueResponse> {
        self.ready.front()
    }

    pub fn pop_response(&mut self) -> Option<DialogueResponse> {
        self.ready.pop_front()
    }

    /// 只保留满足条件的台词，返回被移除的
    pub fn retain_responses(&mut self, keep: impl Fn(&DialogueResponse) -> bool) -> Vec<DialogueResponse> {
        let (kept, dropped): (VecDeque<_>, VecDeque<_>) = self.ready.drain(..).partition(|r| keep(r));
        self.ready = kept;
        dropped.into()
    }

    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn has_unread(&self) -> bool {
        !self.ready.is_empty()
    }

    pub fn is_generating(&self) -> bool {
        self.generating
    }

    pub(crate) fn set_generating(&mut self, generating: bool) {
        self.generating = generating;
    }

    /// 能否发起新一轮生成：空闲、严格可显示、无未读台词、冷却已过
    pub fn can_generate(&self, display_strict: bool, now: u64, talk_interval_ticks: u64) -> bool {
        !self.generating
            && display_strict
            && self.ready.is_empty()
            && has_passed(self.last_talk_tick, now, talk_interval_ticks)
    }

    /// 防复读：状态未变且连续拒绝不足两次时拒绝；返回是否放行
    pub fn admit_status(&mut self, status: &str) -> bool {
        if status == self.last_status && self.reject_count < MAX_STATUS_REJECTS {
            self.reject_count += 1;
            return false;
        }
        self.reject_count = 0;
        self.last_status = status.to_string();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::talk::TalkLine;
    use crate::world::{SandboxAgent, SandboxWorld};
    use uuid::Uuid;

    fn state() -> AgentState {
        AgentState::new(&AgentProfile {
            id: AgentId(1),
            name: "Ann".into(),
            faction: Faction::FreeColonist,
            personality: String::new(),
            chattiness: 1.0,
        })
    }

    fn req(kind: TalkKind, prompt: &str) -> DialogueRequest {
        DialogueRequest::new(kind, prompt, AgentId(1), 0)
    }

    fn kinds(s: &AgentState) -> Vec<TalkKind> {
        s.pending().map(|r| r.kind).collect()
    }

    fn line(text: &str) -> DialogueResponse {
        DialogueResponse::new(
            TalkLine { name: "Ann".into(), text: text.into() },
            Uuid::nil(),
            TalkKind::Ordinary,
        )
    }

    #[test]
    fn test_user_clears_everything_else() {
        let mut s = state();
        s.add_request(req(TalkKind::Ordinary, "a"));
        s.add_request(req(TalkKind::Event, "b"));
        s.add_request(req(TalkKind::User, "first"));
        s.add_request(req(TalkKind::Thought, "c"));
        s.push_response(line("unread"));

        let dropped = s.add_request(req(TalkKind::User, "second"));
        assert_eq!(dropped.len(), 1);
        assert!(!s.has_unread());
        assert_eq!(kinds(&s), vec![TalkKind::User, TalkKind::User]);
        let prompts: Vec<&str> = s.pending().map(|r| r.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["first", "second"]);
    }

    #[test]
    fn test_retain_responses_returns_dropped_in_order() {
        let mut s = state();
        s.push_response(line("a"));
        s.push_response(line("b"));
        s.push_response(line("c"));
        let dropped = s.retain_responses(|r| r.text == "b");
        let texts: Vec<&str> = dropped.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
        assert_eq!(s.ready_len(), 1);
        assert_eq!(s.peek_response().unwrap().text, "b");
    }

    #[test]
    fn test_non_finite_chattiness_is_zero() {
        for c in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -2.0] {
            let s = AgentState::new(&AgentProfile {
                id: AgentId(1),
                name: "Ann".into(),
                faction: Faction::FreeColonist,
                personality: String::new(),
                chattiness: c,
            });
            assert_eq!(s.chattiness, 0.0);
        }
    }

    #[test]
    fn test_urgent_keeps_user_ahead() {
        let mut s = state();
        s.add_request(req(TalkKind::User, "u"));
        s.add_request(req(TalkKind::Ordinary, "a"));
        s.add_request(req(TalkKind::Urgent, "raid"));
        assert_eq!(kinds(&s), vec![TalkKind::User, TalkKind::Urgent]);
    }

    #[test]
    fn test_event_goes_behind_priority_requests() {
        let mut s = state();
        s.add_request(req(TalkKind::Ordinary, "a"));
        s.add_request(req(TalkKind::Urgent, "raid"));
        s.add_request(req(TalkKind::LevelUp, "b"));
        s.add_request(req(TalkKind::Event, "e1"));
        s.add_request(req(TalkKind::QuestOffer, "q"));
        assert_eq!(
            kinds(&s),
            vec![TalkKind::Urgent, TalkKind::QuestOffer, TalkKind::Event, TalkKind::LevelUp]
        );
    }

    #[test]
    fn test_next_request_skips_expired() {
        let world = SandboxWorld::new();
        world.add(SandboxAgent::new(1, "Ann", Faction::FreeColonist));
        let mut s = state();
        s.add_request(req(TalkKind::Ordinary, "old"));
        s.add_request(DialogueRequest::new(TalkKind::Ordinary, "fresh", AgentId(1), 500));

        let next = s.next_request(&world, 700).map(|r| r.prompt.clone());
        assert_eq!(next.as_deref(), Some("fresh"));
        assert_eq!(s.pending_len(), 1);
        // 只查看不移除
        assert!(s.next_request(&world, 700).is_some());
        assert_eq!(s.take_request().map(|r| r.prompt), Some("fresh".to_string()));
        assert!(s.next_request(&world, 700).is_none());
    }

    #[test]
    fn test_urgent_expires_immediately_out_of_danger() {
        let world = SandboxWorld::new();
        world.add(SandboxAgent::new(1, "Ann", Faction::FreeColonist));
        world.update(AgentId(1), |a| a.in_danger = true);
        let mut s = state();
        s.add_request(req(TalkKind::Urgent, "raid"));
        assert!(s.next_request(&world, 1).is_some());

        world.update(AgentId(1), |a| a.in_danger = false);
        assert!(s.next_request(&world, 1).is_none());
    }

    #[test]
    fn test_can_generate() {
        let mut s = state();
        s.last_talk_tick = 100;
        assert!(!s.can_generate(true, 200, 300));
        assert!(s.can_generate(true, 400, 300));
        assert!(!s.can_generate(false, 400, 300));
        s.set_generating(true);
        assert!(!s.can_generate(true, 400, 300));
        s.set_generating(false);
        s.push_response(line("x"));
        assert!(!s.can_generate(true, 400, 300));
    }

    #[test]
    fn test_status_damper() {
        let mut s = state();
        assert!(s.admit_status("cooking"));
        assert!(!s.admit_status("cooking"));
        assert!(!s.admit_status("cooking"));
        assert!(s.admit_status("cooking"));
        assert_eq!(s.reject_count, 0);
        assert!(s.admit_status("hauling"));
    }
}
