//! 对话请求：类型、构造与按类型的过期规则

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::world::{ticks_for_secs, AgentId, RegionId, World};

/// Urgent 请求的存活时间（秒）
pub const URGENT_TTL_SECS: f64 = 5.0;
/// 其余可过期请求的存活时间（秒）
pub const DEFAULT_TTL_SECS: f64 = 10.0;

/// 请求类型，决定入队位置与过期规则
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TalkKind {
    Ordinary,
    Urgent,
    User,
    Event,
    QuestOffer,
    QuestEnd,
    Thought,
    StatusChange,
    LevelUp,
}

impl TalkKind {
    /// 拼入 prompt 的类型标题
    pub fn header(self) -> &'static str {
        match self {
            TalkKind::Ordinary => "Casual chat",
            TalkKind::Urgent => "Urgent situation",
            TalkKind::User => "Direct instruction",
            TalkKind::Event => "World event",
            TalkKind::QuestOffer => "Quest offered",
            TalkKind::QuestEnd => "Quest concluded",
            TalkKind::Thought => "Inner thought",
            TalkKind::StatusChange => "Health change",
            TalkKind::LevelUp => "Skill improved",
        }
    }
}

impl fmt::Display for TalkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// 一次生成请求
#[derive(Clone, Debug)]
pub struct DialogueRequest {
    pub kind: TalkKind,
    pub prompt: String,
    /// 池中请求在认领前没有发起者
    pub initiator: Option<AgentId>,
    pub recipient: Option<AgentId>,
    pub region: Option<RegionId>,
    pub created_tick: u64,
    /// 是否为独白（仅一人参与）
    pub monologue: bool,
    /// Thought 请求对应的心理状态标识
    pub thought: Option<String>,
}

impl DialogueRequest {
    pub fn new(kind: TalkKind, prompt: impl Into<String>, initiator: AgentId, now: u64) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            initiator: Some(initiator),
            recipient: None,
            region: None,
            created_tick: now,
            monologue: false,
            thought: None,
        }
    }

    /// 操作者直接下达的指令
    pub fn user(prompt: impl Into<String>, initiator: AgentId, recipient: Option<AgentId>, now: u64) -> Self {
        Self {
            recipient,
            ..Self::new(TalkKind::User, prompt, initiator, now)
        }
    }

    /// 心理状态触发，状态消失即过期
    pub fn thought(thought: impl Into<String>, prompt: impl Into<String>, initiator: AgentId, now: u64) -> Self {
        Self {
            thought: Some(thought.into()),
            ..Self::new(TalkKind::Thought, prompt, initiator, now)
        }
    }

    /// 尚未绑定发起者、等待区域内任意 Agent 认领的请求
    pub fn pooled(kind: TalkKind, prompt: impl Into<String>, region: RegionId, now: u64) -> Self {
        Self {
            kind,
            prompt: prompt.into(),
            initiator: None,
            recipient: None,
            region: Some(region),
            created_tick: now,
            monologue: false,
            thought: None,
        }
    }

    /// 兜底请求：空 prompt，谈谈当前处境
    pub fn ambient(initiator: AgentId, now: u64) -> Self {
        Self::new(TalkKind::Ordinary, "", initiator, now)
    }

    pub fn with_recipient(mut self, recipient: AgentId) -> Self {
        self.recipient = Some(recipient);
        self
    }

    /// 认领：绑定发起者，返回新请求
    pub fn claimed_by(&self, initiator: AgentId) -> Self {
        Self {
            initiator: Some(initiator),
            ..self.clone()
        }
    }

    pub fn is_user(&self) -> bool {
        self.kind == TalkKind::User
    }

    /// 按类型判断是否过期
    pub fn is_expired(&self, world: &dyn World, now: u64) -> bool {
        let age = now.saturating_sub(self.created_tick);
        match self.kind {
            TalkKind::User => false,
            TalkKind::Urgent => {
                let calm = match self.initiator {
                    Some(id) => !world.is_in_danger(id),
                    None => false,
                };
                calm || age > ticks_for_secs(URGENT_TTL_SECS)
            }
            TalkKind::Thought => match (self.initiator, self.thought.as_deref()) {
                (Some(id), Some(thought)) => !world.is_thought_active(id, thought),
                _ => age > ticks_for_secs(DEFAULT_TTL_SECS),
            },
            _ => age > ticks_for_secs(DEFAULT_TTL_SECS),
        }
    }
}
