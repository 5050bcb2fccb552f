//! 错误类型
//!
//! - ProviderError：服务商适配层错误（配额、传输、超时、响应格式）
//! - TalkError：编排层对外的错误分类，在编排边界收口，不会传到调度层
//! - RejectReason：请求未开始生成的原因（不是错误，仅用于日志与测试）

use thiserror::Error;

/// 服务商适配层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 限流 / 配额耗尽 / 模型过载
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// 按错误文本归类（HTTP 状态码与常见厂商措辞）
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let quota = ["429", "quota", "rate limit", "rate_limit", "overloaded", "resource_exhausted", "503"];
        if quota.iter().any(|k| lower.contains(k)) {
            ProviderError::QuotaExceeded(message)
        } else {
            ProviderError::Transport(message)
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, ProviderError::QuotaExceeded(_))
    }
}

/// 编排层错误：一次生成尝试的最终失败原因
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TalkError {
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No valid provider configuration")]
    ConfigurationMissing,
}

impl From<ProviderError> for TalkError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::QuotaExceeded(m) => TalkError::QuotaExceeded(m),
            ProviderError::Transport(m) => TalkError::TransportFailure(m),
            ProviderError::Timeout(secs) => TalkError::TransportFailure(format!("timed out after {secs}s")),
            ProviderError::MalformedResponse(m) => TalkError::MalformedResponse(m),
        }
    }
}

/// 请求未被接受的原因
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("dialogue generation is disabled")]
    Disabled,

    #[error("no active provider configuration")]
    NoActiveConfig,

    #[error("another generation is in flight")]
    Busy,

    #[error("request has no initiator")]
    NoInitiator,

    #[error("initiator is not registered")]
    UnknownInitiator,

    #[error("initiator is already generating")]
    AlreadyGenerating,

    #[error("initiator cannot generate right now")]
    CannotGenerate,

    #[error("other agents still have unread lines")]
    PendingResponses,

    #[error("status unchanged since last attempt")]
    StatusUnchanged,
}
