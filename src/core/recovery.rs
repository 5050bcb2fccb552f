//! 失败通知：将服务商故障转换为面向用户的通知
//!
//! 每类通知（配额、传输、配置缺失）带一个「已展示」锁存标记，持续故障期间只发一次，
//! 直到 reset()（如设置变更）后才会再次发出。切换服务商重试的提示不锁存。

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast;

use crate::core::{ProviderError, TalkError};

/// 通知频道容量
const NOTICE_CAPACITY: usize = 64;

/// 面向用户的通知
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    /// 配额耗尽，所有备选配置都已尝试
    QuotaExceeded(String),
    /// 生成失败（网络 / HTTP）
    GenerationFailed(String),
    /// 当前配置失败，正在切换到下一个模型重试
    Retrying { quota: bool, next_model: String },
    /// 没有可用的服务商配置（常驻提示）
    ConfigurationMissing,
}

pub struct FailureReporter {
    tx: broadcast::Sender<Notice>,
    quota_shown: AtomicBool,
    transport_shown: AtomicBool,
    config_shown: AtomicBool,
}

impl FailureReporter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            tx,
            quota_shown: AtomicBool::new(false),
            transport_shown: AtomicBool::new(false),
            config_shown: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// 清除所有锁存标记
    pub fn reset(&self) {
        self.quota_shown.store(false, Ordering::SeqCst);
        self.transport_shown.store(false, Ordering::SeqCst);
        self.config_shown.store(false, Ordering::SeqCst);
    }

    pub fn quota_shown(&self) -> bool {
        self.quota_shown.load(Ordering::SeqCst)
    }

    fn publish(&self, notice: Notice) {
        // 没有订阅者时发送失败，忽略即可
        let _ = self.tx.send(notice);
    }

    fn publish_once(&self, latch: &AtomicBool, notice: Notice) -> bool {
        if latch.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.publish(notice);
        true
    }

    /// 重试提示
    pub fn report_retry(&self, err: &ProviderError, next_model: &str) {
        tracing::warn!(error = %err, next_model, "Provider failed, trying next configuration");
        self.publish(Notice::Retrying {
            quota: err.is_quota(),
            next_model: next_model.to_string(),
        });
    }

    /// 最终失败；返回是否实际发出了通知
    pub fn report_failure(&self, err: &TalkError) -> bool {
        match err {
            TalkError::QuotaExceeded(msg) => {
                tracing::warn!(error = %msg, "Quota exceeded");
                self.publish_once(&self.quota_shown, Notice::QuotaExceeded(msg.clone()))
            }
            TalkError::TransportFailure(msg) => {
                tracing::warn!(error = %msg, "Generation failed");
                self.publish_once(&self.transport_shown, Notice::GenerationFailed(msg.clone()))
            }
            TalkError::ConfigurationMissing => self.report_config_missing(),
            TalkError::MalformedResponse(msg) => {
                tracing::warn!(error = %msg, "Dropped malformed response");
                false
            }
        }
    }

    pub fn report_config_missing(&self) -> bool {
        let sent = self.publish_once(&self.config_shown, Notice::ConfigurationMissing);
        if sent {
            tracing::warn!("No valid provider configuration, dialogue generation paused");
        }
        sent
    }
}

impl Default for FailureReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_latched_until_reset() {
        let reporter = FailureReporter::new();
        let mut rx = reporter.subscribe();
        let err = TalkError::QuotaExceeded("429".into());

        assert!(reporter.report_failure(&err));
        assert!(!reporter.report_failure(&err));
        assert!(reporter.quota_shown());
        assert_eq!(rx.try_recv().unwrap(), Notice::QuotaExceeded("429".into()));
        assert!(rx.try_recv().is_err());

        reporter.reset();
        assert!(reporter.report_failure(&err));
    }

    #[test]
    fn test_categories_are_independent() {
        let reporter = FailureReporter::new();
        assert!(reporter.report_failure(&TalkError::QuotaExceeded("q".into())));
        assert!(reporter.report_failure(&TalkError::TransportFailure("t".into())));
        assert!(reporter.report_config_missing());
        assert!(!reporter.report_config_missing());
        assert!(!reporter.report_failure(&TalkError::MalformedResponse("m".into())));
    }

    #[test]
    fn test_retry_notices_not_latched() {
        let reporter = FailureReporter::new();
        let mut rx = reporter.subscribe();
        let err = ProviderError::QuotaExceeded("x".into());
        reporter.report_retry(&err, "model-b");
        reporter.report_retry(&err, "model-b");
        assert!(matches!(rx.try_recv().unwrap(), Notice::Retrying { quota: true, .. }));
        assert!(rx.try_recv().is_ok());
    }
}
