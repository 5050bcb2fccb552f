//! 生成尝试的阶段状态机
//!
//! Idle → Validating → ContextBuilding → AwaitingProvider → Streaming → Finalizing → Idle，
//! 任意阶段都可以进入 Aborted。阶段通过 watch 通道对外投影，调用方可随时查看一次尝试走到了哪里。

use serde::Serialize;
use tokio::sync::watch;

/// 单次生成尝试的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TalkPhase {
    Idle,
    Validating,
    ContextBuilding,
    AwaitingProvider,
    Streaming,
    Finalizing,
    Aborted,
}

impl TalkPhase {
    pub fn can_advance_to(self, next: TalkPhase) -> bool {
        use TalkPhase::*;
        match (self, next) {
            (Aborted, Aborted) | (Idle, Aborted) => false,
            (_, Aborted) => true,
            (Idle, Validating)
            | (Validating, ContextBuilding)
            | (ContextBuilding, AwaitingProvider)
            | (AwaitingProvider, Streaming)
            | (Streaming, Finalizing)
            | (Finalizing, Idle)
            | (Aborted, Idle) => true,
            _ => false,
        }
    }

    /// 是否已结束（回到 Idle 或中止）
    pub fn is_terminal(self) -> bool {
        matches!(self, TalkPhase::Idle | TalkPhase::Aborted)
    }
}

/// 阶段推进器：非法迁移会被拒绝并记录
#[derive(Debug)]
pub struct PhaseTracker {
    tx: watch::Sender<TalkPhase>,
}

impl PhaseTracker {
    pub fn new() -> (Self, watch::Receiver<TalkPhase>) {
        let (tx, rx) = watch::channel(TalkPhase::Idle);
        (Self { tx }, rx)
    }

    pub fn current(&self) -> TalkPhase {
        *self.tx.borrow()
    }

    pub fn advance(&self, next: TalkPhase) -> bool {
        let current = self.current();
        if !current.can_advance_to(next) {
            tracing::warn!(?current, ?next, "Illegal phase transition ignored");
            return false;
        }
        self.tx.send_replace(next);
        true
    }

    pub fn abort(&self) {
        self.advance(TalkPhase::Aborted);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let (tracker, rx) = PhaseTracker::new();
        for phase in [
            TalkPhase::Validating,
            TalkPhase::ContextBuilding,
            TalkPhase::AwaitingProvider,
            TalkPhase::Streaming,
            TalkPhase::Finalizing,
            TalkPhase::Idle,
        ] {
            assert!(tracker.advance(phase), "{phase:?}");
        }
        assert_eq!(*rx.borrow(), TalkPhase::Idle);
    }

    #[test]
    fn test_abort_from_any_active_phase() {
        let (tracker, rx) = PhaseTracker::new();
        tracker.advance(TalkPhase::Validating);
        tracker.advance(TalkPhase::ContextBuilding);
        tracker.abort();
        assert_eq!(*rx.borrow(), TalkPhase::Aborted);
        assert!(rx.borrow().is_terminal());
        assert!(!tracker.advance(TalkPhase::Streaming));
    }

    #[test]
    fn test_no_skipping() {
        let (tracker, _rx) = PhaseTracker::new();
        assert!(!tracker.advance(TalkPhase::Streaming));
        assert_eq!(tracker.current(), TalkPhase::Idle);
    }
}
