//! 可观测性：日志初始化与调用统计

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // 测试中可能重复初始化
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init();
}

/// 累计调用次数与 token 数
#[derive(Debug)]
pub struct Stats {
    calls: AtomicU64,
    tokens: AtomicU64,
    started: Instant,
}

/// 某一时刻的统计快照
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatsSnapshot {
    pub total_calls: u64,
    pub total_tokens: u64,
    pub avg_tokens_per_call: f64,
    pub avg_calls_per_minute: f64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            tokens: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    /// 一次成功的服务商调用
    pub fn record_call(&self, tokens: u64) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.tokens.fetch_add(tokens, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.tokens.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total_calls = self.calls.load(Ordering::Relaxed);
        let total_tokens = self.tokens.load(Ordering::Relaxed);
        let minutes = self.started.elapsed().as_secs_f64() / 60.0;
        StatsSnapshot {
            total_calls,
            total_tokens,
            avg_tokens_per_call: if total_calls > 0 {
                total_tokens as f64 / total_calls as f64
            } else {
                0.0
            },
            avg_calls_per_minute: if minutes > 0.0 { total_calls as f64 / minutes } else { 0.0 },
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = Stats::new();
        stats.record_call(100);
        stats.record_call(50);
        let snap = stats.snapshot();
        assert_eq!(snap.total_calls, 2);
        assert_eq!(snap.total_tokens, 150);
        assert_eq!(snap.avg_tokens_per_call, 75.0);
        stats.reset();
        assert_eq!(stats.snapshot().total_calls, 0);
    }
}
