//! 台词展示记录：每句台词的展示 tick 与被忽略集合
//!
//! 回复需要等待父句展示后一段时间；父句被忽略时，回复也一并忽略。
//! 记录在注册表刷新时按保留窗口清理，仍被待展示台词引用的父句除外。

use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

/// 展示 / 忽略记录的保留时长（秒）
pub const RETENTION_SECS: f64 = 120.0;

#[derive(Debug, Default)]
pub struct TalkLog {
    spoken: DashMap<Uuid, u64>,
    /// 被忽略的台词及其被忽略的 tick
    ignored: DashMap<Uuid, u64>,
}

impl TalkLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_spoken(&self, id: Uuid, tick: u64) {
        self.spoken.insert(id, tick);
    }

    /// 展示 tick；nil（一轮的首句之前）视为 tick 0
    pub fn spoken_tick(&self, id: Uuid) -> Option<u64> {
        if id.is_nil() {
            return Some(0);
        }
        self.spoken.get(&id).map(|t| *t)
    }

    pub fn ignore(&self, id: Uuid, tick: u64) {
        self.ignored.insert(id, tick);
    }

    pub fn is_ignored(&self, id: Uuid) -> bool {
        self.ignored.contains_key(&id)
    }

    /// 删除早于 `before` 的记录，`keep` 中的 id 保留
    pub fn prune(&self, before: u64, keep: &HashSet<Uuid>) -> usize {
        let len = self.len();
        self.spoken.retain(|id, tick| *tick >= before || keep.contains(id));
        self.ignored.retain(|id, tick| *tick >= before || keep.contains(id));
        len - self.len()
    }

    pub fn len(&self) -> usize {
        self.spoken.len() + self.ignored.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.spoken.clear();
        self.ignored.clear();
    }
}
