//! 长期记忆：历史对话的存储与检索
//!
//! 生成前按检索词查询相关历史，生成后异步写入；两者都是尽力而为，失败只会少一些上下文。
//! 当前实现为 InMemoryLongTerm（关键词重叠打分），可替换为真实向量库。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::talk::{TalkKind, TalkLine};

/// 高相关度阈值：作为关键信息列出
pub const KEY_RELEVANCE: f64 = 0.72;
/// 低于此相关度的条目不进入 prompt
pub const MIN_RELEVANCE: f64 = 0.6;

/// 检索结果
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryEntry {
    pub text: String,
    pub speaker: String,
    pub date: String,
    pub kind: TalkKind,
    /// 0.0 ~ 1.0
    pub relevance: f64,
    pub listeners: Vec<String>,
}

/// 长期记忆 trait：检索与写入
#[async_trait]
pub trait LongTermMemory: Send + Sync {
    /// 按检索词查询，只返回与任一听众相关的条目
    async fn query(
        &self,
        phrases: &[String],
        listeners: &[String],
        max_results: usize,
    ) -> Result<Vec<MemoryEntry>, String>;

    /// 写入一轮对话
    async fn store(
        &self,
        lines: &[TalkLine],
        kind: TalkKind,
        listeners: &[String],
        date: &str,
    ) -> Result<(), String>;

    /// 是否启用（Noop 实现返回 false）
    fn enabled(&self) -> bool {
        true
    }
}

/// 空实现：未启用长期记忆时使用
#[derive(Clone, Default)]
pub struct NoopLongTerm;

#[async_trait]
impl LongTermMemory for NoopLongTerm {
    async fn query(&self, _: &[String], _: &[String], _: usize) -> Result<Vec<MemoryEntry>, String> {
        Ok(Vec::new())
    }

    async fn store(&self, _: &[TalkLine], _: TalkKind, _: &[String], _: &str) -> Result<(), String> {
        Ok(())
    }

    fn enabled(&self) -> bool {
        false
    }
}

struct StoredEntry {
    entry: MemoryEntry,
    tokens: HashSet<String>,
}

/// 简单内存实现：按关键词重叠检索
#[derive(Clone)]
pub struct InMemoryLongTerm {
    store: Arc<RwLock<Vec<StoredEntry>>>,
    max_entries: usize,
}

/// 将文本切分为小写词集合，用于简单相似度（词重叠数）
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .filter(|w| w.chars().count() > 1)
        .collect()
}

impl InMemoryLongTerm {
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }

    /// 命中词占查询词的比例，映射到 [0.5, 1.0]
    fn score(query: &HashSet<String>, doc: &HashSet<String>) -> f64 {
        let hits = query.intersection(doc).count();
        if hits == 0 || query.is_empty() {
            return 0.0;
        }
        0.5 + 0.5 * hits as f64 / query.len() as f64
    }
}

impl Default for InMemoryLongTerm {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl LongTermMemory for InMemoryLongTerm {
    async fn query(
        &self,
        phrases: &[String],
        listeners: &[String],
        max_results: usize,
    ) -> Result<Vec<MemoryEntry>, String> {
        let query: HashSet<String> = phrases.iter().flat_map(|p| tokenize_lower(p)).collect();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let store = self.store.read();
        let mut scored: Vec<MemoryEntry> = store
            .iter()
            .filter(|s| {
                listeners.is_empty()
                    || listeners.contains(&s.entry.speaker)
                    || s.entry.listeners.iter().any(|l| listeners.contains(l))
            })
            .filter_map(|s| {
                let relevance = Self::score(&query, &s.tokens);
                (relevance > 0.0).then(|| MemoryEntry {
                    relevance,
                    ..s.entry.clone()
                })
            })
            .collect();
        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        scored.truncate(max_results);
        Ok(scored)
    }

    async fn store(
        &self,
        lines: &[TalkLine],
        kind: TalkKind,
        listeners: &[String],
        date: &str,
    ) -> Result<(), String> {
        let mut store = self.store.write();
        for line in lines {
            let text = line.text.trim();
            if text.is_empty() {
                continue;
            }
            store.push(StoredEntry {
                tokens: tokenize_lower(text),
                entry: MemoryEntry {
                    text: text.to_string(),
                    speaker: line.name.clone(),
                    date: date.to_string(),
                    kind,
                    relevance: 0.0,
                    listeners: listeners.iter().filter(|l| **l != line.name).cloned().collect(),
                },
            });
        }
        let n = store.len();
        if n > self.max_entries {
            store.drain(0..n - self.max_entries);
        }
        Ok(())
    }
}

/// 去重（按文本，保留首次出现）
pub fn dedup_entries(entries: Vec<MemoryEntry>) -> Vec<MemoryEntry> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|e| seen.insert(e.text.clone()))
        .collect()
}

/// 将检索结果格式化为 prompt 前缀：高相关为关键信息，次相关为背景信息，其余丢弃
pub fn format_for_prompt(entries: &[MemoryEntry]) -> String {
    // 全部低于阈值时不输出空的段落标题
    if !entries.iter().any(|e| e.relevance >= MIN_RELEVANCE) {
        return String::new();
    }
    let mut out = String::from("\n[Key memories]\n");
    for e in entries.iter().filter(|e| e.relevance >= KEY_RELEVANCE) {
        out.push_str(&format!("Speaker: {} (date: {}): {}\n", e.speaker, e.date, e.text));
        if !e.listeners.is_empty() {
            out.push_str(&format!("  -> listeners: {}\n", e.listeners.join(", ")));
        }
    }
    out.push_str("[Key memories end]\n[Other memories]\n");
    for e in entries
        .iter()
        .filter(|e| e.relevance < KEY_RELEVANCE && e.relevance >= MIN_RELEVANCE)
    {
        out.push_str(&format!("{} ({}): {}\n", e.speaker, e.date, e.text));
        if !e.listeners.is_empty() {
            out.push_str(&format!("  -> listeners: {}\n", e.listeners.join(", ")));
        }
    }
    out.push_str("[Other memories end]\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(name: &str, text: &str) -> TalkLine {
        TalkLine {
            name: name.into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn test_store_and_query() {
        let mem = InMemoryLongTerm::new(10);
        mem.store(
            &[line("Ann", "The harvest was great this year"), line("Bob", "Raiders came at dawn")],
            TalkKind::Ordinary,
            &["Ann".into(), "Bob".into()],
            "5th of Aprimay",
        )
        .await
        .unwrap();

        let hits = mem.query(&["harvest".into()], &["Bob".into()], 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].speaker, "Ann");
        assert_eq!(hits[0].listeners, vec!["Bob".to_string()]);
        assert!(hits[0].relevance >= KEY_RELEVANCE);

        let strangers = mem.query(&["harvest".into()], &["Zed".into()], 5).await.unwrap();
        assert!(strangers.is_empty());
    }

    #[tokio::test]
    async fn test_capacity() {
        let mem = InMemoryLongTerm::new(2);
        for i in 0..5 {
            mem.store(&[line("Ann", &format!("entry number {i}"))], TalkKind::Ordinary, &[], "d")
                .await
                .unwrap();
        }
        assert_eq!(mem.len(), 2);
    }

    #[test]
    fn test_format_tiers() {
        let entry = |text: &str, relevance: f64| MemoryEntry {
            text: text.into(),
            speaker: "Ann".into(),
            date: "d".into(),
            kind: TalkKind::Ordinary,
            relevance,
            listeners: vec![],
        };
        let out = format_for_prompt(&[entry("high", 0.9), entry("mid", 0.65), entry("low", 0.3)]);
        let key_end = out.find("[Key memories end]").unwrap();
        assert!(out.find("high").unwrap() < key_end);
        assert!(out.find("mid").unwrap() > key_end);
        assert!(!out.contains("low"));
        assert_eq!(format_for_prompt(&[]), "");
        assert_eq!(format_for_prompt(&[entry("low", 0.3), entry("lower", 0.1)]), "");
    }

    #[test]
    fn test_dedup_keeps_first() {
        let e = |text: &str, relevance: f64| MemoryEntry {
            text: text.into(),
            speaker: "Ann".into(),
            date: "d".into(),
            kind: TalkKind::Ordinary,
            relevance,
            listeners: vec![],
        };
        let out = dedup_entries(vec![e("a", 0.9), e("b", 0.8), e("a", 0.1)]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].relevance, 0.9);
    }
}
