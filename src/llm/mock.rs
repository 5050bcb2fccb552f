//! Mock 客户端（用于测试与演示，无需 API）
//!
//! 可预置脚本：每次调用按顺序取出一个结果（文本或错误）。脚本耗尽后：
//! - complete 返回检索参数 JSON（取最后一条 User 消息的前几个词）
//! - complete_stream 按系统指令中的 `Name: X` 行为每个参与者生成一句台词
//! 流式输出按固定字符数切块回调，用来模拟网络分包。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;

use crate::core::ProviderError;
use crate::llm::{estimate_tokens, render_request, ChatProvider, Payload};
use crate::memory::{Message, Role};
use crate::talk::TalkLine;

/// 默认切块大小（字符）
const DEFAULT_CHUNK_CHARS: usize = 6;

type Scripted = Result<String, ProviderError>;

pub struct MockChatProvider {
    model: String,
    completions: Mutex<VecDeque<Scripted>>,
    streams: Mutex<VecDeque<Scripted>>,
    chunk_chars: usize,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
}

impl MockChatProvider {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            completions: Mutex::new(VecDeque::new()),
            streams: Mutex::new(VecDeque::new()),
            chunk_chars: DEFAULT_CHUNK_CHARS,
            complete_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_completions(self, script: Vec<Scripted>) -> Self {
        self.completions.lock().extend(script);
        self
    }

    pub fn with_streams(self, script: Vec<Scripted>) -> Self {
        self.streams.lock().extend(script);
        self
    }

    pub fn with_chunk_chars(mut self, chunk_chars: usize) -> Self {
        self.chunk_chars = chunk_chars.max(1);
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    fn default_search_params(messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");
        let words: Vec<&str> = last_user.split_whitespace().rev().take(3).collect();
        serde_json::json!({ "content": words, "num": 3 }).to_string()
    }

    fn default_transcript(instruction: &str) -> String {
        let names: Vec<String> = Regex::new(r"(?m)^Name: (.+)$")
            .map(|re| {
                re.captures_iter(instruction)
                    .map(|c| c[1].trim().to_string())
                    .collect()
            })
            .unwrap_or_default();
        let lines: Vec<TalkLine> = names
            .into_iter()
            .map(|name| TalkLine {
                text: format!("{name} has something to say."),
                name,
            })
            .collect();
        serde_json::to_string(&lines).unwrap_or_else(|_| "[]".to_string())
    }

    fn chunks(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_chars)
            .map(|c| c.iter().collect())
            .collect()
    }
}

impl Default for MockChatProvider {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, instruction: &str, messages: &[Message]) -> Result<Payload, ProviderError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.completions.lock().pop_front();
        let response = match scripted {
            Some(result) => result?,
            None => Self::default_search_params(messages),
        };
        Ok(Payload {
            request: render_request(instruction, messages),
            token_count: estimate_tokens(&response),
            response,
        })
    }

    async fn complete_stream(
        &self,
        instruction: &str,
        messages: &[Message],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<Payload, ProviderError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.streams.lock().pop_front();
        let response = match scripted {
            Some(result) => result?,
            None => Self::default_transcript(instruction),
        };
        for chunk in self.chunks(&response) {
            on_chunk(&chunk);
            tokio::task::yield_now().await;
        }
        Ok(Payload {
            request: render_request(instruction, messages),
            token_count: estimate_tokens(&response),
            response,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_transcript_uses_names() {
        let mock = MockChatProvider::default();
        let mut received = String::new();
        let payload = mock
            .complete_stream("Name: Ann\nFaction: x\n\nName: Bob", &[], &mut |c: &str| received.push_str(c))
            .await
            .unwrap();
        assert_eq!(received, payload.response);
        let lines: Vec<TalkLine> = serde_json::from_str(&payload.response).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].name, "Bob");
        assert_eq!(mock.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_scripted_errors() {
        let mock = MockChatProvider::default()
            .with_completions(vec![Err(ProviderError::QuotaExceeded("429".into())), Ok("ok".into())]);
        assert!(mock.complete("", &[]).await.is_err());
        assert_eq!(mock.complete("", &[]).await.unwrap().response, "ok");
        assert_eq!(mock.complete_calls(), 2);
    }
}
