//! 对话模型客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 ChatProvider：complete（非流式）、complete_stream（边收边回调）。
//! 鉴权、HTTP/SSE 分帧与厂商错误码映射都在适配层内完成，对外只暴露 ProviderError。

use async_trait::async_trait;
use serde::Serialize;

use crate::core::ProviderError;
use crate::memory::Message;

/// 一次调用的原始请求、完整响应与 token 数
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Payload {
    pub request: String,
    pub response: String,
    pub token_count: u64,
}

/// 对话模型客户端
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// 模型名（用于日志与重试提示）
    fn model(&self) -> &str;

    /// 非流式完成
    async fn complete(&self, instruction: &str, messages: &[Message]) -> Result<Payload, ProviderError>;

    /// 流式完成：每收到一段文本调用一次 on_chunk，结束后返回完整 Payload
    async fn complete_stream(
        &self,
        instruction: &str,
        messages: &[Message],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<Payload, ProviderError>;
}

/// 流式输出的接收方
pub trait ChunkSink: Send {
    fn on_chunk(&mut self, chunk: &str);

    /// 切换服务商重试前调用，丢弃上一次未完成的半截输出
    fn restart(&mut self) {}
}

#[derive(Serialize)]
struct RequestLog<'a> {
    instruction: &'a str,
    messages: &'a [Message],
}

/// 原始请求文本（记录用）
pub fn render_request(instruction: &str, messages: &[Message]) -> String {
    serde_json::to_string(&RequestLog { instruction, messages }).unwrap_or_default()
}

/// 服务商未返回用量时的粗略估算（约 4 字符 1 token）
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}
