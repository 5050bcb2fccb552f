//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；OpenAI、DeepSeek、OpenRouter、
//! Gemini 的 OpenAI 兼容层、本地 Ollama / LM Studio 都走这里。超时在适配层内处理。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

use crate::core::ProviderError;
use crate::llm::{estimate_tokens, render_request, ChatProvider, Payload};
use crate::memory::{Message, Role};

/// OpenAI 兼容客户端：持有 Client、model 名与超时；token 数随 Payload 交给调用统计
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>) -> Self {
        // 本地端点通常不校验 Key
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .unwrap_or("sk-local")
            .to_string();

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            request_timeout: Duration::from_secs(60),
            stream_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeouts(mut self, request_secs: u64, stream_secs: u64) -> Self {
        self.request_timeout = Duration::from_secs(request_secs.max(1));
        self.stream_timeout = Duration::from_secs(stream_secs.max(1));
        self
    }

    fn to_openai_messages(
        &self,
        instruction: &str,
        messages: &[Message],
    ) -> Result<Vec<ChatCompletionRequestMessage>, ProviderError> {
        let invalid = |e: async_openai::error::OpenAIError| {
            ProviderError::Transport(format!("invalid request: {e}"))
        };

        let mut out = Vec::with_capacity(messages.len() + 1);
        if !instruction.is_empty() {
            out.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(instruction.to_string())
                    .build()
                    .map_err(invalid)?,
            ));
        }
        for m in messages {
            let msg = match m.role {
                Role::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(invalid)?,
                ),
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(invalid)?,
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(m.content.clone())
                        .build()
                        .map_err(invalid)?,
                ),
            };
            out.push(msg);
        }
        Ok(out)
    }
}

#[async_trait]
impl ChatProvider for OpenAiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, instruction: &str, messages: &[Message]) -> Result<Payload, ProviderError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(instruction, messages)?)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| ProviderError::Timeout(self.request_timeout.as_secs()))?
            .map_err(|e| ProviderError::classify(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        let token_count = response
            .usage
            .as_ref()
            .map(|usage| usage.total_tokens as u64)
            .unwrap_or_else(|| estimate_tokens(&content));

        Ok(Payload {
            request: render_request(instruction, messages),
            response: content,
            token_count,
        })
    }

    async fn complete_stream(
        &self,
        instruction: &str,
        messages: &[Message],
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<Payload, ProviderError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.to_openai_messages(instruction, messages)?)
            .stream(true)
            .build()
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let mut stream = tokio::time::timeout(self.request_timeout, self.client.chat().create_stream(request))
            .await
            .map_err(|_| ProviderError::Timeout(self.request_timeout.as_secs()))?
            .map_err(|e| ProviderError::classify(e.to_string()))?;

        let deadline = tokio::time::Instant::now() + self.stream_timeout;
        let mut text = String::new();
        let mut reported: Option<u64> = None;

        loop {
            let next = tokio::time::timeout_at(deadline, stream.next())
                .await
                .map_err(|_| ProviderError::Timeout(self.stream_timeout.as_secs()))?;
            let Some(item) = next else {
                break;
            };
            let chunk = item.map_err(|e| ProviderError::classify(e.to_string()))?;
            if let Some(usage) = &chunk.usage {
                reported = Some(usage.total_tokens as u64);
            }
            for choice in &chunk.choices {
                if let Some(content) = &choice.delta.content {
                    if !content.is_empty() {
                        text.push_str(content);
                        on_chunk(content);
                    }
                }
            }
        }

        let token_count = reported.unwrap_or_else(|| estimate_tokens(&text));
        Ok(Payload {
            request: render_request(instruction, messages),
            response: text,
            token_count,
        })
    }
}
