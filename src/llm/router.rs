//! 服务商注册表与故障转移
//!
//! - 持有按优先级排列的配置列表与当前索引；active_config 从当前索引起找第一个有效配置
//! - get_client 按配置身份哈希缓存客户端，配置变化时重建
//! - 调用失败后 try_next_config 换到下一个有效配置；索引确实移动了才重试，且只重试一次

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{ChatProvider, ChunkSink, MockChatProvider, OpenAiClient, Payload};
use crate::config::{LlmTimeoutsSection, ProviderConfig, ProviderKind};
use crate::core::{FailureReporter, ProviderError, TalkError};
use crate::memory::Message;

/// 根据配置构造客户端（测试可注入）
pub type ProviderFactory = Arc<dyn Fn(&ProviderConfig) -> Arc<dyn ChatProvider> + Send + Sync>;

/// 默认工厂：Mock 走内存客户端，其余走 OpenAI 兼容客户端
pub fn default_factory(timeouts: LlmTimeoutsSection) -> ProviderFactory {
    Arc::new(move |cfg: &ProviderConfig| -> Arc<dyn ChatProvider> {
        match cfg.kind {
            ProviderKind::Mock => Arc::new(MockChatProvider::new(cfg.model.clone())),
            _ => {
                let endpoint = cfg.endpoint();
                Arc::new(
                    OpenAiClient::new(endpoint.as_deref(), &cfg.model, Some(&cfg.api_key))
                        .with_timeouts(timeouts.request, timeouts.stream),
                )
            }
        }
    })
}

fn identity_hash(cfg: &ProviderConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    cfg.hash(&mut hasher);
    hasher.finish()
}

struct RegistryState {
    configs: Vec<ProviderConfig>,
    current: usize,
    cached: Option<(u64, Arc<dyn ChatProvider>)>,
}

pub struct ProviderRegistry {
    state: Mutex<RegistryState>,
    factory: ProviderFactory,
    reporter: Option<Arc<FailureReporter>>,
}

impl ProviderRegistry {
    pub fn new(configs: Vec<ProviderConfig>, current_index: usize, factory: ProviderFactory) -> Self {
        let current = if configs.is_empty() { 0 } else { current_index % configs.len() };
        Self {
            state: Mutex::new(RegistryState {
                configs,
                current,
                cached: None,
            }),
            factory,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<FailureReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// 设置变更：替换配置、丢弃缓存的客户端并清除通知锁存
    pub fn set_configs(&self, configs: Vec<ProviderConfig>, current_index: usize) {
        {
            let mut state = self.state.lock();
            state.current = if configs.is_empty() { 0 } else { current_index % configs.len() };
            state.configs = configs;
            state.cached = None;
        }
        if let Some(reporter) = &self.reporter {
            reporter.reset();
        }
    }

    pub fn configs(&self) -> Vec<ProviderConfig> {
        self.state.lock().configs.clone()
    }

    pub fn current_index(&self) -> usize {
        self.state.lock().current
    }

    /// 从当前索引开始找第一个有效配置，并把索引更新到它
    pub fn active_config(&self) -> Option<ProviderConfig> {
        let mut state = self.state.lock();
        let n = state.configs.len();
        for i in 0..n {
            let idx = (state.current + i) % n;
            if state.configs[idx].is_valid() {
                state.current = idx;
                return Some(state.configs[idx].clone());
            }
        }
        None
    }

    pub fn has_active_config(&self) -> bool {
        self.active_config().is_some()
    }

    /// 前进到下一个有效配置（环绕）；少于两个配置时不动。返回索引是否移动
    pub fn try_next_config(&self) -> bool {
        let mut state = self.state.lock();
        let n = state.configs.len();
        if n <= 1 {
            return false;
        }
        let original = state.current;
        let next = (1..n)
            .map(|i| (original + i) % n)
            .find(|&idx| state.configs[idx].is_valid());
        match next {
            Some(idx) => {
                state.current = idx;
                tracing::info!(from = original, to = idx, model = %state.configs[idx].model, "Switched provider configuration");
                true
            }
            None => false,
        }
    }

    /// 当前有效配置对应的客户端；配置身份变化时重建
    pub fn get_client(&self) -> Option<Arc<dyn ChatProvider>> {
        let cfg = self.active_config()?;
        let hash = identity_hash(&cfg);
        let mut state = self.state.lock();
        if let Some((cached_hash, client)) = &state.cached {
            if *cached_hash == hash {
                return Some(client.clone());
            }
        }
        tracing::debug!(kind = ?cfg.kind, model = %cfg.model, "Building provider client");
        let client = (self.factory)(&cfg);
        state.cached = Some((hash, client.clone()));
        Some(client)
    }

    /// 失败后切换配置；切换成功返回新客户端并发出重试提示
    fn failover(&self, err: &ProviderError) -> Option<Arc<dyn ChatProvider>> {
        if !self.try_next_config() {
            return None;
        }
        let client = self.get_client()?;
        match &self.reporter {
            Some(reporter) => reporter.report_retry(err, client.model()),
            None => tracing::warn!(error = %err, next_model = client.model(), "Retrying with next provider"),
        }
        Some(client)
    }

    /// 非流式调用，失败时最多换一个配置重试一次
    pub async fn complete_with_failover(
        &self,
        instruction: &str,
        messages: &[Message],
    ) -> Result<Payload, TalkError> {
        let client = self.get_client().ok_or(TalkError::ConfigurationMissing)?;
        let first = match client.complete(instruction, messages).await {
            Ok(payload) => return Ok(payload),
            Err(e) => e,
        };
        let Some(next) = self.failover(&first) else {
            return Err(first.into());
        };
        next.complete(instruction, messages).await.map_err(|retry| {
            tracing::warn!(error = %retry, "Retry failed");
            TalkError::from(retry)
        })
    }

    /// 流式调用，失败时最多换一个配置重试一次；重试前通知 sink 丢弃半截输出
    pub async fn stream_with_failover(
        &self,
        instruction: &str,
        messages: &[Message],
        sink: &mut dyn ChunkSink,
    ) -> Result<Payload, TalkError> {
        let client = self.get_client().ok_or(TalkError::ConfigurationMissing)?;
        let first = match client
            .complete_stream(instruction, messages, &mut |c: &str| sink.on_chunk(c))
            .await
        {
            Ok(payload) => return Ok(payload),
            Err(e) => e,
        };
        let Some(next) = self.failover(&first) else {
            return Err(first.into());
        };
        sink.restart();
        next.complete_stream(instruction, messages, &mut |c: &str| sink.on_chunk(c))
            .await
            .map_err(|retry| {
                tracing::warn!(error = %retry, "Retry failed");
                TalkError::from(retry)
            })
    }
}
