//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TALKLOOM__*` 覆盖（双下划线表示嵌套，如 `TALKLOOM__TALK__ENABLED=false`）。

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub talk: TalkSection,
    pub llm: LlmSection,
    pub memory: MemorySection,
}

/// [talk] 段：开关、节奏与参与人数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TalkSection {
    pub enabled: bool,
    /// 同一 Agent 两次发起对话的最小间隔（秒）
    pub talk_interval_secs: f64,
    /// 回复在父句展示后的等待时间（秒）
    pub reply_interval_secs: f64,
    /// 注册表与世界同步的间隔（秒）
    pub refresh_interval_secs: f64,
    /// 允许在其他 Agent 还有未读台词时发起新对话
    pub allow_simultaneous_conversations: bool,
    /// 关闭全局单飞，允许多个普通生成同时在途
    pub allow_concurrent_bursts: bool,
    pub max_participants: usize,
    /// 查询附近 Agent 的上限
    pub nearby_limit: usize,
    /// 系统指令；为空时使用内置指令
    pub instruction: String,
}

impl Default for TalkSection {
    fn default() -> Self {
        Self {
            enabled: true,
            talk_interval_secs: 5.0,
            reply_interval_secs: 2.0,
            refresh_interval_secs: 5.0,
            allow_simultaneous_conversations: false,
            allow_concurrent_bursts: false,
            max_participants: 5,
            nearby_limit: 10,
            instruction: String::new(),
        }
    }
}

/// 服务商类型（闭集）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    DeepSeek,
    OpenRouter,
    Google,
    Local,
    Custom,
    Mock,
}

impl ProviderKind {
    /// api_key 为空时回退读取的环境变量
    pub fn key_env(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::DeepSeek => Some("DEEPSEEK_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
            ProviderKind::Google => Some("GEMINI_API_KEY"),
            ProviderKind::Local | ProviderKind::Custom | ProviderKind::Mock => None,
        }
    }

    /// 内置端点；Local / Custom 使用配置中的 base_url
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("https://api.openai.com/v1"),
            ProviderKind::DeepSeek => Some("https://api.deepseek.com/v1"),
            ProviderKind::OpenRouter => Some("https://openrouter.ai/api/v1"),
            ProviderKind::Google => Some("https://generativelanguage.googleapis.com/v1beta/openai"),
            ProviderKind::Local | ProviderKind::Custom | ProviderKind::Mock => None,
        }
    }

    /// 是否需要 API Key
    pub fn needs_key(self) -> bool {
        self.key_env().is_some()
    }
}

/// [[llm.providers]]：一个服务商配置，按数组顺序为优先级
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, model: impl Into<String>) -> Self {
        Self {
            kind,
            api_key: String::new(),
            model: model.into(),
            base_url: None,
            enabled: true,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = key.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// 基本校验：已启用、选了模型；云端需要 Key，Local / Custom 需要 base_url
    pub fn is_valid(&self) -> bool {
        if !self.enabled || self.model.trim().is_empty() {
            return false;
        }
        let has_url = self.base_url.as_deref().is_some_and(|u| !u.trim().is_empty());
        match self.kind {
            ProviderKind::Local | ProviderKind::Custom => has_url,
            ProviderKind::Mock => true,
            _ => !self.api_key.trim().is_empty(),
        }
    }

    /// 实际请求的端点
    pub fn endpoint(&self) -> Option<String> {
        self.base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.kind.default_base_url().map(String::from))
    }

    /// 空 Key 时从环境变量补全
    fn resolve_key(&mut self) {
        if !self.api_key.trim().is_empty() {
            return;
        }
        if let Some(var) = self.kind.key_env() {
            if let Ok(key) = std::env::var(var) {
                self.api_key = key;
            }
        }
    }
}

/// [llm] 段：服务商列表、当前索引与超时
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LlmSection {
    pub current_index: usize,
    pub providers: Vec<ProviderConfig>,
    pub timeouts: LlmTimeoutsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// [memory] 段：长期记忆
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub enabled: bool,
    pub max_entries: usize,
    /// 检索词生成失败时的默认结果数
    pub default_results: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1000,
            default_results: 5,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TALKLOOM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TALKLOOM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TALKLOOM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let mut cfg: AppConfig = c.try_deserialize()?;
    for provider in &mut cfg.llm.providers {
        provider.resolve_key();
    }
    Ok(cfg)
}

/// 加载失败时记录警告并使用默认配置
pub fn load_or_default(config_path: Option<PathBuf>) -> AppConfig {
    match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
    }
}
