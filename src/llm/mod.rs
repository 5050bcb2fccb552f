//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Mock）、服务商故障转移、流式 JSON 拼装

pub mod assembler;
pub mod mock;
pub mod openai;
pub mod router;
pub mod traits;

pub use assembler::StreamingJsonAssembler;
pub use mock::MockChatProvider;
pub use openai::OpenAiClient;
pub use router::{default_factory, ProviderFactory, ProviderRegistry};
pub use traits::{estimate_tokens, render_request, ChatProvider, ChunkSink, Payload};
