//! 对话数据层：请求与台词模型、每个 Agent 的队列状态、注册表、区域请求池

pub mod agent_state;
pub mod pool;
pub mod registry;
pub mod request;
pub mod response;

pub use agent_state::{AgentState, HISTORY_MAX_MESSAGES};
pub use pool::RequestPool;
pub use registry::{weighted_pick, AgentRegistry, SharedState};
pub use request::{DialogueRequest, TalkKind};
pub use response::{validate_transcript, DialogueResponse, TalkLine};
