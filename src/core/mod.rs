//! 核心编排层：错误与失败通知、阶段状态机、生成闸门、调度、上下文组装、编排服务与 tick 驱动

pub mod context;
pub mod driver;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod selector;
pub mod state;
pub mod task_scheduler;

pub use driver::TickDriver;
pub use error::{ProviderError, RejectReason, TalkError};
pub use orchestrator::{TalkService, TalkTask};
pub use recovery::{FailureReporter, Notice};
pub use selector::{select_next, Selection};
pub use state::{PhaseTracker, TalkPhase};
pub use task_scheduler::{GatePermit, GenerationGate, TaskId};
