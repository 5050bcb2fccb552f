//! 记忆层：每个 Agent 的短期对话历史、台词展示记录、长期记忆检索

pub mod conversation;
pub mod long_term;
pub mod talk_log;

pub use conversation::{ConversationMemory, Message, Role};
pub use long_term::{dedup_entries, format_for_prompt, InMemoryLongTerm, LongTermMemory, MemoryEntry, NoopLongTerm};
pub use talk_log::TalkLog;
