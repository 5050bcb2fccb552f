//! 短期记忆：每个 Agent 的对话历史
//!
//! 只保留最近 N 条消息；连续两条同角色消息合并为后一条，保证 user / assistant 交替。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConversationMemory {
    messages: Vec<Message>,
    max_messages: usize,
}

impl ConversationMemory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_messages,
        }
    }

    pub fn push(&mut self, msg: Message) {
        match self.messages.last_mut() {
            Some(last) if last.role == msg.role => *last = msg,
            _ => self.messages.push(msg),
        }
        self.prune();
    }

    /// 记录一轮：prompt 与生成的台词
    pub fn push_exchange(&mut self, prompt: impl Into<String>, transcript: impl Into<String>) {
        self.push(Message::user(prompt));
        self.push(Message::assistant(transcript));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// 超出上限时丢弃最旧的消息
    fn prune(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_role_collapses_to_latest() {
        let mut mem = ConversationMemory::new(5);
        mem.push(Message::user("a"));
        mem.push(Message::user("b"));
        assert_eq!(mem.messages(), &[Message::user("b")]);
        mem.push(Message::assistant("c"));
        assert_eq!(mem.len(), 2);
    }

    #[test]
    fn test_prune_keeps_most_recent() {
        let mut mem = ConversationMemory::new(5);
        for i in 0..4 {
            mem.push_exchange(format!("p{i}"), format!("r{i}"));
        }
        assert_eq!(mem.len(), 5);
        assert_eq!(mem.messages()[0], Message::assistant("r1"));
        assert_eq!(mem.messages()[4], Message::assistant("r3"));
    }
}
