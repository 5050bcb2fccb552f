//! Talkloom - 多角色对话编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 调度、上下文组装、编排服务、阶段状态机、生成闸门、失败通知、tick 驱动
//! - **llm**: 对话模型客户端抽象与实现（OpenAI 兼容 / Mock）、服务商故障转移、流式 JSON 拼装
//! - **memory**: 短期对话历史、台词展示记录、长期记忆检索
//! - **observability**: 日志初始化与调用统计
//! - **talk**: 请求与台词模型、每个 Agent 的队列状态、注册表、区域请求池
//! - **world**: 宿主世界接口与内存沙盒实现

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod talk;
pub mod world;

pub use crate::core::{TalkService, TickDriver};
