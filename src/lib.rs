//! Nexus - 多智能体请求路由与融合状态协调层
//!
//! 模块划分：
//! - **agents**: 人格后端（安全分析师 / 创意助手 / 级联聚合 / 外部模型）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 请求/响应模型、人格、错误、事件总线、任务调度、融合协调
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化
//! - **router**: 请求路由、响应规范化、流式派发
//! - **runtime**: 按配置组装以上部件

pub mod agents;
pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod router;
pub mod runtime;

pub use crate::core::{
    AgentRequest, AgentResponse, EventBus, FusionCoordinator, InsightEvent, Persona, RouterError,
    TaskScheduler, TaskStatus,
};
pub use crate::router::{RequestRouter, ResponseNormalizer, ResponseStream};
pub use crate::runtime::AgentRuntime;
