//! 路由与后端错误类型
//!
//! 调用方通过枚举变体区分「未知人格」「后端处理失败」「已取消」，无需解析错误字符串。

use thiserror::Error;

use crate::core::Persona;
use crate::llm::LlmError;

/// RequestRouter 对调用方暴露的错误
#[derive(Error, Debug)]
pub enum RouterError {
    /// 无法识别的 backend 提示，或该人格没有注册后端；不重试
    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    /// 后端内部失败，原样包装后交给调用方
    #[error("Agent processing failed ({persona}): {cause}")]
    AgentProcessing {
        persona: Persona,
        #[source]
        cause: BackendError,
    },

    /// 调用方取消；不视为处理失败
    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// 流式派发需要 tokio 运行时来驱动生产者任务
    #[error("No tokio runtime available for streaming dispatch")]
    RuntimeUnavailable,
}

impl RouterError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RouterError::Cancelled)
    }
}

/// 后端（AgentBackend）内部错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// 级联后端的所有成员都失败
    #[error("All cascade members failed: {0}")]
    AllMembersFailed(String),

    #[error("Backend timed out after {0}s")]
    Timeout(u64),

    /// 流结束却没有产生任何元素
    #[error("Backend stream ended without a response")]
    EmptyStream,

    #[error("{0}")]
    Internal(String),
}
