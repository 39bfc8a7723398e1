//! 规范请求 / 响应记录（对外线格式）
//!
//! AgentRequest 一旦派发即不可变：路由器只读取它，从不修改。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::RouterError;

/// 规范请求
///
/// JSON：`{"prompt", "task"?, "backend"?, "sessionId"?, "correlationId"?, "metadata": {}}`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    /// 人格提示（如 "SECURITY"）；缺省时路由器使用默认人格
    #[serde(default, rename = "backend", skip_serializing_if = "Option::is_none")]
    pub backend_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AgentRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_backend(mut self, hint: impl Into<String>) -> Self {
        self.backend_hint = Some(hint.into());
        self
    }

    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        self.task = Some(task.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 基本校验：prompt 非空；提供了会话/关联 ID 时不能是空串
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.prompt.trim().is_empty() {
            return Err(RouterError::InvalidRequest("prompt is empty".to_string()));
        }
        if matches!(self.session_id.as_deref(), Some(s) if s.is_empty()) {
            return Err(RouterError::InvalidRequest("sessionId is empty".to_string()));
        }
        if matches!(self.correlation_id.as_deref(), Some(s) if s.is_empty()) {
            return Err(RouterError::InvalidRequest(
                "correlationId is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// 规范响应
///
/// JSON：`{"content", "confidence", "meta", "agentName"}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub content: String,
    /// 始终位于 [0, 1]
    pub confidence: f64,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
    pub agent_name: String,
}

/// 把置信度夹到 [0, 1]；NaN 视为 0
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
