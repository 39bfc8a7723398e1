//! 人格后端抽象
//!
//! 每个后端实现 AgentBackend：name / persona / capabilities / process（非流式）/ process_stream（流式）。
//! 后端只接触「后端原生」的 BackendRequest 与 RawResponse；规范化由路由器负责。

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{stream, Stream, StreamExt};
use serde_json::{Map, Value};

use crate::core::{AgentRequest, BackendError, Persona};
use crate::llm::{LlmError, Message, TokenStream};

/// 后端原生请求：prompt + 扁平化上下文
///
/// 上下文包含全部 metadata，以及存在时的 `task` / `session_id` / `correlation_id`（同名时覆盖 metadata）。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendRequest {
    pub prompt: String,
    pub context: BTreeMap<String, String>,
}

impl BackendRequest {
    pub fn from_request(request: &AgentRequest) -> Self {
        let mut context = request.metadata.clone();
        let reserved = [
            ("task", &request.task),
            ("session_id", &request.session_id),
            ("correlation_id", &request.correlation_id),
        ];
        for (key, value) in reserved {
            if let Some(value) = value {
                context.insert(key.to_string(), value.clone());
            }
        }
        Self {
            prompt: request.prompt.clone(),
            context,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// 拼成发给 LLM 的 user 消息：prompt 后附上下文列表
    pub fn to_user_message(&self) -> Message {
        if self.context.is_empty() {
            return Message::user(self.prompt.clone());
        }
        let mut text = self.prompt.clone();
        text.push_str("\n\nContext:");
        for (key, value) in &self.context {
            text.push_str(&format!("\n- {key}: {value}"));
        }
        Message::user(text)
    }
}

/// 后端原生响应：元数据键的大小写风格由各后端自定，路由器统一规范化
#[derive(Clone, Debug, PartialEq)]
pub struct RawResponse {
    pub content: String,
    pub confidence: f64,
    pub metadata: Map<String, Value>,
    /// 可选的「进化洞察」，由路由器发布到事件总线
    pub insight: Option<Map<String, Value>>,
    pub agent_name: String,
}

/// 后端响应流（至多一个终止元素）
pub type RawStream = Pin<Box<dyn Stream<Item = Result<RawResponse, BackendError>> + Send>>;

/// 人格后端 trait
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// 显示名，响应中的 agent_name 必须与之相同
    fn name(&self) -> &str;

    fn persona(&self) -> Persona;

    /// 固定能力标记，如 `{security: true, memory: true}`
    fn capabilities(&self) -> BTreeMap<String, bool> {
        BTreeMap::new()
    }

    async fn process(&self, request: &BackendRequest) -> Result<RawResponse, BackendError>;

    /// 默认把 process 的结果包装成单元素流
    async fn process_stream(&self, request: &BackendRequest) -> Result<RawStream, BackendError> {
        let response = self.process(request).await;
        Ok(Box::pin(stream::iter(vec![response])))
    }
}

/// 由能力名列表构造能力映射
pub fn capability_map(names: &[&str]) -> BTreeMap<String, bool> {
    names.iter().map(|n| (n.to_string(), true)).collect()
}

/// 把 Token 流拼接为完整文本
pub async fn collect_tokens(mut tokens: TokenStream) -> Result<String, LlmError> {
    let mut content = String::new();
    while let Some(token) = tokens.next().await {
        content.push_str(&token?);
    }
    if content.is_empty() {
        return Err(LlmError::EmptyResponse);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_request_flattens_metadata() {
        let request = AgentRequest::new("scan ports")
            .with_task("audit")
            .with_session("s-1")
            .with_metadata("target", "10.0.0.1")
            .with_metadata("task", "shadowed");
        let backend = BackendRequest::from_request(&request);

        assert_eq!(backend.prompt, "scan ports");
        assert_eq!(backend.get("target"), Some("10.0.0.1"));
        assert_eq!(backend.get("task"), Some("audit"));
        assert_eq!(backend.get("session_id"), Some("s-1"));
        assert_eq!(backend.get("correlation_id"), None);
        // 请求本身不被修改
        assert_eq!(request.metadata.get("task").map(String::as_str), Some("shadowed"));
    }

    #[test]
    fn test_user_message_lists_context() {
        let backend = BackendRequest::from_request(
            &AgentRequest::new("hello").with_metadata("mood", "calm"),
        );
        let message = backend.to_user_message();
        assert!(message.content.starts_with("hello"));
        assert!(message.content.contains("- mood: calm"));

        let bare = BackendRequest::from_request(&AgentRequest::new("hello"));
        assert_eq!(bare.to_user_message().content, "hello");
    }

    #[tokio::test]
    async fn test_collect_tokens() {
        let tokens: TokenStream = Box::pin(stream::iter(vec![
            Ok("a".to_string()),
            Ok("b".to_string()),
        ]));
        assert_eq!(collect_tokens(tokens).await.unwrap(), "ab");

        let empty: TokenStream = Box::pin(stream::iter(Vec::new()));
        assert_eq!(collect_tokens(empty).await, Err(LlmError::EmptyResponse));
    }
}
