//! 外部模型人格（OpenAI / DeepSeek）
//!
//! 把 prompt 与上下文转发给 OpenAI 兼容端点；端点不返回置信度，使用配置中的固定值。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Map};

use crate::agents::{
    capability_map, collect_tokens, AgentBackend, BackendRequest, RawResponse, RawStream,
};
use crate::core::{BackendError, Persona};
use crate::llm::{CallUsage, LlmClient, Message};

/// 外部模型后端
pub struct ModelAgent {
    persona: Persona,
    name: String,
    provider: String,
    model: String,
    confidence: f64,
    client: Arc<dyn LlmClient>,
}

impl ModelAgent {
    pub fn new(
        persona: Persona,
        name: impl Into<String>,
        model: impl Into<String>,
        client: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            persona,
            name: name.into(),
            provider: persona.as_str().to_string(),
            model: model.into(),
            confidence: 0.8,
            client,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    fn messages(&self, request: &BackendRequest) -> Vec<Message> {
        vec![
            Message::system(format!(
                "{}\nAnswer the request directly and factually.",
                self.name
            )),
            request.to_user_message(),
        ]
    }

    /// 用量只在端点返回时写入，且只反映本次调用
    fn build_response(&self, content: String, usage: Option<CallUsage>) -> RawResponse {
        let mut metadata = Map::new();
        metadata.insert("provider".into(), json!(self.provider));
        metadata.insert("model".into(), json!(self.model));
        if let Some(usage) = usage {
            metadata.insert("prompt_tokens".into(), json!(usage.prompt_tokens));
            metadata.insert("completion_tokens".into(), json!(usage.completion_tokens));
        }

        RawResponse {
            content,
            confidence: self.confidence,
            metadata,
            insight: None,
            agent_name: self.name.clone(),
        }
    }
}

#[async_trait]
impl AgentBackend for ModelAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn persona(&self) -> Persona {
        self.persona
    }

    fn capabilities(&self) -> BTreeMap<String, bool> {
        capability_map(&["external_model", "streaming"])
    }

    async fn process(&self, request: &BackendRequest) -> Result<RawResponse, BackendError> {
        let completion = self
            .client
            .complete_with_usage(&self.messages(request))
            .await?;
        Ok(self.build_response(completion.content, completion.usage))
    }

    async fn process_stream(&self, request: &BackendRequest) -> Result<RawStream, BackendError> {
        let tokens = self.client.complete_stream(&self.messages(request)).await?;
        let content = collect_tokens(tokens).await?;
        Ok(Box::pin(stream::iter(vec![Ok::<_, BackendError>(
            self.build_response(content, None),
        )])))
    }
}
