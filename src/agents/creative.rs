//! 创意助手人格

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream;
use serde_json::{json, Map};

use crate::agents::{
    capability_map, collect_tokens, AgentBackend, BackendRequest, RawResponse, RawStream,
};
use crate::core::{BackendError, Persona};
use crate::llm::{LlmClient, Message};

pub const CREATIVE_AGENT_NAME: &str = "Creative";

const SYSTEM_PROMPT: &str = "Creative Assistant\n\
You turn requests into vivid, original writing and design ideas. Prefer concrete imagery.";

const CREATIVE_CUES: &[&str] = &[
    "poem", "story", "design", "imagine", "lyrics", "sketch", "invent", "metaphor",
];

/// 创意助手后端
pub struct CreativeAgent {
    llm: Arc<dyn LlmClient>,
}

impl CreativeAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    fn messages(request: &BackendRequest) -> Vec<Message> {
        vec![Message::system(SYSTEM_PROMPT), request.to_user_message()]
    }

    fn build_response(request: &BackendRequest, content: String) -> RawResponse {
        let lower = request.prompt.to_lowercase();
        let cue = CREATIVE_CUES.iter().find(|c| lower.contains(**c)).copied();

        let mut metadata = Map::new();
        metadata.insert(
            "creativity_level".into(),
            json!(if cue.is_some() { "high" } else { "balanced" }),
        );
        metadata.insert("word_count".into(), json!(content.split_whitespace().count()));

        let insight = cue.map(|cue| {
            let mut insight = Map::new();
            insight.insert("evolution_stage".into(), json!("inspiration_captured"));
            insight.insert("inspiration_source".into(), json!(cue));
            insight
        });

        RawResponse {
            content,
            confidence: if cue.is_some() { 0.85 } else { 0.75 },
            metadata,
            insight,
            agent_name: CREATIVE_AGENT_NAME.to_string(),
        }
    }
}

#[async_trait]
impl AgentBackend for CreativeAgent {
    fn name(&self) -> &str {
        CREATIVE_AGENT_NAME
    }

    fn persona(&self) -> Persona {
        Persona::Creative
    }

    fn capabilities(&self) -> BTreeMap<String, bool> {
        capability_map(&["creative", "memory", "ui_generation"])
    }

    async fn process(&self, request: &BackendRequest) -> Result<RawResponse, BackendError> {
        let content = self.llm.complete(&Self::messages(request)).await?;
        Ok(Self::build_response(request, content))
    }

    /// 消费 LLM 的 Token 流，拼接后作为唯一的终止元素输出
    async fn process_stream(&self, request: &BackendRequest) -> Result<RawStream, BackendError> {
        let tokens = self.llm.complete_stream(&Self::messages(request)).await?;
        let request = request.clone();
        let response = async move {
            let content = collect_tokens(tokens).await?;
            Ok::<_, BackendError>(Self::build_response(&request, content))
        };
        Ok(Box::pin(stream::once(response)))
    }
}
