//! 级联/聚合人格
//!
//! 把请求并发扇出给成员后端，取置信度最高的回答；整体置信度为成员置信度的平均值。
//! 只要有一个成员成功就返回成功，全部失败时才报错。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::{json, Map};

use crate::agents::{capability_map, AgentBackend, BackendRequest, RawResponse};
use crate::core::{BackendError, Persona};

pub const CASCADE_AGENT_NAME: &str = "Cascade";

/// 级联后端
pub struct CascadeAgent {
    members: Vec<Arc<dyn AgentBackend>>,
}

impl CascadeAgent {
    pub fn new(members: Vec<Arc<dyn AgentBackend>>) -> Self {
        let members = members
            .into_iter()
            .filter(|m| m.persona() != Persona::Aggregator)
            .collect();
        Self { members }
    }

    pub fn member_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name().to_string()).collect()
    }
}

#[async_trait]
impl AgentBackend for CascadeAgent {
    fn name(&self) -> &str {
        CASCADE_AGENT_NAME
    }

    fn persona(&self) -> Persona {
        Persona::Aggregator
    }

    fn capabilities(&self) -> BTreeMap<String, bool> {
        capability_map(&["aggregation", "routing"])
    }

    async fn process(&self, request: &BackendRequest) -> Result<RawResponse, BackendError> {
        if self.members.is_empty() {
            return Err(BackendError::AllMembersFailed("no members".to_string()));
        }

        let results = join_all(self.members.iter().map(|m| m.process(request))).await;

        let mut answers = Vec::new();
        let mut failures = Vec::new();
        for (member, result) in self.members.iter().zip(results) {
            match result {
                Ok(raw) => answers.push(raw),
                Err(e) => {
                    tracing::warn!(member = member.name(), error = %e, "cascade member failed");
                    failures.push(format!("{}: {}", member.name(), e));
                }
            }
        }

        // 置信度相同时保留靠前的成员
        let best = answers.iter().fold(None::<&RawResponse>, |best, a| match best {
            Some(b) if b.confidence >= a.confidence => Some(b),
            _ => Some(a),
        });
        let Some(best) = best else {
            return Err(BackendError::AllMembersFailed(failures.join("; ")));
        };

        let confidence =
            answers.iter().map(|a| a.confidence).sum::<f64>() / answers.len() as f64;
        let spread = answers
            .iter()
            .map(|a| a.confidence)
            .fold(f64::NEG_INFINITY, f64::max)
            - answers
                .iter()
                .map(|a| a.confidence)
                .fold(f64::INFINITY, f64::min);

        // 先放入最佳回答的元数据，再写聚合字段（同名时以聚合字段为准）
        let mut metadata = best.metadata.clone();
        let sources: Vec<&str> = answers.iter().map(|a| a.agent_name.as_str()).collect();
        metadata.insert("sources".into(), json!(sources));
        metadata.insert("member_count".into(), json!(self.members.len()));
        metadata.insert("failed_members".into(), json!(failures.len()));
        metadata.insert("best_agent".into(), json!(best.agent_name));

        let mut insight = Map::new();
        insight.insert("evolution_stage".into(), json!("cascade_merged"));
        insight.insert("consensus_spread".into(), json!(spread));

        Ok(RawResponse {
            content: best.content.clone(),
            confidence,
            metadata,
            insight: Some(insight),
            agent_name: CASCADE_AGENT_NAME.to_string(),
        })
    }
}
