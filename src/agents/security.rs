//! 安全分析师人格
//!
//! 由 LLM 给出分析文本，同时用关键词启发式对请求打威胁分：
//! 元数据使用下划线风格（`threat_level` / `risk_score` / `scan_target`），由路由器统一转为驼峰。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::agents::{capability_map, AgentBackend, BackendRequest, RawResponse};
use crate::core::{BackendError, Persona};
use crate::llm::{LlmClient, Message};

pub const SECURITY_AGENT_NAME: &str = "Security";

const SYSTEM_PROMPT: &str = "Security Analyst\n\
You assess every request for security threats, name the attack surface involved \
and recommend concrete mitigations. Be precise and brief.";

/// (关键词, 权重)
const INDICATORS: &[(&str, u32)] = &[
    ("exploit", 35),
    ("malware", 35),
    ("ransomware", 40),
    ("rootkit", 40),
    ("backdoor", 35),
    ("inject", 30),
    ("privilege escalation", 35),
    ("breach", 30),
    ("payload", 25),
    ("scan", 15),
    ("port", 15),
    ("vulnerab", 20),
    ("phish", 20),
    ("password", 15),
    ("credential", 15),
    ("brute", 20),
    ("firewall", 10),
];

/// 威胁评估结果
#[derive(Debug, Clone, PartialEq)]
pub struct ThreatAssessment {
    pub risk_score: u32,
    pub level: &'static str,
    pub indicators: Vec<&'static str>,
}

/// 对文本做关键词威胁评估：分数封顶 100；≥60 为 high，≥25 为 medium
pub fn assess_threat(text: &str) -> ThreatAssessment {
    let lower = text.to_lowercase();
    let matched: Vec<(&'static str, u32)> = INDICATORS
        .iter()
        .copied()
        .filter(|(k, _)| lower.contains(k))
        .collect();
    let risk_score = matched.iter().map(|(_, w)| w).sum::<u32>().min(100);
    let indicators = matched.into_iter().map(|(k, _)| k).collect();
    let level = match risk_score {
        s if s >= 60 => "high",
        s if s >= 25 => "medium",
        _ => "low",
    };
    ThreatAssessment {
        risk_score,
        level,
        indicators,
    }
}

/// 安全分析师后端
pub struct SecurityAgent {
    llm: Arc<dyn LlmClient>,
}

impl SecurityAgent {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl AgentBackend for SecurityAgent {
    fn name(&self) -> &str {
        SECURITY_AGENT_NAME
    }

    fn persona(&self) -> Persona {
        Persona::Security
    }

    fn capabilities(&self) -> BTreeMap<String, bool> {
        capability_map(&["security", "memory", "analysis"])
    }

    async fn process(&self, request: &BackendRequest) -> Result<RawResponse, BackendError> {
        let messages = vec![Message::system(SYSTEM_PROMPT), request.to_user_message()];
        let analysis = self.llm.complete(&messages).await?;

        let assessment = assess_threat(&request.prompt);
        let scan_target = request
            .get("target")
            .or_else(|| request.get("scan_target"))
            .unwrap_or("request");
        tracing::debug!(
            risk_score = assessment.risk_score,
            level = assessment.level,
            "security assessment"
        );

        let mut metadata = Map::new();
        metadata.insert("threat_level".into(), json!(assessment.level));
        metadata.insert("risk_score".into(), json!(assessment.risk_score));
        metadata.insert("scan_target".into(), json!(scan_target));
        metadata.insert("matched_indicators".into(), json!(assessment.indicators));

        let mut insight = Map::new();
        insight.insert("evolution_stage".into(), json!("threat_model_updated"));
        insight.insert("threat_level".into(), json!(assessment.level));
        insight.insert(
            "indicator_count".into(),
            Value::from(assessment.indicators.len()),
        );

        // 命中的指标越多，判断越有把握
        let confidence = 0.55 + 0.1 * assessment.indicators.len().min(4) as f64;

        Ok(RawResponse {
            content: analysis,
            confidence,
            metadata,
            insight: Some(insight),
            agent_name: SECURITY_AGENT_NAME.to_string(),
        })
    }
}
