//! 响应规范化
//!
//! 唯一规则：含下划线分段的键改写为驼峰（首段小写，其余段首字母大写），如 `risk_score` → `riskScore`。
//! 不含下划线的键原样保留。只做单层转换，嵌套映射里的键不动。
//! 改写后与已有键冲突时，已有键优先，被改写的值保留在原键下：任何键都不会丢失，且转换幂等。

use serde_json::{Map, Value};

use crate::agents::RawResponse;
use crate::core::{clamp_confidence, AgentResponse};

/// 响应规范化器
pub struct ResponseNormalizer;

impl ResponseNormalizer {
    /// 单个键的驼峰形式；不需要改写时返回原键
    pub fn normalize_key(key: &str) -> String {
        if !key.contains('_') {
            return key.to_string();
        }

        let mut segments = key.split('_').filter(|s| !s.is_empty());
        let Some(first) = segments.next() else {
            // 全是下划线，没有可用的分段
            return key.to_string();
        };

        let mut out = first.to_lowercase();
        for segment in segments {
            let mut chars = segment.chars();
            if let Some(c) = chars.next() {
                out.extend(c.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
        out
    }

    /// 规范化整张映射（浅层）
    pub fn normalize(raw: &Map<String, Value>) -> Map<String, Value> {
        let mut out = Map::new();

        // 已是规范形式的键先占位
        for (key, value) in raw {
            if Self::normalize_key(key) == *key {
                out.insert(key.clone(), value.clone());
            }
        }

        for (key, value) in raw {
            let target = Self::normalize_key(key);
            if target == *key {
                continue;
            }
            if out.contains_key(&target) {
                tracing::debug!(key = %key, target = %target, "normalized key collides, kept original");
                out.insert(key.clone(), value.clone());
            } else {
                out.insert(target, value.clone());
            }
        }
        out
    }

    /// 后端原生响应 → 规范响应；置信度夹到 [0, 1]，agent_name 以后端声明的名字为准
    pub fn to_response(raw: RawResponse, backend_name: &str) -> AgentResponse {
        if raw.agent_name != backend_name {
            tracing::warn!(
                reported = %raw.agent_name,
                expected = %backend_name,
                "backend reported a mismatched agent name"
            );
        }
        AgentResponse {
            content: raw.content,
            confidence: clamp_confidence(raw.confidence),
            meta: Self::normalize(&raw.metadata),
            agent_name: backend_name.to_string(),
        }
    }
}
