//! 人格后端：安全分析师 / 创意助手 / 级联聚合 / 外部模型

pub mod cascade;
pub mod creative;
pub mod model;
pub mod security;
pub mod traits;

pub use cascade::{CascadeAgent, CASCADE_AGENT_NAME};
pub use creative::{CreativeAgent, CREATIVE_AGENT_NAME};
pub use model::ModelAgent;
pub use security::{assess_threat, SecurityAgent, ThreatAssessment, SECURITY_AGENT_NAME};
pub use traits::{
    capability_map, collect_tokens, AgentBackend, BackendRequest, RawResponse, RawStream,
};
