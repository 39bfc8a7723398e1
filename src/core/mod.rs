//! 核心层：数据模型、错误、事件总线、任务调度、融合协调

pub mod error;
pub mod event_bus;
pub mod fusion;
pub mod persona;
pub mod task_scheduler;
pub mod types;

pub use error::{BackendError, RouterError};
pub use event_bus::{
    insight_topic, EventBus, InsightEvent, DEFAULT_EVENT_CAPACITY, FUSION_ACTIVATED_TOPIC,
};
pub use fusion::{AgentActivity, AgentState, FusionCoordinator, FusionPhase, FusionState};
pub use persona::Persona;
pub use task_scheduler::{Task, TaskId, TaskScheduler, TaskStatus};
pub use types::{clamp_confidence, AgentRequest, AgentResponse};
