//! 事件总线：洞察事件与融合事件的发布/订阅
//!
//! 基于 broadcast 通道，容量有界：发布方永不阻塞，慢订阅者落后时丢弃最旧的事件（收到 Lagged）。
//! 总线是显式句柄，由调用方注入 RequestRouter 与 FusionCoordinator，测试可以各自持有独立实例。

use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::Persona;

/// 融合激活事件主题
pub const FUSION_ACTIVATED_TOPIC: &str = "fusion_activated";

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// 人格洞察主题：`<persona>_insight`
pub fn insight_topic(persona: Persona) -> String {
    format!("{}_insight", persona.as_str())
}

/// 总线上的瞬时事件，不持久化；载荷为文本（洞察事件是 JSON 文本）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightEvent {
    pub topic: String,
    pub payload: String,
}

impl InsightEvent {
    pub fn text(topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: text.into(),
        }
    }
}

/// 发布/订阅句柄（Clone 后共享同一通道）
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<InsightEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 发布事件，返回送达的订阅者数量；没有订阅者时返回 0（不是错误）
    pub fn publish(&self, event: InsightEvent) -> usize {
        let topic = event.topic.clone();
        match self.tx.send(event) {
            Ok(n) => {
                tracing::debug!(topic = %topic, receivers = n, "event published");
                n
            }
            Err(_) => {
                tracing::debug!(topic = %topic, "event dropped: no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InsightEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
