//! 融合协调器：把两个独立的人格状态在一段时间内融合为第三个状态
//!
//! 状态机：Inactive → Activating（进度按固定步数从 0 升到 1）→ Active（进度固定为 1，广播一次激活事件）→ Inactive（stabilize）。
//! 进度作为数据通过 watch 通道暴露，协调器本身不接触任何展示层状态。
//! 坡道与重置都通过 `send_if_modified` 在 watch 内部锁中完成，并用代数（generation）判断坡道是否已过期。

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::FusionSection;
use crate::core::{EventBus, InsightEvent, Persona, FUSION_ACTIVATED_TOPIC};

/// 融合阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FusionPhase {
    Inactive,
    Activating,
    Active,
}

/// 单个源人格在融合中的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AgentActivity {
    Idle,
    Fusing,
    Fused,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AgentState {
    pub persona: Persona,
    pub activity: AgentActivity,
}

impl AgentState {
    pub fn idle(persona: Persona) -> Self {
        Self {
            persona,
            activity: AgentActivity::Idle,
        }
    }
}

/// 融合状态快照
#[derive(Clone, Debug, Serialize)]
pub struct FusionState {
    pub active: bool,
    /// [0, 1]，激活期间单调不减
    pub progress: f64,
    pub phase: FusionPhase,
    pub source_a: AgentState,
    pub source_b: AgentState,
    #[serde(skip)]
    generation: u64,
}

impl FusionState {
    fn inactive(source_a: Persona, source_b: Persona) -> Self {
        Self {
            active: false,
            progress: 0.0,
            phase: FusionPhase::Inactive,
            source_a: AgentState::idle(source_a),
            source_b: AgentState::idle(source_b),
            generation: 0,
        }
    }

    fn set_sources(&mut self, activity: AgentActivity) {
        self.source_a.activity = activity;
        self.source_b.activity = activity;
    }
}

/// 融合协调器（单实例坡道；重复 initiate 为幂等，不排队）
pub struct FusionCoordinator {
    bus: EventBus,
    state_tx: Arc<watch::Sender<FusionState>>,
    ramp: Mutex<Option<CancellationToken>>,
    steps: usize,
    step_interval: Duration,
    payload: String,
}

impl FusionCoordinator {
    pub fn new(bus: EventBus, config: &FusionSection) -> Self {
        let (state_tx, _) = watch::channel(FusionState::inactive(config.source_a, config.source_b));
        Self {
            bus,
            state_tx: Arc::new(state_tx),
            ramp: Mutex::new(None),
            steps: config.steps.max(2),
            step_interval: Duration::from_millis(config.step_interval_ms),
            payload: format!(
                "Fusion activated: {} and {} merged into a unified agent",
                config.source_a, config.source_b
            ),
        }
    }

    /// 当前状态快照
    pub fn state(&self) -> FusionState {
        self.state_tx.borrow().clone()
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<FusionState> {
        self.state_tx.subscribe()
    }

    /// 激活时广播的固定描述文本
    pub fn activation_payload(&self) -> &str {
        &self.payload
    }

    /// 开始融合；已在 Activating / Active 时为 no-op。需在 tokio 运行时内调用。
    pub fn initiate_fusion(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("initiate_fusion called outside a tokio runtime, ignored");
            return;
        };

        let mut generation = 0;
        let started = self.state_tx.send_if_modified(|s| {
            if s.active {
                return false;
            }
            s.generation += 1;
            generation = s.generation;
            s.active = true;
            s.progress = 0.0;
            s.phase = FusionPhase::Activating;
            s.set_sources(AgentActivity::Fusing);
            true
        });
        if !started {
            tracing::debug!("fusion already active, initiate ignored");
            return;
        }

        let token = CancellationToken::new();
        let previous = self
            .ramp
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        tracing::info!(steps = self.steps, "fusion ramp started");
        handle.spawn(run_ramp(
            Arc::clone(&self.state_tx),
            self.bus.clone(),
            token,
            generation,
            self.steps,
            self.step_interval,
            self.payload.clone(),
        ));
    }

    /// 取消进行中的坡道，并原子地重置为 {active: false, progress: 0}；任何时候调用都安全
    pub fn stabilize_agents(&self) {
        if let Some(token) = self
            .ramp
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }

        self.state_tx.send_modify(|s| {
            s.generation += 1;
            s.active = false;
            s.progress = 0.0;
            s.phase = FusionPhase::Inactive;
            s.set_sources(AgentActivity::Idle);
        });
        tracing::info!("agents stabilized");
    }
}

impl Drop for FusionCoordinator {
    fn drop(&mut self) {
        if let Some(token) = self
            .ramp
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

async fn run_ramp(
    state_tx: Arc<watch::Sender<FusionState>>,
    bus: EventBus,
    token: CancellationToken,
    generation: u64,
    steps: usize,
    interval: Duration,
    payload: String,
) {
    let last = steps - 1;
    for i in 1..=last {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        let reached = i == last;
        let progress = if reached { 1.0 } else { i as f64 / last as f64 };
        let applied = state_tx.send_if_modified(|s| {
            if s.generation != generation || !s.active {
                return false;
            }
            s.progress = progress.max(s.progress);
            if reached {
                s.phase = FusionPhase::Active;
                s.set_sources(AgentActivity::Fused);
            }
            true
        });
        if !applied {
            return;
        }
    }

    bus.publish(InsightEvent::text(FUSION_ACTIVATED_TOPIC, payload));
    tracing::info!("fusion activated");
}
