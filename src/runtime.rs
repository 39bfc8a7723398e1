//! Agent 运行时：按配置组装事件总线、人格后端、路由器、任务调度器与融合协调器
//!
//! 本地人格（Security / Creative）使用 `[llm]` 段选择的客户端；外部模型人格只在对应 API Key 存在时注册。

use std::sync::Arc;

use crate::agents::{AgentBackend, CascadeAgent, CreativeAgent, ModelAgent, SecurityAgent};
use crate::config::AppConfig;
use crate::core::{EventBus, FusionCoordinator, Persona, TaskScheduler};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, DEEPSEEK_CHAT};
use crate::router::RequestRouter;

/// 组装完成的运行时，各部件共享同一个事件总线
pub struct AgentRuntime {
    pub bus: EventBus,
    pub router: Arc<RequestRouter>,
    pub scheduler: Arc<TaskScheduler>,
    pub fusion: FusionCoordinator,
}

impl AgentRuntime {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::assemble(cfg, create_llm_from_config(cfg), external_agents(cfg))
    }

    /// 全部使用 Mock LLM 的运行时（不访问网络），DeepSeek 人格也由 Mock 扮演
    pub fn with_mock(cfg: &AppConfig) -> Self {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient);
        let deepseek: Arc<dyn AgentBackend> = Arc::new(
            ModelAgent::new(Persona::DeepSeek, "DeepSeek", DEEPSEEK_CHAT, llm.clone())
                .with_confidence(cfg.llm.default_confidence),
        );
        Self::assemble(cfg, llm, vec![deepseek])
    }

    fn assemble(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        externals: Vec<Arc<dyn AgentBackend>>,
    ) -> Self {
        let bus = EventBus::new(cfg.events.capacity);
        let mut router = RequestRouter::new(bus.clone(), &cfg.router);

        let mut members: Vec<Arc<dyn AgentBackend>> = vec![
            Arc::new(SecurityAgent::new(llm.clone())),
            Arc::new(CreativeAgent::new(llm)),
        ];
        members.extend(externals);

        for member in &members {
            router.register(Arc::clone(member));
        }
        router.register(Arc::new(CascadeAgent::new(members)));

        Self {
            fusion: FusionCoordinator::new(bus.clone(), &cfg.fusion),
            scheduler: Arc::new(TaskScheduler::new(
                cfg.scheduler.history_limit,
                cfg.scheduler.max_concurrent,
            )),
            router: Arc::new(router),
            bus,
        }
    }
}

/// 根据配置与环境变量选择本地人格使用的 LLM（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let has_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "deepseek" if has_deepseek || has_openai => {
            let model = cfg
                .llm
                .deepseek
                .model
                .clone()
                .unwrap_or_else(|| cfg.llm.model.clone());
            tracing::info!("Using DeepSeek LLM ({})", model);
            Arc::new(create_deepseek_client(Some(&model)))
        }
        "openai" if has_openai => {
            let model = cfg
                .llm
                .openai
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI LLM ({})", model);
            Arc::new(OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                None,
            ))
        }
        "mock" => {
            tracing::info!("Using Mock LLM");
            Arc::new(MockLlmClient)
        }
        _ => {
            tracing::warn!(provider = %provider, "No API key set or provider unknown, using Mock LLM");
            Arc::new(MockLlmClient)
        }
    }
}

/// 有 API Key 的外部模型人格
fn external_agents(cfg: &AppConfig) -> Vec<Arc<dyn AgentBackend>> {
    let mut agents: Vec<Arc<dyn AgentBackend>> = Vec::new();

    if std::env::var("OPENAI_API_KEY").is_ok() {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        let client = Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, None));
        agents.push(Arc::new(
            ModelAgent::new(Persona::OpenAi, "OpenAI", model, client)
                .with_confidence(cfg.llm.default_confidence),
        ));
    }

    if std::env::var("DEEPSEEK_API_KEY").is_ok() {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());
        let client = Arc::new(create_deepseek_client(Some(&model)));
        agents.push(Arc::new(
            ModelAgent::new(Persona::DeepSeek, "DeepSeek", model, client)
                .with_confidence(cfg.llm.default_confidence),
        ));
    }

    if agents.is_empty() {
        tracing::info!("No external model API keys set, external personas disabled");
    }
    agents
}
