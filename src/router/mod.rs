//! 请求路由器
//!
//! 按人格选择后端：请求带 backend 提示且可识别时用提示，未带提示时用默认人格，无法识别时报 UnknownPersona（不猜）。
//! 派发流程：AgentRequest → BackendRequest（扁平化上下文）→ 后端 → ResponseNormalizer → AgentResponse。
//! 后端给出的洞察映射规范化后发布到事件总线 `<persona>_insight`，发布失败只记日志，不影响主响应。

pub mod normalize;
pub mod stream;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agents::{AgentBackend, BackendRequest, RawResponse};
use crate::config::RouterSection;
use crate::core::{
    insight_topic, AgentRequest, AgentResponse, BackendError, EventBus, InsightEvent, Persona,
    RouterError,
};

pub use normalize::ResponseNormalizer;
pub use stream::{ResponseStream, StreamItem};

/// 请求路由器
pub struct RequestRouter {
    backends: HashMap<Persona, Arc<dyn AgentBackend>>,
    default_persona: Persona,
    bus: EventBus,
    stream_buffer: usize,
    request_timeout: Option<Duration>,
    /// 各人格的派发次数
    dispatch_counts: HashMap<Persona, AtomicU64>,
}

impl RequestRouter {
    pub fn new(bus: EventBus, config: &RouterSection) -> Self {
        Self {
            backends: HashMap::new(),
            default_persona: config.default_persona,
            bus,
            stream_buffer: config.stream_buffer.max(1),
            request_timeout: (config.request_timeout_secs > 0)
                .then(|| Duration::from_secs(config.request_timeout_secs)),
            dispatch_counts: Persona::ALL
                .into_iter()
                .map(|p| (p, AtomicU64::new(0)))
                .collect(),
        }
    }

    /// 注册后端；同一人格重复注册时后者覆盖前者
    pub fn register(&mut self, backend: Arc<dyn AgentBackend>) {
        let persona = backend.persona();
        tracing::info!(persona = %persona, name = backend.name(), "backend registered");
        if self.backends.insert(persona, backend).is_some() {
            tracing::warn!(persona = %persona, "backend replaced");
        }
    }

    pub fn backend(&self, persona: Persona) -> Option<Arc<dyn AgentBackend>> {
        self.backends.get(&persona).cloned()
    }

    /// 已注册的人格（按枚举顺序）
    pub fn personas(&self) -> Vec<Persona> {
        let mut personas: Vec<Persona> = self.backends.keys().copied().collect();
        personas.sort();
        personas
    }

    pub fn dispatch_count(&self, persona: Persona) -> u64 {
        self.dispatch_counts
            .get(&persona)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// 校验请求并选出后端
    fn resolve(
        &self,
        request: &AgentRequest,
    ) -> Result<(Persona, Arc<dyn AgentBackend>), RouterError> {
        request.validate()?;

        let persona = match request.backend_hint.as_deref() {
            Some(hint) => hint.parse::<Persona>()?,
            None => self.default_persona,
        };
        let backend = self
            .backends
            .get(&persona)
            .cloned()
            .ok_or_else(|| RouterError::UnknownPersona(persona.to_string()))?;

        if let Some(counter) = self.dispatch_counts.get(&persona) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(
            persona = %persona,
            session_id = request.session_id.as_deref().unwrap_or("-"),
            correlation_id = request.correlation_id.as_deref().unwrap_or("-"),
            "dispatching request"
        );
        Ok((persona, backend))
    }

    /// 派发请求；丢弃返回的 future 即取消
    pub async fn dispatch(&self, request: AgentRequest) -> Result<AgentResponse, RouterError> {
        self.dispatch_cancellable(request, &CancellationToken::new())
            .await
    }

    /// 可由调用方令牌取消的派发；取消时中止后端调用，不产生部分响应
    pub async fn dispatch_cancellable(
        &self,
        request: AgentRequest,
        cancel: &CancellationToken,
    ) -> Result<AgentResponse, RouterError> {
        let (persona, backend) = self.resolve(&request)?;
        let native = BackendRequest::from_request(&request);

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(persona = %persona, "dispatch cancelled");
                return Err(RouterError::Cancelled);
            }
            result = with_timeout(self.request_timeout, backend.process(&native)) => result,
        };

        match raw {
            Ok(raw) => Ok(finish_response(&self.bus, persona, backend.name(), raw)),
            Err(cause) => {
                tracing::warn!(persona = %persona, error = %cause, "agent processing failed");
                Err(RouterError::AgentProcessing { persona, cause })
            }
        }
    }

    /// 流式派发：人格在调用时立即解析（未知人格直接返回错误，不创建流）
    ///
    /// 需在 tokio 运行时内调用，否则返回 RuntimeUnavailable。返回的流至多产生一个终止元素。
    pub fn dispatch_stream(&self, request: AgentRequest) -> Result<ResponseStream, RouterError> {
        self.spawn_stream(request, CancellationToken::new())
    }

    /// 同 dispatch_stream，父令牌取消时流随之取消
    pub fn dispatch_stream_cancellable(
        &self,
        request: AgentRequest,
        parent: &CancellationToken,
    ) -> Result<ResponseStream, RouterError> {
        self.spawn_stream(request, parent.child_token())
    }

    fn spawn_stream(
        &self,
        request: AgentRequest,
        token: CancellationToken,
    ) -> Result<ResponseStream, RouterError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            tracing::warn!("dispatch_stream called outside a tokio runtime");
            RouterError::RuntimeUnavailable
        })?;
        let (persona, backend) = self.resolve(&request)?;
        let native = BackendRequest::from_request(&request);
        let (tx, rx) = mpsc::channel(self.stream_buffer);

        let producer = StreamProducer {
            persona,
            backend,
            native,
            bus: self.bus.clone(),
            timeout: self.request_timeout,
            token: token.clone(),
            tx,
        };
        handle.spawn(producer.run());

        Ok(ResponseStream::new(rx, token))
    }
}

struct StreamProducer {
    persona: Persona,
    backend: Arc<dyn AgentBackend>,
    native: BackendRequest,
    bus: EventBus,
    timeout: Option<Duration>,
    token: CancellationToken,
    tx: mpsc::Sender<StreamItem>,
}

impl StreamProducer {
    async fn run(self) {
        let work = async {
            let mut stream = self.backend.process_stream(&self.native).await?;
            // 只取第一个元素作为终止元素，其余部分随 stream 一起丢弃
            stream.next().await.unwrap_or(Err(BackendError::EmptyStream))
        };

        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                tracing::debug!(persona = %self.persona, "stream dispatch cancelled");
                let _ = self.tx.try_send(Err(RouterError::Cancelled));
                return;
            }
            _ = self.tx.closed() => {
                tracing::debug!(persona = %self.persona, "stream consumer dropped");
                return;
            }
            result = with_timeout(self.timeout, work) => result,
        };

        let item = match outcome {
            Ok(raw) => Ok(finish_response(
                &self.bus,
                self.persona,
                self.backend.name(),
                raw,
            )),
            Err(cause) => {
                tracing::warn!(persona = %self.persona, error = %cause, "agent stream failed");
                Err(RouterError::AgentProcessing {
                    persona: self.persona,
                    cause,
                })
            }
        };
        let _ = self.tx.send(item).await;
    }
}

async fn with_timeout<F>(timeout: Option<Duration>, call: F) -> Result<RawResponse, BackendError>
where
    F: Future<Output = Result<RawResponse, BackendError>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(BackendError::Timeout(limit.as_secs()))),
        None => call.await,
    }
}

/// 发布洞察后把原生响应转为规范响应
fn finish_response(
    bus: &EventBus,
    persona: Persona,
    backend_name: &str,
    mut raw: RawResponse,
) -> AgentResponse {
    if let Some(insight) = raw.insight.take() {
        publish_insight(bus, persona, &insight);
    }
    ResponseNormalizer::to_response(raw, backend_name)
}

/// 发后即忘：序列化失败只记日志
fn publish_insight(bus: &EventBus, persona: Persona, insight: &Map<String, Value>) {
    let normalized = ResponseNormalizer::normalize(insight);
    match serde_json::to_string(&normalized) {
        Ok(text) => {
            bus.publish(InsightEvent::text(insight_topic(persona), text));
        }
        Err(e) => {
            tracing::warn!(persona = %persona, error = %e, "failed to serialize insight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::StreamExt;
    use std::sync::atomic::AtomicBool;

    use crate::agents::{CreativeAgent, SecurityAgent};
    use crate::llm::MockLlmClient;

    /// 永远挂起的后端，用于取消测试；记录 future 是否被丢弃
    struct HangingAgent {
        dropped: Arc<AtomicBool>,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl AgentBackend for HangingAgent {
        fn name(&self) -> &str {
            "Hanging"
        }

        fn persona(&self) -> Persona {
            Persona::OpenAi
        }

        async fn process(&self, _request: &BackendRequest) -> Result<RawResponse, BackendError> {
            let _flag = DropFlag(self.dropped.clone());
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct BrokenAgent;

    #[async_trait]
    impl AgentBackend for BrokenAgent {
        fn name(&self) -> &str {
            "Broken"
        }

        fn persona(&self) -> Persona {
            Persona::DeepSeek
        }

        async fn process(&self, _request: &BackendRequest) -> Result<RawResponse, BackendError> {
            Err(BackendError::Internal("model offline".to_string()))
        }
    }

    fn router(bus: EventBus) -> RequestRouter {
        let llm = Arc::new(MockLlmClient);
        let mut router = RequestRouter::new(bus, &RouterSection::default());
        router.register(Arc::new(SecurityAgent::new(llm.clone())));
        router.register(Arc::new(CreativeAgent::new(llm)));
        router
    }

    #[tokio::test]
    async fn test_dispatch_security_example() {
        let router = router(EventBus::default());
        let response = router
            .dispatch(AgentRequest::new("scan ports").with_backend("SECURITY"))
            .await
            .unwrap();

        assert_eq!(response.agent_name, "Security");
        assert!((0.0..=1.0).contains(&response.confidence));
        assert_eq!(response.meta["threatLevel"], "medium");
        assert!(!response.meta.contains_key("threat_level"));
        assert_eq!(router.dispatch_count(Persona::Security), 1);
    }

    #[tokio::test]
    async fn test_default_persona_applies_without_hint() {
        let router = router(EventBus::default());
        let response = router.dispatch(AgentRequest::new("hello")).await.unwrap();
        assert_eq!(response.agent_name, "Creative");
    }

    #[tokio::test]
    async fn test_unknown_hint_fails() {
        let router = router(EventBus::default());
        let err = router
            .dispatch(AgentRequest::new("hello").with_backend("oracle"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownPersona(ref h) if h == "oracle"));

        // 可识别但未注册的人格同样不猜
        let err = router
            .dispatch(AgentRequest::new("hello").with_backend("deepseek"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownPersona(_)));
    }

    #[tokio::test]
    async fn test_invalid_request_rejected() {
        let router = router(EventBus::default());
        let err = router.dispatch(AgentRequest::new("")).await.unwrap_err();
        assert!(matches!(err, RouterError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_insight_published_on_bus() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let router = router(bus);

        router
            .dispatch(AgentRequest::new("scan ports").with_backend("security"))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.topic, "security_insight");
        let payload: Value = serde_json::from_str(&event.payload).unwrap();
        assert_eq!(payload["evolutionStage"], "threat_model_updated");
        assert_eq!(payload["threatLevel"], "medium");
    }

    #[tokio::test]
    async fn test_backend_error_is_wrapped() {
        let mut router = router(EventBus::default());
        router.register(Arc::new(BrokenAgent));
        let err = router
            .dispatch(AgentRequest::new("x").with_backend("DeepSeek"))
            .await
            .unwrap_err();
        match err {
            RouterError::AgentProcessing { persona, cause } => {
                assert_eq!(persona, Persona::DeepSeek);
                assert_eq!(cause, BackendError::Internal("model offline".to_string()));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_backend_call() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut router = router(EventBus::default());
        router.register(Arc::new(HangingAgent {
            dropped: dropped.clone(),
        }));

        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = router
            .dispatch_cancellable(AgentRequest::new("x").with_backend("openai"), &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_processing_error() {
        let mut router = RequestRouter::new(
            EventBus::default(),
            &RouterSection {
                request_timeout_secs: 1,
                ..RouterSection::default()
            },
        );
        router.register(Arc::new(HangingAgent {
            dropped: Arc::new(AtomicBool::new(false)),
        }));
        let err = router
            .dispatch(AgentRequest::new("x").with_backend("openai"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RouterError::AgentProcessing {
                cause: BackendError::Timeout(1),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_stream_yields_one_terminal_element() {
        let router = router(EventBus::default());
        let mut stream = router
            .dispatch_stream(AgentRequest::new("write a poem").with_backend("creative"))
            .unwrap();

        let response = stream.next().await.unwrap().unwrap();
        assert_eq!(response.agent_name, "Creative");
        assert_eq!(response.meta["creativityLevel"], "high");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_unknown_persona_fails_eagerly() {
        let router = router(EventBus::default());
        let result = router.dispatch_stream(AgentRequest::new("x").with_backend("nobody"));
        assert!(matches!(result, Err(RouterError::UnknownPersona(_))));
    }

    #[tokio::test]
    async fn test_stream_cancel_releases_backend() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut router = router(EventBus::default());
        router.register(Arc::new(HangingAgent {
            dropped: dropped.clone(),
        }));

        let mut stream = router
            .dispatch_stream(AgentRequest::new("x").with_backend("openai"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        stream.cancel();

        let item = stream.next().await;
        assert!(matches!(item, Some(Err(RouterError::Cancelled)) | None));
        assert!(stream.next().await.is_none());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stream_error_is_single_terminal_element() {
        let mut router = router(EventBus::default());
        router.register(Arc::new(BrokenAgent));
        let mut stream = router
            .dispatch_stream(AgentRequest::new("x").with_backend("deepseek"))
            .unwrap();
        assert!(matches!(
            stream.next().await,
            Some(Err(RouterError::AgentProcessing { .. }))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_parent_token_cancels_stream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let mut router = router(EventBus::default());
        router.register(Arc::new(HangingAgent {
            dropped: dropped.clone(),
        }));

        let parent = CancellationToken::new();
        let mut stream = router
            .dispatch_stream_cancellable(AgentRequest::new("x").with_backend("openai"), &parent)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        parent.cancel();

        assert!(stream.is_cancelled());
        let item = stream.next().await;
        assert!(matches!(item, Some(Err(RouterError::Cancelled)) | None));
        assert!(stream.next().await.is_none());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_stream_outside_runtime_is_an_error() {
        let router = router(EventBus::default());
        let result = router.dispatch_stream(AgentRequest::new("write a poem"));
        assert!(matches!(result, Err(RouterError::RuntimeUnavailable)));
        assert_eq!(router.dispatch_count(Persona::Creative), 0);
    }
}
