//! Nexus 命令行入口
//!
//! 初始化日志、按配置组装运行时，把命令行 prompt 派发给指定人格并打印规范响应（JSON）。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use futures_util::StreamExt;
use nexus::config::{load_config, AppConfig};
use nexus::core::FusionPhase;
use nexus::{observability, AgentRequest, AgentResponse, AgentRuntime};

#[derive(Parser, Debug)]
#[command(name = "nexus", version, about = "Route a prompt to an agent persona")]
struct Cli {
    /// 人格：security / creative / aggregator / openai / deepseek（缺省用配置中的默认人格）
    #[arg(short, long)]
    persona: Option<String>,

    /// 通过流式接口派发
    #[arg(long)]
    stream: bool,

    /// 额外的配置文件
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    session: Option<String>,

    /// 派发后演示一次融合坡道
    #[arg(long)]
    fuse: bool,

    /// 请求内容
    #[arg(required = true)]
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let runtime = AgentRuntime::from_config(&cfg);

    // 订阅事件总线，把洞察与融合事件写入日志
    let mut events = runtime.bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::info!(topic = %event.topic, payload = %event.payload, "event");
        }
    });

    let mut request = AgentRequest::new(cli.prompt.join(" "));
    if let Some(persona) = cli.persona {
        request = request.with_backend(persona);
    }
    if let Some(session) = cli.session {
        request = request.with_session(session);
    }

    let response: AgentResponse = if cli.stream {
        let mut stream = runtime
            .router
            .dispatch_stream(request)
            .context("Failed to start stream dispatch")?;
        stream
            .next()
            .await
            .context("Stream ended without a response")?
            .context("Stream dispatch failed")?
    } else {
        runtime
            .router
            .dispatch(request)
            .await
            .context("Dispatch failed")?
    };
    println!("{}", serde_json::to_string_pretty(&response)?);

    if cli.fuse {
        let mut state = runtime.fusion.subscribe();
        runtime.fusion.initiate_fusion();
        state
            .wait_for(|s| s.phase == FusionPhase::Active)
            .await
            .context("Fusion state channel closed")?;
        println!("{}", runtime.fusion.activation_payload());
        runtime.fusion.stabilize_agents();
    }

    Ok(())
}
