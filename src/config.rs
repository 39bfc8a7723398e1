//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `NEXUS__*` 覆盖（双下划线表示嵌套，如 `NEXUS__ROUTER__DEFAULT_PERSONA=security`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::Persona;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub router: RouterSection,
    pub scheduler: SchedulerSection,
    pub fusion: FusionSection,
    pub events: EventsSection,
    pub llm: LlmSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [router] 段：默认人格、流通道容量、单次派发超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// 请求未带 backend 提示时使用的人格
    pub default_persona: Persona,
    /// dispatch_stream 的有界通道容量
    pub stream_buffer: usize,
    /// 单次后端调用超时（秒），0 表示不限
    pub request_timeout_secs: u64,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            default_persona: Persona::Creative,
            stream_buffer: 8,
            request_timeout_secs: 60,
        }
    }
}

/// [scheduler] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// 保留的已结束任务数量上限
    pub history_limit: usize,
    /// spawn_dispatch 的并发上限
    pub max_concurrent: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            history_limit: 100,
            max_concurrent: 3,
        }
    }
}

/// [fusion] 段：进度坡道的离散步数与步间隔、参与融合的两个人格
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FusionSection {
    pub steps: usize,
    pub step_interval_ms: u64,
    pub source_a: Persona,
    pub source_b: Persona,
}

impl Default for FusionSection {
    fn default() -> Self {
        Self {
            steps: 101,
            step_interval_ms: 20,
            source_a: Persona::Security,
            source_b: Persona::Creative,
        }
    }
}

/// [events] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// 总线缓冲容量，慢订阅者超出后丢弃最旧事件
    pub capacity: usize,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

/// [llm] 段：人格后端使用的模型与外部端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 本地人格（Security / Creative）使用的后端：deepseek / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 外部模型人格的固定置信度（端点不返回置信度）
    pub default_confidence: f64,
    pub deepseek: LlmModelSection,
    pub openai: LlmModelSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model: "deepseek-chat".to_string(),
            base_url: None,
            default_confidence: 0.8,
            deepseek: LlmModelSection::default(),
            openai: LlmModelSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmModelSection {
    pub model: Option<String>,
}

/// 从 config 目录加载配置，环境变量 NEXUS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 NEXUS__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("NEXUS")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.router.default_persona, Persona::Creative);
        assert_eq!(cfg.fusion.steps, 101);
        assert_eq!(cfg.scheduler.history_limit, 100);
        assert_eq!(cfg.events.capacity, 256);
        assert_eq!(cfg.llm.provider, "mock");
    }

    #[test]
    fn test_load_from_file_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[router]
default_persona = "security"
stream_buffer = 2

[fusion]
steps = 11
source_b = "cascade"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.router.default_persona, Persona::Security);
        assert_eq!(cfg.router.stream_buffer, 2);
        // 未写出的键保持默认值
        assert_eq!(cfg.router.request_timeout_secs, 60);
        assert_eq!(cfg.fusion.steps, 11);
        assert_eq!(cfg.fusion.source_a, Persona::Security);
        assert_eq!(cfg.fusion.source_b, Persona::Aggregator);
    }
}
