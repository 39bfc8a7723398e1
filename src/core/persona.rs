//! 人格（Persona）：后端身份的封闭集合
//!
//! 路由器按 Persona 精确匹配后端；字符串提示只在入口处解析一次，未知提示直接报错而不是猜测默认值。

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::RouterError;

/// 后端人格
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    /// 安全分析师
    Security,
    /// 创意助手
    Creative,
    /// 级联/聚合：把请求扇出给多个成员后端再合并
    #[serde(alias = "cascade")]
    Aggregator,
    /// 外部模型：OpenAI 兼容端点
    OpenAi,
    /// 外部模型：DeepSeek
    DeepSeek,
}

impl Persona {
    pub const ALL: [Persona; 5] = [
        Persona::Security,
        Persona::Creative,
        Persona::Aggregator,
        Persona::OpenAi,
        Persona::DeepSeek,
    ];

    /// 小写标识，用于事件主题（`<persona>_insight`）与日志
    pub fn as_str(&self) -> &'static str {
        match self {
            Persona::Security => "security",
            Persona::Creative => "creative",
            Persona::Aggregator => "aggregator",
            Persona::OpenAi => "openai",
            Persona::DeepSeek => "deepseek",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = RouterError;

    /// 大小写不敏感；忽略 `_` / `-` / 空格，因此 `SECURITY`、`Deep_Seek`、`open-ai` 都能识别
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "security" => Ok(Persona::Security),
            "creative" => Ok(Persona::Creative),
            "aggregator" | "cascade" => Ok(Persona::Aggregator),
            "openai" => Ok(Persona::OpenAi),
            "deepseek" => Ok(Persona::DeepSeek),
            _ => Err(RouterError::UnknownPersona(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("SECURITY".parse::<Persona>().unwrap(), Persona::Security);
        assert_eq!("Creative".parse::<Persona>().unwrap(), Persona::Creative);
        assert_eq!("cascade".parse::<Persona>().unwrap(), Persona::Aggregator);
        assert_eq!("Deep_Seek".parse::<Persona>().unwrap(), Persona::DeepSeek);
        assert_eq!("open-ai".parse::<Persona>().unwrap(), Persona::OpenAi);
    }

    #[test]
    fn test_parse_unknown_fails() {
        let err = "oracle".parse::<Persona>().unwrap_err();
        assert!(matches!(err, RouterError::UnknownPersona(ref h) if h == "oracle"));
        assert!("".parse::<Persona>().is_err());
    }

    #[test]
    fn test_as_str_round_trips() {
        for persona in Persona::ALL {
            assert_eq!(persona.as_str().parse::<Persona>().unwrap(), persona);
        }
    }

    #[test]
    fn test_serde_uses_lowercase_ids() {
        let json = serde_json::to_string(&Persona::DeepSeek).unwrap();
        assert_eq!(json, "\"deepseek\"");
        let parsed: Persona = serde_json::from_str("\"cascade\"").unwrap();
        assert_eq!(parsed, Persona::Aggregator);
    }
}
