//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 取最后一条 User 消息，按系统提示词的第一行给出确定性的回复；流式接口按单词切分输出。

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, Message, Role, TokenStream};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

impl MockLlmClient {
    fn reply(messages: &[Message]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        let voice = messages
            .iter()
            .find(|m| m.role == Role::System)
            .and_then(|m| m.content.lines().next())
            .unwrap_or("Assistant");

        format!("[{}] {}", voice.trim(), last_user)
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        Ok(Self::reply(messages))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let content = Self::reply(messages);
        let mut tokens: Vec<Result<String, LlmError>> = Vec::new();
        for (i, word) in content.split(' ').enumerate() {
            let token = if i == 0 { word.to_string() } else { format!(" {word}") };
            tokens.push(Ok(token));
        }
        Ok(Box::pin(stream::iter(tokens)))
    }
}
