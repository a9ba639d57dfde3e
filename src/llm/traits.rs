//! LLM 客户端抽象
//!
//! 所有传输层后端（OpenAI 兼容 / Mock）实现 LlmClient：complete（非流式）。
//! 节流、限流重试与结构化解析由上层 [`Backend`](crate::llm::Backend) 统一处理。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 推理后端错误
///
/// - `RateLimited`：瞬时错误，Backend 内部指数退避重试，上层不可见（除非重试耗尽）
/// - `RetriesExhausted`：限流重试耗尽后的类型化结果
/// - `Provider`：永久错误（鉴权、请求非法等），立即返回
/// - `MalformedResponse`：结构化输出无法解析为 JSON 对象
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Backend {backend} still rate limited after {attempts} attempts: {last}")]
    RetriesExhausted {
        backend: String,
        attempts: u32,
        last: String,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed structured response: {0}")]
    MalformedResponse(String),
}

impl LlmError {
    /// 根据提供方错误文本归类：429 / rate limit / quota 视为瞬时限流，其余为永久错误
    pub fn from_provider_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limit_message(&message) {
            LlmError::RateLimited(message)
        } else {
            LlmError::Provider(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, LlmError::RateLimited(_))
    }
}

/// 判断错误文本是否属于限流类
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    [
        "429",
        "rate limit",
        "rate_limit",
        "ratelimit",
        "too many requests",
        "quota",
        "resource_exhausted",
        "resource exhausted",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// LLM 传输层 trait：给定消息序列，返回首条回复文本
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 非流式完成
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 模型名（日志用）
    fn model_name(&self) -> &str {
        "unknown"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_classification() {
        assert!(LlmError::from_provider_message("HTTP 429 Too Many Requests").is_rate_limited());
        assert!(LlmError::from_provider_message("Rate limit reached for model").is_rate_limited());
        assert!(LlmError::from_provider_message("RESOURCE_EXHAUSTED: quota exceeded").is_rate_limited());
        assert!(!LlmError::from_provider_message("invalid api key").is_rate_limited());
        assert!(!LlmError::from_provider_message("model not found").is_rate_limited());
    }
}
