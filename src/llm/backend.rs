//! 推理后端：在传输层 LlmClient 之上叠加限速、限流重试与结构化输出解析
//!
//! 每个后端对外只有两个操作：generate_text / generate_structured。
//! 限流类错误按 base × 2^attempt 指数退避，最多 max_attempts 次调用；其它错误立即返回。

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::llm::throttle::Throttle;
use crate::llm::{LlmClient, LlmError, Message};

/// 结构化输出时注入的 system 提示
const STRUCTURED_SYSTEM_PROMPT: &str = "You are a precise assistant that replies with exactly one JSON object. \
Do not add explanations, Markdown or any text outside the JSON object.";

/// 限流重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 总调用次数上限（含首次）
    pub max_attempts: u32,
    /// 退避基数
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// 第 attempt 次失败（从 0 开始）后的等待时长：base × 2^attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// 从模型输出中严格提取 JSON 对象；解析失败或非对象则拒绝
///
/// 依次尝试：整段输出、以 ``` 开头的代码块、首个 `{` 到最后一个 `}` 的片段。
/// 字符串值内部出现的代码块（如报告中的示例代码）不影响整段解析。
pub fn parse_structured(output: &str) -> Result<Value, LlmError> {
    let trimmed = output.trim();

    let (value, source) = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => (value, trimmed),
        Err(_) => {
            let json_str = match strip_fence(trimmed) {
                Some(body) => body,
                None => match (trimmed.find('{'), trimmed.rfind('}')) {
                    (Some(start), Some(end)) if start < end => &trimmed[start..=end],
                    _ => {
                        return Err(LlmError::MalformedResponse(format!(
                            "no JSON object found in: {}",
                            preview(trimmed)
                        )))
                    }
                },
            };
            let value = serde_json::from_str(json_str).map_err(|e| {
                LlmError::MalformedResponse(format!("{}: {}", e, preview(json_str)))
            })?;
            (value, json_str)
        }
    };

    if value.is_object() {
        Ok(value)
    } else {
        Err(LlmError::MalformedResponse(format!(
            "expected a JSON object, got: {}",
            preview(source)
        )))
    }
}

/// 输出以 ``` 开头时取代码块正文（去掉语言标记行与结尾的 ```）
fn strip_fence(s: &str) -> Option<&str> {
    let rest = s.strip_prefix("```")?;
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest.trim_start_matches("json"),
    };
    let body = body.trim_end();
    Some(body.strip_suffix("```").unwrap_or(body).trim())
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 单个推理后端（快速 / 高质量），进程内共享，限速时间戳对所有任务生效
pub struct Backend {
    name: String,
    client: Arc<dyn LlmClient>,
    throttle: Throttle,
    retry: RetryPolicy,
}

impl Backend {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn LlmClient>,
        min_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            throttle: Throttle::new(min_interval),
            retry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_name(&self) -> &str {
        self.client.model_name()
    }

    /// 自由文本生成
    pub async fn generate_text(&self, prompt: &str) -> Result<String, LlmError> {
        self.call_with_retry(&[Message::user(prompt)]).await
    }

    /// 结构化生成：返回已校验的 JSON 对象
    pub async fn generate_structured(&self, prompt: &str) -> Result<Value, LlmError> {
        let messages = [
            Message::system(STRUCTURED_SYSTEM_PROMPT),
            Message::user(prompt),
        ];
        let raw = self.call_with_retry(&messages).await?;
        parse_structured(&raw)
    }

    async fn call_with_retry(&self, messages: &[Message]) -> Result<String, LlmError> {
        let mut attempt: u32 = 0;
        loop {
            self.throttle.acquire().await;
            match self.client.complete(messages).await {
                Ok(text) => return Ok(text),
                Err(LlmError::RateLimited(reason)) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        tracing::warn!(
                            backend = %self.name,
                            attempts = attempt,
                            "rate limit retries exhausted"
                        );
                        return Err(LlmError::RetriesExhausted {
                            backend: self.name.clone(),
                            attempts: attempt,
                            last: reason,
                        });
                    }
                    let delay = self.retry.delay_for(attempt - 1);
                    tracing::warn!(
                        backend = %self.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(backend = %self.name, error = %e, "backend call failed");
                    return Err(e);
                }
            }
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("model", &self.client.model_name())
            .field("min_interval", &self.throttle.min_interval())
            .field("retry", &self.retry)
            .finish()
    }
}
