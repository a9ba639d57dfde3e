//! Mock LLM 客户端（用于测试，无需 API）
//!
//! 默认回显最后一条 User 消息；也可用闭包（按 prompt 内容分派）或脚本队列驱动。
//! 记录调用次数与每次收到的 prompt，便于断言路由与回退行为。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError, Message, Role};

type Handler = Box<dyn Fn(&str) -> Result<String, LlmError> + Send + Sync>;

enum Behavior {
    Echo,
    Handler(Handler),
    Script(Mutex<VecDeque<Result<String, LlmError>>>),
}

/// Mock 客户端
pub struct MockLlmClient {
    name: String,
    behavior: Behavior,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmClient {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            name: "mock".to_string(),
            behavior,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 回显最后一条 User 消息
    pub fn echo() -> Self {
        Self::with_behavior(Behavior::Echo)
    }

    /// 由闭包根据 prompt（最后一条 User 消息）决定返回
    pub fn from_fn<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<String, LlmError> + Send + Sync + 'static,
    {
        Self::with_behavior(Behavior::Handler(Box::new(handler)))
    }

    /// 按顺序返回预设结果；耗尽后返回 Provider 错误
    pub fn scripted(responses: Vec<Result<String, LlmError>>) -> Self {
        Self::with_behavior(Behavior::Script(Mutex::new(responses.into())))
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 按调用顺序返回收到的 prompt
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::echo()
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "(no input)".to_string());
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(last_user.clone());
        }

        match &self.behavior {
            Behavior::Echo => Ok(format!("Echo from Mock: {}", last_user)),
            Behavior::Handler(handler) => handler(&last_user),
            Behavior::Script(queue) => queue
                .lock()
                .ok()
                .and_then(|mut q| q.pop_front())
                .unwrap_or_else(|| Err(LlmError::Provider("mock script exhausted".to_string()))),
        }
    }
}
