//! 工具执行器
//!
//! 持有 ToolRegistry 与全局超时，execute(tool_name, args) 在超时内调用 registry.execute；
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;

use crate::tools::ToolRegistry;

/// 工具调用失败；Executor agent 会把它转成写进 Findings 的描述文本
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool '{0}' timed out after {1}s")]
    Timeout(String, u64),

    #[error("Tool '{tool}' failed: {message}")]
    Failed { tool: String, message: String },
}

/// 对每次调用施加超时
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self::with_timeout(registry, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, ToolError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(message)) => Err(ToolError::Failed {
                tool: tool_name.to_string(),
                message,
            }),
            Err(_) => Err(ToolError::Timeout(
                tool_name.to_string(),
                self.timeout.as_secs(),
            )),
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::tools::Tool;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("late".into())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("kaput".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(Slow);
        registry.register(Broken);
        ToolExecutor::with_timeout(registry, Duration::from_secs(2))
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let err = executor()
            .execute("slow", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Timeout("slow".into(), 2));
    }

    #[tokio::test]
    async fn test_failure_and_unknown_tool() {
        let exec = executor();
        let err = exec.execute("broken", serde_json::json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool 'broken' failed: kaput");
        let err = exec.execute("missing", serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("Unknown tool: missing"));
        assert_eq!(exec.tool_names(), vec!["broken".to_string(), "slow".to_string()]);
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = serde_json::json!({"q": "x".repeat(500)});
        assert!(args_preview(&long).ends_with("..."));
    }
}
