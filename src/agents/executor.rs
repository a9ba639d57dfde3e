//! Executor：执行单个步骤
//!
//! search / fetch 交给 ToolExecutor；analyze 把步骤描述、参数与已有 Findings 拼成 prompt，走 ExecuteStep 意图。
//! 所有失败都转成描述性文本作为步骤结果，不中断任务。

use std::sync::Arc;

use crate::core::state::{Findings, Step, ToolKind};
use crate::llm::{InferenceRouter, Intent};
use crate::tools::ToolExecutor;

/// analyze prompt 中每条 Finding 的最大字符数
const ANALYZE_FINDING_CHARS: usize = 2000;

pub struct StepExecutor {
    router: Arc<InferenceRouter>,
    tools: Arc<ToolExecutor>,
}

impl StepExecutor {
    pub fn new(router: Arc<InferenceRouter>, tools: Arc<ToolExecutor>) -> Self {
        Self { router, tools }
    }

    pub fn render_analyze_prompt(topic: &str, step: &Step, findings: &Findings) -> String {
        let param = |key: &str| {
            step.params
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("(none)")
                .to_string()
        };
        format!(
            "You are a research analyst working on: {topic}\n\n\
             Task: {}\n\
             Context: {}\n\
             Focus: {}\n\n\
             Findings so far:\n{}\n\n\
             Write a concise, factual analysis for this task. Point out gaps or contradictions in the findings.",
            step.description,
            param("context"),
            param("focus"),
            findings.to_prompt_text(ANALYZE_FINDING_CHARS),
        )
    }

    /// 执行步骤，结果原样返回（失败时为描述性文本）
    pub async fn execute(&self, topic: &str, step: &Step, findings: &Findings) -> String {
        match step.tool {
            ToolKind::Search | ToolKind::Fetch => {
                match self
                    .tools
                    .execute(step.tool.as_str(), step.params.clone())
                    .await
                {
                    Ok(output) => output,
                    Err(e) => format!("Step failed: {e}"),
                }
            }
            ToolKind::Analyze => {
                let prompt = Self::render_analyze_prompt(topic, step, findings);
                match self.router.generate_text(Intent::ExecuteStep, &prompt).await {
                    Ok(text) => text,
                    Err(e) => format!("Analysis failed: {e}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::core::state::StepStatus;
    use crate::llm::{Backend, LlmError, MockLlmClient, RetryPolicy};
    use crate::tools::{Tool, ToolRegistry};

    struct StaticSearch;

    #[async_trait]
    impl Tool for StaticSearch {
        fn name(&self) -> &str {
            "search"
        }

        fn description(&self) -> &str {
            "fake search"
        }

        async fn execute(&self, args: Value) -> Result<String, String> {
            Ok(format!("hits for {}", args["query"].as_str().unwrap_or("")))
        }
    }

    fn step(tool: ToolKind, params: Value) -> Step {
        Step {
            id: "s1".into(),
            description: "do the thing".into(),
            tool,
            params,
            depends_on: vec![],
            status: StepStatus::Active,
            result: None,
        }
    }

    fn executor(client: Arc<MockLlmClient>) -> StepExecutor {
        let fast = Arc::new(Backend::new(
            "fast",
            client,
            Duration::ZERO,
            RetryPolicy::new(1, Duration::ZERO),
        ));
        let mut registry = ToolRegistry::new();
        registry.register(StaticSearch);
        StepExecutor::new(
            Arc::new(InferenceRouter::new(fast, None)),
            Arc::new(ToolExecutor::new(registry, 5)),
        )
    }

    #[tokio::test]
    async fn test_search_goes_through_tools() {
        let client = Arc::new(MockLlmClient::echo());
        let exec = executor(client.clone());
        let out = exec
            .execute(
                "t",
                &step(ToolKind::Search, serde_json::json!({"query": "rust"})),
                &Findings::new(),
            )
            .await;
        assert_eq!(out, "hits for rust");
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_tool_becomes_text() {
        let exec = executor(Arc::new(MockLlmClient::echo()));
        let out = exec
            .execute(
                "t",
                &step(ToolKind::Fetch, serde_json::json!({"url": "https://x"})),
                &Findings::new(),
            )
            .await;
        assert!(out.starts_with("Step failed:"));
        assert!(out.contains("Unknown tool: fetch"));
    }

    #[tokio::test]
    async fn test_analyze_uses_router_and_findings() {
        let client = Arc::new(MockLlmClient::from_fn(|_| Ok("analysis".into())));
        let exec = executor(client.clone());
        let mut findings = Findings::new();
        findings.insert("s0", "earlier", "earlier result");
        let out = exec
            .execute(
                "topic",
                &step(ToolKind::Analyze, serde_json::json!({"focus": "cost"})),
                &findings,
            )
            .await;
        assert_eq!(out, "analysis");
        let prompt = &client.prompts()[0];
        assert!(prompt.contains("earlier result"));
        assert!(prompt.contains("Focus: cost"));
        assert!(prompt.contains("Context: (none)"));
    }

    #[tokio::test]
    async fn test_analyze_error_becomes_text() {
        let client = Arc::new(MockLlmClient::from_fn(|_| {
            Err(LlmError::Provider("down".into()))
        }));
        let out = executor(client)
            .execute("t", &step(ToolKind::Analyze, serde_json::json!({})), &Findings::new())
            .await;
        assert!(out.starts_with("Analysis failed:"));
        assert!(out.contains("down"));
    }
}
