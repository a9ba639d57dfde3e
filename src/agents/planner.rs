//! Planner：根据主题（以及上一轮校验反馈）生成研究计划
//!
//! 走 Plan 意图的结构化生成；返回的 JSON 反序列化为 PlanDraft，再校验成 Plan：
//! 重复 id 拒绝，缺失 id 补为 `step-N`，引用未知步骤的依赖丢弃并告警。

use std::collections::HashSet;
use std::sync::Arc;

use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::Value;

use crate::core::state::{Plan, Step, StepStatus, ToolKind};
use crate::core::AgentError;
use crate::llm::{InferenceRouter, Intent};

/// 模型输出的计划草稿
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PlanDraft {
    /// 为什么这样拆分步骤
    #[serde(default)]
    pub reasoning: String,
    pub steps: Vec<StepDraft>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StepDraft {
    /// 计划内唯一；省略时自动编号
    #[serde(default)]
    pub id: Option<String>,
    pub description: String,
    pub tool: ToolKind,
    /// search: {"query", "max_results"}；fetch: {"url"}；analyze: {"context", "focus"}
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// PlanDraft 的 JSON Schema 字符串，拼进 prompt
pub fn plan_schema_json() -> String {
    let schema = schema_for!(PlanDraft);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

fn default_tool_descriptions() -> Vec<(String, String)> {
    vec![
        (
            ToolKind::Search.as_str().to_string(),
            "Web search by keywords. Params: {\"query\": \"...\", \"max_results\": 5}".to_string(),
        ),
        (
            ToolKind::Fetch.as_str().to_string(),
            "Fetch a web page and extract its text. Params: {\"url\": \"https://...\"}".to_string(),
        ),
        (
            ToolKind::Analyze.as_str().to_string(),
            "Reason over the findings gathered so far. Params: {\"context\": \"...\", \"focus\": \"...\"}"
                .to_string(),
        ),
    ]
}

/// 校验草稿并转成 Plan（所有步骤为 pending）
pub fn validate_draft(draft: PlanDraft) -> Result<Plan, AgentError> {
    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(draft.steps.len());

    for (i, s) in draft.steps.into_iter().enumerate() {
        let id = s
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("step-{}", i + 1));
        if !seen.insert(id.clone()) {
            return Err(AgentError::InvalidPlan(format!("duplicate step id '{id}'")));
        }
        let params = match s.params {
            Value::Null => Value::Object(Default::default()),
            v @ Value::Object(_) => v,
            other => {
                return Err(AgentError::InvalidPlan(format!(
                    "params of step '{id}' must be an object, got {other}"
                )))
            }
        };
        steps.push(Step {
            id,
            description: s.description,
            tool: s.tool,
            params,
            depends_on: s.depends_on,
            status: StepStatus::Pending,
            result: None,
        });
    }

    for step in &mut steps {
        let id = step.id.clone();
        step.depends_on.retain(|dep| {
            let keep = seen.contains(dep) && *dep != id;
            if !keep {
                tracing::warn!(step = %id, dependency = %dep, "Dropping unknown dependency");
            }
            keep
        });
    }

    Ok(Plan {
        reasoning: draft.reasoning,
        steps,
    })
}

pub struct Planner {
    router: Arc<InferenceRouter>,
    tools: Vec<(String, String)>,
    schema: String,
}

impl Planner {
    pub fn new(router: Arc<InferenceRouter>) -> Self {
        Self {
            router,
            tools: default_tool_descriptions(),
            schema: plan_schema_json(),
        }
    }

    /// 用实际注册的工具描述替换默认列表（analyze 始终保留）
    pub fn with_tools(mut self, tools: Vec<(String, String)>) -> Self {
        let analyze = default_tool_descriptions()
            .into_iter()
            .filter(|(name, _)| name == ToolKind::Analyze.as_str());
        self.tools = tools.into_iter().chain(analyze).collect();
        self
    }

    pub fn render_prompt(&self, topic: &str, feedback: Option<&str>) -> String {
        let tools = self
            .tools
            .iter()
            .map(|(name, desc)| format!("- {name}: {desc}"))
            .collect::<Vec<_>>()
            .join("\n");
        let mut prompt = format!(
            "You are a research planner. Break the research topic into a short sequence of concrete steps.\n\n\
             Research topic: {topic}\n\n\
             Available tools:\n{tools}\n\n"
        );
        if let Some(feedback) = feedback {
            prompt.push_str(&format!(
                "A previous attempt was rejected by the reviewer with this feedback:\n{feedback}\n\
                 Address the feedback in the new plan.\n\n"
            ));
        }
        prompt.push_str(&format!(
            "Respond with a JSON object matching this schema:\n{}\n\n\
             Keep step ids unique. Prefer 3 to 6 steps.",
            self.schema
        ));
        prompt
    }

    pub async fn plan(&self, topic: &str, feedback: Option<&str>) -> Result<Plan, AgentError> {
        let prompt = self.render_prompt(topic, feedback);
        let value = self.router.generate_structured(Intent::Plan, &prompt).await?;
        let draft: PlanDraft = serde_json::from_value(value)
            .map_err(|e| AgentError::JsonParseError(format!("plan: {e}")))?;
        validate_draft(draft)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::{Backend, LlmError, MockLlmClient, RetryPolicy};

    fn router_with(client: Arc<MockLlmClient>) -> Arc<InferenceRouter> {
        let fast = Arc::new(Backend::new(
            "fast",
            client,
            Duration::ZERO,
            RetryPolicy::new(1, Duration::ZERO),
        ));
        Arc::new(InferenceRouter::new(fast, None))
    }

    fn draft(json: Value) -> PlanDraft {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_validate_fills_ids_and_drops_unknown_deps() {
        let plan = validate_draft(draft(serde_json::json!({
            "reasoning": "r",
            "steps": [
                {"description": "find", "tool": "search", "params": {"query": "rust"}},
                {"id": "read", "description": "read", "tool": "fetch", "depends_on": ["step-1", "ghost", "read"]}
            ]
        })))
        .unwrap();
        assert_eq!(plan.steps[0].id, "step-1");
        assert_eq!(plan.steps[1].depends_on, vec!["step-1".to_string()]);
        assert_eq!(plan.steps[1].params, serde_json::json!({}));
        assert!(plan.steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_validate_rejects_duplicates_and_bad_params() {
        let dup = validate_draft(draft(serde_json::json!({
            "steps": [
                {"id": "a", "description": "x", "tool": "analyze"},
                {"id": "a", "description": "y", "tool": "analyze"}
            ]
        })));
        assert!(matches!(dup, Err(AgentError::InvalidPlan(_))));

        let bad = validate_draft(draft(serde_json::json!({
            "steps": [{"description": "x", "tool": "search", "params": "rust"}]
        })));
        assert!(matches!(bad, Err(AgentError::InvalidPlan(_))));
    }

    #[test]
    fn test_empty_plan_is_valid() {
        let plan = validate_draft(draft(serde_json::json!({"steps": []}))).unwrap();
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_prompt_contains_feedback_verbatim_and_schema() {
        let planner = Planner::new(router_with(Arc::new(MockLlmClient::echo())));
        let prompt = planner.render_prompt("quantum batteries", Some("Cite primary sources!"));
        assert!(prompt.contains("quantum batteries"));
        assert!(prompt.contains("Cite primary sources!"));
        assert!(prompt.contains("\"steps\""));
        assert!(prompt.contains("- analyze:"));
        assert!(!planner.render_prompt("t", None).contains("previous attempt"));
    }

    #[tokio::test]
    async fn test_plan_parses_fenced_json() {
        let client = Arc::new(MockLlmClient::from_fn(|_| {
            Ok("```json\n{\"reasoning\": \"go\", \"steps\": [{\"id\": \"s1\", \"description\": \"look\", \"tool\": \"search\", \"params\": {\"query\": \"q\"}}]}\n```".into())
        }));
        let planner = Planner::new(router_with(client));
        let plan = planner.plan("topic", None).await.unwrap();
        assert_eq!(plan.reasoning, "go");
        assert_eq!(plan.steps[0].tool, ToolKind::Search);
    }

    #[tokio::test]
    async fn test_plan_rejects_wrong_shape() {
        let client = Arc::new(MockLlmClient::from_fn(|_| Ok("{\"plan\": []}".into())));
        let planner = Planner::new(router_with(client));
        assert!(matches!(
            planner.plan("topic", None).await,
            Err(AgentError::JsonParseError(_))
        ));

        let client = Arc::new(MockLlmClient::from_fn(|_| Ok("no json here".into())));
        let planner = Planner::new(router_with(client));
        assert!(matches!(
            planner.plan("topic", None).await,
            Err(AgentError::Llm(LlmError::MalformedResponse(_)))
        ));
    }
}
