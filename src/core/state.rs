//! 状态定义：Job / Plan / Step / LogEntry / Findings
//!
//! Job 由编排器通过 JobStore 独占修改；Agent 与工具只返回值，由编排器折叠进 Job。

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 任务 ID（UUID v4 字符串，对外不透明）
pub type JobId = String;

/// 任务状态机
///
/// `queued → planning → executing → verifying → {completed | failed}`，
/// 外加 `verifying → planning` 重试边，以及任意非终态可进入的 `cancelled`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Planning,
    Executing,
    Verifying,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// 是否允许从当前状态迁移到 next
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::{Cancelled, Completed, Executing, Failed, Planning, Queued, Verifying};
        if self.is_terminal() {
            return false;
        }
        match (*self, next) {
            (_, Failed) | (_, Cancelled) => true,
            (Queued, Planning) => true,
            (Planning, Executing) => true,
            (Executing, Verifying) => true,
            (Verifying, Planning) => true,
            (Verifying, Completed) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Planning => "planning",
            JobStatus::Executing => "executing",
            JobStatus::Verifying => "verifying",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 步骤使用的工具（固定小集合）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// 关键词搜索，参数 {"query": "...", "max_results": 5}
    Search,
    /// 抓取 URL 并提取正文，参数 {"url": "https://..."}
    Fetch,
    /// 基于给定上下文分析，参数 {"context": "...", "focus": "..."}
    Analyze,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Search => "search",
            ToolKind::Fetch => "fetch",
            ToolKind::Analyze => "analyze",
        }
    }
}

/// 步骤状态：pending → active → completed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Active,
    Completed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub description: String,
    pub tool: ToolKind,
    pub params: serde_json::Value,
    /// 声明的依赖（默认调度器不强制，按计划顺序执行）
    pub depends_on: Vec<String>,
    pub status: StepStatus,
    pub result: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub reasoning: String,
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    /// 步骤依赖图：step id -> 其依赖的 step id 列表
    pub fn dependency_graph(&self) -> HashMap<String, Vec<String>> {
        self.steps
            .iter()
            .map(|s| (s.id.clone(), s.depends_on.clone()))
            .collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// 任务日志条目；seq 在单个任务内从 0 单调递增
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub level: LogLevel,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub topic: String,
    pub status: JobStatus,
    pub plan: Option<Plan>,
    pub logs: Vec<LogEntry>,
    pub final_report: Option<String>,
    pub created_at: DateTime<Utc>,
    /// 当前第几轮尝试（规划前为 0）
    pub attempt: u32,
    /// 失败原因（仅 failed）
    pub error: Option<String>,
}

impl Job {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            status: JobStatus::Queued,
            plan: None,
            logs: Vec::new(),
            final_report: None,
            created_at: Utc::now(),
            attempt: 0,
            error: None,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            topic: self.topic.clone(),
            status: self.status,
            created_at: self.created_at,
            attempt: self.attempt,
        }
    }
}

/// 列表用的轻量投影
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub topic: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub attempt: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub step_id: String,
    pub description: String,
    pub result: String,
}

/// 单轮尝试的 step id -> 结果映射，保持插入（计划）顺序；每轮重新构建
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Findings {
    entries: Vec<Finding>,
}

impl Findings {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入结果；同一 step 再次写入时覆盖
    pub fn insert(&mut self, step_id: &str, description: &str, result: impl Into<String>) {
        let result = result.into();
        match self.entries.iter_mut().find(|f| f.step_id == step_id) {
            Some(existing) => existing.result = result,
            None => self.entries.push(Finding {
                step_id: step_id.to_string(),
                description: description.to_string(),
                result,
            }),
        }
    }

    pub fn get(&self, step_id: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|f| f.step_id == step_id)
            .map(|f| f.result.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Finding> {
        self.entries.iter()
    }

    /// 渲染为 prompt 中的 Markdown 段落；单条结果超过 max_chars_per_step 时截断
    pub fn to_prompt_text(&self, max_chars_per_step: usize) -> String {
        if self.entries.is_empty() {
            return "(no findings yet)".to_string();
        }
        self.entries
            .iter()
            .map(|f| {
                let body = if f.result.chars().count() > max_chars_per_step {
                    format!(
                        "{}\n...[truncated]",
                        f.result.chars().take(max_chars_per_step).collect::<String>()
                    )
                } else {
                    f.result.clone()
                };
                format!("### [{}] {}\n{}", f.step_id, f.description, body)
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Verifier 输出
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    pub score: Option<f64>,
    pub feedback: Option<String>,
    /// 仅在通过时携带
    pub report: Option<String>,
}
