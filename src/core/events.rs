//! 任务过程事件：用于 SSE 推送日志、状态、计划、步骤与最终结果

use serde::Serialize;

use crate::core::state::{JobStatus, LogEntry, Plan, StepStatus};

/// 单个任务的事件（信封格式 {"type": ..., "data": ...}）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    /// 新日志条目（订阅时的历史回放也用此事件）
    Log(LogEntry),
    /// 状态迁移
    Status { status: JobStatus, attempt: u32 },
    /// 新计划（重试时整体替换）
    Plan(Plan),
    /// 步骤状态变化
    Step {
        step_id: String,
        status: StepStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
    },
    /// 终态结果；发送后流结束
    Result {
        status: JobStatus,
        final_report: Option<String>,
        error: Option<String>,
    },
}

impl JobEvent {
    /// SSE `event:` 字段
    pub fn event_type(&self) -> &'static str {
        match self {
            JobEvent::Log(_) => "log",
            JobEvent::Status { .. } => "status",
            JobEvent::Plan(_) => "plan",
            JobEvent::Step { .. } => "step",
            JobEvent::Result { .. } => "result",
        }
    }

    /// SSE `data:` 字段（信封中的 data 部分）
    pub fn data(&self) -> serde_json::Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null)
    }

    pub fn is_result(&self) -> bool {
        matches!(self, JobEvent::Result { .. })
    }
}
