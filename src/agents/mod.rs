//! Agent：渲染 prompt → 经路由器调用后端 → 严格解析为类型化结果
//!
//! Agent 本身无状态，只返回值；任务状态由编排器写入 JobStore。

pub mod executor;
pub mod planner;
pub mod report;
pub mod verifier;

pub use executor::StepExecutor;
pub use planner::{plan_schema_json, validate_draft, PlanDraft, Planner, StepDraft};
pub use report::ReportGenerator;
pub use verifier::Verifier;
