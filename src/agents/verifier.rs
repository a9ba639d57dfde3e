//! Verifier：判断 Findings 是否充分回答了研究主题
//!
//! 走 Verify 意图的结构化生成，输出 {status, score, feedback, report}。
//! status 为 "pass"（不区分大小写）才算通过；未通过且无反馈时补通用反馈；报告仅在通过时保留。

use std::sync::Arc;

use serde::Deserialize;

use crate::core::recovery::GENERIC_FEEDBACK;
use crate::core::state::{Findings, Plan, Verification};
use crate::core::AgentError;
use crate::llm::{InferenceRouter, Intent};

const VERIFY_FINDING_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
struct VerdictDraft {
    status: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    feedback: Option<String>,
    #[serde(default)]
    report: Option<String>,
}

impl VerdictDraft {
    fn normalize(self) -> Verification {
        let passed = self.status.trim().eq_ignore_ascii_case("pass");
        let non_blank = |s: Option<String>| s.filter(|s| !s.trim().is_empty());
        let feedback = non_blank(self.feedback);
        Verification {
            passed,
            score: self.score,
            feedback: if passed {
                feedback
            } else {
                Some(feedback.unwrap_or_else(|| GENERIC_FEEDBACK.to_string()))
            },
            report: if passed { non_blank(self.report) } else { None },
        }
    }
}

pub struct Verifier {
    router: Arc<InferenceRouter>,
}

impl Verifier {
    pub fn new(router: Arc<InferenceRouter>) -> Self {
        Self { router }
    }

    pub fn render_prompt(topic: &str, plan: &Plan, findings: &Findings) -> String {
        let steps = plan
            .steps
            .iter()
            .map(|s| format!("- [{}] ({}) {}", s.id, s.tool.as_str(), s.description))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "You are a strict research reviewer.\n\n\
             Research topic: {topic}\n\n\
             Plan reasoning: {}\n\
             Plan steps:\n{steps}\n\n\
             Findings:\n{}\n\n\
             Decide whether the findings answer the topic well enough to publish.\n\
             Respond with a JSON object: {{\"status\": \"pass\" | \"fail\", \"score\": 0.0-1.0, \
             \"feedback\": \"what is missing (when failing)\", \
             \"report\": \"the final markdown report (when passing)\"}}",
            plan.reasoning,
            findings.to_prompt_text(VERIFY_FINDING_CHARS),
        )
    }

    pub async fn verify(
        &self,
        topic: &str,
        plan: &Plan,
        findings: &Findings,
    ) -> Result<Verification, AgentError> {
        let prompt = Self::render_prompt(topic, plan, findings);
        let value = self
            .router
            .generate_structured(Intent::Verify, &prompt)
            .await?;
        let draft: VerdictDraft = serde_json::from_value(value)
            .map_err(|e| AgentError::JsonParseError(format!("verification: {e}")))?;
        Ok(draft.normalize())
    }
}
