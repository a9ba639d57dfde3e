//! ReportGenerator：由 Findings 合成 Markdown 报告（含执行摘要）

use std::sync::Arc;

use crate::core::state::Findings;
use crate::core::AgentError;
use crate::llm::{InferenceRouter, Intent};

const REPORT_FINDING_CHARS: usize = 4000;

pub struct ReportGenerator {
    router: Arc<InferenceRouter>,
}

impl ReportGenerator {
    pub fn new(router: Arc<InferenceRouter>) -> Self {
        Self { router }
    }

    pub fn render_prompt(topic: &str, findings: &Findings) -> String {
        format!(
            "Write a research report in Markdown on the topic: {topic}\n\n\
             Start with a \"## Executive Summary\" section of 3 to 5 sentences, \
             then organise the key findings under clear headings and end with open questions.\n\
             Use only the findings below; do not invent sources.\n\n\
             Findings:\n{}",
            findings.to_prompt_text(REPORT_FINDING_CHARS)
        )
    }

    pub async fn generate(&self, topic: &str, findings: &Findings) -> Result<String, AgentError> {
        if findings.is_empty() {
            return Err(AgentError::EmptyFindings);
        }
        let prompt = Self::render_prompt(topic, findings);
        let report = self
            .router
            .generate_text(Intent::Synthesize, &prompt)
            .await?;
        Ok(report.trim().to_string())
    }
}
