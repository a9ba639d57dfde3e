//! 错误恢复引擎
//!
//! 校验未通过时决定下一步：带反馈重新规划、用已有 Findings 兜底出报告，或终止任务。

use crate::core::state::Findings;
use crate::core::RecoveryAction;

/// 校验失败后的通用反馈（Verifier 未给出反馈时使用）
pub const GENERIC_FEEDBACK: &str =
    "The findings did not sufficiently answer the research topic. Gather more specific, verifiable evidence.";

/// 将「第几轮 / 最多几轮 / 当前 Findings」映射为恢复动作
#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    max_attempts: u32,
}

impl RecoveryEngine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// attempt 从 1 开始计数
    pub fn after_failed_verification(
        &self,
        attempt: u32,
        findings: &Findings,
        feedback: Option<&str>,
    ) -> RecoveryAction {
        if attempt < self.max_attempts {
            let feedback = feedback
                .filter(|f| !f.trim().is_empty())
                .unwrap_or(GENERIC_FEEDBACK);
            return RecoveryAction::Replan {
                feedback: feedback.to_string(),
            };
        }
        if findings.is_empty() {
            RecoveryAction::Abort(format!(
                "Verification failed after {attempt} attempt(s) and no findings were gathered"
            ))
        } else {
            RecoveryAction::FallbackReport
        }
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_findings() -> Findings {
        let mut f = Findings::new();
        f.insert("step-1", "search", "result");
        f
    }

    #[test]
    fn test_replan_while_attempts_remain() {
        let engine = RecoveryEngine::new(2);
        let action = engine.after_failed_verification(1, &some_findings(), Some("need sources"));
        assert_eq!(
            action,
            RecoveryAction::Replan {
                feedback: "need sources".into()
            }
        );
    }

    #[test]
    fn test_replan_passes_feedback_verbatim() {
        let engine = RecoveryEngine::new(2);
        let feedback = "  Cite primary sources.\n- missing 2023 data\n";
        assert_eq!(
            engine.after_failed_verification(1, &some_findings(), Some(feedback)),
            RecoveryAction::Replan {
                feedback: feedback.to_string()
            }
        );
    }

    #[test]
    fn test_replan_uses_generic_feedback_when_blank() {
        let engine = RecoveryEngine::new(3);
        match engine.after_failed_verification(2, &Findings::new(), Some("  ")) {
            RecoveryAction::Replan { feedback } => assert_eq!(feedback, GENERIC_FEEDBACK),
            other => panic!("Expected Replan, got {other:?}"),
        }
    }

    #[test]
    fn test_fallback_report_when_exhausted() {
        let engine = RecoveryEngine::new(2);
        assert_eq!(
            engine.after_failed_verification(2, &some_findings(), None),
            RecoveryAction::FallbackReport
        );
    }

    #[test]
    fn test_abort_when_exhausted_without_findings() {
        let engine = RecoveryEngine::new(2);
        assert!(matches!(
            engine.after_failed_verification(2, &Findings::new(), Some("x")),
            RecoveryAction::Abort(_)
        ));
    }

    #[test]
    fn test_single_attempt_never_replans() {
        let engine = RecoveryEngine::new(0);
        assert_eq!(engine.max_attempts(), 1);
        assert_eq!(
            engine.after_failed_verification(1, &some_findings(), Some("x")),
            RecoveryAction::FallbackReport
        );
    }
}
