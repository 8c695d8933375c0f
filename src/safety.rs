use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::operator::{header, is_affirmative, Operator};

/// Advisory attached by the planner to a proposed action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSafetyCheck {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// One acknowledgment record per pending check, in the same order.
    Approved(Vec<PendingSafetyCheck>),
    Declined,
}

pub const ACKNOWLEDGE_PROMPT: &str = "Acknowledge safety warning? (yes/no): ";

/// Holds an action back until a human explicitly acknowledges its checks.
#[derive(Clone, Copy, Debug, Default)]
pub struct SafetyGate;

impl SafetyGate {
    pub async fn review<O: Operator + ?Sized>(&self, operator: &O, checks: &[PendingSafetyCheck]) -> Verdict {
        operator.show(&render_warning(checks));
        operator.show("Type 'yes' to acknowledge and proceed, or 'no' to stop");

        let reply = match operator.ask(ACKNOWLEDGE_PROMPT).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "no acknowledgment from operator");
                return Verdict::Declined;
            }
        };
        if !is_affirmative(&reply) {
            info!(checks = checks.len(), "safety checks declined");
            return Verdict::Declined;
        }
        info!(checks = checks.len(), "safety checks acknowledged");
        Verdict::Approved(checks.to_vec())
    }
}

fn render_warning(checks: &[PendingSafetyCheck]) -> String {
    let or_na = |s: &str| if s.is_empty() { "N/A".to_string() } else { s.to_string() };
    let mut out = header("SAFETY WARNING DETECTED!", 60);
    for c in checks {
        out.push_str(&format!(
            "\nSafety Check ID: {}\nCode: {}\nMessage: {}\n{}",
            or_na(&c.id),
            or_na(&c.code),
            or_na(&c.message),
            "-".repeat(60)
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::OperatorError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct OneAnswer {
        answer: Result<String, ()>,
        shown: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Operator for OneAnswer {
        fn show(&self, text: &str) {
            self.shown.lock().unwrap().push(text.to_string());
        }
        async fn ask(&self, _prompt: &str) -> Result<String, OperatorError> {
            self.answer.clone().map_err(|_| OperatorError::Closed)
        }
    }

    fn operator(answer: Result<&str, ()>) -> OneAnswer {
        OneAnswer { answer: answer.map(str::to_string), shown: Mutex::new(Vec::new()) }
    }

    fn checks() -> Vec<PendingSafetyCheck> {
        vec![
            PendingSafetyCheck { id: "sc_1".into(), code: "malicious_instructions".into(), message: "m1".into() },
            PendingSafetyCheck { id: "sc_2".into(), code: "irrelevant_domain".into(), message: String::new() },
        ]
    }

    #[tokio::test]
    async fn yes_acknowledges_every_check() {
        let op = operator(Ok("Yes"));
        let verdict = SafetyGate.review(&op, &checks()).await;
        assert_eq!(verdict, Verdict::Approved(checks()));
        let shown = op.shown.lock().unwrap().join("\n");
        assert!(shown.contains("Safety Check ID: sc_2"));
        assert!(shown.contains("Message: N/A"));
    }

    #[tokio::test]
    async fn anything_else_declines() {
        for answer in ["no", "ok", ""] {
            assert_eq!(SafetyGate.review(&operator(Ok(answer)), &checks()).await, Verdict::Declined);
        }
    }

    #[tokio::test]
    async fn operator_failure_declines() {
        assert_eq!(SafetyGate.review(&operator(Err(())), &checks()).await, Verdict::Declined);
    }
}
