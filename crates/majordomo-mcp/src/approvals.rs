//! Sensitivity gating for tool calls.
//!
//! A tool may declare `arg_sensitivities` at registration. Invoking it
//! without an approval token yields a structured `approval_required`
//! response carrying an opaque handle; redeeming the handle (or a standing
//! rule matching the `(tool, argument)` tuple) lets the call through.
//! Persistence of approval actions lives outside this crate.

use std::fmt;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

/// Reserved argument key carrying a redeemed approval token.
pub const APPROVAL_TOKEN_ARG: &str = "_approval_token";

/// A standing grant: calls to `tool_name` whose sensitive argument value
/// contains `arg_pattern` are approved automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandingRule {
    /// Tool the rule applies to.
    pub tool_name: String,
    /// Substring the sensitive argument value must contain.
    pub arg_pattern: String,
}

/// One approval waiting for a human.
#[derive(Debug, Clone)]
pub struct PendingApproval {
    /// Opaque handle given to the caller.
    pub handle: String,
    /// Tool being gated.
    pub tool_name: String,
    /// What is being asked, readably.
    pub description: String,
    /// When the request was raised.
    pub requested_at: DateTime<Utc>,
}

/// Outcome of a gating check.
#[derive(Debug)]
pub enum GateOutcome {
    /// Not sensitive, token redeemed, or a standing rule matched.
    Allowed,
    /// Approval needed; the handle was minted and recorded.
    Pending(PendingApproval),
}

/// In-memory approval state for one butler.
#[derive(Debug, Default)]
pub struct ApprovalLedger {
    pending: DashMap<String, PendingApproval>,
    granted: DashMap<String, ()>,
    standing: std::sync::RwLock<Vec<StandingRule>>,
}

impl ApprovalLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a standing rule.
    pub fn add_standing_rule(&self, rule: StandingRule) {
        if let Ok(mut rules) = self.standing.write() {
            rules.push(rule);
        }
    }

    /// Gate one call. `sensitivities` is the tool's declared sensitive
    /// argument list; an empty list always passes.
    pub fn gate(&self, tool_name: &str, sensitivities: &[String], args: &Value) -> GateOutcome {
        let touched: Vec<&String> = sensitivities
            .iter()
            .filter(|arg| args.get(arg.as_str()).is_some())
            .collect();
        if touched.is_empty() {
            return GateOutcome::Allowed;
        }

        // A redeemed token is single-use.
        if let Some(token) = args.get(APPROVAL_TOKEN_ARG).and_then(|t| t.as_str()) {
            if self.granted.remove(token).is_some() {
                return GateOutcome::Allowed;
            }
        }

        if self.standing_rule_matches(tool_name, &touched, args) {
            return GateOutcome::Allowed;
        }

        let summary: Vec<String> = touched
            .iter()
            .map(|arg| format!("{arg}={}", compact(args.get(arg.as_str()))))
            .collect();
        let pending = PendingApproval {
            handle: format!("appr-{}", Uuid::new_v4()),
            tool_name: tool_name.to_owned(),
            description: format!("{tool_name} with {}", summary.join(", ")),
            requested_at: Utc::now(),
        };
        self.pending.insert(pending.handle.clone(), pending.clone());
        GateOutcome::Pending(pending)
    }

    /// Approve a pending handle, producing a single-use token.
    #[must_use]
    pub fn grant(&self, handle: &str) -> Option<String> {
        self.pending.remove(handle).map(|(_, _approval)| {
            let token = format!("tok-{}", Uuid::new_v4());
            self.granted.insert(token.clone(), ());
            token
        })
    }

    /// Deny a pending handle.
    pub fn deny(&self, handle: &str) -> bool {
        self.pending.remove(handle).is_some()
    }

    /// Handles still waiting, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<PendingApproval> {
        let mut all: Vec<PendingApproval> =
            self.pending.iter().map(|e| e.value().clone()).collect();
        all.sort_by_key(|p| p.requested_at);
        all
    }

    fn standing_rule_matches(&self, tool_name: &str, touched: &[&String], args: &Value) -> bool {
        let Ok(rules) = self.standing.read() else {
            return false;
        };
        rules.iter().any(|rule| {
            rule.tool_name == tool_name
                && touched.iter().any(|arg| {
                    compact(args.get(arg.as_str())).contains(&rule.arg_pattern)
                })
        })
    }
}

fn compact(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

impl fmt::Display for PendingApproval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.handle, self.description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sens() -> Vec<String> {
        vec!["amount".to_owned()]
    }

    #[test]
    fn non_sensitive_call_passes() {
        let ledger = ApprovalLedger::new();
        let outcome = ledger.gate("state.get", &[], &serde_json::json!({"key": "x"}));
        assert!(matches!(outcome, GateOutcome::Allowed));
    }

    #[test]
    fn sensitive_call_without_token_pends() {
        let ledger = ApprovalLedger::new();
        let outcome = ledger.gate(
            "payments.transfer",
            &sens(),
            &serde_json::json!({"amount": 100}),
        );
        match outcome {
            GateOutcome::Pending(p) => {
                assert!(p.handle.starts_with("appr-"));
                assert!(p.description.contains("amount=100"));
                assert_eq!(ledger.pending().len(), 1);
            },
            GateOutcome::Allowed => panic!("should have pended"),
        }
    }

    #[test]
    fn granted_token_is_single_use() {
        let ledger = ApprovalLedger::new();
        let GateOutcome::Pending(p) = ledger.gate(
            "payments.transfer",
            &sens(),
            &serde_json::json!({"amount": 100}),
        ) else {
            panic!("should have pended");
        };
        let token = ledger.grant(&p.handle).unwrap();

        let approved = serde_json::json!({"amount": 100, APPROVAL_TOKEN_ARG: token});
        assert!(matches!(
            ledger.gate("payments.transfer", &sens(), &approved),
            GateOutcome::Allowed
        ));
        // Replay fails.
        assert!(matches!(
            ledger.gate("payments.transfer", &sens(), &approved),
            GateOutcome::Pending(_)
        ));
    }

    #[test]
    fn standing_rule_auto_approves() {
        let ledger = ApprovalLedger::new();
        ledger.add_standing_rule(StandingRule {
            tool_name: "payments.transfer".to_owned(),
            arg_pattern: "savings".to_owned(),
        });
        let outcome = ledger.gate(
            "payments.transfer",
            &vec!["destination".to_owned()],
            &serde_json::json!({"destination": "acct:savings"}),
        );
        assert!(matches!(outcome, GateOutcome::Allowed));

        // Different tool, same pattern: still gated.
        let outcome = ledger.gate(
            "payments.wire",
            &vec!["destination".to_owned()],
            &serde_json::json!({"destination": "acct:savings"}),
        );
        assert!(matches!(outcome, GateOutcome::Pending(_)));
    }

    #[test]
    fn deny_removes_pending() {
        let ledger = ApprovalLedger::new();
        let GateOutcome::Pending(p) = ledger.gate(
            "payments.transfer",
            &sens(),
            &serde_json::json!({"amount": 1}),
        ) else {
            panic!("should have pended");
        };
        assert!(ledger.deny(&p.handle));
        assert!(ledger.grant(&p.handle).is_none());
        assert!(ledger.pending().is_empty());
    }
}
