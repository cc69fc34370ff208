//! Deterministic triage rules.
//!
//! First match wins; nothing matching means the default `pass_through`.
//! Headers and labels are read from the envelope's raw payload
//! (`raw.headers`, `raw.labels`), which is where the email connectors
//! put them.

use serde_json::Value;

use majordomo_config::{TriageRuleConfig, TriageRuleKind};
use majordomo_core::{IngestEnvelope, TriageAction, TriageDecision};

/// Evaluates the configured rule list against envelopes.
#[derive(Debug, Clone, Default)]
pub struct TriageEngine {
    rules: Vec<TriageRuleConfig>,
}

impl TriageEngine {
    /// Build an engine from the configured rules, in order.
    #[must_use]
    pub fn new(rules: Vec<TriageRuleConfig>) -> Self {
        Self { rules }
    }

    /// First matching rule's decision, or `None` when nothing matched.
    #[must_use]
    pub fn evaluate(&self, env: &IngestEnvelope) -> Option<TriageDecision> {
        self.rules
            .iter()
            .find(|rule| rule_matches(rule, env))
            .map(|rule| TriageDecision {
                action: parse_action(&rule.action),
                target: rule.target.clone(),
                rule_id: rule.id.clone(),
            })
    }
}

fn parse_action(action: &str) -> TriageAction {
    match action {
        "route_to" => TriageAction::RouteTo,
        "low_priority_queue" => TriageAction::LowPriorityQueue,
        "metadata_only" => TriageAction::MetadataOnly,
        "skip" => TriageAction::Skip,
        // Config validation keeps this to the known set; anything odd
        // degrades to the safe default.
        _ => TriageAction::PassThrough,
    }
}

fn rule_matches(rule: &TriageRuleConfig, env: &IngestEnvelope) -> bool {
    match rule.kind {
        TriageRuleKind::SenderDomain => sender_domain_matches(&env.sender.identity, &rule.pattern),
        TriageRuleKind::SenderAddress => env.sender.identity.eq_ignore_ascii_case(&rule.pattern),
        TriageRuleKind::HeaderCondition => header_matches(rule, env),
        TriageRuleKind::LabelMatch => label_matches(&rule.pattern, env),
    }
}

/// Exact domain or dot-suffix match on the part after `@`.
fn sender_domain_matches(sender: &str, pattern: &str) -> bool {
    let Some(domain) = sender.rsplit('@').next().filter(|d| *d != sender) else {
        return false;
    };
    let domain = domain.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    domain == pattern || domain.ends_with(&format!(".{pattern}"))
}

fn header_matches(rule: &TriageRuleConfig, env: &IngestEnvelope) -> bool {
    let Some(header_name) = &rule.header else {
        return false;
    };
    let header_value = env
        .payload
        .raw
        .as_ref()
        .and_then(|raw| raw.get("headers"))
        .and_then(|headers| {
            headers.as_object().and_then(|map| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(header_name))
                    .map(|(_, v)| v)
            })
        });
    match rule.operator.as_deref() {
        Some("present") => header_value.is_some(),
        Some("equals") => header_value
            .and_then(Value::as_str)
            .is_some_and(|v| v.eq_ignore_ascii_case(&rule.pattern)),
        Some("contains") => header_value
            .and_then(Value::as_str)
            .is_some_and(|v| v.to_ascii_lowercase().contains(&rule.pattern.to_ascii_lowercase())),
        _ => false,
    }
}

/// Uppercase-normalized membership in `raw.labels`.
fn label_matches(pattern: &str, env: &IngestEnvelope) -> bool {
    let wanted = pattern.to_ascii_uppercase();
    env.payload
        .raw
        .as_ref()
        .and_then(|raw| raw.get("labels"))
        .and_then(Value::as_array)
        .is_some_and(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .any(|l| l.to_ascii_uppercase() == wanted)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use majordomo_core::{Channel, Provider};

    fn email_env(sender: &str, raw: Value) -> IngestEnvelope {
        IngestEnvelope::builder(Channel::Email, Provider::Gmail, "inbox@me.example")
            .external_event_id("msg-1")
            .sender(sender)
            .raw(raw)
            .normalized_text("body")
            .build()
    }

    fn rule(id: &str, kind: TriageRuleKind, pattern: &str, action: &str) -> TriageRuleConfig {
        TriageRuleConfig {
            id: id.to_owned(),
            kind,
            pattern: pattern.to_owned(),
            header: None,
            operator: None,
            action: action.to_owned(),
            target: None,
        }
    }

    #[test]
    fn sender_domain_exact_and_suffix() {
        let engine = TriageEngine::new(vec![rule(
            "news",
            TriageRuleKind::SenderDomain,
            "news.example.com",
            "skip",
        )]);
        let matched = engine
            .evaluate(&email_env("digest@news.example.com", serde_json::json!({"h": 1})))
            .unwrap();
        assert_eq!(matched.action, TriageAction::Skip);
        assert_eq!(matched.rule_id, "news");

        // Dot-suffix matches, bare suffix does not.
        assert!(
            engine
                .evaluate(&email_env("x@mail.news.example.com", serde_json::json!({"h": 1})))
                .is_some()
        );
        assert!(
            engine
                .evaluate(&email_env("x@fakenews.example.com", serde_json::json!({"h": 1})))
                .is_none()
        );
    }

    #[test]
    fn sender_address_is_case_insensitive() {
        let engine = TriageEngine::new(vec![{
            let mut r = rule(
                "bank",
                TriageRuleKind::SenderAddress,
                "alerts@bank.example",
                "route_to",
            );
            r.target = Some("finance".to_owned());
            r
        }]);
        let matched = engine
            .evaluate(&email_env("ALERTS@Bank.Example", serde_json::json!({"h": 1})))
            .unwrap();
        assert_eq!(matched.action, TriageAction::RouteTo);
        assert_eq!(matched.target.as_deref(), Some("finance"));
    }

    #[test]
    fn header_operators() {
        let mut present = rule("unsub", TriageRuleKind::HeaderCondition, "", "metadata_only");
        present.header = Some("List-Unsubscribe".to_owned());
        present.operator = Some("present".to_owned());

        let mut contains = rule("auto", TriageRuleKind::HeaderCondition, "auto-", "skip");
        contains.header = Some("Auto-Submitted".to_owned());
        contains.operator = Some("contains".to_owned());

        let engine = TriageEngine::new(vec![present, contains]);

        let raw = serde_json::json!({"headers": {"list-unsubscribe": "<mailto:x>"}});
        let matched = engine.evaluate(&email_env("a@b.example", raw)).unwrap();
        assert_eq!(matched.action, TriageAction::MetadataOnly);

        let raw = serde_json::json!({"headers": {"Auto-Submitted": "auto-generated"}});
        let matched = engine.evaluate(&email_env("a@b.example", raw)).unwrap();
        assert_eq!(matched.action, TriageAction::Skip);

        let raw = serde_json::json!({"headers": {}});
        assert!(engine.evaluate(&email_env("a@b.example", raw)).is_none());
    }

    #[test]
    fn label_match_is_uppercase_normalized() {
        let engine = TriageEngine::new(vec![rule(
            "promo",
            TriageRuleKind::LabelMatch,
            "promotions",
            "low_priority_queue",
        )]);
        let raw = serde_json::json!({"labels": ["Inbox", "PROMOTIONS"]});
        let matched = engine.evaluate(&email_env("a@b.example", raw)).unwrap();
        assert_eq!(matched.action, TriageAction::LowPriorityQueue);
    }

    #[test]
    fn first_match_wins() {
        let engine = TriageEngine::new(vec![
            rule("first", TriageRuleKind::SenderDomain, "b.example", "skip"),
            {
                let mut r = rule("second", TriageRuleKind::SenderDomain, "b.example", "route_to");
                r.target = Some("finance".to_owned());
                r
            },
        ]);
        let matched = engine
            .evaluate(&email_env("a@b.example", serde_json::json!({"h": 1})))
            .unwrap();
        assert_eq!(matched.rule_id, "first");
    }

    #[test]
    fn no_rules_means_no_decision() {
        let engine = TriageEngine::default();
        assert!(
            engine
                .evaluate(&email_env("a@b.example", serde_json::json!({"h": 1})))
                .is_none()
        );
    }
}
