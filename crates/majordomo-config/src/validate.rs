//! Post-parse validation.

use majordomo_core::ButlerName;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{ButlerConfig, TriageRuleKind};

/// Validate a parsed [`ButlerConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming the first violation found.
pub fn validate(cfg: &ButlerConfig) -> ConfigResult<()> {
    ButlerName::new(&cfg.butler.name).map_err(ConfigError::Invalid)?;

    if cfg.sessions.max_concurrent == 0 {
        return Err(ConfigError::Invalid(
            "sessions.max_concurrent must be at least 1".to_owned(),
        ));
    }
    if cfg.sessions.deadline_secs == 0 {
        return Err(ConfigError::Invalid(
            "sessions.deadline_secs must be positive".to_owned(),
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for task in &cfg.scheduled_tasks {
        if !seen.insert(task.name.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate scheduled task name {:?}",
                task.name
            )));
        }
        match task.dispatch_mode.as_str() {
            "prompt" => {
                if task.prompt.is_none() || task.job_name.is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "task {:?}: prompt mode requires prompt and forbids job_name",
                        task.name
                    )));
                }
            },
            "job" => {
                if task.job_name.is_none() || task.prompt.is_some() {
                    return Err(ConfigError::Invalid(format!(
                        "task {:?}: job mode requires job_name and forbids prompt",
                        task.name
                    )));
                }
            },
            other => {
                return Err(ConfigError::Invalid(format!(
                    "task {:?}: unknown dispatch_mode {other:?}",
                    task.name
                )));
            },
        }
    }

    if let Some(sb) = &cfg.switchboard {
        if !ButlerName::new(&cfg.butler.name)
            .map(|n| n.is_switchboard())
            .unwrap_or(false)
        {
            return Err(ConfigError::Invalid(format!(
                "[switchboard] block on butler {:?}; only the switchboard carries it",
                cfg.butler.name
            )));
        }
        if sb.classifier.max_fanout == 0 {
            return Err(ConfigError::Invalid(
                "classifier.max_fanout must be at least 1".to_owned(),
            ));
        }
        for rule in &sb.triage_rules {
            match rule.action.as_str() {
                "route_to" => {
                    if rule.target.is_none() {
                        return Err(ConfigError::Invalid(format!(
                            "rule {:?}: route_to requires a target",
                            rule.id
                        )));
                    }
                },
                "low_priority_queue" | "pass_through" | "metadata_only" | "skip" => {},
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "rule {:?}: unknown action {other:?}",
                        rule.id
                    )));
                },
            }
            if rule.kind == TriageRuleKind::HeaderCondition {
                if rule.header.is_none() {
                    return Err(ConfigError::Invalid(format!(
                        "rule {:?}: header_condition requires a header name",
                        rule.id
                    )));
                }
                match rule.operator.as_deref() {
                    Some("present" | "equals" | "contains") => {},
                    other => {
                        return Err(ConfigError::Invalid(format!(
                            "rule {:?}: invalid header operator {other:?}",
                            rule.id
                        )));
                    },
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(name: &str) -> ButlerConfig {
        toml::from_str(&format!(
            r#"
            [butler]
            name = "{name}"
            port = 7821
            "#
        ))
        .unwrap()
    }

    #[test]
    fn accepts_minimal() {
        assert!(validate(&base("health")).is_ok());
    }

    #[test]
    fn rejects_bad_name() {
        assert!(validate(&base("Health")).is_err());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut cfg = base("health");
        cfg.sessions.max_concurrent = 0;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_switchboard_block_on_other_butler() {
        let mut cfg = base("health");
        cfg.switchboard = Some(crate::types::SwitchboardConfig::default());
        assert!(validate(&cfg).is_err());

        let mut sb = base("switchboard");
        sb.switchboard = Some(crate::types::SwitchboardConfig::default());
        assert!(validate(&sb).is_ok());
    }

    #[test]
    fn rejects_task_mode_mismatch() {
        let cfg: ButlerConfig = toml::from_str(
            r#"
            [butler]
            name = "health"
            port = 7821

            [[scheduled_tasks]]
            name = "broken"
            spec = "0 7 * * *"
            dispatch_mode = "prompt"
            job_name = "rollup"
            "#,
        )
        .unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_duplicate_task_names() {
        let cfg: ButlerConfig = toml::from_str(
            r#"
            [butler]
            name = "health"
            port = 7821

            [[scheduled_tasks]]
            name = "dup"
            spec = "0 7 * * *"
            dispatch_mode = "prompt"
            prompt = "a"

            [[scheduled_tasks]]
            name = "dup"
            spec = "0 8 * * *"
            dispatch_mode = "prompt"
            prompt = "b"
            "#,
        )
        .unwrap();
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_route_to_without_target() {
        let cfg: ButlerConfig = toml::from_str(
            r#"
            [butler]
            name = "switchboard"
            port = 7800

            [switchboard]

            [[switchboard.triage_rules]]
            id = "r1"
            kind = "sender_domain"
            pattern = "x.example"
            action = "route_to"
            "#,
        )
        .unwrap();
        assert!(validate(&cfg).is_err());
    }
}
