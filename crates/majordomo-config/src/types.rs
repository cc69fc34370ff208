//! Configuration types deserialized from `butler.toml`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything a butler daemon needs to start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButlerConfig {
    /// Identity block.
    pub butler: ButlerDeclaration,
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Session spawner settings.
    #[serde(default)]
    pub sessions: SessionConfig,
    /// Outbound delivery settings.
    #[serde(default)]
    pub notify: NotifyConfig,
    /// Tasks created at startup (upserted by name).
    #[serde(default)]
    pub scheduled_tasks: Vec<ScheduledTaskConfig>,
    /// Present only on the ingress butler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switchboard: Option<SwitchboardConfig>,
}

/// The `[butler]` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButlerDeclaration {
    /// Butler name; also the registry key and database name.
    pub name: String,
    /// Human-readable description; shown to the classifier.
    #[serde(default)]
    pub description: String,
    /// Port the butler's tool server listens on.
    pub port: u16,
    /// Capability modules the butler advertises.
    #[serde(default)]
    pub modules: Vec<String>,
}

impl ButlerDeclaration {
    /// The tool-server endpoint URL derived from the port.
    #[must_use]
    pub fn endpoint_url(&self) -> String {
        format!("ws://127.0.0.1:{}", self.port)
    }
}

/// The `[database]` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Storage engine path, or `"memory"` for an in-memory engine.
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "data/majordomo".to_owned()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// The `[sessions]` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Workers draining the session queue. Serial dispatch = 1.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Queue capacity before submitters block (or fail fast).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-session wall-clock deadline, seconds.
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    /// Grace between SIGTERM and SIGKILL, seconds.
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,
    /// The LLM CLI binary to spawn.
    #[serde(default = "default_cli_binary")]
    pub cli_binary: String,
    /// Model identifier passed to the CLI, when pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// System-prompt preamble for every session on this butler.
    #[serde(default)]
    pub system_prompt: String,
    /// Skill references appended to the system prompt.
    #[serde(default)]
    pub skills: Vec<String>,
}

fn default_max_concurrent() -> usize {
    3
}
fn default_queue_capacity() -> usize {
    64
}
fn default_deadline_secs() -> u64 {
    300
}
fn default_kill_grace_secs() -> u64 {
    5
}
fn default_cli_binary() -> String {
    "claude".to_owned()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_capacity: default_queue_capacity(),
            deadline_secs: default_deadline_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            cli_binary: default_cli_binary(),
            model: None,
            system_prompt: String::new(),
            skills: Vec::new(),
        }
    }
}

/// The `[notify]` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Default recipient for `send`-intent deliveries, per channel.
    /// Keys are channel names (`telegram`, `email`, …).
    #[serde(default)]
    pub default_recipients: std::collections::HashMap<String, String>,
}

/// One `[[scheduled_tasks]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTaskConfig {
    /// Task name, unique within the butler.
    pub name: String,
    /// Five-field cron expression, or an RFC 3339 instant for a one-shot.
    pub spec: String,
    /// IANA timezone the spec is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// `prompt` or `job`.
    pub dispatch_mode: String,
    /// Prompt text for `dispatch_mode = "prompt"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Registered job name for `dispatch_mode = "job"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Arguments for the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_args: Option<Value>,
    /// Stop firing after this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until_at: Option<chrono::DateTime<chrono::Utc>>,
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

/// The `[switchboard]` block, present only on the ingress butler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    /// Port the connector-facing ingress RPC listens on.
    #[serde(default = "default_ingress_port")]
    pub ingress_port: u16,
    /// Classifier session settings.
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Deterministic triage rules, first match wins.
    #[serde(default)]
    pub triage_rules: Vec<TriageRuleConfig>,
    /// Allowed future clock skew on `observed_at`, seconds.
    #[serde(default = "default_observed_at_skew")]
    pub observed_at_skew_secs: i64,
}

fn default_observed_at_skew() -> i64 {
    300
}

fn default_ingress_port() -> u16 {
    7810
}

impl Default for SwitchboardConfig {
    fn default() -> Self {
        Self {
            ingress_port: default_ingress_port(),
            classifier: ClassifierConfig::default(),
            triage_rules: Vec::new(),
            observed_at_skew_secs: default_observed_at_skew(),
        }
    }
}

/// Classifier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Hard cap on sub-routes per decomposed message.
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,
    /// Butler that receives messages the classifier cannot place.
    #[serde(default = "default_fallback_butler")]
    pub fallback_butler: String,
}

fn default_max_fanout() -> usize {
    4
}
fn default_fallback_butler() -> String {
    "general".to_owned()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_fanout: default_max_fanout(),
            fallback_butler: default_fallback_butler(),
        }
    }
}

/// Kind of a deterministic triage rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageRuleKind {
    /// Exact or dot-suffix match on the sender's domain.
    SenderDomain,
    /// Case-insensitive exact match on the sender address.
    SenderAddress,
    /// Header present / equals / contains.
    HeaderCondition,
    /// Uppercase-normalized label membership.
    LabelMatch,
}

/// One `[[switchboard.triage_rules]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageRuleConfig {
    /// Rule id, recorded on matched inbox rows.
    pub id: String,
    /// Predicate kind.
    pub kind: TriageRuleKind,
    /// Predicate pattern (domain, address, label, or header value).
    pub pattern: String,
    /// Header name for [`TriageRuleKind::HeaderCondition`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    /// Header operator: `present`, `equals`, or `contains`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    /// Action: `route_to`, `low_priority_queue`, `pass_through`,
    /// `metadata_only`, or `skip`.
    pub action: String,
    /// Target butler for `route_to`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}
