//! Triage outcomes shared between the ingress and its callers.

use serde::{Deserialize, Serialize};

use crate::envelope::IngestionTier;

/// What a triage rule (or thread affinity) decided to do with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageAction {
    /// Send straight to a named butler, skipping classification.
    RouteTo,
    /// Park on the low-priority queue for batch handling.
    LowPriorityQueue,
    /// Continue to classification as usual.
    PassThrough,
    /// Keep only the slim reference; drop the raw payload downstream.
    MetadataOnly,
    /// Accept and stop: no dispatch at all.
    Skip,
}

impl TriageAction {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RouteTo => "route_to",
            Self::LowPriorityQueue => "low_priority_queue",
            Self::PassThrough => "pass_through",
            Self::MetadataOnly => "metadata_only",
            Self::Skip => "skip",
        }
    }

    /// The ingestion tier this action processes the message at, or `None`
    /// when the action suppresses dispatch entirely.
    #[must_use]
    pub fn ingestion_tier(&self) -> Option<IngestionTier> {
        match self {
            Self::RouteTo | Self::LowPriorityQueue | Self::PassThrough => {
                Some(IngestionTier::Full)
            },
            Self::MetadataOnly => Some(IngestionTier::Metadata),
            Self::Skip => None,
        }
    }
}

/// A concrete triage outcome, ready to record on the inbox row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageDecision {
    /// The action taken.
    pub action: TriageAction,
    /// Target butler for [`TriageAction::RouteTo`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Id of the rule that matched, or a marker like `thread_affinity` /
    /// `default`.
    pub rule_id: String,
}

impl TriageDecision {
    /// The fall-through decision when nothing matched.
    #[must_use]
    pub fn default_pass_through() -> Self {
        Self {
            action: TriageAction::PassThrough,
            target: None,
            rule_id: "default".to_owned(),
        }
    }
}
