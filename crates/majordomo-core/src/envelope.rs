//! The canonical inbound message record (`ingest.v1`).
//!
//! Connectors normalize whatever their source produces into an
//! [`IngestEnvelope`] and submit it to the switchboard. The envelope is
//! immutable once accepted; unknown JSON fields are ignored so connectors
//! built against newer revisions keep working.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FleetError, FleetResult};
use crate::trace::TraceContext;
use crate::triage::TriageAction;
use crate::types::RequestId;

/// The stable schema version of the ingest contract.
pub const INGEST_SCHEMA_VERSION: &str = "ingest.v1";

/// Default tolerated clock skew before a future `observed_at` is flagged.
pub const DEFAULT_OBSERVED_AT_SKEW_SECS: i64 = 300;

// ---------------------------------------------------------------------------
// Channel / Provider
// ---------------------------------------------------------------------------

/// Logical channel the message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Telegram chat.
    Telegram,
    /// Email mailbox.
    Email,
    /// Direct API submission.
    Api,
    /// Another butler, via a tool call.
    Mcp,
}

impl Channel {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Email => "email",
            Self::Api => "api",
            Self::Mcp => "mcp",
        }
    }
}

/// Concrete provider behind a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Telegram Bot API.
    Telegram,
    /// Gmail API.
    Gmail,
    /// Generic IMAP mailbox.
    Imap,
    /// In-process / first-party submission.
    Internal,
}

impl Provider {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Telegram => "telegram",
            Self::Gmail => "gmail",
            Self::Imap => "imap",
            Self::Internal => "internal",
        }
    }
}

/// The channel/provider pairs the ingress accepts.
const VALID_PAIRS: &[(Channel, Provider)] = &[
    (Channel::Telegram, Provider::Telegram),
    (Channel::Email, Provider::Gmail),
    (Channel::Email, Provider::Imap),
    (Channel::Api, Provider::Internal),
    (Channel::Mcp, Provider::Internal),
];

// ---------------------------------------------------------------------------
// Envelope sections
// ---------------------------------------------------------------------------

/// Where the message came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Logical channel.
    pub channel: Channel,
    /// Concrete provider.
    pub provider: Provider,
    /// Stable identity of the endpoint (bot handle, mailbox address, …).
    pub endpoint_identity: String,
}

/// The source-native event behind the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    /// Source-assigned event id. Required, but may be a placeholder.
    pub external_event_id: String,
    /// Source-assigned thread id, when the source threads conversations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_thread_id: Option<String>,
    /// When the source says the event happened. Timezone-aware.
    pub observed_at: DateTime<Utc>,
}

/// Who sent the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderRef {
    /// Source-scoped sender identity (address, user id, …).
    pub identity: String,
}

/// An attachment reference. Bytes never travel in the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// MIME type.
    pub media_type: String,
    /// Where the bytes live (connector-scoped reference).
    pub storage_ref: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Original filename, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Pixel width for images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    /// Pixel height for images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// The message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Source-native structured payload. Required at the `full` tier,
    /// forbidden at the `metadata` tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
    /// Normalized plain text. Never empty.
    pub normalized_text: String,
    /// Attachment references.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Queue-ordering hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTier {
    /// No special treatment.
    #[default]
    Default,
    /// A human is waiting on the reply.
    Interactive,
    /// Jump the queue.
    HighPriority,
}

impl PolicyTier {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Interactive => "interactive",
            Self::HighPriority => "high_priority",
        }
    }
}

/// How much of the payload travels with the envelope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionTier {
    /// Complete payload, `raw` required.
    #[default]
    Full,
    /// Slim reference only, `raw` forbidden.
    Metadata,
}

impl IngestionTier {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Metadata => "metadata",
        }
    }
}

/// Delivery control data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    /// Caller-supplied idempotency key. Wins over everything else for
    /// dedupe-key derivation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Trace context minted by (or inherited from) the connector.
    pub trace_context: TraceContext,
    /// Queue-ordering hint.
    #[serde(default)]
    pub policy_tier: PolicyTier,
    /// Payload completeness tier.
    #[serde(default)]
    pub ingestion_tier: IngestionTier,
}

// ---------------------------------------------------------------------------
// IngestEnvelope
// ---------------------------------------------------------------------------

/// The canonical inbound message record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestEnvelope {
    /// Always [`INGEST_SCHEMA_VERSION`].
    pub schema_version: String,
    /// Where the message came from.
    pub source: SourceRef,
    /// The source-native event.
    pub event: EventRef,
    /// Who sent it.
    pub sender: SenderRef,
    /// The content.
    pub payload: Payload,
    /// Delivery control data.
    pub control: Control,
}

impl IngestEnvelope {
    /// Start building an envelope.
    #[must_use]
    pub fn builder(
        channel: Channel,
        provider: Provider,
        endpoint_identity: impl Into<String>,
    ) -> IngestEnvelopeBuilder {
        IngestEnvelopeBuilder {
            source: SourceRef {
                channel,
                provider,
                endpoint_identity: endpoint_identity.into(),
            },
            external_event_id: String::new(),
            external_thread_id: None,
            observed_at: Utc::now(),
            sender: String::new(),
            raw: None,
            normalized_text: String::new(),
            attachments: Vec::new(),
            idempotency_key: None,
            trace_context: TraceContext::new(),
            policy_tier: PolicyTier::Default,
            ingestion_tier: IngestionTier::Full,
        }
    }

    /// Validate the envelope against the `ingest.v1` contract.
    ///
    /// `now` anchors the future-skew check so callers (and tests) control
    /// the clock. A future `observed_at` within the skew is fine; beyond it
    /// the envelope is still accepted but the caller should log.
    ///
    /// Returns `true` when `observed_at` exceeds the allowed future skew.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::InvalidEnvelope`] naming the exact violation:
    /// wrong schema version, invalid channel/provider pair, empty
    /// `external_event_id`, empty `normalized_text`, empty
    /// `endpoint_identity`, or a tier/raw mismatch.
    pub fn validate(&self, now: DateTime<Utc>, max_skew_secs: i64) -> FleetResult<bool> {
        if self.schema_version != INGEST_SCHEMA_VERSION {
            return Err(FleetError::invalid_envelope(format!(
                "unsupported schema version {:?}",
                self.schema_version
            )));
        }
        if !VALID_PAIRS
            .iter()
            .any(|(c, p)| *c == self.source.channel && *p == self.source.provider)
        {
            return Err(FleetError::invalid_envelope(format!(
                "invalid channel/provider pair {}/{}",
                self.source.channel.as_str(),
                self.source.provider.as_str()
            )));
        }
        if self.source.endpoint_identity.trim().is_empty() {
            return Err(FleetError::invalid_envelope("empty endpoint_identity"));
        }
        if self.event.external_event_id.is_empty() {
            return Err(FleetError::invalid_envelope("empty external_event_id"));
        }
        if self.payload.normalized_text.is_empty() {
            return Err(FleetError::invalid_envelope("empty normalized_text"));
        }
        match self.control.ingestion_tier {
            IngestionTier::Full => match &self.payload.raw {
                Some(Value::Object(map)) if !map.is_empty() => {},
                Some(_) | None => {
                    return Err(FleetError::invalid_envelope(
                        "full tier requires a non-empty structured raw payload",
                    ));
                },
            },
            IngestionTier::Metadata => {
                if self.payload.raw.is_some() {
                    return Err(FleetError::invalid_envelope(
                        "metadata tier forbids a raw payload",
                    ));
                }
            },
        }
        let skew = Duration::seconds(max_skew_secs);
        Ok(self.event.observed_at > now + skew)
    }
}

/// Builder for [`IngestEnvelope`].
#[derive(Debug)]
pub struct IngestEnvelopeBuilder {
    source: SourceRef,
    external_event_id: String,
    external_thread_id: Option<String>,
    observed_at: DateTime<Utc>,
    sender: String,
    raw: Option<Value>,
    normalized_text: String,
    attachments: Vec<Attachment>,
    idempotency_key: Option<String>,
    trace_context: TraceContext,
    policy_tier: PolicyTier,
    ingestion_tier: IngestionTier,
}

impl IngestEnvelopeBuilder {
    /// Set the source-native event id.
    #[must_use]
    pub fn external_event_id(mut self, id: impl Into<String>) -> Self {
        self.external_event_id = id.into();
        self
    }

    /// Set the source-native thread id.
    #[must_use]
    pub fn external_thread_id(mut self, id: impl Into<String>) -> Self {
        self.external_thread_id = Some(id.into());
        self
    }

    /// Override when the source observed the event (defaults to now).
    #[must_use]
    pub fn observed_at(mut self, at: DateTime<Utc>) -> Self {
        self.observed_at = at;
        self
    }

    /// Set the sender identity.
    #[must_use]
    pub fn sender(mut self, identity: impl Into<String>) -> Self {
        self.sender = identity.into();
        self
    }

    /// Set the source-native structured payload.
    #[must_use]
    pub fn raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Set the normalized plain text.
    #[must_use]
    pub fn normalized_text(mut self, text: impl Into<String>) -> Self {
        self.normalized_text = text.into();
        self
    }

    /// Add an attachment reference.
    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Set a caller-supplied idempotency key.
    #[must_use]
    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Override the trace context (defaults to a fresh trace).
    #[must_use]
    pub fn trace_context(mut self, ctx: TraceContext) -> Self {
        self.trace_context = ctx;
        self
    }

    /// Set the queue-ordering hint.
    #[must_use]
    pub fn policy_tier(mut self, tier: PolicyTier) -> Self {
        self.policy_tier = tier;
        self
    }

    /// Set the payload completeness tier.
    #[must_use]
    pub fn ingestion_tier(mut self, tier: IngestionTier) -> Self {
        self.ingestion_tier = tier;
        self
    }

    /// Consume the builder and produce an [`IngestEnvelope`].
    ///
    /// The result is not validated; call [`IngestEnvelope::validate`] at the
    /// ingress boundary.
    #[must_use]
    pub fn build(self) -> IngestEnvelope {
        IngestEnvelope {
            schema_version: INGEST_SCHEMA_VERSION.to_owned(),
            source: self.source,
            event: EventRef {
                external_event_id: self.external_event_id,
                external_thread_id: self.external_thread_id,
                observed_at: self.observed_at,
            },
            sender: SenderRef {
                identity: self.sender,
            },
            payload: Payload {
                raw: self.raw,
                normalized_text: self.normalized_text,
                attachments: self.attachments,
            },
            control: Control {
                idempotency_key: self.idempotency_key,
                trace_context: self.trace_context,
                policy_tier: self.policy_tier,
                ingestion_tier: self.ingestion_tier,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// AcceptResponse
// ---------------------------------------------------------------------------

/// What the ingress returns for every submitted envelope.
///
/// A duplicate is never an error: the caller always receives the
/// `request_id` of the surviving inbox row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptResponse {
    /// Id of the (possibly pre-existing) inbox row.
    pub request_id: RequestId,
    /// Whether the envelope had been accepted before.
    pub duplicate: bool,
    /// Triage outcome, when a rule or thread affinity decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_decision: Option<TriageAction>,
    /// The butler a triage decision routed to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_target: Option<String>,
}
