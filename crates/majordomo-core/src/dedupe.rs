//! Dedupe-key derivation.
//!
//! Every envelope derives exactly one stable dedupe key, picked from a
//! priority ladder:
//!
//! 1. Caller idempotency key, when supplied.
//! 2. The source event id, unless it is a placeholder.
//! 3. A content hash bucketed by hour, as the last resort.
//!
//! Concurrent writers of the same key are serialized by an advisory lock
//! keyed on a stable 64-bit hash of the key (see [`advisory_lock_key`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::envelope::IngestEnvelope;

/// Event ids that carry no identity and fall through to the hash tier.
const PLACEHOLDER_EVENT_IDS: &[&str] = &["", "unknown", "none", "placeholder"];

/// Which rung of the ladder produced the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupeStrategy {
    /// Caller-supplied idempotency key.
    IdempotencyKey,
    /// Source-assigned event id.
    EventId,
    /// Content hash in an hour bucket.
    ContentHash,
}

impl DedupeStrategy {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IdempotencyKey => "idempotency_key",
            Self::EventId => "event_id",
            Self::ContentHash => "content_hash",
        }
    }
}

/// Derive the dedupe key and the strategy that produced it.
#[must_use]
pub fn derive_dedupe_key(env: &IngestEnvelope) -> (String, DedupeStrategy) {
    let channel = env.source.channel.as_str();
    let endpoint = &env.source.endpoint_identity;

    if let Some(key) = &env.control.idempotency_key {
        return (
            format!("idem:{channel}:{endpoint}:{key}"),
            DedupeStrategy::IdempotencyKey,
        );
    }

    let event_id = env.event.external_event_id.trim();
    let placeholder = PLACEHOLDER_EVENT_IDS
        .iter()
        .any(|p| event_id.eq_ignore_ascii_case(p));
    // A non-placeholder event id with an empty sender still identifies the
    // event poorly; fall through to the hash tier in that case.
    if !placeholder && !env.sender.identity.is_empty() {
        let provider = env.source.provider.as_str();
        return (
            format!("event:{channel}:{provider}:{endpoint}:{event_id}"),
            DedupeStrategy::EventId,
        );
    }

    (
        hash_tier_key(
            channel,
            endpoint,
            &env.sender.identity,
            env.event.observed_at,
            &env.payload.normalized_text,
        ),
        DedupeStrategy::ContentHash,
    )
}

/// The hash-tier key: sender + hour bucket + truncated content digest.
fn hash_tier_key(
    channel: &str,
    endpoint: &str,
    sender: &str,
    observed_at: DateTime<Utc>,
    normalized_text: &str,
) -> String {
    let bucket = observed_at.format("%Y%m%d%H");
    let mut hasher = Sha256::new();
    hasher.update(normalized_text.as_bytes());
    hasher.update(b":");
    hasher.update(sender.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("hash:{channel}:{endpoint}:{sender}:{bucket}:{}", &digest[..16])
}

/// Stable 64-bit advisory-lock key for a dedupe key.
///
/// First eight bytes of `sha256(dedupe_key)`, big-endian. Stable across
/// processes and releases, unlike the standard library hasher.
#[must_use]
pub fn advisory_lock_key(dedupe_key: &str) -> u64 {
    let digest = Sha256::digest(dedupe_key.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}
