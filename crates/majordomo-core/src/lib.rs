//! Majordomo Core - Foundation types for the butler fleet.
//!
//! This crate provides:
//! - The canonical inbound message record ([`IngestEnvelope`], `ingest.v1`)
//! - Dedupe-key derivation for idempotent acceptance
//! - The connector heartbeat envelope (`connector.heartbeat.v1`) and the
//!   liveness/eligibility states derived from it
//! - Trace-context propagation across butlers
//! - The shared error taxonomy every RPC surface speaks

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod context;
pub mod dedupe;
pub mod envelope;
pub mod error;
pub mod heartbeat;
pub mod trace;
pub mod triage;
pub mod types;

pub use context::RequestContext;
pub use dedupe::{DedupeStrategy, advisory_lock_key, derive_dedupe_key};
pub use envelope::{
    AcceptResponse, Attachment, Channel, Control, EventRef, IngestEnvelope, IngestEnvelopeBuilder,
    IngestionTier, Payload, PolicyTier, Provider, SenderRef, SourceRef, INGEST_SCHEMA_VERSION,
};
pub use error::{FleetError, FleetResult};
pub use heartbeat::{
    ConnectorHealth, ConnectorKey, Eligibility, HeartbeatCheckpoint, HeartbeatEnvelope,
    HeartbeatStatus, Liveness, HEARTBEAT_SCHEMA_VERSION, clamp_heartbeat_interval,
    derive_liveness,
};
pub use trace::TraceContext;
pub use triage::{TriageAction, TriageDecision};
pub use types::{ButlerName, GroupId, RequestId, SessionId};
