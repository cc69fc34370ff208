//! Convenience re-exports for downstream crates.

pub use crate::context::RequestContext;
pub use crate::dedupe::{DedupeStrategy, advisory_lock_key, derive_dedupe_key};
pub use crate::envelope::{
    AcceptResponse, Attachment, Channel, IngestEnvelope, IngestionTier, PolicyTier, Provider,
};
pub use crate::error::{FleetError, FleetResult};
pub use crate::heartbeat::{
    ConnectorHealth, ConnectorKey, Eligibility, HeartbeatEnvelope, Liveness,
};
pub use crate::trace::TraceContext;
pub use crate::triage::{TriageAction, TriageDecision};
pub use crate::types::{ButlerName, GroupId, RequestId, SessionId};
