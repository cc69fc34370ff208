//! Majordomo Connector — the runtime base every connector process shares.
//!
//! A connector bridges one external source to the switchboard with
//! at-least-once delivery: read, normalize to an [`IngestEnvelope`],
//! submit over RPC, checkpoint only after acceptance, heartbeat on the
//! side. Source-native adapters implement [`MessageSource`]; everything
//! else here is common.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod checkpoint;
pub mod counters;
pub mod error;
pub mod heartbeat;
pub mod rpc;
pub mod runtime;
pub mod source;

pub use checkpoint::CheckpointFile;
pub use counters::ConnectorCounters;
pub use error::{ConnectorError, ConnectorResult};
pub use heartbeat::run_heartbeat;
pub use rpc::{BackfillJob, HeartbeatAck, IngressRpcClient, IngressRpcServer, SwitchboardClient};
pub use runtime::{ConnectorRuntime, ConnectorSettings, ConnectorState};
pub use source::{ChannelSource, MessageSource, SourceError, SourceItem};

// majordomo_core is re-exported so connector binaries only need this crate.
pub use majordomo_core as core;
