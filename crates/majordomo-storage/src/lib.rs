//! Majordomo Storage — embedded persistence for the butler fleet.
//!
//! One logical database, one schema per butler: every butler owns a
//! `state` / `scheduled_tasks` / `sessions` trio in its own database, and
//! the switchboard additionally owns the inbox, routing log, registries,
//! and notifications. Cross-butler access goes through routing, never
//! through another butler's schema.
//!
//! The engine is embedded `SurrealDB` (`SurrealKV` on disk, in-memory for
//! tests); [`Database`] wraps the connection, the stores wrap the tables.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod connectors;
pub mod db;
pub mod error;
pub mod inbox;
pub mod locks;
pub mod notifications;
pub mod registry;
pub mod routing;
pub mod schedule;
pub mod sessions;
pub mod state;
pub mod stats;

pub use connectors::{ConnectorRecord, ConnectorRegistryStore, EligibilityAudit};
pub use db::Database;
pub use error::{StorageError, StorageResult};
pub use inbox::{InboxRow, InboxStore};
pub use locks::AdvisoryLocks;
pub use notifications::{NotificationRecord, NotificationStore};
pub use registry::{ButlerRecord, ButlerRegistryStore};
pub use routing::{RoutingEntry, RoutingStore};
pub use schedule::{ScheduleStore, TaskRecord};
pub use sessions::{QueuedSession, SessionRecord, SessionStore};
pub use state::{StateEntry, StateStore};
pub use stats::{CounterStat, FanoutStat, StatsStore};
