//! Majordomo Butler — the daemon every specialist runs.
//!
//! A butler owns one database, one scheduler, one session pool, and one
//! tool server. The core tool set (`state.*`, `schedule.*`, `trigger`,
//! `tick`, `notify`) is identical on every butler; specialists add their
//! own domain tools on top.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod daemon;
pub mod dispatch;
pub mod jobs;
pub mod notify;
pub mod tools;

pub use daemon::ButlerDaemon;
pub use dispatch::PoolDispatcher;
pub use jobs::JobRegistry;
pub use notify::{LogNotifier, Notifier};
pub use tools::{core_tools, CoreToolDeps};
