//! Majordomo Scheduler — per-butler schedule evaluation.
//!
//! Tasks carry either a five-field cron expression or a one-shot RFC 3339
//! instant, evaluated in the task's own timezone. A background loop ticks
//! at a fixed cadence, fires whatever is due, and advances `next_run_at`
//! in the same store write that records the fire — a crash between
//! evaluation and dispatch never double-fires, and missed windows
//! collapse into at most one session.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod error;
pub mod runner;
pub mod spec;

pub use error::{ScheduleError, ScheduleResult};
pub use runner::{run_scheduler, tick, SchedulerTick, TaskDispatcher};
pub use spec::ScheduleSpec;
