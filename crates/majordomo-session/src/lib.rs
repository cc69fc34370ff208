//! Majordomo Session — ephemeral LLM CLI sessions.
//!
//! Each butler runs one [`SessionPool`]: a FIFO queue drained by a small
//! worker set. A session is a short-lived child process of the configured
//! LLM CLI, handed a synthesized prompt and an ephemeral config that
//! exposes only this butler's tool endpoint. Outcomes land in the
//! butler's `sessions` table; accepted-but-unspawned requests are
//! persisted so a restart resumes them.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod pool;
pub mod prompt;
pub mod spawn;

pub use pool::{SessionPool, SessionSubmission};
pub use prompt::assemble_prompt;
pub use spawn::{CliLauncher, SessionLauncher, SpawnOutcome};
