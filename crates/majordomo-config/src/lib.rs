//! Majordomo configuration.
//!
//! Each butler daemon is described by a `butler.toml` in its own directory
//! under the fleet config root:
//!
//! ```text
//! fleet/
//!   switchboard/butler.toml
//!   general/butler.toml
//!   health/butler.toml
//! ```
//!
//! [`load_butler`] reads and validates one file; [`discover_fleet`] rescans
//! the root and returns every declared butler (used by the switchboard's
//! registry rescan at startup and on demand).

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod error;
pub mod loader;
pub mod types;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{discover_fleet, load_butler};
pub use types::{
    ButlerConfig, ButlerDeclaration, ClassifierConfig, DatabaseConfig, NotifyConfig,
    ScheduledTaskConfig, SessionConfig, SwitchboardConfig, TriageRuleConfig, TriageRuleKind,
};
