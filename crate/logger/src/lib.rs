//! Logging helpers shared by the PKI toolkit crates.
//!
//! The `tracing` macros are re-exported so that downstream crates depend on a single
//! logging facade.

mod log_utils;

pub use log_utils::{DEFAULT_LOG_FILTER, log_init};
pub use tracing::{Level, debug, enabled, error, info, trace, warn};
