//! Observability utilities.
//!
//! Pipeline code logs through `tracing` with structured fields; this module
//! installs the subscriber that renders them.

mod logging;

pub use logging::{init_logging, log_filter};
