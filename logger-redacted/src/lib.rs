//! PHI-aware logging for the billing engine
//!
//! Billing records carry patient names, MRNs and contact details, and the
//! persistence boundary tends to echo them back inside error text. This crate
//! keeps them out of log sinks:
//!
//! - **`PiiRedactor`**: regex-driven scrubbing of emails, SSNs, phone numbers
//!   and medical record numbers, optionally replaced by a short SHA-256 tag so
//!   the same identifier can still be correlated across lines
//! - **`redacted_warn!` / `redacted_error!`**: `tracing` macros that route the
//!   message through a redactor
//! - **`init_logging`**: installs the `tracing-subscriber` formatter with an
//!   `EnvFilter`
//!
//! # Example
//!
//! ```rust
//! use logger_redacted::{LoggerConfig, PiiRedactor};
//!
//! let redactor = PiiRedactor::from_logger_config(&LoggerConfig::default());
//! let line = redactor.redact("lookup failed for MRN 00451277");
//! assert!(!line.contains("00451277"));
//! ```

pub mod config;
pub mod macros;
pub mod redactor;

pub use config::*;
pub use redactor::*;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `config.log_level` when it is set.
pub fn init_logging(config: &LoggerConfig) -> Result<(), LoggerError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| LoggerError::Filter(e.to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| LoggerError::Init(e.to_string()))
}
