// Logger configuration
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Scrub PHI from messages that pass through [`crate::PiiRedactor`]
    pub redaction_enabled: bool,
    /// Default `EnvFilter` directive, used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            redaction_enabled: true,
            log_level: "info".to_string(),
        }
    }
}
