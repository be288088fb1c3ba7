use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use logger_redacted::LoggerConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::code_tables::CodeTables;
use crate::error::{BillingError, BillingResult};

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_TOP_CPT_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    pub page_size: u32,
    /// Upper bound on one page fetch across both sources
    pub fetch_timeout_ms: u64,
    pub top_cpt_limit: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            top_cpt_limit: DEFAULT_TOP_CPT_LIMIT,
        }
    }
}

impl AggregatorConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    pub aggregator: AggregatorConfig,
    /// JSON replacement for the built-in code tables
    pub code_tables_path: Option<PathBuf>,
    pub logging: LoggerConfig,
}

impl BillingConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> BillingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(page_size) = parse_var::<u32, _>(&lookup, "BILLING_PAGE_SIZE")? {
            config.aggregator.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        }

        if let Some(timeout_ms) = parse_var::<u64, _>(&lookup, "BILLING_FETCH_TIMEOUT_MS")? {
            if timeout_ms == 0 {
                return Err(BillingError::Config(
                    "BILLING_FETCH_TIMEOUT_MS must be greater than zero".to_string(),
                ));
            }
            config.aggregator.fetch_timeout_ms = timeout_ms;
        }

        if let Some(limit) = parse_var::<usize, _>(&lookup, "BILLING_TOP_CPT_LIMIT")? {
            config.aggregator.top_cpt_limit = limit;
        }

        config.code_tables_path = lookup("BILLING_CODE_TABLES")
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        if let Some(level) = lookup("BILLING_LOG_LEVEL") {
            config.logging.log_level = level;
        }

        if let Some(enabled) = parse_var::<bool, _>(&lookup, "BILLING_LOG_REDACTION")? {
            config.logging.redaction_enabled = enabled;
        }

        Ok(config)
    }

    /// Install the global subscriber with this configuration's log level
    pub fn init_logging(&self) -> BillingResult<()> {
        logger_redacted::init_logging(&self.logging)
            .map_err(|e| BillingError::Config(e.to_string()))
    }

    /// Built-in tables unless a replacement file is configured
    pub fn load_code_tables(&self) -> BillingResult<Arc<CodeTables>> {
        match &self.code_tables_path {
            Some(path) => CodeTables::from_json_file(path).map(Arc::new),
            None => {
                info!("Using built-in billing code tables");
                Ok(Arc::new(CodeTables::default()))
            }
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> BillingResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| BillingError::Config(format!("{key}={raw:?} is invalid: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = BillingConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.aggregator, AggregatorConfig::default());
        assert!(config.code_tables_path.is_none());
        assert!(config.logging.redaction_enabled);
        assert_eq!(config.aggregator.fetch_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_variables_override_defaults() {
        let config = BillingConfig::from_lookup(lookup(&[
            ("BILLING_PAGE_SIZE", "25"),
            ("BILLING_FETCH_TIMEOUT_MS", "1500"),
            ("BILLING_TOP_CPT_LIMIT", "5"),
            ("BILLING_CODE_TABLES", "/etc/billing/tables-2025.json"),
            ("BILLING_LOG_LEVEL", "debug"),
            ("BILLING_LOG_REDACTION", "false"),
        ]))
        .unwrap();

        assert_eq!(config.aggregator.page_size, 25);
        assert_eq!(config.aggregator.fetch_timeout_ms, 1500);
        assert_eq!(config.aggregator.top_cpt_limit, 5);
        assert_eq!(
            config.code_tables_path,
            Some(PathBuf::from("/etc/billing/tables-2025.json"))
        );
        assert_eq!(config.logging.log_level, "debug");
        assert!(!config.logging.redaction_enabled);
    }

    #[test]
    fn test_page_size_is_clamped() {
        let big = BillingConfig::from_lookup(lookup(&[("BILLING_PAGE_SIZE", "5000")])).unwrap();
        assert_eq!(big.aggregator.page_size, MAX_PAGE_SIZE);

        let zero = BillingConfig::from_lookup(lookup(&[("BILLING_PAGE_SIZE", "0")])).unwrap();
        assert_eq!(zero.aggregator.page_size, 1);
    }

    #[test]
    fn test_invalid_numbers_are_config_errors() {
        let err =
            BillingConfig::from_lookup(lookup(&[("BILLING_PAGE_SIZE", "fifty")])).unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));

        let err = BillingConfig::from_lookup(lookup(&[("BILLING_FETCH_TIMEOUT_MS", "0")]))
            .unwrap_err();
        assert!(matches!(err, BillingError::Config(_)));
    }

    #[test]
    fn test_default_tables_load_without_path() {
        let tables = BillingConfig::default().load_code_tables().unwrap();
        assert!(tables.em_code("99213").is_some());
    }
}
