use thiserror::Error;

use crate::models::BillSource;

#[derive(Error, Debug)]
pub enum BillingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to fetch {origin} billing records: {message}")]
    SourceFetch { origin: BillSource, message: String },

    #[error("Billing record not found: {0}")]
    NotFound(String),

    #[error("Unsupported edit: {0}")]
    UnsupportedEdit(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BillingResult<T> = Result<T, BillingError>;
