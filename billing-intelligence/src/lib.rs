//! Billing Intelligence Engine
//!
//! Deterministic coding rules for clinical billing:
//! - E/M level derivation from the three MDM elements (problems, data, risk)
//! - HCC risk-adjustment mapping and RAF totals for ICD-10 codes
//! - Compliance alerts for upcoding, audit exposure, bundling and diagnosis support
//! - Weighted claim-denial risk scoring
//! - A unified, filterable view over note-linked and manually entered bills,
//!   with RVU analytics
//!
//! The pure components share one immutable [`CodeTables`] value; the
//! aggregator talks to storage through [`BillingRecordSource`].

pub mod aggregator;
pub mod alerts;
pub mod code_tables;
pub mod config;
pub mod denial;
pub mod error;
pub mod findings;
pub mod hcc;
pub mod mdm;
pub mod models;
pub mod pagination;
pub mod reporting;
pub mod service;
pub mod source;

pub use aggregator::*;
pub use alerts::{sort_by_severity, AlertSummary, BillingAlertAnalyzer};
pub use code_tables::*;
pub use config::*;
pub use denial::*;
pub use error::*;
pub use hcc::*;
pub use mdm::*;
pub use models::*;
pub use pagination::*;
pub use reporting::*;
pub use service::*;
pub use source::*;
