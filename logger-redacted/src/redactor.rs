use base64::{engine::general_purpose, Engine as _};
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::config::LoggerConfig;

lazy_static! {
    static ref EMAIL_REGEX: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();
    static ref SSN_REGEX: Regex = Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap();
    static ref PHONE_REGEX: Regex =
        Regex::new(r"\b(?:\+1[-.\s]?)?\(?(\d{3})\)?[-.\s]?(\d{3})[-.\s]?(\d{4})\b").unwrap();
    static ref MRN_REGEX: Regex = Regex::new(r"(?i)\bMRN[-:#\s]*[A-Z0-9]{4,}\b").unwrap();
}

/// Kinds of identifiers the redactor knows how to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiiKind {
    Email,
    Ssn,
    Phone,
    MedicalRecordNumber,
}

impl PiiKind {
    fn label(self) -> &'static str {
        match self {
            PiiKind::Email => "EMAIL",
            PiiKind::Ssn => "SSN",
            PiiKind::Phone => "PHONE",
            PiiKind::MedicalRecordNumber => "MRN",
        }
    }

    fn mask(self) -> &'static str {
        match self {
            PiiKind::Email => "***@***",
            PiiKind::Ssn => "***-**-****",
            PiiKind::Phone => "(***) ***-****",
            PiiKind::MedicalRecordNumber => "MRN[REDACTED]",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            PiiKind::Email => &EMAIL_REGEX,
            PiiKind::Ssn => &SSN_REGEX,
            PiiKind::Phone => &PHONE_REGEX,
            PiiKind::MedicalRecordNumber => &MRN_REGEX,
        }
    }
}

/// Redaction rules. SSNs are scrubbed before phone numbers so the looser
/// phone pattern never sees them.
#[derive(Debug, Clone)]
pub struct RedactionConfig {
    pub enabled: bool,
    pub kinds: Vec<PiiKind>,
    /// Replace matches with a short SHA-256 digest instead of a fixed mask,
    /// so the same identifier can be correlated across log lines.
    pub hash_for_correlation: bool,
    pub custom_patterns: Vec<(Regex, String)>,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            kinds: vec![
                PiiKind::Email,
                PiiKind::Ssn,
                PiiKind::Phone,
                PiiKind::MedicalRecordNumber,
            ],
            hash_for_correlation: true,
            custom_patterns: Vec::new(),
        }
    }
}

impl From<&LoggerConfig> for RedactionConfig {
    fn from(config: &LoggerConfig) -> Self {
        Self {
            enabled: config.redaction_enabled,
            ..Self::default()
        }
    }
}

/// Scrubs patient identifiers out of free text before it reaches a log sink.
#[derive(Debug, Clone, Default)]
pub struct PiiRedactor {
    config: RedactionConfig,
}

impl PiiRedactor {
    pub fn new(config: RedactionConfig) -> Self {
        Self { config }
    }

    pub fn from_logger_config(config: &LoggerConfig) -> Self {
        Self::new(RedactionConfig::from(config))
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn redact(&self, text: &str) -> String {
        if !self.config.enabled {
            return text.to_string();
        }

        let mut result = text.to_string();
        for kind in &self.config.kinds {
            result = self.redact_kind(*kind, &result);
        }

        for (pattern, replacement) in &self.config.custom_patterns {
            result = pattern.replace_all(&result, replacement.as_str()).into_owned();
        }

        result
    }

    fn redact_kind(&self, kind: PiiKind, text: &str) -> String {
        kind.pattern()
            .replace_all(text, |caps: &Captures| {
                if self.config.hash_for_correlation {
                    format!("{}[{}]", kind.label(), Self::digest(&caps[0]))
                } else {
                    kind.mask().to_string()
                }
            })
            .into_owned()
    }

    fn digest(value: &str) -> String {
        let hash = Sha256::digest(value.as_bytes());
        // 8 bytes keeps the tag short
        general_purpose::STANDARD_NO_PAD.encode(&hash[..8])
    }
}
