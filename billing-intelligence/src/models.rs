use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

// ============================================================================
// Complexity and E/M
// ============================================================================

/// Ordinal MDM complexity tier. Declaration order is the clinical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplexityTier {
    Minimal,
    Low,
    Moderate,
    High,
}

impl ComplexityTier {
    pub const ALL: [ComplexityTier; 4] = [
        ComplexityTier::Minimal,
        ComplexityTier::Low,
        ComplexityTier::Moderate,
        ComplexityTier::High,
    ];

    pub fn ordinal(self) -> u8 {
        match self {
            ComplexityTier::Minimal => 0,
            ComplexityTier::Low => 1,
            ComplexityTier::Moderate => 2,
            ComplexityTier::High => 3,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(ComplexityTier::Minimal),
            1 => Some(ComplexityTier::Low),
            2 => Some(ComplexityTier::Moderate),
            3 => Some(ComplexityTier::High),
            _ => None,
        }
    }

    /// Next tier up, saturating at `High`
    pub fn raised(self) -> Self {
        Self::from_ordinal(self.ordinal() + 1).unwrap_or(ComplexityTier::High)
    }
}

impl fmt::Display for ComplexityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComplexityTier::Minimal => "minimal",
            ComplexityTier::Low => "low",
            ComplexityTier::Moderate => "moderate",
            ComplexityTier::High => "high",
        };
        f.write_str(name)
    }
}

/// The three MDM elements selected for an encounter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MdmInput {
    pub problems: ComplexityTier,
    pub data: ComplexityTier,
    pub risk: ComplexityTier,
}

impl MdmInput {
    pub fn new(problems: ComplexityTier, data: ComplexityTier, risk: ComplexityTier) -> Self {
        Self { problems, data, risk }
    }
}

/// E/M level derived from an [`MdmInput`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmResult {
    pub code: String,
    pub complexity_label: String,
    pub tier: ComplexityTier,
    pub rvu: Rvu,
}

// ============================================================================
// RVU
// ============================================================================

/// Relative value units. Never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Rvu(Decimal);

impl Rvu {
    pub const ZERO: Rvu = Rvu(Decimal::ZERO);

    pub fn new(value: Decimal) -> BillingResult<Self> {
        if value < Decimal::ZERO {
            return Err(BillingError::Validation(format!(
                "RVU must not be negative, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Rvu {
    type Error = BillingError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Rvu::new(value)
    }
}

impl From<Rvu> for Decimal {
    fn from(rvu: Rvu) -> Self {
        rvu.0
    }
}

impl Add for Rvu {
    type Output = Rvu;

    fn add(self, rhs: Rvu) -> Rvu {
        Rvu(self.0 + rhs.0)
    }
}

impl Sum for Rvu {
    fn sum<I: Iterator<Item = Rvu>>(iter: I) -> Self {
        iter.fold(Rvu::ZERO, Add::add)
    }
}

impl fmt::Display for Rvu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// ============================================================================
// Code sets
// ============================================================================

/// A CPT or ICD-10 code as suggested by the code-generation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeEntry {
    pub code: String,
    pub description: String,
    /// Suggestion confidence, 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<CodeEntry>,
}

impl CodeEntry {
    pub fn new(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            confidence: None,
            reasoning: None,
            alternatives: Vec::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = Some(confidence.min(100));
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<CodeEntry>) -> Self {
        self.alternatives = alternatives;
        self
    }
}

/// A finished code set awaiting confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSnapshot {
    pub em_level: Option<String>,
    /// Documented MDM. When `None` the upcode and conservative-coding rules
    /// are skipped.
    pub mdm_complexity: Option<ComplexityTier>,
    pub cpt_codes: Vec<CodeEntry>,
    pub icd10_codes: Vec<CodeEntry>,
    pub rvu: Rvu,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_type: Option<String>,
}

impl BillingSnapshot {
    pub fn new(rvu: Rvu) -> Self {
        Self {
            em_level: None,
            mdm_complexity: None,
            cpt_codes: Vec::new(),
            icd10_codes: Vec::new(),
            rvu,
            note_type: None,
        }
    }

    pub fn with_em_level(mut self, code: impl Into<String>) -> Self {
        self.em_level = Some(code.into());
        self
    }

    pub fn with_mdm(mut self, tier: ComplexityTier) -> Self {
        self.mdm_complexity = Some(tier);
        self
    }

    pub fn with_cpt(mut self, entries: Vec<CodeEntry>) -> Self {
        self.cpt_codes = entries;
        self
    }

    pub fn with_icd10(mut self, entries: Vec<CodeEntry>) -> Self {
        self.icd10_codes = entries;
        self
    }

    pub fn with_note_type(mut self, note_type: impl Into<String>) -> Self {
        self.note_type = Some(note_type.into());
        self
    }

    /// CPT codes in input order, duplicates removed
    pub fn distinct_cpt_codes(&self) -> Vec<&str> {
        let mut seen = Vec::with_capacity(self.cpt_codes.len());
        for entry in &self.cpt_codes {
            if !seen.contains(&entry.code.as_str()) {
                seen.push(entry.code.as_str());
            }
        }
        seen
    }

    pub fn has_cpt(&self, code: &str) -> bool {
        self.cpt_codes.iter().any(|entry| entry.code == code)
    }

    /// Every CPT and ICD-10 entry, CPT first
    pub fn all_entries(&self) -> impl Iterator<Item = &CodeEntry> {
        self.cpt_codes.iter().chain(self.icd10_codes.iter())
    }
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Upcode,
    Downcode,
    AuditRisk,
    Optimal,
    Info,
}

/// Alert severity; ordering follows urgency (`Critical` is greatest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    /// Display rank, 4 for critical down to 1 for low
    pub fn rank(self) -> u8 {
        match self {
            AlertSeverity::Critical => 4,
            AlertSeverity::High => 3,
            AlertSeverity::Medium => 2,
            AlertSeverity::Low => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAlert {
    /// Derived from the rule and the codes that triggered it
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
    pub affected_codes: Vec<String>,
}

// ============================================================================
// HCC
// ============================================================================

/// Reference entry for a hierarchical condition category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HccCategory {
    pub hcc: String,
    pub category: String,
    pub description: String,
    pub raf: Decimal,
}

/// An input ICD-10 code joined to its HCC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HccMatch {
    pub hcc: String,
    pub category: String,
    pub description: String,
    pub raf: Decimal,
    pub icd10_source: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HccSummary {
    pub matches: Vec<HccMatch>,
    pub total_raf: Decimal,
}

// ============================================================================
// Bills
// ============================================================================

/// Which table a bill lives in. `Note` orders before `Manual` on ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillSource {
    Note,
    Manual,
}

impl fmt::Display for BillSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BillSource::Note => f.write_str("note"),
            BillSource::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Pending,
    Submitted,
}

/// Bill ids are only unique per source, so writes carry both halves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BillKey {
    pub id: Uuid,
    pub source: BillSource,
}

impl BillKey {
    pub fn note(id: Uuid) -> Self {
        Self { id, source: BillSource::Note }
    }

    pub fn manual(id: Uuid) -> Self {
        Self { id, source: BillSource::Manual }
    }
}

impl fmt::Display for BillKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRef {
    pub patient_id: Option<Uuid>,
    pub name: String,
    pub mrn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRef {
    pub id: Uuid,
    pub name: String,
}

/// Billing record generated from a visit note
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteBillingRecord {
    pub id: Uuid,
    pub note_id: Uuid,
    pub status: BillStatus,
    pub created_at: DateTime<Utc>,
    pub facility: Option<String>,
    pub rvu: Rvu,
    pub patient: PatientRef,
    pub cpt_codes: Vec<CodeEntry>,
    pub icd10_codes: Vec<CodeEntry>,
    pub em_level: Option<String>,
    pub mdm_complexity: Option<ComplexityTier>,
    pub provider: Option<ProviderRef>,
    pub note_type: Option<String>,
}

impl NoteBillingRecord {
    pub fn apply(&mut self, update: &BillUpdate) {
        if let Some(rvu) = update.rvu {
            self.rvu = rvu;
        }
        if let Some(cpt) = &update.cpt_codes {
            self.cpt_codes = cpt.clone();
        }
        if let Some(facility) = &update.facility {
            self.facility = Some(facility.clone());
        }
        if let Some(icd10) = &update.icd10_codes {
            self.icd10_codes = icd10.clone();
        }
        if let Some(em_level) = &update.em_level {
            self.em_level = Some(em_level.clone());
        }
        if let Some(tier) = update.mdm_complexity {
            self.mdm_complexity = Some(tier);
        }
    }
}

/// Bill typed in by hand, outside the note workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualBill {
    pub id: Uuid,
    pub status: BillStatus,
    pub created_at: DateTime<Utc>,
    pub facility: Option<String>,
    pub rvu: Rvu,
    pub patient: PatientRef,
    pub cpt_codes: Vec<String>,
    pub created_by: Option<ProviderRef>,
    pub notes: Option<String>,
}

impl ManualBill {
    pub fn apply(&mut self, update: &ManualBillUpdate) {
        if let Some(rvu) = update.rvu {
            self.rvu = rvu;
        }
        if let Some(cpt) = &update.cpt_codes {
            self.cpt_codes = cpt.clone();
        }
        if let Some(facility) = &update.facility {
            self.facility = Some(facility.clone());
        }
    }
}

/// Either kind of bill, normalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedBill {
    pub id: Uuid,
    source: BillSource,
    pub status: BillStatus,
    pub created_at: DateTime<Utc>,
    pub facility: Option<String>,
    pub rvu: Rvu,
    pub patient: PatientRef,
    pub cpt_codes: Vec<String>,
    pub icd10_codes: Vec<String>,
    pub em_level: Option<String>,
    pub mdm_complexity: Option<ComplexityTier>,
    pub provider: Option<ProviderRef>,
    pub note_id: Option<Uuid>,
    pub note_type: Option<String>,
}

impl UnifiedBill {
    pub fn source(&self) -> BillSource {
        self.source
    }

    pub fn key(&self) -> BillKey {
        BillKey {
            id: self.id,
            source: self.source,
        }
    }

    pub fn is_submitted(&self) -> bool {
        self.status == BillStatus::Submitted
    }
}

impl From<NoteBillingRecord> for UnifiedBill {
    fn from(record: NoteBillingRecord) -> Self {
        Self {
            id: record.id,
            source: BillSource::Note,
            status: record.status,
            created_at: record.created_at,
            facility: record.facility,
            rvu: record.rvu,
            patient: record.patient,
            cpt_codes: record.cpt_codes.into_iter().map(|entry| entry.code).collect(),
            icd10_codes: record.icd10_codes.into_iter().map(|entry| entry.code).collect(),
            em_level: record.em_level,
            mdm_complexity: record.mdm_complexity,
            provider: record.provider,
            note_id: Some(record.note_id),
            note_type: record.note_type,
        }
    }
}

impl From<ManualBill> for UnifiedBill {
    fn from(bill: ManualBill) -> Self {
        Self {
            id: bill.id,
            source: BillSource::Manual,
            status: bill.status,
            created_at: bill.created_at,
            facility: bill.facility,
            rvu: bill.rvu,
            patient: bill.patient,
            cpt_codes: bill.cpt_codes,
            icd10_codes: Vec::new(),
            em_level: None,
            mdm_complexity: None,
            provider: bill.created_by,
            note_id: None,
            note_type: None,
        }
    }
}

// ============================================================================
// Queries and edits
// ============================================================================

/// Filters pushed down into each source query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingFilter {
    pub status: Option<BillStatus>,
    pub facility: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `created_at`
    pub created_to: Option<DateTime<Utc>>,
    pub source: Option<BillSource>,
    /// Case-insensitive match on patient name or MRN
    pub search: Option<String>,
}

impl BillingFilter {
    pub fn with_status(mut self, status: BillStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_facility(mut self, facility: impl Into<String>) -> Self {
        self.facility = Some(facility.into());
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.created_from = from;
        self.created_to = to;
        self
    }

    pub fn with_source(mut self, source: BillSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn includes_source(&self, source: BillSource) -> bool {
        self.source.map_or(true, |wanted| wanted == source)
    }

    pub fn matches_note(&self, record: &NoteBillingRecord) -> bool {
        self.includes_source(BillSource::Note)
            && self.admits(
                record.status,
                record.facility.as_deref(),
                record.created_at,
                &record.patient,
            )
    }

    pub fn matches_manual(&self, bill: &ManualBill) -> bool {
        self.includes_source(BillSource::Manual)
            && self.admits(bill.status, bill.facility.as_deref(), bill.created_at, &bill.patient)
    }

    fn admits(
        &self,
        status: BillStatus,
        facility: Option<&str>,
        created_at: DateTime<Utc>,
        patient: &PatientRef,
    ) -> bool {
        if self.status.is_some_and(|wanted| wanted != status) {
            return false;
        }

        if let Some(wanted) = &self.facility {
            if !facility.is_some_and(|f| f.eq_ignore_ascii_case(wanted)) {
                return false;
            }
        }

        if self.created_from.is_some_and(|from| created_at < from) {
            return false;
        }

        if self.created_to.is_some_and(|to| created_at > to) {
            return false;
        }

        match self.search.as_deref().map(str::trim) {
            Some(needle) if !needle.is_empty() => {
                let needle = needle.to_lowercase();
                patient.name.to_lowercase().contains(&needle)
                    || patient
                        .mrn
                        .as_deref()
                        .is_some_and(|mrn| mrn.to_lowercase().contains(&needle))
            }
            _ => true,
        }
    }
}

/// Field edits for a bill. ICD-10, E/M and MDM fields only exist on
/// note-sourced bills.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillUpdate {
    pub rvu: Option<Rvu>,
    pub cpt_codes: Option<Vec<CodeEntry>>,
    pub facility: Option<String>,
    pub icd10_codes: Option<Vec<CodeEntry>>,
    pub em_level: Option<String>,
    pub mdm_complexity: Option<ComplexityTier>,
}

impl BillUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when the edit sets a field manual bills do not have
    pub fn touches_note_only_fields(&self) -> bool {
        self.icd10_codes.is_some() || self.em_level.is_some() || self.mdm_complexity.is_some()
    }

    pub fn manual_fields(&self) -> ManualBillUpdate {
        ManualBillUpdate {
            rvu: self.rvu,
            cpt_codes: self
                .cpt_codes
                .as_ref()
                .map(|entries| entries.iter().map(|entry| entry.code.clone()).collect()),
            facility: self.facility.clone(),
        }
    }
}

/// The narrower edit set accepted by manual bills
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualBillUpdate {
    pub rvu: Option<Rvu>,
    pub cpt_codes: Option<Vec<String>>,
    pub facility: Option<String>,
}
