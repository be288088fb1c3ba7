//! Rule detection shared by the alert analyzer and the denial scorer.
//!
//! Both consumers look at the same code set through the same rules; they
//! differ only in what they emit. Keeping detection here means an alert and
//! its denial factor can never disagree about whether a rule fired.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::code_tables::{BundlingRule, CodeTables};
use crate::models::{BillingSnapshot, ComplexityTier};

/// RVU above which low-MDM coding is flagged for review
pub const CONSERVATIVE_RVU_THRESHOLD: Decimal = dec!(2.0);

/// RVU above which fewer than two diagnoses counts as thin support
pub const THIN_SUPPORT_RVU_THRESHOLD: Decimal = dec!(2.5);

/// Diagnoses needed to support a claim above the thin-support threshold
pub const MIN_SUPPORTING_DIAGNOSES: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpcodeFinding<'a> {
    pub em_level: &'a str,
    pub required: ComplexityTier,
    pub documented: ComplexityTier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConservativeFinding<'a> {
    /// Billed level, if one was chosen
    pub em_level: Option<&'a str>,
    pub documented: ComplexityTier,
    /// Level the documented MDM supports
    pub supported_code: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Findings<'a> {
    pub upcode: Option<UpcodeFinding<'a>>,
    pub high_audit_codes: Vec<&'a str>,
    pub bundling_conflicts: Vec<&'a BundlingRule>,
    pub modifier_codes: Vec<&'a str>,
    pub conservative: Option<ConservativeFinding<'a>>,
    pub missing_diagnosis: bool,
    pub thin_support: bool,
}

impl<'a> Findings<'a> {
    pub fn collect(tables: &'a CodeTables, snapshot: &'a BillingSnapshot) -> Self {
        let cpt = snapshot.distinct_cpt_codes();

        let upcode = match (snapshot.em_level.as_deref(), snapshot.mdm_complexity) {
            (Some(em_level), Some(documented)) => tables
                .em_code(em_level)
                .filter(|definition| definition.min_mdm > documented)
                .map(|definition| UpcodeFinding {
                    em_level,
                    required: definition.min_mdm,
                    documented,
                }),
            _ => None,
        };

        let high_audit_codes = cpt
            .iter()
            .copied()
            .filter(|code| tables.is_high_audit(code))
            .collect();

        let bundling_conflicts = tables
            .bundling_conflicts
            .iter()
            .filter(|rule| snapshot.has_cpt(&rule.primary) && snapshot.has_cpt(&rule.secondary))
            .collect();

        // units count: a code billed twice is two procedures
        let modifier_codes = if snapshot.cpt_codes.len() >= 2 {
            cpt.iter()
                .copied()
                .filter(|code| tables.requires_modifier(code))
                .collect()
        } else {
            Vec::new()
        };

        let rvu = snapshot.rvu.value();

        let em_level = snapshot.em_level.as_deref();
        let conservative = match snapshot.mdm_complexity {
            Some(documented)
                if rvu > CONSERVATIVE_RVU_THRESHOLD
                    && documented <= ComplexityTier::Low
                    && !em_level.is_some_and(|code| tables.is_lowest_em(code)) =>
            {
                Some(ConservativeFinding {
                    em_level,
                    documented,
                    supported_code: tables.mdm_levels.for_tier(documented).code.as_str(),
                })
            }
            _ => None,
        };

        let diagnoses = snapshot.icd10_codes.len();

        Self {
            upcode,
            high_audit_codes,
            bundling_conflicts,
            modifier_codes,
            conservative,
            missing_diagnosis: diagnoses == 0,
            thin_support: rvu > THIN_SUPPORT_RVU_THRESHOLD && diagnoses < MIN_SUPPORTING_DIAGNOSES,
        }
    }

    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}
