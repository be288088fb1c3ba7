//! Reference tables consumed by every engine component.
//!
//! A [`CodeTables`] value is built once, validated, wrapped in an `Arc` and
//! handed to each component. The built-in defaults follow the 2024 CMS office
//! visit guidelines and the V28 HCC model; payers and years differ, so
//! deployments can load a replacement from JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BillingError, BillingResult};
use crate::models::{ComplexityTier, HccCategory, Rvu};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatientClass {
    New,
    Established,
}

/// One office/outpatient E/M code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmCodeDefinition {
    pub code: String,
    pub description: String,
    pub patient_class: PatientClass,
    pub tier: ComplexityTier,
    /// Lowest MDM tier that supports billing this code
    pub min_mdm: ComplexityTier,
    pub rvu: Rvu,
}

/// What the MDM resolver emits for a given tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdmLevel {
    pub code: String,
    pub label: String,
    pub rvu: Rvu,
}

/// Tier → E/M level. One field per tier keeps the resolver total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdmLevelTable {
    pub minimal: MdmLevel,
    pub low: MdmLevel,
    pub moderate: MdmLevel,
    pub high: MdmLevel,
}

impl MdmLevelTable {
    pub fn for_tier(&self, tier: ComplexityTier) -> &MdmLevel {
        match tier {
            ComplexityTier::Minimal => &self.minimal,
            ComplexityTier::Low => &self.low,
            ComplexityTier::Moderate => &self.moderate,
            ComplexityTier::High => &self.high,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ComplexityTier, &MdmLevel)> {
        ComplexityTier::ALL
            .into_iter()
            .map(move |tier| (tier, self.for_tier(tier)))
    }
}

/// Two codes payers refuse to pay together on one encounter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundlingRule {
    pub primary: String,
    pub secondary: String,
    pub reason: String,
}

impl BundlingRule {
    pub fn new(primary: &str, secondary: &str, reason: &str) -> Self {
        Self {
            primary: primary.to_string(),
            secondary: secondary.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeTables {
    pub version: String,
    pub em_codes: BTreeMap<String, EmCodeDefinition>,
    pub mdm_levels: MdmLevelTable,
    /// Codes considered the floor of the E/M ladder
    #[serde(default)]
    pub lowest_em_codes: BTreeSet<String>,
    pub hcc_categories: BTreeMap<String, HccCategory>,
    /// ICD-10 code → HCC id, exact match only
    pub icd10_to_hcc: BTreeMap<String, String>,
    #[serde(default)]
    pub high_audit_cpt: BTreeSet<String>,
    #[serde(default)]
    pub bundling_conflicts: Vec<BundlingRule>,
    #[serde(default)]
    pub modifier_required: BTreeSet<String>,
}

impl CodeTables {
    /// Load and validate tables from a JSON document on disk
    pub fn from_json_file(path: impl AsRef<Path>) -> BillingResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let tables = Self::from_json_str(&raw)?;
        info!(
            path = %path.display(),
            version = %tables.version,
            em_codes = tables.em_codes.len(),
            hcc_mappings = tables.icd10_to_hcc.len(),
            "Loaded billing code tables"
        );
        Ok(tables)
    }

    pub fn from_json_str(raw: &str) -> BillingResult<Self> {
        let tables: CodeTables = serde_json::from_str(raw)?;
        tables.validate()?;
        Ok(tables)
    }

    /// Cross-check the tables for references that would make a lookup miss
    pub fn validate(&self) -> BillingResult<()> {
        for (key, definition) in &self.em_codes {
            if key != &definition.code {
                return Err(BillingError::Validation(format!(
                    "E/M table key {key} does not match its code {}",
                    definition.code
                )));
            }
        }

        for (tier, level) in self.mdm_levels.iter() {
            match self.em_codes.get(&level.code) {
                Some(definition) if definition.rvu == level.rvu => {}
                Some(definition) => {
                    return Err(BillingError::Validation(format!(
                        "MDM level {tier} uses {} at {} RVU but the E/M table says {}",
                        level.code, level.rvu, definition.rvu
                    )));
                }
                None => {
                    return Err(BillingError::Validation(format!(
                        "MDM level {tier} maps to unknown E/M code {}",
                        level.code
                    )));
                }
            }
        }

        for (icd10, hcc) in &self.icd10_to_hcc {
            if !self.hcc_categories.contains_key(hcc) {
                return Err(BillingError::Validation(format!(
                    "{icd10} maps to HCC {hcc}, which has no category entry"
                )));
            }
        }

        for (hcc, category) in &self.hcc_categories {
            if category.raf < Decimal::ZERO {
                return Err(BillingError::Validation(format!(
                    "HCC {hcc} has a negative RAF weight"
                )));
            }
        }

        Ok(())
    }

    pub fn em_code(&self, code: &str) -> Option<&EmCodeDefinition> {
        self.em_codes.get(code)
    }

    pub fn hcc_for_icd10(&self, icd10: &str) -> Option<&HccCategory> {
        self.icd10_to_hcc
            .get(icd10)
            .and_then(|hcc| self.hcc_categories.get(hcc))
    }

    pub fn is_high_audit(&self, cpt: &str) -> bool {
        self.high_audit_cpt.contains(cpt)
    }

    pub fn requires_modifier(&self, cpt: &str) -> bool {
        self.modifier_required.contains(cpt)
    }

    pub fn is_lowest_em(&self, code: &str) -> bool {
        self.lowest_em_codes.contains(code)
    }
}

fn rvu(value: Decimal) -> Rvu {
    Rvu::new(value).unwrap_or(Rvu::ZERO)
}

fn em(
    code: &str,
    description: &str,
    patient_class: PatientClass,
    tier: ComplexityTier,
    min_mdm: ComplexityTier,
    value: Decimal,
) -> (String, EmCodeDefinition) {
    (
        code.to_string(),
        EmCodeDefinition {
            code: code.to_string(),
            description: description.to_string(),
            patient_class,
            tier,
            min_mdm,
            rvu: rvu(value),
        },
    )
}

fn level(code: &str, label: &str, value: Decimal) -> MdmLevel {
    MdmLevel {
        code: code.to_string(),
        label: label.to_string(),
        rvu: rvu(value),
    }
}

fn hcc(id: &str, category: &str, description: &str, raf: Decimal) -> (String, HccCategory) {
    (
        id.to_string(),
        HccCategory {
            hcc: id.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            raf,
        },
    )
}

fn codes(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|code| (*code).to_string()).collect()
}

impl Default for CodeTables {
    fn default() -> Self {
        use ComplexityTier::{High, Low, Minimal, Moderate};
        use PatientClass::{Established, New};

        let em_codes = BTreeMap::from([
            em("99202", "New patient, straightforward MDM", New, Minimal, Minimal, dec!(0.93)),
            em("99203", "New patient, low MDM", New, Low, Low, dec!(1.60)),
            em("99204", "New patient, moderate MDM", New, Moderate, Moderate, dec!(2.60)),
            em("99205", "New patient, high MDM", New, High, High, dec!(3.50)),
            em(
                "99211",
                "Established patient, minimal (may not require physician)",
                Established,
                Minimal,
                Minimal,
                dec!(0.18),
            ),
            em(
                "99212",
                "Established patient, straightforward MDM",
                Established,
                Minimal,
                Minimal,
                dec!(0.70),
            ),
            em("99213", "Established patient, low MDM", Established, Low, Low, dec!(1.30)),
            em(
                "99214",
                "Established patient, moderate MDM",
                Established,
                Moderate,
                Moderate,
                dec!(1.92),
            ),
            em("99215", "Established patient, high MDM", Established, High, High, dec!(2.80)),
        ]);

        let mdm_levels = MdmLevelTable {
            minimal: level("99212", "Straightforward", dec!(0.70)),
            low: level("99213", "Low", dec!(1.30)),
            moderate: level("99214", "Moderate", dec!(1.92)),
            high: level("99215", "High", dec!(2.80)),
        };

        let hcc_categories = BTreeMap::from([
            hcc("23", "Neoplasm", "Prostate, Breast, and Other Cancers and Tumors", dec!(0.186)),
            hcc("37", "Diabetes", "Diabetes with Chronic Complications", dec!(0.166)),
            hcc(
                "38",
                "Diabetes",
                "Diabetes with Glycemic, Unspecified, or No Complications",
                dec!(0.166),
            ),
            hcc("48", "Metabolic", "Morbid Obesity", dec!(0.186)),
            hcc("127", "Neurological", "Dementia, Mild or Unspecified", dec!(0.341)),
            hcc("151", "Psychiatric", "Schizophrenia", dec!(0.524)),
            hcc(
                "155",
                "Psychiatric",
                "Major Depression, Moderate or Severe, without Psychosis",
                dec!(0.299),
            ),
            hcc("226", "Heart", "Heart Failure, Except End-Stage and Acute", dec!(0.360)),
            hcc("238", "Heart", "Specified Heart Arrhythmias", dec!(0.299)),
            hcc(
                "280",
                "Lung",
                "Chronic Obstructive Pulmonary Disease, Interstitial Lung Disorders, and Other Chronic Lung Disorders",
                dec!(0.319),
            ),
            hcc("326", "Kidney", "Chronic Kidney Disease, Stage 5", dec!(0.815)),
            hcc("327", "Kidney", "Chronic Kidney Disease, Severe (Stage 4)", dec!(0.514)),
        ]);

        let icd10_to_hcc = [
            ("C50.911", "23"),
            ("C61", "23"),
            ("E11.22", "37"),
            ("E11.65", "37"),
            ("E11.9", "38"),
            ("E66.01", "48"),
            ("G30.9", "127"),
            ("F03.90", "127"),
            ("F20.9", "151"),
            ("F32.1", "155"),
            ("F33.1", "155"),
            ("I50.22", "226"),
            ("I50.9", "226"),
            ("I48.91", "238"),
            ("J44.1", "280"),
            ("J44.9", "280"),
            ("N18.5", "326"),
            ("N18.4", "327"),
        ]
        .into_iter()
        .map(|(icd10, hcc)| (icd10.to_string(), hcc.to_string()))
        .collect();

        let bundling_conflicts = vec![
            BundlingRule::new(
                "93000",
                "93010",
                "Complete ECG already includes the interpretation and report",
            ),
            BundlingRule::new(
                "20610",
                "20611",
                "Arthrocentesis with and without ultrasound guidance are mutually exclusive",
            ),
            BundlingRule::new(
                "99213",
                "99214",
                "Only one office E/M level may be billed per encounter",
            ),
            BundlingRule::new(
                "99214",
                "99215",
                "Only one office E/M level may be billed per encounter",
            ),
            BundlingRule::new(
                "99213",
                "99215",
                "Only one office E/M level may be billed per encounter",
            ),
            BundlingRule::new(
                "97597",
                "11042",
                "Selective debridement is bundled into surgical debridement of the same wound",
            ),
        ];

        Self {
            version: "2024-cms-v28".to_string(),
            em_codes,
            mdm_levels,
            lowest_em_codes: codes(&["99202", "99211", "99212"]),
            hcc_categories,
            icd10_to_hcc,
            high_audit_cpt: codes(&["99205", "99215", "99223", "99233", "99285"]),
            bundling_conflicts,
            modifier_required: codes(&["11721", "17000", "20610", "69210", "96372"]),
        }
    }
}
