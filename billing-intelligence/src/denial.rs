use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::code_tables::CodeTables;
use crate::findings::Findings;
use crate::models::BillingSnapshot;

/// Factor weights and level thresholds for denial scoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenialRiskPolicy {
    pub missing_diagnosis: u32,
    pub upcode: u32,
    /// Applied once per conflicting pair
    pub bundling_conflict: u32,
    pub high_audit: u32,
    pub thin_support: u32,
    pub low_confidence: u32,
    pub modifier_review: u32,
    /// Applied once per validation warning
    pub validation_warning: u32,
    /// Codes with a confidence below this count as low confidence
    pub confidence_floor: u8,
    pub medium_threshold: u8,
    pub high_threshold: u8,
    pub critical_threshold: u8,
}

impl Default for DenialRiskPolicy {
    fn default() -> Self {
        Self {
            missing_diagnosis: 35,
            upcode: 25,
            bundling_conflict: 20,
            high_audit: 10,
            thin_support: 10,
            low_confidence: 10,
            modifier_review: 5,
            validation_warning: 5,
            confidence_floor: 70,
            medium_threshold: 25,
            high_threshold: 50,
            critical_threshold: 75,
        }
    }
}

impl DenialRiskPolicy {
    pub fn level_for(&self, score: u8) -> RiskLevel {
        if score >= self.critical_threshold {
            RiskLevel::Critical
        } else if score >= self.high_threshold {
            RiskLevel::High
        } else if score >= self.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialFactorKind {
    MissingDiagnosis,
    Upcode,
    BundlingConflict,
    HighAudit,
    ThinSupport,
    LowConfidence,
    ModifierReview,
    ValidationWarning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialFactor {
    pub kind: DenialFactorKind,
    pub description: String,
    pub weight: u32,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenialRiskAssessment {
    /// 0-100
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    pub factors: Vec<DenialFactor>,
    /// Factor recommendations, first occurrence kept
    pub recommendations: Vec<String>,
}

/// Weighted claim-denial likelihood for a code set
#[derive(Debug, Clone)]
pub struct DenialRiskScorer {
    tables: Arc<CodeTables>,
    policy: DenialRiskPolicy,
}

impl DenialRiskScorer {
    pub fn new(tables: Arc<CodeTables>) -> Self {
        Self::with_policy(tables, DenialRiskPolicy::default())
    }

    pub fn with_policy(tables: Arc<CodeTables>, policy: DenialRiskPolicy) -> Self {
        Self { tables, policy }
    }

    pub fn policy(&self) -> &DenialRiskPolicy {
        &self.policy
    }

    pub fn score(
        &self,
        snapshot: &BillingSnapshot,
        validation_warnings: &[String],
    ) -> DenialRiskAssessment {
        let findings = Findings::collect(&self.tables, snapshot);
        let factors = self.factors(snapshot, &findings, validation_warnings);
        self.assess(factors)
    }

    pub(crate) fn factors(
        &self,
        snapshot: &BillingSnapshot,
        findings: &Findings<'_>,
        validation_warnings: &[String],
    ) -> Vec<DenialFactor> {
        let policy = &self.policy;
        let mut factors = Vec::new();

        if findings.missing_diagnosis {
            factors.push(DenialFactor {
                kind: DenialFactorKind::MissingDiagnosis,
                description: "No ICD-10 diagnosis on the claim".to_string(),
                weight: policy.missing_diagnosis,
                recommendation: "Add a diagnosis that establishes medical necessity".to_string(),
            });
        }

        if let Some(upcode) = &findings.upcode {
            factors.push(DenialFactor {
                kind: DenialFactorKind::Upcode,
                description: format!(
                    "{} requires {} MDM, documented {}",
                    upcode.em_level, upcode.required, upcode.documented
                ),
                weight: policy.upcode,
                recommendation: "Align the E/M level with documented MDM".to_string(),
            });
        }

        for rule in &findings.bundling_conflicts {
            factors.push(DenialFactor {
                kind: DenialFactorKind::BundlingConflict,
                description: format!("{} bundles with {}", rule.secondary, rule.primary),
                weight: policy.bundling_conflict,
                recommendation: "Remove bundled codes or add a distinct-service modifier"
                    .to_string(),
            });
        }

        if !findings.high_audit_codes.is_empty() {
            factors.push(DenialFactor {
                kind: DenialFactorKind::HighAudit,
                description: format!("High audit codes: {}", findings.high_audit_codes.join(", ")),
                weight: policy.high_audit,
                recommendation: "Verify documentation supports high-level codes".to_string(),
            });
        }

        if findings.thin_support {
            factors.push(DenialFactor {
                kind: DenialFactorKind::ThinSupport,
                description: "High RVU with fewer than two diagnoses".to_string(),
                weight: policy.thin_support,
                recommendation: "Capture every condition addressed during the visit".to_string(),
            });
        }

        let low_confidence = snapshot
            .all_entries()
            .filter(|entry| entry.confidence.is_some_and(|c| c < policy.confidence_floor))
            .map(|entry| entry.code.as_str())
            .unique()
            .collect::<Vec<_>>();
        if !low_confidence.is_empty() {
            factors.push(DenialFactor {
                kind: DenialFactorKind::LowConfidence,
                description: format!("Low confidence codes: {}", low_confidence.join(", ")),
                weight: policy.low_confidence,
                recommendation: "Review low-confidence code suggestions against the note"
                    .to_string(),
            });
        }

        if !findings.modifier_codes.is_empty() {
            factors.push(DenialFactor {
                kind: DenialFactorKind::ModifierReview,
                description: format!(
                    "Modifier may be required: {}",
                    findings.modifier_codes.join(", ")
                ),
                weight: policy.modifier_review,
                recommendation: "Review modifier usage for each procedure line".to_string(),
            });
        }

        for warning in validation_warnings {
            factors.push(DenialFactor {
                kind: DenialFactorKind::ValidationWarning,
                description: warning.clone(),
                weight: policy.validation_warning,
                recommendation: "Resolve validation warnings before submission".to_string(),
            });
        }

        factors
    }

    pub(crate) fn assess(&self, factors: Vec<DenialFactor>) -> DenialRiskAssessment {
        let total: u32 = factors.iter().fold(0u32, |acc, f| acc.saturating_add(f.weight));
        let risk_score = u8::try_from(total.min(100)).unwrap_or(100);
        let recommendations = factors
            .iter()
            .map(|factor| factor.recommendation.clone())
            .unique()
            .collect();

        DenialRiskAssessment {
            risk_score,
            risk_level: self.policy.level_for(risk_score),
            factors,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeEntry, ComplexityTier, Rvu};
    use rust_decimal_macros::dec;

    fn scorer() -> DenialRiskScorer {
        DenialRiskScorer::new(Arc::new(CodeTables::default()))
    }

    fn entries(codes: &[&str]) -> Vec<CodeEntry> {
        codes.iter().map(|code| CodeEntry::new(*code, "")).collect()
    }

    fn clean() -> BillingSnapshot {
        BillingSnapshot::new(Rvu::new(dec!(1.30)).unwrap())
            .with_em_level("99213")
            .with_mdm(ComplexityTier::Low)
            .with_cpt(entries(&["99213"]))
            .with_icd10(entries(&["E11.9", "I10"]))
    }

    #[test]
    fn test_no_factors_scores_zero() {
        let assessment = scorer().score(&clean(), &[]);
        assert_eq!(assessment.risk_score, 0);
        assert_eq!(assessment.risk_level, RiskLevel::Low);
        assert!(assessment.factors.is_empty());
        assert!(assessment.recommendations.is_empty());
    }

    #[test]
    fn test_missing_diagnosis_is_medium() {
        let snap = clean().with_icd10(Vec::new());
        let assessment = scorer().score(&snap, &[]);
        assert_eq!(assessment.risk_score, 35);
        assert_eq!(assessment.risk_level, RiskLevel::Medium);
        assert_eq!(assessment.factors[0].kind, DenialFactorKind::MissingDiagnosis);
    }

    #[test]
    fn test_warnings_add_per_item() {
        let warnings = vec![
            "Place of service missing".to_string(),
            "Referring NPI missing".to_string(),
        ];
        let assessment = scorer().score(&clean(), &warnings);
        assert_eq!(assessment.risk_score, 10);
        assert_eq!(assessment.factors.len(), 2);
        assert_eq!(assessment.recommendations.len(), 1);
    }

    #[test]
    fn test_score_is_clamped() {
        let snap = BillingSnapshot::new(Rvu::new(dec!(3.50)).unwrap())
            .with_em_level("99215")
            .with_mdm(ComplexityTier::Minimal)
            .with_cpt(entries(&["99213", "99214", "99215", "93000", "93010"]));
        let assessment = scorer().score(&snap, &[]);
        assert_eq!(assessment.risk_score, 100);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
    }

    #[test]
    fn test_low_confidence_counts_once() {
        let snap = clean().with_cpt(vec![
            CodeEntry::new("99213", "Office visit").with_confidence(55),
            CodeEntry::new("99213", "Office visit").with_confidence(40),
        ]);
        let assessment = scorer().score(&snap, &[]);
        assert_eq!(assessment.risk_score, 10);
        assert_eq!(assessment.factors[0].description, "Low confidence codes: 99213");
    }

    #[test]
    fn test_level_thresholds() {
        let policy = DenialRiskPolicy::default();
        assert_eq!(policy.level_for(24), RiskLevel::Low);
        assert_eq!(policy.level_for(25), RiskLevel::Medium);
        assert_eq!(policy.level_for(49), RiskLevel::Medium);
        assert_eq!(policy.level_for(50), RiskLevel::High);
        assert_eq!(policy.level_for(75), RiskLevel::Critical);
    }

    #[test]
    fn test_custom_policy_from_json() {
        let policy: DenialRiskPolicy =
            serde_json::from_str(r#"{"missing_diagnosis": 80}"#).unwrap();
        assert_eq!(policy.upcode, 25);
        let scorer = DenialRiskScorer::with_policy(Arc::new(CodeTables::default()), policy);
        let assessment = scorer.score(&clean().with_icd10(Vec::new()), &[]);
        assert_eq!(assessment.risk_level, RiskLevel::Critical);
    }
}
