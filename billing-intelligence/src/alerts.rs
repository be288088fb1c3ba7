use std::cmp::Reverse;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::code_tables::CodeTables;
use crate::findings::Findings;
use crate::models::{AlertSeverity, AlertType, BillingAlert, BillingSnapshot};

/// Compliance review of a code set before it is confirmed
#[derive(Debug, Clone)]
pub struct BillingAlertAnalyzer {
    tables: Arc<CodeTables>,
}

impl BillingAlertAnalyzer {
    pub fn new(tables: Arc<CodeTables>) -> Self {
        Self { tables }
    }

    /// Evaluate every rule against `snapshot`.
    ///
    /// Alerts come back in rule order; use [`sort_by_severity`] for display.
    pub fn analyze(&self, snapshot: &BillingSnapshot) -> Vec<BillingAlert> {
        let findings = Findings::collect(&self.tables, snapshot);
        alerts_from_findings(&self.tables, &findings)
    }
}

pub(crate) fn alerts_from_findings(
    tables: &CodeTables,
    findings: &Findings<'_>,
) -> Vec<BillingAlert> {
    let mut alerts = Vec::new();

    if let Some(upcode) = &findings.upcode {
        let description = tables
            .em_code(upcode.em_level)
            .map(|definition| definition.description.as_str())
            .unwrap_or_default();
        alerts.push(BillingAlert {
            id: format!("upcode-risk-{}", upcode.em_level),
            alert_type: AlertType::Upcode,
            severity: AlertSeverity::High,
            title: "E/M level exceeds documented MDM".to_string(),
            message: format!(
                "{} ({description}) requires {} MDM but the note documents {} MDM",
                upcode.em_level, upcode.required, upcode.documented
            ),
            recommendation: Some(format!(
                "Bill {} or document additional problems, data or risk",
                tables.mdm_levels.for_tier(upcode.documented).code
            )),
            affected_codes: vec![upcode.em_level.to_string()],
        });
    }

    if !findings.high_audit_codes.is_empty() {
        alerts.push(BillingAlert {
            id: format!("high-audit-{}", findings.high_audit_codes.join("-")),
            alert_type: AlertType::AuditRisk,
            severity: AlertSeverity::Medium,
            title: "High audit frequency codes".to_string(),
            message: format!(
                "{} {} frequently selected for payer audit",
                findings.high_audit_codes.join(", "),
                if findings.high_audit_codes.len() == 1 { "is" } else { "are" }
            ),
            recommendation: Some(
                "Confirm the note fully supports the billed level before submission".to_string(),
            ),
            affected_codes: findings.high_audit_codes.iter().map(|c| c.to_string()).collect(),
        });
    }

    for rule in &findings.bundling_conflicts {
        alerts.push(BillingAlert {
            id: format!("bundling-{}-{}", rule.primary, rule.secondary),
            alert_type: AlertType::AuditRisk,
            severity: AlertSeverity::High,
            title: "Bundling conflict".to_string(),
            message: format!("{} and {}: {}", rule.primary, rule.secondary, rule.reason),
            recommendation: Some(format!(
                "Remove {} or append a modifier that documents a distinct service",
                rule.secondary
            )),
            affected_codes: vec![rule.primary.clone(), rule.secondary.clone()],
        });
    }

    if !findings.modifier_codes.is_empty() {
        alerts.push(BillingAlert {
            id: format!("modifier-review-{}", findings.modifier_codes.join("-")),
            alert_type: AlertType::Info,
            severity: AlertSeverity::Low,
            title: "Modifier may be required".to_string(),
            message: format!(
                "{} billed alongside other procedures usually needs a modifier (25, 59, RT/LT)",
                findings.modifier_codes.join(", ")
            ),
            recommendation: Some("Review modifier usage for each procedure line".to_string()),
            affected_codes: findings.modifier_codes.iter().map(|c| c.to_string()).collect(),
        });
    }

    if let Some(conservative) = &findings.conservative {
        let (id, billed) = match conservative.em_level {
            Some(code) => (format!("conservative-coding-{code}"), format!("{code} billed")),
            None => ("conservative-coding".to_string(), "no E/M level chosen".to_string()),
        };
        alerts.push(BillingAlert {
            id,
            alert_type: AlertType::Optimal,
            severity: AlertSeverity::Low,
            title: "Review coding level".to_string(),
            message: format!(
                "{} MDM with {billed}; RVU total is high for the documented complexity",
                conservative.documented
            ),
            recommendation: Some(format!(
                "Documented MDM supports {}; confirm the level matches the note",
                conservative.supported_code
            )),
            affected_codes: conservative.em_level.iter().map(|c| c.to_string()).collect(),
        });
    }

    if findings.missing_diagnosis {
        alerts.push(BillingAlert {
            id: "missing-diagnosis".to_string(),
            alert_type: AlertType::AuditRisk,
            severity: AlertSeverity::Critical,
            title: "No diagnosis codes".to_string(),
            message: "Claims without an ICD-10 diagnosis are rejected".to_string(),
            recommendation: Some(
                "Add at least one ICD-10 code that supports medical necessity".to_string(),
            ),
            affected_codes: Vec::new(),
        });
    }

    if findings.thin_support {
        alerts.push(BillingAlert {
            id: "thin-diagnosis-support".to_string(),
            alert_type: AlertType::Info,
            severity: AlertSeverity::Low,
            title: "Limited diagnosis support".to_string(),
            message: "High RVU encounter is supported by fewer than two diagnoses".to_string(),
            recommendation: Some("Capture every condition addressed during the visit".to_string()),
            affected_codes: Vec::new(),
        });
    }

    alerts
}

/// Stable sort for display, most urgent first
pub fn sort_by_severity(alerts: &mut [BillingAlert]) {
    alerts.sort_by_key(|alert| Reverse(alert.severity.rank()));
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    /// A critical alert blocks submission
    pub has_blocking: bool,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[BillingAlert]) -> Self {
        let mut summary = Self::default();
        for alert in alerts {
            match alert.severity {
                AlertSeverity::Critical => summary.critical += 1,
                AlertSeverity::High => summary.high += 1,
                AlertSeverity::Medium => summary.medium += 1,
                AlertSeverity::Low => summary.low += 1,
            }
        }
        summary.has_blocking = summary.critical > 0;
        summary
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CodeEntry, ComplexityTier, Rvu};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn analyzer() -> BillingAlertAnalyzer {
        BillingAlertAnalyzer::new(Arc::new(CodeTables::default()))
    }

    fn entries(codes: &[&str]) -> Vec<CodeEntry> {
        codes.iter().map(|code| CodeEntry::new(*code, "")).collect()
    }

    fn snapshot(rvu: Decimal) -> BillingSnapshot {
        BillingSnapshot::new(Rvu::new(rvu).unwrap())
    }

    fn ids(alerts: &[BillingAlert]) -> Vec<&str> {
        alerts.iter().map(|alert| alert.id.as_str()).collect()
    }

    #[test]
    fn test_well_supported_visit_has_no_alerts() {
        let snap = snapshot(dec!(1.92))
            .with_em_level("99214")
            .with_mdm(ComplexityTier::Moderate)
            .with_cpt(entries(&["99214"]))
            .with_icd10(entries(&["E11.9", "I10"]));
        assert!(analyzer().analyze(&snap).is_empty());
    }

    #[test]
    fn test_upcode_alert() {
        let snap = snapshot(dec!(2.80))
            .with_em_level("99215")
            .with_mdm(ComplexityTier::Low)
            .with_cpt(entries(&["99215"]))
            .with_icd10(entries(&["E11.9", "I10"]));
        let alerts = analyzer().analyze(&snap);

        let upcodes: Vec<_> = alerts
            .iter()
            .filter(|alert| alert.alert_type == AlertType::Upcode)
            .collect();
        assert_eq!(upcodes.len(), 1);
        assert_eq!(upcodes[0].id, "upcode-risk-99215");
        assert_eq!(upcodes[0].severity, AlertSeverity::High);
        assert_eq!(upcodes[0].affected_codes, vec!["99215"]);
    }

    #[test]
    fn test_rule_order_is_preserved() {
        let snap = snapshot(dec!(3.10))
            .with_em_level("99215")
            .with_mdm(ComplexityTier::Low)
            .with_cpt(entries(&["99215", "93000", "93010", "20610"]));
        assert_eq!(
            ids(&analyzer().analyze(&snap)),
            vec![
                "upcode-risk-99215",
                "high-audit-99215",
                "bundling-93000-93010",
                "modifier-review-20610",
                "conservative-coding-99215",
                "missing-diagnosis",
                "thin-diagnosis-support",
            ]
        );
    }

    #[test]
    fn test_repeated_injection_needs_modifier_review() {
        let snap = snapshot(dec!(1.0))
            .with_cpt(entries(&["96372", "96372"]))
            .with_icd10(entries(&["I10", "E78.5"]));
        let alerts = analyzer().analyze(&snap);
        assert_eq!(ids(&alerts), vec!["modifier-review-96372"]);
        assert_eq!(alerts[0].affected_codes, vec!["96372"]);
    }

    #[test]
    fn test_conservative_alert_without_em_level() {
        let snap = snapshot(dec!(2.2))
            .with_mdm(ComplexityTier::Low)
            .with_icd10(entries(&["I10", "E78.5"]));
        let alerts = analyzer().analyze(&snap);
        assert_eq!(ids(&alerts), vec!["conservative-coding"]);
        assert_eq!(alerts[0].alert_type, AlertType::Optimal);
        assert!(alerts[0].affected_codes.is_empty());
        assert_eq!(
            alerts[0].recommendation.as_deref(),
            Some("Documented MDM supports 99213; confirm the level matches the note")
        );
    }

    #[test]
    fn test_each_bundling_pair_alerts_separately() {
        let snap = snapshot(dec!(1.0))
            .with_cpt(entries(&["99213", "99214", "99215"]))
            .with_icd10(entries(&["I10", "E78.5"]));
        let alerts = analyzer().analyze(&snap);
        let bundling: Vec<&str> = ids(&alerts)
            .into_iter()
            .filter(|id| id.starts_with("bundling-"))
            .collect();
        assert_eq!(
            bundling,
            vec!["bundling-99213-99214", "bundling-99214-99215", "bundling-99213-99215"]
        );
    }

    #[test]
    fn test_missing_diagnosis_appears_once() {
        let snap = snapshot(dec!(0.70)).with_cpt(entries(&["99212"]));
        let alerts = analyzer().analyze(&snap);
        let missing: Vec<_> = alerts.iter().filter(|a| a.id == "missing-diagnosis").collect();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].severity, AlertSeverity::Critical);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let snap = snapshot(dec!(2.80))
            .with_em_level("99215")
            .with_mdm(ComplexityTier::Minimal)
            .with_cpt(entries(&["99215", "96372", "20610"]));
        let a = analyzer();
        assert_eq!(a.analyze(&snap), a.analyze(&snap));
    }

    #[test]
    fn test_sort_by_severity_is_stable() {
        let snap = snapshot(dec!(3.10))
            .with_em_level("99215")
            .with_mdm(ComplexityTier::Low)
            .with_cpt(entries(&["99215", "93000", "93010", "20610"]));
        let mut alerts = analyzer().analyze(&snap);
        sort_by_severity(&mut alerts);
        assert_eq!(
            ids(&alerts),
            vec![
                "missing-diagnosis",
                "upcode-risk-99215",
                "bundling-93000-93010",
                "high-audit-99215",
                "modifier-review-20610",
                "conservative-coding-99215",
                "thin-diagnosis-support",
            ]
        );
    }

    #[test]
    fn test_summary_counts() {
        let snap = snapshot(dec!(3.10))
            .with_em_level("99215")
            .with_mdm(ComplexityTier::Low)
            .with_cpt(entries(&["99215", "93000", "93010", "20610"]));
        let summary = AlertSummary::from_alerts(&analyzer().analyze(&snap));
        assert_eq!(summary.critical, 1);
        assert_eq!(summary.high, 2);
        assert_eq!(summary.medium, 1);
        assert_eq!(summary.low, 3);
        assert_eq!(summary.total(), 7);
        assert!(summary.has_blocking);

        assert_eq!(AlertSummary::from_alerts(&[]), AlertSummary::default());
    }
}
