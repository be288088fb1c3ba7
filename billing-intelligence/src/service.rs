use std::sync::Arc;

use serde::Serialize;

use crate::alerts::{alerts_from_findings, AlertSummary, BillingAlertAnalyzer};
use crate::code_tables::CodeTables;
use crate::config::BillingConfig;
use crate::denial::{DenialRiskAssessment, DenialRiskPolicy, DenialRiskScorer};
use crate::error::BillingResult;
use crate::findings::Findings;
use crate::hcc::HccMapper;
use crate::mdm::MdmResolver;
use crate::models::{BillingAlert, BillingSnapshot, EmResult, HccSummary, MdmInput};

/// Everything known about a code set before it is confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingEvaluation {
    /// Rule order
    pub alerts: Vec<BillingAlert>,
    pub alert_summary: AlertSummary,
    pub denial_risk: DenialRiskAssessment,
    pub hcc: HccSummary,
}

/// Billing intelligence service
///
/// Bundles the pure engine components over one shared set of code tables.
#[derive(Debug, Clone)]
pub struct BillingIntelligence {
    tables: Arc<CodeTables>,
    resolver: MdmResolver,
    mapper: HccMapper,
    analyzer: BillingAlertAnalyzer,
    scorer: DenialRiskScorer,
}

impl BillingIntelligence {
    pub fn new(tables: Arc<CodeTables>) -> Self {
        Self::with_policy(tables, DenialRiskPolicy::default())
    }

    pub fn with_policy(tables: Arc<CodeTables>, policy: DenialRiskPolicy) -> Self {
        Self {
            resolver: MdmResolver::new(Arc::clone(&tables)),
            mapper: HccMapper::new(Arc::clone(&tables)),
            analyzer: BillingAlertAnalyzer::new(Arc::clone(&tables)),
            scorer: DenialRiskScorer::with_policy(Arc::clone(&tables), policy),
            tables,
        }
    }

    /// Build from configuration, loading replacement tables if configured
    pub fn from_config(config: &BillingConfig) -> BillingResult<Self> {
        let tables = config.load_code_tables()?;
        tables.validate()?;
        Ok(Self::new(tables))
    }

    pub fn tables(&self) -> &Arc<CodeTables> {
        &self.tables
    }

    pub fn resolve_mdm(&self, input: &MdmInput) -> EmResult {
        self.resolver.resolve(input)
    }

    pub fn map_hcc<S: AsRef<str>>(&self, icd10_codes: &[S]) -> HccSummary {
        self.mapper.map(icd10_codes)
    }

    pub fn analyze(&self, snapshot: &BillingSnapshot) -> Vec<BillingAlert> {
        self.analyzer.analyze(snapshot)
    }

    pub fn score_denial_risk(
        &self,
        snapshot: &BillingSnapshot,
        validation_warnings: &[String],
    ) -> DenialRiskAssessment {
        self.scorer.score(snapshot, validation_warnings)
    }

    /// Alerts, denial risk and HCC capture for one snapshot.
    ///
    /// Rules are evaluated once and shared by the alerts and the score.
    pub fn evaluate(
        &self,
        snapshot: &BillingSnapshot,
        validation_warnings: &[String],
    ) -> BillingEvaluation {
        let findings = Findings::collect(&self.tables, snapshot);
        let alerts = alerts_from_findings(&self.tables, &findings);
        let denial_risk = self
            .scorer
            .assess(self.scorer.factors(snapshot, &findings, validation_warnings));
        let icd10: Vec<&str> = snapshot
            .icd10_codes
            .iter()
            .map(|entry| entry.code.as_str())
            .collect();

        BillingEvaluation {
            alert_summary: AlertSummary::from_alerts(&alerts),
            alerts,
            denial_risk,
            hcc: self.mapper.map(icd10.as_slice()),
        }
    }
}

impl Default for BillingIntelligence {
    fn default() -> Self {
        Self::new(Arc::new(CodeTables::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denial::RiskLevel;
    use crate::models::{CodeEntry, ComplexityTier, Rvu};
    use rust_decimal_macros::dec;

    fn snapshot() -> BillingSnapshot {
        BillingSnapshot::new(Rvu::new(dec!(2.80)).unwrap())
            .with_em_level("99215")
            .with_mdm(ComplexityTier::Moderate)
            .with_cpt(vec![CodeEntry::new("99215", "Office visit, high MDM")])
            .with_icd10(vec![
                CodeEntry::new("E11.65", "Type 2 diabetes with hyperglycemia"),
                CodeEntry::new("N18.4", "CKD stage 4"),
            ])
    }

    #[test]
    fn test_evaluate_matches_individual_components() {
        let engine = BillingIntelligence::default();
        let snap = snapshot();
        let evaluation = engine.evaluate(&snap, &[]);

        assert_eq!(evaluation.alerts, engine.analyze(&snap));
        assert_eq!(evaluation.denial_risk, engine.score_denial_risk(&snap, &[]));
        assert_eq!(evaluation.hcc, engine.map_hcc(&["E11.65", "N18.4"]));
    }

    #[test]
    fn test_evaluate_summarizes() {
        let evaluation = BillingIntelligence::default().evaluate(&snapshot(), &[]);
        // upcode (25) + high audit (10)
        assert_eq!(evaluation.denial_risk.risk_score, 35);
        assert_eq!(evaluation.denial_risk.risk_level, RiskLevel::Medium);
        assert_eq!(evaluation.alert_summary.high, 1);
        assert_eq!(evaluation.alert_summary.medium, 1);
        assert!(!evaluation.alert_summary.has_blocking);
        assert_eq!(evaluation.hcc.total_raf, dec!(0.680));
    }

    #[test]
    fn test_from_default_config() {
        let engine = BillingIntelligence::from_config(&BillingConfig::default()).unwrap();
        assert_eq!(engine.resolve_mdm(&MdmInput::new(
            ComplexityTier::Moderate,
            ComplexityTier::Moderate,
            ComplexityTier::Low,
        )).code, "99214");
    }
}
