use std::sync::Arc;

use rust_decimal::Decimal;

use crate::code_tables::CodeTables;
use crate::models::{HccMatch, HccSummary};

/// Maps diagnosis codes onto HCC categories and totals their RAF.
///
/// Matching is exact. Codes are not deduplicated: a code listed twice
/// contributes its weight twice, mirroring what the record carries.
#[derive(Debug, Clone)]
pub struct HccMapper {
    tables: Arc<CodeTables>,
}

impl HccMapper {
    pub fn new(tables: Arc<CodeTables>) -> Self {
        Self { tables }
    }

    pub fn map<S: AsRef<str>>(&self, icd10_codes: &[S]) -> HccSummary {
        let matches: Vec<HccMatch> = icd10_codes
            .iter()
            .filter_map(|code| {
                let code = code.as_ref();
                self.tables.hcc_for_icd10(code).map(|category| HccMatch {
                    hcc: category.hcc.clone(),
                    category: category.category.clone(),
                    description: category.description.clone(),
                    raf: category.raf,
                    icd10_source: code.to_string(),
                })
            })
            .collect();

        let total_raf = matches.iter().map(|m| m.raf).sum::<Decimal>();
        HccSummary { matches, total_raf }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn mapper() -> HccMapper {
        HccMapper::new(Arc::new(CodeTables::default()))
    }

    #[test]
    fn test_single_code_matches_table_weight() {
        let summary = mapper().map(&["E11.9"]);
        assert_eq!(summary.matches.len(), 1);
        assert_eq!(summary.matches[0].hcc, "38");
        assert_eq!(summary.matches[0].icd10_source, "E11.9");
        assert_eq!(summary.total_raf, dec!(0.166));
    }

    #[test]
    fn test_unmatched_codes_are_omitted() {
        let summary = mapper().map(&["Z00.00", "I50.9", "R51.9"]);
        assert_eq!(summary.matches.len(), 1);
        assert_eq!(summary.matches[0].icd10_source, "I50.9");
    }

    #[test]
    fn test_input_order_is_preserved() {
        let summary = mapper().map(&["N18.4", "E11.9", "J44.9"]);
        let sources: Vec<&str> = summary.matches.iter().map(|m| m.icd10_source.as_str()).collect();
        assert_eq!(sources, vec!["N18.4", "E11.9", "J44.9"]);
    }

    #[test]
    fn test_duplicates_count_twice() {
        let summary = mapper().map(&["E11.9".to_string(), "E11.9".to_string()]);
        assert_eq!(summary.matches.len(), 2);
        assert_eq!(summary.total_raf, dec!(0.332));
    }

    #[test]
    fn test_empty_input() {
        let summary = mapper().map::<&str>(&[]);
        assert!(summary.matches.is_empty());
        assert_eq!(summary.total_raf, Decimal::ZERO);
    }

    proptest! {
        #[test]
        fn prop_total_is_sum_of_distinct_categories(
            picks in prop::sample::subsequence(
                vec![
                    "C50.911", "E11.9", "E66.01", "G30.9", "F20.9", "I50.9", "I48.91", "J44.9",
                    "N18.5",
                ],
                0..=9,
            )
        ) {
            let tables = CodeTables::default();
            let expected: Decimal = picks
                .iter()
                .filter_map(|code| tables.hcc_for_icd10(code))
                .map(|category| category.raf)
                .sum();
            let summary = mapper().map(picks.as_slice());
            prop_assert_eq!(summary.matches.len(), picks.len());
            prop_assert_eq!(summary.total_raf, expected);
        }
    }
}
