use std::sync::Arc;

use crate::code_tables::CodeTables;
use crate::models::{EmResult, MdmInput};

/// Derives the E/M level from the three MDM elements.
///
/// CMS counts two of three elements: the level is met when at least two
/// elements reach it, which is the second-highest tier of the three.
#[derive(Debug, Clone)]
pub struct MdmResolver {
    tables: Arc<CodeTables>,
}

impl MdmResolver {
    pub fn new(tables: Arc<CodeTables>) -> Self {
        Self { tables }
    }

    pub fn resolve(&self, input: &MdmInput) -> EmResult {
        let mut tiers = [input.problems, input.data, input.risk];
        tiers.sort_unstable_by(|a, b| b.cmp(a));
        let tier = tiers[1];

        let level = self.tables.mdm_levels.for_tier(tier);
        EmResult {
            code: level.code.clone(),
            complexity_label: level.label.clone(),
            tier,
            rvu: level.rvu,
        }
    }
}
