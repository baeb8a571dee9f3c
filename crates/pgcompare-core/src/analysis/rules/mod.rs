pub mod activity;
pub mod compute;
pub mod drift;
pub mod indexes;
pub mod storage;
pub mod tables;
pub mod vacuum;

use super::{Issue, RuleContext};

/// One row of the rule table: reads the pair, emits zero or more issues.
///
/// Rules must not emit anything for a category that is unavailable on a
/// side they need.
pub trait ComparisonRule: Send + Sync {
    fn id(&self) -> &'static str;
    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue>;
}

pub fn all_rules() -> Vec<Box<dyn ComparisonRule>> {
    vec![
        // Resources
        Box::new(compute::ComputeTierMismatchRule),
        Box::new(compute::InsufficientMemoryRule),
        Box::new(storage::InsufficientIopsRule),
        // Configuration
        Box::new(drift::ConfigDriftRule),
        // Structure
        Box::new(tables::SeqScanRule),
        Box::new(indexes::UnusedIndexRule),
        Box::new(tables::TableBloatRule),
        Box::new(vacuum::AutovacuumLagRule),
        // Activity
        Box::new(activity::LongRunningQueryRule),
        Box::new(activity::ConnectionPressureRule),
    ]
}

/// `schema.name`, as used in SQL statements and evidence.
pub(crate) fn qualified_name(schema: &str, name: &str) -> String {
    format!("{schema}.{name}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn rule_ids_are_unique() {
        let rules = all_rules();
        let ids: HashSet<_> = rules.iter().map(|r| r.id()).collect();
        assert_eq!(ids.len(), rules.len());
    }
}
