use crate::analysis::rules::ComparisonRule;
use crate::analysis::{Evidence, Issue, IssueKind, RuleContext, Severity};
use crate::fmt::format_ratio;
use crate::model::Side;

/// Generic configuration left identical across servers whose resources
/// differ materially: size ratio at or above the drift ratio in either
/// direction, or different RAM. Reported against the larger server.
pub struct ConfigDriftRule;

impl ComparisonRule for ConfigDriftRule {
    fn id(&self) -> &'static str {
        "config_drift"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let t = ctx.thresholds;
        let pair = ctx.pair;
        let (Some(a), Some(b)) = (pair.baseline.settings.get(), pair.comparison.settings.get())
        else {
            return Vec::new();
        };

        let identical: Vec<(&str, &str)> = t
            .drift_parameters
            .iter()
            .filter_map(|name| {
                let va = a.display(name)?;
                let vb = b.display(name)?;
                (va == vb).then_some((name.as_str(), va))
            })
            .collect();
        if identical.is_empty() {
            return Vec::new();
        }

        let size_ratio = pair.size_ratio();
        let size_differs =
            size_ratio.is_some_and(|r| r >= t.drift_size_ratio || r * t.drift_size_ratio <= 1.0);
        let (ram_a, ram_b) = (pair.baseline.ram_gb(), pair.comparison.ram_gb());
        let ram_differs = matches!((ram_a, ram_b), (Some(x), Some(y)) if x != y);
        if !size_differs && !ram_differs {
            return Vec::new();
        }

        let side = match (size_ratio, ram_a, ram_b) {
            (Some(r), _, _) if r < 1.0 => Side::Baseline,
            (None, Some(x), Some(y)) if x > y => Side::Baseline,
            _ => Side::Comparison,
        };

        let mut evidence = Vec::with_capacity(identical.len() + 2);
        evidence.push(Evidence::new(
            "Size ratio (Server 2 / Server 1)",
            size_ratio.map_or_else(|| crate::fmt::UNKNOWN.to_string(), format_ratio),
        ));
        if let (Some(x), Some(y)) = (ram_a, ram_b) {
            evidence.push(Evidence::new("RAM", format!("{x} GB vs {y} GB")));
        }
        for (name, value) in &identical {
            evidence.push(Evidence::new(*name, format!("{value} (both)")));
        }

        let mut issue = ctx.issue(
            IssueKind::ConfigDrift,
            Severity::Medium,
            side,
            format!(
                "{} generic parameters identical on servers of different size",
                identical.len()
            ),
            evidence,
            identical.len() as f64,
        );
        issue.subjects = identical.iter().map(|(n, _)| n.to_string()).collect();
        vec![issue]
    }
}
