//! Report rendering.
//!
//! A [`Report`] is the pair, its analysis and one captured timestamp. Both
//! renderings are pure functions of it: no clock, no I/O, and every map
//! iterated in key order, so equal reports render byte-identically.

mod markdown;

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::analysis::Analysis;
use crate::model::ComparativePair;

/// Error type for rendering.
///
/// Environmental problems never reach the renderer; an error here means the
/// analysis handed over something inconsistent.
#[derive(Debug)]
pub enum RenderError {
    /// Writing into the output buffer failed.
    Format(std::fmt::Error),
    /// JSON serialization failed.
    Json(String),
    /// The analysis violates an invariant the renderer relies on.
    Invariant(String),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Format(e) => write!(f, "render: {}", e),
            RenderError::Json(msg) => write!(f, "render json: {}", msg),
            RenderError::Invariant(msg) => write!(f, "render invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for RenderError {}

impl From<std::fmt::Error> for RenderError {
    fn from(e: std::fmt::Error) -> Self {
        RenderError::Format(e)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

impl ReportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportFormat::Markdown => "markdown",
            ReportFormat::Json => "json",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            other => Err(format!("unknown report format '{}'", other)),
        }
    }
}

/// Everything a rendering needs. Built once, never mutated.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub tool_version: String,
    /// Currency of every cost figure.
    pub currency: String,
    pub pair: ComparativePair,
    pub analysis: Analysis,
}

impl Report {
    pub fn new(
        pair: ComparativePair,
        analysis: Analysis,
        currency: &str,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            generated_at,
            tool_version: crate::VERSION.to_string(),
            currency: currency.to_string(),
            pair,
            analysis,
        }
    }

    pub fn render(&self, format: ReportFormat) -> Result<String, RenderError> {
        self.check()?;
        match format {
            ReportFormat::Markdown => markdown::render(self),
            ReportFormat::Json => {
                serde_json::to_string_pretty(self).map_err(|e| RenderError::Json(e.to_string()))
            }
        }
    }

    fn check(&self) -> Result<(), RenderError> {
        let a = &self.analysis;

        let midpoints: f64 = a.causes.iter().map(|c| c.impact.midpoint()).sum();
        if midpoints > 100.0 {
            return Err(RenderError::Invariant(format!(
                "impact midpoints sum to {:.2}%",
                midpoints
            )));
        }

        let mut ids = BTreeSet::new();
        for rec in &a.recommendations {
            if !ids.insert(rec.id.as_str()) {
                return Err(RenderError::Invariant(format!(
                    "duplicate recommendation id {}",
                    rec.id
                )));
            }
        }
        for rec in &a.recommendations {
            if let Some(dep) = rec.dependencies.iter().find(|d| !ids.contains(d.id.as_str())) {
                return Err(RenderError::Invariant(format!(
                    "{} depends on unknown recommendation {}",
                    rec.id, dep.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analyzer, Dependency, Relation};
    use crate::config::Config;
    use crate::model::{Category, Collected, FailureKind, Unavailability};
    use crate::scenarios;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.timestamp_opt(scenarios::T, 0).single().unwrap()
    }

    fn report(pair: ComparativePair) -> Report {
        let config = Config::default();
        let analysis = Analyzer::new(&config).analyze(&pair);
        Report::new(pair, analysis, &config.pricing.currency, at())
    }

    fn reference() -> Report {
        report(ComparativePair::new(
            scenarios::fast_server(),
            scenarios::slow_server(),
        ))
    }

    #[test]
    fn rendering_is_byte_identical() {
        let a = reference().render(ReportFormat::Markdown).unwrap();
        let b = reference().render(ReportFormat::Markdown).unwrap();
        assert_eq!(a, b);

        let a = reference().render(ReportFormat::Json).unwrap();
        let b = reference().render(ReportFormat::Json).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sections_in_fixed_order() {
        let md = reference().render(ReportFormat::Markdown).unwrap();
        let headings = [
            "# PostgreSQL Comparative Performance Report",
            "## Server Information",
            "## Data Availability",
            "## Executive Summary",
            "## Issue Details",
            "## Scale Comparison",
            "## Query Performance Analysis",
            "## Autovacuum Analysis",
            "## Memory Configuration",
            "## Root Cause Breakdown",
            "## Action Plan",
            "## Expected Results",
            "## Cost-Benefit Analysis",
            "## Appendix: Raw Metrics",
        ];
        let mut last = 0;
        for h in headings {
            let pos = md.find(h).unwrap_or_else(|| panic!("missing {h}"));
            assert!(pos >= last, "{h} out of order");
            last = pos;
        }
    }

    #[test]
    fn reference_pair_numbers() {
        let md = reference().render(ReportFormat::Markdown).unwrap();
        assert!(md.contains("56.37%"));
        assert!(md.contains("51.78%"));
        assert!(md.contains("1.69x"));
        assert!(md.contains("-4.59 pp"));
        assert!(md.contains("E8ds_v5"));
        assert!(md.contains("+$610.28/mo"));
        assert!(md.contains("2025-10-09 08:53:20 UTC"));
    }

    #[test]
    fn active_sessions_and_usage_shares_are_compared() {
        let md = reference().render(ReportFormat::Markdown).unwrap();
        assert!(md.contains("### Active Queries Now"));
        assert!(md.contains("(1 active):"));
        assert!(md.contains("(2 active):"));
        assert!(md.contains("| 4242 | monitoring | active |"));
        assert!(md.contains("| Connection usage | 22.50% | 60.00% | 2.67x |"));
        assert!(md.contains("| Unused index share | 2.50% | 4.17% | 1.67x |"));
        assert!(md.contains("| shared_buffers level | LOW | LOW | - | - |"));
        assert!(md.contains("PgBouncer with pool_mode = transaction"));
    }

    #[test]
    fn idle_server_says_so() {
        let mut fast = scenarios::fast_server();
        fast.active_queries = Collected::Available(Vec::new());
        let r = report(ComparativePair::new(fast, scenarios::slow_server()));
        let md = r.render(ReportFormat::Markdown).unwrap();
        assert!(md.contains(": no active queries."));
    }

    #[test]
    fn missing_tiers_are_flagged_as_assumed() {
        let md = reference().render(ReportFormat::Markdown).unwrap();
        assert!(md.contains(crate::fmt::UNKNOWN_ASSUMED));
    }

    #[test]
    fn fully_unavailable_pair_still_renders() {
        let r = report(ComparativePair::new(
            scenarios::unavailable_server(),
            scenarios::unavailable_server(),
        ));
        assert!(r.analysis.issues.is_empty());
        assert!(r.analysis.recommendations.is_empty());

        let md = r.render(ReportFormat::Markdown).unwrap();
        assert!(md.contains("No issues detected"));
        assert!(md.contains("No actions recommended"));
        assert!(md.contains("connection refused"));
        assert!(!md.contains("**R1**"));
        assert!(!md.contains("| |"));

        r.render(ReportFormat::Json).unwrap();
    }

    #[test]
    fn single_server_mode_is_announced() {
        let r = report(ComparativePair::new(
            scenarios::unavailable_server(),
            scenarios::slow_server(),
        ));
        let md = r.render(ReportFormat::Markdown).unwrap();
        assert!(md.contains("single-server"));
    }

    #[test]
    fn any_single_unavailable_category_renders() {
        for category in Category::ALL {
            let mut slow = scenarios::slow_server();
            slow.set_unavailable(
                category,
                Unavailability::new(FailureKind::QueryError, "permission denied"),
            );
            let r = report(ComparativePair::new(scenarios::fast_server(), slow));
            let md = r.render(ReportFormat::Markdown).unwrap();
            assert!(md.contains(category.title()), "{category:?}");
            assert!(md.contains("permission denied"), "{category:?}");
        }
    }

    #[test]
    fn json_carries_the_analysis() {
        let json = reference().render(ReportFormat::Json).unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["generated_at"], "2025-10-09T08:53:20Z");
        assert_eq!(v["analysis"]["causes"][0]["kind"], "compute-tier-mismatch");
        assert_eq!(v["analysis"]["recommendations"][0]["id"], "R1");
        assert!(v["analysis"]["recommendations"][0].get("key").is_none());
    }

    #[test]
    fn dangling_dependency_is_an_invariant_violation() {
        let mut r = reference();
        r.analysis.recommendations[0].dependencies.push(Dependency {
            relation: Relation::InAdditionTo,
            id: "R999".to_string(),
        });
        assert!(matches!(
            r.render(ReportFormat::Markdown),
            Err(RenderError::Invariant(_))
        ));
    }

    #[test]
    fn format_parsing() {
        assert_eq!("md".parse::<ReportFormat>().unwrap(), ReportFormat::Markdown);
        assert_eq!("JSON".parse::<ReportFormat>().unwrap(), ReportFormat::Json);
        assert!("pdf".parse::<ReportFormat>().is_err());
    }
}
