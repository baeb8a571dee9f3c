//! pgcompare-core - comparative diagnostics engine for pairs of PostgreSQL servers.
//!
//! Provides:
//! - `collector`: per-server catalog snapshots with per-category failure isolation
//! - `model`: snapshot data model (`ServerSnapshot`, `Collected<T>`)
//! - `analysis`: comparison rules, root-cause ranking, remediation advisors
//! - `report`: deterministic markdown/JSON rendering
//! - `config`: thresholds, impact weights, price table, collector limits
//! - `fmt`: shared formatting helpers (bytes, duration, percent, ratio)

pub mod analysis;
pub mod collector;
pub mod config;
pub mod fmt;
pub mod model;
pub mod report;

#[cfg(test)]
pub(crate) mod scenarios;

pub use analysis::{Analysis, Analyzer};
pub use config::Config;
pub use model::{Collected, ComparativePair, ServerSnapshot};
pub use report::{Report, ReportFormat};

/// Crate version, for report headers and `--version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Runs the pure half of the pipeline: analyze, rank, recommend, render.
///
/// `generated_at` is the only clock input; identical snapshots and timestamp
/// always produce byte-identical output.
pub fn diagnose(
    pair: ComparativePair,
    config: &Config,
    generated_at: chrono::DateTime<chrono::Utc>,
    format: ReportFormat,
) -> Result<String, report::RenderError> {
    let analysis = Analyzer::new(config).analyze(&pair);
    let report = Report::new(pair, analysis, &config.pricing.currency, generated_at);
    report.render(format)
}
