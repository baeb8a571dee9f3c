use crate::analysis::rules::ComparisonRule;
use crate::analysis::{Evidence, Issue, IssueKind, RuleContext, Severity};
use crate::fmt::{format_count, format_duration, format_epoch, format_ratio};
use crate::model::Side;

/// Autovacuum running far more often than on the paired server while its
/// latest run trails the paired server's: the workers are busy but falling
/// behind.
pub struct AutovacuumLagRule;

impl ComparisonRule for AutovacuumLagRule {
    fn id(&self) -> &'static str {
        "autovacuum_lag"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let t = ctx.thresholds;
        let mut out = Vec::new();

        for side in Side::BOTH {
            let (Some(own), Some(other)) = (
                ctx.snapshot(side).autovacuum.get(),
                ctx.snapshot(side.other()).autovacuum.get(),
            ) else {
                continue;
            };
            if own.total_autovacuum_count <= 0 {
                continue;
            }
            // None when the paired server never ran autovacuum
            let ratio = (other.total_autovacuum_count > 0)
                .then(|| own.total_autovacuum_count as f64 / other.total_autovacuum_count as f64);
            if let Some(r) = ratio
                && r <= t.autovacuum_count_ratio
            {
                continue;
            }
            let Some(own_latest) = own.latest_autovacuum else {
                continue;
            };
            let other_latest = match (ratio, other.latest_autovacuum) {
                (_, Some(at)) => at,
                (None, None) => ctx.snapshot(side.other()).collected_at,
                (Some(_), None) => continue,
            };
            let lag = other_latest - own_latest;
            if lag < t.autovacuum_lag_secs {
                continue;
            }

            let severity = match ratio {
                Some(r) if r <= t.autovacuum_severe_ratio => Severity::Medium,
                _ => Severity::High,
            };
            let (title, ratio_text) = match ratio {
                Some(r) => (
                    format!(
                        "Autovacuum ran {} as often yet last finished {} earlier",
                        format_ratio(r),
                        format_duration(lag as f64)
                    ),
                    format_ratio(r),
                ),
                None => (
                    format!(
                        "Autovacuum ran {} times while the paired server needed none, last finished {} before collection",
                        format_count(own.total_autovacuum_count),
                        format_duration(lag as f64)
                    ),
                    "unbounded".to_string(),
                ),
            };

            out.push(ctx.issue(
                IssueKind::AutovacuumLag,
                severity,
                side,
                title,
                vec![
                    Evidence::new(
                        format!("Autovacuum runs ({})", side.short_label()),
                        format_count(own.total_autovacuum_count),
                    ),
                    Evidence::new(
                        format!("Autovacuum runs ({})", side.other().short_label()),
                        format_count(other.total_autovacuum_count),
                    ),
                    Evidence::new("Run count ratio", ratio_text),
                    Evidence::new(
                        format!("Last autovacuum ({})", side.short_label()),
                        format_epoch(Some(own_latest)),
                    ),
                    Evidence::new(
                        format!("Last autovacuum ({})", side.other().short_label()),
                        format_epoch(other.latest_autovacuum),
                    ),
                ],
                ratio.unwrap_or(own.total_autovacuum_count as f64),
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{AutovacuumStats, Collected, ComparativePair};
    use crate::scenarios;

    fn eval(pair: &ComparativePair) -> Vec<Issue> {
        let config = Config::default();
        let ctx = RuleContext {
            pair,
            thresholds: &config.thresholds,
            impact: &config.impact,
        };
        AutovacuumLagRule.evaluate(&ctx)
    }

    #[test]
    fn busier_and_lagging_server_is_flagged() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());

        let issues = eval(&pair);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].side, Side::Comparison);
        assert_eq!(issues[0].severity, Severity::Medium);
        assert_eq!(issues[0].evidence[2].value, "2.00x");
    }

    #[test]
    fn busier_but_current_server_is_fine() {
        let mut slow = scenarios::slow_server();
        let fast = scenarios::fast_server();
        slow.autovacuum = Collected::Available(AutovacuumStats {
            total_autovacuum_count: 2400,
            latest_autovacuum: fast.autovacuum.get().and_then(|a| a.latest_autovacuum),
            ..Default::default()
        });
        let pair = ComparativePair::new(fast, slow);
        assert!(eval(&pair).is_empty());
    }

    #[test]
    fn paired_server_without_autovacuum_runs_is_an_unbounded_ratio() {
        let mut fast = scenarios::fast_server();
        fast.autovacuum = Collected::Available(AutovacuumStats::default());
        let pair = ComparativePair::new(fast, scenarios::slow_server());

        let issues = eval(&pair);

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].side, Side::Comparison);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].evidence[2].value, "unbounded");
        assert_eq!(issues[0].evidence[4].value, "never");
        assert_eq!(issues[0].magnitude, 2400.0);
    }

    #[test]
    fn idle_pair_yields_nothing() {
        let mut fast = scenarios::fast_server();
        let mut slow = scenarios::slow_server();
        fast.autovacuum = Collected::Available(AutovacuumStats::default());
        slow.autovacuum = Collected::Available(AutovacuumStats::default());
        assert!(eval(&ComparativePair::new(fast, slow)).is_empty());
    }

    #[test]
    fn recent_run_against_zero_baseline_is_fine() {
        let mut fast = scenarios::fast_server();
        let mut slow = scenarios::slow_server();
        fast.autovacuum = Collected::Available(AutovacuumStats::default());
        slow.autovacuum = Collected::Available(AutovacuumStats {
            total_autovacuum_count: 40,
            latest_autovacuum: Some(scenarios::T - 60),
            ..Default::default()
        });
        assert!(eval(&ComparativePair::new(fast, slow)).is_empty());
    }

    #[test]
    fn missing_paired_data_yields_nothing() {
        let pair = ComparativePair::new(scenarios::unavailable_server(), scenarios::slow_server());
        assert!(eval(&pair).is_empty());
    }
}
