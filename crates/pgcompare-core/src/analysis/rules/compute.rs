use crate::analysis::rules::ComparisonRule;
use crate::analysis::{Evidence, Issue, IssueKind, RuleContext, Severity};
use crate::fmt::{UNKNOWN_ASSUMED, format_bytes, format_count, format_pct};
use crate::model::{Side, TierClass};

const GB: f64 = 1024.0 * 1024.0 * 1024.0;

fn gb_bytes(gb: f64) -> i64 {
    (gb * GB) as i64
}

// ============================================================
// ComputeTierMismatchRule
// ============================================================

/// Burst-class compute serving a database above the size floor.
pub struct ComputeTierMismatchRule;

impl ComparisonRule for ComputeTierMismatchRule {
    fn id(&self) -> &'static str {
        "compute_tier_mismatch"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let floor = ctx.thresholds.burst_size_floor_gb;
        let mut out = Vec::new();

        for side in Side::BOTH {
            let snap = ctx.snapshot(side);
            let Some(compute) = &snap.compute else {
                continue;
            };
            let Some(db_gb) = snap.database_gb() else {
                continue;
            };
            if compute.class != TierClass::Burstable || db_gb <= floor {
                continue;
            }

            out.push(ctx.issue(
                IssueKind::ComputeTierMismatch,
                Severity::Critical,
                side,
                format!(
                    "{} compute tier {} serving a {} database",
                    compute.class.label(),
                    compute.id,
                    format_bytes(gb_bytes(db_gb))
                ),
                vec![
                    Evidence::new(
                        "Compute tier",
                        format!(
                            "{} ({}, {} vCores, {} GB RAM)",
                            compute.id,
                            compute.class.label(),
                            compute.vcores,
                            compute.ram_gb
                        ),
                    ),
                    Evidence::new("Database size", format_bytes(gb_bytes(db_gb))),
                    Evidence::new("Burst tier size floor", format_bytes(gb_bytes(floor))),
                ],
                db_gb / floor.max(1.0),
            ));
        }
        out
    }
}

// ============================================================
// InsufficientMemoryRule
// ============================================================

/// Heap cache hit ratio strictly below the minimum.
///
/// Severity follows the deficit below the minimum, escalated one level when
/// RAM covers less than the floor share of the data. The escalation does not
/// depend on the hit ratio, so a better ratio never raises severity.
pub struct InsufficientMemoryRule;

impl ComparisonRule for InsufficientMemoryRule {
    fn id(&self) -> &'static str {
        "insufficient_memory"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let t = ctx.thresholds;
        let mut out = Vec::new();

        for side in Side::BOTH {
            let snap = ctx.snapshot(side);
            let Some(cache) = snap.cache.get() else {
                continue;
            };
            let Some(hit) = cache.heap_hit_pct() else {
                continue;
            };
            if hit >= t.cache_hit_min_pct {
                continue;
            }

            let deficit = t.cache_hit_min_pct - hit;
            let ram_to_data = snap.ram_to_data_pct();
            let mut severity = t.cache_deficit_severity.classify(deficit);
            if ram_to_data.is_some_and(|r| r < t.ram_to_data_floor_pct) {
                severity = severity.escalate();
            }

            let mut evidence = vec![
                Evidence::new("Cache hit ratio", format_pct(hit)),
                Evidence::new("Threshold", format_pct(t.cache_hit_min_pct)),
                Evidence::new(
                    "Heap blocks read / hit",
                    format!(
                        "{} / {}",
                        format_count(cache.heap_blks_read),
                        format_count(cache.heap_blks_hit)
                    ),
                ),
            ];
            evidence.push(Evidence::new(
                "RAM-to-data ratio",
                ram_to_data.map_or_else(|| UNKNOWN_ASSUMED.to_string(), format_pct),
            ));

            out.push(ctx.issue(
                IssueKind::InsufficientMemory,
                severity,
                side,
                format!(
                    "Cache hit ratio {} is below {}",
                    format_pct(hit),
                    format_pct(t.cache_hit_min_pct)
                ),
                evidence,
                deficit,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{CacheStats, Collected, ComparativePair};
    use crate::scenarios;

    fn eval(rule: &dyn ComparisonRule, pair: &ComparativePair) -> Vec<Issue> {
        let config = Config::default();
        let ctx = RuleContext {
            pair,
            thresholds: &config.thresholds,
            impact: &config.impact,
        };
        rule.evaluate(&ctx)
    }

    fn with_hit(hit: i64, read: i64) -> crate::model::ServerSnapshot {
        let mut s = scenarios::fast_server();
        s.cache = Collected::Available(CacheStats {
            heap_blks_hit: hit,
            heap_blks_read: read,
            ..Default::default()
        });
        s
    }

    #[test]
    fn exactly_95_is_not_an_issue() {
        let pair = ComparativePair::new(with_hit(9500, 500), with_hit(9500, 500));
        assert!(eval(&InsufficientMemoryRule, &pair).is_empty());
    }

    #[test]
    fn ratio_shown_as_95_00_is_not_an_issue() {
        // 94.996% unrounded
        let pair = ComparativePair::new(with_hit(949_960, 50_040), with_hit(9500, 500));
        assert!(eval(&InsufficientMemoryRule, &pair).is_empty());
    }

    #[test]
    fn just_below_95_is_an_issue() {
        let pair = ComparativePair::new(with_hit(9499, 501), with_hit(9500, 500));
        let issues = eval(&InsufficientMemoryRule, &pair);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].side, Side::Baseline);
        assert_eq!(issues[0].severity, Severity::Low);
        assert_eq!(issues[0].evidence[0].value, "94.99%");
    }

    #[test]
    fn better_hit_ratio_never_raises_severity() {
        let mut prev = Severity::Critical;
        for hit in (0..=100).step_by(5) {
            let mut slow = scenarios::slow_server();
            slow.cache = Collected::Available(CacheStats {
                heap_blks_hit: hit * 100,
                heap_blks_read: (100 - hit) * 100,
                ..Default::default()
            });
            let pair = ComparativePair::new(scenarios::fast_server(), slow);
            let severity = eval(&InsufficientMemoryRule, &pair)
                .into_iter()
                .find(|i| i.side == Side::Comparison)
                .map(|i| i.severity);
            match severity {
                Some(s) => {
                    assert!(s <= prev, "hit {hit}: {s:?} > {prev:?}");
                    prev = s;
                }
                None => assert!(hit >= 95),
            }
        }
    }

    #[test]
    fn scenario_burst_tier_on_large_database() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());

        let compute = eval(&ComputeTierMismatchRule, &pair);
        assert_eq!(compute.len(), 1);
        assert_eq!(compute[0].side, Side::Comparison);
        assert_eq!(compute[0].severity, Severity::Critical);

        let memory = eval(&InsufficientMemoryRule, &pair);
        assert_eq!(memory.len(), 2);
        let fast = memory.iter().find(|i| i.side == Side::Baseline).unwrap();
        let slow = memory.iter().find(|i| i.side == Side::Comparison).unwrap();
        assert_eq!(fast.evidence[0].value, "56.37%");
        assert_eq!(slow.evidence[0].value, "51.78%");
        assert!(slow.severity >= fast.severity);
        assert_eq!(fast.evidence[3].value, UNKNOWN_ASSUMED);
    }

    #[test]
    fn unavailable_cache_yields_no_issue() {
        let mut slow = scenarios::slow_server();
        slow.set_unavailable(
            crate::model::Category::Cache,
            crate::model::Unavailability::new(crate::model::FailureKind::Timeout, "5000ms"),
        );
        let pair = ComparativePair::new(scenarios::unavailable_server(), slow);
        assert!(eval(&InsufficientMemoryRule, &pair).is_empty());
    }

    #[test]
    fn small_burst_database_is_fine() {
        let mut slow = scenarios::slow_server();
        slow.database_size = Collected::Available(crate::model::DatabaseSize {
            bytes: gb_bytes(20.0),
        });
        let pair = ComparativePair::new(scenarios::fast_server(), slow);
        assert!(eval(&ComputeTierMismatchRule, &pair).is_empty());
    }
}
