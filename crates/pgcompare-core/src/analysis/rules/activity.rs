use crate::analysis::rules::ComparisonRule;
use crate::analysis::{Evidence, Issue, IssueKind, RuleContext, Severity};
use crate::fmt::{format_count, format_delta_pp, format_duration, format_pct, truncate};
use crate::model::Side;

/// Active catalog/statistics queries running past the floor. Severity by
/// duration in hours.
///
/// Application queries are left alone: a long report query may be expected,
/// a metadata query running for hours is not.
pub struct LongRunningQueryRule;

impl ComparisonRule for LongRunningQueryRule {
    fn id(&self) -> &'static str {
        "long_running_query"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let t = ctx.thresholds;
        let mut out = Vec::new();

        for side in Side::BOTH {
            let Some(queries) = ctx.snapshot(side).long_queries.get() else {
                continue;
            };

            for q in queries {
                if q.state != "active"
                    || q.duration_secs < t.long_query_floor_secs
                    || !q.is_catalog_query()
                {
                    continue;
                }

                let hours = q.duration_secs / 3600.0;
                let mut issue = ctx.issue(
                    IssueKind::LongRunningQuery,
                    t.long_query_hours_severity.classify(hours),
                    side,
                    format!(
                        "Catalog query (pid {}) running for {}",
                        q.pid,
                        format_duration(q.duration_secs)
                    ),
                    vec![
                        Evidence::new(
                            format!("pid {}", q.pid),
                            format!(
                                "{}, {:.2} h, user {}",
                                format_duration(q.duration_secs),
                                hours,
                                q.user
                            ),
                        ),
                        Evidence::new("Query", truncate(&q.query, 100)),
                    ],
                    q.duration_secs,
                );
                issue.subjects.push(q.pid.to_string());
                out.push(issue);
            }
        }
        out
    }
}

/// Connection usage well above the paired server's: sessions pile up on
/// the slower side, typically leaked or unpooled connections.
pub struct ConnectionPressureRule;

impl ComparisonRule for ConnectionPressureRule {
    fn id(&self) -> &'static str {
        "connection_pressure"
    }

    fn evaluate(&self, ctx: &RuleContext) -> Vec<Issue> {
        let t = ctx.thresholds;
        let mut out = Vec::new();

        for side in Side::BOTH {
            let (Some(own), Some(other)) = (
                ctx.snapshot(side).connections.get(),
                ctx.snapshot(side.other()).connections.get(),
            ) else {
                continue;
            };
            let (Some(own_pct), Some(other_pct)) = (own.usage_pct(), other.usage_pct()) else {
                continue;
            };
            let gap = own_pct - other_pct;
            if gap <= t.connection_usage_gap_pp {
                continue;
            }

            let severity = if own_pct >= t.connection_usage_high_pct {
                Severity::High
            } else {
                Severity::Medium
            };

            out.push(ctx.issue(
                IssueKind::ConnectionPressure,
                severity,
                side,
                format!(
                    "Connection usage {} of max_connections, {} against the paired server",
                    format_pct(own_pct),
                    format_delta_pp(gap)
                ),
                vec![
                    Evidence::new(
                        format!("Connection usage ({})", side.short_label()),
                        format!(
                            "{} ({} of {})",
                            format_pct(own_pct),
                            format_count(own.current),
                            format_count(own.max_connections)
                        ),
                    ),
                    Evidence::new(
                        format!("Connection usage ({})", side.other().short_label()),
                        format!(
                            "{} ({} of {})",
                            format_pct(other_pct),
                            format_count(other.current),
                            format_count(other.max_connections)
                        ),
                    ),
                    Evidence::new(
                        format!("Active / idle ({})", side.short_label()),
                        format!("{} / {}", format_count(own.active), format_count(own.idle)),
                    ),
                ],
                gap,
            ));
        }
        out
    }
}
