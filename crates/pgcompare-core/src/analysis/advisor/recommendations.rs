use crate::analysis::advisor::{
    Action, Advisor, AdvisorContext, Dependency, Recommendation, Relation,
};
use crate::analysis::{Issue, IssueKind, RankedCause};
use crate::config::ComputePrice;
use crate::fmt::{UNKNOWN, format_count, format_pct};
use crate::model::{Side, TierClass};

/// Share of RAM spread over `max_connections` when sizing `work_mem`.
const WORK_MEM_RAM_SHARE: f64 = 0.25;

// ============================================================
// Helpers
// ============================================================

fn key(kind: IssueKind, side: Side, suffix: &str) -> String {
    format!("{}:{:?}:{}", kind.id(), side, suffix)
}

fn compute_key(side: Side) -> String {
    key(IssueKind::ComputeTierMismatch, side, "tier")
}

fn memory_tier_key(side: Side) -> String {
    key(IssueKind::InsufficientMemory, side, "tier")
}

fn draft(
    cause: &RankedCause,
    issue: &Issue,
    key: String,
    title: String,
    action: Action,
    rationale: String,
) -> Recommendation {
    Recommendation {
        id: String::new(),
        kind: cause.kind,
        side: issue.side,
        priority: issue.severity,
        title,
        action,
        rationale,
        improvement: cause.impact,
        monthly_cost_delta: Some(0.0),
        dependencies: Vec::new(),
        key,
    }
}

fn depends(relation: Relation, key: String) -> Dependency {
    Dependency { relation, id: key }
}

/// RAM a server of this data size should have: a share of the data, with a
/// floor.
fn target_ram_gb(ctx: &AdvisorContext, side: Side) -> Option<f64> {
    let adv = &ctx.config.advisor;
    let data_gb = ctx.pair.get(side).database_gb()?;
    Some((data_gb * adv.target_ram_to_data_pct / 100.0).max(adv.min_recommended_ram_gb))
}

/// Cheapest non-burst tier meeting the RAM target.
fn upgrade_tier<'a>(ctx: &AdvisorContext<'a>, side: Side) -> Option<&'a ComputePrice> {
    let ram = target_ram_gb(ctx, side)?;
    ctx.config
        .pricing
        .cheapest_compute(ram, |class| class != TierClass::Burstable)
}

/// Cheapest memory-optimized tier meeting the RAM target, unless the current
/// tier already has that much RAM.
fn memory_tier<'a>(ctx: &AdvisorContext<'a>, side: Side) -> Option<&'a ComputePrice> {
    let ram = target_ram_gb(ctx, side)?;
    if ctx.pair.get(side).ram_gb().is_some_and(|current| current >= ram) {
        return None;
    }
    ctx.config
        .pricing
        .cheapest_compute(ram, |class| class == TierClass::MemoryOptimized)
}

/// RAM the server will have once the recommended tier change is applied, or
/// its current RAM when no change is recommended.
fn planned_ram_gb(ctx: &AdvisorContext, side: Side) -> Option<f64> {
    let affects = |kind| ctx.cause(kind).is_some_and(|c| c.affects(side));
    let planned = if affects(IssueKind::ComputeTierMismatch) {
        upgrade_tier(ctx, side)
    } else if affects(IssueKind::InsufficientMemory) {
        memory_tier(ctx, side)
    } else {
        None
    };
    planned
        .map(|t| t.ram_gb)
        .or_else(|| ctx.pair.get(side).ram_gb())
}

fn compute_cost_delta(ctx: &AdvisorContext, side: Side, target: &ComputePrice) -> Option<f64> {
    let current = ctx.pair.get(side).compute.as_ref()?;
    let price = ctx.config.pricing.compute(&current.id)?;
    Some(target.monthly_cost - price.monthly_cost)
}

/// Memory setting in PostgreSQL unit syntax: `"16GB"`, `"1536MB"`.
fn memory_setting(gb: f64) -> String {
    let mb = (gb * 1024.0).floor() as u64;
    if mb % 1024 == 0 {
        format!("{}GB", mb / 1024)
    } else {
        format!("{}MB", mb)
    }
}

fn current_setting(ctx: &AdvisorContext, side: Side, name: &str) -> String {
    ctx.pair
        .get(side)
        .settings
        .get()
        .and_then(|s| s.display(name))
        .unwrap_or(UNKNOWN)
        .to_string()
}

fn parameter_change(name: &str, current: String, recommended: String) -> Action {
    Action::ParameterChange {
        name: name.to_string(),
        current,
        recommended,
    }
}

// ============================================================
// 1. ComputeTierAdvisor
// ============================================================

pub struct ComputeTierAdvisor;

impl Advisor for ComputeTierAdvisor {
    fn id(&self) -> &'static str {
        "compute_tier"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::ComputeTierMismatch) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for issue in &cause.issues {
            let side = issue.side;
            let Some(target) = upgrade_tier(ctx, side) else {
                continue;
            };
            let current = ctx.pair.get(side).compute.as_ref().map(|c| c.id.clone());

            let mut rec = draft(
                cause,
                issue,
                compute_key(side),
                format!(
                    "Upgrade {} from {} to {}",
                    side.short_label(),
                    current.as_deref().unwrap_or(UNKNOWN),
                    target.id
                ),
                Action::ComputeUpgrade {
                    current,
                    target: target.id.clone(),
                },
                format!(
                    "{} tier with {} vCores and {} GB RAM; burstable CPU credits cannot \
                     sustain a database of this size",
                    target.class.label(),
                    target.vcores,
                    target.ram_gb
                ),
            );
            rec.monthly_cost_delta = compute_cost_delta(ctx, side, target);
            out.push(rec);
        }
        out
    }
}

// ============================================================
// 2. MemoryAdvisor
// ============================================================

pub struct MemoryAdvisor;

impl Advisor for MemoryAdvisor {
    fn id(&self) -> &'static str {
        "memory"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::InsufficientMemory) else {
            return Vec::new();
        };
        let adv = &ctx.config.advisor;

        let mut out = Vec::new();
        for issue in &cause.issues {
            let side = issue.side;
            let hit = ctx
                .pair
                .get(side)
                .heap_hit_pct()
                .map_or_else(|| UNKNOWN.to_string(), format_pct);

            if let Some(target) = memory_tier(ctx, side) {
                let current = ctx.pair.get(side).compute.as_ref().map(|c| c.id.clone());
                let mut rec = draft(
                    cause,
                    issue,
                    memory_tier_key(side),
                    format!(
                        "Move {} to memory-optimized tier {}",
                        side.short_label(),
                        target.id
                    ),
                    Action::ComputeUpgrade {
                        current,
                        target: target.id.clone(),
                    },
                    format!(
                        "Cache hit ratio {hit}; {} GB RAM keeps the working set in memory",
                        target.ram_gb
                    ),
                );
                rec.monthly_cost_delta = compute_cost_delta(ctx, side, target);
                rec.dependencies
                    .push(depends(Relation::SupersededBy, compute_key(side)));
                out.push(rec);
            }

            let Some(ram) = planned_ram_gb(ctx, side) else {
                continue;
            };
            let settings = [
                ("shared_buffers", ram * adv.shared_buffers_pct / 100.0),
                (
                    "effective_cache_size",
                    ram * adv.effective_cache_size_pct.high / 100.0,
                ),
            ];
            for (name, gb) in settings {
                let recommended = memory_setting(gb);
                let current_bytes = ctx
                    .pair
                    .get(side)
                    .settings
                    .get()
                    .and_then(|s| s.bytes(name));
                if current_bytes == Some((gb * 1024.0).floor() as u64 * 1024 * 1024) {
                    continue;
                }
                let mut rec = draft(
                    cause,
                    issue,
                    key(IssueKind::InsufficientMemory, side, name),
                    format!("Set {name} = {recommended} on {}", side.short_label()),
                    parameter_change(name, current_setting(ctx, side, name), recommended),
                    format!("Sized for {ram} GB RAM; cache hit ratio {hit}"),
                );
                rec.dependencies
                    .push(depends(Relation::InAdditionTo, compute_key(side)));
                rec.dependencies
                    .push(depends(Relation::InAdditionTo, memory_tier_key(side)));
                out.push(rec);
            }
        }
        out
    }
}

// ============================================================
// 3. StorageAdvisor
// ============================================================

pub struct StorageAdvisor;

impl Advisor for StorageAdvisor {
    fn id(&self) -> &'static str {
        "storage"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::InsufficientIops) else {
            return Vec::new();
        };
        let pricing = &ctx.config.pricing;

        let mut out = Vec::new();
        for issue in &cause.issues {
            let side = issue.side;
            let snap = ctx.pair.get(side);
            let (Some(data_gb), Some(current)) = (snap.database_gb(), snap.storage.as_ref())
            else {
                continue;
            };
            let Some(band) = ctx.config.thresholds.iops_band(data_gb) else {
                continue;
            };
            let Some(target) =
                pricing.cheapest_storage(band.recommended_iops, data_gb.max(current.size_gb))
            else {
                continue;
            };

            let mut rec = draft(
                cause,
                issue,
                key(IssueKind::InsufficientIops, side, "storage"),
                format!(
                    "Move {} storage from {} ({} IOPS) to {} ({} IOPS)",
                    side.short_label(),
                    current.id,
                    format_count(current.iops as i64),
                    target.id,
                    format_count(target.iops as i64)
                ),
                Action::StorageUpgrade {
                    current: Some(current.id.clone()),
                    target: target.id.clone(),
                    iops: target.iops,
                },
                format!(
                    "{} band needs at least {} IOPS/GB",
                    band.name, band.min_iops_per_gb
                ),
            );
            rec.monthly_cost_delta = pricing
                .storage_for(current)
                .map(|p| target.monthly_cost - p.monthly_cost);
            out.push(rec);
        }
        out
    }
}

// ============================================================
// 4. ConfigDriftAdvisor
// ============================================================

pub struct ConfigDriftAdvisor;

impl Advisor for ConfigDriftAdvisor {
    fn id(&self) -> &'static str {
        "config_drift"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::ConfigDrift) else {
            return Vec::new();
        };
        let adv = &ctx.config.advisor;

        let mut out = Vec::new();
        for issue in &cause.issues {
            let side = issue.side;
            let max_connections = ctx
                .pair
                .get(side)
                .settings
                .get()
                .and_then(|s| s.get("max_connections"))
                .and_then(|s| s.numeric())
                .filter(|n| *n > 0.0);

            for name in &issue.subjects {
                let recommended = match name.as_str() {
                    "work_mem" => {
                        let (Some(ram), Some(conns)) = (planned_ram_gb(ctx, side), max_connections)
                        else {
                            continue;
                        };
                        let mb = (ram * 1024.0 * WORK_MEM_RAM_SHARE / conns).floor() as u64;
                        format!("{}MB", mb.clamp(adv.work_mem_min_mb, adv.work_mem_max_mb))
                    }
                    "effective_io_concurrency" => adv.effective_io_concurrency.to_string(),
                    "random_page_cost" => adv.random_page_cost.to_string(),
                    _ => continue,
                };

                let mut rec = draft(
                    cause,
                    issue,
                    key(IssueKind::ConfigDrift, side, name),
                    format!("Set {name} = {recommended} on {}", side.short_label()),
                    parameter_change(name, current_setting(ctx, side, name), recommended),
                    "Left at the same value as the smaller server".to_string(),
                );
                rec.dependencies
                    .push(depends(Relation::InAdditionTo, compute_key(side)));
                out.push(rec);
            }
        }
        out
    }
}

// ============================================================
// 5. MissingIndexAdvisor
// ============================================================

pub struct MissingIndexAdvisor;

impl Advisor for MissingIndexAdvisor {
    fn id(&self) -> &'static str {
        "missing_index"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::MissingIndex) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for issue in &cause.issues {
            for subject in &issue.subjects {
                let table = subject.rsplit('.').next().unwrap_or(subject);
                let sql = format!(
                    "CREATE INDEX CONCURRENTLY {table}_<column>_idx ON {subject} (<column>);"
                );
                out.push(draft(
                    cause,
                    issue,
                    key(IssueKind::MissingIndex, issue.side, subject),
                    format!("Index {subject} on {}", issue.side.short_label()),
                    Action::IndexStatement { sql },
                    "Pick <column> from the filters of the top statements on this table"
                        .to_string(),
                ));
            }
        }
        out
    }
}

// ============================================================
// 6. FullTableScanAdvisor
// ============================================================

pub struct FullTableScanAdvisor;

impl Advisor for FullTableScanAdvisor {
    fn id(&self) -> &'static str {
        "full_table_scan"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::FullTableScan) else {
            return Vec::new();
        };

        cause
            .issues
            .iter()
            .filter(|issue| !issue.subjects.is_empty())
            .map(|issue| {
                let tables = issue.subjects.join(", ");
                draft(
                    cause,
                    issue,
                    key(IssueKind::FullTableScan, issue.side, "monitor"),
                    format!("Review scan-heavy queries on {}", issue.side.short_label()),
                    Action::Monitoring {
                        policy: format!(
                            "Enable pg_stat_statements and review EXPLAIN (ANALYZE, BUFFERS) \
                             of the top statements touching {tables}"
                        ),
                    },
                    "Indexes exist but the planner prefers sequential scans".to_string(),
                )
            })
            .collect()
    }
}

// ============================================================
// 7. UnusedIndexAdvisor
// ============================================================

pub struct UnusedIndexAdvisor;

impl Advisor for UnusedIndexAdvisor {
    fn id(&self) -> &'static str {
        "unused_index"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::UnusedIndex) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for issue in &cause.issues {
            for subject in &issue.subjects {
                out.push(draft(
                    cause,
                    issue,
                    key(IssueKind::UnusedIndex, issue.side, subject),
                    format!("Drop {subject} on {}", issue.side.short_label()),
                    Action::IndexStatement {
                        sql: format!("DROP INDEX CONCURRENTLY {subject};"),
                    },
                    "Never scanned since statistics reset; every write still maintains it"
                        .to_string(),
                ));
            }
        }
        out
    }
}

// ============================================================
// 8. TableBloatAdvisor
// ============================================================

pub struct TableBloatAdvisor;

impl Advisor for TableBloatAdvisor {
    fn id(&self) -> &'static str {
        "table_bloat"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::TableBloat) else {
            return Vec::new();
        };
        let scale = ctx.config.advisor.table_vacuum_scale_factor;

        let mut out = Vec::new();
        for issue in &cause.issues {
            for subject in &issue.subjects {
                out.push(draft(
                    cause,
                    issue,
                    key(IssueKind::TableBloat, issue.side, subject),
                    format!("Vacuum {subject} on {}", issue.side.short_label()),
                    Action::Maintenance {
                        statements: vec![
                            format!("VACUUM (ANALYZE) {subject};"),
                            format!(
                                "ALTER TABLE {subject} SET (autovacuum_vacuum_scale_factor = {scale});"
                            ),
                        ],
                    },
                    "Dead tuples above the bloat floor".to_string(),
                ));
            }
        }
        out
    }
}

// ============================================================
// 9. AutovacuumAdvisor
// ============================================================

pub struct AutovacuumAdvisor;

impl Advisor for AutovacuumAdvisor {
    fn id(&self) -> &'static str {
        "autovacuum"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::AutovacuumLag) else {
            return Vec::new();
        };
        let adv = &ctx.config.advisor;

        let mut out = Vec::new();
        for issue in &cause.issues {
            let side = issue.side;
            let settings = ctx.pair.get(side).settings.get();
            for (name, floor) in [
                ("autovacuum_max_workers", adv.autovacuum_max_workers),
                ("autovacuum_vacuum_cost_limit", adv.autovacuum_vacuum_cost_limit),
            ] {
                let current = settings.and_then(|s| s.get(name)).and_then(|s| s.numeric());
                if current.is_some_and(|c| c >= floor as f64) {
                    continue;
                }
                let mut rec = draft(
                    cause,
                    issue,
                    key(IssueKind::AutovacuumLag, side, name),
                    format!("Set {name} = {floor} on {}", side.short_label()),
                    parameter_change(name, current_setting(ctx, side, name), floor.to_string()),
                    "Autovacuum runs often but falls behind".to_string(),
                );
                rec.dependencies
                    .push(depends(Relation::InAdditionTo, compute_key(side)));
                out.push(rec);
            }
        }
        out
    }
}

// ============================================================
// 10. LongQueryAdvisor
// ============================================================

pub struct LongQueryAdvisor;

/// Double-quotes an SQL identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

impl Advisor for LongQueryAdvisor {
    fn id(&self) -> &'static str {
        "long_query"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::LongRunningQuery) else {
            return Vec::new();
        };
        let timeout = ctx.config.advisor.statement_timeout_mins;

        let mut out = Vec::new();
        for issue in &cause.issues {
            let side = issue.side;
            let queries = ctx.pair.get(side).long_queries.get();
            for pid in &issue.subjects {
                let role = queries
                    .and_then(|qs| qs.iter().find(|q| q.pid.to_string() == *pid))
                    .map_or_else(|| "<role>".to_string(), |q| quote_ident(&q.user));
                out.push(draft(
                    cause,
                    issue,
                    key(IssueKind::LongRunningQuery, side, pid),
                    format!("Stop runaway catalog query {pid} on {}", side.short_label()),
                    Action::Monitoring {
                        policy: format!(
                            "ALTER ROLE {role} SET statement_timeout = '{timeout}min'; \
                             SELECT pg_terminate_backend({pid});"
                        ),
                    },
                    "Catalog queries should finish in seconds".to_string(),
                ));
            }
        }
        out
    }
}

// ============================================================
// 11. ConnectionPoolAdvisor
// ============================================================

const IDLE_SESSIONS_SQL: &str = "SELECT usename, application_name, count(*) \
    FROM pg_stat_activity WHERE state = 'idle' \
    GROUP BY usename, application_name ORDER BY count(*) DESC;";

pub struct ConnectionPoolAdvisor;

impl Advisor for ConnectionPoolAdvisor {
    fn id(&self) -> &'static str {
        "connection_pool"
    }

    fn evaluate(&self, ctx: &AdvisorContext) -> Vec<Recommendation> {
        let Some(cause) = ctx.cause(IssueKind::ConnectionPressure) else {
            return Vec::new();
        };

        cause
            .issues
            .iter()
            .map(|issue| {
                let side = issue.side;
                let rationale = match ctx.pair.get(side).connections.get() {
                    Some(c) => format!(
                        "{} of {} connections open, {} of them idle; \
                         leaked or unpooled sessions hold backends and memory",
                        format_count(c.current),
                        format_count(c.max_connections),
                        format_count(c.idle)
                    ),
                    None => "Leaked or unpooled sessions hold backends and memory".to_string(),
                };
                draft(
                    cause,
                    issue,
                    key(IssueKind::ConnectionPressure, side, "pool"),
                    format!(
                        "Pool connections on {} and check the application for leaks",
                        side.short_label()
                    ),
                    Action::ConnectionPooling {
                        pooler: "PgBouncer".to_string(),
                        pool_mode: "transaction".to_string(),
                        leak_check: IDLE_SESSIONS_SQL.to_string(),
                    },
                    rationale,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analysis, Analyzer, Severity};
    use crate::config::Config;
    use crate::model::{Collected, ComparativePair};
    use crate::scenarios;

    fn analyze(pair: &ComparativePair) -> Analysis {
        Analyzer::new(&Config::default()).analyze(pair)
    }

    fn find<'a>(
        recs: &'a [Recommendation],
        side: Side,
        pred: impl Fn(&Action) -> bool,
    ) -> &'a Recommendation {
        recs.iter()
            .find(|r| r.side == side && pred(&r.action))
            .unwrap()
    }

    fn param<'a>(recs: &'a [Recommendation], side: Side, setting: &str) -> &'a Recommendation {
        find(recs, side, |a| {
            matches!(a, Action::ParameterChange { name, .. } if name == setting)
        })
    }

    #[test]
    fn compute_upgrade_leads_the_plan() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        let first = &recs[0];
        assert_eq!(first.id, "R1");
        assert_eq!(first.side, Side::Comparison);
        assert_eq!(
            first.action,
            Action::ComputeUpgrade {
                current: Some("B2s".to_string()),
                target: "E8ds_v5".to_string(),
            }
        );
        let delta = first.monthly_cost_delta.unwrap();
        assert!((delta - 610.28).abs() < 1e-6);
    }

    #[test]
    fn memory_tier_is_superseded_by_compute_upgrade() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        let memory = recs
            .iter()
            .find(|r| r.kind == IssueKind::InsufficientMemory && r.side == Side::Comparison)
            .filter(|r| matches!(r.action, Action::ComputeUpgrade { .. }))
            .unwrap();
        assert_eq!(
            memory.dependencies,
            vec![Dependency {
                relation: Relation::SupersededBy,
                id: "R1".to_string(),
            }]
        );
    }

    #[test]
    fn memory_parameters_follow_recommended_ram() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        let sb = param(&recs, Side::Comparison, "shared_buffers");
        assert_eq!(
            sb.action,
            Action::ParameterChange {
                name: "shared_buffers".to_string(),
                current: "128MB".to_string(),
                recommended: "16GB".to_string(),
            }
        );
        assert!(sb.dependencies.iter().any(|d| d.relation == Relation::InAdditionTo
            && d.id == "R1"));

        let ecs = param(&recs, Side::Comparison, "effective_cache_size");
        assert!(matches!(
            &ecs.action,
            Action::ParameterChange { recommended, .. } if recommended == "48GB"
        ));
    }

    #[test]
    fn unknown_current_tier_leaves_cost_unknown() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        let fast_tier = find(&recs, Side::Baseline, |a| {
            matches!(a, Action::ComputeUpgrade { .. })
        });
        assert_eq!(fast_tier.monthly_cost_delta, None);
        assert!(matches!(
            &fast_tier.action,
            Action::ComputeUpgrade { current: None, target } if target == "E4ds_v5"
        ));
    }

    #[test]
    fn storage_upgrade_meets_band() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        let storage = find(&recs, Side::Comparison, |a| {
            matches!(a, Action::StorageUpgrade { .. })
        });
        assert!(matches!(
            &storage.action,
            Action::StorageUpgrade { target, iops, .. } if target == "P30" && *iops >= 5000
        ));
        let delta = storage.monthly_cost_delta.unwrap();
        assert!((delta - 97.15).abs() < 1e-6);
    }

    #[test]
    fn drift_parameters_are_sized_for_the_planned_tier() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        // 64 GB * 25% / 200 connections
        assert!(matches!(
            &param(&recs, Side::Comparison, "work_mem").action,
            Action::ParameterChange { recommended, current, .. }
                if recommended == "81MB" && current == "4MB"
        ));
        assert!(matches!(
            &param(&recs, Side::Comparison, "random_page_cost").action,
            Action::ParameterChange { recommended, .. } if recommended == "1.1"
        ));
        assert!(matches!(
            &param(&recs, Side::Comparison, "effective_io_concurrency").action,
            Action::ParameterChange { recommended, .. } if recommended == "200"
        ));
    }

    #[test]
    fn structural_statements() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        let statements: Vec<String> = recs
            .iter()
            .filter(|r| r.side == Side::Comparison)
            .filter_map(|r| match &r.action {
                Action::IndexStatement { sql } => Some(sql.clone()),
                Action::Maintenance { statements } => Some(statements.join(" ")),
                _ => None,
            })
            .collect();

        assert!(statements.iter().any(|s| s.starts_with(
            "CREATE INDEX CONCURRENTLY audit_log_<column>_idx ON public.audit_log"
        )));
        assert!(statements.iter().any(|s| s.starts_with("DROP INDEX CONCURRENTLY public.")));
        assert!(statements.iter().any(|s| s.contains("VACUUM (ANALYZE) public.events;")));
    }

    #[test]
    fn long_query_policy_names_role_and_pid() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        let monitor = recs
            .iter()
            .find(|r| r.kind == IssueKind::LongRunningQuery)
            .unwrap();
        assert!(matches!(
            &monitor.action,
            Action::Monitoring { policy }
                if policy.contains("pg_terminate_backend(4242)")
                    && policy.contains("statement_timeout = '30min'")
        ));
    }

    #[test]
    fn long_query_policy_quotes_the_role() {
        let mut slow = scenarios::slow_server();
        if let Collected::Available(queries) = &mut slow.long_queries {
            queries[0].user = "ops\"; DROP ROLE app; --".to_string();
        }
        let pair = ComparativePair::new(scenarios::fast_server(), slow);
        let recs = analyze(&pair).recommendations;

        let policies: Vec<&str> = recs
            .iter()
            .filter_map(|r| match &r.action {
                Action::Monitoring { policy } => Some(policy.as_str()),
                _ => None,
            })
            .collect();
        assert!(policies.iter().any(|p| p.starts_with(
            "ALTER ROLE \"ops\"\"; DROP ROLE app; --\" SET statement_timeout"
        )));
        assert_eq!(quote_ident("monitoring"), "\"monitoring\"");
    }

    #[test]
    fn connection_pressure_recommends_pooling_and_leak_check() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        let pool = find(&recs, Side::Comparison, |a| {
            matches!(a, Action::ConnectionPooling { .. })
        });
        assert_eq!(pool.kind, IssueKind::ConnectionPressure);
        assert_eq!(pool.priority, Severity::Medium);
        assert!(pool.rationale.starts_with("120 of 200 connections open, 60 of them idle"));
        assert!(matches!(
            &pool.action,
            Action::ConnectionPooling { pooler, pool_mode, leak_check }
                if pooler == "PgBouncer"
                    && pool_mode == "transaction"
                    && leak_check.contains("state = 'idle'")
        ));
        assert!(!recs.iter().any(|r| r.side == Side::Baseline
            && matches!(r.action, Action::ConnectionPooling { .. })));
    }

    #[test]
    fn ids_are_sequential_and_priorities_descend() {
        let pair = ComparativePair::new(scenarios::fast_server(), scenarios::slow_server());
        let recs = analyze(&pair).recommendations;

        for (i, rec) in recs.iter().enumerate() {
            assert_eq!(rec.id, format!("R{}", i + 1));
        }
        for w in recs.windows(2) {
            assert!(w[0].priority >= w[1].priority);
        }
        let ids: Vec<&str> = recs.iter().map(|r| r.id.as_str()).collect();
        for rec in &recs {
            for dep in &rec.dependencies {
                assert!(ids.contains(&dep.id.as_str()));
            }
        }
    }

    #[test]
    fn memory_setting_units() {
        assert_eq!(memory_setting(16.0), "16GB");
        assert_eq!(memory_setting(1.5), "1536MB");
    }
}
