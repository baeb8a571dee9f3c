use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

use super::{RenderError, Report};
use crate::analysis::{Action, Recommendation, Severity};
use crate::fmt::{
    UNKNOWN, UNKNOWN_ASSUMED, cell, format_bytes, format_cost_delta, format_count,
    format_delta_pp, format_duration, format_epoch, format_pct, format_range_pct, format_ratio,
    or_unknown, truncate,
};
use crate::model::{Category, Collected, ComparativePair, ServerSnapshot, Side};

/// Parameters shown in the memory configuration table.
const MEMORY_PARAMETERS: [&str; 6] = [
    "shared_buffers",
    "effective_cache_size",
    "work_mem",
    "maintenance_work_mem",
    "effective_io_concurrency",
    "random_page_cost",
];

pub(super) fn render(report: &Report) -> Result<String, RenderError> {
    let mut md = String::with_capacity(32 * 1024);
    header(&mut md, report)?;
    availability(&mut md, report)?;
    executive_summary(&mut md, report)?;
    issue_details(&mut md, report)?;
    scale_comparison(&mut md, &report.pair)?;
    query_performance(&mut md, &report.pair)?;
    autovacuum(&mut md, &report.pair)?;
    memory_configuration(&mut md, report)?;
    root_causes(&mut md, report)?;
    action_plan(&mut md, report)?;
    expected_results(&mut md, report)?;
    cost_benefit(&mut md, report)?;
    appendix(&mut md, &report.pair)?;
    Ok(md)
}

// ============================================================
// Helpers
// ============================================================

fn table(md: &mut String, headers: &[&str], rows: &[Vec<String>]) -> fmt::Result {
    writeln!(md, "| {} |", headers.join(" | "))?;
    writeln!(md, "|{}", "---|".repeat(headers.len()))?;
    for row in rows {
        let cells: Vec<String> = row.iter().map(|c| cell(c)).collect();
        writeln!(md, "| {} |", cells.join(" | "))?;
    }
    writeln!(md)
}

fn labels(pair: &ComparativePair) -> [&str; 2] {
    [
        pair.baseline.identity.label.as_str(),
        pair.comparison.identity.label.as_str(),
    ]
}

/// `[label, server 1 value, server 2 value]`, unknown where `f` has nothing.
fn side_row(
    pair: &ComparativePair,
    label: &str,
    f: impl Fn(&ServerSnapshot) -> Option<String>,
) -> Vec<String> {
    let mut row = vec![label.to_string()];
    row.extend(Side::BOTH.iter().map(|&s| or_unknown(f(pair.get(s)), |v| v)));
    row
}

/// Like [`side_row`] plus a Server 2 / Server 1 ratio column.
fn scale_row(
    pair: &ComparativePair,
    label: &str,
    value: impl Fn(&ServerSnapshot) -> Option<f64>,
    show: impl Fn(f64) -> String,
) -> Vec<String> {
    let (a, b) = (value(&pair.baseline), value(&pair.comparison));
    let ratio = match (a, b) {
        (Some(a), Some(b)) if a > 0.0 => Some(format_ratio(b / a)),
        _ => None,
    };
    vec![
        label.to_string(),
        or_unknown(a, &show),
        or_unknown(b, &show),
        or_unknown(ratio, |r| r),
    ]
}

/// One line per side where `collected` is unavailable.
fn unavailable_lines<T>(
    md: &mut String,
    pair: &ComparativePair,
    collected: impl Fn(&ServerSnapshot) -> &Collected<T>,
) -> fmt::Result {
    for side in Side::BOTH {
        let snap = pair.get(side);
        if let Some(u) = collected(snap).unavailability() {
            writeln!(md, "- {}: {} ({})", snap.identity.label, UNKNOWN, u)?;
        }
    }
    Ok(())
}

fn compute_cell(snap: &ServerSnapshot) -> String {
    match &snap.compute {
        Some(c) => format!(
            "{} ({}, {} vCores, {} GB RAM)",
            c.id,
            c.class.label(),
            c.vcores,
            c.ram_gb
        ),
        None => UNKNOWN_ASSUMED.to_string(),
    }
}

fn storage_cell(snap: &ServerSnapshot) -> String {
    match &snap.storage {
        Some(s) => format!(
            "{} ({} IOPS, {} GB)",
            s.id,
            format_count(s.iops as i64),
            s.size_gb
        ),
        None => UNKNOWN_ASSUMED.to_string(),
    }
}

fn setting(snap: &ServerSnapshot, name: &str) -> Option<String> {
    snap.settings
        .get()
        .and_then(|s| s.display(name))
        .map(str::to_string)
}

fn side_label(report: &Report, side: Side) -> &str {
    report.pair.get(side).identity.label.as_str()
}

fn cost(report: &Report, rec: &Recommendation) -> String {
    or_unknown(rec.monthly_cost_delta, |d| {
        format_cost_delta(d, &report.currency)
    })
}

fn describe(action: &Action) -> String {
    match action {
        Action::ComputeUpgrade { current, target } => format!(
            "compute tier {} -> {}",
            current.as_deref().unwrap_or(UNKNOWN),
            target
        ),
        Action::StorageUpgrade {
            current,
            target,
            iops,
        } => format!(
            "storage tier {} -> {} ({} IOPS)",
            current.as_deref().unwrap_or(UNKNOWN),
            target,
            format_count(*iops as i64)
        ),
        Action::ParameterChange {
            name,
            current,
            recommended,
        } => format!("`ALTER SYSTEM SET {name} = '{recommended}';` (currently {current})"),
        Action::IndexStatement { sql } => format!("`{sql}`"),
        Action::Maintenance { statements } => statements
            .iter()
            .map(|s| format!("`{s}`"))
            .collect::<Vec<_>>()
            .join(" then "),
        Action::Monitoring { policy } => policy.clone(),
        Action::ConnectionPooling {
            pooler,
            pool_mode,
            leak_check,
        } => format!("{pooler} with pool_mode = {pool_mode}; find leaks with `{leak_check}`"),
    }
}

fn urgency(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "Immediate (CRITICAL)",
        Severity::High => "Short term (HIGH)",
        Severity::Medium => "Planned (MEDIUM)",
        Severity::Low => "Backlog (LOW)",
    }
}

// ============================================================
// Header & availability
// ============================================================

fn header(md: &mut String, report: &Report) -> fmt::Result {
    let pair = &report.pair;
    let l = labels(pair);

    writeln!(md, "# PostgreSQL Comparative Performance Report")?;
    writeln!(md)?;
    writeln!(
        md,
        "**Generated:** {}  ",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    writeln!(md, "**Tool:** pgcompare {}", report.tool_version)?;
    writeln!(md)?;

    writeln!(md, "## Server Information")?;
    writeln!(md)?;
    let rows = vec![
        side_row(pair, "Host", |s| Some(s.identity.host.clone())),
        side_row(pair, "Port", |s| Some(s.identity.port.to_string())),
        side_row(pair, "Database", |s| Some(s.identity.database.clone())),
        side_row(pair, "PostgreSQL version", |s| {
            s.settings.get().map(|v| v.server_version.clone())
        }),
        side_row(pair, "Compute tier", |s| Some(compute_cell(s))),
        side_row(pair, "Storage tier", |s| Some(storage_cell(s))),
        side_row(pair, "Database size", |s| {
            s.database_size.get().map(|d| format_bytes(d.bytes))
        }),
        side_row(pair, "Collected at", |s| {
            Some(format_epoch(Some(s.collected_at)))
        }),
    ];
    table(md, &["Property", l[0], l[1]], &rows)
}

fn availability(md: &mut String, report: &Report) -> fmt::Result {
    writeln!(md, "## Data Availability")?;
    writeln!(md)?;
    let unknowns = &report.analysis.unknowns;
    if unknowns.is_empty() {
        writeln!(md, "All inputs were collected on both servers.")?;
        return writeln!(md);
    }
    writeln!(
        md,
        "Sections relying on the inputs below are based on incomplete data; \
         missing values render as \"{}\" and are never estimated.",
        UNKNOWN
    )?;
    writeln!(md)?;
    let rows: Vec<Vec<String>> = unknowns
        .iter()
        .map(|u| {
            vec![
                side_label(report, u.side).to_string(),
                u.subject.clone(),
                u.reason.clone(),
            ]
        })
        .collect();
    table(md, &["Server", "Input", "Status"], &rows)
}

// ============================================================
// Summary & issues
// ============================================================

fn executive_summary(md: &mut String, report: &Report) -> fmt::Result {
    let pair = &report.pair;
    let a = &report.analysis;

    writeln!(md, "## Executive Summary")?;
    writeln!(md)?;
    match a.single_server {
        Some(side) => writeln!(
            md,
            "**Mode:** single-server ({} could not be reached; only {} was analyzed)",
            side_label(report, side.other()),
            side_label(report, side)
        )?,
        None => writeln!(md, "**Mode:** comparative")?,
    }
    writeln!(md)?;

    let merged: Vec<_> = a.causes.iter().flat_map(|c| c.issues.iter()).collect();
    if merged.is_empty() {
        writeln!(md, "No issues detected from the available data.")?;
    } else {
        let count = |s: Severity| merged.iter().filter(|i| i.severity == s).count();
        writeln!(
            md,
            "Found {} issues ({} critical, {} high, {} medium, {} low) across {} root causes; \
             {} recommendations.",
            merged.len(),
            count(Severity::Critical),
            count(Severity::High),
            count(Severity::Medium),
            count(Severity::Low),
            a.causes.len(),
            a.recommendations.len()
        )?;
        if let Some(top) = a.causes.first() {
            let sides: Vec<&str> = top.sides().into_iter().map(|s| side_label(report, s)).collect();
            writeln!(md)?;
            writeln!(
                md,
                "**Primary cause:** {} on {} ({}), {} of the performance gap.",
                top.kind.title(),
                sides.join(" and "),
                top.severity.label(),
                format_range_pct(top.impact.low as f64, top.impact.high as f64)
            )?;
        }
    }
    writeln!(md)?;

    let l = labels(pair);
    let mut rows = vec![
        vec![
            format!("Database size ratio ({} / {})", l[1], l[0]),
            or_unknown(pair.size_ratio(), format_ratio),
        ],
        vec![
            format!("Cache hit delta ({} - {})", l[1], l[0]),
            or_unknown(pair.cache_hit_delta(), format_delta_pp),
        ],
        vec![
            format!("Longest query ratio ({} / {})", l[1], l[0]),
            or_unknown(pair.longest_query_ratio(), format_ratio),
        ],
    ];
    for side in Side::BOTH {
        rows.push(vec![
            format!("IOPS per GB ({})", side_label(report, side)),
            or_unknown(pair.iops_per_gb(side), |v| format!("{:.2}", v)),
        ]);
    }
    table(md, &["Key metric", "Value"], &rows)
}

fn issue_details(md: &mut String, report: &Report) -> fmt::Result {
    writeln!(md, "## Issue Details")?;
    writeln!(md)?;
    if report.analysis.causes.is_empty() {
        writeln!(md, "No issues detected.")?;
        return writeln!(md);
    }
    for cause in &report.analysis.causes {
        for issue in &cause.issues {
            writeln!(
                md,
                "### {}. {}: {}",
                cause.rank,
                cause.kind.title(),
                side_label(report, issue.side)
            )?;
            writeln!(md)?;
            writeln!(md, "- **Severity:** {}", issue.severity.label())?;
            writeln!(md, "- **Problem:** {}", issue.title)?;
            writeln!(
                md,
                "- **Estimated impact:** {}",
                format_range_pct(cause.impact.low as f64, cause.impact.high as f64)
            )?;
            writeln!(md)?;
            let rows: Vec<Vec<String>> = issue
                .evidence
                .iter()
                .map(|e| vec![e.label.clone(), e.value.clone()])
                .collect();
            table(md, &["Evidence", "Value"], &rows)?;
        }
    }
    Ok(())
}

// ============================================================
// Comparison sections
// ============================================================

fn scale_comparison(md: &mut String, pair: &ComparativePair) -> fmt::Result {
    let l = labels(pair);
    writeln!(md, "## Scale Comparison")?;
    writeln!(md)?;
    let count = |v: f64| format_count(v as i64);
    let rows = vec![
        scale_row(
            pair,
            "Database size",
            |s| s.database_size.get().map(|d| d.bytes as f64),
            |v| format_bytes(v as i64),
        ),
        scale_row(
            pair,
            "Tables",
            |s| s.tables.get().map(|t| t.total_tables as f64),
            count,
        ),
        scale_row(
            pair,
            "Indexes",
            |s| s.indexes.get().map(|i| i.total_indexes as f64),
            count,
        ),
        scale_row(
            pair,
            "Max connections",
            |s| s.connections.get().map(|c| c.max_connections as f64),
            count,
        ),
        scale_row(
            pair,
            "Current connections",
            |s| s.connections.get().map(|c| c.current as f64),
            count,
        ),
        scale_row(
            pair,
            "Connection usage",
            |s| s.connections.get().and_then(|c| c.usage_pct()),
            format_pct,
        ),
        scale_row(
            pair,
            "Unused index share",
            |s| s.indexes.get().and_then(|i| i.unused_pct()),
            format_pct,
        ),
        scale_row(pair, "Compute RAM", ServerSnapshot::ram_gb, |v| {
            format!("{} GB", v)
        }),
        scale_row(
            pair,
            "vCores",
            |s| s.compute.as_ref().map(|c| c.vcores as f64),
            count,
        ),
        scale_row(
            pair,
            "Provisioned IOPS",
            |s| s.storage.as_ref().map(|st| st.iops as f64),
            count,
        ),
        scale_row(pair, "IOPS per GB", ServerSnapshot::iops_per_gb, |v| {
            format!("{:.2}", v)
        }),
        scale_row(pair, "Cache hit ratio", ServerSnapshot::heap_hit_pct, format_pct),
    ];
    let ratio = format!("Ratio ({} / {})", l[1], l[0]);
    table(md, &["Metric", l[0], l[1], ratio.as_str()], &rows)
}

fn query_performance(md: &mut String, pair: &ComparativePair) -> fmt::Result {
    let l = labels(pair);
    writeln!(md, "## Query Performance Analysis")?;
    writeln!(md)?;
    let rows = vec![
        side_row(pair, "Longest running query", |s| {
            s.longest_query_secs().map(format_duration)
        }),
        side_row(pair, "Active sessions", |s| {
            s.active_queries.get().map(|q| q.len().to_string())
        }),
        side_row(pair, "Blocked sessions", |s| {
            s.locks.get().map(|lk| format_count(lk.blocked))
        }),
    ];
    table(md, &["Metric", l[0], l[1]], &rows)?;
    writeln!(
        md,
        "Longest query ratio ({} / {}): {}",
        l[1],
        l[0],
        or_unknown(pair.longest_query_ratio(), format_ratio)
    )?;
    writeln!(md)?;

    active_queries(md, pair)?;

    writeln!(md, "### {}", Category::LongQueries.title())?;
    writeln!(md)?;
    unavailable_lines(md, pair, |s| &s.long_queries)?;
    let mut rows = Vec::new();
    for side in Side::BOTH {
        let snap = pair.get(side);
        for q in snap.long_queries.get().into_iter().flatten() {
            rows.push(vec![
                snap.identity.label.clone(),
                q.pid.to_string(),
                q.user.clone(),
                q.state.clone(),
                format_duration(q.duration_secs),
                truncate(&q.query, 80),
            ]);
        }
    }
    if rows.is_empty() {
        writeln!(md, "None recorded.")?;
        writeln!(md)?;
    } else {
        writeln!(md)?;
        table(
            md,
            &["Server", "PID", "User", "State", "Duration", "Query"],
            &rows,
        )?;
    }

    writeln!(md, "### {}", Category::QueryIssues.title())?;
    writeln!(md)?;
    unavailable_lines(md, pair, |s| &s.query_issues)?;
    let mut rows = Vec::new();
    for side in Side::BOTH {
        let snap = pair.get(side);
        for p in snap.query_issues.get().into_iter().flatten() {
            rows.push(vec![
                snap.identity.label.clone(),
                format!("{}.{}", p.schema, p.table),
                format_count(p.seq_scan),
                format_count(p.idx_scan),
                p.index_count.to_string(),
                format_count(p.live_rows),
                format_bytes(p.size_bytes),
            ]);
        }
    }
    if rows.is_empty() {
        writeln!(md, "None recorded.")?;
        writeln!(md)
    } else {
        writeln!(md)?;
        table(
            md,
            &[
                "Server",
                "Table",
                "Seq scans",
                "Index scans",
                "Indexes",
                "Live rows",
                "Size",
            ],
            &rows,
        )
    }
}

/// Sessions running at collection time, one block per server.
fn active_queries(md: &mut String, pair: &ComparativePair) -> fmt::Result {
    writeln!(md, "### {} Now", Category::ActiveQueries.title())?;
    writeln!(md)?;
    for side in Side::BOTH {
        let snap = pair.get(side);
        let label = &snap.identity.label;
        match &snap.active_queries {
            Collected::Unavailable(u) => {
                writeln!(md, "- {}: {} ({})", label, UNKNOWN, u)?;
                writeln!(md)?;
            }
            Collected::Available(queries) if queries.is_empty() => {
                writeln!(md, "{}: no active queries.", label)?;
                writeln!(md)?;
            }
            Collected::Available(queries) => {
                writeln!(md, "{} ({} active):", label, queries.len())?;
                writeln!(md)?;
                let rows: Vec<Vec<String>> = queries
                    .iter()
                    .map(|q| {
                        vec![
                            q.pid.to_string(),
                            q.user.clone(),
                            q.state.clone(),
                            format_duration(q.duration_secs),
                            truncate(&q.query, 60),
                        ]
                    })
                    .collect();
                table(md, &["PID", "User", "State", "Duration", "Query"], &rows)?;
            }
        }
    }
    Ok(())
}

fn autovacuum(md: &mut String, pair: &ComparativePair) -> fmt::Result {
    let l = labels(pair);
    writeln!(md, "## Autovacuum Analysis")?;
    writeln!(md)?;
    let rows = vec![
        side_row(pair, "Autovacuum runs", |s| {
            s.autovacuum.get().map(|a| format_count(a.total_autovacuum_count))
        }),
        side_row(pair, "Autoanalyze runs", |s| {
            s.autovacuum.get().map(|a| format_count(a.total_autoanalyze_count))
        }),
        side_row(pair, "Latest autovacuum", |s| {
            s.autovacuum.get().map(|a| format_epoch(a.latest_autovacuum))
        }),
        side_row(pair, "autovacuum_max_workers", |s| {
            setting(s, "autovacuum_max_workers")
        }),
        side_row(pair, "autovacuum_naptime", |s| setting(s, "autovacuum_naptime")),
        side_row(pair, "autovacuum_vacuum_cost_limit", |s| {
            setting(s, "autovacuum_vacuum_cost_limit")
        }),
    ];
    table(md, &["Metric", l[0], l[1]], &rows)?;

    writeln!(md, "### Recently vacuumed tables")?;
    writeln!(md)?;
    unavailable_lines(md, pair, |s| &s.autovacuum)?;
    let mut rows = Vec::new();
    for side in Side::BOTH {
        let snap = pair.get(side);
        for t in snap.autovacuum.get().iter().flat_map(|a| a.tables.iter()) {
            rows.push(vec![
                snap.identity.label.clone(),
                format!("{}.{}", t.schema, t.table),
                format_epoch(t.last_autovacuum),
                format_count(t.autovacuum_count),
                format_epoch(t.last_autoanalyze),
                format_count(t.autoanalyze_count),
            ]);
        }
    }
    if rows.is_empty() {
        writeln!(md, "None recorded.")?;
        writeln!(md)
    } else {
        writeln!(md)?;
        table(
            md,
            &[
                "Server",
                "Table",
                "Last autovacuum",
                "Autovacuum runs",
                "Last autoanalyze",
                "Autoanalyze runs",
            ],
            &rows,
        )
    }
}

fn memory_configuration(md: &mut String, report: &Report) -> fmt::Result {
    let pair = &report.pair;
    let l = labels(pair);
    writeln!(md, "## Memory Configuration")?;
    writeln!(md)?;

    let recommended = |side: Side, name: &str| {
        report
            .analysis
            .recommendations
            .iter()
            .filter(|r| r.side == side)
            .find_map(|r| match &r.action {
                Action::ParameterChange {
                    name: n,
                    recommended,
                    ..
                } if n == name => Some(format!("{} ({})", recommended, r.id)),
                _ => None,
            })
            .unwrap_or_else(|| "no change".to_string())
    };

    let mut rows = vec![vec![
        "Compute RAM".to_string(),
        or_unknown(pair.baseline.ram_gb(), |v| format!("{} GB", v)),
        or_unknown(pair.comparison.ram_gb(), |v| format!("{} GB", v)),
        "-".to_string(),
        "-".to_string(),
    ]];
    if pair.baseline.compute.is_none() {
        rows[0][1] = UNKNOWN_ASSUMED.to_string();
    }
    if pair.comparison.compute.is_none() {
        rows[0][2] = UNKNOWN_ASSUMED.to_string();
    }
    for name in MEMORY_PARAMETERS {
        rows.push(vec![
            name.to_string(),
            or_unknown(setting(&pair.baseline, name), |v| v),
            or_unknown(setting(&pair.comparison, name), |v| v),
            recommended(Side::Baseline, name),
            recommended(Side::Comparison, name),
        ]);
    }
    let level = |snap: &ServerSnapshot| {
        or_unknown(
            snap.settings.get().and_then(|s| s.shared_buffers_level()),
            |l| l.label().to_string(),
        )
    };
    rows.insert(
        2,
        vec![
            "shared_buffers level".to_string(),
            level(&pair.baseline),
            level(&pair.comparison),
            "-".to_string(),
            "-".to_string(),
        ],
    );
    let rec_a = format!("Recommended ({})", l[0]);
    let rec_b = format!("Recommended ({})", l[1]);
    table(
        md,
        &["Parameter", l[0], l[1], rec_a.as_str(), rec_b.as_str()],
        &rows,
    )
}

// ============================================================
// Causes, actions, results
// ============================================================

fn root_causes(md: &mut String, report: &Report) -> fmt::Result {
    writeln!(md, "## Root Cause Breakdown")?;
    writeln!(md)?;
    let causes = &report.analysis.causes;
    if causes.is_empty() {
        writeln!(md, "No root causes identified.")?;
        return writeln!(md);
    }
    let rows: Vec<Vec<String>> = causes
        .iter()
        .map(|c| {
            let sides: Vec<&str> = c.sides().into_iter().map(|s| side_label(report, s)).collect();
            vec![
                c.rank.to_string(),
                c.kind.title().to_string(),
                c.severity.label().to_string(),
                sides.join(", "),
                format_range_pct(c.impact.low as f64, c.impact.high as f64),
            ]
        })
        .collect();
    table(
        md,
        &["Rank", "Cause", "Severity", "Affected servers", "Impact"],
        &rows,
    )?;
    let midpoints: f64 = causes.iter().map(|c| c.impact.midpoint()).sum();
    writeln!(
        md,
        "Impact ranges are estimates; their midpoints sum to {}.",
        format_pct(midpoints)
    )?;
    writeln!(md)
}

fn action_plan(md: &mut String, report: &Report) -> fmt::Result {
    writeln!(md, "## Action Plan")?;
    writeln!(md)?;
    let recs = &report.analysis.recommendations;
    if recs.is_empty() {
        writeln!(md, "No actions recommended.")?;
        return writeln!(md);
    }
    for severity in [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ] {
        let group: Vec<&Recommendation> = recs.iter().filter(|r| r.priority == severity).collect();
        if group.is_empty() {
            continue;
        }
        writeln!(md, "### {}", urgency(severity))?;
        writeln!(md)?;
        for rec in group {
            writeln!(md, "- **{}** {}", rec.id, rec.title)?;
            writeln!(md, "  - Action: {}", describe(&rec.action))?;
            writeln!(md, "  - Rationale: {}", rec.rationale)?;
            writeln!(
                md,
                "  - Expected improvement: {}; monthly cost: {}",
                format_range_pct(rec.improvement.low as f64, rec.improvement.high as f64),
                cost(report, rec)
            )?;
            if !rec.dependencies.is_empty() {
                let deps: Vec<String> = rec
                    .dependencies
                    .iter()
                    .map(|d| format!("{} {}", d.relation.label(), d.id))
                    .collect();
                writeln!(md, "  - Depends: {}", deps.join(", "))?;
            }
        }
        writeln!(md)?;
    }
    Ok(())
}

fn expected_results(md: &mut String, report: &Report) -> fmt::Result {
    writeln!(md, "## Expected Results")?;
    writeln!(md)?;
    let a = &report.analysis;
    let covered: Vec<_> = a
        .causes
        .iter()
        .map(|c| {
            let ids: Vec<&str> = a
                .recommendations
                .iter()
                .filter(|r| r.kind == c.kind)
                .map(|r| r.id.as_str())
                .collect();
            (c, ids)
        })
        .filter(|(_, ids)| !ids.is_empty())
        .collect();
    if covered.is_empty() {
        writeln!(md, "No improvement projected.")?;
        return writeln!(md);
    }

    let rows: Vec<Vec<String>> = covered
        .iter()
        .map(|(c, ids)| {
            vec![
                c.kind.title().to_string(),
                format_range_pct(c.impact.low as f64, c.impact.high as f64),
                ids.join(", "),
            ]
        })
        .collect();
    table(md, &["Cause", "Expected improvement", "Actions"], &rows)?;

    let low: u32 = covered.iter().map(|(c, _)| c.impact.low).sum();
    let high: u32 = covered.iter().map(|(c, _)| c.impact.high).sum();
    writeln!(
        md,
        "Combined expected improvement if every action is applied: {} of the observed gap.",
        format_range_pct(low.min(100) as f64, high.min(100) as f64)
    )?;
    writeln!(md)
}

fn cost_benefit(md: &mut String, report: &Report) -> fmt::Result {
    writeln!(md, "## Cost-Benefit Analysis")?;
    writeln!(md)?;
    let recs = &report.analysis.recommendations;
    if recs.is_empty() {
        writeln!(md, "No actions recommended.")?;
        return writeln!(md);
    }
    let rows: Vec<Vec<String>> = recs
        .iter()
        .map(|r| {
            vec![
                r.id.clone(),
                r.title.clone(),
                r.priority.label().to_string(),
                cost(report, r),
                format_range_pct(r.improvement.low as f64, r.improvement.high as f64),
            ]
        })
        .collect();
    table(
        md,
        &[
            "ID",
            "Recommendation",
            "Priority",
            "Monthly cost",
            "Expected improvement",
        ],
        &rows,
    )?;

    let known: f64 = recs.iter().filter_map(|r| r.monthly_cost_delta).sum();
    let unknown = recs.iter().filter(|r| r.monthly_cost_delta.is_none()).count();
    write!(
        md,
        "Total known monthly cost delta: {}",
        format_cost_delta(known, &report.currency)
    )?;
    if unknown > 0 {
        write!(
            md,
            " (excludes {} recommendations with {} cost)",
            unknown, UNKNOWN
        )?;
    }
    writeln!(md, ".")?;
    writeln!(md)
}

// ============================================================
// Appendix
// ============================================================

fn appendix(md: &mut String, pair: &ComparativePair) -> fmt::Result {
    let l = labels(pair);
    writeln!(md, "## Appendix: Raw Metrics")?;
    writeln!(md)?;

    writeln!(md, "### {}", Category::Settings.title())?;
    writeln!(md)?;
    unavailable_lines(md, pair, |s| &s.settings)?;
    let names: BTreeSet<&str> = Side::BOTH
        .iter()
        .filter_map(|&s| pair.get(s).settings.get())
        .flat_map(|s| s.entries.keys().map(String::as_str))
        .collect();
    if names.is_empty() {
        writeln!(md, "{}", UNKNOWN)?;
        writeln!(md)?;
    } else {
        writeln!(md)?;
        let rows: Vec<Vec<String>> = names
            .iter()
            .map(|name| side_row(pair, name, |s| setting(s, name)))
            .collect();
        table(md, &["Parameter", l[0], l[1]], &rows)?;
    }

    writeln!(md, "### {}", Category::Connections.title())?;
    writeln!(md)?;
    let rows = vec![
        side_row(pair, "Max connections", |s| {
            s.connections.get().map(|c| format_count(c.max_connections))
        }),
        side_row(pair, "Current", |s| {
            s.connections.get().map(|c| format_count(c.current))
        }),
        side_row(pair, "Active", |s| {
            s.connections.get().map(|c| format_count(c.active))
        }),
        side_row(pair, "Idle", |s| s.connections.get().map(|c| format_count(c.idle))),
        side_row(pair, "Usage", |s| {
            s.connections.get().and_then(|c| c.usage_pct()).map(format_pct)
        }),
    ];
    table(md, &["Metric", l[0], l[1]], &rows)?;

    writeln!(md, "### {}", Category::Cache.title())?;
    writeln!(md)?;
    let rows = vec![
        side_row(pair, "Heap blocks read", |s| {
            s.cache.get().map(|c| format_count(c.heap_blks_read))
        }),
        side_row(pair, "Heap blocks hit", |s| {
            s.cache.get().map(|c| format_count(c.heap_blks_hit))
        }),
        side_row(pair, "Heap hit ratio", |s| s.heap_hit_pct().map(format_pct)),
        side_row(pair, "Index blocks read", |s| {
            s.cache.get().map(|c| format_count(c.idx_blks_read))
        }),
        side_row(pair, "Index blocks hit", |s| {
            s.cache.get().map(|c| format_count(c.idx_blks_hit))
        }),
        side_row(pair, "Index hit ratio", |s| {
            s.cache.get().and_then(|c| c.index_hit_pct()).map(format_pct)
        }),
    ];
    table(md, &["Metric", l[0], l[1]], &rows)?;

    writeln!(md, "### {}", Category::DatabaseSize.title())?;
    writeln!(md)?;
    let rows = vec![
        side_row(pair, "Size", |s| {
            s.database_size.get().map(|d| format_bytes(d.bytes))
        }),
        side_row(pair, "Bytes", |s| {
            s.database_size.get().map(|d| format_count(d.bytes))
        }),
    ];
    table(md, &["Metric", l[0], l[1]], &rows)?;

    writeln!(md, "### {}", Category::Tables.title())?;
    writeln!(md)?;
    let rows = vec![
        side_row(pair, "Tables", |s| {
            s.tables.get().map(|t| format_count(t.total_tables))
        }),
        side_row(pair, "Average live rows", |s| {
            s.tables.get().map(|t| format!("{:.2}", t.avg_live_rows))
        }),
        side_row(pair, "Max live rows", |s| {
            s.tables.get().map(|t| format_count(t.max_live_rows))
        }),
        side_row(pair, "Average dead rows", |s| {
            s.tables.get().map(|t| format!("{:.2}", t.avg_dead_rows))
        }),
        side_row(pair, "Total dead rows", |s| {
            s.tables.get().map(|t| format_count(t.total_dead_rows))
        }),
    ];
    table(md, &["Metric", l[0], l[1]], &rows)?;

    writeln!(md, "### {}", Category::Indexes.title())?;
    writeln!(md)?;
    let rows = vec![
        side_row(pair, "Indexes", |s| {
            s.indexes.get().map(|i| format_count(i.total_indexes))
        }),
        side_row(pair, "Unused indexes", |s| {
            s.indexes.get().map(|i| format_count(i.unused_indexes))
        }),
        side_row(pair, "Unused share", |s| {
            s.indexes.get().and_then(|i| i.unused_pct()).map(format_pct)
        }),
        side_row(pair, "Average scans", |s| {
            s.indexes.get().map(|i| format!("{:.2}", i.avg_scans))
        }),
    ];
    table(md, &["Metric", l[0], l[1]], &rows)?;
    let mut rows = Vec::new();
    for side in Side::BOTH {
        let snap = pair.get(side);
        for i in snap.indexes.get().iter().flat_map(|i| i.unused.iter()) {
            rows.push(vec![
                snap.identity.label.clone(),
                format!("{}.{}", i.schema, i.index),
                i.table.clone(),
                format_bytes(i.size_bytes),
                if i.unique { "yes" } else { "no" }.to_string(),
            ]);
        }
    }
    if !rows.is_empty() {
        table(md, &["Server", "Unused index", "Table", "Size", "Unique"], &rows)?;
    }

    writeln!(md, "### {}", Category::Locks.title())?;
    writeln!(md)?;
    let rows = vec![
        side_row(pair, "Blocked", |s| s.locks.get().map(|lk| format_count(lk.blocked))),
        side_row(pair, "Active", |s| s.locks.get().map(|lk| format_count(lk.active))),
        side_row(pair, "Waiting queries", |s| {
            s.locks.get().map(|lk| format_count(lk.waiting_queries))
        }),
    ];
    table(md, &["Metric", l[0], l[1]], &rows)?;

    writeln!(md, "### {}", Category::Bloat.title())?;
    writeln!(md)?;
    unavailable_lines(md, pair, |s| &s.bloat)?;
    let mut rows = Vec::new();
    for side in Side::BOTH {
        let snap = pair.get(side);
        for b in snap.bloat.get().into_iter().flatten() {
            rows.push(vec![
                snap.identity.label.clone(),
                format!("{}.{}", b.schema, b.table),
                format_count(b.live_rows),
                format_count(b.dead_rows),
                or_unknown(b.dead_pct(), format_pct),
                format_bytes(b.size_bytes),
            ]);
        }
    }
    if rows.is_empty() {
        writeln!(md, "None recorded.")?;
    } else {
        writeln!(md)?;
        table(
            md,
            &["Server", "Table", "Live rows", "Dead rows", "Dead %", "Size"],
            &rows,
        )?;
    }
    Ok(())
}
