//! SQL for the catalog and statistics views read per category.
//!
//! Aggregates are cast explicitly (`::bigint`, `::float8`) because `sum()` and
//! `avg()` return `numeric`, which the client does not decode into integers.

/// Parameters read from `pg_settings`. Anything the analysis or the report
/// looks at must be listed here.
pub(super) const SETTINGS_NAMES: &[&str] = &[
    "server_version",
    "server_version_num",
    "max_connections",
    "shared_buffers",
    "effective_cache_size",
    "work_mem",
    "maintenance_work_mem",
    "random_page_cost",
    "effective_io_concurrency",
    "synchronous_commit",
    "wal_level",
    "statement_timeout",
    "autovacuum",
    "autovacuum_max_workers",
    "autovacuum_naptime",
    "autovacuum_vacuum_cost_limit",
    "autovacuum_vacuum_scale_factor",
];

pub(super) const PROBE_QUERY: &str = "SELECT current_setting('server_version_num')::int";

pub(super) fn build_settings_query() -> String {
    let names = SETTINGS_NAMES
        .iter()
        .map(|n| format!("'{n}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"
            SELECT
                name,
                COALESCE(setting, '') as setting,
                COALESCE(unit, '') as unit,
                current_setting(name) as display
            FROM pg_settings
            WHERE name IN ({names})
            ORDER BY name
        "#
    )
}

/// Client backends only on PG 10+, where `backend_type` exists.
fn client_backend_filter(server_version_num: Option<i32>) -> &'static str {
    if server_version_num.unwrap_or(0) >= 100000 {
        "AND backend_type = 'client backend'"
    } else {
        ""
    }
}

pub(super) fn build_connections_query(server_version_num: Option<i32>) -> String {
    let filter = client_backend_filter(server_version_num);
    format!(
        r#"
            SELECT
                current_setting('max_connections')::bigint as max_connections,
                count(*)::bigint as current,
                count(*) FILTER (WHERE state = 'active')::bigint as active,
                count(*) FILTER (WHERE state = 'idle')::bigint as idle
            FROM pg_stat_activity
            WHERE true {filter}
        "#
    )
}

pub(super) const CACHE_QUERY: &str = r#"
    SELECT
        COALESCE(sum(heap_blks_read), 0)::bigint as heap_blks_read,
        COALESCE(sum(heap_blks_hit), 0)::bigint as heap_blks_hit,
        COALESCE(sum(idx_blks_read), 0)::bigint as idx_blks_read,
        COALESCE(sum(idx_blks_hit), 0)::bigint as idx_blks_hit
    FROM pg_statio_user_tables
"#;

pub(super) const DATABASE_SIZE_QUERY: &str =
    "SELECT pg_database_size(current_database())::bigint as bytes";

pub(super) const TABLES_QUERY: &str = r#"
    SELECT
        count(*)::bigint as total_tables,
        COALESCE(avg(n_live_tup), 0)::float8 as avg_live_rows,
        COALESCE(max(n_live_tup), 0)::bigint as max_live_rows,
        COALESCE(avg(n_dead_tup), 0)::float8 as avg_dead_rows,
        COALESCE(sum(n_dead_tup), 0)::bigint as total_dead_rows
    FROM pg_stat_user_tables
"#;

pub(super) const INDEX_SUMMARY_QUERY: &str = r#"
    SELECT
        count(*)::bigint as total_indexes,
        count(*) FILTER (WHERE idx_scan = 0)::bigint as unused_indexes,
        COALESCE(avg(idx_scan), 0)::float8 as avg_scans
    FROM pg_stat_user_indexes
"#;

pub(super) const UNUSED_INDEXES_QUERY: &str = r#"
    SELECT
        s.schemaname,
        s.relname,
        s.indexrelname,
        s.idx_scan::bigint,
        pg_relation_size(s.indexrelid)::bigint as size_bytes,
        i.indisunique
    FROM pg_stat_user_indexes s
    JOIN pg_index i ON i.indexrelid = s.indexrelid
    WHERE s.idx_scan = 0
    ORDER BY pg_relation_size(s.indexrelid) DESC
    LIMIT 20
"#;

/// `wait_event_type` replaced the boolean `waiting` column in 9.6.
pub(super) fn build_locks_query(server_version_num: Option<i32>) -> String {
    let waiting = if server_version_num.unwrap_or(0) >= 90600 {
        "wait_event_type IS NOT NULL AND state <> 'idle'"
    } else {
        "waiting"
    };
    format!(
        r#"
            SELECT
                (SELECT count(*) FROM pg_locks WHERE NOT granted)::bigint as blocked,
                (SELECT count(*) FROM pg_locks WHERE granted)::bigint as active,
                (SELECT count(*) FROM pg_stat_activity WHERE {waiting})::bigint as waiting_queries
        "#
    )
}

pub(super) fn build_active_queries_query(server_version_num: Option<i32>) -> String {
    let filter = client_backend_filter(server_version_num);
    format!(
        r#"
            SELECT
                pid,
                COALESCE(usename, '') as usename,
                COALESCE(state, '') as state,
                COALESCE(EXTRACT(EPOCH FROM (now() - query_start)), 0)::float8 as duration_secs,
                LEFT(COALESCE(query, ''), 150) as query
            FROM pg_stat_activity
            WHERE state = 'active' AND pid <> pg_backend_pid() {filter}
            ORDER BY query_start ASC
            LIMIT 20
        "#
    )
}

pub(super) fn build_long_queries_query(server_version_num: Option<i32>) -> String {
    let filter = client_backend_filter(server_version_num);
    format!(
        r#"
            SELECT
                pid,
                COALESCE(usename, '') as usename,
                COALESCE(state, '') as state,
                EXTRACT(EPOCH FROM (now() - query_start))::float8 as duration_secs,
                LEFT(COALESCE(query, ''), 150) as query
            FROM pg_stat_activity
            WHERE pid <> pg_backend_pid() AND query_start IS NOT NULL {filter}
            ORDER BY query_start ASC
            LIMIT 10
        "#
    )
}

pub(super) const BLOAT_QUERY: &str = r#"
    SELECT
        schemaname,
        relname,
        n_live_tup::bigint,
        n_dead_tup::bigint,
        pg_total_relation_size(relid)::bigint as size_bytes
    FROM pg_stat_user_tables
    WHERE n_dead_tup > 1000
    ORDER BY n_dead_tup DESC
    LIMIT 10
"#;

pub(super) const SCAN_PROFILE_QUERY: &str = r#"
    SELECT
        t.schemaname,
        t.relname,
        COALESCE(t.seq_scan, 0)::bigint as seq_scan,
        COALESCE(t.idx_scan, 0)::bigint as idx_scan,
        (SELECT count(*) FROM pg_index i WHERE i.indrelid = t.relid)::bigint as index_count,
        t.n_live_tup::bigint,
        pg_total_relation_size(t.relid)::bigint as size_bytes
    FROM pg_stat_user_tables t
    WHERE COALESCE(t.seq_scan, 0) - COALESCE(t.idx_scan, 0) > 0
    ORDER BY t.seq_scan DESC
    LIMIT 15
"#;

pub(super) const AUTOVACUUM_TOTALS_QUERY: &str = r#"
    SELECT
        COALESCE(sum(autovacuum_count), 0)::bigint,
        COALESCE(sum(autoanalyze_count), 0)::bigint,
        EXTRACT(EPOCH FROM max(last_autovacuum))::bigint
    FROM pg_stat_user_tables
"#;

pub(super) const AUTOVACUUM_TABLES_QUERY: &str = r#"
    SELECT
        schemaname,
        relname,
        EXTRACT(EPOCH FROM last_vacuum)::bigint,
        EXTRACT(EPOCH FROM last_autovacuum)::bigint,
        EXTRACT(EPOCH FROM last_analyze)::bigint,
        EXTRACT(EPOCH FROM last_autoanalyze)::bigint,
        vacuum_count::bigint,
        autovacuum_count::bigint,
        analyze_count::bigint,
        autoanalyze_count::bigint
    FROM pg_stat_user_tables
    ORDER BY last_autovacuum DESC NULLS LAST
    LIMIT 10
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_query_lists_every_name() {
        let sql = build_settings_query();
        for name in SETTINGS_NAMES {
            assert!(sql.contains(&format!("'{name}'")), "missing {name}");
        }
    }

    #[test]
    fn backend_type_filter_only_on_pg10_and_later() {
        assert!(build_active_queries_query(Some(160002)).contains("backend_type"));
        assert!(!build_active_queries_query(Some(90624)).contains("backend_type"));
        assert!(!build_connections_query(None).contains("backend_type"));
    }

    #[test]
    fn locks_query_uses_waiting_column_before_96() {
        assert!(build_locks_query(Some(90500)).contains("WHERE waiting"));
        assert!(build_locks_query(Some(150000)).contains("wait_event_type"));
    }

    #[test]
    fn aggregates_are_cast() {
        assert!(CACHE_QUERY.contains("sum(heap_blks_hit), 0)::bigint"));
        assert!(TABLES_QUERY.contains("avg(n_live_tup), 0)::float8"));
    }
}
