//! Row decoding for each metric category.
//!
//! Columns are read by position with `try_get` so that an unexpected type
//! becomes a query error instead of a panic.

use std::collections::BTreeMap;

use postgres::{Client, Row};

use super::queries;
use crate::model::{
    AutovacuumStats, BloatEntry, CacheStats, ConnectionStats, DatabaseSize, IndexStats,
    IndexUsage, LockStats, PgSetting, ScanProfile, SessionQuery, Settings, TableSummary,
    VacuumStats,
};

type PgResult<T> = Result<T, postgres::Error>;

pub(super) fn settings(client: &mut Client) -> PgResult<Settings> {
    let rows = client.query(&queries::build_settings_query(), &[])?;
    let mut entries = BTreeMap::new();
    for row in &rows {
        let entry = PgSetting {
            name: row.try_get(0)?,
            setting: row.try_get(1)?,
            unit: row.try_get(2)?,
            display: row.try_get(3)?,
        };
        entries.insert(entry.name.clone(), entry);
    }
    Ok(settings_from_entries(entries))
}

fn settings_from_entries(entries: BTreeMap<String, PgSetting>) -> Settings {
    let server_version = entries
        .get("server_version")
        .map(|s| s.setting.clone())
        .unwrap_or_default();
    let server_version_num = entries
        .get("server_version_num")
        .and_then(|s| s.setting.parse().ok());
    Settings {
        server_version,
        server_version_num,
        entries,
    }
}

pub(super) fn connections(client: &mut Client, v: Option<i32>) -> PgResult<ConnectionStats> {
    let row = client.query_one(&queries::build_connections_query(v), &[])?;
    Ok(ConnectionStats {
        max_connections: row.try_get(0)?,
        current: row.try_get(1)?,
        active: row.try_get(2)?,
        idle: row.try_get(3)?,
    })
}

pub(super) fn cache(client: &mut Client) -> PgResult<CacheStats> {
    let row = client.query_one(queries::CACHE_QUERY, &[])?;
    Ok(CacheStats {
        heap_blks_read: row.try_get(0)?,
        heap_blks_hit: row.try_get(1)?,
        idx_blks_read: row.try_get(2)?,
        idx_blks_hit: row.try_get(3)?,
    })
}

pub(super) fn database_size(client: &mut Client) -> PgResult<DatabaseSize> {
    let row = client.query_one(queries::DATABASE_SIZE_QUERY, &[])?;
    Ok(DatabaseSize {
        bytes: row.try_get(0)?,
    })
}

pub(super) fn tables(client: &mut Client) -> PgResult<TableSummary> {
    let row = client.query_one(queries::TABLES_QUERY, &[])?;
    Ok(TableSummary {
        total_tables: row.try_get(0)?,
        avg_live_rows: row.try_get(1)?,
        max_live_rows: row.try_get(2)?,
        avg_dead_rows: row.try_get(3)?,
        total_dead_rows: row.try_get(4)?,
    })
}

pub(super) fn indexes(client: &mut Client) -> PgResult<IndexStats> {
    let summary = client.query_one(queries::INDEX_SUMMARY_QUERY, &[])?;
    let unused = client
        .query(queries::UNUSED_INDEXES_QUERY, &[])?
        .iter()
        .map(|row| {
            Ok(IndexUsage {
                schema: row.try_get(0)?,
                table: row.try_get(1)?,
                index: row.try_get(2)?,
                scans: row.try_get(3)?,
                size_bytes: row.try_get(4)?,
                unique: row.try_get(5)?,
            })
        })
        .collect::<PgResult<Vec<_>>>()?;
    Ok(IndexStats {
        total_indexes: summary.try_get(0)?,
        unused_indexes: summary.try_get(1)?,
        avg_scans: summary.try_get(2)?,
        unused,
    })
}

pub(super) fn locks(client: &mut Client, v: Option<i32>) -> PgResult<LockStats> {
    let row = client.query_one(&queries::build_locks_query(v), &[])?;
    Ok(LockStats {
        blocked: row.try_get(0)?,
        active: row.try_get(1)?,
        waiting_queries: row.try_get(2)?,
    })
}

fn session_query(row: &Row) -> PgResult<SessionQuery> {
    Ok(SessionQuery {
        pid: row.try_get(0)?,
        user: row.try_get(1)?,
        state: row.try_get(2)?,
        duration_secs: row.try_get(3)?,
        query: row.try_get(4)?,
    })
}

pub(super) fn active_queries(client: &mut Client, v: Option<i32>) -> PgResult<Vec<SessionQuery>> {
    client
        .query(&queries::build_active_queries_query(v), &[])?
        .iter()
        .map(session_query)
        .collect()
}

pub(super) fn long_queries(client: &mut Client, v: Option<i32>) -> PgResult<Vec<SessionQuery>> {
    client
        .query(&queries::build_long_queries_query(v), &[])?
        .iter()
        .map(session_query)
        .collect()
}

pub(super) fn bloat(client: &mut Client) -> PgResult<Vec<BloatEntry>> {
    client
        .query(queries::BLOAT_QUERY, &[])?
        .iter()
        .map(|row| {
            Ok(BloatEntry {
                schema: row.try_get(0)?,
                table: row.try_get(1)?,
                live_rows: row.try_get(2)?,
                dead_rows: row.try_get(3)?,
                size_bytes: row.try_get(4)?,
            })
        })
        .collect()
}

pub(super) fn scan_profiles(client: &mut Client) -> PgResult<Vec<ScanProfile>> {
    client
        .query(queries::SCAN_PROFILE_QUERY, &[])?
        .iter()
        .map(|row| {
            Ok(ScanProfile {
                schema: row.try_get(0)?,
                table: row.try_get(1)?,
                seq_scan: row.try_get(2)?,
                idx_scan: row.try_get(3)?,
                index_count: row.try_get(4)?,
                live_rows: row.try_get(5)?,
                size_bytes: row.try_get(6)?,
            })
        })
        .collect()
}

pub(super) fn autovacuum(client: &mut Client) -> PgResult<AutovacuumStats> {
    let totals = client.query_one(queries::AUTOVACUUM_TOTALS_QUERY, &[])?;
    let tables = client
        .query(queries::AUTOVACUUM_TABLES_QUERY, &[])?
        .iter()
        .map(|row| {
            Ok(VacuumStats {
                schema: row.try_get(0)?,
                table: row.try_get(1)?,
                last_vacuum: row.try_get(2)?,
                last_autovacuum: row.try_get(3)?,
                last_analyze: row.try_get(4)?,
                last_autoanalyze: row.try_get(5)?,
                vacuum_count: row.try_get(6)?,
                autovacuum_count: row.try_get(7)?,
                analyze_count: row.try_get(8)?,
                autoanalyze_count: row.try_get(9)?,
            })
        })
        .collect::<PgResult<Vec<_>>>()?;
    Ok(AutovacuumStats {
        total_autovacuum_count: totals.try_get(0)?,
        total_autoanalyze_count: totals.try_get(1)?,
        latest_autovacuum: totals.try_get(2)?,
        tables,
    })
}
