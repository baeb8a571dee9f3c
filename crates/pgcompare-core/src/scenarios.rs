//! Fixture snapshots shared by unit tests.
//!
//! `fast_server` and `slow_server` describe the reference pair: 101 GB vs
//! 171 GB, cache hit 56.37% vs 51.78%, the slow one on a burstable B2s tier
//! with P15 storage (1100 IOPS). Identical generic settings on both.

use std::collections::BTreeMap;

use crate::model::{
    AutovacuumStats, BloatEntry, CacheStats, Collected, ComputeTier, ConnectionStats,
    DatabaseSize, FailureKind, IndexStats, IndexUsage, LockStats, PgSetting, ScanProfile,
    ServerIdentity, ServerSnapshot, SessionQuery, Settings, StorageTier, TableSummary,
    TierClass, Unavailability, VacuumStats,
};

/// Collection time of every fixture.
pub const T: i64 = 1_760_000_000;

const MB: i64 = 1024 * 1024;
const GB: i64 = 1024 * MB;

fn identity(label: &str, host: &str) -> ServerIdentity {
    ServerIdentity {
        label: label.to_string(),
        host: host.to_string(),
        port: 5432,
        database: "app".to_string(),
    }
}

fn setting(name: &str, setting: &str, unit: &str, display: &str) -> (String, PgSetting) {
    (
        name.to_string(),
        PgSetting {
            name: name.to_string(),
            setting: setting.to_string(),
            unit: unit.to_string(),
            display: display.to_string(),
        },
    )
}

fn settings() -> Settings {
    let entries: BTreeMap<String, PgSetting> = [
        setting("server_version", "16.2", "", "16.2"),
        setting("server_version_num", "160002", "", "160002"),
        setting("max_connections", "200", "", "200"),
        setting("shared_buffers", "16384", "8kB", "128MB"),
        setting("effective_cache_size", "524288", "8kB", "4GB"),
        setting("work_mem", "4096", "kB", "4MB"),
        setting("maintenance_work_mem", "65536", "kB", "64MB"),
        setting("random_page_cost", "4", "", "4"),
        setting("effective_io_concurrency", "1", "", "1"),
        setting("synchronous_commit", "on", "", "on"),
        setting("wal_level", "replica", "", "replica"),
        setting("statement_timeout", "0", "ms", "0"),
        setting("autovacuum", "on", "", "on"),
        setting("autovacuum_max_workers", "3", "", "3"),
        setting("autovacuum_naptime", "60", "s", "1min"),
        setting("autovacuum_vacuum_cost_limit", "-1", "", "-1"),
        setting("autovacuum_vacuum_scale_factor", "0.2", "", "0.2"),
    ]
    .into_iter()
    .collect();
    Settings {
        server_version: "16.2".to_string(),
        server_version_num: Some(160002),
        entries,
    }
}

fn session(pid: i32, user: &str, state: &str, secs: f64, query: &str) -> SessionQuery {
    SessionQuery {
        pid,
        user: user.to_string(),
        state: state.to_string(),
        duration_secs: secs,
        query: query.to_string(),
    }
}

fn vacuum(table: &str, last_autovacuum: i64, autovacuum_count: i64) -> VacuumStats {
    VacuumStats {
        schema: "public".to_string(),
        table: table.to_string(),
        last_vacuum: None,
        last_autovacuum: Some(last_autovacuum),
        last_analyze: None,
        last_autoanalyze: Some(last_autovacuum),
        vacuum_count: 0,
        autovacuum_count,
        analyze_count: 0,
        autoanalyze_count: autovacuum_count / 2,
    }
}

fn index(table: &str, name: &str, size_bytes: i64, unique: bool) -> IndexUsage {
    IndexUsage {
        schema: "public".to_string(),
        table: table.to_string(),
        index: name.to_string(),
        scans: 0,
        size_bytes,
        unique,
    }
}

fn scan(table: &str, seq: i64, idx: i64, indexes: i64, rows: i64, size: i64) -> ScanProfile {
    ScanProfile {
        schema: "public".to_string(),
        table: table.to_string(),
        seq_scan: seq,
        idx_scan: idx,
        index_count: indexes,
        live_rows: rows,
        size_bytes: size,
    }
}

/// Server 1: healthy structure, but memory-starved (56.37% cache hit) and
/// with no tier descriptors supplied.
pub fn fast_server() -> ServerSnapshot {
    ServerSnapshot {
        identity: identity("Server 1 (Fast)", "pg-fast.internal"),
        collected_at: T,
        compute: None,
        storage: None,
        settings: Collected::Available(settings()),
        connections: Collected::Available(ConnectionStats {
            max_connections: 200,
            current: 45,
            active: 8,
            idle: 37,
        }),
        cache: Collected::Available(CacheStats {
            heap_blks_read: 4363,
            heap_blks_hit: 5637,
            idx_blks_read: 1200,
            idx_blks_hit: 8800,
        }),
        database_size: Collected::Available(DatabaseSize { bytes: 101 * GB }),
        tables: Collected::Available(TableSummary {
            total_tables: 64,
            avg_live_rows: 182_000.0,
            max_live_rows: 2_000_000,
            avg_dead_rows: 1_900.0,
            total_dead_rows: 121_600,
        }),
        indexes: Collected::Available(IndexStats {
            total_indexes: 40,
            unused_indexes: 1,
            avg_scans: 8_400.5,
            unused: vec![index("users", "users_email_key", 6 * MB, true)],
        }),
        locks: Collected::Available(LockStats {
            blocked: 0,
            active: 12,
            waiting_queries: 0,
        }),
        active_queries: Collected::Available(vec![session(
            3101,
            "app",
            "active",
            0.4,
            "SELECT id, status FROM orders WHERE customer_id = $1",
        )]),
        long_queries: Collected::Available(vec![session(
            3101,
            "app",
            "active",
            0.4,
            "SELECT id, status FROM orders WHERE customer_id = $1",
        )]),
        bloat: Collected::Available(vec![BloatEntry {
            schema: "public".to_string(),
            table: "events".to_string(),
            live_rows: 600_000,
            dead_rows: 30_000,
            size_bytes: GB,
        }]),
        query_issues: Collected::Available(vec![
            scan("orders", 40, 90_000, 2, 500_000, 800 * MB),
            scan("audit_log", 60, 45_000, 1, 2_000_000, 2 * GB),
        ]),
        autovacuum: Collected::Available(AutovacuumStats {
            total_autovacuum_count: 1200,
            total_autoanalyze_count: 600,
            latest_autovacuum: Some(T),
            tables: vec![vacuum("events", T, 700), vacuum("orders", T - 1800, 500)],
        }),
    }
}

/// Server 2: burstable B2s on P15 storage, 171 GB, with structural problems
/// on top.
pub fn slow_server() -> ServerSnapshot {
    ServerSnapshot {
        identity: identity("Server 2 (Slow)", "pg-slow.internal"),
        collected_at: T,
        compute: Some(ComputeTier {
            id: "B2s".to_string(),
            class: TierClass::Burstable,
            vcores: 2,
            ram_gb: 4.0,
        }),
        storage: Some(StorageTier {
            id: "P15".to_string(),
            iops: 1100,
            size_gb: 256.0,
        }),
        settings: Collected::Available(settings()),
        connections: Collected::Available(ConnectionStats {
            max_connections: 200,
            current: 120,
            active: 60,
            idle: 60,
        }),
        cache: Collected::Available(CacheStats {
            heap_blks_read: 4822,
            heap_blks_hit: 5178,
            idx_blks_read: 3100,
            idx_blks_hit: 6900,
        }),
        database_size: Collected::Available(DatabaseSize { bytes: 171 * GB }),
        tables: Collected::Available(TableSummary {
            total_tables: 64,
            avg_live_rows: 310_000.0,
            max_live_rows: 2_000_000,
            avg_dead_rows: 9_800.0,
            total_dead_rows: 627_200,
        }),
        indexes: Collected::Available(IndexStats {
            total_indexes: 48,
            unused_indexes: 2,
            avg_scans: 1_520.4,
            unused: vec![
                index("events", "events_payload_idx", 120 * MB, false),
                index("users", "users_email_key", 8 * MB, true),
            ],
        }),
        locks: Collected::Available(LockStats {
            blocked: 3,
            active: 41,
            waiting_queries: 3,
        }),
        active_queries: Collected::Available(vec![
            session(
                4242,
                "monitoring",
                "active",
                18_000.0,
                "SELECT n.nspname, c.relname FROM pg_catalog.pg_class c JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace",
            ),
            session(
                5120,
                "app",
                "active",
                900.0,
                "SELECT * FROM audit_log WHERE actor_id = $1",
            ),
        ]),
        long_queries: Collected::Available(vec![
            session(
                4242,
                "monitoring",
                "active",
                18_000.0,
                "SELECT n.nspname, c.relname FROM pg_catalog.pg_class c JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace",
            ),
            session(
                5120,
                "app",
                "active",
                900.0,
                "SELECT * FROM audit_log WHERE actor_id = $1",
            ),
        ]),
        bloat: Collected::Available(vec![BloatEntry {
            schema: "public".to_string(),
            table: "events".to_string(),
            live_rows: 600_000,
            dead_rows: 400_000,
            size_bytes: GB,
        }]),
        query_issues: Collected::Available(vec![
            scan("audit_log", 5000, 0, 0, 2_000_000, 2 * GB),
            scan("orders", 3000, 200, 2, 500_000, 800 * MB),
        ]),
        autovacuum: Collected::Available(AutovacuumStats {
            total_autovacuum_count: 2400,
            total_autoanalyze_count: 1100,
            latest_autovacuum: Some(T - 7200),
            tables: vec![
                vacuum("events", T - 7200, 1500),
                vacuum("orders", T - 9000, 900),
            ],
        }),
    }
}

/// A server that refused the connection: every category unavailable.
pub fn unavailable_server() -> ServerSnapshot {
    ServerSnapshot::unavailable(
        identity("Server 1 (Fast)", "pg-fast.internal"),
        T,
        None,
        None,
        Unavailability::new(FailureKind::Connection, "connection refused"),
    )
}
