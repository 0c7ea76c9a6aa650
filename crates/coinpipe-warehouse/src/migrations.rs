//! Versioned schema migrations for the price store.

use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_price_history",
        sql: r#"
CREATE TABLE IF NOT EXISTS price_history (
    asset_id TEXT NOT NULL,
    ts TIMESTAMP NOT NULL,
    price DOUBLE NOT NULL,
    volume DOUBLE NOT NULL,
    source TEXT NOT NULL,
    updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY(asset_id, ts)
);

CREATE TABLE IF NOT EXISTS ingest_log (
    run_id TEXT NOT NULL,
    asset_id TEXT NOT NULL,
    source TEXT NOT NULL,
    row_count BIGINT NOT NULL,
    status TEXT NOT NULL,
    latency_ms BIGINT,
    logged_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    },
    Migration {
        version: "0002_summary_history",
        sql: r#"
CREATE TABLE IF NOT EXISTS summary_history (
    run_id TEXT NOT NULL,
    asset_id TEXT NOT NULL,
    window_start TIMESTAMP NOT NULL,
    window_end TIMESTAMP NOT NULL,
    mean_price DOUBLE NOT NULL,
    min_price DOUBLE NOT NULL,
    max_price DOUBLE NOT NULL,
    stddev DOUBLE NOT NULL,
    volatility DOUBLE,
    sample_count BIGINT NOT NULL,
    computed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_ingest_log_asset_logged ON ingest_log(asset_id, logged_at);
CREATE INDEX IF NOT EXISTS idx_summary_history_asset ON summary_history(asset_id, computed_at);
"#,
    },
    Migration {
        version: "0003_market_cap",
        sql: r#"
ALTER TABLE price_history ADD COLUMN IF NOT EXISTS market_cap DOUBLE;
"#,
    },
];

/// Apply every migration that has not been recorded in `schema_migrations`.
///
/// # Errors
/// Returns the first `DuckDB` error raised while applying a migration.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied == 0 {
            tracing::debug!(version = migration.version, "applying store migration");
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}

/// Versions known to this build, in application order.
pub fn known_versions() -> impl Iterator<Item = &'static str> {
    MIGRATIONS.iter().map(|migration| migration.version)
}
