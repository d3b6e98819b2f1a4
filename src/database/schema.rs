/*!
 * Job table schema, versioned through SQLite's `user_version` pragma.
 *
 * Each entry of `MIGRATIONS` moves the schema one version forward; a fresh
 * database runs them all.
 */

use anyhow::{bail, Context, Result};
use log::{debug, info};
use rusqlite::Connection;

/// Ordered schema steps; index `n` upgrades version `n` to `n + 1`
const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE IF NOT EXISTS jobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL,
        title TEXT,
        duration INTEGER,
        thumbnail TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
        message TEXT NOT NULL DEFAULT '',
        error TEXT,
        video_quality TEXT NOT NULL,
        subtitle_langs TEXT NOT NULL,
        translate_target TEXT NOT NULL DEFAULT '',
        image_quality INTEGER NOT NULL,
        slide_count INTEGER,
        output_path TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_jobs_url_status ON jobs(url, status);
    CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
    CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
"#];

/// Version a fully migrated database reports
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

// @returns: The stored schema version, 0 for a fresh database
pub fn schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("Failed to read schema version")
}

/// Apply every migration newer than the stored version
pub fn migrate(conn: &Connection) -> Result<()> {
    // WAL lets CLI reads proceed while a pipeline writes; in-memory databases ignore it
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
        .context("Failed to enable WAL journal")?;

    let current = schema_version(conn)?;
    if current > SCHEMA_VERSION {
        bail!(
            "Database schema v{} is newer than this build supports (v{})",
            current,
            SCHEMA_VERSION
        );
    }
    if current == SCHEMA_VERSION {
        debug!("Database schema is current (v{})", current);
        return Ok(());
    }

    for (index, step) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let target = index as i64 + 1;
        conn.execute_batch(&format!("BEGIN; {} PRAGMA user_version = {}; COMMIT;", step, target))
            .with_context(|| format!("Failed to migrate database schema to v{}", target))?;
        info!("Database schema migrated to v{}", target);
    }
    Ok(())
}
