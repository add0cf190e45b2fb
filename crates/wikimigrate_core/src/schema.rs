use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params};
use tracing::debug;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "baseline",
        sql: include_str!("migrations/v001_baseline.sql"),
    },
    Migration {
        version: 2,
        name: "default_namespaces",
        sql: include_str!("migrations/v002_default_namespaces.sql"),
    },
    Migration {
        version: 3,
        name: "topic_links",
        sql: include_str!("migrations/v003_topic_links.sql"),
    },
];

pub const LATEST_SCHEMA_VERSION: u32 = 3;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Report returned after running migrations.
#[derive(Debug, Clone)]
pub struct MigrateReport {
    pub applied: Vec<AppliedMigration>,
    pub current_version: u32,
}

#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub version: u32,
    pub name: String,
}

/// Open (creating if needed) the database at `db_path` and apply pending migrations.
pub fn run_migrations(db_path: &Path) -> Result<MigrateReport> {
    ensure_db_parent(db_path)?;
    let connection = open_connection(db_path)?;
    migrate_connection(&connection)
}

/// Apply every pending migration on an open connection.
pub fn migrate_connection(connection: &Connection) -> Result<MigrateReport> {
    ensure_schema_migrations_table(connection)?;

    let current = current_version(connection)?;
    let mut applied = Vec::new();

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        apply_migration(connection, migration).with_context(|| {
            format!(
                "failed to apply migration v{:03}_{}",
                migration.version, migration.name
            )
        })?;
        debug!(version = migration.version, name = migration.name, "applied schema migration");
        applied.push(AppliedMigration {
            version: migration.version,
            name: migration.name.to_string(),
        });
    }

    let final_version = current_version(connection)?;
    Ok(MigrateReport {
        applied,
        current_version: final_version,
    })
}

/// Returns the number of migrations that have not yet been applied.
pub fn pending_migration_count(db_path: &Path) -> Result<usize> {
    if !db_path.exists() {
        return Ok(MIGRATIONS.len());
    }
    let connection = open_connection(db_path)?;
    ensure_schema_migrations_table(&connection)?;
    let current = current_version(&connection)?;
    Ok(MIGRATIONS.iter().filter(|m| m.version > current).count())
}

/// Returns the highest applied migration version, or 0 if none applied.
pub fn current_version(connection: &Connection) -> Result<u32> {
    let version: i64 = connection
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .context("failed to read current migration version")?;
    u32::try_from(version).context("migration version does not fit into u32")
}

pub(crate) fn open_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign_keys pragma")?;
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to enable WAL journal mode")?;
    connection
        .busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    Ok(connection)
}

pub(crate) fn ensure_db_parent(db_path: &Path) -> Result<()> {
    let parent = db_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", db_path.display()))?;
    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create database parent directory {}",
            parent.display()
        )
    })
}

fn ensure_schema_migrations_table(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );",
        )
        .context("failed to create schema_migrations table")
}

fn apply_migration(connection: &Connection, migration: &Migration) -> Result<()> {
    connection
        .execute_batch("SAVEPOINT migration_apply")
        .context("failed to create savepoint")?;

    let result = (|| -> Result<()> {
        connection
            .execute_batch(migration.sql)
            .with_context(|| format!("SQL execution failed for v{:03}", migration.version))?;
        connection
            .execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![
                    i64::from(migration.version),
                    migration.name,
                    Utc::now().to_rfc3339(),
                ],
            )
            .context("failed to record migration")?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            connection
                .execute_batch("RELEASE SAVEPOINT migration_apply")
                .context("failed to release savepoint")?;
            Ok(())
        }
        Err(err) => {
            let _ = connection.execute_batch("ROLLBACK TO SAVEPOINT migration_apply");
            let _ = connection.execute_batch("RELEASE SAVEPOINT migration_apply");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn migrations_apply_on_fresh_db() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("data/wikimigrate.db");
        let report = run_migrations(&db_path).expect("run_migrations");
        assert_eq!(report.applied.len(), MIGRATIONS.len());
        assert_eq!(report.current_version, LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn migrations_are_idempotent() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("wikimigrate.db");
        run_migrations(&db_path).expect("first run");
        let second = run_migrations(&db_path).expect("second run");
        assert!(second.applied.is_empty());
        assert_eq!(second.current_version, LATEST_SCHEMA_VERSION);
    }

    #[test]
    fn pending_count_tracks_applied_migrations() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("wikimigrate.db");
        assert_eq!(
            pending_migration_count(&db_path).expect("pending count"),
            MIGRATIONS.len()
        );
        run_migrations(&db_path).expect("run_migrations");
        assert_eq!(pending_migration_count(&db_path).expect("pending count"), 0);
    }

    #[test]
    fn default_namespaces_are_seeded() {
        let temp = tempdir().expect("tempdir");
        let db_path = temp.path().join("wikimigrate.db");
        run_migrations(&db_path).expect("run_migrations");
        let connection = open_connection(&db_path).expect("open");
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM namespaces", [], |row| row.get(0))
            .expect("count namespaces");
        assert_eq!(count, 16);
        let owner: i64 = connection
            .query_row(
                "SELECT namespace_id FROM namespace_aliases WHERE alias = 'User talk'",
                [],
                |row| row.get(0),
            )
            .expect("user talk alias");
        assert_eq!(owner, 3);
    }
}
