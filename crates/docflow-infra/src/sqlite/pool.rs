//! SQLite connections for the workflow store.
//!
//! A `serve` process and any number of `worker` processes on the same host
//! open the same database file. Each process holds one writer connection, so
//! its own writes are serialized and every compare-and-set is a single
//! statement on that connection; across processes SQLite's file lock
//! serializes writers and `busy_timeout` decides how long one waits for
//! another. Reads go through a read-only pool and never block writers in
//! WAL mode.

use std::path::Path;

use docflow_types::config::DatabaseConfig;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

/// Reader and writer pools over one database file.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open (creating if needed) the database at `path` and apply pending
    /// migrations before any reader connects.
    pub async fn open(path: &Path, config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout());

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone())
            .await?;

        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(config.reader_connections)
            .connect_with(options.read_only(true))
            .await?;

        tracing::debug!(
            path = %path.display(),
            readers = config.reader_connections,
            busy_timeout_ms = config.busy_timeout_ms,
            "workflow database opened"
        );
        Ok(Self { reader, writer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_in(dir: &tempfile::TempDir, config: &DatabaseConfig) -> DatabasePool {
        DatabasePool::open(&dir.path().join("docflow.db"), config)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn workflow_tables_exist_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_in(&dir, &DatabaseConfig::default()).await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(
            names,
            vec!["activity_tasks", "checkpoints", "task_attempts", "workflow_runs"]
        );

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn connection_settings_come_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            busy_timeout_ms: 12_000,
            reader_connections: 3,
        };
        let pool = open_in(&dir, &config).await;

        let (busy,): (i64,) = sqlx::query_as("PRAGMA busy_timeout")
            .fetch_one(&pool.writer)
            .await
            .unwrap();
        assert_eq!(busy, 12_000);
        assert_eq!(pool.reader.options().get_max_connections(), 3);
        assert_eq!(pool.writer.options().get_max_connections(), 1);
    }

    #[tokio::test]
    async fn second_process_shares_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let serve = open_in(&dir, &DatabaseConfig::default()).await;
        let worker = open_in(&dir, &DatabaseConfig::default()).await;

        let (migrations,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _sqlx_migrations")
            .fetch_one(&worker.reader)
            .await
            .unwrap();
        assert_eq!(migrations, 1);

        sqlx::query(
            "INSERT INTO workflow_runs (id, input_ref, status, created_at, deadline_at) \
             VALUES ('r1', 'inputs/a.pdf', 'running', '2026-01-01T00:00:00.000000Z', \
             '2026-01-01T01:00:00.000000Z')",
        )
        .execute(&serve.writer)
        .await
        .unwrap();

        let (status,): (String,) =
            sqlx::query_as("SELECT status FROM workflow_runs WHERE id = 'r1'")
                .fetch_one(&worker.reader)
                .await
                .unwrap();
        assert_eq!(status, "running");
    }

    #[tokio::test]
    async fn readers_cannot_write() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_in(&dir, &DatabaseConfig::default()).await;

        let result = sqlx::query("DELETE FROM workflow_runs")
            .execute(&pool.reader)
            .await;
        assert!(result.is_err());
    }
}
