use anyhow::Result;
use chrono::Utc;
use sqlx::{sqlite::SqliteConnectOptions, SqlitePool};
use std::{path::Path, str::FromStr};

/// Default timeout for individual SQLite queries.
/// Prevents hung queries from blocking the server indefinitely.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Execute a future with the standard query timeout.
/// Returns an error if the operation takes longer than `QUERY_TIMEOUT`.
async fn with_timeout<T>(fut: impl std::future::Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(QUERY_TIMEOUT, fut).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!(
            "database query timed out after {}s",
            QUERY_TIMEOUT.as_secs()
        )),
    }
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize, serde::Deserialize)]
pub struct TaskRow {
    pub id: i64,
    pub task: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub async fn new(data_dir: &Path) -> Result<Self> {
        Self::new_with_slow_query(data_dir, 0).await
    }

    /// Create storage with slow-query logging enabled.
    ///
    /// `slow_query_ms` is the threshold in milliseconds — queries exceeding it are
    /// logged at WARN level. Set to 0 to disable slow-query logging.
    pub async fn new_with_slow_query(data_dir: &Path, slow_query_ms: u64) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir).await?;
        let db_path = data_dir.join("taskd.db");
        let mut opts =
            SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .create_if_missing(true);

        if slow_query_ms > 0 {
            use sqlx::ConnectOptions;
            opts = opts.log_slow_statements(
                log::LevelFilter::Warn,
                std::time::Duration::from_millis(slow_query_ms),
            );
        }

        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tasks (
                 id         INTEGER PRIMARY KEY AUTOINCREMENT,
                 task       TEXT NOT NULL,
                 status     TEXT NOT NULL,
                 created_at TEXT NOT NULL
             )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    // ─── Tasks ────────────────────────────────────────────────────────────────

    pub async fn list_tasks(&self) -> Result<Vec<TaskRow>> {
        let pool = self.pool.clone();
        with_timeout(async {
            Ok(sqlx::query_as("SELECT * FROM tasks ORDER BY id")
                .fetch_all(&pool)
                .await?)
        })
        .await
    }

    /// Fetch the rows matching `id`. An unknown id yields an empty set, not an
    /// error — reads do not distinguish not-found from success.
    pub async fn get_task_rows(&self, id: i64) -> Result<Vec<TaskRow>> {
        let pool = self.pool.clone();
        with_timeout(async {
            Ok(sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
                .bind(id)
                .fetch_all(&pool)
                .await?)
        })
        .await
    }

    /// Insert a task, stamping `created_at` with the current UTC time.
    /// Returns the database-assigned id.
    pub async fn create_task(&self, task: &str, status: &str) -> Result<i64> {
        let created_at = Utc::now().to_rfc3339();
        let pool = self.pool.clone();
        with_timeout(async {
            let result =
                sqlx::query("INSERT INTO tasks (task, status, created_at) VALUES (?, ?, ?)")
                    .bind(task)
                    .bind(status)
                    .bind(&created_at)
                    .execute(&pool)
                    .await?;
            Ok(result.last_insert_rowid())
        })
        .await
    }

    /// Single-field update: only the `task` column is written.
    /// Returns the number of affected rows (0 when the id does not exist).
    pub async fn update_task(&self, id: i64, task: &str) -> Result<u64> {
        let pool = self.pool.clone();
        with_timeout(async {
            let result = sqlx::query("UPDATE tasks SET task = ? WHERE id = ?")
                .bind(task)
                .bind(id)
                .execute(&pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    pub async fn delete_task(&self, id: i64) -> Result<u64> {
        let pool = self.pool.clone();
        with_timeout(async {
            let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
                .bind(id)
                .execute(&pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn make_storage(dir: &TempDir) -> Storage {
        Storage::new(dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn create_stamps_created_at() {
        let dir = TempDir::new().unwrap();
        let storage = make_storage(&dir).await;

        let id = storage.create_task("write report", "pending").await.unwrap();
        assert!(id > 0);

        let rows = storage.get_task_rows(id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task, "write report");
        assert_eq!(rows[0].status, "pending");
        // created_at is stamped by the storage layer as RFC 3339
        chrono::DateTime::parse_from_rfc3339(&rows[0].created_at)
            .expect("created_at should be RFC 3339");
    }

    #[tokio::test]
    async fn list_returns_all_rows_in_insert_order() {
        let dir = TempDir::new().unwrap();
        let storage = make_storage(&dir).await;

        let first = storage.create_task("first", "pending").await.unwrap();
        let second = storage.create_task("second", "done").await.unwrap();

        let rows = storage.list_tasks().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, first);
        assert_eq!(rows[1].id, second);
    }

    #[tokio::test]
    async fn get_unknown_id_yields_empty_set() {
        let dir = TempDir::new().unwrap();
        let storage = make_storage(&dir).await;

        let rows = storage.get_task_rows(999).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn update_writes_only_the_task_column() {
        let dir = TempDir::new().unwrap();
        let storage = make_storage(&dir).await;

        let id = storage.create_task("initial", "pending").await.unwrap();
        let affected = storage.update_task(id, "revised").await.unwrap();
        assert_eq!(affected, 1);

        let rows = storage.get_task_rows(id).await.unwrap();
        assert_eq!(rows[0].task, "revised");
        // status is untouched by update
        assert_eq!(rows[0].status, "pending");
    }

    #[tokio::test]
    async fn update_unknown_id_affects_no_rows() {
        let dir = TempDir::new().unwrap();
        let storage = make_storage(&dir).await;

        let affected = storage.update_task(999, "whatever").await.unwrap();
        assert_eq!(affected, 0);
    }

    #[tokio::test]
    async fn delete_removes_the_row() {
        let dir = TempDir::new().unwrap();
        let storage = make_storage(&dir).await;

        let id = storage.create_task("ephemeral", "pending").await.unwrap();
        let affected = storage.delete_task(id).await.unwrap();
        assert_eq!(affected, 1);

        let rows = storage.get_task_rows(id).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn migrate_is_idempotent_across_reopen() {
        let dir = TempDir::new().unwrap();
        let id = {
            let storage = make_storage(&dir).await;
            storage.create_task("persisted", "pending").await.unwrap()
        };

        // Re-opening the same data dir re-runs the schema bootstrap.
        let storage = make_storage(&dir).await;
        let rows = storage.get_task_rows(id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].task, "persisted");
    }
}
