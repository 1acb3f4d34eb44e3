use async_trait::async_trait;
use replybot_core::{CoreError, DatabaseError, ItemId, SeenStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
mod tests;

/// Persistent Seen-set backed by a SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteSeenStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteSeenStore {
    /// Opens (creating if needed) the database at `path` and applies migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let store = Self::connect(path).await?;
        store.run_migrations().await?;

        let (total, replied) = (store.count().await?, store.replied_count().await?);
        info!(
            "Seen-set at {} holds {} items ({} replied)",
            store.path.display(),
            total,
            replied
        );
        Ok(store)
    }

    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: format!("{}: {}", path.display(), e),
            })?;

        debug!("Connected to {}", path.display());
        Ok(Self { pool, path })
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn count(&self) -> Result<usize, CoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM seen_items")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        let total: i64 = row.try_get("total").map_err(DatabaseError::from)?;
        Ok(total as usize)
    }

    pub async fn replied_count(&self) -> Result<usize, CoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM seen_items WHERE replied = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        let total: i64 = row.try_get("total").map_err(DatabaseError::from)?;
        Ok(total as usize)
    }

    /// Whether a reply was actually posted for `id`, as opposed to the item
    /// being skipped. `None` when the id was never recorded.
    pub async fn was_replied(&self, id: &ItemId) -> Result<Option<bool>, CoreError> {
        let row = sqlx::query("SELECT replied FROM seen_items WHERE id = ?")
            .bind(id.fullname())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;

        row.map(|row| row.try_get::<bool, _>("replied"))
            .transpose()
            .map_err(|e| DatabaseError::from(e).into())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SeenStore for SqliteSeenStore {
    async fn contains(&self, id: &ItemId) -> Result<bool, CoreError> {
        let row = sqlx::query("SELECT 1 FROM seen_items WHERE id = ?")
            .bind(id.fullname())
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(row.is_some())
    }

    async fn record(&self, id: &ItemId, replied: bool) -> Result<(), CoreError> {
        sqlx::query("INSERT OR IGNORE INTO seen_items (id, replied, recorded_at) VALUES (?, ?, ?)")
            .bind(id.fullname())
            .bind(replied)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.message().contains("locked") => {
                    DatabaseError::DatabaseLocked
                }
                other => DatabaseError::from(other),
            })?;
        Ok(())
    }

    async fn len(&self) -> Result<usize, CoreError> {
        self.count().await
    }
}
