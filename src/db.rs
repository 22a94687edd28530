use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{sqlite::SqlitePoolOptions, Executor, Pool, Sqlite};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use validator::Validate;

use crate::error::{AppError, DBErrorContext, Result};

/// One row per user. The whole record is the unit of persistence: every
/// mutation loads the full file list, recomputes it in memory and writes
/// it back. There is no per-entry update primitive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct UploadRecord {
    #[serde(rename = "userId")]
    #[validate(length(max = 40))]
    pub user_id: String,
    #[serde(default)]
    pub files: Vec<FileEntry>,
}

/// A reference to an object held by the storage backend. `url` is the
/// effective identity of an entry within a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(sqlx::FromRow)]
struct UploadRow {
    user_id: String,
    files: Json<Vec<FileEntry>>,
}

impl From<UploadRow> for UploadRecord {
    fn from(row: UploadRow) -> Self {
        UploadRecord {
            user_id: row.user_id,
            files: row.files.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbService {
    pool: Pool<Sqlite>,
    // One async mutex per user id, handed out to every read-modify-write
    // sequence touching that user's file list. Entries are never evicted,
    // the registry grows with the number of distinct users.
    user_locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl DbService {
    pub async fn new(db_path: &str) -> Result<Self> {
        let pool_res = SqlitePoolOptions::new()
            .max_connections(2)
            .after_connect(|conn, _meta| {
                // sqlite doesn't allow multiple writers at the same time.
                // Allow multiple read tx alongside at most one write tx.
                // See https://www.sqlite.org/wal.html
                Box::pin(async move {
                    conn.execute("PRAGMA journal_mode=WAL;").await?;
                    Ok(())
                })
            })
            .connect(db_path)
            .await;
        match pool_res {
            Ok(pool) => Ok(DbService {
                pool,
                user_locks: Arc::new(Mutex::new(HashMap::new())),
            }),
            Err(err) => Err(AppError::DBInitError {
                path: db_path.to_owned(),
                source: err,
            }),
        }
    }

    #[cfg(test)]
    pub(crate) async fn in_memory() -> Self {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = DbService {
            pool,
            user_locks: Arc::new(Mutex::new(HashMap::new())),
        };
        db.migrate().await.unwrap();
        db
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .with_context(|| "cannot reach the database")?;
        Ok(())
    }

    /// Serializes read-modify-write sequences for a single user. Concurrent
    /// transfers for the same user would otherwise overwrite each other's
    /// append (last writer wins on the whole row).
    pub(crate) async fn lock_user(&self, user_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.user_locks.lock();
            locks.entry(user_id.to_owned()).or_default().clone()
        };
        lock.lock_owned().await
    }

    pub async fn all(&self) -> Result<Vec<UploadRecord>> {
        let rows = sqlx::query_as::<_, UploadRow>("SELECT user_id, files FROM uploads")
            .fetch_all(&self.pool)
            .await
            .with_context(|| "cannot fetch upload records")?;
        Ok(rows.into_iter().map(UploadRecord::from).collect())
    }

    pub async fn load_files(&self, user_id: &str) -> Result<Vec<FileEntry>> {
        let row =
            sqlx::query_as::<_, UploadRow>("SELECT user_id, files FROM uploads WHERE user_id=?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("cannot fetch upload record for user {user_id}"))?;

        match row {
            Some(row) => Ok(row.files.0),
            None => Err(AppError::RecordNotFound {
                user_id: user_id.to_owned(),
            }),
        }
    }

    /// Urls of the entries categorized as images. Entries of any other
    /// kind are filtered out.
    pub async fn load_image_urls(&self, user_id: &str) -> Result<Vec<String>> {
        let files = self.load_files(user_id).await?;
        Ok(files
            .into_iter()
            .filter(|f| f.kind == "image")
            .map(|f| f.url)
            .collect())
    }

    pub async fn create(&self, record: &UploadRecord) -> Result<u64> {
        tracing::info!("creating upload record for user {}", record.user_id);
        let res = sqlx::query("INSERT INTO uploads (user_id, files) VALUES (?, ?)")
            .bind(&record.user_id)
            .bind(Json(&record.files))
            .execute(&self.pool)
            .await
            .with_context(|| format!("cannot insert upload record for user {}", record.user_id))?;
        Ok(res.rows_affected())
    }

    /// Full overwrite of the row's file list. A missing row is a no-op
    /// (0 rows affected).
    pub async fn update(&self, record: &UploadRecord) -> Result<u64> {
        let res = sqlx::query("UPDATE uploads SET files=? WHERE user_id=?")
            .bind(Json(&record.files))
            .bind(&record.user_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("cannot update upload record for user {}", record.user_id))?;
        Ok(res.rows_affected())
    }

    /// Removes every entry whose url matches, or none when nothing matches.
    /// The list is written back as a whole either way.
    pub async fn delete_entry(&self, user_id: &str, url: &str) -> Result<u64> {
        let _guard = self.lock_user(user_id).await;

        let files = self.load_files(user_id).await?;
        let remaining: Vec<FileEntry> = files.into_iter().filter(|f| f.url != url).collect();

        self.update(&UploadRecord {
            user_id: user_id.to_owned(),
            files: remaining,
        })
        .await
    }
}
