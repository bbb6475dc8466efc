//! SQLite log of saved files.

use std::path::{Path, PathBuf};

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;
use time::OffsetDateTime;

use crate::mirror::{ResultTree, SavedFile};
use crate::retry::{self, Backoff, RetryError, RetryPolicy, Retryable};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const WRITE_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("data directory is unavailable")]
    MissingDataDir,
    #[error(transparent)]
    Retry(Box<RetryError<RecordError>>),
}

impl Retryable for RecordError {
    fn is_retryable(&self) -> bool {
        match self {
            RecordError::Sqlx(sqlx::Error::Database(err)) => {
                let code = err.code();
                matches!(code.as_deref(), Some("5" | "6"))
                    || err.message().contains("database is locked")
            }
            RecordError::Sqlx(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

impl From<RetryError<RecordError>> for RecordError {
    fn from(err: RetryError<RecordError>) -> Self {
        RecordError::Retry(Box::new(err))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub task_name: String,
    pub original_name: String,
    pub file_size: i64,
    pub modify_date: Option<i64>,
    pub file_id: String,
    pub file_type: String,
    pub save_path: String,
}

impl NewRecord {
    pub fn from_saved(task_name: &str, save_path: &str, file: &SavedFile) -> Self {
        Self {
            task_name: task_name.to_string(),
            original_name: file.original.clone(),
            file_size: i64::try_from(file.size).unwrap_or(i64::MAX),
            modify_date: file.updated_at,
            file_id: file.id.clone(),
            file_type: file.category.as_str().to_string(),
            save_path: save_path.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub id: i64,
    pub transfer_time: i64,
    pub task_name: String,
    pub original_name: String,
    pub renamed_to: String,
    pub file_size: i64,
    pub modify_date: Option<i64>,
    pub file_id: String,
    pub file_type: String,
    pub save_path: String,
}

pub struct RecordStore {
    pool: SqlitePool,
    policy: RetryPolicy,
}

impl RecordStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            policy: RetryPolicy::Exponential(Backoff::lock_contention()),
        }
    }

    pub async fn open(path: &Path) -> Result<Self, RecordError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self::from_pool(pool);
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), RecordError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Inserts a row and returns its id.
    pub async fn add_record(&self, record: &NewRecord) -> Result<i64, RecordError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let id = retry::execute(
            || async move {
                let result = sqlx::query(
                    "INSERT INTO transfer_records (
                        transfer_time, task_name, original_name, file_size, modify_date,
                        file_id, file_type, save_path
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .bind(now)
                .bind(&record.task_name)
                .bind(&record.original_name)
                .bind(record.file_size)
                .bind(record.modify_date)
                .bind(&record.file_id)
                .bind(&record.file_type)
                .bind(&record.save_path)
                .execute(&self.pool)
                .await?;
                Ok::<_, RecordError>(result.last_insert_rowid())
            },
            "insert transfer record",
            WRITE_ATTEMPTS,
            &self.policy,
        )
        .await?;
        Ok(id)
    }

    pub async fn update_renamed_to(&self, id: i64, renamed_to: &str) -> Result<(), RecordError> {
        retry::execute(
            || async move {
                sqlx::query("UPDATE transfer_records SET renamed_to = ?1 WHERE id = ?2")
                    .bind(renamed_to)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
                Ok::<_, RecordError>(())
            },
            "update transfer record",
            WRITE_ATTEMPTS,
            &self.policy,
        )
        .await?;
        Ok(())
    }

    /// Points earlier records of `file_id` at its new name. Returns the number
    /// of rows touched; files saved before records existed touch none.
    pub async fn update_renamed_by_file_id(&self, file_id: &str, renamed_to: &str) -> Result<u64, RecordError> {
        let touched = retry::execute(
            || async move {
                let result = sqlx::query("UPDATE transfer_records SET renamed_to = ?1 WHERE file_id = ?2")
                    .bind(renamed_to)
                    .bind(file_id)
                    .execute(&self.pool)
                    .await?;
                Ok::<_, RecordError>(result.rows_affected())
            },
            "update transfer record by file",
            WRITE_ATTEMPTS,
            &self.policy,
        )
        .await?;
        Ok(touched)
    }

    /// Records every file in `tree`, returning how many rows were written.
    pub async fn record_tree(&self, task_name: &str, tree: &ResultTree) -> Result<usize, RecordError> {
        let mut written = 0;
        for (dir_path, file) in tree.files_with_dirs() {
            let id = self
                .add_record(&NewRecord::from_saved(task_name, dir_path, file))
                .await?;
            if file.resolved != file.original {
                self.update_renamed_to(id, &file.resolved).await?;
            }
            written += 1;
        }
        Ok(written)
    }

    /// Newest first.
    pub async fn list(
        &self,
        task_name: Option<&str>,
        limit: u32,
    ) -> Result<Vec<TransferRecord>, RecordError> {
        let rows = sqlx::query(
            "SELECT id, transfer_time, task_name, original_name, renamed_to, file_size,
                    modify_date, file_id, file_type, save_path
             FROM transfer_records
             WHERE ?1 IS NULL OR task_name = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )
        .bind(task_name)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(TransferRecord {
                id: row.try_get("id")?,
                transfer_time: row.try_get("transfer_time")?,
                task_name: row.try_get("task_name")?,
                original_name: row.try_get("original_name")?,
                renamed_to: row.try_get("renamed_to")?,
                file_size: row.try_get("file_size")?,
                modify_date: row.try_get("modify_date")?,
                file_id: row.try_get("file_id")?,
                file_type: row.try_get("file_type")?,
                save_path: row.try_get("save_path")?,
            });
        }
        Ok(out)
    }
}

pub fn default_db_path() -> Result<PathBuf, RecordError> {
    let mut path = dirs::data_dir().ok_or(RecordError::MissingDataDir)?;
    path.push("quark-autosave");
    path.push("records.db");
    Ok(path)
}
