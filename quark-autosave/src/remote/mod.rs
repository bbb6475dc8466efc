//! Capability set the mirror engine needs from a cloud drive.

pub mod quark;

use async_trait::async_trait;
use quark_core::{ApiErrorClass, QuarkError};
use thiserror::Error;

use crate::retry::Retryable;

pub use quark::QuarkRemote;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Network, timeout or busy server. Worth another attempt.
    #[error("transient remote failure: {0}")]
    Transient(String),
    /// Expired share, denied permission, exhausted quota and similar.
    #[error("remote rejected request: {0}")]
    Rejected(String),
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::Transient(_))
    }
}

impl From<QuarkError> for RemoteError {
    fn from(err: QuarkError) -> Self {
        match err {
            QuarkError::Rejected { message, .. } => RemoteError::Rejected(message),
            other => match other.classification() {
                Some(ApiErrorClass::Transient | ApiErrorClass::RateLimit) => {
                    RemoteError::Transient(other.to_string())
                }
                Some(ApiErrorClass::Auth | ApiErrorClass::Permanent) => {
                    RemoteError::Rejected(other.to_string())
                }
                // Unclassified transport errors (body decode, redirects) get retried.
                None => match other {
                    QuarkError::Url(_) | QuarkError::MissingData => {
                        RemoteError::Rejected(other.to_string())
                    }
                    _ => RemoteError::Transient(other.to_string()),
                },
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub is_dir: bool,
    pub category: Option<String>,
    /// Share-scoped access token; empty for destination listings.
    pub share_token: String,
    pub size: u64,
    pub updated_at: Option<i64>,
}

impl RemoteItem {
    pub fn file(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_dir: false,
            category: None,
            share_token: String::new(),
            size: 0,
            updated_at: None,
        }
    }

    pub fn dir(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_dir: true,
            ..Self::file(id, name)
        }
    }

    pub fn with_share_token(mut self, token: impl Into<String>) -> Self {
        self.share_token = token.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveBatch {
    pub item_ids: Vec<String>,
    pub item_tokens: Vec<String>,
    pub dest_dir: String,
    pub share_id: String,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPoll {
    Running,
    /// Terminal success. `saved_ids` lines up with the submitted item order.
    Finished { saved_ids: Vec<String> },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecycledRecord {
    pub record_id: String,
    pub item_id: String,
    pub name: String,
}

#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn resolve_share_token(&self, share_id: &str, passcode: &str)
    -> Result<String, RemoteError>;

    /// All items directly under `dir_id` of the share, across pages.
    async fn list_share(
        &self,
        share_id: &str,
        token: &str,
        dir_id: &str,
    ) -> Result<Vec<RemoteItem>, RemoteError>;

    async fn list_directory(&self, dir_id: &str) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Returns the id of the folder at `path`, creating it when missing.
    async fn ensure_directory(&self, path: &str) -> Result<String, RemoteError>;

    async fn save_items(&self, batch: &SaveBatch) -> Result<String, RemoteError>;

    async fn poll_task(&self, task_id: &str) -> Result<TaskPoll, RemoteError>;

    async fn rename(&self, item_id: &str, new_name: &str) -> Result<(), RemoteError>;

    async fn delete(&self, item_ids: &[String]) -> Result<String, RemoteError>;

    async fn list_recycled(&self) -> Result<Vec<RecycledRecord>, RemoteError>;

    async fn purge_recycled(&self, record_ids: &[String]) -> Result<(), RemoteError>;

    /// Drops cached path lookups at or below `path`.
    fn forget_path(&self, _path: &str) {}
}

/// One leading slash, no repeated or trailing slashes.
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    format!("/{}", parts.join("/"))
}
