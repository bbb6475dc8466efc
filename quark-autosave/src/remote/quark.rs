use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use quark_core::{DriveFile, QuarkClient, ROOT_FID, SaveRequest, ShareFile, TaskState};
use tracing::{debug, info};

use super::normalize_path as normalize;
use super::{RecycledRecord, RemoteError, RemoteItem, RemoteStorage, SaveBatch, TaskPoll};
use crate::retry::Retryable;

const PAGE_SIZE: u32 = 50;
const RECYCLE_PAGE_SIZE: u32 = 30;

/// [`RemoteStorage`] backed by the Quark drive API.
///
/// Keeps a path to folder id cache for the lifetime of the run so repeated
/// tasks writing under the same tree do not look paths up again.
pub struct QuarkRemote {
    client: QuarkClient,
    fids: Mutex<HashMap<String, String>>,
    polls: Mutex<HashMap<String, u32>>,
}

impl QuarkRemote {
    pub fn new(client: QuarkClient) -> Self {
        let mut fids = HashMap::new();
        fids.insert("/".to_string(), ROOT_FID.to_string());
        Self {
            client,
            fids: Mutex::new(fids),
            polls: Mutex::new(HashMap::new()),
        }
    }

    pub fn client(&self) -> &QuarkClient {
        &self.client
    }

    /// Resolves every path in one lookup and creates the ones that are missing.
    pub async fn warm_paths(&self, paths: &[String]) -> Result<(), RemoteError> {
        let unknown: Vec<String> = {
            let fids = self.lock_fids();
            let mut unknown: Vec<String> = paths
                .iter()
                .map(|path| normalize(path))
                .filter(|path| !fids.contains_key(path))
                .collect();
            unknown.sort();
            unknown.dedup();
            unknown
        };
        if unknown.is_empty() {
            return Ok(());
        }

        let found = self.client.get_fids(&unknown).await?;
        {
            let mut fids = self.lock_fids();
            for entry in &found {
                fids.insert(normalize(&entry.file_path), entry.fid.clone());
            }
        }
        for path in unknown {
            if self.cached(&path).is_none() {
                let folder = self.client.create_folder(&path).await?;
                info!(path = %path, fid = %folder.fid, "created destination folder");
                self.lock_fids().insert(path, folder.fid);
            }
        }
        Ok(())
    }

    fn cached(&self, path: &str) -> Option<String> {
        self.lock_fids().get(path).cloned()
    }

    fn lock_fids(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.fids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_polls(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.polls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_poll_index(&self, task_id: &str) -> u32 {
        let mut polls = self.lock_polls();
        let index = polls.entry(task_id.to_string()).or_insert(0);
        let current = *index;
        *index += 1;
        current
    }

    #[cfg(test)]
    fn pending_polls(&self) -> usize {
        self.lock_polls().len()
    }
}

#[async_trait]
impl RemoteStorage for QuarkRemote {
    async fn resolve_share_token(
        &self,
        share_id: &str,
        passcode: &str,
    ) -> Result<String, RemoteError> {
        Ok(self.client.get_share_token(share_id, passcode).await?)
    }

    async fn list_share(
        &self,
        share_id: &str,
        token: &str,
        dir_id: &str,
    ) -> Result<Vec<RemoteItem>, RemoteError> {
        let files = self
            .client
            .list_share_all(share_id, token, dir_id, PAGE_SIZE)
            .await?;
        Ok(files.into_iter().map(share_item).collect())
    }

    async fn list_directory(&self, dir_id: &str) -> Result<Vec<RemoteItem>, RemoteError> {
        let files = self.client.list_directory_all(dir_id, PAGE_SIZE).await?;
        Ok(files.into_iter().map(drive_item).collect())
    }

    async fn ensure_directory(&self, path: &str) -> Result<String, RemoteError> {
        let path = normalize(path);
        if let Some(fid) = self.cached(&path) {
            return Ok(fid);
        }
        let found = self.client.get_fids(std::slice::from_ref(&path)).await?;
        let fid = match found.into_iter().next() {
            Some(entry) => entry.fid,
            None => {
                let folder = self.client.create_folder(&path).await?;
                info!(path = %path, fid = %folder.fid, "created destination folder");
                folder.fid
            }
        };
        self.lock_fids().insert(path, fid.clone());
        Ok(fid)
    }

    async fn save_items(&self, batch: &SaveBatch) -> Result<String, RemoteError> {
        let task = self
            .client
            .save_shared(&SaveRequest {
                fids: batch.item_ids.clone(),
                fid_tokens: batch.item_tokens.clone(),
                to_pdir_fid: batch.dest_dir.clone(),
                pwd_id: batch.share_id.clone(),
                stoken: batch.token.clone(),
            })
            .await?;
        debug!(task_id = %task.task_id, items = batch.item_ids.len(), "save task submitted");
        Ok(task.task_id)
    }

    async fn poll_task(&self, task_id: &str) -> Result<TaskPoll, RemoteError> {
        let index = self.next_poll_index(task_id);
        let info = match self.client.get_task(task_id, index).await {
            Ok(info) => info,
            Err(err) => {
                let err = RemoteError::from(err);
                if !err.is_retryable() {
                    self.lock_polls().remove(task_id);
                }
                return Err(err);
            }
        };
        if info.state() != TaskState::Running {
            self.lock_polls().remove(task_id);
        }
        Ok(match info.state() {
            TaskState::Running => TaskPoll::Running,
            TaskState::Succeeded => TaskPoll::Finished {
                saved_ids: info.saved_fids().to_vec(),
            },
            TaskState::Failed => TaskPoll::Failed(format!(
                "task {task_id} ended with status {} ({})",
                info.status, info.task_title
            )),
        })
    }

    async fn rename(&self, item_id: &str, new_name: &str) -> Result<(), RemoteError> {
        Ok(self.client.rename(item_id, new_name).await?)
    }

    async fn delete(&self, item_ids: &[String]) -> Result<String, RemoteError> {
        let task = self.client.delete(item_ids).await?;
        Ok(task.task_id)
    }

    async fn list_recycled(&self) -> Result<Vec<RecycledRecord>, RemoteError> {
        let records = self.client.recycle_list(1, RECYCLE_PAGE_SIZE).await?;
        Ok(records
            .into_iter()
            .map(|record| RecycledRecord {
                record_id: record.record_id,
                item_id: record.fid,
                name: record.file_name,
            })
            .collect())
    }

    async fn purge_recycled(&self, record_ids: &[String]) -> Result<(), RemoteError> {
        if record_ids.is_empty() {
            return Ok(());
        }
        Ok(self.client.recycle_remove(record_ids).await?)
    }

    fn forget_path(&self, path: &str) {
        let path = normalize(path);
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.lock_fids()
            .retain(|key, _| key == "/" || (key != &path && !key.starts_with(&prefix)));
    }
}

fn share_item(file: ShareFile) -> RemoteItem {
    RemoteItem {
        id: file.fid,
        name: file.file_name,
        is_dir: file.dir,
        category: file.obj_category,
        share_token: file.share_fid_token,
        size: file.size.unwrap_or(0),
        updated_at: file.updated_at,
    }
}

fn drive_item(file: DriveFile) -> RemoteItem {
    RemoteItem {
        id: file.fid,
        name: file.file_name,
        is_dir: file.dir,
        category: file.obj_category,
        share_token: String::new(),
        size: file.size.unwrap_or(0),
        updated_at: file.updated_at,
    }
}
