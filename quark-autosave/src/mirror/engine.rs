use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use quark_core::ShareLink;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::dedup::{DestinationIndex, is_dedup_suffixed};
use super::tree::{FileCategory, ResultTree, SavedFile};
use crate::remote::{RemoteError, RemoteItem, RemoteStorage, SaveBatch, TaskPoll};
use crate::rename::template::contains_sequence;
use crate::rename::{EpisodeNaming, MagicRename, NameFilter, PendingName, RenameContext, RenameRule, natsort};
use crate::retry::{Backoff, RetryError, RetrySettings};
use crate::task::Task;

pub const SAVE_BATCH_SIZE: usize = 100;
const EMPTY_SHARE: &str = "share is empty; its files were removed by the sharer";

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(transparent)]
    Remote(#[from] RetryError<RemoteError>),
    #[error("remote task {task_id} failed: {reason}")]
    TaskFailed { task_id: String, reason: String },
    #[error("remote task {0} was still running when polling gave up")]
    TaskTimeout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    List,
    Save,
    Rename,
    Resave,
}

/// A single item or folder that could not be handled. Siblings carry on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub path: String,
    pub name: String,
    pub stage: FailureStage,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalRule {
    pub pattern: String,
    pub replace: String,
}

#[derive(Debug, Clone)]
pub struct MirrorOptions {
    pub retry: RetrySettings,
    pub save_batch_size: usize,
    pub poll_attempts: u32,
    pub poll_backoff: Backoff,
    /// Applied before the task's own rule.
    pub global_rule: Option<GlobalRule>,
    /// Share items whose name contains any of these are never saved.
    pub file_blacklist: Vec<String>,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            save_batch_size: SAVE_BATCH_SIZE,
            poll_attempts: 30,
            poll_backoff: Backoff::task_poll(),
            global_rule: None,
            file_blacklist: Vec::new(),
        }
    }
}

/// A file that was already in the destination and got renamed to follow the
/// task's current rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingRename {
    pub path: String,
    pub id: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug)]
pub struct TaskReport {
    pub task_name: String,
    pub tree: ResultTree,
    /// First save into a destination root that was empty before the run.
    pub first_save: bool,
    pub renames: Vec<ExistingRename>,
    pub failures: Vec<ItemFailure>,
    /// Set when the task is (or just became) banned.
    pub banned: Option<String>,
}

impl TaskReport {
    fn new(task_name: &str, savepath: &str) -> Self {
        Self {
            task_name: task_name.to_string(),
            tree: ResultTree::new(savepath),
            first_save: false,
            renames: Vec::new(),
            failures: Vec::new(),
            banned: None,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.tree.is_empty() || !self.renames.is_empty()
    }
}

/// Walks a share and its destination folder in lockstep and saves what the
/// destination lacks.
pub struct MirrorEngine {
    remote: Arc<dyn RemoteStorage>,
    rename: MagicRename,
    options: MirrorOptions,
}

struct TaskRun {
    task_name: String,
    share_id: String,
    token: String,
    rule: RenameRule,
    global: Option<RenameRule>,
    subdir_filter: Option<NameFilter>,
    resave: bool,
    ignore_extension: bool,
    startfid: Option<String>,
    filter_words: Vec<String>,
    episode: Option<EpisodeNaming>,
    names: RenameContext,
    tree: ResultTree,
    renames: Vec<ExistingRename>,
    failures: Vec<ItemFailure>,
    ban: Option<String>,
}

impl TaskRun {
    fn fail(&mut self, path: &str, name: &str, stage: FailureStage, reason: impl ToString) {
        self.failures.push(ItemFailure {
            path: path.to_string(),
            name: name.to_string(),
            stage,
            reason: reason.to_string(),
        });
    }

    fn filtered_by_words(&self, name: &str) -> bool {
        if self.filter_words.is_empty() {
            return false;
        }
        let lower = name.to_lowercase();
        let ext = lower
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or_default();
        self.filter_words
            .iter()
            .any(|word| lower.contains(word.as_str()) || word == ext)
    }
}

#[derive(Debug)]
struct Queued {
    item: RemoteItem,
    resolved: String,
}

impl MirrorEngine {
    pub fn new(remote: Arc<dyn RemoteStorage>, rename: MagicRename, options: MirrorOptions) -> Self {
        Self {
            remote,
            rename,
            options,
        }
    }

    pub fn options(&self) -> &MirrorOptions {
        &self.options
    }

    /// Mirrors one task. Dead shares ban the task (written into `task`) and
    /// come back as an `Ok` report with `banned` set.
    pub async fn run_task(&self, task: &mut Task) -> Result<TaskReport, MirrorError> {
        let savepath = task.savepath();
        let mut report = TaskReport::new(&task.taskname, &savepath);
        if let Some(reason) = task.ban_reason() {
            info!(task = %task.taskname, reason, "skipping banned share");
            report.banned = Some(reason.to_string());
            return Ok(report);
        }

        let link = match ShareLink::parse(&task.shareurl) {
            Ok(link) => link,
            Err(err) => return Ok(ban(task, report, err.to_string())),
        };
        let token = match self
            .options
            .retry
            .run("resolve share token", || {
                self.remote
                    .resolve_share_token(&link.share_id, &link.passcode)
            })
            .await
        {
            Ok(token) => token,
            Err(err) if err.is_permanent() => return Ok(ban(task, report, reason_of(err))),
            Err(err) => return Err(err.into()),
        };

        let mut run = TaskRun {
            task_name: task.taskname.clone(),
            share_id: link.share_id.clone(),
            token,
            rule: self
                .rename
                .rule(&task.pattern, &task.replace, &task.taskname),
            global: self.options.global_rule.as_ref().map(|global| {
                self.rename
                    .rule(&global.pattern, &global.replace, &task.taskname)
            }),
            subdir_filter: task.update_subdir().map(NameFilter::parse),
            resave: task.resave_mode(),
            ignore_extension: task.ignore_extension(),
            startfid: task.startfid().map(str::to_string),
            filter_words: task.filter_words(),
            episode: task.episode_naming(),
            names: RenameContext::new(),
            tree: ResultTree::new(&savepath),
            renames: Vec::new(),
            failures: Vec::new(),
            ban: None,
        };
        info!(task = %run.task_name, share = %run.share_id, savepath = %savepath, "mirroring share");

        let first_save = self
            .mirror_dir(&mut run, link.start_fid.clone(), savepath, true)
            .await?;
        if let Some(reason) = run.ban.take() {
            return Ok(ban(task, report, reason));
        }

        report.tree = run.tree;
        report.first_save = first_save;
        report.renames = run.renames;
        report.failures = run.failures;
        info!(
            task = %report.task_name,
            saved = report.tree.file_count(),
            renamed = report.renames.len(),
            failures = report.failures.len(),
            "task finished"
        );
        Ok(report)
    }

    fn mirror_dir<'a>(
        &'a self,
        run: &'a mut TaskRun,
        share_dir: String,
        dest_path: String,
        is_root: bool,
    ) -> BoxFuture<'a, Result<bool, MirrorError>> {
        async move {
            let mut share_items = match self.list_share(run, &share_dir).await {
                Ok(items) => items,
                Err(err) if is_root && err.is_permanent() => {
                    run.ban = Some(reason_of(err));
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            };
            if share_items.is_empty() {
                if is_root {
                    run.ban = Some(EMPTY_SHARE.to_string());
                } else {
                    debug!(path = %dest_path, "share folder is empty");
                }
                return Ok(false);
            }
            if is_root && share_items.len() == 1 && share_items[0].is_dir {
                let only = share_items.remove(0);
                info!(task = %run.task_name, folder = %only.name, "share holds a single folder, mirroring its contents");
                share_items = self.list_share(run, &only.id).await?;
            }

            let dest_id = self
                .options
                .retry
                .run("ensure destination folder", || {
                    self.remote.ensure_directory(&dest_path)
                })
                .await?;
            let dest_items = self
                .options
                .retry
                .run("list destination folder", || {
                    self.remote.list_directory(&dest_id)
                })
                .await?;
            let first_save = is_root && dest_items.is_empty();
            let index = DestinationIndex::new(&dest_items);

            let mut queue = Vec::new();
            let mut queued_names = HashSet::new();
            for item in share_items {
                let is_start = run.startfid.as_deref() == Some(item.id.as_str());
                if self.is_blacklisted(&item.name) {
                    debug!(name = %item.name, "blacklisted");
                } else if is_dedup_suffixed(&item.name) {
                    debug!(name = %item.name, "skipping collision copy");
                } else if item.is_dir {
                    self.visit_dir(run, item, &dest_path, &index, &mut queue)
                        .await;
                } else if let Some(queued) = self.plan_file(run, item, &index, &mut queued_names) {
                    queue.push(queued);
                }
                if is_start {
                    debug!(path = %dest_path, "reached start marker");
                    break;
                }
            }

            if queue
                .iter()
                .any(|queued| !queued.item.is_dir && contains_sequence(&queued.resolved))
            {
                resolve_sequence(run, &dest_path, &index, &mut queue);
            }
            let incoming: HashSet<String> = queue.iter().map(|queued| queued.resolved.clone()).collect();
            let saved = self.save_queue(run, &dest_path, &dest_id, queue).await;
            self.rename_existing(run, &dest_path, &dest_items, incoming)
                .await;
            Ok(first_save && saved > 0)
        }
        .boxed()
    }

    async fn visit_dir(
        &self,
        run: &mut TaskRun,
        item: RemoteItem,
        dest_path: &str,
        index: &DestinationIndex,
        queue: &mut Vec<Queued>,
    ) {
        let matched = match (&run.subdir_filter, &run.episode) {
            (Some(filter), _) => filter.is_match(&item.name),
            (None, Some(_)) => false,
            (None, None) => run.rule.is_match(&item.name),
        };
        if !matched {
            debug!(folder = %item.name, "folder does not match filter");
            return;
        }
        let existing = index
            .find_dir(&item.name)
            .map(|dir| (dir.name.to_string(), dir.id.to_string()));
        match existing {
            None => {
                debug!(folder = %item.name, "queueing new folder");
                queue.push(Queued {
                    resolved: item.name.clone(),
                    item,
                });
            }
            Some((existing_name, existing_id)) if run.resave && run.subdir_filter.is_some() => {
                let sub_path = join(dest_path, &existing_name);
                match self.purge_dir(&existing_id, &sub_path).await {
                    Ok(()) => queue.push(Queued {
                        resolved: item.name.clone(),
                        item,
                    }),
                    Err(err) => {
                        warn!(path = %sub_path, error = %err, "resave failed");
                        run.fail(dest_path, &item.name, FailureStage::Resave, err);
                    }
                }
            }
            Some((existing_name, _)) => {
                let sub_path = join(dest_path, &existing_name);
                if let Err(err) = self
                    .mirror_dir(run, item.id.clone(), sub_path.clone(), false)
                    .await
                {
                    warn!(path = %sub_path, error = %err, "folder mirror failed");
                    run.fail(dest_path, &item.name, FailureStage::List, err);
                }
            }
        }
    }

    fn plan_file(
        &self,
        run: &TaskRun,
        item: RemoteItem,
        index: &DestinationIndex,
        queued_names: &mut HashSet<String>,
    ) -> Option<Queued> {
        let name = item.name.as_str();
        if run.filtered_by_words(name) {
            debug!(file = %name, "filtered by word");
            return None;
        }
        if let Some(naming) = &run.episode {
            return self.plan_episode(run, naming, item, index, queued_names);
        }
        if !run.rule.is_match(name) {
            return None;
        }
        if let Some(existing) = index.find(name, run.ignore_extension) {
            debug!(file = %name, existing = %existing, "already present");
            return None;
        }

        let mut resolved = name.to_string();
        if let Some(global) = &run.global
            && global.is_match(&resolved)
        {
            resolved = self.rename.apply(global, &resolved, &run.task_name);
        }
        resolved = self.rename.apply(&run.rule, &resolved, &run.task_name);
        if contains_sequence(&resolved) {
            if let Some(existing) = index.find_same_upload(&item) {
                debug!(file = %name, existing = %existing, "same upload already numbered");
                return None;
            }
            return Some(Queued { item, resolved });
        }
        if resolved != name
            && let Some(existing) = index.find(&resolved, run.ignore_extension)
        {
            debug!(file = %name, renamed = %resolved, existing = %existing, "already present after rename");
            return None;
        }
        if !queued_names.insert(resolved.clone()) {
            debug!(file = %name, renamed = %resolved, "another share item already maps to this name");
            return None;
        }
        Some(Queued { item, resolved })
    }

    /// Episode mode: files without a recognisable number keep their name.
    fn plan_episode(
        &self,
        run: &TaskRun,
        naming: &EpisodeNaming,
        item: RemoteItem,
        index: &DestinationIndex,
        queued_names: &mut HashSet<String>,
    ) -> Option<Queued> {
        let name = item.name.as_str();
        if let Some(existing) = index.find(name, run.ignore_extension) {
            debug!(file = %name, existing = %existing, "already present");
            return None;
        }
        let resolved = self
            .rename
            .episode_name(naming, name)
            .unwrap_or_else(|| name.to_string());
        if resolved != name
            && let Some(existing) = index.find(&resolved, run.ignore_extension)
        {
            debug!(file = %name, renamed = %resolved, existing = %existing, "episode already present");
            return None;
        }
        if !queued_names.insert(resolved.clone()) {
            debug!(file = %name, renamed = %resolved, "another share item already maps to this episode");
            return None;
        }
        Some(Queued { item, resolved })
    }

    /// Returns how many queued items landed in the destination.
    async fn save_queue(&self, run: &mut TaskRun, dest_path: &str, dest_id: &str, queue: Vec<Queued>) -> usize {
        let mut saved = 0;
        for chunk in queue.chunks(self.options.save_batch_size.max(1)) {
            let batch = SaveBatch {
                item_ids: chunk.iter().map(|q| q.item.id.clone()).collect(),
                item_tokens: chunk.iter().map(|q| q.item.share_token.clone()).collect(),
                dest_dir: dest_id.to_string(),
                share_id: run.share_id.clone(),
                token: run.token.clone(),
            };
            let saved_ids = match self.save_batch(&batch).await {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(path = %dest_path, items = chunk.len(), error = %err, "save failed");
                    for queued in chunk {
                        run.fail(dest_path, &queued.item.name, FailureStage::Save, &err);
                    }
                    continue;
                }
            };
            for (queued, new_id) in chunk.iter().zip(&saved_ids) {
                self.attach(run, dest_path, dest_id, queued, new_id).await;
                saved += 1;
            }
            for queued in chunk.iter().skip(saved_ids.len()) {
                run.fail(
                    dest_path,
                    &queued.item.name,
                    FailureStage::Save,
                    "missing from save result",
                );
            }
        }
        saved
    }

    /// Brings files already in the destination in line with the task's rule.
    /// Targets that are taken, by an existing file or by something saved in
    /// this run, are left alone.
    async fn rename_existing(
        &self,
        run: &mut TaskRun,
        dest_path: &str,
        dest_items: &[RemoteItem],
        mut taken: HashSet<String>,
    ) {
        taken.extend(dest_items.iter().map(|item| item.name.clone()));
        let mut planned: Vec<(&RemoteItem, String)> = Vec::new();
        for item in dest_items.iter().filter(|item| !item.is_dir) {
            let Some(target) = self.existing_target(run, &item.name) else {
                continue;
            };
            if target == item.name || !taken.insert(target.clone()) {
                continue;
            }
            planned.push((item, target));
        }
        planned.sort_by(|a, b| natsort::compare(&a.1, &b.1));

        for (item, target) in planned {
            let renamed = self
                .options
                .retry
                .run("rename existing file", || self.remote.rename(&item.id, &target))
                .await;
            match renamed {
                Ok(()) => {
                    info!(path = %dest_path, from = %item.name, to = %target, "renamed existing file");
                    run.renames.push(ExistingRename {
                        path: dest_path.to_string(),
                        id: item.id.clone(),
                        from: item.name.clone(),
                        to: target,
                    });
                }
                Err(err) => {
                    warn!(path = %dest_path, from = %item.name, to = %target, error = %err, "rename failed");
                    run.fail(dest_path, &item.name, FailureStage::Rename, err);
                }
            }
        }
    }

    fn existing_target(&self, run: &TaskRun, name: &str) -> Option<String> {
        if let Some(naming) = &run.episode {
            return self.rename.episode_name(naming, name);
        }
        let rule = &run.rule;
        if !matches!(rule.filter(), NameFilter::Regex(_)) || rule.replace().is_empty() || rule.has_sequence() {
            return None;
        }
        let target = self.rename.apply(rule, name, &run.task_name);
        if let Some((head, rest)) = target.split_once(" - ") {
            let next = rest.split(" - ").next().unwrap_or(rest);
            if head == next {
                return None;
            }
            if let Some((prefix, _)) = rule.replace().split_once(" - ")
                && !prefix.is_empty()
                && name.contains(prefix)
            {
                return None;
            }
        }
        Some(target)
    }

    async fn save_batch(&self, batch: &SaveBatch) -> Result<Vec<String>, MirrorError> {
        let task_id = self
            .options
            .retry
            .run("save shared items", || self.remote.save_items(batch))
            .await?;
        self.wait_task(&task_id).await
    }

    async fn wait_task(&self, task_id: &str) -> Result<Vec<String>, MirrorError> {
        for attempt in 0..self.options.poll_attempts.max(1) {
            let poll = self
                .options
                .retry
                .run("poll remote task", || self.remote.poll_task(task_id))
                .await?;
            match poll {
                TaskPoll::Finished { saved_ids } => return Ok(saved_ids),
                TaskPoll::Failed(reason) => {
                    return Err(MirrorError::TaskFailed {
                        task_id: task_id.to_string(),
                        reason,
                    });
                }
                TaskPoll::Running => {
                    let delay: Duration = self.options.poll_backoff.delay(attempt);
                    debug!(task_id, attempt, ?delay, "remote task still running");
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(MirrorError::TaskTimeout(task_id.to_string()))
    }

    async fn attach(
        &self,
        run: &mut TaskRun,
        dest_path: &str,
        dest_id: &str,
        queued: &Queued,
        new_id: &str,
    ) {
        let item = &queued.item;
        if item.is_dir {
            run.tree.add_dir(dest_path, dest_id, new_id, &queued.resolved);
        } else {
            run.tree.add_file(
                dest_path,
                dest_id,
                SavedFile {
                    id: new_id.to_string(),
                    original: item.name.clone(),
                    resolved: queued.resolved.clone(),
                    category: FileCategory::detect(item.category.as_deref(), &queued.resolved),
                    size: item.size,
                    updated_at: item.updated_at,
                },
            );
        }
        info!(task = %run.task_name, path = %dest_path, name = %item.name, "saved");

        if queued.resolved == item.name {
            return;
        }
        let renamed = self
            .options
            .retry
            .run("rename saved item", || {
                self.remote.rename(new_id, &queued.resolved)
            })
            .await;
        match renamed {
            Ok(()) => info!(from = %item.name, to = %queued.resolved, "renamed"),
            Err(err) => {
                warn!(from = %item.name, to = %queued.resolved, error = %err, "rename failed");
                run.tree.revert_name(new_id);
                run.fail(dest_path, &item.name, FailureStage::Rename, err);
            }
        }
    }

    async fn purge_dir(&self, dir_id: &str, path: &str) -> Result<(), MirrorError> {
        let retry = &self.options.retry;
        let ids = vec![dir_id.to_string()];
        let task_id = retry
            .run("delete folder for resave", || self.remote.delete(&ids))
            .await?;
        self.wait_task(&task_id).await?;
        let records = retry
            .run("list recycle bin", || self.remote.list_recycled())
            .await?;
        let record_ids: Vec<String> = records
            .into_iter()
            .filter(|record| record.item_id == dir_id)
            .map(|record| record.record_id)
            .collect();
        retry
            .run("purge recycle bin", || {
                self.remote.purge_recycled(&record_ids)
            })
            .await?;
        self.remote.forget_path(path);
        info!(path, "removed folder for resave");
        Ok(())
    }

    async fn list_share(
        &self,
        run: &TaskRun,
        dir_id: &str,
    ) -> Result<Vec<RemoteItem>, RetryError<RemoteError>> {
        self.options
            .retry
            .run("list share folder", || {
                self.remote.list_share(&run.share_id, &run.token, dir_id)
            })
            .await
    }

    fn is_blacklisted(&self, name: &str) -> bool {
        self.options
            .file_blacklist
            .iter()
            .any(|word| !word.is_empty() && name.contains(word.as_str()))
    }
}

/// Sequence template for a folder: the task's own replace when it numbers,
/// otherwise the global rule's.
fn sequence_template(run: &TaskRun) -> &str {
    if run.rule.has_sequence() {
        return run.rule.replace();
    }
    run.global
        .as_ref()
        .filter(|global| global.has_sequence())
        .map_or("", |global| global.replace())
}

fn resolve_sequence(run: &mut TaskRun, dest_path: &str, index: &DestinationIndex, queue: &mut [Queued]) {
    let slots: Vec<usize> = queue
        .iter()
        .enumerate()
        .filter(|(_, queued)| !queued.item.is_dir && contains_sequence(&queued.resolved))
        .map(|(slot, _)| slot)
        .collect();
    if slots.is_empty() {
        return;
    }
    let pending: Vec<PendingName<'_>> = slots
        .iter()
        .map(|&slot| PendingName {
            original: &queue[slot].item.name,
            resolved: &queue[slot].resolved,
        })
        .collect();
    let template = sequence_template(run).to_string();
    let names = run
        .names
        .assign(dest_path, &template, index.names(), &pending);
    for (slot, name) in slots.into_iter().zip(names) {
        queue[slot].resolved = name;
    }
}

fn ban(task: &mut Task, mut report: TaskReport, reason: String) -> TaskReport {
    warn!(task = %task.taskname, reason = %reason, "banning share");
    task.ban(reason.clone());
    report.banned = Some(reason);
    report
}

fn reason_of(err: RetryError<RemoteError>) -> String {
    match err.into_inner() {
        RemoteError::Rejected(message) | RemoteError::Transient(message) => message,
    }
}

fn join(parent: &str, name: &str) -> String {
    format!("{}/{name}", parent.trim_end_matches('/'))
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
