//! Runs the configured task list once.

use std::sync::Arc;

use quark_core::QuarkError;
use thiserror::Error;
use time::Date;
use tracing::{error, info, warn};

use crate::mirror::{MirrorEngine, TaskReport};
use crate::notify::{NOTIFY_TITLE, Notifier, RunSummary};
use crate::records::RecordStore;
use crate::remote::QuarkRemote;
use crate::task::Task;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("account verification failed, check the cookie: {0}")]
    Account(#[source] QuarkError),
    #[error("task #{index} does not exist ({len} configured)")]
    NoSuchTask { index: usize, len: usize },
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub reports: Vec<TaskReport>,
    /// Names of tasks that ended with an error.
    pub failed: Vec<String>,
    pub summary: RunSummary,
}

pub struct Runner {
    engine: MirrorEngine,
    records: Option<RecordStore>,
    notifier: Arc<dyn Notifier>,
    today: Option<Date>,
}

impl Runner {
    pub fn new(engine: MirrorEngine, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            engine,
            records: None,
            notifier,
            today: None,
        }
    }

    pub fn with_records(mut self, records: RecordStore) -> Self {
        self.records = Some(records);
        self
    }

    /// Pins the date used for schedule checks.
    pub fn with_today(mut self, today: Date) -> Self {
        self.today = Some(today);
        self
    }

    pub fn records(&self) -> Option<&RecordStore> {
        self.records.as_ref()
    }

    /// Whether `task` should run now: not banned and scheduled for today.
    pub fn is_due(&self, task: &Task) -> bool {
        task.ban_reason().is_none()
            && match self.today {
                Some(today) => task.is_time(today),
                None => task.is_time_now(),
            }
    }

    /// Runs every due task in order, or only task number `only` (1-based).
    /// A failing task never stops the ones after it. Bans land in `tasks`.
    pub async fn run(&self, tasks: &mut [Task], only: Option<usize>) -> Result<RunOutcome, RunError> {
        let selected = match only {
            Some(index) if index == 0 || index > tasks.len() => {
                return Err(RunError::NoSuchTask {
                    index,
                    len: tasks.len(),
                });
            }
            Some(index) => index - 1..index,
            None => 0..tasks.len(),
        };

        let mut outcome = RunOutcome::default();
        for position in selected {
            let task = &mut tasks[position];
            let number = position + 1;
            if let Some(reason) = task.ban_reason() {
                info!(task = %task.taskname, number, reason, "share banned, skipping");
                continue;
            }
            if !self.is_due(task) {
                info!(task = %task.taskname, number, "not scheduled today");
                continue;
            }
            info!(task = %task.taskname, number, "running task");

            match self.engine.run_task(task).await {
                Ok(report) => {
                    if report.has_changes() {
                        self.notifier.task_finished(&report).await;
                        self.write_records(&report).await;
                    }
                    outcome.summary.add_report(&report);
                    outcome.reports.push(report);
                }
                Err(err) => {
                    error!(task = %task.taskname, error = %err, "task failed");
                    outcome.summary.add_error(&task.taskname, &err.to_string());
                    outcome.failed.push(task.taskname.clone());
                }
            }
        }

        if !outcome.summary.is_empty() {
            self.notifier
                .send(NOTIFY_TITLE, &outcome.summary.text())
                .await;
        }
        Ok(outcome)
    }

    async fn write_records(&self, report: &TaskReport) {
        let Some(records) = &self.records else {
            return;
        };
        match records.record_tree(&report.task_name, &report.tree).await {
            Ok(written) => info!(task = %report.task_name, written, "transfer records saved"),
            Err(err) => warn!(task = %report.task_name, error = %err, "failed to save transfer records"),
        }
        for rename in &report.renames {
            if let Err(err) = records.update_renamed_by_file_id(&rename.id, &rename.to).await {
                warn!(task = %report.task_name, file = %rename.from, error = %err, "failed to update transfer record");
            }
        }
    }
}

/// Checks the saving account and resolves destination folders for every
/// task that will run. Returns the account nickname.
pub async fn prepare(remote: &QuarkRemote, runner: &Runner, tasks: &[Task]) -> Result<String, RunError> {
    let account = remote
        .client()
        .get_account_info()
        .await
        .map_err(RunError::Account)?;
    info!(nickname = %account.nickname, "account verified");

    let paths: Vec<String> = tasks
        .iter()
        .filter(|task| runner.is_due(task))
        .map(Task::savepath)
        .collect();
    if let Err(err) = remote.warm_paths(&paths).await {
        warn!(error = %err, "could not resolve destination folders up front");
    }
    Ok(account.nickname)
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
