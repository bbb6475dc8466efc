//! Run summaries and the hook for downstream consumers.

use std::fmt::Write as _;

use async_trait::async_trait;
use tracing::info;

use crate::mirror::{FailureStage, TaskReport};

pub const NOTIFY_TITLE: &str = "Quark autosave";

/// Receives per-task results and the aggregated run message.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called for every task that added something. Media library refreshes
    /// hang off this.
    async fn task_finished(&self, _report: &TaskReport) {}

    async fn send(&self, title: &str, body: &str);
}

/// Writes everything to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn task_finished(&self, report: &TaskReport) {
        info!(
            task = %report.task_name,
            files = report.tree.file_count(),
            renamed = report.renames.len(),
            first_save = report.first_save,
            "task changed destination"
        );
    }

    async fn send(&self, title: &str, body: &str) {
        info!(title, "\n{body}");
    }
}

/// Accumulates message sections across tasks.
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    sections: Vec<String>,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the task's section when there is something to say.
    pub fn add_report(&mut self, report: &TaskReport) {
        if let Some(section) = render_report(report) {
            self.sections.push(section);
        }
    }

    pub fn add_error(&mut self, task_name: &str, error: &str) {
        self.sections
            .push(format!("#{task_name}\n❌ task failed: {error}\n"));
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn text(&self) -> String {
        self.sections.join("\n")
    }
}

fn stage_label(stage: FailureStage) -> &'static str {
    match stage {
        FailureStage::List => "listing",
        FailureStage::Save => "save",
        FailureStage::Rename => "rename",
        FailureStage::Resave => "resave",
    }
}

/// Header, rendered tree and failures for one task. `None` when the task
/// neither changed anything nor failed.
pub fn render_report(report: &TaskReport) -> Option<String> {
    if !report.has_changes() && report.failures.is_empty() && report.banned.is_none() {
        return None;
    }
    let mut out = format!("#{}\n", report.task_name);
    if let Some(reason) = &report.banned {
        let _ = writeln!(out, "❌ share unavailable: {reason}");
    }
    if !report.tree.is_empty() {
        let _ = writeln!(
            out,
            "✅ saved {} file(s){}",
            report.tree.file_count(),
            if report.first_save { " (first save)" } else { "" }
        );
        out.push_str(&report.tree.render());
    }
    for rename in &report.renames {
        let _ = writeln!(out, "🔄 renamed {} → {}", rename.from, rename.to);
    }
    for failure in &report.failures {
        let _ = writeln!(
            out,
            "⚠️ {} failed for {}/{}: {}",
            stage_label(failure.stage),
            failure.path.trim_end_matches('/'),
            failure.name,
            failure.reason
        );
    }
    Some(out)
}
