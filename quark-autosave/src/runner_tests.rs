use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use quark_core::QuarkClient;
use serde_json::json;
use sqlx::SqlitePool;
use time::macros::date;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::*;
use crate::mirror::MirrorOptions;
use crate::remote::{
    RecycledRecord, RemoteError, RemoteItem, RemoteStorage, SaveBatch, TaskPoll,
};
use crate::rename::MagicRename;
use crate::retry::RetrySettings;

/// Every share holds one file named after the share id. Share `broken`
/// cannot be opened.
#[derive(Default)]
struct StubRemote {
    tokens: Mutex<Vec<String>>,
    items: Mutex<HashMap<String, RemoteItem>>,
    saved: Mutex<HashMap<String, Vec<RemoteItem>>>,
    finished: Mutex<HashMap<String, Vec<String>>>,
}

impl StubRemote {
    fn token_requests(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteStorage for StubRemote {
    async fn resolve_share_token(&self, share_id: &str, _passcode: &str) -> Result<String, RemoteError> {
        self.tokens.lock().unwrap().push(share_id.to_string());
        if share_id == "broken" {
            return Err(RemoteError::Transient("connection reset".into()));
        }
        Ok(format!("tok-{share_id}"))
    }

    async fn list_share(
        &self,
        share_id: &str,
        _token: &str,
        dir_id: &str,
    ) -> Result<Vec<RemoteItem>, RemoteError> {
        if dir_id != "0" {
            return Ok(Vec::new());
        }
        let item = RemoteItem::file(format!("{share_id}-1"), format!("{share_id}.mkv"));
        self.items
            .lock()
            .unwrap()
            .insert(item.id.clone(), item.clone());
        Ok(vec![item])
    }

    async fn list_directory(&self, dir_id: &str) -> Result<Vec<RemoteItem>, RemoteError> {
        Ok(self
            .saved
            .lock()
            .unwrap()
            .get(dir_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn ensure_directory(&self, path: &str) -> Result<String, RemoteError> {
        Ok(path.to_string())
    }

    async fn save_items(&self, batch: &SaveBatch) -> Result<String, RemoteError> {
        let items = self.items.lock().unwrap();
        let mut saved = self.saved.lock().unwrap();
        let mut ids = Vec::new();
        for id in &batch.item_ids {
            let mut copy = items[id].clone();
            copy.id = format!("saved-{id}");
            ids.push(copy.id.clone());
            saved.entry(batch.dest_dir.clone()).or_default().push(copy);
        }
        let task_id = format!("task-{}", batch.share_id);
        self.finished.lock().unwrap().insert(task_id.clone(), ids);
        Ok(task_id)
    }

    async fn poll_task(&self, task_id: &str) -> Result<TaskPoll, RemoteError> {
        let saved_ids = self
            .finished
            .lock()
            .unwrap()
            .get(task_id)
            .cloned()
            .unwrap_or_default();
        Ok(TaskPoll::Finished { saved_ids })
    }

    async fn rename(&self, _item_id: &str, _new_name: &str) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn delete(&self, _item_ids: &[String]) -> Result<String, RemoteError> {
        Err(RemoteError::Rejected("delete not expected".into()))
    }

    async fn list_recycled(&self) -> Result<Vec<RecycledRecord>, RemoteError> {
        Ok(Vec::new())
    }

    async fn purge_recycled(&self, _record_ids: &[String]) -> Result<(), RemoteError> {
        Ok(())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    finished: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn task_finished(&self, report: &TaskReport) {
        self.finished.lock().unwrap().push(report.task_name.clone());
    }

    async fn send(&self, _title: &str, body: &str) {
        self.messages.lock().unwrap().push(body.to_string());
    }
}

fn task(name: &str, share_id: &str) -> Task {
    Task {
        taskname: name.into(),
        shareurl: format!("https://pan.quark.cn/s/{share_id}"),
        savepath: format!("/TV/{name}"),
        ..Task::default()
    }
}

fn runner(remote: &Arc<StubRemote>, notifier: &Arc<RecordingNotifier>) -> Runner {
    let engine = MirrorEngine::new(
        remote.clone(),
        MagicRename::default(),
        MirrorOptions {
            retry: RetrySettings::flat(2, Duration::ZERO),
            ..MirrorOptions::default()
        },
    );
    Runner::new(engine, notifier.clone()).with_today(date!(2024 - 06 - 24))
}

#[tokio::test]
async fn banned_task_makes_no_remote_calls() {
    let remote = Arc::new(StubRemote::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut banned = task("Gone", "gone");
    banned.ban("share expired");
    let mut tasks = vec![banned, task("Good", "good")];

    let outcome = runner(&remote, &notifier).run(&mut tasks, None).await.unwrap();

    assert_eq!(remote.token_requests(), ["good"]);
    assert_eq!(outcome.reports.len(), 1);
    assert_eq!(notifier.finished.lock().unwrap().as_slice(), ["Good"]);
}

#[tokio::test]
async fn failing_task_does_not_stop_later_tasks() {
    let remote = Arc::new(StubRemote::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut tasks = vec![task("Broken", "broken"), task("Good", "good")];

    let outcome = runner(&remote, &notifier).run(&mut tasks, None).await.unwrap();

    assert_eq!(outcome.failed, ["Broken"]);
    assert_eq!(outcome.reports.len(), 1);
    assert!(tasks[0].ban_reason().is_none());
    let messages = notifier.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("#Broken\n❌ task failed"));
    assert!(messages[0].contains("#Good\n✅ saved 1 file(s)"));
}

#[tokio::test]
async fn saved_files_are_recorded() {
    let remote = Arc::new(StubRemote::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let records = RecordStore::from_pool(pool);
    records.init().await.unwrap();
    let runner = runner(&remote, &notifier).with_records(records);
    let mut tasks = vec![task("Good", "good")];

    runner.run(&mut tasks, None).await.unwrap();

    let rows = runner.records().unwrap().list(Some("Good"), 10).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].original_name, "good.mkv");
    assert_eq!(rows[0].file_id, "saved-good-1");
    assert_eq!(rows[0].save_path, "/TV/Good");
}

#[tokio::test]
async fn runs_only_selected_task_and_rejects_bad_index() {
    let remote = Arc::new(StubRemote::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = runner(&remote, &notifier);
    let mut tasks = vec![task("A", "a"), task("B", "b")];

    runner.run(&mut tasks, Some(2)).await.unwrap();
    assert_eq!(remote.token_requests(), ["b"]);

    let err = runner.run(&mut tasks, Some(3)).await.unwrap_err();
    assert!(matches!(err, RunError::NoSuchTask { index: 3, len: 2 }));
    assert!(runner.run(&mut tasks, Some(0)).await.is_err());
}

#[tokio::test]
async fn unscheduled_task_is_skipped() {
    let remote = Arc::new(StubRemote::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut weekend = task("Weekend", "weekend");
    weekend.runweek = Some(vec![6, 7]);
    let mut tasks = vec![weekend];

    let outcome = runner(&remote, &notifier).run(&mut tasks, None).await.unwrap();

    assert!(outcome.reports.is_empty());
    assert!(remote.token_requests().is_empty());
    assert!(notifier.messages.lock().unwrap().is_empty());
}

#[tokio::test]
async fn prepare_rejects_invalid_account() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "code": "OK"
        })))
        .mount(&server)
        .await;

    let remote = QuarkRemote::new(QuarkClient::with_base_url(&server.uri(), "bad").unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = runner(&Arc::new(StubRemote::default()), &notifier);

    let err = prepare(&remote, &runner, &[task("A", "a")]).await.unwrap_err();
    assert!(matches!(err, RunError::Account(_)));
}

#[tokio::test]
async fn prepare_warms_due_task_paths() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/account/info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "code": "OK",
            "data": { "nickname": "tester" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/info/path_list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [ { "file_path": "/TV/A", "fid": "a-fid" } ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let remote = QuarkRemote::new(QuarkClient::with_base_url(&server.uri(), "good").unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let runner = runner(&Arc::new(StubRemote::default()), &notifier);
    let mut banned = task("B", "b");
    banned.ban("gone");

    let nickname = prepare(&remote, &runner, &[task("A", "a"), banned]).await.unwrap();

    assert_eq!(nickname, "tester");
    assert_eq!(remote.ensure_directory("/TV/A").await.unwrap(), "a-fid");
}
