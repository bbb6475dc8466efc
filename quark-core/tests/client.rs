use quark_core::{ApiErrorClass, QuarkClient, QuarkError, SaveRequest, TaskState};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn get_account_info_sends_cookie() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/account/info"))
        .and(header("cookie", "kps=abc; sign=def"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "code": "OK",
            "data": { "nickname": "tester" }
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), " kps=abc; sign=def ").unwrap();
    let info = client.get_account_info().await.unwrap();

    assert_eq!(info.nickname, "tester");
}

#[tokio::test]
async fn get_share_token_posts_share_id_and_passcode() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/clouddrive/share/sharepage/token"))
        .and(query_param("pr", "ucpro"))
        .and(body_partial_json(json!({ "pwd_id": "abc123", "passcode": "9x" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "code": 0,
            "message": "ok",
            "data": { "stoken": "share-token" }
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let token = client.get_share_token("abc123", "9x").await.unwrap();

    assert_eq!(token, "share-token");
}

#[tokio::test]
async fn expired_share_is_rejected_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/clouddrive/share/sharepage/token"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "status": 404,
            "code": 41011,
            "message": "share expired"
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let err = client.get_share_token("gone", "").await.unwrap_err();

    match &err {
        QuarkError::Rejected { code, message } => {
            assert_eq!(*code, 41011);
            assert_eq!(message, "share expired");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.classification(), Some(ApiErrorClass::Permanent));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1/clouddrive/file/sort"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let err = client.list_directory("0", 1, 50).await.unwrap_err();

    assert!(matches!(err, QuarkError::Api { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn list_share_all_follows_pages_until_total() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1/clouddrive/share/sharepage/detail"))
        .and(query_param("pdir_fid", "0"))
        .and(query_param("_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "list": [
                { "fid": "f1", "file_name": "E01.mkv", "dir": false, "share_fid_token": "t1" },
                { "fid": "f2", "file_name": "E02.mkv", "dir": false, "share_fid_token": "t2" }
            ]},
            "metadata": { "_total": 3 }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/1/clouddrive/share/sharepage/detail"))
        .and(query_param("_page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "list": [
                { "fid": "d1", "file_name": "Extras", "dir": true, "share_fid_token": "t3" }
            ]},
            "metadata": { "_total": 3 }
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let items = client.list_share_all("abc", "stoken", "0", 2).await.unwrap();

    assert_eq!(items.len(), 3);
    assert_eq!(items[0].share_fid_token, "t1");
    assert!(items[2].dir);
}

#[tokio::test]
async fn list_directory_all_stops_on_empty_page() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/1/clouddrive/file/sort"))
        .and(query_param("pdir_fid", "dest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "list": [] },
            "metadata": { "_total": 0 }
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let items = client.list_directory_all("dest", 50).await.unwrap();

    assert!(items.is_empty());
}

#[tokio::test]
async fn get_fids_returns_known_paths() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/info/path_list"))
        .and(body_partial_json(json!({ "file_path": ["/TV/Show", "/TV/Missing"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": [ { "file_path": "/TV/Show", "fid": "show-fid" } ]
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let found = client
        .get_fids(&["/TV/Show".to_string(), "/TV/Missing".to_string()])
        .await
        .unwrap();

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].fid, "show-fid");
}

#[tokio::test]
async fn save_shared_then_task_reports_saved_fids() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/clouddrive/share/sharepage/save"))
        .and(body_partial_json(json!({
            "fid_list": ["f1"],
            "fid_token_list": ["t1"],
            "to_pdir_fid": "dest",
            "pwd_id": "abc",
            "stoken": "st",
            "scene": "link"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "task_id": "task-1" }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/1/clouddrive/task"))
        .and(query_param("task_id", "task-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": {
                "status": 2,
                "task_title": "save",
                "save_as": { "save_as_top_fids": ["new-f1"] }
            }
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let task = client
        .save_shared(&SaveRequest {
            fids: vec!["f1".into()],
            fid_tokens: vec!["t1".into()],
            to_pdir_fid: "dest".into(),
            pwd_id: "abc".into(),
            stoken: "st".into(),
        })
        .await
        .unwrap();
    let info = client.get_task(&task.task_id, 0).await.unwrap();

    assert_eq!(info.state(), TaskState::Succeeded);
    assert_eq!(info.saved_fids(), ["new-f1".to_string()]);
}

#[tokio::test]
async fn rename_reports_vendor_rejection() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/rename"))
        .and(body_partial_json(json!({ "fid": "f1", "file_name": "E01.mkv" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 23008,
            "message": "file name conflict"
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let err = client.rename("f1", "E01.mkv").await.unwrap_err();

    assert!(matches!(err, QuarkError::Rejected { code: 23008, .. }));
}

#[tokio::test]
async fn delete_and_purge_recycle_bin() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/delete"))
        .and(body_partial_json(json!({ "action_type": 2, "filelist": ["d1"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "task_id": "del-1" }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/1/clouddrive/file/recycle/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "list": [
                { "record_id": "r1", "fid": "d1", "file_name": "Season 1" },
                { "record_id": "r2", "fid": "other" }
            ]}
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file/recycle/remove"))
        .and(body_partial_json(json!({ "select_mode": 2, "record_list": ["r1"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 0 })))
        .expect(1)
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let task = client.delete(&["d1".to_string()]).await.unwrap();
    assert_eq!(task.task_id, "del-1");

    let records = client.recycle_list(1, 30).await.unwrap();
    let ids: Vec<String> = records
        .into_iter()
        .filter(|record| record.fid == "d1")
        .map(|record| record.record_id)
        .collect();
    client.recycle_remove(&ids).await.unwrap();
}

#[tokio::test]
async fn create_folder_returns_new_fid() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/clouddrive/file"))
        .and(body_partial_json(json!({ "dir_path": "/TV/Show" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": 0,
            "data": { "fid": "new-dir" }
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();
    let folder = client.create_folder("/TV/Show").await.unwrap();

    assert_eq!(folder.fid, "new-dir");
}

#[tokio::test]
async fn missing_data_and_list_fields_are_tolerated() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/1/clouddrive/share/sharepage/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "code": 0,
            "message": "ok"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/1/clouddrive/file/sort"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": 200,
            "code": 0,
            "data": {},
            "metadata": { "_total": 0 }
        })))
        .mount(&server)
        .await;

    let client = QuarkClient::with_base_url(&server.uri(), "cookie").unwrap();

    let err = client.get_share_token("abc123", "").await.unwrap_err();
    assert!(matches!(err, QuarkError::MissingData));

    let files = client.list_directory_all("0", 50).await.unwrap();
    assert!(files.is_empty());
}
