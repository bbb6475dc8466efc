use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://drive-pc.quark.cn";
const DEFAULT_ACCOUNT_URL: &str = "https://pan.quark.cn";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) quark-cloud-drive/3.14.2 Chrome/112.0.5615.165 Electron/24.1.3.8 Safari/537.36 Channel/pckk_other_ch";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PATH_LIST_CHUNK: usize = 50;

#[derive(Debug, Error)]
pub enum QuarkError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("api rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("api response missing data")]
    MissingData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct QuarkClient {
    http: Client,
    base_url: Url,
    account_url: Url,
    cookie: String,
}

impl QuarkClient {
    pub fn new(cookie: impl Into<String>) -> Result<Self, QuarkError> {
        Self::with_base_urls(DEFAULT_BASE_URL, DEFAULT_ACCOUNT_URL, cookie)
    }

    /// Points both the drive API and the account endpoint at `base_url`.
    pub fn with_base_url(base_url: &str, cookie: impl Into<String>) -> Result<Self, QuarkError> {
        Self::with_base_urls(base_url, base_url, cookie)
    }

    pub fn with_base_urls(
        base_url: &str,
        account_url: &str,
        cookie: impl Into<String>,
    ) -> Result<Self, QuarkError> {
        Ok(Self {
            http: build_http(DEFAULT_TIMEOUT)?,
            base_url: Url::parse(base_url)?,
            account_url: Url::parse(account_url)?,
            cookie: cookie.into().trim().to_string(),
        })
    }

    /// Replaces the HTTP client with one bounded by `timeout` per request.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, QuarkError> {
        self.http = build_http(timeout)?;
        Ok(self)
    }

    pub async fn get_account_info(&self) -> Result<AccountInfo, QuarkError> {
        let mut url = self.account_url.join("/account/info")?;
        url.query_pairs_mut()
            .append_pair("fr", "pc")
            .append_pair("platform", "pc");
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_data(response).await
    }

    /// Exchanges a share id and passcode for the share-scoped access token.
    pub async fn get_share_token(&self, pwd_id: &str, passcode: &str) -> Result<String, QuarkError> {
        let url = self.endpoint("/1/clouddrive/share/sharepage/token")?;
        let response = self
            .authorized(self.http.post(url))
            .json(&ShareTokenRequest { pwd_id, passcode })
            .send()
            .await?;
        let data: ShareTokenData = Self::handle_data(response).await?;
        Ok(data.stoken)
    }

    pub async fn get_share_detail(
        &self,
        pwd_id: &str,
        stoken: &str,
        pdir_fid: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<ShareFile>, QuarkError> {
        let mut url = self.endpoint("/1/clouddrive/share/sharepage/detail")?;
        url.query_pairs_mut()
            .append_pair("pwd_id", pwd_id)
            .append_pair("stoken", stoken)
            .append_pair("pdir_fid", pdir_fid)
            .append_pair("force", "0")
            .append_pair("_page", &page.to_string())
            .append_pair("_size", &size.to_string())
            .append_pair("_fetch_banner", "0")
            .append_pair("_fetch_share", "0")
            .append_pair("_fetch_total", "1")
            .append_pair("_sort", "file_type:asc,updated_at:desc");
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_page(response).await
    }

    pub async fn list_share_all(
        &self,
        pwd_id: &str,
        stoken: &str,
        pdir_fid: &str,
        page_size: u32,
    ) -> Result<Vec<ShareFile>, QuarkError> {
        let page_size = page_size.max(1);
        let mut page = 1u32;
        let mut items = Vec::new();
        loop {
            let chunk = self
                .get_share_detail(pwd_id, stoken, pdir_fid, page, page_size)
                .await?;
            if chunk.items.is_empty() {
                break;
            }
            items.extend(chunk.items);
            if items.len() as u32 >= chunk.total {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    pub async fn list_directory(
        &self,
        pdir_fid: &str,
        page: u32,
        size: u32,
    ) -> Result<Page<DriveFile>, QuarkError> {
        let mut url = self.endpoint("/1/clouddrive/file/sort")?;
        url.query_pairs_mut()
            .append_pair("pdir_fid", pdir_fid)
            .append_pair("_page", &page.to_string())
            .append_pair("_size", &size.to_string())
            .append_pair("_fetch_total", "1")
            .append_pair("_fetch_sub_dirs", "0")
            .append_pair("_sort", "file_type:asc,updated_at:desc");
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_page(response).await
    }

    pub async fn list_directory_all(
        &self,
        pdir_fid: &str,
        page_size: u32,
    ) -> Result<Vec<DriveFile>, QuarkError> {
        let page_size = page_size.max(1);
        let mut page = 1u32;
        let mut items = Vec::new();
        loop {
            let chunk = self.list_directory(pdir_fid, page, page_size).await?;
            if chunk.items.is_empty() {
                break;
            }
            items.extend(chunk.items);
            if items.len() as u32 >= chunk.total {
                break;
            }
            page += 1;
        }
        Ok(items)
    }

    /// Resolves absolute drive paths to folder ids. Paths that do not exist are
    /// absent from the result.
    pub async fn get_fids(&self, paths: &[String]) -> Result<Vec<PathFid>, QuarkError> {
        let mut resolved = Vec::new();
        for chunk in paths.chunks(PATH_LIST_CHUNK) {
            let url = self.endpoint("/1/clouddrive/file/info/path_list")?;
            let response = self
                .authorized(self.http.post(url))
                .json(&PathListRequest {
                    file_path: chunk,
                    namespace: "0",
                })
                .send()
                .await?;
            let found: Vec<PathFid> = Self::handle_data(response).await?;
            resolved.extend(found);
        }
        Ok(resolved)
    }

    pub async fn create_folder(&self, dir_path: &str) -> Result<CreatedFolder, QuarkError> {
        let url = self.endpoint("/1/clouddrive/file")?;
        let response = self
            .authorized(self.http.post(url))
            .json(&CreateFolderRequest {
                pdir_fid: "0",
                file_name: "",
                dir_path,
                dir_init_lock: false,
            })
            .send()
            .await?;
        Self::handle_data(response).await
    }

    /// Saves shared items into `to_pdir_fid` by reference. The returned task
    /// must be polled with [`QuarkClient::get_task`].
    pub async fn save_shared(&self, request: &SaveRequest) -> Result<TaskRef, QuarkError> {
        let url = self.endpoint("/1/clouddrive/share/sharepage/save")?;
        let response = self
            .authorized(self.http.post(url))
            .json(&SavePayload {
                fid_list: &request.fids,
                fid_token_list: &request.fid_tokens,
                to_pdir_fid: &request.to_pdir_fid,
                pwd_id: &request.pwd_id,
                stoken: &request.stoken,
                pdir_fid: "0",
                scene: "link",
            })
            .send()
            .await?;
        Self::handle_data(response).await
    }

    pub async fn get_task(&self, task_id: &str, retry_index: u32) -> Result<TaskInfo, QuarkError> {
        let mut url = self.endpoint("/1/clouddrive/task")?;
        url.query_pairs_mut()
            .append_pair("task_id", task_id)
            .append_pair("retry_index", &retry_index.to_string());
        let response = self.authorized(self.http.get(url)).send().await?;
        Self::handle_data(response).await
    }

    pub async fn rename(&self, fid: &str, file_name: &str) -> Result<(), QuarkError> {
        let url = self.endpoint("/1/clouddrive/file/rename")?;
        let response = self
            .authorized(self.http.post(url))
            .json(&RenameRequest { fid, file_name })
            .send()
            .await?;
        Self::handle_ack(response).await
    }

    /// Moves items to the recycle bin.
    pub async fn delete(&self, fids: &[String]) -> Result<TaskRef, QuarkError> {
        let url = self.endpoint("/1/clouddrive/file/delete")?;
        let response = self
            .authorized(self.http.post(url))
            .json(&DeleteRequest {
                action_type: 2,
                filelist: fids,
                exclude_fids: &[],
            })
            .send()
            .await?;
        Self::handle_data(response).await
    }

    pub async fn recycle_list(&self, page: u32, size: u32) -> Result<Vec<RecycleRecord>, QuarkError> {
        let mut url = self.endpoint("/1/clouddrive/file/recycle/list")?;
        url.query_pairs_mut()
            .append_pair("_page", &page.to_string())
            .append_pair("_size", &size.to_string());
        let response = self.authorized(self.http.get(url)).send().await?;
        let data: ListData<RecycleRecord> = Self::handle_data(response).await?;
        Ok(data.list)
    }

    /// Permanently removes recycle bin records.
    pub async fn recycle_remove(&self, record_ids: &[String]) -> Result<(), QuarkError> {
        let url = self.endpoint("/1/clouddrive/file/recycle/remove")?;
        let response = self
            .authorized(self.http.post(url))
            .json(&RecycleRemoveRequest {
                select_mode: 2,
                record_list: record_ids,
            })
            .send()
            .await?;
        Self::handle_ack(response).await
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("cookie", &self.cookie)
            .header("user-agent", USER_AGENT)
            .query(&[("pr", "ucpro"), ("fr", "pc"), ("uc_param_str", "")])
    }

    fn endpoint(&self, path: &str) -> Result<Url, QuarkError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_data<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, QuarkError> {
        let envelope: Envelope<T> = Self::handle_response(response).await?;
        envelope.data.ok_or(QuarkError::MissingData)
    }

    async fn handle_page<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Page<T>, QuarkError> {
        let envelope: Envelope<ListData<T>> = Self::handle_response(response).await?;
        let total = envelope.metadata.map(|meta| meta.total).unwrap_or(0);
        let data = envelope.data.ok_or(QuarkError::MissingData)?;
        Ok(Page {
            items: data.list,
            total,
        })
    }

    async fn handle_ack(response: reqwest::Response) -> Result<(), QuarkError> {
        let _: Envelope<IgnoredAny> = Self::handle_response(response).await?;
        Ok(())
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, QuarkError> {
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(QuarkError::Api { status, body });
        }
        let body = response.text().await?;
        // The drive reports share and permission failures with a vendor code,
        // sometimes behind a 4xx status.
        if let Ok(failure) = serde_json::from_str::<Envelope<IgnoredAny>>(&body)
            && failure.code != 0
        {
            return Err(QuarkError::Rejected {
                code: failure.code,
                message: failure.message,
            });
        }
        if !status.is_success() {
            return Err(QuarkError::Api { status, body });
        }
        serde_json::from_str(&body).map_err(|_| QuarkError::Api { status, body })
    }
}

fn build_http(timeout: Duration) -> Result<Client, QuarkError> {
    Ok(Client::builder()
        .connect_timeout(timeout.min(MAX_CONNECT_TIMEOUT))
        .timeout(timeout)
        .build()?)
}

impl QuarkError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            QuarkError::Api { status, .. } => Some(classify_api_status(*status)),
            QuarkError::Request(err) if err.is_timeout() || err.is_connect() => {
                Some(ApiErrorClass::Transient)
            }
            QuarkError::Rejected { .. } => Some(ApiErrorClass::Permanent),
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default, deserialize_with = "lenient_code")]
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

/// The account endpoint answers with `"code": "OK"` while the drive API uses
/// numeric codes.
fn lenient_code<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Number(i64),
        Text(String),
    }

    Ok(match Code::deserialize(deserializer)? {
        Code::Number(code) => code,
        Code::Text(text) if text.eq_ignore_ascii_case("ok") || text.is_empty() => 0,
        Code::Text(text) => text.parse().unwrap_or(-1),
    })
}

#[derive(Debug, Deserialize)]
struct PageMetadata {
    #[serde(rename = "_total", default)]
    total: u32,
}

#[derive(Debug, Deserialize)]
struct ListData<T> {
    #[serde(default = "Vec::new")]
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ShareTokenData {
    stoken: String,
}

#[derive(Serialize)]
struct ShareTokenRequest<'a> {
    pwd_id: &'a str,
    passcode: &'a str,
}

#[derive(Serialize)]
struct PathListRequest<'a> {
    file_path: &'a [String],
    namespace: &'a str,
}

#[derive(Serialize)]
struct CreateFolderRequest<'a> {
    pdir_fid: &'a str,
    file_name: &'a str,
    dir_path: &'a str,
    dir_init_lock: bool,
}

#[derive(Serialize)]
struct SavePayload<'a> {
    fid_list: &'a [String],
    fid_token_list: &'a [String],
    to_pdir_fid: &'a str,
    pwd_id: &'a str,
    stoken: &'a str,
    pdir_fid: &'a str,
    scene: &'a str,
}

#[derive(Serialize)]
struct RenameRequest<'a> {
    fid: &'a str,
    file_name: &'a str,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    action_type: u8,
    filelist: &'a [String],
    exclude_fids: &'a [String],
}

#[derive(Serialize)]
struct RecycleRemoveRequest<'a> {
    select_mode: u8,
    record_list: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AccountInfo {
    pub nickname: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ShareFile {
    pub fid: String,
    pub file_name: String,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub share_fid_token: String,
    #[serde(default)]
    pub obj_category: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DriveFile {
    pub fid: String,
    pub file_name: String,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub obj_category: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct PathFid {
    pub file_path: String,
    pub fid: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreatedFolder {
    pub fid: String,
}

#[derive(Debug, Clone, Default)]
pub struct SaveRequest {
    pub fids: Vec<String>,
    pub fid_tokens: Vec<String>,
    pub to_pdir_fid: String,
    pub pwd_id: String,
    pub stoken: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TaskRef {
    pub task_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TaskInfo {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub task_title: String,
    #[serde(default)]
    pub save_as: Option<SaveAs>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SaveAs {
    #[serde(default)]
    pub save_as_top_fids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Succeeded,
    Failed,
}

impl TaskInfo {
    pub fn state(&self) -> TaskState {
        match self.status {
            0 | 1 => TaskState::Running,
            2 => TaskState::Succeeded,
            _ => TaskState::Failed,
        }
    }

    pub fn saved_fids(&self) -> &[String] {
        self.save_as
            .as_ref()
            .map(|save_as| save_as.save_as_top_fids.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RecycleRecord {
    pub record_id: String,
    pub fid: String,
    #[serde(default)]
    pub file_name: String,
}
