use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Folder id the drive uses for the root of a share or an account.
pub const ROOT_FID: &str = "0";

static SHARE_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/s/(\w+)").expect("valid regex"));
static PASSCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"pwd=(\w+)").expect("valid regex"));
static PATH_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/(\w{32})-?([^/]+)?").expect("valid regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShareLinkError {
    #[error("share link has no share id: {0}")]
    MissingShareId(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharePathSegment {
    pub fid: String,
    pub name: String,
}

/// Parsed form of a share URL such as
/// `https://pan.quark.cn/s/abcd?pwd=1234#/list/share/<fid>-Season%201`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareLink {
    pub share_id: String,
    pub passcode: String,
    /// Folder the mirror starts from; the share root unless the link points
    /// into a subfolder.
    pub start_fid: String,
    pub path: Vec<SharePathSegment>,
}

impl ShareLink {
    pub fn parse(url: &str) -> Result<Self, ShareLinkError> {
        let share_id = SHARE_ID
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| ShareLinkError::MissingShareId(url.to_string()))?;
        let passcode = PASSCODE
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let path: Vec<SharePathSegment> = PATH_SEGMENT
            .captures_iter(url)
            .map(|caps| SharePathSegment {
                fid: caps[1].to_string(),
                name: caps
                    .get(2)
                    .map(|m| percent_decode(m.as_str()))
                    .unwrap_or_default(),
            })
            .collect();
        let start_fid = path
            .last()
            .map(|segment| segment.fid.clone())
            .unwrap_or_else(|| ROOT_FID.to_string());

        Ok(Self {
            share_id,
            passcode,
            start_fid,
            path,
        })
    }
}

fn percent_decode(value: &str) -> String {
    url::form_urlencoded::parse(value.as_bytes())
        .map(|(key, _)| key.into_owned())
        .next()
        .unwrap_or_default()
}
