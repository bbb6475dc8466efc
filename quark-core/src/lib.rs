mod client;
mod share_link;

pub use client::{
    AccountInfo, ApiErrorClass, CreatedFolder, DriveFile, Page, PathFid, QuarkClient, QuarkError,
    RecycleRecord, SaveAs, SaveRequest, ShareFile, TaskInfo, TaskRef, TaskState,
};
pub use reqwest::StatusCode;
pub use share_link::{ROOT_FID, ShareLink, ShareLinkError, SharePathSegment};
