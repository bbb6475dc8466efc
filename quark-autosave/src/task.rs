use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::remote::normalize_path;
use crate::rename::EpisodeNaming;

/// One configured share mirror.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub taskname: String,
    pub shareurl: String,
    pub savepath: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub replace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_subdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_subdir_resave_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enddate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runweek: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shareurl_ban: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_extension: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startfid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filterwords: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_episode_naming: Option<bool>,
    /// Episode template, `[]` marks the number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_naming: Option<String>,
    /// Keys owned by other tools (plugins, web console).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Task {
    pub fn savepath(&self) -> String {
        normalize_path(&self.savepath)
    }

    pub fn ban_reason(&self) -> Option<&str> {
        self.shareurl_ban.as_deref().filter(|reason| !reason.is_empty())
    }

    pub fn ban(&mut self, reason: impl Into<String>) {
        self.shareurl_ban = Some(reason.into());
    }

    pub fn resave_mode(&self) -> bool {
        self.update_subdir_resave_mode.unwrap_or(false)
    }

    pub fn ignore_extension(&self) -> bool {
        self.ignore_extension.unwrap_or(false)
    }

    pub fn update_subdir(&self) -> Option<&str> {
        self.update_subdir.as_deref().filter(|value| !value.is_empty())
    }

    pub fn startfid(&self) -> Option<&str> {
        self.startfid.as_deref().filter(|value| !value.is_empty())
    }

    /// Episode naming when switched on with a template that has a `[]` slot.
    pub fn episode_naming(&self) -> Option<EpisodeNaming> {
        if !self.use_episode_naming.unwrap_or(false) {
            return None;
        }
        self.episode_naming.as_deref().and_then(EpisodeNaming::parse)
    }

    /// Lowercased filter words; ASCII and full-width commas both separate.
    pub fn filter_words(&self) -> Vec<String> {
        self.filterwords
            .as_deref()
            .unwrap_or_default()
            .split([',', '，'])
            .map(|word| word.trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect()
    }

    /// Whether the task should run on `today`: not past its end date and on
    /// one of its weekdays (1 = Monday).
    pub fn is_time(&self, today: Date) -> bool {
        if let Some(end) = self.enddate.as_deref().filter(|value| !value.is_empty())
            && let Ok(end) = Date::parse(end, format_description!("[year]-[month]-[day]"))
            && today > end
        {
            return false;
        }
        match self.runweek.as_deref() {
            None | Some([]) => true,
            Some(days) => days.contains(&today.weekday().number_from_monday()),
        }
    }

    pub fn is_time_now(&self) -> bool {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        self.is_time(now.date())
    }
}
