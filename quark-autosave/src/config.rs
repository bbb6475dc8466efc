//! JSON configuration file plus environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::mirror::{GlobalRule, MirrorOptions};
use crate::records;
use crate::rename::{EpisodePattern, MacroDef, MagicRename};
use crate::retry::RetrySettings;
use crate::task::Task;

pub const DEFAULT_CONFIG_FILE: &str = "quark_config.json";
const DEFAULT_RECORD_DB: &str = "quark_records.db";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Either a single cookie (possibly several lines) or a list of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cookies {
    One(String),
    Many(Vec<String>),
}

impl Default for Cookies {
    fn default() -> Self {
        Cookies::Many(Vec::new())
    }
}

impl Cookies {
    /// Non-empty cookies in order; the first one saves files.
    pub fn accounts(&self) -> Vec<&str> {
        match self {
            Cookies::One(value) => non_empty(value.lines()),
            Cookies::Many(values) => non_empty(values.iter().map(String::as_str)),
        }
    }
}

fn non_empty<'a>(cookies: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    cookies
        .map(str::trim)
        .filter(|cookie| !cookie.is_empty())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalRegex {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub replace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

fn default_attempts() -> u32 {
    3
}

fn default_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cookie: Cookies,
    #[serde(default)]
    pub tasklist: Vec<Task>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub magic_regex: BTreeMap<String, MacroDef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub magic_variable: BTreeMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_regex: Option<GlobalRegex>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_blacklist: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub episode_patterns: Vec<EpisodePattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Settings owned by the web console, push and plugins.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Writes through a sibling temp file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let body = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, body).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)
    }

    pub fn rename_engine(&self) -> MagicRename {
        MagicRename::from_config(
            &self.magic_regex,
            &self.magic_variable,
            &self.episode_patterns,
        )
    }

    pub fn global_rule(&self) -> Option<GlobalRule> {
        self.global_regex
            .as_ref()
            .filter(|global| global.enabled && !global.pattern.is_empty())
            .map(|global| GlobalRule {
                pattern: global.pattern.clone(),
                replace: global.replace.clone(),
            })
    }

    pub fn mirror_options(&self, settings: &Settings) -> MirrorOptions {
        let retry = self.retry.unwrap_or_default();
        let attempts = settings.retry_attempts.unwrap_or(retry.attempts);
        let delay = settings
            .retry_delay
            .unwrap_or(Duration::from_millis(retry.delay_ms));
        MirrorOptions {
            retry: RetrySettings::flat(attempts, delay),
            global_rule: self.global_rule(),
            file_blacklist: self
                .file_blacklist
                .iter()
                .filter(|word| !word.is_empty())
                .cloned()
                .collect(),
            ..MirrorOptions::default()
        }
    }
}

/// Process settings resolved from the environment and the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub config_path: PathBuf,
    pub record_db: PathBuf,
    /// Replaces the config's cookies for this run only.
    pub cookie: Option<String>,
    pub retry_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub http_timeout: Duration,
}

impl Settings {
    pub fn from_env(config_override: Option<PathBuf>) -> Self {
        Self::from_lookup(|name| std::env::var(name).ok(), config_override)
    }

    pub fn from_lookup<F>(lookup: F, config_override: Option<PathBuf>) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config_path = config_override
            .or_else(|| lookup("QUARK_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let record_db = lookup("QUARK_RECORD_DB")
            .map(PathBuf::from)
            .or_else(|| records::default_db_path().ok())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORD_DB));
        let cookie = lookup("QUARK_COOKIE").filter(|value| !value.trim().is_empty());
        let retry_attempts = read_u64(&lookup, "QUARK_RETRY_ATTEMPTS")
            .map(|value| u32::try_from(value).unwrap_or(u32::MAX));
        let retry_delay = read_u64(&lookup, "QUARK_RETRY_DELAY_MS").map(Duration::from_millis);
        let http_timeout = Duration::from_secs(
            read_u64(&lookup, "QUARK_HTTP_TIMEOUT_SECS").unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );

        Self {
            config_path,
            record_db,
            cookie,
            retry_attempts,
            retry_delay,
            http_timeout,
        }
    }

    /// Cookies to use, preferring the environment override.
    pub fn accounts<'a>(&'a self, config: &'a AppConfig) -> Vec<&'a str> {
        match &self.cookie {
            Some(cookie) => non_empty(cookie.lines()),
            None => config.cookie.accounts(),
        }
    }
}

fn read_u64<F>(lookup: &F, name: &str) -> Option<u64>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
}
