use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

use crate::remote::RemoteItem;
use crate::rename::is_exists;

/// ` (3)` style suffix the drive appends on name collisions, kept before the
/// extension.
static DEDUP_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<stem>.+?) ?\(\d{1,3}\)(?P<ext>\.[^.()]+)?$").expect("valid regex")
});

pub fn is_dedup_suffixed(name: &str) -> bool {
    DEDUP_SUFFIX.is_match(name)
}

/// `name` with a collision suffix removed.
pub fn dedup_base(name: &str) -> Cow<'_, str> {
    match DEDUP_SUFFIX.captures(name) {
        Some(caps) => {
            let ext = caps.name("ext").map(|m| m.as_str()).unwrap_or("");
            Cow::Owned(format!("{}{ext}", &caps["stem"]))
        }
        None => Cow::Borrowed(name),
    }
}

#[derive(Debug, Clone)]
struct IndexEntry {
    base: String,
    name: String,
    id: String,
    is_dir: bool,
    size: u64,
    updated_at: Option<i64>,
}

/// A destination folder as it is actually named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistingDir<'a> {
    pub name: &'a str,
    pub id: &'a str,
}

/// Update times this close (or within this ratio) count as the same upload.
const SAME_UPLOAD_WINDOW: i64 = 2_592_000;
const SAME_UPLOAD_RATIO: f64 = 0.1;

/// Destination listing indexed by collision-free base name.
#[derive(Debug, Clone, Default)]
pub struct DestinationIndex {
    entries: Vec<IndexEntry>,
    bases: Vec<String>,
    names: Vec<String>,
}

impl DestinationIndex {
    pub fn new(items: &[RemoteItem]) -> Self {
        let mut index = Self::default();
        for item in items {
            index.insert(item);
        }
        index
    }

    pub fn insert(&mut self, item: &RemoteItem) {
        let base = dedup_base(&item.name).into_owned();
        self.bases.push(base.clone());
        self.names.push(item.name.clone());
        self.entries.push(IndexEntry {
            base,
            name: item.name.clone(),
            id: item.id.clone(),
            is_dir: item.is_dir,
            size: item.size,
            updated_at: item.updated_at,
        });
    }

    /// Concrete names as listed, for sequence resolution.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Concrete destination name equivalent to `candidate`, ignoring collision
    /// suffixes on both sides.
    pub fn find(&self, candidate: &str, ignore_extension: bool) -> Option<&str> {
        let base = dedup_base(candidate);
        let matched = is_exists(&base, &self.bases, ignore_extension)?;
        self.entries
            .iter()
            .find(|entry| entry.base == matched)
            .map(|entry| entry.name.as_str())
    }

    /// Destination file that looks like the same upload as `item`: equal size
    /// and extension with a close update time. Used when the renamed form
    /// still carries a sequence placeholder and names cannot be compared.
    pub fn find_same_upload(&self, item: &RemoteItem) -> Option<&str> {
        let ext = extension(&item.name);
        let updated = item.updated_at.unwrap_or(0);
        self.entries
            .iter()
            .filter(|entry| !entry.is_dir && entry.size == item.size && extension(&entry.name) == ext)
            .find(|entry| match entry.updated_at {
                Some(existing) if existing != 0 => {
                    let diff = (updated - existing).abs();
                    let ratio = (1.0 - updated as f64 / existing as f64).abs();
                    diff < SAME_UPLOAD_WINDOW || ratio < SAME_UPLOAD_RATIO
                }
                _ => false,
            })
            .map(|entry| entry.name.as_str())
    }

    /// Destination folder equivalent to `name`, which may carry a collision
    /// suffix the share's folder lacks.
    pub fn find_dir(&self, name: &str) -> Option<ExistingDir<'_>> {
        let base = dedup_base(name);
        let mut candidates = self
            .entries
            .iter()
            .filter(|entry| entry.is_dir && entry.base == *base);
        let first = candidates.next()?;
        let entry = if first.name == name {
            first
        } else {
            candidates.find(|entry| entry.name == name).unwrap_or(first)
        };
        Some(ExistingDir {
            name: &entry.name,
            id: &entry.id,
        })
    }
}

fn extension(name: &str) -> String {
    name.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}
