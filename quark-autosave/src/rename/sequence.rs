//! Sequence placeholder resolution (`{I}`, `{III}`, ...).

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use tracing::{debug, warn};

use super::natsort;
use super::template::{self, Template};

/// Indices already taken in one destination directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirSequence {
    claimed: BTreeMap<u64, String>,
    max: u64,
}

impl DirSequence {
    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn is_claimed(&self, index: u64) -> bool {
        self.claimed.contains_key(&index)
    }

    fn claim(&mut self, index: u64, name: &str) {
        self.claimed.insert(index, name.to_string());
        self.max = self.max.max(index);
    }
}

/// Per-task sequence state, keyed by destination directory. Created fresh
/// for each task run and passed into the resolution functions.
#[derive(Debug, Default)]
pub struct RenameContext {
    dirs: HashMap<String, DirSequence>,
}

#[derive(Debug, Clone, Copy)]
pub struct PendingName<'a> {
    pub original: &'a str,
    /// Name after variable expansion, still holding sequence placeholders.
    pub resolved: &'a str,
}

enum Entry<'a> {
    Existing { name: &'a str, index: u64 },
    Queued { name: &'a str, slot: usize },
}

impl Entry<'_> {
    fn name(&self) -> &str {
        match self {
            Entry::Existing { name, .. } | Entry::Queued { name, .. } => name,
        }
    }
}

impl RenameContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dir(&self, dir: &str) -> Option<&DirSequence> {
        self.dirs.get(dir)
    }

    /// Gives every queued name its own index in `dir` and returns the
    /// resolved names with placeholders filled, in input order.
    ///
    /// Indices already used by `dest_names` (recognised through
    /// `replace_template`) are never handed out again.
    pub fn assign(
        &mut self,
        dir: &str,
        replace_template: &str,
        dest_names: &[String],
        pending: &[PendingName<'_>],
    ) -> Vec<String> {
        let unchanged = || pending.iter().map(|p| p.resolved.to_string()).collect();
        let template = Template::parse(replace_template);
        if !template.has_sequence() {
            return unchanged();
        }
        let matcher = match template.matcher() {
            Ok(matcher) => matcher,
            Err(err) => {
                warn!(template = %replace_template, error = %err, "sequence template does not compile");
                return unchanged();
            }
        };

        let seq = self.dirs.entry(dir.to_string()).or_default();
        let mut entries = Vec::with_capacity(dest_names.len() + pending.len());
        for name in dest_names {
            let index = matcher
                .captures(name)
                .and_then(|caps| caps.name("seq").map(|m| m.as_str().to_string()))
                .and_then(|digits| digits.parse::<u64>().ok());
            if let Some(index) = index {
                seq.claim(index, name);
                entries.push(Entry::Existing { name, index });
            }
        }
        for (slot, item) in pending.iter().enumerate() {
            entries.push(Entry::Queued {
                name: item.original,
                slot,
            });
        }
        entries.sort_by(|a, b| match natsort::compare(a.name(), b.name()) {
            Ordering::Equal => a.name().cmp(b.name()),
            other => other,
        });

        let mut assigned = vec![0u64; pending.len()];
        let mut previous = 0u64;
        for (position, entry) in entries.iter().enumerate() {
            match entry {
                Entry::Existing { index, .. } => previous = previous.max(*index),
                Entry::Queued { name, slot } => {
                    let mut candidate = (position as u64 + 1).max(previous + 1);
                    while seq.is_claimed(candidate) {
                        candidate += 1;
                    }
                    seq.claim(candidate, name);
                    assigned[*slot] = candidate;
                    previous = candidate;
                    debug!(dir, name = %name, index = candidate, "assigned sequence index");
                }
            }
        }

        pending
            .iter()
            .zip(assigned)
            .map(|(item, index)| template::fill_sequence(item.resolved, index))
            .collect()
    }
}

/// Finds the existing name `candidate` collides with. Sequence placeholders
/// in `candidate` match any digits of their width.
pub fn is_exists<'a>(
    candidate: &str,
    existing: &'a [String],
    ignore_extension: bool,
) -> Option<&'a str> {
    let key = |name: &'a str| {
        if ignore_extension {
            strip_extension(name)
        } else {
            name
        }
    };
    let wanted = if ignore_extension {
        strip_extension(candidate)
    } else {
        candidate
    };

    if template::contains_sequence(wanted) {
        let pattern = template::sequence_pattern(wanted).ok()?;
        return existing
            .iter()
            .map(String::as_str)
            .find(|&name| pattern.is_match(key(name)));
    }
    existing
        .iter()
        .map(String::as_str)
        .find(|&name| key(name) == wanted)
}

/// `name` without its last extension. Dot-files keep their name.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}
