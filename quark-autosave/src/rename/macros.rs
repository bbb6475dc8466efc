use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// `^(?!.*a)(?!.*b).*`: the only look-around shape accepted, rewritten into a
/// word exclusion list.
static EXCLUSION_FORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\^((?:\(\?!\.\*[^()]+\))+)\.\*\$?$").expect("valid regex"));
static EXCLUDED_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(\?!\.\*([^()]+)\)").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinMacro {
    /// Episode numbering: `Show.S02.08.mkv` becomes `Show.S02E08.mkv`.
    Tv,
    /// Passes every name that contains none of the bonus-content keywords.
    BlackWord,
}

impl BuiltinMacro {
    pub const ALL: [BuiltinMacro; 2] = [BuiltinMacro::Tv, BuiltinMacro::BlackWord];

    pub fn id(self) -> &'static str {
        match self {
            BuiltinMacro::Tv => "$TV",
            BuiltinMacro::BlackWord => "$BLACK_WORD",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.id() == id)
    }

    pub fn definition(self) -> MacroDef {
        match self {
            BuiltinMacro::Tv => MacroDef {
                pattern: r"^(.*?)([Ss]\d{1,2})?(?:[第EePpXx.\-_( ]{1,2}|^)(\d{1,3})(?:\D.*?)?\.(mp4|mkv)$"
                    .to_string(),
                replace: r"\1\2E\3.\4".to_string(),
            },
            BuiltinMacro::BlackWord => MacroDef {
                pattern: r"^(?!.*纯享)(?!.*加更)(?!.*超前企划)(?!.*训练室)(?!.*蒸蒸日上).*".to_string(),
                replace: String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroDef {
    pub pattern: String,
    #[serde(default)]
    pub replace: String,
}

/// Macro ids to definitions. Entries loaded from config shadow built-ins with
/// the same id.
#[derive(Debug, Clone, Default)]
pub struct MacroRegistry {
    custom: BTreeMap<String, MacroDef>,
}

impl MacroRegistry {
    pub fn new(custom: BTreeMap<String, MacroDef>) -> Self {
        Self { custom }
    }

    pub fn lookup(&self, id: &str) -> Option<MacroDef> {
        self.custom
            .get(id)
            .cloned()
            .or_else(|| BuiltinMacro::from_id(id).map(BuiltinMacro::definition))
    }

    /// Expands a task's pattern/replace pair. A macro's replacement is used only
    /// when the task leaves its own empty.
    pub fn resolve(&self, pattern: &str, replace: &str) -> (String, String) {
        match self.lookup(pattern) {
            Some(def) => {
                let replace = if replace.is_empty() {
                    def.replace
                } else {
                    replace.to_string()
                };
                (def.pattern, replace)
            }
            None => (pattern.to_string(), replace.to_string()),
        }
    }
}

/// Compiled form of a rename pattern.
#[derive(Debug, Clone)]
pub enum NameFilter {
    /// Empty pattern: every name matches.
    Any,
    Regex(Regex),
    /// Matches names containing none of the words.
    Excludes(Vec<String>),
    /// Pattern failed to compile. Nothing matches, so nothing is saved,
    /// renamed or resaved through it.
    Invalid(String),
}

impl NameFilter {
    pub fn parse(pattern: &str) -> Self {
        if pattern.is_empty() {
            return NameFilter::Any;
        }
        match Regex::new(pattern) {
            Ok(regex) => NameFilter::Regex(regex),
            Err(err) => {
                if let Some(words) = exclusion_words(pattern) {
                    return NameFilter::Excludes(words);
                }
                warn!(pattern = %pattern, error = %err, "rename pattern does not compile");
                NameFilter::Invalid(pattern.to_string())
            }
        }
    }

    pub fn is_match(&self, name: &str) -> bool {
        match self {
            NameFilter::Any => true,
            NameFilter::Invalid(_) => false,
            NameFilter::Regex(regex) => regex.is_match(name),
            NameFilter::Excludes(words) => !words.iter().any(|word| name.contains(word.as_str())),
        }
    }
}

fn exclusion_words(pattern: &str) -> Option<Vec<String>> {
    let caps = EXCLUSION_FORM.captures(pattern)?;
    let words: Vec<String> = EXCLUDED_WORD
        .captures_iter(&caps[1])
        .map(|word| word[1].to_string())
        .collect();
    (!words.is_empty()).then_some(words)
}
