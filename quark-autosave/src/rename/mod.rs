//! Magic rename: macros, variables and sequence numbers applied to share file
//! names before they land in the destination.

pub mod episode;
pub mod macros;
pub mod natsort;
pub mod sequence;
pub mod template;
pub mod variables;

use std::collections::BTreeMap;

use regex::{Captures, Replacer};

pub use episode::{EpisodeExtractor, EpisodeNaming, EpisodePattern};
pub use macros::{BuiltinMacro, MacroDef, MacroRegistry, NameFilter};
pub use sequence::{DirSequence, PendingName, RenameContext, is_exists, strip_extension};
pub use variables::VariableRegistry;

/// A task's pattern/replace pair with macros resolved and `$TASKNAME`
/// substituted.
#[derive(Debug, Clone)]
pub struct RenameRule {
    pattern: String,
    filter: NameFilter,
    replace: String,
}

impl RenameRule {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn replace(&self) -> &str {
        &self.replace
    }

    pub fn filter(&self) -> &NameFilter {
        &self.filter
    }

    pub fn is_match(&self, name: &str) -> bool {
        self.filter.is_match(name)
    }

    pub fn has_sequence(&self) -> bool {
        template::contains_sequence(&self.replace)
    }
}

/// Stateless rename engine. Sequence state lives in [`RenameContext`].
#[derive(Debug, Clone, Default)]
pub struct MagicRename {
    macros: MacroRegistry,
    variables: VariableRegistry,
    episodes: EpisodeExtractor,
}

impl MagicRename {
    pub fn new(macros: MacroRegistry, variables: VariableRegistry) -> Self {
        Self {
            macros,
            variables,
            episodes: EpisodeExtractor::default(),
        }
    }

    pub fn from_config(
        magic_regex: &BTreeMap<String, MacroDef>,
        magic_variable: &BTreeMap<String, Vec<String>>,
        episode_patterns: &[EpisodePattern],
    ) -> Self {
        Self {
            episodes: EpisodeExtractor::new(episode_patterns),
            ..Self::new(
                MacroRegistry::new(magic_regex.clone()),
                VariableRegistry::with_custom(magic_variable),
            )
        }
    }

    pub fn rule(&self, pattern: &str, replace: &str, task_name: &str) -> RenameRule {
        let (pattern, replace) = self.macros.resolve(pattern, replace);
        let replace = replace.replace("$TASKNAME", variables::TASKNAME);
        let replace = if task_name.is_empty() {
            replace
        } else {
            replace.replace(variables::TASKNAME, task_name)
        };
        RenameRule {
            filter: NameFilter::parse(&pattern),
            pattern,
            replace,
        }
    }

    /// New name for `name` under `rule`. Sequence placeholders are left in
    /// place for [`RenameContext::assign`].
    pub fn apply(&self, rule: &RenameRule, name: &str, task_name: &str) -> String {
        if rule.replace.is_empty() {
            return name.to_string();
        }
        let expanded = self.variables.expand(&rule.replace, name, task_name);
        match &rule.filter {
            NameFilter::Any | NameFilter::Excludes(_) => {
                if rule.filter.is_match(name) {
                    expanded
                } else {
                    name.to_string()
                }
            }
            NameFilter::Regex(regex) => regex
                .replace_all(name, BackrefReplacer(&expanded))
                .into_owned(),
            NameFilter::Invalid(_) => name.to_string(),
        }
    }

    pub fn variables(&self) -> &VariableRegistry {
        &self.variables
    }

    /// Episode-mode name for `name`, or `None` when no number is found.
    pub fn episode_name(&self, naming: &EpisodeNaming, name: &str) -> Option<String> {
        self.episodes
            .extract(name)
            .map(|episode| naming.name_for(episode, name))
    }
}

/// Expands `\1`, `\12` and `\g<name>` back-references. Everything else,
/// including `$`, is literal.
struct BackrefReplacer<'a>(&'a str);

impl Replacer for BackrefReplacer<'_> {
    fn replace_append(&mut self, caps: &Captures<'_>, dst: &mut String) {
        let template = self.0;
        let mut rest = template;
        while let Some(pos) = rest.find('\\') {
            dst.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            if let Some(named) = after.strip_prefix("g<")
                && let Some(close) = named.find('>')
            {
                let key = &named[..close];
                let group = match key.parse::<usize>() {
                    Ok(index) => caps.get(index),
                    Err(_) => caps.name(key),
                };
                if let Some(m) = group {
                    dst.push_str(m.as_str());
                }
                rest = &named[close + 1..];
                continue;
            }
            let digits = after
                .chars()
                .take(2)
                .take_while(|c| c.is_ascii_digit())
                .count();
            if digits > 0 {
                let index: usize = after[..digits].parse().unwrap_or(0);
                if let Some(m) = caps.get(index) {
                    dst.push_str(m.as_str());
                }
                rest = &after[digits..];
                continue;
            }
            match after.chars().next() {
                Some(ch) => {
                    dst.push(ch);
                    rest = &after[ch.len_utf8()..];
                }
                None => {
                    dst.push('\\');
                    rest = after;
                }
            }
        }
        dst.push_str(rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MagicRename {
        MagicRename::default()
    }

    #[test]
    fn tv_macro_inserts_episode_marker() {
        let engine = engine();
        let rule = engine.rule("$TV", "", "MyShow");
        assert!(rule.is_match("MyShow.S02.08.mkv"));
        assert_eq!(engine.apply(&rule, "MyShow.S02.08.mkv", "MyShow"), "MyShow.S02E08.mkv");
    }

    #[test]
    fn tv_macro_skips_non_video() {
        let engine = engine();
        let rule = engine.rule("$TV", "", "t");
        assert!(!rule.is_match("poster.jpg"));
    }

    #[test]
    fn empty_replace_keeps_name() {
        let engine = engine();
        let rule = engine.rule(r"\.mkv$", "", "t");
        assert_eq!(engine.apply(&rule, "a.mkv", "t"), "a.mkv");
    }

    #[test]
    fn empty_pattern_uses_expanded_template() {
        let engine = engine();
        let rule = engine.rule("", "$TASKNAME.{SXX}E{E}.{EXT}", "Show");
        assert_eq!(rule.replace(), "Show.{SXX}E{E}.{EXT}");
        assert_eq!(engine.apply(&rule, "第3集.mp4", "Show"), "Show.S01E03.mp4");
    }

    #[test]
    fn regex_backrefs_and_literal_dollar() {
        let engine = engine();
        let rule = engine.rule(r"^(\w+)_(\d+)\.mkv$", r"\2-\g<1>$.mkv", "t");
        assert_eq!(engine.apply(&rule, "show_12.mkv", "t"), "12-show$.mkv");
    }

    #[test]
    fn sequence_placeholder_survives_apply() {
        let engine = engine();
        let rule = engine.rule(r".*\.(mkv)$", r"EP{III}.\1", "t");
        assert!(rule.has_sequence());
        assert_eq!(engine.apply(&rule, "whatever.mkv", "t"), "EP{III}.mkv");
    }

    #[test]
    fn black_word_filters_without_renaming() {
        let engine = engine();
        let rule = engine.rule("$BLACK_WORD", "", "t");
        assert!(rule.is_match("第1期.mp4"));
        assert!(!rule.is_match("第1期纯享版.mp4"));
        assert_eq!(engine.apply(&rule, "第1期.mp4", "t"), "第1期.mp4");
    }

    #[test]
    fn invalid_pattern_leaves_name_alone() {
        let engine = engine();
        let rule = engine.rule("(unclosed", "x", "t");
        assert!(!rule.is_match("a.mkv"));
        assert_eq!(engine.apply(&rule, "a.mkv", "t"), "a.mkv");
    }
}
