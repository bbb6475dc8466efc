//! Magic variables: `{TOKEN}` placeholders whose value is searched for in the
//! source file name.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use time::OffsetDateTime;
use tracing::warn;

static VARIABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Z][A-Z0-9_]*)\}").expect("valid regex"));

/// Built-in search patterns. The value is the `v` group when present,
/// otherwise the whole match.
const BUILTIN: &[(&str, &[&str])] = &[
    ("{EXT}", &[r"\.(?P<v>[^./\\]+)$"]),
    ("{CHINESE}", &[r"\p{Han}{2,}"]),
    (
        "{DATE}",
        &[
            r"(?:^|\D)(?P<v>(?:18|19|20)?\d{2}[.\-/年]\d{1,2}[.\-/月]\d{1,2})",
            r"(?:^|\D)(?P<v>(?:18|19|20)\d{2}[01]\d[0-3]\d)(?:\D|$)",
            r"(?:^|\D)(?P<v>[01]?\d[.\-/月][0-3]?\d)(?:\D|$)",
        ],
    ),
    ("{YEAR}", &[r"(?:^|\D)(?P<v>(?:18|19|20)\d{2})(?:\D|$)"]),
    (
        "{S}",
        &[
            r"[Ss](?P<v>\d{1,2})(?:[EeXx.\- _]|$)",
            r"第(?P<v>\d{1,2})季",
        ],
    ),
    (
        "{E}",
        &[
            r"[Ee][Pp]?(?P<v>\d{1,4})(?:\D|$)",
            r"第(?P<v>\d{1,4})[集期话部篇]",
            r"(?:^|\D)(?P<v>\d{1,4})[集期话部篇]",
            r"(?:^|[^\dSs])(?P<v>\d{1,3})(?:\D|$)",
        ],
    ),
    (
        "{PART}",
        &[
            r"[集期话部篇](?P<v>[上中下一二三四五六七八九十])",
            r"(?P<v>[上中下一二三四五六七八九十])[集期话部篇]",
            r"(?i:part)[ ._]?(?P<v>\d{1,2})",
        ],
    ),
    ("{VER}", &[r"(?:^|[^A-Za-z])(?P<v>[Vv]\d+)(?:\D|$)"]),
];

/// Tokens resolved from the task rather than from the file name.
pub const TASKNAME: &str = "{TASKNAME}";
/// Season formatted as `S01`; defaults to `S01` when absent.
pub const SXX: &str = "{SXX}";

#[derive(Debug, Clone)]
pub struct VariableRegistry {
    patterns: BTreeMap<String, Vec<Regex>>,
}

impl Default for VariableRegistry {
    fn default() -> Self {
        let mut patterns = BTreeMap::new();
        for (token, sources) in BUILTIN {
            let compiled = sources
                .iter()
                .map(|source| Regex::new(source).expect("valid builtin variable regex"))
                .collect();
            patterns.insert((*token).to_string(), compiled);
        }
        Self { patterns }
    }
}

impl VariableRegistry {
    /// Built-ins plus `custom`, where a custom token replaces the built-in
    /// patterns of the same name. Patterns that do not compile are skipped.
    pub fn with_custom(custom: &BTreeMap<String, Vec<String>>) -> Self {
        let mut registry = Self::default();
        for (token, sources) in custom {
            let compiled: Vec<Regex> = sources
                .iter()
                .filter_map(|source| match Regex::new(source) {
                    Ok(regex) => Some(regex),
                    Err(err) => {
                        warn!(token = %token, pattern = %source, error = %err, "skipping magic variable pattern");
                        None
                    }
                })
                .collect();
            registry.patterns.insert(braced(token), compiled);
        }
        registry
    }

    /// Value of `token` for `file_name`; empty when nothing matches.
    pub fn resolve(&self, token: &str, file_name: &str, task_name: &str) -> String {
        match token {
            TASKNAME => task_name.to_string(),
            SXX => {
                let season = self.search("{S}", file_name);
                match season.parse::<u32>() {
                    Ok(number) => format!("S{number:02}"),
                    Err(_) => "S01".to_string(),
                }
            }
            "{E}" => {
                let episode = self.search(token, file_name);
                match episode.parse::<u32>() {
                    Ok(number) if episode.len() < 2 => format!("{number:02}"),
                    _ => episode,
                }
            }
            "{DATE}" => normalize_date(&self.search(token, file_name), current_year()),
            _ => self.search(token, file_name),
        }
    }

    /// Replaces every known `{TOKEN}` in `template`. Sequence placeholders and
    /// unknown tokens are left as they are.
    pub fn expand(&self, template: &str, file_name: &str, task_name: &str) -> String {
        VARIABLE
            .replace_all(template, |caps: &Captures<'_>| {
                let token = &caps[0];
                if self.is_known(token) {
                    self.resolve(token, file_name, task_name)
                } else {
                    token.to_string()
                }
            })
            .into_owned()
    }

    fn is_known(&self, token: &str) -> bool {
        token == TASKNAME || token == SXX || self.patterns.contains_key(token)
    }

    fn search(&self, token: &str, file_name: &str) -> String {
        let Some(patterns) = self.patterns.get(token) else {
            return String::new();
        };
        patterns
            .iter()
            .find_map(|regex| {
                regex.captures(file_name).map(|caps| {
                    caps.name("v")
                        .or_else(|| caps.get(0))
                        .map(|m| m.as_str().to_string())
                        .unwrap_or_default()
                })
            })
            .unwrap_or_default()
    }
}

fn braced(token: &str) -> String {
    let bare = token.trim_start_matches('{').trim_end_matches('}');
    format!("{{{bare}}}")
}

fn current_year() -> i32 {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .year()
}

/// Turns `24.3.5`, `2024年03月05日`, `0305` or `20240305` into `20240305`.
/// Dates without a year take `year`.
fn normalize_date(raw: &str, year: i32) -> String {
    if raw.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .collect();
    match parts.as_slice() {
        [y, m, d] => {
            let y = if y.len() == 2 {
                format!("{}{y}", year / 100)
            } else {
                (*y).to_string()
            };
            format!("{y}{m:0>2}{d:0>2}")
        }
        [m, d] => format!("{year}{m:0>2}{d:0>2}"),
        [digits] if digits.len() == 8 => (*digits).to_string(),
        [digits] if digits.len() == 4 => format!("{year}{digits}"),
        _ => raw.chars().filter(char::is_ascii_digit).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> VariableRegistry {
        VariableRegistry::default()
    }

    #[test]
    fn expands_season_episode_and_extension() {
        let name = "Some.Show.S02E05.1080p.mkv";
        assert_eq!(
            registry().expand("{TASKNAME}.{SXX}E{E}.{EXT}", name, "Show"),
            "Show.S02E05.mkv"
        );
    }

    #[test]
    fn unmatched_variable_is_empty() {
        assert_eq!(registry().expand("[{YEAR}]{VER}x", "plain.mkv", "t"), "[]x");
    }

    #[test]
    fn season_defaults_to_first() {
        assert_eq!(registry().resolve(SXX, "第05集.mp4", "t"), "S01");
        assert_eq!(registry().resolve("{E}", "第05集.mp4", "t"), "05");
        assert_eq!(registry().resolve("{E}", "ep7.mp4", "t"), "07");
    }

    #[test]
    fn sequence_and_unknown_tokens_survive_expansion() {
        assert_eq!(
            registry().expand("{II}-{NOPE}-{CHINESE}", "Show 中文名 01.mkv", "t"),
            "{II}-{NOPE}-中文名"
        );
    }

    #[test]
    fn dates_are_padded_to_eight_digits() {
        assert_eq!(normalize_date("2024.3.5", 2030), "20240305");
        assert_eq!(normalize_date("24-03-05", 2030), "20240305");
        assert_eq!(normalize_date("3月5", 2030), "20300305");
        assert_eq!(normalize_date("20240305", 2030), "20240305");
        assert_eq!(normalize_date("", 2030), "");
    }

    #[test]
    fn date_and_year_are_found_in_names() {
        let vars = registry();
        assert_eq!(vars.resolve("{YEAR}", "Movie.2019.1080p.mkv", "t"), "2019");
        assert_eq!(vars.resolve("{DATE}", "综艺 2024.03.05 期.mp4", "t"), "20240305");
        assert_eq!(vars.resolve("{PART}", "第3期下.mp4", "t"), "下");
        assert_eq!(vars.resolve("{VER}", "Show.E01.v2.mkv", "t"), "v2");
    }

    #[test]
    fn custom_tokens_replace_builtins() {
        let mut custom = BTreeMap::new();
        custom.insert("E".to_string(), vec![r"#(?P<v>\d+)".to_string()]);
        custom.insert("{BAD}".to_string(), vec!["(".to_string()]);
        let vars = VariableRegistry::with_custom(&custom);
        assert_eq!(vars.resolve("{E}", "Show #12 E99.mkv", "t"), "12");
        assert_eq!(vars.expand("{BAD}", "x", "t"), "");
    }
}
