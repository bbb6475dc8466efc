//! Episode naming: pulls an episode number out of a file name and formats it
//! into a template where `[]` marks the two-digit number.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const EPISODE_SLOT: &str = "[]";

/// User-supplied episode pattern. The first capture group is the number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodePattern {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub regex: String,
}

const DEFAULT_PATTERNS: &[&str] = &[
    r"第(\d+)集",
    r"第(\d+)期",
    r"第(\d+)话",
    r"(\d+)集",
    r"(\d+)期",
    r"(\d+)话",
    r"[Ee][Pp]?(\d+)",
    r"(\d+)[-_\s]*4[Kk]",
    r"\[(\d+)\]",
    r"【(\d+)】",
    r"_?(\d+)_?",
];

static SEASON_EPISODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[Ss](\d+)[Ee](\d+)").expect("valid regex"));
static EP_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[Ee][Pp]?(\d+)").expect("valid regex"));
static DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static YEAR_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:19|20)\d{2}").expect("valid regex"));

/// Date shapes removed before looking for numbers. The flag marks shapes
/// that must not touch neighbouring digits.
static DATE_SHAPES: LazyLock<Vec<(Regex, bool)>> = LazyLock::new(|| {
    [
        (r"((?:19|20)\d{2})[-./\s](\d{1,2})[-./\s](\d{1,2})", false),
        (r"((?:19|20)?\d{2})[-./\s](\d{1,2})[-./\s](\d{1,2})", false),
        (r"((?:19|20)\d{2})(\d{2})(\d{2})", false),
        (r"(\d{2})(\d{2})(\d{2})", true),
        (r"(\d{1,2})[-./\s](\d{1,2})[-./\s]((?:19|20)\d{2})", false),
    ]
    .into_iter()
    .map(|(source, isolated)| (Regex::new(source).expect("valid regex"), isolated))
    .collect()
});

/// Episode number finder. Custom patterns replace the defaults when given.
#[derive(Debug, Clone)]
pub struct EpisodeExtractor {
    patterns: Vec<Regex>,
}

impl Default for EpisodeExtractor {
    fn default() -> Self {
        Self {
            patterns: compile(DEFAULT_PATTERNS.iter().copied()),
        }
    }
}

impl EpisodeExtractor {
    pub fn new(custom: &[EpisodePattern]) -> Self {
        let patterns = compile(
            custom
                .iter()
                .map(|pattern| pattern.regex.as_str())
                .filter(|source| !source.is_empty()),
        );
        if patterns.is_empty() {
            Self::default()
        } else {
            Self { patterns }
        }
    }

    /// Episode number in `name`. Only the stem is searched, so `mp4` never
    /// yields a 4.
    pub fn extract(&self, name: &str) -> Option<u32> {
        let cleaned = strip_dates(stem(name));

        if let Some(caps) = SEASON_EPISODE.captures(&cleaned) {
            return caps[2].parse().ok();
        }
        if let Some(caps) = EP_MARKER.captures(&cleaned) {
            return caps[1].parse().ok();
        }
        for pattern in &self.patterns {
            let Some(number) = pattern
                .captures(&cleaned)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
            else {
                continue;
            };
            if !is_date_format(&number.to_string()) {
                return Some(number);
            }
        }

        let bare = cleaned.trim();
        if !bare.is_empty() && bare.bytes().all(|b| b.is_ascii_digit()) && !is_date_format(bare) {
            return bare.parse().ok();
        }
        DIGITS
            .find_iter(&cleaned)
            .map(|m| m.as_str())
            .filter(|digits| !is_date_format(digits))
            .find_map(|digits| digits.parse().ok())
    }
}

fn compile<'a>(sources: impl Iterator<Item = &'a str>) -> Vec<Regex> {
    sources
        .filter_map(|source| match Regex::new(source) {
            Ok(regex) => Some(regex),
            Err(err) => {
                warn!(pattern = %source, error = %err, "episode pattern does not compile");
                None
            }
        })
        .collect()
}

/// Naming template with a `[]` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpisodeNaming {
    template: String,
}

impl EpisodeNaming {
    /// `None` when the template has no `[]` slot to fill.
    pub fn parse(template: &str) -> Option<Self> {
        template.contains(EPISODE_SLOT).then(|| Self {
            template: template.to_string(),
        })
    }

    /// New name for episode `episode`, keeping the extension of `original`.
    pub fn name_for(&self, episode: u32, original: &str) -> String {
        let ext = &original[stem(original).len()..];
        let number = format!("{episode:02}");
        format!("{}{ext}", self.template.replace(EPISODE_SLOT, &number))
    }
}

fn stem(name: &str) -> &str {
    super::strip_extension(name)
}

fn valid_month_day(month: &str, day: &str) -> bool {
    match (month.parse::<u32>(), day.parse::<u32>()) {
        (Ok(month), Ok(day)) => (1..=12).contains(&month) && (1..=31).contains(&day),
        _ => false,
    }
}

/// Digit runs that read as a date: `20240521`, `240521` or `0521`.
pub fn is_date_format(digits: &str) -> bool {
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    match digits.len() {
        8 if digits.starts_with("20") => valid_month_day(&digits[4..6], &digits[6..8]),
        6 => valid_month_day(&digits[2..4], &digits[4..6]),
        4 => valid_month_day(&digits[..2], &digits[2..]),
        _ => false,
    }
}

fn strip_dates(name: &str) -> String {
    let mut cleaned = name.to_string();
    for (shape, isolated) in DATE_SHAPES.iter() {
        for caps in shape.captures_iter(name) {
            let Some(whole) = caps.get(0) else { continue };
            if *isolated && touches_digit(name, whole.start(), whole.end()) {
                continue;
            }
            let (first, second, third) = (&caps[1], &caps[2], &caps[3]);
            let valid = if YEAR_PREFIX.is_match(first) {
                valid_month_day(second, third)
            } else if YEAR_PREFIX.is_match(third) {
                valid_month_day(first, second)
            } else {
                valid_month_day(second, third) || valid_month_day(first, second)
            };
            if valid {
                cleaned = cleaned.replace(whole.as_str(), " ");
            }
        }
    }
    cleaned
}

fn touches_digit(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].bytes().next_back();
    let after = text[end..].bytes().next();
    [before, after]
        .into_iter()
        .flatten()
        .any(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_common_episode_markers() {
        let episodes = EpisodeExtractor::default();
        assert_eq!(episodes.extract("第3集.mp4"), Some(3));
        assert_eq!(episodes.extract("Show.S02E11.1080p.mkv"), Some(11));
        assert_eq!(episodes.extract("show ep07.mkv"), Some(7));
        assert_eq!(episodes.extract("【12】.mp4"), Some(12));
        assert_eq!(episodes.extract("05.mkv"), Some(5));
    }

    #[test]
    fn dates_are_not_episodes() {
        let episodes = EpisodeExtractor::default();
        assert_eq!(episodes.extract("Show.2024-05-21.mkv"), None);
        assert_eq!(episodes.extract("20240521.mp4"), None);
        assert_eq!(episodes.extract("2024.05.21 第8期.mp4"), Some(8));
    }

    #[test]
    fn custom_patterns_replace_defaults() {
        let episodes = EpisodeExtractor::new(&[EpisodePattern {
            description: "hash".into(),
            regex: r"#(\d+)".into(),
        }]);
        assert_eq!(episodes.extract("part #4.mkv"), Some(4));
        assert_eq!(episodes.extract("第9集.mkv"), Some(9));
    }

    #[test]
    fn broken_custom_patterns_fall_back_to_defaults() {
        let episodes = EpisodeExtractor::new(&[EpisodePattern {
            description: String::new(),
            regex: "(".into(),
        }]);
        assert_eq!(episodes.extract("第2集.mp4"), Some(2));
    }

    #[test]
    fn date_digit_runs() {
        assert!(is_date_format("20240521"));
        assert!(is_date_format("240521"));
        assert!(is_date_format("0521"));
        assert!(!is_date_format("1399"));
        assert!(!is_date_format("12"));
    }

    #[test]
    fn naming_fills_slot_and_keeps_extension() {
        let naming = EpisodeNaming::parse("Show S01E[]").unwrap();
        assert_eq!(naming.name_for(3, "第3集.mp4"), "Show S01E03.mp4");
        assert_eq!(naming.name_for(112, "x.mkv"), "Show S01E112.mkv");
        let bare = EpisodeNaming::parse("[]").unwrap();
        assert_eq!(bare.name_for(7, "a.ass"), "07.ass");
        assert!(EpisodeNaming::parse("Show").is_none());
    }
}
