//! Grammar for rename replacement templates.
//!
//! A template mixes literal text, magic variables (`{E}`, `{TASKNAME}`),
//! regex back-references (`\1`, `\g<name>`) and sequence placeholders
//! (`{I}`, `{II}`, ...; the number of `I`s is the zero-padded width).

use std::sync::LazyLock;

use regex::{Captures, Regex};

static SEQUENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(I+)\}").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Variable(String),
    Backref(String),
    Sequence { width: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut rest = source;

        while let Some(ch) = rest.chars().next() {
            let parsed = match ch {
                '{' => parse_braced(rest),
                '\\' => parse_backref(rest),
                _ => None,
            };
            match parsed {
                Some((segment, consumed)) => {
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                    rest = &rest[consumed..];
                }
                None if ch == '\\' && rest.len() > 1 => {
                    // `\x` outside a back-reference stands for `x`.
                    let next = rest[1..].chars().next().unwrap_or('\\');
                    literal.push(next);
                    rest = &rest[1 + next.len_utf8()..];
                }
                None => {
                    literal.push(ch);
                    rest = &rest[ch.len_utf8()..];
                }
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_sequence(&self) -> bool {
        self.sequence_width().is_some()
    }

    pub fn sequence_width(&self) -> Option<usize> {
        self.segments.iter().find_map(|segment| match segment {
            Segment::Sequence { width } => Some(*width),
            _ => None,
        })
    }

    /// Anchored regex recognising names this template could have produced.
    /// The first sequence placeholder is captured as `seq`.
    pub fn matcher(&self) -> Result<Regex, regex::Error> {
        let mut pattern = String::from("^");
        let mut captured = false;
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => pattern.push_str(&regex::escape(text)),
                Segment::Variable(_) | Segment::Backref(_) => pattern.push_str(".*?"),
                Segment::Sequence { width } if !captured => {
                    captured = true;
                    pattern.push_str(&format!(r"(?P<seq>\d{{{width}}})"));
                }
                Segment::Sequence { width } => pattern.push_str(&format!(r"\d{{{width}}}")),
            }
        }
        pattern.push('$');
        Regex::new(&pattern)
    }
}

pub fn contains_sequence(text: &str) -> bool {
    SEQUENCE.is_match(text)
}

/// Replaces every sequence placeholder in `text` with `index`, padded to the
/// placeholder's own width.
pub fn fill_sequence(text: &str, index: u64) -> String {
    SEQUENCE
        .replace_all(text, |caps: &Captures<'_>| {
            let width = caps[1].len();
            format!("{index:0width$}")
        })
        .into_owned()
}

/// Regex matching `text` literally except that sequence placeholders accept
/// digits of their width.
pub fn sequence_pattern(text: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::from("^");
    let mut last = 0;
    for caps in SEQUENCE.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        pattern.push_str(&regex::escape(&text[last..whole.start()]));
        pattern.push_str(&format!(r"\d{{{}}}", caps[1].len()));
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&text[last..]));
    pattern.push('$');
    Regex::new(&pattern)
}

fn parse_braced(rest: &str) -> Option<(Segment, usize)> {
    let close = rest.find('}')?;
    let inner = &rest[1..close];
    if inner.is_empty() {
        return None;
    }
    let segment = if inner.chars().all(|c| c == 'I') {
        Segment::Sequence { width: inner.len() }
    } else if inner.starts_with(|c: char| c.is_ascii_uppercase())
        && inner
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    {
        Segment::Variable(inner.to_string())
    } else {
        return None;
    };
    Some((segment, close + 1))
}

fn parse_backref(rest: &str) -> Option<(Segment, usize)> {
    let body = &rest[1..];
    if let Some(named) = body.strip_prefix("g<") {
        let close = named.find('>')?;
        let name = &named[..close];
        if name.is_empty() {
            return None;
        }
        return Some((Segment::Backref(name.to_string()), 1 + 2 + close + 1));
    }
    let digits = body
        .chars()
        .take(2)
        .take_while(|c| c.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    Some((Segment::Backref(body[..digits].to_string()), 1 + digits))
}
