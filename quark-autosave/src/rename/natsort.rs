use std::cmp::Ordering;

/// Ordinal and numeral tokens in narrative order. Each is swapped for a
/// zero-padded placeholder before comparing so `第二集` sorts before `第十集`.
const PRIORITY: [&str; 16] = [
    "上", "中", "下", "一", "二", "三", "四", "五", "六", "七", "八", "九", "十", "百", "千", "万",
];

pub fn priority_key(name: &str) -> String {
    let mut key = name.to_string();
    for (index, token) in PRIORITY.iter().enumerate() {
        if key.contains(token) {
            key = key.replace(token, &format!("_{index:02}_"));
        }
    }
    key
}

/// Natural comparison after priority-token mapping.
pub fn compare(a: &str, b: &str) -> Ordering {
    natural_cmp(&priority_key(a), &priority_key(b))
}

pub fn sort_names<S: AsRef<str>>(names: &mut [S]) {
    names.sort_by_cached_key(|name| SortKey::new(name.as_ref()));
}

pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let left = chunks(a);
    let right = chunks(b);
    for (x, y) in left.iter().zip(right.iter()) {
        let ord = x.cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    left.len().cmp(&right.len()).then_with(|| a.cmp(b))
}

#[derive(Debug, PartialEq, Eq)]
struct SortKey {
    key: String,
}

impl SortKey {
    fn new(name: &str) -> Self {
        Self {
            key: priority_key(name),
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.key, &other.key)
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Chunk {
    Number(String),
    Text(String),
}

impl Ord for Chunk {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Chunk::Number(a), Chunk::Number(b)) => {
                let a_trim = a.trim_start_matches('0');
                let b_trim = b.trim_start_matches('0');
                a_trim
                    .len()
                    .cmp(&b_trim.len())
                    .then_with(|| a_trim.cmp(b_trim))
                    .then_with(|| a.len().cmp(&b.len()))
            }
            (Chunk::Number(_), Chunk::Text(_)) => Ordering::Less,
            (Chunk::Text(_), Chunk::Number(_)) => Ordering::Greater,
            (Chunk::Text(a), Chunk::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Chunk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn chunks(value: &str) -> Vec<Chunk> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_digits = false;
    for ch in value.chars() {
        let is_digit = ch.is_ascii_digit();
        if !current.is_empty() && is_digit != in_digits {
            out.push(finish(std::mem::take(&mut current), in_digits));
        }
        in_digits = is_digit;
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        out.push(finish(current, in_digits));
    }
    out
}

fn finish(text: String, digits: bool) -> Chunk {
    if digits {
        Chunk::Number(text)
    } else {
        Chunk::Text(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_by_value() {
        let mut names = vec!["EP10.mkv", "EP2.mkv", "EP1.mkv"];
        sort_names(&mut names);
        assert_eq!(names, ["EP1.mkv", "EP2.mkv", "EP10.mkv"]);
    }

    #[test]
    fn chinese_numerals_sort_in_narrative_order() {
        let mut names = vec!["第十集.mkv", "第二集.mkv", "第一集.mkv"];
        sort_names(&mut names);
        assert_eq!(names, ["第一集.mkv", "第二集.mkv", "第十集.mkv"]);
    }

    #[test]
    fn part_markers_follow_upper_middle_lower() {
        let mut names = vec!["第3期下.mp4", "第3期上.mp4", "第3期中.mp4"];
        sort_names(&mut names);
        assert_eq!(names, ["第3期上.mp4", "第3期中.mp4", "第3期下.mp4"]);
    }

    #[test]
    fn leading_zeros_only_break_ties() {
        assert_eq!(natural_cmp("a007", "a7"), Ordering::Greater);
        assert_eq!(natural_cmp("a007", "a8"), Ordering::Less);
        assert_eq!(compare("S01E09", "S01E10"), Ordering::Less);
    }
}
