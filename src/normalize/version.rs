//! Cross-repository version comparison
//!
//! Versions coming from different repositories follow no common scheme, so
//! comparison works on a loose component model rather than on any single
//! format:
//!
//! 1. The string is split into alternating numeric and alphabetic segments;
//!    every other character acts as a separator.
//! 2. Each segment is ranked: pre-release words (`alpha`, `rc`, anything
//!    not listed as post-release) < implicit zero padding < post-release
//!    words (`patch`, `post`, `pl`, `p`, `errata`) < non-zero numbers.
//! 3. The shorter version is padded with zeros, so `1.0 == 1.0.0` while
//!    `1.0alpha1 < 1.0 < 1.0patch1`.
//!
//! Numeric segments are compared by value without overflow (leading zeros
//! are ignored, longer digit strings are larger).
//!
//! # Examples
//!
//! ```
//! use pkgunify::normalize::version::compare_versions;
//! use std::cmp::Ordering;
//!
//! assert_eq!(compare_versions("1.0", "2.0"), Ordering::Less);
//! assert_eq!(compare_versions("1.0rc1", "1.0"), Ordering::Less);
//! assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
//! ```

use std::cmp::Ordering;

const POST_RELEASE_WORDS: &[&str] = &["patch", "post", "pl", "p", "errata"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Component<'a> {
    PreRelease(String),
    Zero,
    PostRelease(String),
    NonZero(&'a str),
}

impl Component<'_> {
    fn rank(&self) -> u8 {
        match self {
            Component::PreRelease(_) => 0,
            Component::Zero => 1,
            Component::PostRelease(_) => 2,
            Component::NonZero(_) => 3,
        }
    }
}

impl Ord for Component<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.rank().cmp(&other.rank()) {
            Ordering::Equal => {}
            order => return order,
        }

        match (self, other) {
            (Component::PreRelease(a), Component::PreRelease(b))
            | (Component::PostRelease(a), Component::PostRelease(b)) => a.cmp(b),
            (Component::NonZero(a), Component::NonZero(b)) => compare_numeric(a, b),
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for Component<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two digit strings by numeric value
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn components(version: &str) -> Vec<Component<'_>> {
    let mut result = Vec::new();
    let mut rest = version;

    loop {
        // Skip separators
        rest = rest.trim_start_matches(|c: char| !c.is_alphanumeric());
        let Some(first) = rest.chars().next() else {
            break;
        };

        let is_digit = first.is_ascii_digit();
        let end = rest
            .char_indices()
            .find(|(_, c)| !c.is_alphanumeric() || c.is_ascii_digit() != is_digit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (segment, tail) = rest.split_at(end);
        rest = tail;

        if is_digit {
            if segment.trim_start_matches('0').is_empty() {
                result.push(Component::Zero);
            } else {
                result.push(Component::NonZero(segment));
            }
        } else {
            let word = segment.to_lowercase();
            if POST_RELEASE_WORDS.contains(&word.as_str()) {
                result.push(Component::PostRelease(word));
            } else {
                result.push(Component::PreRelease(word));
            }
        }
    }

    result
}

/// Compare two version strings
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = components(a);
    let b = components(b);

    for i in 0..a.len().max(b.len()) {
        let left = a.get(i).unwrap_or(&Component::Zero);
        let right = b.get(i).unwrap_or(&Component::Zero);
        match left.cmp(right) {
            Ordering::Equal => continue,
            order => return order,
        }
    }

    Ordering::Equal
}

/// Number of parts between separators; letter/digit runs are not split
pub fn version_components(version: &str) -> usize {
    version.split(|c: char| !c.is_ascii_alphanumeric()).count()
}
