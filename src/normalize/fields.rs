//! Field normalizers applied by the package builder setters
//!
//! Every normalizer takes an owned string and returns a [`Normalized`]
//! outcome. The value is `None` when the input must be dropped; a
//! diagnostic with a dropped value is an error, a diagnostic with a kept
//! value is a warning.

use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_SUMMARY_CHARS: usize = 1024;
pub const MAX_SHORT_FIELD_CHARS: usize = 256;
pub const MAX_URL_CHARS: usize = 2048;

const URL_SCHEMES: &[&str] = &[
    "http", "https", "ftp", "git", "svn", "hg", "bzr", "cvs", "gopher", "irc", "mirror",
    "mirrors",
];

/// Schemes which get a `/` path when the URL has none
const ROOTED_SCHEMES: &[&str] = &["http", "https", "ftp"];

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.-]*)://([^/?#]+)(.*)$").expect("valid url regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub value: Option<String>,
    pub diagnostic: Option<String>,
}

impl Normalized {
    pub fn keep(value: String) -> Self {
        Self {
            value: Some(value),
            diagnostic: None,
        }
    }

    pub fn warn(value: String, message: impl Into<String>) -> Self {
        Self {
            value: Some(value),
            diagnostic: Some(message.into()),
        }
    }

    pub fn reject(message: impl Into<String>) -> Self {
        Self {
            value: None,
            diagnostic: Some(message.into()),
        }
    }

    /// Dropped without a diagnostic (e.g. a blank value)
    pub fn skip() -> Self {
        Self {
            value: None,
            diagnostic: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.value.is_none() && self.diagnostic.is_some()
    }
}

pub type Normalizer = fn(String) -> Normalized;

/// Outcome of a whole normalizer chain for one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainOutcome {
    pub value: Option<String>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    Warning(String),
    Error(String),
}

/// Apply normalizers in order, stopping at the first one that drops the value
pub fn apply_chain(value: String, chain: &[Normalizer]) -> ChainOutcome {
    let mut current = value;
    let mut diagnostics = Vec::new();

    for normalizer in chain {
        let outcome = normalizer(current);
        match (outcome.value, outcome.diagnostic) {
            (Some(value), None) => current = value,
            (Some(value), Some(message)) => {
                diagnostics.push(Diagnostic::Warning(message));
                current = value;
            }
            (None, Some(message)) => {
                diagnostics.push(Diagnostic::Error(message));
                return ChainOutcome {
                    value: None,
                    diagnostics,
                };
            }
            (None, None) => {
                return ChainOutcome {
                    value: None,
                    diagnostics,
                }
            }
        }
    }

    ChainOutcome {
        value: Some(current),
        diagnostics,
    }
}

pub fn strip(value: String) -> Normalized {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Normalized::skip()
    } else if trimmed.len() == value.len() {
        Normalized::keep(value)
    } else {
        Normalized::keep(trimmed.to_string())
    }
}

pub fn forbid_newlines(value: String) -> Normalized {
    if value.contains('\n') || value.contains('\r') {
        Normalized::reject(format!("value {:?} contains a newline", value))
    } else {
        Normalized::keep(value)
    }
}

pub fn lowercase(value: String) -> Normalized {
    Normalized::keep(value.to_lowercase())
}

/// Summaries over the limit are truncated at a char boundary with a warning
pub fn limit_summary(value: String) -> Normalized {
    if value.chars().count() <= MAX_SUMMARY_CHARS {
        return Normalized::keep(value);
    }
    let truncated: String = value.chars().take(MAX_SUMMARY_CHARS).collect();
    Normalized::warn(
        truncated,
        format!("summary truncated to {} characters", MAX_SUMMARY_CHARS),
    )
}

pub fn limit_short_field(value: String) -> Normalized {
    if value.chars().count() > MAX_SHORT_FIELD_CHARS {
        Normalized::reject(format!(
            "value longer than {} characters",
            MAX_SHORT_FIELD_CHARS
        ))
    } else {
        Normalized::keep(value)
    }
}

pub fn url(value: String) -> Normalized {
    if value.chars().count() > MAX_URL_CHARS {
        return Normalized::reject(format!("url longer than {} characters", MAX_URL_CHARS));
    }

    let Some(caps) = URL_RE.captures(&value) else {
        return Normalized::reject(format!("{:?} is not an url", value));
    };

    let scheme = caps[1].to_lowercase();
    let base_scheme = scheme.split('+').next().unwrap_or_default();
    if !URL_SCHEMES.contains(&base_scheme) {
        return Normalized::reject(format!("url {:?} has unsupported scheme", value));
    }

    let host = caps[2].to_lowercase();
    let mut path = caps[3].to_string();
    if !path.starts_with('/') && ROOTED_SCHEMES.contains(&scheme.as_str()) {
        path.insert(0, '/');
    }

    Normalized::keep(format!("{}://{}{}", scheme, host, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip() {
        assert_eq!(strip("  foo ".to_string()).value.as_deref(), Some("foo"));
        assert_eq!(strip("   ".to_string()), Normalized::skip());
    }

    #[test]
    fn test_forbid_newlines() {
        assert!(forbid_newlines("a\nb".to_string()).is_error());
        assert!(!forbid_newlines("ab".to_string()).is_error());
    }

    #[test]
    fn test_url_normalization() {
        assert_eq!(
            url("HTTPS://Example.COM".to_string()).value.as_deref(),
            Some("https://example.com/")
        );
        assert_eq!(
            url("http://Example.com/Some/Path".to_string()).value.as_deref(),
            Some("http://example.com/Some/Path")
        );
        assert_eq!(
            url("git://github.com".to_string()).value.as_deref(),
            Some("git://github.com")
        );
        assert_eq!(
            url("git+https://github.com/foo/bar".to_string())
                .value
                .as_deref(),
            Some("git+https://github.com/foo/bar")
        );
    }

    #[test]
    fn test_url_query_without_path_is_rooted() {
        assert_eq!(
            url("http://Example.com?x=1".to_string()).value.as_deref(),
            Some("http://example.com/?x=1")
        );
        assert_eq!(
            url("https://example.com#top".to_string()).value,
            url("https://example.com/#top".to_string()).value
        );
        assert_eq!(
            url("git://example.com?x".to_string()).value.as_deref(),
            Some("git://example.com?x")
        );
    }

    #[test]
    fn test_url_rejections() {
        assert!(url("example.com".to_string()).is_error());
        assert!(url("javascript://foo".to_string()).is_error());
        assert!(url("file:///etc/passwd".to_string()).is_error());
        assert!(url(format!("http://example.com/{}", "a".repeat(MAX_URL_CHARS))).is_error());
    }

    #[test]
    fn test_limit_summary_warns() {
        let long = "x".repeat(MAX_SUMMARY_CHARS + 10);
        let outcome = limit_summary(long);
        assert_eq!(outcome.value.unwrap().chars().count(), MAX_SUMMARY_CHARS);
        assert!(outcome.diagnostic.is_some());
    }

    #[test]
    fn test_chain_stops_on_error() {
        let outcome = apply_chain(
            " a\nb ".to_string(),
            &[strip, forbid_newlines, lowercase],
        );
        assert_eq!(outcome.value, None);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert!(matches!(outcome.diagnostics[0], Diagnostic::Error(_)));

        let outcome = apply_chain(" FOO ".to_string(), &[strip, lowercase]);
        assert_eq!(outcome.value.as_deref(), Some("foo"));
        assert!(outcome.diagnostics.is_empty());
    }
}
