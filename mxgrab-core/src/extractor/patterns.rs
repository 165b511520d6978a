use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use url::Url;

fn manifest_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"https?://[^\s'"<>\\]+?\.(?:m3u8|mpd)(?:\?[^\s'"<>\\]*)?"#)
            .expect("manifest pattern is valid")
    })
}

/// Every manifest URL occurring in `text`, in order of appearance. JSON-escaped
/// slashes are unescaped before matching.
pub fn find_manifest_urls(text: &str) -> Vec<String> {
    let unescaped = text.replace(r"\/", "/");
    manifest_regex()
        .find_iter(&unescaped)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

/// Whether the URL path ends in a manifest extension, ignoring query and fragment.
pub fn is_manifest_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            let path = url.path().to_ascii_lowercase();
            path.ends_with(".m3u8") || path.ends_with(".mpd")
        }
        _ => false,
    }
}

/// Ordered, duplicate-free candidate list.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    seen: HashSet<String>,
    ordered: Vec<String>,
}

impl CandidateSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: impl Into<String>) -> bool {
        let candidate = candidate.into();
        let candidate = candidate.trim();
        if candidate.is_empty() || self.seen.contains(candidate) {
            return false;
        }
        self.seen.insert(candidate.to_string());
        self.ordered.push(candidate.to_string());
        true
    }

    pub fn extend<I, S>(&mut self, candidates: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for candidate in candidates {
            self.push(candidate);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}
