use regex::Regex;
use url::Url;

use crate::config::SourcesSection;
use crate::error::{ConfigError, Result};

use super::error::{SessionError, SessionResult};

/// Allow-list check applied to every submitted page URL.
#[derive(Debug, Clone)]
pub struct SourceValidator {
    patterns: Vec<Regex>,
}

impl SourceValidator {
    pub fn new(section: &SourcesSection) -> Result<Self> {
        let patterns = section
            .allow
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|err| ConfigError::Invalid {
                    field: "sources.allow",
                    reason: format!("{pattern}: {err}"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Returns the trimmed URL when it parses as http(s) and matches at least
    /// one allow pattern.
    pub fn validate(&self, raw: &str) -> SessionResult<String> {
        let candidate = raw.trim();
        if candidate.is_empty() {
            return Err(SessionError::Validation("empty url".to_string()));
        }
        let parsed = Url::parse(candidate)
            .map_err(|err| SessionError::Validation(format!("{candidate}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SessionError::Validation(format!(
                "{candidate}: unsupported scheme {}",
                parsed.scheme()
            )));
        }
        if !self.patterns.iter().any(|pattern| pattern.is_match(candidate)) {
            return Err(SessionError::Validation(format!(
                "{candidate} is not a supported page"
            )));
        }
        Ok(candidate.to_string())
    }
}
