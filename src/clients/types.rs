//! Shared types for the outbound API clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Display language for generated guidance and user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ko,
    En,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Self::Ko => "ko",
            Self::En => "en",
        }
    }

    /// Parse a language code; anything unknown falls back to Korean.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" | "eng" | "english" => Self::En,
            _ => Self::Ko,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Outbound client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A credential or endpoint needed by the feature is not configured.
    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    #[error("network error: {0}")]
    Transport(String),

    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },

    #[error("invalid API response: {0}")]
    Decode(String),

    #[error("filter '{field}' is not supported by {service}")]
    UnsupportedFilter { service: String, field: String },
}

impl ClientError {
    /// Configuration problems are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingCredential(_))
    }
}

/// Longest response body kept in a `Status` error.
const MAX_ERROR_BODY: usize = 512;

impl From<ureq::Error> for ClientError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, response) => {
                let mut body = response.into_string().unwrap_or_default();
                if body.len() > MAX_ERROR_BODY {
                    let mut cut = MAX_ERROR_BODY;
                    while !body.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    body.truncate(cut);
                }
                Self::Status { code, body }
            }
            ureq::Error::Transport(t) => Self::Transport(t.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_codes() {
        assert_eq!(Language::from_code("EN"), Language::En);
        assert_eq!(Language::from_code("ko"), Language::Ko);
        assert_eq!(Language::from_code("fr"), Language::Ko);
        assert_eq!(Language::En.to_string(), "en");
    }

    #[test]
    fn test_language_serde() {
        let lang: Language = serde_json::from_str("\"en\"").unwrap();
        assert_eq!(lang, Language::En);
        assert_eq!(serde_json::to_string(&Language::Ko).unwrap(), "\"ko\"");
    }

    #[test]
    fn test_error_display() {
        let err = ClientError::MissingCredential("AZURE_CV_PREDICTION_KEY");
        assert_eq!(err.to_string(), "AZURE_CV_PREDICTION_KEY is not configured");
        assert!(err.is_configuration());
        assert!(!ClientError::Transport("timeout".into()).is_configuration());
    }
}
