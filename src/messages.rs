//! Status-message catalog.
//!
//! Maps error keys to `(code, message template)` pairs loaded from an
//! embedded TOML document. Templates carry `{placeholder}` slots that are
//! filled at lookup time.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

const CATALOG_TOML: &str = include_str!("messages.toml");

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    code: String,
    message: String,
}

fn catalog() -> &'static HashMap<String, CatalogEntry> {
    static CATALOG: OnceLock<HashMap<String, CatalogEntry>> = OnceLock::new();
    CATALOG.get_or_init(|| match toml::from_str(CATALOG_TOML) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Failed to parse the embedded message catalog: {e}");
            HashMap::new()
        }
    })
}

/// A structure containing a status code and a formatted status message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusMessage {
    pub code: String,
    pub message: String,
}

fn unknown() -> StatusMessage {
    StatusMessage {
        code: "UNKNOWN".to_string(),
        message: "An unknown error occurred.".to_string(),
    }
}

/// Get the status code and message for a given key.
///
/// `args` fills the `{placeholder}` slots of the message template. An
/// unknown key, or a template whose placeholders are not fully supplied,
/// yields the UNKNOWN fallback.
pub fn get_status_message(key: &str, args: &[(&str, &str)]) -> StatusMessage {
    let Some(entry) = catalog().get(key) else {
        return unknown();
    };

    let mut message = entry.message.clone();
    for (name, value) in args {
        message = message.replace(&format!("{{{name}}}"), value);
    }
    if message.contains('{') {
        return unknown();
    }

    StatusMessage {
        code: entry.code.clone(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_key_without_args() {
        let msg = get_status_message("RESOURCE_LIMIT_EXCEEDED", &[]);
        assert_eq!(msg.code, "RESOURCE_EXHAUSTED");
        assert!(msg.message.starts_with("The job was not accepted"));
    }

    #[test]
    fn test_placeholder_substitution() {
        let msg = get_status_message("JOB_NOT_FOUND", &[("job_id", "abc-123")]);
        assert_eq!(msg.code, "NOT_FOUND");
        assert_eq!(msg.message, "Job not found (ID: abc-123).");
    }

    #[test]
    fn test_reason_substitution() {
        let msg = get_status_message("INVALID_REQUEST", &[("reason", "bad backend")]);
        assert_eq!(msg.code, "INVALID_ARGUMENT");
        assert_eq!(msg.message, "Invalid request parameters: bad backend");
    }

    #[test]
    fn test_unknown_key_falls_back() {
        let msg = get_status_message("NO_SUCH_KEY", &[]);
        assert_eq!(msg.code, "UNKNOWN");
        assert_eq!(msg.message, "An unknown error occurred.");
    }

    #[test]
    fn test_missing_placeholder_falls_back() {
        let msg = get_status_message("INVALID_REQUEST", &[]);
        assert_eq!(msg.code, "UNKNOWN");
    }
}
