//! Upstream response helpers.
//!
//! The wrapped services report errors in different envelopes:
//!
//! ```json
//! { "message": "...", "code": "42P01", "details": null, "hint": null }   // PostgREST
//! { "error": { "message": "...", "type": "invalid_request_error" } }    // OpenAI-style
//! { "error": { "code": 400, "message": "...", "status": "INVALID_ARGUMENT" } } // Google
//! ```

use serde::Deserialize;

/// PostgREST error body.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgrestError {
    pub message: Option<String>,
    pub code: Option<String>,
    pub details: Option<serde_json::Value>,
    pub hint: Option<String>,
}

/// Nested `{ "error": { "message": ... } }` body used by the LLM and
/// sentiment vendors.
#[derive(Debug, Clone, Deserialize)]
pub struct NestedError {
    pub error: NestedErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NestedErrorDetail {
    pub message: Option<String>,
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub status: Option<String>,
}

/// Pull a human-readable message out of any known error envelope, falling
/// back to the (truncated) raw body.
pub fn extract_error_message(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }

    if let Ok(nested) = serde_json::from_str::<NestedError>(trimmed) {
        if let Some(message) = nested.error.message {
            return message;
        }
        if let Some(kind) = nested.error.error_type.or(nested.error.status) {
            return kind;
        }
    }

    if let Ok(pg) = serde_json::from_str::<PostgrestError>(trimmed) {
        if let Some(message) = pg.message {
            return match pg.hint {
                Some(hint) if !hint.is_empty() => format!("{message} ({hint})"),
                _ => message,
            };
        }
    }

    trimmed.chars().take(300).collect()
}

/// Parse the total from a PostgREST `Content-Range` header (`0-9/120`).
pub fn parse_content_range_total(header: &str) -> Option<i64> {
    header.rsplit('/').next().and_then(|total| total.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_postgrest_message() {
        let body = r#"{"message":"relation does not exist","code":"42P01","details":null,"hint":"check the table name"}"#;
        assert_eq!(
            extract_error_message(body),
            "relation does not exist (check the table name)"
        );
    }

    #[test]
    fn test_extract_google_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        assert_eq!(extract_error_message(body), "API key not valid");
    }

    #[test]
    fn test_extract_fallbacks() {
        assert_eq!(extract_error_message(""), "empty response body");
        assert_eq!(extract_error_message("Bad Gateway"), "Bad Gateway");
        let long = "x".repeat(1000);
        assert_eq!(extract_error_message(&long).len(), 300);
    }

    #[test]
    fn test_content_range() {
        assert_eq!(parse_content_range_total("0-9/120"), Some(120));
        assert_eq!(parse_content_range_total("*/0"), Some(0));
        assert_eq!(parse_content_range_total("0-9/*"), None);
    }
}
