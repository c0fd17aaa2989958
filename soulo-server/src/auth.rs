//! Bearer token validation for the edge-function server.
//!
//! The token comes from `server.auth_token`; an empty token disables auth.
//! `soulo config init` uses [`generate_token`] to fill it in.

use base64::Engine;
use rand::Rng;
use tracing::debug;

/// Validates `Authorization: Bearer <token>` headers.
#[derive(Clone)]
pub struct BearerAuth {
    token: Option<String>,
}

impl BearerAuth {
    /// Require `token` on every request, or nothing when it is empty.
    pub fn new(token: &str) -> Self {
        let token = token.trim();
        if token.is_empty() {
            debug!("server auth disabled");
            Self { token: None }
        } else {
            debug!("server auth enabled");
            Self { token: Some(token.to_string()) }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Validate an `Authorization` header value.
    pub fn validate(&self, header: Option<&str>) -> bool {
        let Some(expected) = &self.token else {
            return true;
        };
        match header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(provided) => constant_time_eq(provided.trim().as_bytes(), expected.as_bytes()),
            None => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Generate a 32-byte random token encoded as base64url (no padding).
/// Produces a 43-character string.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_length() {
        assert_eq!(generate_token().len(), 43);
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn test_disabled_accepts_anything() {
        let auth = BearerAuth::new("   ");
        assert!(!auth.is_enabled());
        assert!(auth.validate(None));
        assert!(auth.validate(Some("Bearer whatever")));
    }

    #[test]
    fn test_validate() {
        let auth = BearerAuth::new("secret-token");
        assert!(auth.validate(Some("Bearer secret-token")));
        assert!(auth.validate(Some("Bearer secret-token  ")));
        assert!(!auth.validate(Some("Bearer wrong-token")));
        assert!(!auth.validate(Some("secret-token")));
        assert!(!auth.validate(None));
    }
}
