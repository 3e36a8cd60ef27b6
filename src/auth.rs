/// Authentication extractors and utilities
use crate::{account::AuthToken, error::PadlockError};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use axum_extra::extract::cookie::{Cookie, SameSite, SignedCookieJar};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Name of the signed web session cookie
pub const SESSION_COOKIE: &str = "session";

/// Header carrying the CSRF token for non-form requests
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Form field carrying the CSRF token
pub const CSRF_FIELD: &str = "csrf_token";

/// Email / token pair presented by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub token: String,
}

impl Credentials {
    fn parse_pair(value: &str) -> Option<Self> {
        let (email, token) = value.split_once(':')?;
        let (email, token) = (email.trim(), token.trim());
        if email.is_empty() || token.is_empty() || !email.contains('@') {
            return None;
        }
        Some(Self {
            email: email.to_string(),
            token: token.to_string(),
        })
    }

    /// Parse an `Authorization` header value.
    ///
    /// Accepted forms, with an optional `AuthToken` scheme prefix:
    /// `email:token`, or the same pair base64 encoded.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let value = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("authtoken") => rest.trim(),
            _ => value,
        };

        if let Some(credentials) = Self::parse_pair(value) {
            return Some(credentials);
        }

        [STANDARD, URL_SAFE]
            .iter()
            .find_map(|engine| engine.decode(value).ok())
            .and_then(|decoded| String::from_utf8(decoded).ok())
            .and_then(|decoded| Self::parse_pair(&decoded))
    }

    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(Self::parse)
    }
}

/// Contents of the signed session cookie
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSession {
    pub email: String,
    pub token: String,
    /// Token web forms must echo back on state changing requests
    pub csrf: String,
}

impl WebSession {
    pub fn new(auth_token: &AuthToken) -> Self {
        let mut csrf = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut csrf);

        Self {
            email: auth_token.email.clone(),
            token: auth_token.token.clone(),
            csrf: URL_SAFE_NO_PAD.encode(csrf),
        }
    }

    pub fn to_cookie(&self, secure: bool) -> Cookie<'static> {
        // Serializing a struct of strings cannot fail
        let value = serde_json::to_string(self).unwrap_or_default();
        Cookie::build((SESSION_COOKIE, value))
            .path("/")
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
            .build()
    }

    pub fn from_jar(jar: &SignedCookieJar) -> Option<Self> {
        jar.get(SESSION_COOKIE)
            .and_then(|cookie| serde_json::from_str(cookie.value()).ok())
    }

    /// Cookie that clears the session when added to a jar's removals
    pub fn removal_cookie() -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, "")).path("/").build()
    }
}

/// Authenticated context - placed in request extensions by the
/// authentication layer, extracted by handlers of protected endpoints
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub auth_token: AuthToken,
    /// Present for cookie authenticated (web) requests
    pub session: Option<WebSession>,
}

impl AuthContext {
    pub fn email(&self) -> &str {
        &self.auth_token.email
    }

    pub fn csrf_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.csrf.as_str())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for AuthContext {
    type Rejection = PadlockError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(PadlockError::InvalidAuthToken {
                email: None,
                token: None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::TokenType;
    use axum_extra::extract::cookie::Key;

    #[test]
    fn test_parse_plain_credentials() {
        let expected = Credentials {
            email: "u@example.com".to_string(),
            token: "abc-123".to_string(),
        };
        assert_eq!(Credentials::parse("u@example.com:abc-123"), Some(expected.clone()));
        assert_eq!(
            Credentials::parse("AuthToken u@example.com:abc-123"),
            Some(expected.clone())
        );
        assert_eq!(
            Credentials::parse("authtoken  u@example.com:abc-123 "),
            Some(expected)
        );
    }

    #[test]
    fn test_parse_base64_credentials() {
        let encoded = STANDARD.encode("u@example.com:abc-123");
        let parsed = Credentials::parse(&format!("AuthToken {}", encoded)).unwrap();
        assert_eq!(parsed.email, "u@example.com");
        assert_eq!(parsed.token, "abc-123");

        let encoded = URL_SAFE.encode("u@example.com:abc-123");
        assert!(Credentials::parse(&encoded).is_some());
    }

    #[test]
    fn test_reject_malformed_credentials() {
        assert!(Credentials::parse("").is_none());
        assert!(Credentials::parse("u@example.com").is_none());
        assert!(Credentials::parse("u@example.com:").is_none());
        assert!(Credentials::parse(":token").is_none());
        assert!(Credentials::parse("Bearer sometoken").is_none());
        assert!(Credentials::parse("user:password").is_none());
    }

    #[test]
    fn test_session_cookie_round_trip() {
        let token = AuthToken::new("u@example.com", TokenType::Web);
        let session = WebSession::new(&token);
        assert_eq!(session.token, token.token);
        assert!(!session.csrf.is_empty());

        let jar = SignedCookieJar::new(Key::generate()).add(session.to_cookie(true));
        assert_eq!(WebSession::from_jar(&jar), Some(session));
    }

    #[test]
    fn test_csrf_tokens_differ_per_session() {
        let token = AuthToken::new("u@example.com", TokenType::Web);
        assert_ne!(WebSession::new(&token).csrf, WebSession::new(&token).csrf);
    }
}
