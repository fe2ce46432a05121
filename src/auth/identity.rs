use std::fmt;

use async_trait::async_trait;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{LookupError, RoleSet};

/// Name of the cookie carrying the session secret.
pub const LOGIN_COOKIE: &str = "login";

/// Resolved caller of a request. Zero is the anonymous identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    pub const ANONYMOUS: UserId = UserId(0);

    pub fn is_anonymous(self) -> bool {
        self == Self::ANONYMOUS
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session store consulted by the authorization engine.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Map a session secret to its user, `None` for unknown or expired sessions.
    async fn resolve_identity(&self, credential: &str) -> Result<Option<UserId>, LookupError>;
    async fn role_set_of(&self, user: UserId) -> Result<RoleSet, LookupError>;
}

/// Bearer token payload: base64-encoded JSON issued alongside the login cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    #[serde(rename = "Secret")]
    pub secret: String,
    #[serde(rename = "userID")]
    pub user_id: String,
}

impl AuthToken {
    pub fn encode(&self) -> String {
        // Serializing two strings cannot fail
        STANDARD.encode(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(value: &str) -> Option<Self> {
        let bytes = STANDARD.decode(value.trim()).ok()?;
        serde_json::from_slice(&bytes).ok()
    }
}

/// Extract the session secret from a request.
///
/// An `Authorization` header takes precedence over the login cookie; a
/// malformed header yields no credential rather than falling back.
pub fn extract_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().ok()?;
        let (scheme, token) = value.split_once(' ')?;
        if scheme != "Bearer" {
            return None;
        }
        return AuthToken::decode(token).map(|t| t.secret);
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == LOGIN_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// Hash a session secret for storage lookup.
pub fn hash_secret(secret: &str) -> String {
    let digest = ring::digest::digest(&ring::digest::SHA256, secret.as_bytes());
    hex::encode(digest.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_wins_over_cookie() {
        let token = AuthToken {
            secret: "from-bearer".to_string(),
            user_id: "7".to_string(),
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token.encode())).unwrap(),
        );
        headers.insert(COOKIE, HeaderValue::from_static("login=from-cookie"));

        assert_eq!(extract_credential(&headers).as_deref(), Some("from-bearer"));
    }

    #[test]
    fn malformed_bearer_yields_nothing() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer not-base64!"));
        headers.insert(COOKIE, HeaderValue::from_static("login=from-cookie"));
        assert_eq!(extract_credential(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_credential(&headers), None);
    }

    #[test]
    fn login_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; login=s3cret; lang=en"),
        );
        assert_eq!(extract_credential(&headers).as_deref(), Some("s3cret"));
    }

    #[test]
    fn hashed_secret_is_hex_sha256() {
        let hash = hash_secret("abc");
        assert_eq!(
            hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
