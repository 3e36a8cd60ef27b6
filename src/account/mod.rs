/// Account management system
///
/// Accounts, their auth tokens, pending auth requests and the per-account
/// data store, plus the token state machine in [`AccountManager`].

mod data_store;
mod manager;

pub use data_store::DataStore;
pub use manager::{AccountManager, TokenPolicy};

use crate::storage::{EntityKind, Storable, StorageResult};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// Staleness threshold for pending auth requests
pub const AUTH_REQUEST_TTL_HOURS: i64 = 24;

/// How a token authenticates its requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// `Authorization` header credentials used by api clients
    Api,
    /// Signed session cookie used by the web dashboard
    Web,
}

impl TokenType {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenType::Api => "api",
            TokenType::Web => "web",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "api" => Ok(TokenType::Api),
            "web" => Ok(TokenType::Web),
            other => Err(format!("unknown token type '{}'", other)),
        }
    }
}

/// Credential granting access to one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    /// Owning account
    pub email: String,
    /// Random token identifier presented by clients
    pub token: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub created: DateTime<Utc>,
    pub activated: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl AuthToken {
    /// New, not yet activated token with a random identifier
    pub fn new(email: impl Into<String>, token_type: TokenType) -> Self {
        Self {
            email: email.into(),
            token: Uuid::new_v4().to_string(),
            token_type,
            created: Utc::now(),
            activated: None,
            last_used: None,
        }
    }

    /// Point in time the token expires, given the maximum idle age.
    /// `None` while the token has not been activated.
    pub fn expires(&self, max_age: Duration) -> Option<DateTime<Utc>> {
        self.last_used.or(self.activated).map(|t| t + max_age)
    }

    /// Whether the token is past its validity window at `now`
    pub fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        match self.expires(max_age) {
            Some(expires) => now > expires,
            None => true,
        }
    }
}

/// User account, identified by email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    #[serde(default)]
    pub auth_tokens: Vec<AuthToken>,
}

impl Account {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            auth_tokens: Vec::new(),
        }
    }

    /// Token with exactly the given identifier
    pub fn find_auth_token(&self, token: &str) -> Option<&AuthToken> {
        self.auth_tokens.iter().find(|t| t.token == token)
    }

    /// Insert a token, replacing any existing token with the same identifier
    pub fn add_auth_token(&mut self, auth_token: AuthToken) {
        match self
            .auth_tokens
            .iter_mut()
            .find(|t| t.token == auth_token.token)
        {
            Some(existing) => *existing = auth_token,
            None => self.auth_tokens.push(auth_token),
        }
    }

    /// Remove a token, returning it if it was present
    pub fn remove_auth_token(&mut self, token: &str) -> Option<AuthToken> {
        let index = self.auth_tokens.iter().position(|t| t.token == token)?;
        Some(self.auth_tokens.remove(index))
    }
}

impl Storable for Account {
    const KIND: EntityKind = EntityKind::Account;

    fn key(&self) -> Vec<u8> {
        self.email.as_bytes().to_vec()
    }

    fn serialize(&self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn deserialize(_key: &[u8], data: &[u8]) -> StorageResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Pending, unconfirmed auth token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// One-time activation code sent by email
    pub code: String,
    pub auth_token: AuthToken,
    pub created: DateTime<Utc>,
    /// Where to send the browser after activating a web token
    #[serde(default)]
    pub redirect: Option<String>,
}

impl AuthRequest {
    pub fn new(auth_token: AuthToken, redirect: Option<String>) -> Self {
        let mut code = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut code);

        Self {
            code: hex::encode(code),
            auth_token,
            created: Utc::now(),
            redirect,
        }
    }

    /// Whether the request is past the activation window at `now`
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.created < now - Duration::hours(AUTH_REQUEST_TTL_HOURS)
    }
}

impl Storable for AuthRequest {
    const KIND: EntityKind = EntityKind::AuthRequest;

    fn key(&self) -> Vec<u8> {
        self.code.as_bytes().to_vec()
    }

    fn serialize(&self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn deserialize(_key: &[u8], data: &[u8]) -> StorageResult<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}
