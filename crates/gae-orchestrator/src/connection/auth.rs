// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bearer token issuing and caching.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::http::read_json;
use crate::error::{ConfigError, EngineError};

/// Lifetime assumed for tokens that do not state their own expiry.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

const SHELL_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>'];

/// A bearer token and its validity window.
#[derive(Clone)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IssuedToken {
    /// A token issued now, valid for `lifetime`.
    pub fn new(token: impl Into<String>, lifetime: Duration) -> Self {
        let issued_at = Utc::now();
        let lifetime = chrono::Duration::from_std(lifetime).unwrap_or(chrono::Duration::MAX);
        Self {
            token: token.into(),
            issued_at,
            expires_at: issued_at.checked_add_signed(lifetime).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn with_expiry(
        token: impl Into<String>,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            token: token.into(),
            issued_at,
            expires_at,
        }
    }

    /// Still valid for at least `margin`.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        Utc::now()
            .checked_add_signed(margin)
            .is_some_and(|deadline| deadline < self.expires_at)
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"***")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can mint a new bearer token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn issue(&self) -> Result<IssuedToken, EngineError>;
}

/// Token cache shared by every job using one connection.
///
/// Refresh is a check-then-set under one lock: callers that find the token
/// stale while another caller is refreshing wait for that refresh and reuse
/// its result.
pub struct TokenCache {
    source: Box<dyn TokenSource>,
    refresh_margin: Duration,
    current: Mutex<Option<IssuedToken>>,
    issued: AtomicU64,
}

impl TokenCache {
    pub fn new(source: impl TokenSource + 'static, refresh_margin: Duration) -> Self {
        Self {
            source: Box::new(source),
            refresh_margin,
            current: Mutex::new(None),
            issued: AtomicU64::new(0),
        }
    }

    /// Seed the cache with an existing token.
    pub fn with_token(self, token: IssuedToken) -> Self {
        Self {
            current: Mutex::new(Some(token)),
            ..self
        }
    }

    /// A usable token, issuing a new one when the cached token is missing or
    /// within the refresh margin of expiry.
    pub async fn bearer(&self) -> Result<String, EngineError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref()
            && token.is_fresh(self.refresh_margin)
        {
            return Ok(token.token.clone());
        }
        let fresh = self.issue().await?;
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }

    /// Replace `rejected`, a token the server refused.
    ///
    /// If the cache already holds a different, fresh token, another caller
    /// has replaced the rejected one and that token is kept.
    pub async fn refresh_stale(&self, rejected: &str) -> Result<String, EngineError> {
        let mut current = self.current.lock().await;
        if let Some(token) = current.as_ref()
            && token.token != rejected
            && token.is_fresh(self.refresh_margin)
        {
            debug!(source = self.source.name(), "Token already refreshed by another caller");
            return Ok(token.token.clone());
        }
        let fresh = self.issue().await?;
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }

    /// Number of tokens issued through this cache.
    pub fn issue_count(&self) -> u64 {
        self.issued.load(Ordering::SeqCst)
    }

    async fn issue(&self) -> Result<IssuedToken, EngineError> {
        let token = self.source.issue().await?;
        self.issued.fetch_add(1, Ordering::SeqCst);
        info!(
            source = self.source.name(),
            expires_at = %token.expires_at,
            "Issued new access token"
        );
        Ok(token)
    }
}

// ============================================================================
// Token sources
// ============================================================================

/// Exchanges an API key pair for a token by running an external command.
///
/// Runs `<program> login --key-id <id> --key-secret <secret>` without a shell
/// and takes the last non-empty stdout line as the token.
pub struct CommandTokenIssuer {
    program: String,
    key_id: String,
    key_secret: String,
    lifetime: Duration,
}

impl CommandTokenIssuer {
    pub fn new(
        program: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let program = program.into();
        let key_id = key_id.into();
        let key_secret = key_secret.into();

        for (name, value) in [
            ("GAE_TOKEN_COMMAND", &program),
            ("ARANGO_GRAPH_API_KEY_ID", &key_id),
            ("ARANGO_GRAPH_API_KEY_SECRET", &key_secret),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: "must not be empty".to_string(),
                });
            }
            if value.contains(SHELL_METACHARACTERS) {
                return Err(ConfigError::InvalidValue {
                    name,
                    reason: "contains shell metacharacters".to_string(),
                });
            }
        }

        Ok(Self {
            program,
            key_id,
            key_secret,
            lifetime: DEFAULT_TOKEN_LIFETIME,
        })
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }
}

#[async_trait]
impl TokenSource for CommandTokenIssuer {
    fn name(&self) -> &'static str {
        "api-key"
    }

    async fn issue(&self) -> Result<IssuedToken, EngineError> {
        debug!(program = %self.program, "Running token command");
        let output = tokio::process::Command::new(&self.program)
            .args([
                "login",
                "--key-id",
                &self.key_id,
                "--key-secret",
                &self.key_secret,
            ])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    EngineError::Fatal(format!("token command '{}' not found", self.program))
                } else {
                    EngineError::Fatal(format!("failed to run token command: {}", e))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Auth(format!(
                "token command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .ok_or_else(|| EngineError::Fatal("token command printed no token".to_string()))?;

        Ok(IssuedToken::new(token, self.lifetime))
    }
}

/// Exchanges database credentials for a JWT.
pub struct JwtTokenSource {
    http: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl JwtTokenSource {
    /// `endpoint` is the database endpoint; the token is requested from `/_open/auth`.
    pub fn new(
        http: reqwest::Client,
        endpoint: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http,
            url: super::http::join(endpoint, "_open/auth"),
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl TokenSource for JwtTokenSource {
    fn name(&self) -> &'static str {
        "jwt"
    }

    async fn issue(&self) -> Result<IssuedToken, EngineError> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({"username": self.username, "password": self.password}))
            .send()
            .await?;
        let body = read_json(&self.url, response).await?;
        let jwt = body
            .get("jwt")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EngineError::Fatal("auth response carried no jwt".to_string()))?;

        Ok(match jwt_expiry(jwt) {
            Some(expires_at) => IssuedToken::with_expiry(jwt, Utc::now(), expires_at),
            None => IssuedToken::new(jwt, DEFAULT_TOKEN_LIFETIME),
        })
    }
}

/// Hands out a pre-generated token; it cannot mint a new one.
pub struct StaticTokenSource {
    token: String,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn issue(&self) -> Result<IssuedToken, EngineError> {
        Ok(IssuedToken::new(self.token.clone(), DEFAULT_TOKEN_LIFETIME))
    }
}

/// Expiry from the `exp` claim of a JWT, if it can be decoded.
fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_freshness() {
        let token = IssuedToken::new("t", Duration::from_secs(3600));
        assert!(token.is_fresh(Duration::from_secs(300)));
        assert!(!token.is_fresh(Duration::from_secs(7200)));

        let nearly_expired = IssuedToken::with_expiry(
            "t",
            Utc::now() - chrono::Duration::hours(24),
            Utc::now() + chrono::Duration::minutes(2),
        );
        assert!(!nearly_expired.is_fresh(Duration::from_secs(300)));
    }

    #[test]
    fn test_token_debug_is_masked() {
        let token = IssuedToken::new("super-secret", DEFAULT_TOKEN_LIFETIME);
        assert!(!format!("{:?}", token).contains("super-secret"));
    }

    #[test]
    fn test_command_issuer_rejects_metacharacters() {
        assert!(CommandTokenIssuer::new("oasisctl", "id", "secret").is_ok());
        assert!(matches!(
            CommandTokenIssuer::new("oasisctl", "id; rm -rf /", "secret"),
            Err(ConfigError::InvalidValue {
                name: "ARANGO_GRAPH_API_KEY_ID",
                ..
            })
        ));
        assert!(CommandTokenIssuer::new("oasisctl", "id", "$(whoami)").is_err());
        assert!(CommandTokenIssuer::new("oasisctl", "id", "").is_err());
    }

    #[test]
    fn test_jwt_expiry_decoding() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"exp":1900000000,"iss":"arangodb"}"#);
        let token = format!("eyJhbGciOiJIUzI1NiJ9.{}.signature", payload);
        assert_eq!(
            jwt_expiry(&token),
            DateTime::from_timestamp(1_900_000_000, 0)
        );
        assert_eq!(jwt_expiry("not-a-jwt"), None);
        assert_eq!(jwt_expiry("a.!!!.c"), None);
    }

    #[tokio::test]
    async fn test_command_issuer_missing_binary() {
        let issuer =
            CommandTokenIssuer::new("definitely-not-an-installed-binary", "id", "secret").unwrap();
        let err = issuer.issue().await.unwrap_err();
        assert!(matches!(err, EngineError::Fatal(msg) if msg.contains("not found")));
    }
}
