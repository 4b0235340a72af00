// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for connections and the orchestrator.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Default port of the managed graph-analytics management API.
pub const DEFAULT_GAE_PORT: u16 = 8829;

/// Default executable used to exchange API keys for a bearer token.
pub const DEFAULT_TOKEN_COMMAND: &str = "oasisctl";

// ============================================================================
// Deployment mode
// ============================================================================

/// Backend deployment model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeploymentMode {
    /// Managed platform API with API-key derived tokens.
    Managed,
    /// Engine colocated with the database, JWT authenticated.
    SelfManaged,
}

impl DeploymentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Managed => "amp",
            DeploymentMode::SelfManaged => "self_managed",
        }
    }

    /// Whether engine cost applies to this mode.
    pub fn is_billed(&self) -> bool {
        matches!(self, DeploymentMode::Managed)
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amp" | "managed" | "arangograph" => Ok(DeploymentMode::Managed),
            "self_managed" | "self-managed" | "genai" | "gen-ai" => Ok(DeploymentMode::SelfManaged),
            _ => Err(ConfigError::UnknownDeploymentMode(s.to_string())),
        }
    }
}

// ============================================================================
// Connection settings
// ============================================================================

/// Per-connection tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Timeout for a single HTTP request.
    pub request_timeout: Duration,
    /// Verify TLS certificates.
    pub verify_tls: bool,
    /// Tokens this close to expiry are re-issued before use.
    pub token_refresh_margin: Duration,
    /// How long a freshly deployed engine may take to report started.
    pub engine_ready_timeout: Duration,
    /// How long the engine API may take to answer after the engine started.
    pub api_ready_timeout: Duration,
    /// Interval between readiness probes.
    pub readiness_poll_interval: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(300),
            verify_tls: true,
            token_refresh_margin: Duration::from_secs(5 * 60),
            engine_ready_timeout: Duration::from_secs(60),
            api_ready_timeout: Duration::from_secs(30),
            readiness_poll_interval: Duration::from_secs(2),
        }
    }
}

impl ConnectionOptions {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    pub fn with_token_refresh_margin(mut self, margin: Duration) -> Self {
        self.token_refresh_margin = margin;
        self
    }

    pub fn with_engine_ready_timeout(mut self, timeout: Duration) -> Self {
        self.engine_ready_timeout = timeout;
        self
    }

    pub fn with_api_ready_timeout(mut self, timeout: Duration) -> Self {
        self.api_ready_timeout = timeout;
        self
    }

    pub fn with_readiness_poll_interval(mut self, interval: Duration) -> Self {
        self.readiness_poll_interval = interval;
        self
    }
}

/// Raw connection settings as read from the environment.
///
/// The deployment mode is kept as given; [`ConnectionFactory`](crate::ConnectionFactory)
/// interprets it and checks that the credentials the mode needs are present.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub deployment_mode: String,
    pub endpoint: Option<String>,
    pub username: String,
    pub password: Option<String>,
    pub database: Option<String>,
    pub api_key_id: Option<String>,
    pub api_key_secret: Option<String>,
    /// Pre-generated managed-platform token.
    pub token: Option<String>,
    pub gae_port: u16,
    pub token_command: String,
    pub options: ConnectionOptions,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            deployment_mode: DeploymentMode::Managed.as_str().to_string(),
            endpoint: None,
            username: "root".to_string(),
            password: None,
            database: None,
            api_key_id: None,
            api_key_secret: None,
            token: None,
            gae_port: DEFAULT_GAE_PORT,
            token_command: DEFAULT_TOKEN_COMMAND.to_string(),
            options: ConnectionOptions::default(),
        }
    }
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("deployment_mode", &self.deployment_mode)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("database", &self.database)
            .field("api_key_id", &self.api_key_id)
            .field("api_key_secret", &mask(&self.api_key_secret))
            .field("token", &mask(&self.token))
            .field("gae_port", &self.gae_port)
            .field("token_command", &self.token_command)
            .field("options", &self.options)
            .finish()
    }
}

fn mask(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "***")
}

impl ConnectionSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from environment variables.
    ///
    /// Environment variables:
    /// - `GAE_DEPLOYMENT_MODE`: `amp` (default) or `self_managed`, aliases accepted
    /// - `ARANGO_ENDPOINT`: database / platform endpoint URL
    /// - `ARANGO_USER`: database user (default: "root")
    /// - `ARANGO_PASSWORD`: database password
    /// - `ARANGO_DATABASE`: database name
    /// - `ARANGO_VERIFY_SSL`: verify TLS certificates (default: "true")
    /// - `ARANGO_TIMEOUT`: request timeout in seconds (default: 300)
    /// - `ARANGO_GRAPH_API_KEY_ID` / `ARANGO_GRAPH_API_KEY_SECRET`: managed API key pair
    /// - `ARANGO_GRAPH_TOKEN`: pre-generated managed token
    /// - `ARANGO_GAE_PORT`: management API port (default: 8829)
    /// - `GAE_TOKEN_COMMAND`: token issuing executable (default: "oasisctl")
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let verify_tls = match var("ARANGO_VERIFY_SSL") {
            Some(v) => parse_bool("ARANGO_VERIFY_SSL", &v)?,
            None => defaults.options.verify_tls,
        };
        let request_timeout = match var("ARANGO_TIMEOUT") {
            Some(v) => Duration::from_secs(parse_number("ARANGO_TIMEOUT", &v)?),
            None => defaults.options.request_timeout,
        };
        let gae_port = match var("ARANGO_GAE_PORT") {
            Some(v) => v.trim().parse().map_err(|e| ConfigError::InvalidValue {
                name: "ARANGO_GAE_PORT",
                reason: format!("{}", e),
            })?,
            None => DEFAULT_GAE_PORT,
        };

        Ok(Self {
            deployment_mode: var("GAE_DEPLOYMENT_MODE").unwrap_or(defaults.deployment_mode),
            endpoint: var("ARANGO_ENDPOINT").map(|e| e.trim().trim_end_matches('/').to_string()),
            username: var("ARANGO_USER").unwrap_or(defaults.username),
            password: lookup("ARANGO_PASSWORD").filter(|v| !v.is_empty()),
            database: var("ARANGO_DATABASE"),
            api_key_id: var("ARANGO_GRAPH_API_KEY_ID"),
            api_key_secret: var("ARANGO_GRAPH_API_KEY_SECRET"),
            token: var("ARANGO_GRAPH_TOKEN"),
            gae_port,
            token_command: var("GAE_TOKEN_COMMAND").unwrap_or(defaults.token_command),
            options: defaults
                .options
                .with_verify_tls(verify_tls)
                .with_request_timeout(request_timeout),
        })
    }

    pub fn with_deployment_mode(mut self, mode: impl Into<String>) -> Self {
        self.deployment_mode = mode.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = username.into();
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_api_key(mut self, id: impl Into<String>, secret: impl Into<String>) -> Self {
        self.api_key_id = Some(id.into());
        self.api_key_secret = Some(secret.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_gae_port(mut self, port: u16) -> Self {
        self.gae_port = port;
        self
    }

    pub fn with_token_command(mut self, command: impl Into<String>) -> Self {
        self.token_command = command.into();
        self
    }

    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Check the settings for common credential mistakes.
    ///
    /// Returns human-readable warnings; an empty list means nothing looked off.
    pub fn lint_credentials(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        match self.endpoint.as_deref() {
            None => warnings.push("ARANGO_ENDPOINT is not set".to_string()),
            Some(endpoint) => {
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    warnings.push(format!(
                        "endpoint '{}' should start with http:// or https://",
                        endpoint
                    ));
                }
                if !has_explicit_port(endpoint) {
                    warnings.push(format!(
                        "endpoint '{}' has no explicit port (e.g. :8529)",
                        endpoint
                    ));
                }
            }
        }

        if let Some(password) = &self.password {
            if password.trim() != password {
                warnings.push("password has leading or trailing whitespace".to_string());
            }
            let quoted = password.len() >= 2
                && ((password.starts_with('"') && password.ends_with('"'))
                    || (password.starts_with('\'') && password.ends_with('\'')));
            if quoted {
                warnings.push("password is wrapped in quotes".to_string());
            }
        }

        if self.database.is_none() {
            warnings.push("ARANGO_DATABASE is not set".to_string());
        }

        if !self.options.verify_tls {
            warnings.push("TLS certificate verification is disabled".to_string());
        }

        if let Ok(DeploymentMode::Managed) = self.deployment_mode.parse::<DeploymentMode>()
            && self.token.is_none()
            && (self.api_key_id.is_none() || self.api_key_secret.is_none())
        {
            warnings.push(
                "managed mode needs ARANGO_GRAPH_API_KEY_ID and ARANGO_GRAPH_API_KEY_SECRET"
                    .to_string(),
            );
        }

        warnings
    }
}

fn has_explicit_port(endpoint: &str) -> bool {
    let rest = endpoint
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(endpoint);
    let authority = rest.split('/').next().unwrap_or(rest);
    let host_port = authority
        .rsplit_once('@')
        .map(|(_, hp)| hp)
        .unwrap_or(authority);
    let port = match host_port.rfind(']') {
        // IPv6 literal
        Some(idx) => host_port[idx + 1..].strip_prefix(':'),
        None => host_port.rsplit_once(':').map(|(_, port)| port),
    };
    port.is_some_and(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            name,
            reason: format!("expected a boolean, got '{}'", other),
        }),
    }
}

fn parse_number(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|e| ConfigError::InvalidValue {
        name,
        reason: format!("{}", e),
    })
}

// ============================================================================
// Orchestrator configuration
// ============================================================================

/// What to do when engines are already running before deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExistingEnginePolicy {
    /// Log a warning and deploy anyway.
    #[default]
    Warn,
    /// Fail the job before deploying.
    Abort,
}

impl FromStr for ExistingEnginePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warn" => Ok(ExistingEnginePolicy::Warn),
            "abort" => Ok(ExistingEnginePolicy::Abort),
            other => Err(ConfigError::InvalidValue {
                name: "GAE_EXISTING_ENGINES",
                reason: format!("expected 'warn' or 'abort', got '{}'", other),
            }),
        }
    }
}

/// Orchestrator behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Per-stage retry policy.
    pub retry: RetryPolicy,
    /// First delay between job status polls.
    pub poll_interval: Duration,
    /// Upper bound for the poll delay.
    pub max_poll_interval: Duration,
    /// Growth factor applied to the poll delay after every poll.
    pub poll_backoff: f64,
    /// Deadline for jobs that do not set their own.
    pub default_job_timeout: Duration,
    /// Pre-deployment check for already running engines.
    pub existing_engines: ExistingEnginePolicy,
    /// Parallelism requested from the engine when writing results.
    pub store_parallelism: u32,
    /// Batch size requested from the engine when writing results.
    pub store_batch_size: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(2),
            max_poll_interval: Duration::from_secs(15),
            poll_backoff: 1.5,
            default_job_timeout: Duration::from_secs(3600),
            existing_engines: ExistingEnginePolicy::Warn,
            store_parallelism: 8,
            store_batch_size: 10_000,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from environment variables.
    ///
    /// Environment variables:
    /// - `GAE_POLL_INTERVAL_SECS`: first poll delay (default: 2)
    /// - `GAE_JOB_TIMEOUT_SECS`: default job deadline (default: 3600)
    /// - `GAE_MAX_ATTEMPTS`: attempts per stage operation (default: 5)
    /// - `GAE_EXISTING_ENGINES`: `warn` (default) or `abort`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(v) = var("GAE_POLL_INTERVAL_SECS") {
            config.poll_interval =
                Duration::from_secs(parse_number("GAE_POLL_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = var("GAE_JOB_TIMEOUT_SECS") {
            config.default_job_timeout =
                Duration::from_secs(parse_number("GAE_JOB_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = var("GAE_MAX_ATTEMPTS") {
            let attempts = parse_number("GAE_MAX_ATTEMPTS", &v)?;
            config.retry.max_attempts =
                u32::try_from(attempts).map_err(|_| ConfigError::InvalidValue {
                    name: "GAE_MAX_ATTEMPTS",
                    reason: "value too large".to_string(),
                })?;
        }
        if let Some(v) = var("GAE_EXISTING_ENGINES") {
            config.existing_engines = v.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        if self.max_poll_interval < interval {
            self.max_poll_interval = interval;
        }
        self
    }

    pub fn with_max_poll_interval(mut self, interval: Duration) -> Self {
        self.max_poll_interval = interval;
        self
    }

    pub fn with_poll_backoff(mut self, factor: f64) -> Self {
        self.poll_backoff = factor;
        self
    }

    pub fn with_default_job_timeout(mut self, timeout: Duration) -> Self {
        self.default_job_timeout = timeout;
        self
    }

    pub fn with_existing_engines(mut self, policy: ExistingEnginePolicy) -> Self {
        self.existing_engines = policy;
        self
    }

    pub fn with_store_parallelism(mut self, parallelism: u32) -> Self {
        self.store_parallelism = parallelism;
        self
    }

    pub fn with_store_batch_size(mut self, batch_size: u32) -> Self {
        self.store_batch_size = batch_size;
        self
    }

    /// Check every option once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "poll_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_poll_interval < self.poll_interval {
            return Err(ConfigError::InvalidValue {
                name: "max_poll_interval",
                reason: "must not be shorter than poll_interval".to_string(),
            });
        }
        if !(self.poll_backoff >= 1.0 && self.poll_backoff.is_finite()) {
            return Err(ConfigError::InvalidValue {
                name: "poll_backoff",
                reason: format!("must be a finite number >= 1.0, got {}", self.poll_backoff),
            });
        }
        if self.default_job_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                name: "default_job_timeout",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.store_parallelism == 0 || self.store_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "store_parallelism/store_batch_size",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_deployment_mode_aliases() {
        for alias in ["amp", "managed", "ArangoGraph"] {
            assert_eq!(alias.parse::<DeploymentMode>().unwrap(), DeploymentMode::Managed);
        }
        for alias in ["self_managed", "self-managed", "genai", "GEN-AI"] {
            assert_eq!(
                alias.parse::<DeploymentMode>().unwrap(),
                DeploymentMode::SelfManaged
            );
        }
        assert_eq!(
            "cloud".parse::<DeploymentMode>(),
            Err(ConfigError::UnknownDeploymentMode("cloud".to_string()))
        );
    }

    #[test]
    fn test_settings_defaults() {
        let settings = ConnectionSettings::from_vars(vars(&[])).unwrap();
        assert_eq!(settings.deployment_mode, "amp");
        assert_eq!(settings.username, "root");
        assert_eq!(settings.gae_port, 8829);
        assert_eq!(settings.token_command, "oasisctl");
        assert!(settings.options.verify_tls);
        assert_eq!(settings.options.request_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_settings_from_vars() {
        let settings = ConnectionSettings::from_vars(vars(&[
            ("GAE_DEPLOYMENT_MODE", "self_managed"),
            ("ARANGO_ENDPOINT", "https://db.example.com:8529/"),
            ("ARANGO_USER", "analyst"),
            ("ARANGO_PASSWORD", "s3cret"),
            ("ARANGO_DATABASE", "sales"),
            ("ARANGO_VERIFY_SSL", "false"),
            ("ARANGO_TIMEOUT", "60"),
            ("ARANGO_GAE_PORT", "9000"),
        ]))
        .unwrap();
        assert_eq!(settings.deployment_mode, "self_managed");
        assert_eq!(settings.endpoint.as_deref(), Some("https://db.example.com:8529"));
        assert_eq!(settings.username, "analyst");
        assert_eq!(settings.database.as_deref(), Some("sales"));
        assert!(!settings.options.verify_tls);
        assert_eq!(settings.options.request_timeout, Duration::from_secs(60));
        assert_eq!(settings.gae_port, 9000);
    }

    #[test]
    fn test_settings_invalid_values() {
        assert!(matches!(
            ConnectionSettings::from_vars(vars(&[("ARANGO_VERIFY_SSL", "maybe")])),
            Err(ConfigError::InvalidValue {
                name: "ARANGO_VERIFY_SSL",
                ..
            })
        ));
        assert!(matches!(
            ConnectionSettings::from_vars(vars(&[("ARANGO_GAE_PORT", "99999")])),
            Err(ConfigError::InvalidValue {
                name: "ARANGO_GAE_PORT",
                ..
            })
        ));
    }

    #[test]
    fn test_debug_masks_secrets() {
        let settings = ConnectionSettings::new()
            .with_credentials("root", "hunter2")
            .with_api_key("key-id", "key-secret")
            .with_token("tok-abc");
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("key-secret"));
        assert!(!debug.contains("tok-abc"));
        assert!(debug.contains("key-id"));
    }

    #[test]
    fn test_lint_credentials() {
        let clean = ConnectionSettings::new()
            .with_endpoint("https://db.example.com:8529")
            .with_credentials("root", "pw")
            .with_database("sales")
            .with_api_key("id", "secret");
        assert!(clean.lint_credentials().is_empty());

        let messy = ConnectionSettings::new()
            .with_endpoint("db.example.com")
            .with_credentials("root", "\"pw\" ");
        let warnings = messy.lint_credentials();
        assert!(warnings.iter().any(|w| w.contains("http://")));
        assert!(warnings.iter().any(|w| w.contains("explicit port")));
        assert!(warnings.iter().any(|w| w.contains("whitespace")));
        assert!(warnings.iter().any(|w| w.contains("ARANGO_DATABASE")));
    }

    #[test]
    fn test_explicit_port_detection() {
        assert!(has_explicit_port("https://host:8529"));
        assert!(has_explicit_port("http://user@host:80/path"));
        assert!(has_explicit_port("http://[::1]:8529"));
        assert!(!has_explicit_port("https://host"));
        assert!(!has_explicit_port("http://[::1]"));
        assert!(!has_explicit_port("https://host/api:8529"));
    }

    #[test]
    fn test_orchestrator_defaults_are_valid() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.default_job_timeout, Duration::from_secs(3600));
        assert_eq!(config.existing_engines, ExistingEnginePolicy::Warn);
        assert_eq!(config.store_parallelism, 8);
        assert_eq!(config.store_batch_size, 10_000);
    }

    #[test]
    fn test_orchestrator_validation() {
        assert!(
            OrchestratorConfig::default()
                .with_poll_interval(Duration::ZERO)
                .validate()
                .is_err()
        );
        assert!(
            OrchestratorConfig::default()
                .with_poll_backoff(0.5)
                .validate()
                .is_err()
        );
        assert!(
            OrchestratorConfig::default()
                .with_store_batch_size(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_orchestrator_from_vars() {
        let config = OrchestratorConfig::from_vars(vars(&[
            ("GAE_POLL_INTERVAL_SECS", "5"),
            ("GAE_MAX_ATTEMPTS", "3"),
            ("GAE_EXISTING_ENGINES", "abort"),
        ]))
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.existing_engines, ExistingEnginePolicy::Abort);
    }
}
