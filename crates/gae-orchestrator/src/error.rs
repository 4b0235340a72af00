// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for gae-orchestrator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AnalysisStatus;

/// Result type for pre-flight operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced before any network call is made.
///
/// Everything that happens after pre-flight is reported through
/// [`AnalysisResult`](crate::AnalysisResult) instead of being raised.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection or orchestrator configuration is unusable.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The analysis configuration was rejected.
    #[error("validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Error kind reported in a failed result.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// A value could not be parsed or is out of range.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    /// The deployment-mode discriminant is not recognized.
    #[error("unknown deployment mode '{0}' (expected 'amp' or 'self_managed')")]
    UnknownDeploymentMode(String),

    /// A credential required by the selected deployment mode is absent.
    #[error("{mode} deployment requires {credential}")]
    MissingCredential {
        mode: &'static str,
        credential: &'static str,
    },

    /// The HTTP client could not be built from the connection options.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Errors returned by engine network operations.
///
/// The variants are the classification used by the retry policy; the
/// payload is a human-readable description of the underlying cause.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Credentials were rejected or the token expired.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A referenced engine, graph, job or collection does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was rejected as invalid.
    #[error("validation error: {0}")]
    Validation(String),

    /// Timeouts, 5xx responses, connection resets.
    #[error("transient error: {0}")]
    Transient(String),

    /// Any other unexpected failure.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// The caller-supplied deadline expired.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

impl EngineError {
    /// Build an error from a non-success HTTP status.
    ///
    /// Classification:
    /// - 401, 403 → Auth
    /// - 404 → NotFound
    /// - 400, 409, 422 → Validation
    /// - 408, 429, 5xx → Transient
    /// - other 4xx and anything else → Fatal
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let message = if body.trim().is_empty() {
            format!("HTTP request failed with status {}", status)
        } else {
            format!("HTTP {} error: {}", status, truncate(&body, 300))
        };

        match status {
            401 | 403 => EngineError::Auth(message),
            404 => EngineError::NotFound(message),
            400 | 409 | 422 => EngineError::Validation(message),
            408 | 429 => EngineError::Transient(message),
            500..=599 => EngineError::Transient(message),
            _ => EngineError::Fatal(message),
        }
    }

    /// Kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Auth(_) => ErrorKind::Auth,
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Validation(_) => ErrorKind::Validation,
            EngineError::Transient(_) => ErrorKind::Transient,
            EngineError::Fatal(_) => ErrorKind::Fatal,
            EngineError::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
        }
    }

    /// Whether this is an authentication failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, EngineError::Auth(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return EngineError::from_status(status.as_u16(), err.to_string());
        }
        if err.is_decode() {
            return EngineError::Fatal(format!("malformed response: {}", err));
        }
        if err.is_builder() {
            return EngineError::Fatal(format!("invalid request: {}", err));
        }
        // Timeouts, connect failures, resets while reading the body.
        EngineError::Transient(err.to_string())
    }
}

/// Serializable error category carried by failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Auth,
    NotFound,
    Transient,
    Fatal,
    DeadlineExceeded,
    /// The job task itself crashed.
    Internal,
}

/// Terminal failure of one lifecycle stage.
#[derive(Debug, Clone, Error)]
#[error("{stage} failed after {attempts} attempt(s): {source}")]
pub struct StageError {
    /// Stage that failed.
    pub stage: AnalysisStatus,
    /// Number of attempts made for the failing operation.
    pub attempts: u32,
    /// Last observed error.
    #[source]
    pub source: EngineError,
}

impl StageError {
    pub fn new(stage: AnalysisStatus, attempts: u32, source: EngineError) -> Self {
        Self {
            stage,
            attempts,
            source,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
