// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Authenticated JSON client shared by both connection variants.

use std::sync::{Arc, Mutex, PoisonError};

use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, warn};

use super::auth::TokenCache;
use crate::config::ConnectionOptions;
use crate::error::{ConfigError, EngineError};

/// Build the HTTP client for a connection.
pub(crate) fn build_client(options: &ConnectionOptions) -> Result<Client, ConfigError> {
    if !options.verify_tls {
        warn!("TLS certificate verification is disabled");
    }
    Client::builder()
        .timeout(options.request_timeout)
        .danger_accept_invalid_certs(!options.verify_tls)
        .build()
        .map_err(|e| ConfigError::HttpClient(e.to_string()))
}

/// Join a base URL and a relative path.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// JSON-over-HTTP client sending the cached bearer token with every request.
pub(crate) struct ApiClient {
    http: Client,
    tokens: Arc<TokenCache>,
    /// Last token the server refused.
    rejected: Mutex<Option<String>>,
}

impl ApiClient {
    pub(crate) fn new(http: Client, tokens: Arc<TokenCache>) -> Self {
        Self {
            http,
            tokens,
            rejected: Mutex::new(None),
        }
    }

    pub(crate) fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }

    /// Replace the last rejected token unless another caller already did.
    ///
    /// Without a recorded rejection this only makes sure a token is cached.
    pub(crate) async fn reauthenticate(&self) -> Result<(), EngineError> {
        let rejected = self
            .rejected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match rejected {
            Some(token) => self.tokens.refresh_stale(&token).await.map(|_| ()),
            None => self.tokens.bearer().await.map(|_| ()),
        }
    }

    pub(crate) async fn get(&self, url: &str) -> Result<Value, EngineError> {
        self.send(url, self.http.get(url)).await
    }

    pub(crate) async fn post(&self, url: &str, body: &Value) -> Result<Value, EngineError> {
        self.send(url, self.http.post(url).json(body)).await
    }

    pub(crate) async fn delete(&self, url: &str) -> Result<Value, EngineError> {
        self.send(url, self.http.delete(url)).await
    }

    async fn send(&self, url: &str, request: RequestBuilder) -> Result<Value, EngineError> {
        let token = self.tokens.bearer().await?;
        let response = request
            .header(AUTHORIZATION, format!("bearer {}", token))
            .send()
            .await?;
        let result = read_json(url, response).await;
        if let Err(e) = &result
            && e.is_auth()
        {
            *self.rejected.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
        }
        result
    }
}

/// Turn a response into JSON, classifying non-success statuses.
///
/// An empty body decodes as an empty object.
pub(crate) async fn read_json(
    url: &str,
    response: reqwest::Response,
) -> Result<Value, EngineError> {
    let status = response.status();
    let body = response.text().await?;
    debug!(url = %url, status = status.as_u16(), "Engine API response");

    if !status.is_success() {
        return Err(EngineError::from_status(status.as_u16(), body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(&body)
        .map_err(|e| EngineError::Fatal(format!("malformed response from {}: {}", url, e)))
}
