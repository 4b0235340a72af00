// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection to the managed graph-analytics platform.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::auth::{CommandTokenIssuer, IssuedToken, StaticTokenSource, TokenCache};
use super::http::{ApiClient, build_client, join};
use super::{EngineConnection, TeardownLedger, engine_api};
use crate::config::{ConnectionOptions, ConnectionSettings, DeploymentMode};
use crate::error::{ConfigError, EngineError};
use crate::types::{
    Algorithm, EngineHandle, EngineSize, EngineSummary, GraphInfo, JobStatus, JobToken,
    LoadRequest, LoadedGraph, StoreRequest,
};

const MANAGEMENT_PATH: &str = "graph-analytics/api/graphanalytics/v1";

/// Engines deployed through the managed platform's management API.
///
/// Tokens come from an API key pair (see [`CommandTokenIssuer`]) or a
/// pre-generated token, and engine size is honored.
pub struct ManagedConnection {
    api: ApiClient,
    management_url: String,
    database: String,
    options: ConnectionOptions,
    ledger: TeardownLedger,
}

impl ManagedConnection {
    pub fn new(
        management_url: impl Into<String>,
        database: impl Into<String>,
        tokens: Arc<TokenCache>,
        options: ConnectionOptions,
    ) -> Result<Self, ConfigError> {
        let http = build_client(&options)?;
        Ok(Self {
            api: ApiClient::new(http, tokens),
            management_url: management_url.into(),
            database: database.into(),
            options,
            ledger: TeardownLedger::default(),
        })
    }

    /// Build a connection from settings, checking the managed credentials.
    ///
    /// Needs an endpoint, a database, and either an API key pair or a
    /// pre-generated token.
    pub fn from_settings(settings: &ConnectionSettings) -> Result<Self, ConfigError> {
        const MODE: &str = "amp";
        let endpoint = settings
            .endpoint
            .as_deref()
            .ok_or(ConfigError::MissingCredential {
                mode: MODE,
                credential: "ARANGO_ENDPOINT",
            })?;
        let database = settings
            .database
            .as_deref()
            .ok_or(ConfigError::MissingCredential {
                mode: MODE,
                credential: "ARANGO_DATABASE",
            })?;

        let margin = settings.options.token_refresh_margin;
        let tokens = match (&settings.api_key_id, &settings.api_key_secret) {
            (Some(id), Some(secret)) => {
                let issuer = CommandTokenIssuer::new(&settings.token_command, id, secret)?;
                let cache = TokenCache::new(issuer, margin);
                match &settings.token {
                    Some(token) => cache.with_token(IssuedToken::new(
                        token,
                        super::auth::DEFAULT_TOKEN_LIFETIME,
                    )),
                    None => cache,
                }
            }
            _ => match &settings.token {
                Some(token) => TokenCache::new(StaticTokenSource::new(token), margin),
                None => {
                    return Err(ConfigError::MissingCredential {
                        mode: MODE,
                        credential: "ARANGO_GRAPH_API_KEY_ID and ARANGO_GRAPH_API_KEY_SECRET",
                    });
                }
            },
        };

        Self::new(
            Self::management_url(endpoint, settings.gae_port),
            database,
            Arc::new(tokens),
            settings.options.clone(),
        )
    }

    /// Management API base URL for a platform endpoint: the endpoint's host
    /// with `port` instead of its own port.
    pub fn management_url(endpoint: &str, port: u16) -> String {
        let (scheme, rest) = endpoint.split_once("://").unwrap_or(("https", endpoint));
        let authority = rest.split('/').next().unwrap_or(rest);
        let host = match authority.rfind(']') {
            Some(idx) => &authority[..=idx],
            None => authority.split(':').next().unwrap_or(authority),
        };
        format!("{}://{}:{}/{}", scheme, host, port, MANAGEMENT_PATH)
    }

    /// Token cache shared by every job using this connection.
    pub fn tokens(&self) -> &Arc<TokenCache> {
        self.api.tokens()
    }

    fn url(&self, path: &str) -> String {
        join(&self.management_url, path)
    }

    /// Poll the engine until it reports started, returning its endpoint.
    async fn wait_until_started(&self, id: &str) -> Result<String, EngineError> {
        let url = self.url(&format!("engines/{}", id));
        let deadline = Instant::now() + self.options.engine_ready_timeout;
        loop {
            match self.api.get(&url).await {
                Ok(engine) => {
                    let status = engine.get("status").unwrap_or(&Value::Null);
                    let flag =
                        |key: &str| status.get(key).and_then(Value::as_bool).unwrap_or(false);
                    if flag("failed") {
                        let message = status
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("no details");
                        return Err(EngineError::Fatal(format!(
                            "engine {} failed to start: {}",
                            id, message
                        )));
                    }
                    if flag("is_started")
                        && flag("succeeded")
                        && let Some(endpoint) = status
                            .get("endpoint")
                            .and_then(Value::as_str)
                            .filter(|e| !e.is_empty())
                    {
                        return Ok(endpoint.trim_end_matches('/').to_string());
                    }
                    debug!(engine_id = %id, "Engine not started yet");
                }
                Err(e @ EngineError::Transient(_)) => {
                    debug!(engine_id = %id, error = %e, "Engine status unavailable")
                }
                Err(e) => return Err(e),
            }
            if Instant::now() + self.options.readiness_poll_interval > deadline {
                return Err(EngineError::Transient(format!(
                    "engine {} did not start within {:?}",
                    id, self.options.engine_ready_timeout
                )));
            }
            tokio::time::sleep(self.options.readiness_poll_interval).await;
        }
    }
}

fn summarize(engine: &Value) -> Option<EngineSummary> {
    let id = match engine.get("id")? {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    let size = engine
        .get("size_id")
        .and_then(Value::as_str)
        .map(str::to_string);
    let status = match engine.get("status") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(status) if status.get("is_started").and_then(Value::as_bool) == Some(true) => {
            Some("started".to_string())
        }
        Some(Value::Object(_)) => Some("starting".to_string()),
        _ => None,
    };
    Some(EngineSummary { id, size, status })
}

#[async_trait]
impl EngineConnection for ManagedConnection {
    fn deployment_mode(&self) -> DeploymentMode {
        DeploymentMode::Managed
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn authenticate(&self) -> Result<(), EngineError> {
        self.api.tokens().bearer().await.map(|_| ())
    }

    async fn reauthenticate(&self) -> Result<(), EngineError> {
        self.api.reauthenticate().await
    }

    async fn existing_engines(&self) -> Result<Vec<EngineSummary>, EngineError> {
        let response = self.api.get(&self.url("engines")).await?;
        Ok(response
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(summarize).collect())
            .unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn create_engine(
        &self,
        size: EngineSize,
        engine_type: &str,
    ) -> Result<EngineHandle, EngineError> {
        info!("Deploying managed engine");
        let response = self
            .api
            .post(
                &self.url("engines"),
                &json!({"type_id": engine_type, "size_id": size.as_str()}),
            )
            .await?;
        let id = match response.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                return Err(EngineError::Fatal(format!(
                    "deploy response carried no engine id: {}",
                    response
                )));
            }
        };
        info!(engine_id = %id, "Engine created");
        Ok(EngineHandle::new(id, "").with_size(size))
    }

    #[instrument(skip(self, handle), fields(engine_id = %handle.id))]
    async fn await_ready(&self, handle: &EngineHandle) -> Result<EngineHandle, EngineError> {
        let endpoint = self.wait_until_started(&handle.id).await?;
        let handle = EngineHandle {
            endpoint,
            ..handle.clone()
        };

        engine_api::wait_until_api_ready(
            &self.api,
            &handle,
            self.options.api_ready_timeout,
            self.options.readiness_poll_interval,
        )
        .await?;

        info!(endpoint = %handle.endpoint, "Engine ready");
        Ok(handle)
    }

    async fn load(
        &self,
        handle: &EngineHandle,
        request: &LoadRequest,
    ) -> Result<LoadedGraph, EngineError> {
        engine_api::load(&self.api, handle, request).await
    }

    async fn graph_info(
        &self,
        handle: &EngineHandle,
        graph_id: &str,
    ) -> Result<GraphInfo, EngineError> {
        engine_api::graph_info(&self.api, handle, graph_id).await
    }

    async fn run(
        &self,
        handle: &EngineHandle,
        graph_id: &str,
        algorithm: Algorithm,
        params: &serde_json::Map<String, Value>,
    ) -> Result<JobToken, EngineError> {
        engine_api::run(&self.api, handle, graph_id, algorithm, params).await
    }

    async fn fetch_status(
        &self,
        handle: &EngineHandle,
        job: &JobToken,
    ) -> Result<JobStatus, EngineError> {
        engine_api::fetch_status(&self.api, handle, job).await
    }

    async fn store_results(
        &self,
        handle: &EngineHandle,
        request: &StoreRequest,
    ) -> Result<JobToken, EngineError> {
        engine_api::store_results(&self.api, handle, request).await
    }

    #[instrument(skip(self, handle), fields(engine_id = %handle.id))]
    async fn teardown(&self, handle: &EngineHandle) -> Result<(), EngineError> {
        if self.ledger.is_deleted(&handle.id) {
            debug!("Engine already deleted");
            return Ok(());
        }
        match self
            .api
            .delete(&self.url(&format!("engines/{}", handle.id)))
            .await
        {
            Ok(_) => info!("Engine deleted"),
            Err(EngineError::NotFound(_)) => info!("Engine was already gone"),
            Err(e) => return Err(e),
        }
        self.ledger.mark_deleted(&handle.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_management_url() {
        assert_eq!(
            ManagedConnection::management_url("https://abc.arangodb.cloud:8529", 8829),
            "https://abc.arangodb.cloud:8829/graph-analytics/api/graphanalytics/v1"
        );
        assert_eq!(
            ManagedConnection::management_url("https://abc.arangodb.cloud", 9000),
            "https://abc.arangodb.cloud:9000/graph-analytics/api/graphanalytics/v1"
        );
        assert_eq!(
            ManagedConnection::management_url("http://[::1]:8529/_db/x", 8829),
            "http://[::1]:8829/graph-analytics/api/graphanalytics/v1"
        );
    }

    #[test]
    fn test_summarize_engine() {
        let summary = summarize(&json!({
            "id": "e-1",
            "size_id": "e16",
            "status": {"is_started": true}
        }))
        .unwrap();
        assert_eq!(summary.id, "e-1");
        assert_eq!(summary.size.as_deref(), Some("e16"));
        assert_eq!(summary.status.as_deref(), Some("started"));
        assert!(summarize(&json!({"name": "no id"})).is_none());
    }

    #[test]
    fn test_from_settings_requires_credentials() {
        let base = ConnectionSettings::new()
            .with_endpoint("https://db.example.com:8529")
            .with_database("sales");

        assert!(matches!(
            ManagedConnection::from_settings(&base),
            Err(ConfigError::MissingCredential { mode: "amp", .. })
        ));
        assert!(
            ManagedConnection::from_settings(&base.clone().with_api_key("id", "secret")).is_ok()
        );
        assert!(ManagedConnection::from_settings(&base.clone().with_token("tok")).is_ok());
        assert!(matches!(
            ManagedConnection::from_settings(&base.with_api_key("id", "x|y")),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
