// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection to an engine colocated with the database.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use super::auth::{JwtTokenSource, TokenCache};
use super::http::{ApiClient, build_client, join};
use super::{EngineConnection, TeardownLedger, engine_api};
use crate::config::{ConnectionOptions, ConnectionSettings, DeploymentMode};
use crate::error::{ConfigError, EngineError};
use crate::types::{
    Algorithm, EngineHandle, EngineSize, EngineSummary, GraphInfo, JobStatus, JobToken,
    LoadRequest, LoadedGraph, StoreRequest,
};

/// Engines started through the database's service API.
///
/// Authenticates with the database credentials; engine sizing is fixed by
/// the platform.
pub struct SelfManagedConnection {
    api: ApiClient,
    endpoint: String,
    database: String,
    options: ConnectionOptions,
    ledger: TeardownLedger,
}

impl SelfManagedConnection {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        tokens: Arc<TokenCache>,
        options: ConnectionOptions,
    ) -> Result<Self, ConfigError> {
        let http = build_client(&options)?;
        let endpoint: String = endpoint.into();
        Ok(Self {
            api: ApiClient::new(http, tokens),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            database: database.into(),
            options,
            ledger: TeardownLedger::default(),
        })
    }

    /// Connection authenticating with a JWT issued for `username`/`password`.
    pub fn from_credentials(
        endpoint: &str,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        options: ConnectionOptions,
    ) -> Result<Self, ConfigError> {
        let source = JwtTokenSource::new(build_client(&options)?, endpoint, username, password);
        let tokens = Arc::new(TokenCache::new(source, options.token_refresh_margin));
        Self::new(endpoint, database, tokens, options)
    }

    /// Build a connection from settings. Needs an endpoint, a password and a database.
    pub fn from_settings(settings: &ConnectionSettings) -> Result<Self, ConfigError> {
        const MODE: &str = "self_managed";
        let endpoint = settings
            .endpoint
            .as_deref()
            .ok_or(ConfigError::MissingCredential {
                mode: MODE,
                credential: "ARANGO_ENDPOINT",
            })?;
        let password = settings
            .password
            .as_deref()
            .ok_or(ConfigError::MissingCredential {
                mode: MODE,
                credential: "ARANGO_PASSWORD",
            })?;
        let database = settings
            .database
            .as_deref()
            .ok_or(ConfigError::MissingCredential {
                mode: MODE,
                credential: "ARANGO_DATABASE",
            })?;

        Self::from_credentials(
            endpoint,
            database,
            settings.username.as_str(),
            password,
            settings.options.clone(),
        )
    }

    /// Token cache shared by every job using this connection.
    pub fn tokens(&self) -> &Arc<TokenCache> {
        self.api.tokens()
    }

    fn url(&self, path: &str) -> String {
        join(&self.endpoint, path)
    }
}

fn service_id_of(response: &Value) -> Option<String> {
    response
        .pointer("/serviceInfo/serviceId")
        .or_else(|| response.get("serviceId"))
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Engine path segment: the part of the service id after its last `-`.
fn short_id(service_id: &str) -> &str {
    service_id.rsplit('-').next().unwrap_or(service_id)
}

#[async_trait]
impl EngineConnection for SelfManagedConnection {
    fn deployment_mode(&self) -> DeploymentMode {
        DeploymentMode::SelfManaged
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
        let response = self
            .api
            .post(&self.url("gen-ai/v1/list_services"), &json!({}))
            .await?;
        let services = response
            .get("services")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(services
            .iter()
            .filter(|service| {
                service.get("status").and_then(Value::as_str) == Some("DEPLOYED")
            })
            .filter(|service| {
                service.get("type").and_then(Value::as_str) == Some("gral")
                    || service_id_of(service).is_some_and(|id| id.contains("gral"))
            })
            .filter_map(|service| {
                Some(EngineSummary {
                    id: service_id_of(service)?,
                    size: None,
                    status: Some("DEPLOYED".to_string()),
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn create_engine(
        &self,
        size: EngineSize,
        _engine_type: &str,
    ) -> Result<EngineHandle, EngineError> {
        info!(
            requested_size = %size,
            "Engine size is fixed on self-managed deployments; ignoring requested size"
        );
        let response = self
            .api
            .post(&self.url("gen-ai/v1/graphanalytics"), &json!({}))
            .await?;
        let service_id = service_id_of(&response).ok_or_else(|| {
            EngineError::Fatal(format!(
                "deploy response carried no service id: {}",
                response
            ))
        })?;

        let handle = EngineHandle::new(
            service_id.as_str(),
            self.url(&format!("gral/{}", short_id(&service_id))),
        );
        info!(engine_id = %handle.id, endpoint = %handle.endpoint, "Engine service started");
        Ok(handle)
    }

    #[instrument(skip(self, handle), fields(engine_id = %handle.id))]
    async fn await_ready(&self, handle: &EngineHandle) -> Result<EngineHandle, EngineError> {
        engine_api::wait_until_api_ready(
            &self.api,
            handle,
            self.options.api_ready_timeout,
            self.options.readiness_poll_interval,
        )
        .await?;

        info!("Engine ready");
        Ok(handle.clone())
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
            debug!("Engine already stopped");
            return Ok(());
        }
        match self
            .api
            .delete(&self.url(&format!("gen-ai/v1/service/{}", handle.id)))
            .await
        {
            Ok(_) => info!("Engine service stopped"),
            Err(EngineError::NotFound(_)) => info!("Engine service was already gone"),
            Err(e) => return Err(e),
        }
        self.ledger.mark_deleted(&handle.id);
        Ok(())
    }
}
