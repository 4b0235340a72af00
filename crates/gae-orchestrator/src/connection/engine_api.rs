// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine API calls common to both deployment models.
//!
//! Paths are relative to [`EngineHandle::endpoint`].

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::http::{ApiClient, join};
use crate::error::EngineError;
use crate::types::{
    Algorithm, EngineHandle, GraphInfo, JobStatus, JobToken, LoadRequest, LoadedGraph,
    StoreRequest, job_id_of,
};

fn engine_url(handle: &EngineHandle, path: &str) -> Result<String, EngineError> {
    if handle.endpoint.is_empty() {
        return Err(EngineError::Fatal(format!(
            "engine {} has no known endpoint",
            handle.id
        )));
    }
    Ok(join(&handle.endpoint, path))
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value)
        .map_err(|e| EngineError::Fatal(format!("failed to encode request: {}", e)))
}

fn require_job_id(response: &Value, operation: &str) -> Result<JobToken, EngineError> {
    job_id_of(response).map(JobToken).ok_or_else(|| {
        EngineError::Fatal(format!("{} response carried no job id: {}", operation, response))
    })
}

pub(crate) async fn load(
    api: &ApiClient,
    handle: &EngineHandle,
    request: &LoadRequest,
) -> Result<LoadedGraph, EngineError> {
    let response = api
        .post(&engine_url(handle, "v1/loaddata")?, &to_body(request)?)
        .await?;
    let job = require_job_id(&response, "loaddata")?;
    let graph_id = match response.get("graph_id") {
        Some(Value::String(id)) if !id.is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => job.0.clone(),
    };
    Ok(LoadedGraph { job, graph_id })
}

pub(crate) async fn graph_info(
    api: &ApiClient,
    handle: &EngineHandle,
    graph_id: &str,
) -> Result<GraphInfo, EngineError> {
    let response = api
        .get(&engine_url(handle, &format!("v1/graphs/{}", graph_id))?)
        .await?;
    let graph = response.get("graph").unwrap_or(&response);
    let count = |key: &str| graph.get(key).and_then(Value::as_u64).unwrap_or(0);
    Ok(GraphInfo {
        vertex_count: count("vertex_count"),
        edge_count: count("edge_count"),
    })
}

pub(crate) async fn run(
    api: &ApiClient,
    handle: &EngineHandle,
    graph_id: &str,
    algorithm: Algorithm,
    params: &serde_json::Map<String, Value>,
) -> Result<JobToken, EngineError> {
    let mut body = params.clone();
    body.insert("graph_id".to_string(), Value::from(graph_id));
    let response = api
        .post(&engine_url(handle, algorithm.endpoint())?, &Value::Object(body))
        .await?;
    require_job_id(&response, algorithm.as_str())
}

pub(crate) async fn fetch_status(
    api: &ApiClient,
    handle: &EngineHandle,
    job: &JobToken,
) -> Result<JobStatus, EngineError> {
    let response = api
        .get(&engine_url(handle, &format!("v1/jobs/{}", job))?)
        .await?;
    Ok(JobStatus::from_response(&response))
}

pub(crate) async fn store_results(
    api: &ApiClient,
    handle: &EngineHandle,
    request: &StoreRequest,
) -> Result<JobToken, EngineError> {
    let response = api
        .post(&engine_url(handle, "v1/storeresults")?, &to_body(request)?)
        .await?;
    require_job_id(&response, "storeresults")
}

/// Poll `v1/version` until the engine API answers.
pub(crate) async fn wait_until_api_ready(
    api: &ApiClient,
    handle: &EngineHandle,
    timeout: Duration,
    interval: Duration,
) -> Result<(), EngineError> {
    let url = engine_url(handle, "v1/version")?;
    let deadline = Instant::now() + timeout;
    loop {
        match api.get(&url).await {
            Ok(version) => {
                debug!(engine_id = %handle.id, version = %version, "Engine API is ready");
                return Ok(());
            }
            // A missing route means the engine is still coming up.
            Err(e @ (EngineError::NotFound(_) | EngineError::Transient(_))) => {
                debug!(engine_id = %handle.id, error = %e, "Engine API not ready yet")
            }
            Err(e) => return Err(e),
        }
        if Instant::now() + interval > deadline {
            return Err(EngineError::Transient(format!(
                "engine {} API did not become ready within {:?}",
                handle.id, timeout
            )));
        }
        tokio::time::sleep(interval).await;
    }
}
