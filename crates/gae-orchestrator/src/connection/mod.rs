// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine connections.
//!
//! Defines the capability set every backend offers and its two
//! implementations, plus a scriptable mock for tests.

mod auth;
mod engine_api;
mod http;
mod managed;
mod mock;
mod self_managed;

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::config::DeploymentMode;
use crate::error::EngineError;
use crate::types::{
    Algorithm, EngineHandle, EngineSize, EngineSummary, GraphInfo, JobStatus, JobToken,
    LoadRequest, LoadedGraph, StoreRequest,
};

pub use auth::{
    CommandTokenIssuer, IssuedToken, JwtTokenSource, StaticTokenSource, TokenCache, TokenSource,
};
pub use managed::ManagedConnection;
pub use mock::{MockConnection, MockJob, Operation};
pub use self_managed::SelfManagedConnection;

/// A failed deployment.
///
/// When the backend created an engine before failing (for example it never
/// became ready), `partial` carries its handle so the caller can tear it down.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct DeployError {
    pub error: EngineError,
    pub partial: Option<EngineHandle>,
}

impl DeployError {
    pub fn partial(error: EngineError, handle: EngineHandle) -> Self {
        Self {
            error,
            partial: Some(handle),
        }
    }
}

impl From<EngineError> for DeployError {
    fn from(error: EngineError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

/// Lifecycle operations against one graph-analytics backend.
///
/// Implementations are shared across concurrent jobs; the only state they
/// may share between jobs is the authentication token cache.
#[async_trait]
pub trait EngineConnection: Send + Sync {
    /// Deployment model of this backend.
    fn deployment_mode(&self) -> DeploymentMode;

    /// Database the engine reads from and writes results to.
    fn database(&self) -> &str;

    /// Make sure a valid token is cached.
    async fn authenticate(&self) -> Result<(), EngineError>;

    /// Replace the token a call was just refused with.
    ///
    /// Concurrent callers coalesce: once one of them has replaced the
    /// rejected token, the others reuse the new one.
    async fn reauthenticate(&self) -> Result<(), EngineError>;

    /// Engines already running for this identity.
    async fn existing_engines(&self) -> Result<Vec<EngineSummary>, EngineError>;

    /// Ask the backend for a new engine.
    ///
    /// Returns as soon as the backend has assigned the engine an id. The
    /// handle may not carry an endpoint yet; the engine must be torn down
    /// from here on even if it never becomes ready.
    async fn create_engine(
        &self,
        size: EngineSize,
        engine_type: &str,
    ) -> Result<EngineHandle, EngineError>;

    /// Wait until a created engine has started and its API answers.
    ///
    /// Returns the handle with its endpoint filled in.
    async fn await_ready(&self, handle: &EngineHandle) -> Result<EngineHandle, EngineError>;

    /// Start an engine and wait until its API answers.
    async fn deploy(
        &self,
        size: EngineSize,
        engine_type: &str,
    ) -> Result<EngineHandle, DeployError> {
        let handle = self.create_engine(size, engine_type).await?;
        self.await_ready(&handle)
            .await
            .map_err(|e| DeployError::partial(e, handle))
    }

    /// Submit a graph load. Completion is observed through [`fetch_status`](Self::fetch_status).
    async fn load(
        &self,
        handle: &EngineHandle,
        request: &LoadRequest,
    ) -> Result<LoadedGraph, EngineError>;

    /// Vertex and edge counts of a loaded graph.
    async fn graph_info(
        &self,
        handle: &EngineHandle,
        graph_id: &str,
    ) -> Result<GraphInfo, EngineError>;

    /// Start an algorithm on a loaded graph.
    async fn run(
        &self,
        handle: &EngineHandle,
        graph_id: &str,
        algorithm: Algorithm,
        params: &serde_json::Map<String, Value>,
    ) -> Result<JobToken, EngineError>;

    /// Current state of an engine job.
    async fn fetch_status(
        &self,
        handle: &EngineHandle,
        job: &JobToken,
    ) -> Result<JobStatus, EngineError>;

    /// Submit a result write-back job.
    async fn store_results(
        &self,
        handle: &EngineHandle,
        request: &StoreRequest,
    ) -> Result<JobToken, EngineError>;

    /// Delete the engine. Calling this again for the same handle is a no-op.
    async fn teardown(&self, handle: &EngineHandle) -> Result<(), EngineError>;
}

/// Engine ids already deleted through a connection.
///
/// Holds at most `capacity` ids, forgetting the oldest first. A forgotten
/// engine is deleted again on request, which the backends answer with 404.
#[derive(Debug)]
pub(crate) struct TeardownLedger {
    capacity: usize,
    deleted: Mutex<DeletedIds>,
}

#[derive(Debug, Default)]
struct DeletedIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl Default for TeardownLedger {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl TeardownLedger {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            deleted: Mutex::new(DeletedIds::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DeletedIds> {
        self.deleted.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_deleted(&self, id: &str) -> bool {
        self.lock().ids.contains(id)
    }

    pub(crate) fn mark_deleted(&self, id: &str) {
        let mut deleted = self.lock();
        if !deleted.ids.insert(id.to_string()) {
            return;
        }
        deleted.order.push_back(id.to_string());
        while deleted.order.len() > self.capacity {
            if let Some(oldest) = deleted.order.pop_front() {
                deleted.ids.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_remembers_deleted_engines() {
        let ledger = TeardownLedger::default();
        ledger.mark_deleted("e-1");
        ledger.mark_deleted("e-1");
        assert!(ledger.is_deleted("e-1"));
        assert!(!ledger.is_deleted("e-2"));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_ledger_forgets_oldest_beyond_capacity() {
        let ledger = TeardownLedger::with_capacity(2);
        for id in ["e-1", "e-2", "e-3"] {
            ledger.mark_deleted(id);
        }
        assert_eq!(ledger.len(), 2);
        assert!(!ledger.is_deleted("e-1"));
        assert!(ledger.is_deleted("e-2"));
        assert!(ledger.is_deleted("e-3"));
    }
}
