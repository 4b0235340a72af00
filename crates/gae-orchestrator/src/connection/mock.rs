// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock connection for testing.
//!
//! Simulates an engine backend in memory. Failures can be scripted per
//! operation and every call is recorded for later inspection.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::EngineConnection;
use crate::config::DeploymentMode;
use crate::error::EngineError;
use crate::types::{
    Algorithm, EngineHandle, EngineSize, EngineSummary, GraphInfo, JobStatus, JobToken,
    LoadRequest, LoadedGraph, StoreRequest,
};

/// Connection operations, for scripting failures and inspecting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Authenticate,
    Reauthenticate,
    ExistingEngines,
    Deploy,
    AwaitReady,
    Load,
    GraphInfo,
    Run,
    FetchStatus,
    StoreResults,
    Teardown,
}

/// Kinds of engine job the mock hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockJob {
    Load,
    Algorithm,
    Store,
}

impl MockJob {
    fn prefix(&self) -> &'static str {
        match self {
            MockJob::Load => "load",
            MockJob::Algorithm => "algo",
            MockJob::Store => "store",
        }
    }

    fn of(token: &JobToken) -> Option<Self> {
        [MockJob::Load, MockJob::Algorithm, MockJob::Store]
            .into_iter()
            .find(|kind| token.as_str().starts_with(kind.prefix()))
    }
}

#[derive(Debug, Clone)]
struct FailurePlan {
    error: EngineError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<Operation>,
    failures: HashMap<Operation, FailurePlan>,
    next_id: u32,
    polls: HashMap<String, u32>,
    deployed: Vec<EngineHandle>,
    teardowns: HashMap<String, u32>,
    deleted: HashSet<String>,
    partial_deploy_failure: Option<EngineError>,
}

/// In-memory engine backend.
pub struct MockConnection {
    mode: DeploymentMode,
    database: String,
    state: Mutex<MockState>,
    job_failures: HashMap<MockJob, String>,
    polls_until_done: u32,
    never_complete: bool,
    ready_delay: Duration,
    graph: GraphInfo,
    stored_documents: u64,
    running_engines: Vec<EngineSummary>,
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnection {
    /// A managed-mode mock where every operation succeeds.
    pub fn new() -> Self {
        Self {
            mode: DeploymentMode::Managed,
            database: "mock_db".to_string(),
            state: Mutex::new(MockState::default()),
            job_failures: HashMap::new(),
            polls_until_done: 1,
            never_complete: false,
            ready_delay: Duration::ZERO,
            graph: GraphInfo {
                vertex_count: 100,
                edge_count: 250,
            },
            stored_documents: 100,
            running_engines: Vec::new(),
        }
    }

    /// A self-managed-mode mock.
    pub fn self_managed() -> Self {
        Self {
            mode: DeploymentMode::SelfManaged,
            ..Self::new()
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Fail the next `times` calls of `operation` with `error`.
    pub fn fail_times(self, operation: Operation, times: u32, error: EngineError) -> Self {
        self.plan(operation, error, Some(times))
    }

    /// Fail every call of `operation` with `error`.
    pub fn fail_always(self, operation: Operation, error: EngineError) -> Self {
        self.plan(operation, error, None)
    }

    /// Make jobs of `kind` report failure with `message`.
    pub fn fail_job(mut self, kind: MockJob, message: impl Into<String>) -> Self {
        self.job_failures.insert(kind, message.into());
        self
    }

    /// Number of status polls before a job reports success.
    pub fn with_polls_until_done(mut self, polls: u32) -> Self {
        self.polls_until_done = polls.max(1);
        self
    }

    /// Jobs stay running forever.
    pub fn never_completing(mut self) -> Self {
        self.never_complete = true;
        self
    }

    pub fn with_graph(mut self, vertex_count: u64, edge_count: u64) -> Self {
        self.graph = GraphInfo {
            vertex_count,
            edge_count,
        };
        self
    }

    /// Documents reported by the store job.
    pub fn with_stored_documents(mut self, documents: u64) -> Self {
        self.stored_documents = documents;
        self
    }

    /// Engines reported as already running by the pre-check.
    pub fn with_running_engines(mut self, engines: Vec<EngineSummary>) -> Self {
        self.running_engines = engines;
        self
    }

    /// Time a created engine takes to become ready.
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = delay;
        self
    }

    /// The next deploy creates an engine that then fails to become ready with `error`.
    pub fn with_partial_deploy_failure(self, error: EngineError) -> Self {
        self.lock().partial_deploy_failure = Some(error);
        self
    }

    fn plan(self, operation: Operation, error: EngineError, remaining: Option<u32>) -> Self {
        self.lock()
            .failures
            .insert(operation, FailurePlan { error, remaining });
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and apply any scripted failure.
    fn enter(&self, operation: Operation) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.calls.push(operation);
        let Some(plan) = state.failures.get_mut(&operation) else {
            return Ok(());
        };
        match plan.remaining {
            None => Err(plan.error.clone()),
            Some(0) => Ok(()),
            Some(ref mut n) => {
                *n -= 1;
                Err(plan.error.clone())
            }
        }
    }

    fn next_token(&self, kind: MockJob) -> JobToken {
        let mut state = self.lock();
        state.next_id += 1;
        JobToken(format!("{}-{}", kind.prefix(), state.next_id))
    }

    /// Every recorded call, in order.
    pub fn calls(&self) -> Vec<Operation> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|op| **op == operation)
            .count()
    }

    /// Times `teardown` was invoked for an engine.
    pub fn teardown_count(&self, engine_id: &str) -> u32 {
        self.lock().teardowns.get(engine_id).copied().unwrap_or(0)
    }

    /// Every engine created, including partially deployed ones.
    pub fn deployed_handles(&self) -> Vec<EngineHandle> {
        self.lock().deployed.clone()
    }

    /// Engines created and not yet deleted.
    pub fn live_engines(&self) -> Vec<String> {
        let state = self.lock();
        state
            .deployed
            .iter()
            .filter(|h| !state.deleted.contains(&h.id))
            .map(|h| h.id.clone())
            .collect()
    }
}

#[async_trait]
impl EngineConnection for MockConnection {
    fn deployment_mode(&self) -> DeploymentMode {
        self.mode
    }

    fn database(&self) -> &str {
        &self.database
    }

    async fn authenticate(&self) -> Result<(), EngineError> {
        self.enter(Operation::Authenticate)
    }

    async fn reauthenticate(&self) -> Result<(), EngineError> {
        self.enter(Operation::Reauthenticate)
    }

    async fn existing_engines(&self) -> Result<Vec<EngineSummary>, EngineError> {
        self.enter(Operation::ExistingEngines)?;
        Ok(self.running_engines.clone())
    }

    async fn create_engine(
        &self,
        size: EngineSize,
        _engine_type: &str,
    ) -> Result<EngineHandle, EngineError> {
        self.enter(Operation::Deploy)?;
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("engine-{}", state.next_id);
        let mut handle = EngineHandle::new(id.as_str(), format!("mock://{}", id));
        if self.mode == DeploymentMode::Managed {
            handle = handle.with_size(size);
        }
        state.deployed.push(handle.clone());
        Ok(handle)
    }

    async fn await_ready(&self, handle: &EngineHandle) -> Result<EngineHandle, EngineError> {
        self.enter(Operation::AwaitReady)?;
        if !self.ready_delay.is_zero() {
            tokio::time::sleep(self.ready_delay).await;
        }
        if let Some(error) = self.lock().partial_deploy_failure.take() {
            return Err(error);
        }
        Ok(handle.clone())
    }

    async fn load(
        &self,
        _handle: &EngineHandle,
        _request: &LoadRequest,
    ) -> Result<LoadedGraph, EngineError> {
        self.enter(Operation::Load)?;
        let job = self.next_token(MockJob::Load);
        let graph_id = format!("graph-{}", job.as_str().trim_start_matches("load-"));
        Ok(LoadedGraph { job, graph_id })
    }

    async fn graph_info(
        &self,
        _handle: &EngineHandle,
        _graph_id: &str,
    ) -> Result<GraphInfo, EngineError> {
        self.enter(Operation::GraphInfo)?;
        Ok(self.graph)
    }

    async fn run(
        &self,
        _handle: &EngineHandle,
        _graph_id: &str,
        _algorithm: Algorithm,
        _params: &serde_json::Map<String, Value>,
    ) -> Result<JobToken, EngineError> {
        self.enter(Operation::Run)?;
        Ok(self.next_token(MockJob::Algorithm))
    }

    async fn fetch_status(
        &self,
        _handle: &EngineHandle,
        job: &JobToken,
    ) -> Result<JobStatus, EngineError> {
        self.enter(Operation::FetchStatus)?;
        let kind = MockJob::of(job);
        if let Some(message) = kind.and_then(|k| self.job_failures.get(&k)) {
            return Ok(JobStatus::Failed {
                message: message.clone(),
            });
        }
        if self.never_complete {
            return Ok(JobStatus::Running {
                progress: Some(0),
                total: Some(1),
            });
        }

        let total = match kind {
            Some(MockJob::Store) => self.stored_documents,
            _ => self.graph.vertex_count,
        };
        let mut state = self.lock();
        let polls = state.polls.entry(job.0.clone()).or_insert(0);
        *polls += 1;
        if *polls >= self.polls_until_done {
            Ok(JobStatus::Succeeded {
                progress: Some(total),
                total: Some(total),
                execution_time_ms: None,
            })
        } else {
            Ok(JobStatus::Running {
                progress: Some(0),
                total: Some(total),
            })
        }
    }

    async fn store_results(
        &self,
        _handle: &EngineHandle,
        _request: &StoreRequest,
    ) -> Result<JobToken, EngineError> {
        self.enter(Operation::StoreResults)?;
        Ok(self.next_token(MockJob::Store))
    }

    async fn teardown(&self, handle: &EngineHandle) -> Result<(), EngineError> {
        *self
            .lock()
            .teardowns
            .entry(handle.id.clone())
            .or_insert(0) += 1;
        self.enter(Operation::Teardown)?;
        self.lock().deleted.insert(handle.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures_run_out() {
        let mock = MockConnection::new().fail_times(
            Operation::Authenticate,
            2,
            EngineError::Transient("x".into()),
        );
        assert!(mock.authenticate().await.is_err());
        assert!(mock.authenticate().await.is_err());
        assert!(mock.authenticate().await.is_ok());
        assert_eq!(mock.call_count(Operation::Authenticate), 3);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mock = MockConnection::new();
        let handle = mock.deploy(EngineSize::E8, "gral").await.unwrap();
        assert_eq!(handle.size, Some(EngineSize::E8));
        assert_eq!(mock.live_engines(), vec![handle.id.clone()]);

        mock.teardown(&handle).await.unwrap();
        mock.teardown(&handle).await.unwrap();
        assert_eq!(mock.teardown_count(&handle.id), 2);
        assert!(mock.live_engines().is_empty());
    }

    #[tokio::test]
    async fn test_deploy_reports_engine_that_never_became_ready() {
        let mock = MockConnection::new()
            .with_partial_deploy_failure(EngineError::Transient("not started".into()));
        let err = mock.deploy(EngineSize::E4, "gral").await.unwrap_err();
        assert!(matches!(err.error, EngineError::Transient(_)));
        assert_eq!(err.partial.unwrap().id, mock.deployed_handles()[0].id);
        assert_eq!(mock.calls(), vec![Operation::Deploy, Operation::AwaitReady]);
    }

    #[tokio::test]
    async fn test_jobs_complete_after_polls() {
        let mock = MockConnection::new().with_polls_until_done(2);
        let handle = EngineHandle::new("e", "mock://e");
        let job = mock
            .run(&handle, "g", Algorithm::Wcc, &Default::default())
            .await
            .unwrap();
        assert!(!mock.fetch_status(&handle, &job).await.unwrap().is_terminal());
        assert!(mock.fetch_status(&handle, &job).await.unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_job_failure_signal() {
        let mock = MockConnection::new().fail_job(MockJob::Load, "collection missing");
        let handle = EngineHandle::new("e", "mock://e");
        let loaded = mock
            .load(
                &handle,
                &LoadRequest {
                    database: "db".into(),
                    vertex_collections: vec!["v".into()],
                    edge_collections: vec!["e".into()],
                    vertex_attributes: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(
            mock.fetch_status(&handle, &loaded.job).await.unwrap(),
            JobStatus::Failed {
                message: "collection missing".to_string()
            }
        );
    }
}
