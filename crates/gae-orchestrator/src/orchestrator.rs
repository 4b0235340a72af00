// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Analysis job lifecycle.
//!
//! A job moves through
//! `Pending -> Deploying -> Loading -> Running -> Storing -> CleaningUp`
//! and ends Completed or Failed. Any stage failure routes straight to
//! CleaningUp, which tears down whatever engine the job created.
//!
//! Each network operation is retried under the [`RetryPolicy`] of its own
//! stage; retries never restart the job from an earlier stage.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{Instant, timeout_at};
use tracing::{Instrument, Span, debug, error, field, info, info_span, warn};
use uuid::Uuid;

use crate::analysis::{AnalysisConfig, AnalysisPlan};
use crate::config::{ExistingEnginePolicy, OrchestratorConfig};
use crate::connection::EngineConnection;
use crate::cost::CostModel;
use crate::error::{EngineError, Result, StageError};
use crate::retry::{RetryBudget, RetryDecision, RetryPolicy};
use crate::types::{
    AnalysisResult, AnalysisStatus, EngineHandle, EngineSize, JobError, JobStatus, JobToken,
    LoadRequest, StoreRequest,
};

/// Drives analysis jobs against one engine connection.
pub struct WorkflowOrchestrator {
    connection: Arc<dyn EngineConnection>,
    config: OrchestratorConfig,
}

impl WorkflowOrchestrator {
    /// Create an orchestrator. The configuration is validated here, once.
    pub fn new(connection: Arc<dyn EngineConnection>, config: OrchestratorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { connection, config })
    }

    pub fn connection(&self) -> &Arc<dyn EngineConnection> {
        &self.connection
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one analysis to completion.
    ///
    /// Returns `Err` only when the configuration is rejected before any
    /// network call. Every later failure is reported through a Failed
    /// [`AnalysisResult`], and the engine created for the job is always
    /// torn down before this returns.
    pub async fn run_analysis(&self, config: &AnalysisConfig) -> Result<AnalysisResult> {
        let plan = config.validate()?;
        let timeout = plan.timeout.unwrap_or(self.config.default_job_timeout);
        Ok(self.execute(plan, Instant::now() + timeout).await)
    }

    /// Like [`run_analysis`](Self::run_analysis), with a caller-supplied deadline.
    ///
    /// The job's own `timeout_seconds`, if set and earlier, still applies.
    pub async fn run_analysis_until(
        &self,
        config: &AnalysisConfig,
        deadline: Instant,
    ) -> Result<AnalysisResult> {
        let plan = config.validate()?;
        let deadline = match plan.timeout {
            Some(timeout) => deadline.min(Instant::now() + timeout),
            None => deadline,
        };
        Ok(self.execute(plan, deadline).await)
    }

    async fn execute(&self, plan: AnalysisPlan, deadline: Instant) -> AnalysisResult {
        let span = info_span!(
            "analysis",
            analysis = %plan.name,
            algorithm = %plan.algorithm,
            engine_id = field::Empty
        );
        async move {
            let mut job = Job::new(self, &plan, deadline);
            info!("Starting analysis");
            let outcome = job.drive().await;
            job.cleanup().await;
            job.finish(outcome)
        }
        .instrument(span)
        .await
    }
}

/// Tears the engine down if a job is dropped or panics before cleanup.
struct EngineLease {
    connection: Arc<dyn EngineConnection>,
    handle: Option<EngineHandle>,
}

impl EngineLease {
    fn new(connection: Arc<dyn EngineConnection>, handle: EngineHandle) -> Self {
        Self {
            connection,
            handle: Some(handle),
        }
    }

    fn handle(&self) -> Option<&EngineHandle> {
        self.handle.as_ref()
    }

    fn replace(&mut self, handle: EngineHandle) {
        self.handle = Some(handle);
    }

    /// Cleanup has run; nothing left to do on drop.
    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        warn!(engine_id = %handle.id, "Job ended before cleanup, scheduling engine teardown");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let connection = self.connection.clone();
                runtime.spawn(async move {
                    if let Err(e) = connection.teardown(&handle).await {
                        error!(
                            engine_id = %handle.id,
                            error = %e,
                            "Engine teardown failed, delete it manually"
                        );
                    }
                });
            }
            Err(_) => error!(
                engine_id = %handle.id,
                "No runtime available for engine teardown, delete it manually"
            ),
        }
    }
}

/// State of one running job.
struct Job<'a> {
    connection: Arc<dyn EngineConnection>,
    config: &'a OrchestratorConfig,
    plan: &'a AnalysisPlan,
    deadline: Instant,
    budget: RetryBudget,
    extra_retries: u32,
    history: Vec<AnalysisStatus>,
    lease: Option<EngineLease>,
    engine_id: Option<String>,
    engine_size: Option<EngineSize>,
    deployed_at: Option<Instant>,
    engine_runtime: Duration,
    graph_id: Option<String>,
    job_id: Option<String>,
    vertex_count: u64,
    edge_count: u64,
    documents_updated: u64,
    started: Instant,
    started_at: chrono::DateTime<Utc>,
}

impl<'a> Job<'a> {
    fn new(
        orchestrator: &'a WorkflowOrchestrator,
        plan: &'a AnalysisPlan,
        deadline: Instant,
    ) -> Self {
        Self {
            connection: orchestrator.connection.clone(),
            config: &orchestrator.config,
            plan,
            deadline,
            budget: RetryBudget::new(),
            extra_retries: 0,
            history: Vec::new(),
            lease: None,
            engine_id: None,
            engine_size: None,
            deployed_at: None,
            engine_runtime: Duration::ZERO,
            graph_id: None,
            job_id: None,
            vertex_count: 0,
            edge_count: 0,
            documents_updated: 0,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    async fn drive(&mut self) -> std::result::Result<(), StageError> {
        self.deploy().await?;
        self.load().await?;
        self.run().await?;
        self.store().await?;
        Ok(())
    }

    fn enter(&mut self, stage: AnalysisStatus) {
        self.history.push(stage);
        info!(stage = %stage, "Entering stage");
    }

    fn engine(&self, stage: AnalysisStatus) -> std::result::Result<EngineHandle, StageError> {
        self.lease
            .as_ref()
            .and_then(EngineLease::handle)
            .cloned()
            .ok_or_else(|| {
                StageError::new(stage, 0, EngineError::Fatal("no engine deployed".to_string()))
            })
    }

    fn adopt(&mut self, handle: EngineHandle, deploy_started: Instant) {
        Span::current().record("engine_id", handle.id.as_str());
        self.engine_id = Some(handle.id.clone());
        self.engine_size = handle.size;
        self.deployed_at = Some(deploy_started);
        self.lease = Some(EngineLease::new(self.connection.clone(), handle));
    }

    /// Swap in the handle of the ready engine, which carries its endpoint.
    fn mark_ready(&mut self, ready: EngineHandle) {
        self.engine_size = ready.size.or(self.engine_size);
        if let Some(lease) = self.lease.as_mut() {
            lease.replace(ready);
        }
    }

    fn deadline_error(&self, stage: AnalysisStatus, attempts: u32, operation: &str) -> StageError {
        StageError::new(
            stage,
            attempts,
            EngineError::DeadlineExceeded(format!(
                "job deadline reached during {}",
                operation
            )),
        )
    }

    /// Decide on a failed attempt. `Ok` means try again.
    async fn after_failure(
        &mut self,
        stage: AnalysisStatus,
        operation: &str,
        attempt: u32,
        error: EngineError,
    ) -> std::result::Result<(), StageError> {
        let after = match self.budget.decide(&self.config.retry, &error, attempt) {
            RetryDecision::GiveUp => return Err(StageError::new(stage, attempt, error)),
            RetryDecision::Retry { after } => after,
        };
        warn!(
            stage = %stage,
            operation,
            attempt,
            delay_ms = after.as_millis() as u64,
            error = %error,
            "Operation failed, retrying"
        );

        if error.is_auth() {
            match timeout_at(self.deadline, self.connection.reauthenticate()).await {
                Ok(Ok(())) => debug!("Re-authenticated"),
                Ok(Err(e)) => return Err(StageError::new(stage, attempt, e)),
                Err(_) => return Err(self.deadline_error(stage, attempt, "re-authentication")),
            }
        }

        if Instant::now() + after >= self.deadline {
            return Err(StageError::new(
                stage,
                attempt,
                EngineError::DeadlineExceeded(format!(
                    "job deadline reached before {} could be retried (last error: {})",
                    operation, error
                )),
            ));
        }
        tokio::time::sleep(after).await;
        Ok(())
    }

    /// Run `op` under the stage's retry policy and the job deadline.
    async fn attempt<T, F, Fut>(
        &mut self,
        stage: AnalysisStatus,
        operation: &str,
        mut op: F,
    ) -> std::result::Result<T, StageError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, EngineError>>,
    {
        let mut attempt = 0;
        loop {
            if Instant::now() >= self.deadline {
                return Err(self.deadline_error(stage, attempt, operation));
            }
            attempt += 1;
            let error = match timeout_at(self.deadline, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => error,
                Err(_) => return Err(self.deadline_error(stage, attempt, operation)),
            };
            self.after_failure(stage, operation, attempt, error).await?;
        }
    }

    /// Poll a job until it finishes, backing off between polls.
    async fn wait_for_job(
        &mut self,
        stage: AnalysisStatus,
        handle: &EngineHandle,
        job: &JobToken,
    ) -> std::result::Result<JobStatus, StageError> {
        let connection = self.connection.clone();
        let mut delay = self.config.poll_interval;
        loop {
            let status = self
                .attempt(stage, "fetch_status", || connection.fetch_status(handle, job))
                .await?;
            match status {
                JobStatus::Succeeded { .. } => {
                    debug!(job_id = %job, "Job finished");
                    return Ok(status);
                }
                JobStatus::Failed { message } => {
                    return Err(StageError::new(
                        stage,
                        1,
                        EngineError::Fatal(format!("engine job {} failed: {}", job, message)),
                    ));
                }
                JobStatus::Running { progress, total } => {
                    debug!(job_id = %job, ?progress, ?total, "Job still running");
                }
            }

            let now = Instant::now();
            if now >= self.deadline {
                return Err(self.deadline_error(stage, 1, "job polling"));
            }
            tokio::time::sleep(delay.min(self.deadline - now)).await;
            delay = delay
                .mul_f64(self.config.poll_backoff)
                .min(self.config.max_poll_interval);
        }
    }

    async fn deploy(&mut self) -> std::result::Result<(), StageError> {
        let stage = AnalysisStatus::Deploying;
        self.enter(stage);
        let connection = self.connection.clone();

        self.attempt(stage, "authenticate", || connection.authenticate())
            .await?;

        match timeout_at(self.deadline, connection.existing_engines()).await {
            Ok(Ok(engines)) if !engines.is_empty() => {
                let names: Vec<String> = engines.iter().map(ToString::to_string).collect();
                match self.config.existing_engines {
                    ExistingEnginePolicy::Warn => warn!(
                        count = engines.len(),
                        engines = %names.join(", "),
                        "Engines already running, deploying another"
                    ),
                    ExistingEnginePolicy::Abort => {
                        return Err(StageError::new(
                            stage,
                            1,
                            EngineError::Fatal(format!(
                                "{} engine(s) already running: {}",
                                engines.len(),
                                names.join(", ")
                            )),
                        ));
                    }
                }
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Could not list running engines"),
            Err(_) => return Err(self.deadline_error(stage, 1, "engine pre-check")),
        }

        let plan = self.plan;
        let size = plan.engine_size;
        let engine_type = plan.engine_type.as_str();
        let mut attempt = 0;
        loop {
            if Instant::now() >= self.deadline {
                return Err(self.deadline_error(stage, attempt, "deploy"));
            }
            attempt += 1;
            let deploy_started = Instant::now();
            let created =
                timeout_at(self.deadline, connection.create_engine(size, engine_type)).await;
            let handle = match created {
                Ok(Ok(handle)) => handle,
                Ok(Err(error)) => {
                    self.after_failure(stage, "deploy", attempt, error).await?;
                    continue;
                }
                Err(_) => return Err(self.deadline_error(stage, attempt, "deploy")),
            };
            // Owned by the job from here on, whatever happens while it starts.
            info!(engine_id = %handle.id, "Engine created, waiting until ready");
            self.adopt(handle.clone(), deploy_started);

            let error = match timeout_at(self.deadline, connection.await_ready(&handle)).await {
                Ok(Ok(ready)) => {
                    info!(endpoint = %ready.endpoint, "Engine deployed");
                    self.mark_ready(ready);
                    return Ok(());
                }
                Ok(Err(error)) => error,
                Err(_) => return Err(self.deadline_error(stage, attempt, "engine start")),
            };
            warn!(engine_id = %handle.id, error = %error, "Engine did not become ready");
            self.after_failure(stage, "deploy", attempt, error).await?;

            // Retrying: the engine from the failed attempt goes first.
            if let Some(mut lease) = self.lease.take()
                && let Some(handle) = lease.handle().cloned()
            {
                self.extra_retries +=
                    teardown_engine(connection.as_ref(), &self.config.retry, &handle).await;
                lease.disarm();
                self.engine_id = None;
                self.deployed_at = None;
            }
        }
    }

    async fn load(&mut self) -> std::result::Result<(), StageError> {
        let stage = AnalysisStatus::Loading;
        self.enter(stage);
        let handle = self.engine(stage)?;
        let connection = self.connection.clone();
        let request = LoadRequest {
            database: self.database(),
            vertex_collections: self.plan.vertex_collections.clone(),
            edge_collections: self.plan.edge_collections.clone(),
            vertex_attributes: self.plan.vertex_attributes.clone(),
        };

        let loaded = self
            .attempt(stage, "load", || connection.load(&handle, &request))
            .await?;
        info!(graph_id = %loaded.graph_id, job_id = %loaded.job, "Graph load submitted");
        self.graph_id = Some(loaded.graph_id.clone());
        self.wait_for_job(stage, &handle, &loaded.job).await?;

        match timeout_at(self.deadline, connection.graph_info(&handle, &loaded.graph_id)).await {
            Ok(Ok(info)) => {
                self.vertex_count = info.vertex_count;
                self.edge_count = info.edge_count;
                info!(
                    vertices = info.vertex_count,
                    edges = info.edge_count,
                    "Graph loaded"
                );
            }
            Ok(Err(e)) => warn!(error = %e, "Could not read graph details"),
            Err(_) => warn!("Deadline reached while reading graph details"),
        }
        Ok(())
    }

    async fn run(&mut self) -> std::result::Result<(), StageError> {
        let stage = AnalysisStatus::Running;
        self.enter(stage);
        let handle = self.engine(stage)?;
        let connection = self.connection.clone();
        let graph_id = self.graph_id.clone().unwrap_or_default();
        let plan = self.plan;
        let algorithm = plan.algorithm;
        let params = &plan.params;

        let job = self
            .attempt(stage, "run", || {
                connection.run(&handle, &graph_id, algorithm, params)
            })
            .await?;
        info!(job_id = %job, "Algorithm started");
        self.job_id = Some(job.0.clone());

        if let JobStatus::Succeeded {
            execution_time_ms: Some(ms),
            ..
        } = self.wait_for_job(stage, &handle, &job).await?
        {
            info!(execution_time_ms = ms, "Algorithm finished");
        }
        Ok(())
    }

    async fn store(&mut self) -> std::result::Result<(), StageError> {
        let stage = AnalysisStatus::Storing;
        self.enter(stage);
        let handle = self.engine(stage)?;
        let connection = self.connection.clone();
        let request = StoreRequest {
            database: self.database(),
            target_collection: self.plan.target_collection.clone(),
            job_ids: self.job_id.iter().cloned().collect(),
            attribute_names: vec![self.plan.result_field.clone()],
            parallelism: self.config.store_parallelism,
            batch_size: self.config.store_batch_size,
        };

        let job = self
            .attempt(stage, "store_results", || {
                connection.store_results(&handle, &request)
            })
            .await?;
        let status = self.wait_for_job(stage, &handle, &job).await?;

        self.documents_updated = match status {
            JobStatus::Succeeded {
                total: Some(total), ..
            } if total > 0 => total,
            JobStatus::Succeeded {
                progress: Some(progress),
                ..
            } if progress > 0 => progress,
            _ => self.vertex_count,
        };
        info!(
            documents = self.documents_updated,
            collection = %request.target_collection,
            field = %self.plan.result_field,
            "Results stored"
        );
        Ok(())
    }

    /// Tear down the job's engine. Failures are logged, never returned.
    async fn cleanup(&mut self) {
        self.enter(AnalysisStatus::CleaningUp);
        let Some(mut lease) = self.lease.take() else {
            debug!("No engine to tear down");
            return;
        };
        if let Some(handle) = lease.handle().cloned() {
            self.extra_retries +=
                teardown_engine(self.connection.as_ref(), &self.config.retry, &handle).await;
        }
        lease.disarm();
        if let Some(deployed_at) = self.deployed_at {
            self.engine_runtime = deployed_at.elapsed();
        }
    }

    fn database(&self) -> String {
        self.plan
            .database
            .clone()
            .unwrap_or_else(|| self.connection.database().to_string())
    }

    fn finish(self, outcome: std::result::Result<(), StageError>) -> AnalysisResult {
        let engine_runtime_seconds = self.engine_runtime.as_secs_f64();
        let estimated_cost_usd = CostModel::estimate_for(
            self.connection.deployment_mode(),
            self.engine_size.unwrap_or(self.plan.engine_size),
            engine_runtime_seconds,
        );
        let (status, error) = match outcome {
            Ok(()) => (AnalysisStatus::Completed, None),
            Err(e) => (
                AnalysisStatus::Failed,
                Some(JobError {
                    stage: Some(e.stage),
                    kind: e.source.kind(),
                    message: e.to_string(),
                }),
            ),
        };

        let result = AnalysisResult {
            run_id: Uuid::new_v4(),
            name: self.plan.name.clone(),
            algorithm: self.plan.algorithm,
            status,
            engine_id: self.engine_id,
            graph_id: self.graph_id,
            job_id: self.job_id,
            vertex_count: self.vertex_count,
            edge_count: self.edge_count,
            documents_updated: self.documents_updated,
            estimated_cost_usd,
            engine_runtime_seconds,
            duration_seconds: self.started.elapsed().as_secs_f64(),
            retry_count: self.budget.retries() + self.extra_retries,
            stage_history: self.history,
            started_at: self.started_at,
            finished_at: Utc::now(),
            error,
        };

        match &result.error {
            None => info!(
                duration_secs = result.duration_seconds,
                documents = result.documents_updated,
                "Analysis completed"
            ),
            Some(e) => error!(error = %e, "Analysis failed"),
        }
        result
    }
}

/// Delete an engine under `policy`, returning the retries spent.
///
/// Exhaustion is logged for manual follow-up; it never fails the caller.
async fn teardown_engine(
    connection: &dyn EngineConnection,
    policy: &RetryPolicy,
    handle: &EngineHandle,
) -> u32 {
    let mut budget = RetryBudget::new();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let error = match connection.teardown(handle).await {
            Ok(()) => {
                info!(engine_id = %handle.id, "Engine torn down");
                return budget.retries();
            }
            Err(error) => error,
        };
        match budget.decide(policy, &error, attempt) {
            RetryDecision::Retry { after } => {
                warn!(
                    engine_id = %handle.id,
                    attempt,
                    error = %error,
                    "Engine teardown failed, retrying"
                );
                if error.is_auth()
                    && let Err(e) = connection.reauthenticate().await
                {
                    warn!(error = %e, "Re-authentication before teardown failed");
                }
                tokio::time::sleep(after).await;
            }
            RetryDecision::GiveUp => {
                let cleanup = StageError::new(AnalysisStatus::CleaningUp, attempt, error);
                error!(
                    engine_id = %handle.id,
                    error = %cleanup,
                    "Engine teardown failed, delete it manually"
                );
                return budget.retries();
            }
        }
    }
}
