// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Lifecycle tests for the workflow orchestrator against the mock connection.

use std::sync::Arc;
use std::time::Duration;

use gae_orchestrator::{
    Algorithm, AnalysisConfig, AnalysisStatus, EngineError, EngineSummary, ErrorKind,
    ExistingEnginePolicy, MockConnection, MockJob, Operation, OrchestratorConfig, RetryPolicy,
    WorkflowOrchestrator,
};
use tokio::time::Instant;

fn analysis() -> AnalysisConfig {
    AnalysisConfig::new("demand", Algorithm::PageRank)
        .with_vertex_collections(["users", "products"])
        .with_edge_collections(["interactions"])
}

fn orchestrator(mock: &Arc<MockConnection>) -> WorkflowOrchestrator {
    orchestrator_with(mock, OrchestratorConfig::default())
}

fn orchestrator_with(
    mock: &Arc<MockConnection>,
    config: OrchestratorConfig,
) -> WorkflowOrchestrator {
    WorkflowOrchestrator::new(mock.clone(), config).unwrap()
}

fn deterministic_retry() -> OrchestratorConfig {
    OrchestratorConfig::default().with_retry(RetryPolicy::default().with_jitter(0.0))
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_successful_job_visits_every_stage_in_order() {
    let mock = Arc::new(MockConnection::new().with_polls_until_done(3));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Completed);
    assert!(result.error.is_none());
    assert_eq!(
        result.stage_history,
        vec![
            AnalysisStatus::Deploying,
            AnalysisStatus::Loading,
            AnalysisStatus::Running,
            AnalysisStatus::Storing,
            AnalysisStatus::CleaningUp,
        ]
    );
    assert_eq!(result.vertex_count, 100);
    assert_eq!(result.edge_count, 250);
    assert_eq!(result.documents_updated, 100);
    assert_eq!(result.retry_count, 0);
    assert!(result.graph_id.is_some());
    assert!(result.job_id.is_some());
    assert!(result.estimated_cost_usd.is_some());

    let engine_id = result.engine_id.clone().unwrap();
    assert_eq!(mock.teardown_count(&engine_id), 1);
    assert!(mock.live_engines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_operations_follow_lifecycle_order() {
    let mock = Arc::new(MockConnection::new());
    orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    let calls: Vec<Operation> = mock
        .calls()
        .into_iter()
        .filter(|op| *op != Operation::FetchStatus)
        .collect();
    assert_eq!(
        calls,
        vec![
            Operation::Authenticate,
            Operation::ExistingEngines,
            Operation::Deploy,
            Operation::AwaitReady,
            Operation::Load,
            Operation::GraphInfo,
            Operation::Run,
            Operation::StoreResults,
            Operation::Teardown,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_documents_updated_comes_from_store_job() {
    let mock = Arc::new(MockConnection::new().with_stored_documents(4_200));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();
    assert_eq!(result.documents_updated, 4_200);
}

#[tokio::test(start_paused = true)]
async fn test_self_managed_jobs_have_no_cost() {
    let mock = Arc::new(MockConnection::self_managed());
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();
    assert_eq!(result.status, AnalysisStatus::Completed);
    assert_eq!(result.estimated_cost_usd, None);
}

#[tokio::test(start_paused = true)]
async fn test_graph_details_failure_does_not_fail_job() {
    let mock = Arc::new(MockConnection::new().fail_always(
        Operation::GraphInfo,
        EngineError::Transient("busy".to_string()),
    ));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();
    assert_eq!(result.status, AnalysisStatus::Completed);
    assert_eq!(result.vertex_count, 0);
}

// ============================================================================
// Cleanup guarantee
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_engine_torn_down_once_whichever_stage_fails() {
    let cases = [
        (Operation::Load, AnalysisStatus::Loading),
        (Operation::Run, AnalysisStatus::Running),
        (Operation::StoreResults, AnalysisStatus::Storing),
        (Operation::FetchStatus, AnalysisStatus::Loading),
    ];
    for (operation, stage) in cases {
        let mock = Arc::new(MockConnection::new().fail_always(
            operation,
            EngineError::Validation("bad request".to_string()),
        ));
        let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

        assert_eq!(result.status, AnalysisStatus::Failed, "{:?}", operation);
        let error = result.error.clone().unwrap();
        assert_eq!(error.stage, Some(stage), "{:?}", operation);
        assert_eq!(error.kind, ErrorKind::Validation);
        assert_eq!(
            result.stage_history.last(),
            Some(&AnalysisStatus::CleaningUp)
        );

        let engine_id = result.engine_id.clone().unwrap();
        assert_eq!(mock.teardown_count(&engine_id), 1, "{:?}", operation);
        assert!(mock.live_engines().is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_engine_job_is_reported_and_cleaned_up() {
    let mock = Arc::new(MockConnection::new().fail_job(MockJob::Algorithm, "out of memory"));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.stage, Some(AnalysisStatus::Running));
    assert!(error.message.contains("out of memory"));
    assert!(mock.live_engines().is_empty());
    assert_eq!(mock.call_count(Operation::StoreResults), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deploy_failure_has_nothing_to_tear_down() {
    let mock = Arc::new(MockConnection::new().fail_always(
        Operation::Deploy,
        EngineError::Validation("size not available".to_string()),
    ));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    assert_eq!(
        result.error.unwrap().stage,
        Some(AnalysisStatus::Deploying)
    );
    assert_eq!(result.engine_id, None);
    assert_eq!(mock.call_count(Operation::Teardown), 0);
    assert_eq!(
        result.stage_history,
        vec![AnalysisStatus::Deploying, AnalysisStatus::CleaningUp]
    );
}

#[tokio::test(start_paused = true)]
async fn test_teardown_failure_does_not_mask_stage_error() {
    let mock = Arc::new(
        MockConnection::new()
            .fail_always(Operation::Run, EngineError::Validation("bad param".to_string()))
            .fail_always(
                Operation::Teardown,
                EngineError::Transient("management API down".to_string()),
            ),
    );
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.stage, Some(AnalysisStatus::Running));
    assert!(error.message.contains("bad param"));
    assert!(!error.message.contains("management API down"));

    let engine_id = result.engine_id.unwrap();
    assert_eq!(mock.teardown_count(&engine_id), 5);
}

#[tokio::test(start_paused = true)]
async fn test_teardown_failure_after_success_keeps_job_completed() {
    let mock = Arc::new(MockConnection::new().fail_times(
        Operation::Teardown,
        1,
        EngineError::Transient("blip".to_string()),
    ));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Completed);
    assert_eq!(mock.teardown_count(&result.engine_id.unwrap()), 2);
    assert!(mock.live_engines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_job_still_tears_down_engine() {
    let mock = Arc::new(MockConnection::new().never_completing());
    let orchestrator = Arc::new(orchestrator(&mock));

    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_analysis(&analysis()).await })
    };
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.live_engines().len(), 1);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(mock.live_engines().is_empty());
    let engine_id = mock.deployed_handles()[0].id.clone();
    assert_eq!(mock.teardown_count(&engine_id), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_job_tears_down_engine_that_is_still_starting() {
    let mock = Arc::new(MockConnection::new().with_ready_delay(Duration::from_secs(120)));
    let orchestrator = Arc::new(orchestrator(&mock));

    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_analysis(&analysis()).await })
    };
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.live_engines().len(), 1);
    assert_eq!(mock.call_count(Operation::Load), 0);

    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(mock.live_engines().is_empty());
    let engine_id = mock.deployed_handles()[0].id.clone();
    assert_eq!(mock.teardown_count(&engine_id), 1);
}

// ============================================================================
// Retries
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_error_recovers_on_third_attempt() {
    let mock = Arc::new(MockConnection::new().fail_times(
        Operation::Load,
        2,
        EngineError::Transient("connection reset".to_string()),
    ));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Completed);
    assert_eq!(mock.call_count(Operation::Load), 3);
    assert_eq!(result.retry_count, 2);
    // Retries stay inside the stage.
    assert_eq!(mock.call_count(Operation::Deploy), 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_exhaust_after_max_attempts() {
    let mock = Arc::new(MockConnection::new().fail_always(
        Operation::Run,
        EngineError::Transient("503 from engine".to_string()),
    ));
    let started = Instant::now();
    let result = orchestrator_with(&mock, deterministic_retry())
        .run_analysis(&analysis())
        .await
        .unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    assert_eq!(mock.call_count(Operation::Run), 5);
    assert_eq!(result.retry_count, 4);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Transient);
    assert!(error.message.contains("5 attempt(s)"));

    // 2s + 4s + 8s + 16s of backoff.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(30), "{:?}", elapsed);
    assert!(elapsed < Duration::from_secs(31), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_is_not_retried() {
    let mock = Arc::new(MockConnection::new().fail_always(
        Operation::Load,
        EngineError::NotFound("collection users".to_string()),
    ));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    assert_eq!(mock.call_count(Operation::Load), 1);
    assert_eq!(result.error.unwrap().kind, ErrorKind::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_auth_error_reauthenticates_once() {
    let mock = Arc::new(MockConnection::new().fail_times(
        Operation::Load,
        1,
        EngineError::Auth("token expired".to_string()),
    ));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Completed);
    assert_eq!(mock.call_count(Operation::Reauthenticate), 1);
    assert_eq!(mock.call_count(Operation::Load), 2);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_auth_error_fails_job() {
    let mock = Arc::new(MockConnection::new().fail_always(
        Operation::Load,
        EngineError::Auth("key revoked".to_string()),
    ));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    assert_eq!(result.error.unwrap().kind, ErrorKind::Auth);
    assert_eq!(mock.call_count(Operation::Reauthenticate), 1);
    assert_eq!(mock.call_count(Operation::Load), 2);
    assert!(mock.live_engines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_deploy_is_torn_down_before_retry() {
    let mock = Arc::new(
        MockConnection::new()
            .with_partial_deploy_failure(EngineError::Transient("engine never started".into())),
    );
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Completed);
    let deployed = mock.deployed_handles();
    assert_eq!(deployed.len(), 2);
    assert_eq!(mock.teardown_count(&deployed[0].id), 1);
    assert_eq!(mock.teardown_count(&deployed[1].id), 1);
    assert_eq!(result.engine_id, Some(deployed[1].id.clone()));
    assert!(mock.live_engines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_partial_deploy_with_permanent_error_is_cleaned_up() {
    let mock = Arc::new(
        MockConnection::new()
            .with_partial_deploy_failure(EngineError::Fatal("engine reported failure".into())),
    );
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    assert_eq!(
        result.error.unwrap().stage,
        Some(AnalysisStatus::Deploying)
    );
    let deployed = mock.deployed_handles();
    assert_eq!(deployed.len(), 1);
    assert_eq!(mock.teardown_count(&deployed[0].id), 1);
}

// ============================================================================
// Pre-check and deadlines
// ============================================================================

fn running_engine() -> EngineSummary {
    EngineSummary {
        id: "old-engine".to_string(),
        size: Some("e8".to_string()),
        status: Some("running".to_string()),
    }
}

#[tokio::test(start_paused = true)]
async fn test_existing_engines_warn_by_default() {
    let mock = Arc::new(MockConnection::new().with_running_engines(vec![running_engine()]));
    let result = orchestrator(&mock).run_analysis(&analysis()).await.unwrap();
    assert_eq!(result.status, AnalysisStatus::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_existing_engines_abort_policy() {
    let mock = Arc::new(MockConnection::new().with_running_engines(vec![running_engine()]));
    let config =
        OrchestratorConfig::default().with_existing_engines(ExistingEnginePolicy::Abort);
    let result = orchestrator_with(&mock, config)
        .run_analysis(&analysis())
        .await
        .unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.stage, Some(AnalysisStatus::Deploying));
    assert!(error.message.contains("old-engine"));
    assert_eq!(mock.call_count(Operation::Deploy), 0);
}

#[tokio::test(start_paused = true)]
async fn test_job_deadline_fails_and_cleans_up() {
    let mock = Arc::new(MockConnection::new().never_completing());
    let config = analysis().with_timeout(Duration::from_secs(60));
    let started = Instant::now();
    let result = orchestrator(&mock).run_analysis(&config).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::DeadlineExceeded);
    assert_eq!(error.stage, Some(AnalysisStatus::Loading));
    assert!(started.elapsed() <= Duration::from_secs(61));
    assert!(mock.live_engines().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_deadline_while_engine_starts_tears_it_down() {
    let mock = Arc::new(MockConnection::new().with_ready_delay(Duration::from_secs(120)));
    let config = analysis().with_timeout(Duration::from_secs(30));
    let started = Instant::now();
    let result = orchestrator(&mock).run_analysis(&config).await.unwrap();

    assert_eq!(result.status, AnalysisStatus::Failed);
    let error = result.error.unwrap();
    assert_eq!(error.kind, ErrorKind::DeadlineExceeded);
    assert_eq!(error.stage, Some(AnalysisStatus::Deploying));
    assert!(started.elapsed() < Duration::from_secs(31));

    let deployed = mock.deployed_handles();
    assert_eq!(deployed.len(), 1);
    assert_eq!(result.engine_id, Some(deployed[0].id.clone()));
    assert_eq!(mock.teardown_count(&deployed[0].id), 1);
    assert!(mock.live_engines().is_empty());
    assert_eq!(mock.call_count(Operation::Load), 0);
}

#[tokio::test(start_paused = true)]
async fn test_caller_deadline_applies() {
    let mock = Arc::new(MockConnection::new().never_completing());
    let deadline = Instant::now() + Duration::from_secs(30);
    let result = orchestrator(&mock)
        .run_analysis_until(&analysis(), deadline)
        .await
        .unwrap();

    assert_eq!(result.error.unwrap().kind, ErrorKind::DeadlineExceeded);
    assert!(mock.live_engines().is_empty());
}

// ============================================================================
// Pre-flight rejection
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_invalid_config_rejected_before_network() {
    let mock = Arc::new(MockConnection::new());
    let config = AnalysisConfig::new("empty", Algorithm::Wcc).with_edge_collections(["follows"]);
    let err = orchestrator(&mock).run_analysis(&config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(err.to_string().contains("vertex_collections"));
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_parameter_rejected() {
    let mock = Arc::new(MockConnection::new());
    let config = analysis().with_param("dampening", 0.9);
    let err = orchestrator(&mock).run_analysis(&config).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(mock.calls().is_empty());
}

#[test]
fn test_invalid_orchestrator_config_rejected() {
    let mock: Arc<MockConnection> = Arc::new(MockConnection::new());
    let config =
        OrchestratorConfig::default().with_retry(RetryPolicy::new(Duration::from_secs(1), 0));
    assert!(WorkflowOrchestrator::new(mock, config).is_err());
}
