// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Batch execution of analysis jobs.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::analysis::AnalysisConfig;
use crate::error::ErrorKind;
use crate::orchestrator::WorkflowOrchestrator;
use crate::types::{AnalysisResult, AnalysisStatus};

/// Runs a sequence of analyses, one result per input, in input order.
///
/// Every job runs as its own task; a rejected configuration, a failed
/// job, or a panicking task only produces a Failed result for that job.
pub struct BatchRunner {
    orchestrator: Arc<WorkflowOrchestrator>,
    parallelism: usize,
}

impl BatchRunner {
    /// A sequential runner.
    pub fn new(orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self {
            orchestrator,
            parallelism: 1,
        }
    }

    /// Run up to `parallelism` jobs at once. Zero is treated as one.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub async fn run_batch(&self, configs: &[AnalysisConfig]) -> Vec<AnalysisResult> {
        info!(
            jobs = configs.len(),
            parallelism = self.parallelism,
            "Starting batch"
        );

        let results: Vec<AnalysisResult> = stream::iter(configs.iter().cloned().enumerate())
            .map(|(index, config)| {
                let orchestrator = self.orchestrator.clone();
                async move {
                    let name = config.name.clone();
                    let algorithm = config.algorithm;
                    let task =
                        tokio::spawn(async move { orchestrator.run_analysis(&config).await });
                    match task.await {
                        Ok(Ok(result)) => result,
                        Ok(Err(e)) => {
                            warn!(index, analysis = %name, error = %e, "Analysis rejected");
                            AnalysisResult::rejected(name, algorithm, e.kind(), e.to_string())
                        }
                        Err(e) => {
                            error!(index, analysis = %name, error = %e, "Analysis task crashed");
                            AnalysisResult::rejected(
                                name,
                                algorithm,
                                ErrorKind::Internal,
                                format!("analysis task failed: {}", e),
                            )
                        }
                    }
                }
            })
            .buffered(self.parallelism)
            .collect()
            .await;

        let summary = BatchSummary::from_results(&results);
        info!(
            total = summary.total,
            completed = summary.completed,
            failed = summary.failed,
            "Batch finished"
        );
        results
    }
}

/// Overall outcome of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchOutcome {
    AllCompleted,
    PartialFailure,
    AllFailed,
}

impl BatchOutcome {
    /// Process exit code: 0 all completed, 1 some failed, 2 all failed.
    pub fn exit_code(&self) -> u8 {
        match self {
            BatchOutcome::AllCompleted => 0,
            BatchOutcome::PartialFailure => 1,
            BatchOutcome::AllFailed => 2,
        }
    }
}

/// Aggregate view over batch results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub documents_updated: u64,
    /// `None` when no job carried a cost.
    pub total_cost_usd: Option<f64>,
    pub total_duration_seconds: f64,
}

impl BatchSummary {
    pub fn from_results(results: &[AnalysisResult]) -> Self {
        let completed = results
            .iter()
            .filter(|r| r.status == AnalysisStatus::Completed)
            .count();
        let costs: Vec<f64> = results.iter().filter_map(|r| r.estimated_cost_usd).collect();
        Self {
            total: results.len(),
            completed,
            failed: results.len() - completed,
            documents_updated: results.iter().map(|r| r.documents_updated).sum(),
            total_cost_usd: (!costs.is_empty()).then(|| costs.iter().sum()),
            total_duration_seconds: results.iter().map(|r| r.duration_seconds).sum(),
        }
    }

    pub fn outcome(&self) -> BatchOutcome {
        if self.failed == 0 {
            BatchOutcome::AllCompleted
        } else if self.completed == 0 {
            BatchOutcome::AllFailed
        } else {
            BatchOutcome::PartialFailure
        }
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} analyses: {} completed, {} failed, {} documents updated, {:.1}s total",
            self.total,
            self.completed,
            self.failed,
            self.documents_updated,
            self.total_duration_seconds
        )?;
        if let Some(cost) = self.total_cost_usd {
            write!(f, ", estimated cost ${:.4}", cost)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Algorithm;

    fn completed(cost: Option<f64>) -> AnalysisResult {
        let mut result = AnalysisResult::rejected("ok", Algorithm::Wcc, ErrorKind::Fatal, "");
        result.status = AnalysisStatus::Completed;
        result.error = None;
        result.estimated_cost_usd = cost;
        result.documents_updated = 10;
        result
    }

    fn failed() -> AnalysisResult {
        AnalysisResult::rejected("bad", Algorithm::Wcc, ErrorKind::Validation, "nope")
    }

    #[test]
    fn test_outcomes() {
        assert_eq!(
            BatchSummary::from_results(&[]).outcome(),
            BatchOutcome::AllCompleted
        );
        assert_eq!(
            BatchSummary::from_results(&[completed(None), completed(None)]).outcome(),
            BatchOutcome::AllCompleted
        );
        assert_eq!(
            BatchSummary::from_results(&[completed(None), failed()]).outcome(),
            BatchOutcome::PartialFailure
        );
        assert_eq!(
            BatchSummary::from_results(&[failed(), failed()]).outcome(),
            BatchOutcome::AllFailed
        );
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BatchOutcome::AllCompleted.exit_code(), 0);
        assert_eq!(BatchOutcome::PartialFailure.exit_code(), 1);
        assert_eq!(BatchOutcome::AllFailed.exit_code(), 2);
    }

    #[test]
    fn test_summary_totals() {
        let summary =
            BatchSummary::from_results(&[completed(Some(0.5)), completed(Some(0.25)), failed()]);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.documents_updated, 20);
        assert_eq!(summary.total_cost_usd, Some(0.75));
        assert!(summary.to_string().contains("2 completed"));

        let uncosted = BatchSummary::from_results(&[completed(None)]);
        assert_eq!(uncosted.total_cost_usd, None);
    }
}
