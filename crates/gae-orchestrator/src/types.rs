// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared types for engine operations and analysis results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, ErrorKind};

// ============================================================================
// Algorithms
// ============================================================================

/// Graph algorithm executed by the remote engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[serde(rename = "pagerank", alias = "page_rank")]
    PageRank,
    Wcc,
    Scc,
    LabelPropagation,
    #[serde(rename = "betweenness", alias = "betweenness_centrality")]
    BetweennessCentrality,
}

/// Expected JSON type of an algorithm parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Number strictly between 0 and 1.
    Fraction,
    /// Integer greater than zero.
    PositiveInteger,
    Bool,
    String,
}

/// A parameter recognized by an algorithm.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

const PAGERANK_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "damping_factor",
        kind: ParamKind::Fraction,
    },
    ParamSpec {
        name: "maximum_supersteps",
        kind: ParamKind::PositiveInteger,
    },
];

const LABEL_PROPAGATION_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "start_label_attribute",
        kind: ParamKind::String,
    },
    ParamSpec {
        name: "synchronous",
        kind: ParamKind::Bool,
    },
    ParamSpec {
        name: "random_tiebreak",
        kind: ParamKind::Bool,
    },
    ParamSpec {
        name: "maximum_supersteps",
        kind: ParamKind::PositiveInteger,
    },
];

const BETWEENNESS_PARAMS: &[ParamSpec] = &[ParamSpec {
    name: "maximum_supersteps",
    kind: ParamKind::PositiveInteger,
}];

impl Algorithm {
    /// Identifier used in configuration files and default result fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::PageRank => "pagerank",
            Algorithm::Wcc => "wcc",
            Algorithm::Scc => "scc",
            Algorithm::LabelPropagation => "label_propagation",
            Algorithm::BetweennessCentrality => "betweenness",
        }
    }

    /// Engine API path that starts this algorithm.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Algorithm::PageRank => "v1/pagerank",
            Algorithm::Wcc => "v1/wcc",
            Algorithm::Scc => "v1/scc",
            Algorithm::LabelPropagation => "v1/labelpropagation",
            Algorithm::BetweennessCentrality => "v1/betweennesscentrality",
        }
    }

    /// Parameters this algorithm accepts.
    pub fn recognized_params(&self) -> &'static [ParamSpec] {
        match self {
            Algorithm::PageRank => PAGERANK_PARAMS,
            Algorithm::Wcc | Algorithm::Scc => &[],
            Algorithm::LabelPropagation => LABEL_PROPAGATION_PARAMS,
            Algorithm::BetweennessCentrality => BETWEENNESS_PARAMS,
        }
    }

    /// Default parameter values sent when the caller does not override them.
    pub fn default_params(&self) -> serde_json::Map<String, Value> {
        let mut params = serde_json::Map::new();
        match self {
            Algorithm::PageRank => {
                params.insert("damping_factor".into(), Value::from(0.85));
                params.insert("maximum_supersteps".into(), Value::from(100));
            }
            Algorithm::LabelPropagation => {
                params.insert("start_label_attribute".into(), Value::from("_key"));
                params.insert("synchronous".into(), Value::from(false));
                params.insert("random_tiebreak".into(), Value::from(false));
                params.insert("maximum_supersteps".into(), Value::from(100));
            }
            Algorithm::BetweennessCentrality => {
                params.insert("maximum_supersteps".into(), Value::from(100));
            }
            Algorithm::Wcc | Algorithm::Scc => {}
        }
        params
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pagerank" | "page_rank" => Ok(Algorithm::PageRank),
            "wcc" => Ok(Algorithm::Wcc),
            "scc" => Ok(Algorithm::Scc),
            "label_propagation" | "labelpropagation" => Ok(Algorithm::LabelPropagation),
            "betweenness" | "betweenness_centrality" => Ok(Algorithm::BetweennessCentrality),
            other => Err(format!("unsupported algorithm: {}", other)),
        }
    }
}

// ============================================================================
// Engine sizing
// ============================================================================

/// Engine size on managed deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineSize {
    E4,
    E8,
    #[default]
    E16,
    E32,
    E64,
    E128,
}

impl EngineSize {
    pub const ALL: [EngineSize; 6] = [
        EngineSize::E4,
        EngineSize::E8,
        EngineSize::E16,
        EngineSize::E32,
        EngineSize::E64,
        EngineSize::E128,
    ];

    /// Size identifier as used by the management API.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineSize::E4 => "e4",
            EngineSize::E8 => "e8",
            EngineSize::E16 => "e16",
            EngineSize::E32 => "e32",
            EngineSize::E64 => "e64",
            EngineSize::E128 => "e128",
        }
    }
}

impl fmt::Display for EngineSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineSize {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EngineSize::ALL
            .into_iter()
            .find(|size| size.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EngineError::Fatal(format!("unknown engine size: {}", s)))
    }
}

// ============================================================================
// Engine handles and jobs
// ============================================================================

/// A deployed engine, owned by exactly one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineHandle {
    /// Backend identifier (engine id or service id).
    pub id: String,
    /// Base URL of the engine API. Empty if the engine never became reachable.
    pub endpoint: String,
    /// Size the engine was deployed with, when the backend honors sizing.
    pub size: Option<EngineSize>,
}

impl EngineHandle {
    pub fn new(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint: endpoint.into(),
            size: None,
        }
    }

    pub fn with_size(mut self, size: EngineSize) -> Self {
        self.size = Some(size);
        self
    }
}

/// An engine found running before deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSummary {
    pub id: String,
    pub size: Option<String>,
    pub status: Option<String>,
}

impl fmt::Display for EngineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.id,
            self.size.as_deref().unwrap_or("unknown size")
        )
    }
}

/// Identifier of an asynchronous engine job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobToken(pub String);

impl JobToken {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Graph ingestion request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadRequest {
    pub database: String,
    pub vertex_collections: Vec<String>,
    pub edge_collections: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertex_attributes: Option<Vec<String>>,
}

/// A submitted graph load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedGraph {
    /// Job to poll for ingestion progress.
    pub job: JobToken,
    /// Graph the engine will hold once loading completes.
    pub graph_id: String,
}

/// Vertex and edge counts of a loaded graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraphInfo {
    pub vertex_count: u64,
    pub edge_count: u64,
}

/// Request to write algorithm results back to the database.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreRequest {
    pub database: String,
    pub target_collection: String,
    pub job_ids: Vec<String>,
    pub attribute_names: Vec<String>,
    pub parallelism: u32,
    pub batch_size: u32,
}

// ============================================================================
// Job status
// ============================================================================

const COMPLETED_STATES: &[&str] = &["done", "finished", "completed", "succeeded"];
const FAILED_STATES: &[&str] = &["failed", "error"];

/// Normalized state of an engine job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Running {
        progress: Option<u64>,
        total: Option<u64>,
    },
    Succeeded {
        progress: Option<u64>,
        total: Option<u64>,
        execution_time_ms: Option<u64>,
    },
    Failed {
        message: String,
    },
}

impl JobStatus {
    /// Normalize a job response.
    ///
    /// The engine reports job state in one of three shapes:
    /// - `{"progress": p, "total": t, "error": bool}`
    /// - `{"status": "succeeded" | "failed" | ...}`
    /// - `{"state": "done" | ...}`, possibly nested as `{"status": {"state": ...}}`
    ///
    /// Anything unrecognized counts as still running.
    pub fn from_response(job: &Value) -> Self {
        let progress = job.get("progress").and_then(Value::as_u64);
        let total = job.get("total").and_then(Value::as_u64);
        let execution_time_ms = job
            .pointer("/statistics/execution_time_ms")
            .and_then(Value::as_f64)
            .map(|ms| ms as u64);

        if let (Some(done), Some(all)) = (progress, total) {
            if job.get("error").and_then(Value::as_bool).unwrap_or(false) {
                return JobStatus::Failed {
                    message: error_text(job),
                };
            }
            if all > 0 && done >= all {
                return JobStatus::Succeeded {
                    progress,
                    total,
                    execution_time_ms,
                };
            }
            return JobStatus::Running { progress, total };
        }

        let state = job
            .get("status")
            .and_then(Value::as_str)
            .or_else(|| job.pointer("/status/state").and_then(Value::as_str))
            .or_else(|| job.get("state").and_then(Value::as_str))
            .map(str::to_ascii_lowercase);

        match state.as_deref() {
            Some(s) if COMPLETED_STATES.contains(&s) => JobStatus::Succeeded {
                progress,
                total,
                execution_time_ms,
            },
            Some(s) if FAILED_STATES.contains(&s) => JobStatus::Failed {
                message: error_text(job),
            },
            _ => JobStatus::Running { progress, total },
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running { .. })
    }
}

fn error_text(job: &Value) -> String {
    ["/error_message", "/errorMessage", "/error", "/status/error"]
        .iter()
        .find_map(|ptr| job.pointer(ptr).and_then(Value::as_str))
        .unwrap_or("Unknown error")
        .to_string()
}

/// Extract a job id from a submission response (`job_id` or `id`, string or number).
pub(crate) fn job_id_of(response: &Value) -> Option<String> {
    ["job_id", "id"].iter().find_map(|key| match response.get(*key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

// ============================================================================
// Analysis lifecycle and results
// ============================================================================

/// Lifecycle stage of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Deploying,
    Loading,
    Running,
    Storing,
    CleaningUp,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AnalysisStatus::Pending => "Pending",
            AnalysisStatus::Deploying => "Deploying",
            AnalysisStatus::Loading => "Loading",
            AnalysisStatus::Running => "Running",
            AnalysisStatus::Storing => "Storing",
            AnalysisStatus::CleaningUp => "CleaningUp",
            AnalysisStatus::Completed => "Completed",
            AnalysisStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Stage that failed; `None` for rejections before the job started.
    pub stage: Option<AnalysisStatus>,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of one analysis job. Created once, at the terminal transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub run_id: Uuid,
    pub name: String,
    pub algorithm: Algorithm,
    /// Completed or Failed.
    pub status: AnalysisStatus,
    pub engine_id: Option<String>,
    pub graph_id: Option<String>,
    pub job_id: Option<String>,
    pub vertex_count: u64,
    pub edge_count: u64,
    pub documents_updated: u64,
    /// `None` on self-managed deployments.
    pub estimated_cost_usd: Option<f64>,
    pub engine_runtime_seconds: f64,
    pub duration_seconds: f64,
    /// Retries performed across all stages.
    pub retry_count: u32,
    /// Stage-entry events, in order.
    pub stage_history: Vec<AnalysisStatus>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Present iff `status` is Failed.
    pub error: Option<JobError>,
}

impl AnalysisResult {
    /// A Failed result for a job that never started.
    pub fn rejected(
        name: impl Into<String>,
        algorithm: Algorithm,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            name: name.into(),
            algorithm,
            status: AnalysisStatus::Failed,
            engine_id: None,
            graph_id: None,
            job_id: None,
            vertex_count: 0,
            edge_count: 0,
            documents_updated: 0,
            estimated_cost_usd: None,
            engine_runtime_seconds: 0.0,
            duration_seconds: 0.0,
            retry_count: 0,
            stage_history: Vec::new(),
            started_at: now,
            finished_at: now,
            error: Some(JobError {
                stage: None,
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == AnalysisStatus::Completed
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Analysis: {}", self.name),
            format!("Status: {}", self.status),
            format!("Algorithm: {}", self.algorithm),
            format!("Duration: {:.1}s", self.duration_seconds),
        ];
        if self.vertex_count > 0 {
            lines.push(format!(
                "Graph: {} vertices, {} edges",
                self.vertex_count, self.edge_count
            ));
        }
        if self.documents_updated > 0 {
            lines.push(format!(
                "Results: {} documents updated",
                self.documents_updated
            ));
        }
        if let Some(cost) = self.estimated_cost_usd {
            lines.push(format!(
                "Cost: ${:.4} ({:.1}s engine runtime)",
                cost, self.engine_runtime_seconds
            ));
        }
        if let Some(error) = &self.error {
            lines.push(format!("Error: {}", error));
        }
        lines.join("\n")
    }
}
