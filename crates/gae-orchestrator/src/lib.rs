// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Graph Analytics Engine orchestration.
//!
//! Drives one analysis job through the lifecycle of a remote graph-analytics
//! engine and guarantees the engine is torn down on every exit path:
//!
//! ```text
//! Pending -> Deploying -> Loading -> Running -> Storing -> CleaningUp -> Completed | Failed
//! ```
//!
//! Two backends are supported, selected by [`ConnectionFactory`]:
//! - [`ManagedConnection`]: the managed platform API, authenticated with an
//!   API-key pair exchanged for a bearer token by an external command.
//! - [`SelfManagedConnection`]: an engine colocated with the database,
//!   authenticated with a JWT obtained from the database credentials.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gae_orchestrator::{
//!     Algorithm, AnalysisConfig, ConnectionFactory, ConnectionSettings, OrchestratorConfig,
//!     WorkflowOrchestrator,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ConnectionSettings::from_env()?;
//! let connection = ConnectionFactory::create(&settings)?;
//! let orchestrator = WorkflowOrchestrator::new(connection, OrchestratorConfig::default())?;
//!
//! let config = AnalysisConfig::new("product_demand", Algorithm::PageRank)
//!     .with_vertex_collections(["users", "products"])
//!     .with_edge_collections(["interactions"])
//!     .with_result_field("pagerank_score");
//!
//! let result = orchestrator.run_analysis(&config).await?;
//! println!("{}", result.summary());
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod batch;
pub mod config;
pub mod connection;
pub mod cost;
pub mod error;
pub mod factory;
pub mod orchestrator;
pub mod retry;
pub mod types;

pub use analysis::{AlgorithmParams, AnalysisConfig, AnalysisPlan};
pub use batch::{BatchOutcome, BatchRunner, BatchSummary};
pub use config::{
    ConnectionOptions, ConnectionSettings, DeploymentMode, ExistingEnginePolicy,
    OrchestratorConfig,
};
pub use connection::{
    CommandTokenIssuer, DeployError, EngineConnection, IssuedToken, JwtTokenSource,
    ManagedConnection, MockConnection, MockJob, Operation, SelfManagedConnection,
    StaticTokenSource, TokenCache, TokenSource,
};
pub use cost::CostModel;
pub use error::{ConfigError, EngineError, Error, ErrorKind, Result, StageError};
pub use factory::ConnectionFactory;
pub use orchestrator::WorkflowOrchestrator;
pub use retry::{ErrorClass, RetryBudget, RetryDecision, RetryPolicy};
pub use types::{
    Algorithm, AnalysisResult, AnalysisStatus, EngineHandle, EngineSize, EngineSummary,
    GraphInfo, JobError, JobStatus, JobToken, LoadRequest, LoadedGraph, StoreRequest,
};
