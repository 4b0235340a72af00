// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Analysis job configuration and pre-flight validation.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{Algorithm, EngineSize, ParamKind};

/// Algorithm parameters as supplied by the caller.
pub type AlgorithmParams = BTreeMap<String, Value>;

/// Default collection receiving algorithm results.
pub const DEFAULT_TARGET_COLLECTION: &str = "graph_analysis_results";

/// Default engine type requested on deployment.
pub const DEFAULT_ENGINE_TYPE: &str = "gral";

fn default_target_collection() -> String {
    DEFAULT_TARGET_COLLECTION.to_string()
}

fn default_engine_type() -> String {
    DEFAULT_ENGINE_TYPE.to_string()
}

/// Configuration of one analysis job. Never mutated by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub vertex_collections: Vec<String>,
    pub edge_collections: Vec<String>,
    /// Vertex attributes to load; all attributes when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertex_attributes: Option<Vec<String>>,
    pub algorithm: Algorithm,
    #[serde(default, alias = "algorithm_params")]
    pub params: AlgorithmParams,
    #[serde(default)]
    pub engine_size: EngineSize,
    #[serde(default = "default_engine_type")]
    pub engine_type: String,
    /// Overrides the connection's database.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default = "default_target_collection")]
    pub target_collection: String,
    /// Defaults to `<algorithm>_<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_field: Option<String>,
    /// Per-job deadline; the orchestrator default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl AnalysisConfig {
    /// Create a configuration with defaults and no collections.
    pub fn new(name: impl Into<String>, algorithm: Algorithm) -> Self {
        Self {
            name: name.into(),
            description: None,
            vertex_collections: Vec::new(),
            edge_collections: Vec::new(),
            vertex_attributes: None,
            algorithm,
            params: AlgorithmParams::new(),
            engine_size: EngineSize::default(),
            engine_type: default_engine_type(),
            database: None,
            target_collection: default_target_collection(),
            result_field: None,
            timeout_seconds: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_vertex_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vertex_collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_edge_collections<I, S>(mut self, collections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.edge_collections = collections.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_vertex_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vertex_attributes = Some(attributes.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_engine_size(mut self, size: EngineSize) -> Self {
        self.engine_size = size;
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn with_target_collection(mut self, collection: impl Into<String>) -> Self {
        self.target_collection = collection.into();
        self
    }

    pub fn with_result_field(mut self, field: impl Into<String>) -> Self {
        self.result_field = Some(field.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = Some(timeout.as_secs());
        self
    }

    /// Validate the configuration and resolve defaults.
    ///
    /// This is the only place a configuration is checked; everything after
    /// pre-flight works with the returned [`AnalysisPlan`].
    pub fn validate(&self) -> Result<AnalysisPlan> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation("analysis name must not be empty".into()));
        }
        check_collections("vertex_collections", &self.vertex_collections)?;
        check_collections("edge_collections", &self.edge_collections)?;
        if self.target_collection.trim().is_empty() {
            return Err(Error::Validation(
                "target_collection must not be empty".into(),
            ));
        }
        if self.engine_type.trim().is_empty() {
            return Err(Error::Validation("engine_type must not be empty".into()));
        }
        if let Some(field) = &self.result_field
            && field.trim().is_empty()
        {
            return Err(Error::Validation("result_field must not be empty".into()));
        }
        if self.timeout_seconds == Some(0) {
            return Err(Error::Validation(
                "timeout_seconds must be greater than zero".into(),
            ));
        }

        let params = resolve_params(self.algorithm, &self.params)?;
        let result_field = self
            .result_field
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.algorithm.as_str(), self.name));

        Ok(AnalysisPlan {
            name: self.name.clone(),
            algorithm: self.algorithm,
            params,
            vertex_collections: self.vertex_collections.clone(),
            edge_collections: self.edge_collections.clone(),
            vertex_attributes: self.vertex_attributes.clone(),
            engine_size: self.engine_size,
            engine_type: self.engine_type.clone(),
            database: self.database.clone(),
            target_collection: self.target_collection.clone(),
            result_field,
            timeout: self.timeout_seconds.map(Duration::from_secs),
        })
    }
}

/// A validated configuration with every default resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisPlan {
    pub name: String,
    pub algorithm: Algorithm,
    /// Caller overrides merged over the algorithm defaults.
    pub params: serde_json::Map<String, Value>,
    pub vertex_collections: Vec<String>,
    pub edge_collections: Vec<String>,
    pub vertex_attributes: Option<Vec<String>>,
    pub engine_size: EngineSize,
    pub engine_type: String,
    pub database: Option<String>,
    pub target_collection: String,
    pub result_field: String,
    pub timeout: Option<Duration>,
}

fn check_collections(field: &str, collections: &[String]) -> Result<()> {
    if collections.is_empty() {
        return Err(Error::Validation(format!(
            "{} must contain at least one collection",
            field
        )));
    }
    if collections.iter().any(|c| c.trim().is_empty()) {
        return Err(Error::Validation(format!(
            "{} contains an empty collection name",
            field
        )));
    }
    Ok(())
}

fn resolve_params(
    algorithm: Algorithm,
    supplied: &AlgorithmParams,
) -> Result<serde_json::Map<String, Value>> {
    let recognized = algorithm.recognized_params();
    let mut params = algorithm.default_params();

    for (key, value) in supplied {
        let Some(spec) = recognized.iter().find(|p| p.name == key) else {
            let allowed: Vec<&str> = recognized.iter().map(|p| p.name).collect();
            return Err(Error::Validation(format!(
                "unsupported parameter '{}' for {} (recognized: [{}])",
                key,
                algorithm,
                allowed.join(", ")
            )));
        };

        let ok = match spec.kind {
            ParamKind::Fraction => value.as_f64().is_some_and(|v| v > 0.0 && v < 1.0),
            ParamKind::PositiveInteger => value.as_u64().is_some_and(|v| v > 0),
            ParamKind::Bool => value.is_boolean(),
            ParamKind::String => value.as_str().is_some_and(|s| !s.is_empty()),
        };
        if !ok {
            return Err(Error::Validation(format!(
                "invalid value for parameter '{}' of {}: {}",
                key, algorithm, value
            )));
        }
        params.insert(key.clone(), value.clone());
    }

    Ok(params)
}
