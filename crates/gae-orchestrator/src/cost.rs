// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Engine cost estimation for managed deployments.

use crate::config::DeploymentMode;
use crate::error::EngineError;
use crate::types::EngineSize;

/// Hourly engine rates in USD.
#[derive(Debug, Clone, Copy, Default)]
pub struct CostModel;

impl CostModel {
    /// USD per hour for an engine size.
    pub fn hourly_rate(size: EngineSize) -> f64 {
        match size {
            EngineSize::E4 => 0.20,
            EngineSize::E8 => 0.30,
            EngineSize::E16 => 0.40,
            EngineSize::E32 => 0.80,
            EngineSize::E64 => 1.60,
            EngineSize::E128 => 3.20,
        }
    }

    /// Estimated cost of running an engine of `size` for `runtime_seconds`.
    pub fn estimate(size: EngineSize, runtime_seconds: f64) -> f64 {
        runtime_seconds.max(0.0) / 3600.0 * Self::hourly_rate(size)
    }

    /// Estimate from a size identifier such as `"e16"`.
    pub fn estimate_named(size: &str, runtime_seconds: f64) -> Result<f64, EngineError> {
        Ok(Self::estimate(size.parse()?, runtime_seconds))
    }

    /// Estimate for a deployment mode; `None` where engines are not billed.
    pub fn estimate_for(
        mode: DeploymentMode,
        size: EngineSize,
        runtime_seconds: f64,
    ) -> Option<f64> {
        mode.is_billed().then(|| Self::estimate(size, runtime_seconds))
    }
}
