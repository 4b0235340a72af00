// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Connection selection from settings.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{ConnectionSettings, DeploymentMode};
use crate::connection::{EngineConnection, ManagedConnection, SelfManagedConnection};
use crate::error::ConfigError;

/// Builds the connection variant named by the settings' deployment mode.
pub struct ConnectionFactory;

impl ConnectionFactory {
    /// Select and construct a connection. Performs no network I/O.
    ///
    /// Fails if the deployment mode is unknown or a credential the mode
    /// requires is missing.
    pub fn create(settings: &ConnectionSettings) -> Result<Arc<dyn EngineConnection>, ConfigError> {
        let mode: DeploymentMode = settings.deployment_mode.parse()?;
        for warning in settings.lint_credentials() {
            warn!(mode = %mode, "{}", warning);
        }

        let connection: Arc<dyn EngineConnection> = match mode {
            DeploymentMode::Managed => Arc::new(ManagedConnection::from_settings(settings)?),
            DeploymentMode::SelfManaged => {
                Arc::new(SelfManagedConnection::from_settings(settings)?)
            }
        };
        info!(
            mode = %mode,
            database = connection.database(),
            "Created engine connection"
        );
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConnectionSettings {
        ConnectionSettings::new()
            .with_endpoint("https://db.example.com:8529")
            .with_database("sales")
    }

    #[test]
    fn test_selects_managed() {
        let connection =
            ConnectionFactory::create(&base().with_api_key("id", "secret")).unwrap();
        assert_eq!(connection.deployment_mode(), DeploymentMode::Managed);
    }

    #[test]
    fn test_selects_self_managed() {
        let connection = ConnectionFactory::create(
            &base()
                .with_deployment_mode("genai")
                .with_credentials("root", "pw"),
        )
        .unwrap();
        assert_eq!(connection.deployment_mode(), DeploymentMode::SelfManaged);
        assert_eq!(connection.database(), "sales");
    }

    #[test]
    fn test_unknown_mode() {
        let err = ConnectionFactory::create(&base().with_deployment_mode("kubernetes"))
            .err()
            .unwrap();
        assert_eq!(
            err,
            ConfigError::UnknownDeploymentMode("kubernetes".to_string())
        );
    }

    #[test]
    fn test_missing_credentials() {
        assert!(matches!(
            ConnectionFactory::create(&base()).err(),
            Some(ConfigError::MissingCredential { mode: "amp", .. })
        ));
        assert!(matches!(
            ConnectionFactory::create(&base().with_deployment_mode("self_managed")).err(),
            Some(ConfigError::MissingCredential {
                mode: "self_managed",
                credential: "ARANGO_PASSWORD"
            })
        ));
        assert!(matches!(
            ConnectionFactory::create(&ConnectionSettings::new().with_api_key("id", "secret"))
                .err(),
            Some(ConfigError::MissingCredential {
                credential: "ARANGO_ENDPOINT",
                ..
            })
        ));
    }
}
