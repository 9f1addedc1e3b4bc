// SPDX-License-Identifier: MIT

//! The `Connector` abstraction and its name-keyed factory registry
//! (spec.md §4.4, §9 "Dynamic dispatch by string name").

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no connector registered for kind `{kind}` driver `{driver}`")]
    UnknownConnector { kind: String, driver: String },
    #[error("no step implementation registered for type `{0}`")]
    UnknownStep(String),
    #[error("connector `{kind}`/`{driver}` failed to build: {reason}")]
    ConnectorBuild {
        kind: String,
        driver: String,
        reason: String,
    },
}

/// A live handle to an external resource, produced once per
/// `ResourceSpec` by the matching [`ConnectorFactory`] and shared by
/// every step that references it (spec.md §4.4).
pub trait Connector: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Narrow to a concrete connector type. Steps call this after
    /// looking the connector up by resource name.
    fn as_any(&self) -> &dyn Any;
}

/// Builds a [`Connector`] from a resource's rendered `config`/`options`
/// values. Registered under `(kind, driver)`.
pub trait ConnectorFactory: Send + Sync {
    fn build(
        &self,
        config: &serde_json::Value,
        options: &serde_json::Value,
    ) -> Result<Arc<dyn Connector>, RegistryError>;
}

#[derive(Default)]
pub struct ConnectorRegistry {
    factories: HashMap<(String, String), Arc<dyn ConnectorFactory>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        kind: impl Into<String>,
        driver: impl Into<String>,
        factory: Arc<dyn ConnectorFactory>,
    ) {
        self.factories.insert((kind.into(), driver.into()), factory);
    }

    pub fn build(
        &self,
        kind: &str,
        driver: &str,
        config: &serde_json::Value,
        options: &serde_json::Value,
    ) -> Result<Arc<dyn Connector>, RegistryError> {
        let factory =
            self.factories
                .get(&(kind.to_string(), driver.to_string()))
                .ok_or_else(|| RegistryError::UnknownConnector {
                    kind: kind.to_string(),
                    driver: driver.to_string(),
                })?;
        factory.build(config, options)
    }
}
