// SPDX-License-Identifier: MIT

//! The `Step` abstraction and its name-keyed registry (spec.md §4.5,
//! §9 "Dynamic dispatch by string name").

use crate::connector::{Connector, RegistryError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Live connector handles available to a running step, keyed by
/// resource name (spec.md §4.4).
pub type ResourceBag = HashMap<String, Arc<dyn Connector>>;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("step failed: {0}")]
    Failed(String),
    #[error("step timed out after {timeout_seconds}s (attempts={attempts})")]
    TimedOut { timeout_seconds: u64, attempts: u32 },
    #[error("step resource `{0}` was not found among the job's available resources")]
    MissingResource(String),
    #[error("step input `{0}` could not be rendered: {1}")]
    InvalidInput(String, String),
    #[error("failed to acquire lock `{0}`")]
    LockAcquisitionFailed(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// The result of a successful step execution. `output` becomes the
/// `result` root available to the step's `outputs` templates
/// (spec.md §3 `StepSpec.outputs`).
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub output: Value,
    pub exit_code: Option<i32>,
}

/// Non-blocking lock operations a step needs (`with_lock`, spec.md
/// §4.6). Kept abstract here so the registry crate does not depend on
/// the SQLite state store.
pub trait LockStore: Send + Sync {
    fn try_acquire_lock(&self, lock_key: &str, owner: &str, ttl_seconds: u64) -> Result<bool, StepError>;
    fn release_lock(&self, lock_key: &str, owner: &str) -> Result<(), StepError>;
}

/// Lets a step (`with_lock`) recursively invoke another registered
/// step by type name, the same way the runner would.
#[async_trait]
pub trait StepDispatch: Send + Sync {
    async fn run_step(
        &self,
        step_type: &str,
        inputs: &Value,
        ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, StepError>;
}

/// Everything a running step may need beyond its own rendered inputs.
pub struct StepContext<'a> {
    pub flow_id: &'a str,
    pub run_id: &'a str,
    pub resources: &'a ResourceBag,
    pub locks: &'a dyn LockStore,
    pub dispatch: &'a dyn StepDispatch,
    /// `<work_root>/<flow_id>/<job_id>/<run_id>/artifacts` (spec.md §3,
    /// §4.7's "`cwd`: resolved relative to the job artifacts directory
    /// if not absolute"). Created by the runner before the step runs.
    pub artifacts_dir: PathBuf,
}

/// One unit of executable step behavior. Implementations are
/// registered under the flow's `type` string (e.g. `external.process`)
/// and invoked by name — the engine never matches on a closed enum of
/// step kinds (spec.md §9).
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, inputs: &Value, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError>;
}

#[derive(Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, step_type: impl Into<String>, step: Arc<dyn Step>) {
        self.steps.insert(step_type.into(), step);
    }

    pub fn get(&self, step_type: &str) -> Result<Arc<dyn Step>, RegistryError> {
        self.steps
            .get(step_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownStep(step_type.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoStep;

    #[async_trait]
    impl Step for EchoStep {
        async fn run(&self, inputs: &Value, _ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
            Ok(StepOutcome {
                output: inputs.clone(),
                exit_code: Some(0),
            })
        }
    }

    struct NoLocks;
    impl LockStore for NoLocks {
        fn try_acquire_lock(&self, _lock_key: &str, _owner: &str, _ttl_seconds: u64) -> Result<bool, StepError> {
            Ok(true)
        }
        fn release_lock(&self, _lock_key: &str, _owner: &str) -> Result<(), StepError> {
            Ok(())
        }
    }

    struct NoDispatch;
    #[async_trait]
    impl StepDispatch for NoDispatch {
        async fn run_step(
            &self,
            _step_type: &str,
            _inputs: &Value,
            _ctx: &StepContext<'_>,
        ) -> Result<StepOutcome, StepError> {
            Err(StepError::Failed("no nested dispatch in this test".to_string()))
        }
    }

    #[tokio::test]
    async fn registered_step_runs_by_name() {
        let mut registry = StepRegistry::new();
        registry.register("echo", Arc::new(EchoStep));
        let step = registry.get("echo").unwrap();
        let resources = ResourceBag::new();
        let locks = NoLocks;
        let dispatch = NoDispatch;
        let ctx = StepContext {
            flow_id: "f1",
            run_id: "r1",
            resources: &resources,
            locks: &locks,
            dispatch: &dispatch,
            artifacts_dir: PathBuf::from("/tmp/aetherflow-registry-tests/artifacts"),
        };
        let outcome = step.run(&serde_json::json!({"x": 1}), &ctx).await.unwrap();
        assert_eq!(outcome.output, serde_json::json!({"x": 1}));
    }

    #[test]
    fn unregistered_step_type_is_rejected() {
        let registry = StepRegistry::new();
        assert!(matches!(registry.get("missing"), Err(RegistryError::UnknownStep(_))));
    }
}
