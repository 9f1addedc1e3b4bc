// SPDX-License-Identifier: MIT

//! Concrete [`LockStore`]/[`StepDispatch`] implementations wrapping
//! [`StateStore`]/[`StepRegistry`]. Kept in the runner crate, not the
//! registry crate, to avoid a circular dependency (registry is a
//! dependency of state and steps, not the other way around).

use aetherflow_core::Clock;
use aetherflow_registry::{StepContext, StepDispatch, StepError, StepOutcome, StepRegistry};
use aetherflow_state::StateStore;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub struct StateLockStore {
    state: Arc<StateStore>,
    clock: Arc<dyn Clock>,
}

impl StateLockStore {
    pub fn new(state: Arc<StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { state, clock }
    }
}

impl aetherflow_registry::LockStore for StateLockStore {
    fn try_acquire_lock(&self, lock_key: &str, owner: &str, ttl_seconds: u64) -> Result<bool, StepError> {
        self.state
            .try_acquire_lock(lock_key, owner, ttl_seconds, self.clock.epoch_ms())
            .map_err(|source| StepError::Failed(source.to_string()))
    }

    fn release_lock(&self, lock_key: &str, owner: &str) -> Result<(), StepError> {
        self.state
            .release_lock(lock_key, owner)
            .map_err(|source| StepError::Failed(source.to_string()))
    }
}

pub struct RegistryDispatch {
    registry: Arc<StepRegistry>,
}

impl RegistryDispatch {
    pub fn new(registry: Arc<StepRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl StepDispatch for RegistryDispatch {
    async fn run_step(&self, step_type: &str, inputs: &Value, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let step = self.registry.get(step_type)?;
        step.run(inputs, ctx).await
    }
}
