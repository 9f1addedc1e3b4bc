// SPDX-License-Identifier: MIT

//! `with_lock` built-in: acquire a non-blocking lock, run an inline
//! inner step, release in a guaranteed region (spec.md §4.6).

use aetherflow_registry::{LockStore, Step, StepContext, StepError, StepOutcome};
use async_trait::async_trait;
use serde_json::Value;

const DEFAULT_TTL_SECONDS: u64 = 600;

struct LockGuard<'a> {
    locks: &'a dyn LockStore,
    lock_key: String,
    owner: String,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.locks.release_lock(&self.lock_key, &self.owner) {
            tracing::error!(lock_key = %self.lock_key, %err, "failed to release lock");
        }
    }
}

pub struct WithLockStep;

#[async_trait]
impl Step for WithLockStep {
    async fn run(&self, inputs: &Value, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let lock_key = inputs
            .get("lock_key")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                StepError::InvalidInput("lock_key".to_string(), "must be a non-empty string".to_string())
            })?;
        let ttl_seconds = inputs
            .get("ttl_seconds")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TTL_SECONDS);
        let inner = inputs
            .get("step")
            .ok_or_else(|| StepError::InvalidInput("step".to_string(), "required inline step spec".to_string()))?;
        let inner_type = inner.get("type").and_then(Value::as_str).ok_or_else(|| {
            StepError::InvalidInput("step.type".to_string(), "required".to_string())
        })?;
        let inner_inputs = inner.get("inputs").cloned().unwrap_or_else(|| Value::Object(Default::default()));

        let acquired = ctx.locks.try_acquire_lock(lock_key, ctx.run_id, ttl_seconds)?;
        if !acquired {
            return Err(StepError::LockAcquisitionFailed(lock_key.to_string()));
        }

        let _guard = LockGuard {
            locks: ctx.locks,
            lock_key: lock_key.to_string(),
            owner: ctx.run_id.to_string(),
        };

        ctx.dispatch.run_step(inner_type, &inner_inputs, ctx).await
    }
}

#[cfg(test)]
#[path = "with_lock_tests.rs"]
mod tests;
