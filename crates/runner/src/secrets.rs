// SPDX-License-Identifier: MIT

//! Secrets hook: `{decode(string)->string, expand_env(map)->map}`
//! (spec.md §9 "Global settings and secrets hooks"), loaded by
//! configured name and stored on `Settings`. A narrow trait object an
//! embedder can swap, not a concrete implementation baked into the
//! engine.

use aetherflow_profiles::DecodeHook;
use std::collections::HashMap;
use std::sync::Arc;

/// Out-of-band secret handling invoked only at the documented points:
/// resource-decode fields (via the [`DecodeAdapter`] bridge below) and
/// env-expansion during the env-snapshot build.
pub trait SecretsHook: Send + Sync {
    fn decode(&self, raw: &str) -> Result<String, String>;
    fn expand_env(&self, env: &HashMap<String, String>) -> HashMap<String, String>;
}

/// Default hook: no decoding, no expansion. Used when no
/// `AETHERFLOW_SECRETS_MODULE`/`AETHERFLOW_SECRETS_PATH` is configured.
pub struct NoopSecretsHook;

impl SecretsHook for NoopSecretsHook {
    fn decode(&self, raw: &str) -> Result<String, String> {
        Ok(raw.to_string())
    }

    fn expand_env(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        env.clone()
    }
}

/// Adapts a [`SecretsHook`] to the `aetherflow_profiles::DecodeHook`
/// trait the profile/resource builder consumes.
pub struct DecodeAdapter {
    hook: Arc<dyn SecretsHook>,
}

impl DecodeAdapter {
    pub fn new(hook: Arc<dyn SecretsHook>) -> Self {
        Self { hook }
    }
}

impl DecodeHook for DecodeAdapter {
    fn decode(&self, raw: &str) -> Result<String, String> {
        self.hook.decode(raw)
    }
}
