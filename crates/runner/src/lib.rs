// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aetherflow-runner: the embedder-facing caller surface (spec.md §6).
//!
//! Everything else in this crate is an internal collaborator — a
//! scheduler ([`runner::run_flow`]), a settings reader, an env-snapshot
//! builder. [`Engine`] is the one type an embedder constructs: it owns
//! the connector/step registries, wires a run's env snapshot through
//! spec validation and resource construction, opens the state store,
//! and drives the job/step lifecycle. `acquire_lock`/`release_lock` are
//! deliberately not exposed here — the only caller-visible path to a
//! lock is the `with_lock` step (spec.md §6).

pub mod adapters;
pub mod context;
pub mod env_snapshot;
pub mod error;
pub mod observer;
pub mod runner;
pub mod secrets;
pub mod settings;
pub mod summary;

pub use context::RunContext;
pub use error::RunnerError;
pub use observer::{NullObserver, Observer, RecordingObserver, TracingObserver};
pub use runner::run_flow;
pub use secrets::{DecodeAdapter, NoopSecretsHook, SecretsHook};
pub use settings::{ConnectorCachePolicy, LogFormat, Settings};
pub use summary::{JobSummary, RunSummary};

use aetherflow_core::{Clock, FlowId, RunId, SystemClock};
use aetherflow_registry::{ConnectorRegistry, StepRegistry};
use aetherflow_spec::{BundleManifest, EnvFileSpec, FlowSpec, ProfilesFile};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Options a caller may vary per run (spec.md §6 "Caller surface":
/// `run_flow(flow, {run_id?, bundle_manifest?, allow_stale_bundle?})`).
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Reuse an existing run id to resume a previously-started run
    /// against the same state database. A fresh id is generated when
    /// omitted.
    pub run_id: Option<String>,
    pub bundle_manifest: Option<BundleManifest>,
    /// When `true`, a bundle whose manifest looks stale (spec.md §6) is
    /// run anyway rather than rejected. Non-goal territory for most
    /// embedders; defaults to `false`.
    pub allow_stale_bundle: bool,
}

/// Everything an embedder supplies once at startup: the connector and
/// step registries it wants available, and the ambient collaborators
/// (secrets, observability, clock) a run should use. Built once and
/// reused across runs, holding its adapter set for the process
/// lifetime.
pub struct Engine {
    connectors: ConnectorRegistry,
    steps: Arc<StepRegistry>,
    secrets: Arc<dyn SecretsHook>,
    observer: Arc<dyn Observer>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    /// Every built-in step (`with_lock`, `external.process`) is
    /// registered on top of whatever `steps` the caller already
    /// populated. `connectors` starts out exactly as given — aetherflow
    /// ships no built-in connectors, only the external-process and
    /// lock steps (spec.md §4.6/§4.7).
    pub fn new(connectors: ConnectorRegistry, mut steps: StepRegistry) -> Self {
        aetherflow_steps::register_builtins(&mut steps);
        Self {
            connectors,
            steps: Arc::new(steps),
            secrets: Arc::new(NoopSecretsHook),
            observer: Arc::new(TracingObserver),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretsHook>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Parse and semantically validate a flow document without
    /// constructing resources or running anything (spec.md §6
    /// "Caller surface": `validate_flow(path|bytes) -> errors|ok`).
    /// Strict env validation is included when `settings` asks for it.
    pub fn validate(&self, flow_path: &Path, settings: &Settings) -> Result<FlowSpec, RunnerError> {
        let flow = aetherflow_spec::load_flow(flow_path)?;
        aetherflow_spec::validate_flow(&flow)?;
        if settings.validate_env_strict {
            let env = self.build_env(settings, &[])?;
            aetherflow_spec::validate_env_strict(&flow, &env_root(&env))?;
        }
        Ok(flow)
    }

    /// Run the flow at `flow_path` to completion: build the frozen env
    /// snapshot, validate, construct resources, open the state store,
    /// and drive the job/step lifecycle through to a [`RunSummary`]
    /// (spec.md §6 "Caller surface": `run_flow`).
    pub async fn run(&self, flow_path: &Path, settings: &Settings, options: RunOptions) -> Result<RunSummary, RunnerError> {
        let manifest_env_files: Vec<EnvFileSpec> = options
            .bundle_manifest
            .as_ref()
            .map(|m| m.env_files.clone())
            .unwrap_or_default();
        let env = self.build_env(settings, &manifest_env_files)?;
        let env_root_value = env_root(&env);

        let flow = aetherflow_spec::load_flow(flow_path)?;
        aetherflow_spec::validate_flow(&flow)?;
        if settings.validate_env_strict {
            aetherflow_spec::validate_env_strict(&flow, &env_root_value)?;
        }

        let profiles = self.load_profiles(settings)?;
        let decode_hook = DecodeAdapter::new(self.secrets.clone());
        let built = aetherflow_profiles::build_resources(&flow, &profiles, &env_root_value, &self.connectors, &decode_hook)?;
        let resource_bag = aetherflow_profiles::as_resource_bag(&built);

        // `workspace.root` is templatable over `env` (spec.md §3); a
        // relative result falls back onto `AETHERFLOW_WORK_ROOT`.
        let rendered_root = aetherflow_resolver::render(&flow.flow.workspace.root, &env_root_value).map_err(|source| RunnerError::WorkspaceRoot {
            template: flow.flow.workspace.root.clone(),
            source,
        })?;
        let workspace_root = aetherflow_state::resolve_state_path(&settings.work_root, &rendered_root);
        let state_path = aetherflow_state::resolve_state_path(&workspace_root, &flow.flow.state.path);
        let state = Arc::new(aetherflow_state::StateStore::open(&state_path)?);

        let run_id = options.run_id.map(RunId::new).unwrap_or_else(RunId::generate);
        let ctx = RunContext {
            flow_id: FlowId::new(flow.flow.id.clone()),
            run_id,
            env: Arc::new(env),
            connectors: resource_bag,
            state,
            work_root: workspace_root,
        };

        runner::run_flow(&flow, &ctx, self.steps.clone(), self.observer.as_ref(), self.clock.clone()).await
    }

    fn build_env(&self, settings: &Settings, manifest_env_files: &[EnvFileSpec]) -> Result<HashMap<String, String>, RunnerError> {
        let process_env: HashMap<String, String> = std::env::vars().collect();
        env_snapshot::build_env_snapshot(process_env, &settings.env_files, manifest_env_files, self.secrets.as_ref())
    }

    fn load_profiles(&self, settings: &Settings) -> Result<ProfilesFile, RunnerError> {
        if let Some(path) = &settings.profiles_file {
            Ok(aetherflow_spec::load_profiles(path)?)
        } else if let Some(json) = &settings.profiles_json {
            serde_json::from_str(json).map_err(|source| RunnerError::EnvFileJson {
                path: "AETHERFLOW_PROFILES_JSON".to_string(),
                source,
            })
        } else {
            Ok(ProfilesFile::default())
        }
    }
}

/// Wrap an env snapshot as the `{ "env": {...} }` resolver root
/// (spec.md §4.2's scope table: `env` is the only root available to
/// resource template expansion).
fn env_root(env: &HashMap<String, String>) -> Value {
    let map: serde_json::Map<String, Value> = env.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
    let mut root = serde_json::Map::new();
    root.insert("env".to_string(), Value::Object(map));
    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aetherflow_registry::{Connector, ConnectorFactory, RegistryError};
    use std::any::Any;
    use std::io::Write;
    use tempfile::NamedTempFile;

    struct FakeConnector;
    impl Connector for FakeConnector {
        fn kind(&self) -> &'static str {
            "fake"
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct FakeFactory;
    impl ConnectorFactory for FakeFactory {
        fn build(&self, _config: &Value, _options: &Value) -> Result<Arc<dyn Connector>, RegistryError> {
            Ok(Arc::new(FakeConnector))
        }
    }

    fn write_flow(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{body}").unwrap();
        file
    }

    fn settings() -> Settings {
        Settings::from_env(&HashMap::new()).unwrap()
    }

    #[test]
    fn validate_accepts_a_well_formed_flow() {
        let file = write_flow(
            r#"
version: 1
flow:
  id: demo
  workspace: { root: "/tmp/aetherflow-runner-tests", cleanup_policy: never }
  state: { backend: sqlite, path: ":memory-placeholder:" }
  locks: { scope: none, ttl_seconds: 1 }
jobs:
  - id: a
    steps:
      - id: s1
        type: external.process
        inputs: { command: "true", shell: true }
"#,
        );
        let engine = Engine::new(ConnectorRegistry::new(), StepRegistry::new());
        let flow = engine.validate(file.path(), &settings()).unwrap();
        assert_eq!(flow.flow.id, "demo");
    }

    #[tokio::test]
    async fn run_drives_a_flow_end_to_end_with_a_registered_connector() {
        let work_dir = tempfile::tempdir().unwrap();
        let state_path = work_dir.path().join("state.db");
        let flow_yaml = format!(
            r#"
version: 1
flow:
  id: demo
  workspace: {{ root: "{root}", cleanup_policy: never }}
  state: {{ backend: sqlite, path: "{state}" }}
  locks: {{ scope: none, ttl_seconds: 1 }}
resources:
  db:
    kind: db
    driver: fake
    config: {{}}
jobs:
  - id: a
    steps:
      - id: s1
        type: external.process
        inputs: {{ command: "true", shell: true, resource: "db" }}
"#,
            root = work_dir.path().display(),
            state = state_path.display(),
        );
        let file = write_flow(&flow_yaml);

        let mut connectors = ConnectorRegistry::new();
        connectors.register("db", "fake", Arc::new(FakeFactory));
        let engine = Engine::new(connectors, StepRegistry::new());

        let summary = engine.run(file.path(), &settings(), RunOptions::default()).await.unwrap();
        assert!(summary.all_successful());
        assert_eq!(summary.jobs.len(), 1);
    }
}
