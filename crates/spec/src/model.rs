// SPDX-License-Identifier: MIT

//! Typed representation of the flow/profile/manifest documents
//! (spec.md §3).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Root entity parsed from the flow file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowSpec {
    pub version: u32,
    pub flow: FlowMetadata,
    #[serde(default)]
    pub resources: IndexMap<String, ResourceSpec>,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    OnSuccess,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockScope {
    None,
    Job,
    Flow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSpec {
    pub root: String,
    pub cleanup_policy: CleanupPolicy,
    #[serde(default)]
    pub layout: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSpec {
    pub backend: StateBackend,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocksSpec {
    pub scope: LockScope,
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FlowMetadata {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    pub workspace: WorkspaceSpec,
    pub state: StateSpec,
    pub locks: LocksSpec,
}

/// A named external resource declaration (spec.md §3 `ResourceSpec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceSpec {
    pub kind: String,
    pub driver: String,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub decode: Map<String, Value>,
}

/// An overlay fragment, loaded from the profiles file and merged onto a
/// matching `ResourceSpec` before template expansion (spec.md §3, §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSpec {
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default)]
    pub decode: Map<String, Value>,
}

/// Top-level profiles file: name -> overlay fragment.
pub type ProfilesFile = HashMap<String, ProfileSpec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnNoData {
    SkipJob,
}

/// One unit of work within a job (spec.md §3 `StepSpec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Mapping from job-output name to a template expression, rendered
    /// post-execution with `result` in scope.
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
    #[serde(default)]
    pub on_no_data: Option<OnNoData>,
}

/// An ordered unit of dependency and gating (spec.md §3 `JobSpec`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobSpec {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub when: Option<String>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_flow() {
        let yaml = r#"
version: 1
flow:
  id: demo
  workspace:
    root: "/tmp/work"
    cleanup_policy: never
  state:
    backend: sqlite
    path: "/tmp/state/demo.db"
  locks:
    scope: job
    ttl_seconds: 60
resources: {}
jobs: []
"#;
        let spec: FlowSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.version, 1);
        assert_eq!(spec.flow.id, "demo");
        assert_eq!(spec.flow.workspace.cleanup_policy, CleanupPolicy::Never);
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let yaml = r#"
version: 1
flow:
  id: demo
  workspace: { root: "/tmp", cleanup_policy: never }
  state: { backend: sqlite, path: "/tmp/s.db" }
  locks: { scope: none, ttl_seconds: 1 }
bogus_field: true
"#;
        let err = serde_yaml::from_str::<FlowSpec>(yaml).unwrap_err();
        assert!(err.to_string().contains("bogus_field") || err.to_string().contains("unknown field"));
    }

    #[test]
    fn step_type_field_maps_to_rust_keyword_safe_name() {
        let yaml = r#"
id: a
type: external.process
inputs: { command: "echo hi" }
"#;
        let step: StepSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(step.step_type, "external.process");
    }
}
