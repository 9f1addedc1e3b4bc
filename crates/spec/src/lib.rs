// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! aetherflow-spec: typed flow/profile/manifest documents, the
//! restricted `when` grammar, and pre-run validation.

pub mod error;
pub mod manifest;
pub mod model;
pub mod parser;
pub mod validate;
pub mod when;

pub use error::SpecError;
pub use manifest::{
    BundleLayout, BundleManifest, BundleMode, BundleSource, BundleSourceType, BundleSpec,
    EnvFileSpec, EnvFileType, PathsSpec,
};
pub use model::{
    CleanupPolicy, FlowMetadata, FlowSpec, JobSpec, LockScope, LocksSpec, OnNoData, ProfileSpec,
    ProfilesFile, ResourceSpec, StateBackend, StateSpec, StepSpec, WorkspaceSpec,
};
pub use parser::{load_flow, load_manifest, load_profiles, parse_flow_str};
pub use validate::{validate_env_strict, validate_flow};
pub use when::{eval_bool, parse as parse_when, CmpOp, EvalError, WhenError, WhenExpr};
