// SPDX-License-Identifier: MIT

//! Aggregated runner error type (spec.md §7 error taxonomy).

use aetherflow_profiles::ProfileError;
use aetherflow_registry::StepError;
use aetherflow_resolver::ResolverError;
use aetherflow_spec::SpecError;
use aetherflow_state::StateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("job `{job_id}` step `{step_id}` failed: {source}")]
    Step {
        job_id: String,
        step_id: String,
        #[source]
        source: StepError,
    },

    #[error("job `{job_id}` step `{step_id}` input `{field}` could not be rendered: {source}")]
    Template {
        job_id: String,
        step_id: String,
        field: String,
        #[source]
        source: ResolverError,
    },

    #[error("job `{job_id}` `when` expression `{expr}` failed to evaluate: {source}")]
    GateEval {
        job_id: String,
        expr: String,
        #[source]
        source: aetherflow_spec::EvalError,
    },

    #[error("job `{job_id}` `when` expression `{expr}` is invalid: {source}")]
    InvalidWhen {
        job_id: String,
        expr: String,
        #[source]
        source: aetherflow_spec::WhenError,
    },

    #[error("lock `{0}` could not be acquired")]
    LockNotAcquired(String),

    #[error("flow workspace root `{template}` could not be rendered: {source}")]
    WorkspaceRoot {
        template: String,
        #[source]
        source: ResolverError,
    },

    #[error("environment file `{path}` could not be read: {source}")]
    EnvFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("job `{job_id}` artifacts directory `{path}` could not be created: {source}")]
    ArtifactsDir {
        job_id: String,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("environment file `{path}` is not valid JSON: {source}")]
    EnvFileJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing required environment variable `{0}`")]
    MissingEnv(String),
}
