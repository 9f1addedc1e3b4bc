// SPDX-License-Identifier: MIT

//! Aggregated parse/validation error type for the spec crate.

use crate::when::WhenError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("flow {flow_id}: duplicate job id `{job_id}`")]
    DuplicateJobId { flow_id: String, job_id: String },

    #[error("flow {flow_id}, job {job_id}: duplicate step id `{step_id}`")]
    DuplicateStepId {
        flow_id: String,
        job_id: String,
        step_id: String,
    },

    #[error("flow {flow_id}, job {job_id}: depends_on references unknown or forward job `{dep}`")]
    UnknownOrForwardDependency {
        flow_id: String,
        job_id: String,
        dep: String,
    },

    #[error("flow {flow_id}, job {job_id}, step {step_id}: references unknown resource `{resource}`")]
    UnknownResource {
        flow_id: String,
        job_id: String,
        step_id: String,
        resource: String,
    },

    #[error("flow {flow_id}, job {job_id}: invalid `when` expression `{expr}`: {source}")]
    InvalidWhen {
        flow_id: String,
        job_id: String,
        expr: String,
        #[source]
        source: WhenError,
    },

    #[error("flow {flow_id}: job id `{job_id}` depends on itself")]
    SelfDependency { flow_id: String, job_id: String },

    #[error(
        "flow {flow_id}, job {job_id}, step {step_id}: unresolved environment reference `{key}` (strict env validation)"
    )]
    UnresolvedEnvReference {
        flow_id: String,
        job_id: String,
        step_id: String,
        key: String,
    },

    #[error("profiles file references unknown profile `{profile}` for resource `{resource}`")]
    UnknownProfile { resource: String, profile: String },
}
