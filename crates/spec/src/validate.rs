// SPDX-License-Identifier: MIT

//! Semantic validation of a parsed [`FlowSpec`] (spec.md §4.3, §9).

use crate::error::SpecError;
use crate::model::FlowSpec;
use crate::when;
use serde_json::Value;
use std::collections::HashSet;

/// Run every structural and semantic check spec.md §4.3 requires before
/// a flow may be scheduled. Collects nothing partial — the first
/// violation is returned.
pub fn validate_flow(flow: &FlowSpec) -> Result<(), SpecError> {
    let flow_id = flow.flow.id.clone();
    let mut seen_jobs: HashSet<&str> = HashSet::new();

    for job in &flow.jobs {
        if !seen_jobs.insert(job.id.as_str()) {
            return Err(SpecError::DuplicateJobId {
                flow_id: flow_id.clone(),
                job_id: job.id.clone(),
            });
        }
    }

    let mut declared: HashSet<&str> = HashSet::new();
    for job in &flow.jobs {
        for dep in &job.depends_on {
            if dep == &job.id {
                return Err(SpecError::SelfDependency {
                    flow_id: flow_id.clone(),
                    job_id: job.id.clone(),
                });
            }
            if !declared.contains(dep.as_str()) {
                return Err(SpecError::UnknownOrForwardDependency {
                    flow_id: flow_id.clone(),
                    job_id: job.id.clone(),
                    dep: dep.clone(),
                });
            }
        }
        declared.insert(job.id.as_str());

        let mut seen_steps: HashSet<&str> = HashSet::new();
        for step in &job.steps {
            if !seen_steps.insert(step.id.as_str()) {
                return Err(SpecError::DuplicateStepId {
                    flow_id: flow_id.clone(),
                    job_id: job.id.clone(),
                    step_id: step.id.clone(),
                });
            }

            for value in step.inputs.values() {
                check_resource_refs(&flow_id, &job.id, &step.id, value, &flow.resources)?;
            }
        }

        if let Some(expr) = &job.when {
            when::parse(expr).map_err(|source| SpecError::InvalidWhen {
                flow_id: flow_id.clone(),
                job_id: job.id.clone(),
                expr: expr.clone(),
                source,
            })?;
        }
    }

    Ok(())
}

/// Walk a step's rendered-or-unrendered `inputs` tree looking for the
/// literal `resource:` field spec.md §4.3 requires to name a declared
/// resource. `resources` is never a resolver scope (§4.2's scope table
/// has no `resources` root), so this is a plain string literal, not a
/// template — e.g. `inputs: { resource: "db", query: "..." }`.
/// Strict env-validation mode (spec.md §4.3, `AETHERFLOW_VALIDATE_ENV_STRICT`):
/// scan every step input template for `env.*` references and fail here,
/// at validation time, rather than letting a missing `env` key surface
/// as a runtime `ResolverMissingKeyError` mid-run. Only references
/// without a `{{env.X:default}}` fallback are checked — a default makes
/// the reference resolvable regardless of what's in `env`.
pub fn validate_env_strict(flow: &FlowSpec, env: &Value) -> Result<(), SpecError> {
    let flow_id = flow.flow.id.clone();
    for job in &flow.jobs {
        for step in &job.steps {
            for value in step.inputs.values() {
                check_env_refs(&flow_id, &job.id, &step.id, value, env)?;
            }
        }
    }
    Ok(())
}

fn check_env_refs(flow_id: &str, job_id: &str, step_id: &str, value: &Value, env: &Value) -> Result<(), SpecError> {
    match value {
        Value::String(s) => {
            for token in aetherflow_resolver::referenced_var_tokens(s).unwrap_or_default() {
                let Some(key) = token.path.strip_prefix("env.") else { continue };
                if token.default.is_some() {
                    continue;
                }
                let resolved = env
                    .get("env")
                    .and_then(|root| root.as_object())
                    .and_then(|map| map.get(key))
                    .and_then(Value::as_str)
                    .is_some_and(|s| !s.is_empty());
                if !resolved {
                    return Err(SpecError::UnresolvedEnvReference {
                        flow_id: flow_id.to_string(),
                        job_id: job_id.to_string(),
                        step_id: step_id.to_string(),
                        key: key.to_string(),
                    });
                }
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_env_refs(flow_id, job_id, step_id, item, env)?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for item in map.values() {
                check_env_refs(flow_id, job_id, step_id, item, env)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_resource_refs(
    flow_id: &str,
    job_id: &str,
    step_id: &str,
    value: &Value,
    resources: &indexmap::IndexMap<String, crate::model::ResourceSpec>,
) -> Result<(), SpecError> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get("resource") {
                if !resources.contains_key(name.as_str()) {
                    return Err(SpecError::UnknownResource {
                        flow_id: flow_id.to_string(),
                        job_id: job_id.to_string(),
                        step_id: step_id.to_string(),
                        resource: name.clone(),
                    });
                }
            }
            for (key, item) in map {
                if key == "resource" {
                    continue;
                }
                check_resource_refs(flow_id, job_id, step_id, item, resources)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                check_resource_refs(flow_id, job_id, step_id, item, resources)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
