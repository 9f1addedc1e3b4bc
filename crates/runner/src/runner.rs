// SPDX-License-Identifier: MIT

//! Job/step lifecycle (spec.md §4.5): the 25%-share centerpiece.
//!
//! Execution is single-threaded cooperative (spec.md §5): jobs run in
//! declaration order, steps within a job run in declaration order, and
//! nothing here ever `tokio::spawn`s a step against another.

use crate::adapters::{RegistryDispatch, StateLockStore};
use crate::context::RunContext;
use crate::error::RunnerError;
use crate::observer::Observer;
use crate::summary::{JobSummary, RunSummary};
use aetherflow_core::{Clock, JobStatus, StepStatus};
use aetherflow_registry::{LockStore, StepContext, StepDispatch, StepRegistry};
use aetherflow_resolver::render;
use aetherflow_spec::{eval_bool, parse_when, CleanupPolicy, FlowSpec, JobSpec, LockScope, OnNoData, StepSpec};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Assembles the `env`/`steps`/`job`/`jobs`/`run_id`/`flow_id` variable
/// roots the resolver and `when` grammar see, per spec.md §4.2's scope
/// table. Each phase passes a narrower slice of this state as its root.
struct Scope<'a> {
    env: &'a Value,
    jobs: Map<String, Value>,
}

impl Scope<'_> {
    /// `when` gate view: resolved outputs of already-executed jobs, plus `env`.
    fn gate_view(&self) -> Value {
        Value::Object(
            [
                ("env".to_string(), self.env.clone()),
                ("jobs".to_string(), Value::Object(self.jobs.clone())),
            ]
            .into_iter()
            .collect(),
        )
    }

    /// Step input rendering view: `env`, `steps`, `job`, `jobs`, `run_id`, `flow_id`.
    fn step_input_view(&self, job_outputs: &Map<String, Value>, step_outputs: &Map<String, Value>, flow_id: &str, run_id: &str) -> Value {
        Value::Object(
            [
                ("env".to_string(), self.env.clone()),
                ("steps".to_string(), Value::Object(step_outputs.clone())),
                ("job".to_string(), Value::Object(job_outputs.clone())),
                ("jobs".to_string(), Value::Object(self.jobs.clone())),
                ("run_id".to_string(), Value::String(run_id.to_string())),
                ("flow_id".to_string(), Value::String(flow_id.to_string())),
            ]
            .into_iter()
            .collect(),
        )
    }

    /// Step output promotion view: step input view plus `result`.
    fn step_output_view(&self, job_outputs: &Map<String, Value>, step_outputs: &Map<String, Value>, flow_id: &str, run_id: &str, result: &Value) -> Value {
        let mut base = self.step_input_view(job_outputs, step_outputs, flow_id, run_id);
        if let Value::Object(map) = &mut base {
            map.insert("result".to_string(), result.clone());
        }
        base
    }
}

fn job_outputs_entry(success: bool, outputs: &Map<String, Value>) -> Value {
    Value::Object(
        [
            ("success".to_string(), Value::Bool(success)),
            ("outputs".to_string(), Value::Object(outputs.clone())),
        ]
        .into_iter()
        .collect(),
    )
}

fn render_map(map: &Map<String, Value>, view: &Value, job_id: &str, step_id: &str) -> Result<Map<String, Value>, RunnerError> {
    let mut out = Map::with_capacity(map.len());
    for (k, v) in map {
        out.insert(k.clone(), render_value(v, view, job_id, step_id, k)?);
    }
    Ok(out)
}

fn render_value(value: &Value, view: &Value, job_id: &str, step_id: &str, field: &str) -> Result<Value, RunnerError> {
    match value {
        Value::String(s) => render(s, view).map(Value::String).map_err(|source| RunnerError::Template {
            job_id: job_id.to_string(),
            step_id: step_id.to_string(),
            field: field.to_string(),
            source,
        }),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(render_value(item, view, job_id, step_id, &format!("{field}[{i}]"))?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, view, job_id, step_id, &format!("{field}.{k}"))?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn render_string(template: &str, view: &Value, job_id: &str, step_id: &str, field: &str) -> Result<String, RunnerError> {
    render(template, view).map_err(|source| RunnerError::Template {
        job_id: job_id.to_string(),
        step_id: step_id.to_string(),
        field: field.to_string(),
        source,
    })
}

fn step_is_skipped(output: &Value) -> bool {
    output.get("skipped").and_then(Value::as_bool).unwrap_or(false)
}

fn cleanup_dir(ctx: &RunContext, job_id: &str, policy: CleanupPolicy, job_succeeded: bool) {
    let should_delete = match policy {
        CleanupPolicy::Never => false,
        CleanupPolicy::Always => true,
        CleanupPolicy::OnSuccess => job_succeeded,
    };
    if !should_delete {
        return;
    }
    let dir = ctx.job_run_dir(job_id);
    if let Err(err) = std::fs::remove_dir_all(&dir) {
        if err.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(job_id, path = %dir.display(), %err, "failed to clean up job run directory");
        }
    }
}

fn env_to_value(env: &HashMap<String, String>) -> Value {
    Value::Object(env.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect())
}

/// Run every job of `flow` against `ctx`, in declaration order,
/// honoring dependency, gate, resume, and cleanup semantics. Returns
/// the run summary even when a job fails (spec.md §4.5's run-terminates
/// behavior stops iterating jobs, but still reports what ran).
pub async fn run_flow(
    flow: &FlowSpec,
    ctx: &RunContext,
    registry: Arc<StepRegistry>,
    observer: &dyn Observer,
    clock: Arc<dyn Clock>,
) -> Result<RunSummary, RunnerError> {
    let flow_id = ctx.flow_id.as_str().to_string();
    let run_id = ctx.run_id.as_str().to_string();
    let started_at_ms = clock.epoch_ms();

    observer.on_run_start(&flow_id, &run_id);

    let env_value = env_to_value(&ctx.env);
    let locks = StateLockStore::new(ctx.state.clone(), clock.clone());
    let dispatch = RegistryDispatch::new(registry);
    let clock = clock.as_ref();

    let flow_lock_key = match flow.flow.locks.scope {
        LockScope::Flow => Some(format!("flow:{flow_id}")),
        LockScope::Job | LockScope::None => None,
    };
    if let Some(key) = &flow_lock_key {
        let acquired = LockStore::try_acquire_lock(&locks, key, &run_id, flow.flow.locks.ttl_seconds)?;
        if !acquired {
            return Err(RunnerError::LockNotAcquired(key.clone()));
        }
    }

    let mut scope = Scope { env: &env_value, jobs: Map::new() };
    let mut job_summaries = Vec::with_capacity(flow.jobs.len());
    let mut status_counts: BTreeMap<JobStatus, usize> = BTreeMap::new();

    let run_result = run_jobs(flow, ctx, &dispatch, &locks, &mut scope, observer, clock, &mut job_summaries, &mut status_counts).await;

    if let Some(key) = &flow_lock_key {
        let _ = LockStore::release_lock(&locks, key, &run_id);
    }

    run_result?;

    let finished_at_ms = clock.epoch_ms();
    let summary = RunSummary {
        flow_id,
        run_id,
        started_at_ms,
        finished_at_ms,
        jobs: job_summaries,
        status_counts,
    };
    observer.on_run_summary(&summary);
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
async fn run_jobs(
    flow: &FlowSpec,
    ctx: &RunContext,
    dispatch: &RegistryDispatch,
    locks: &StateLockStore,
    scope: &mut Scope<'_>,
    observer: &dyn Observer,
    clock: &dyn Clock,
    job_summaries: &mut Vec<JobSummary>,
    status_counts: &mut BTreeMap<JobStatus, usize>,
) -> Result<(), RunnerError> {
    let flow_id = ctx.flow_id.as_str();
    let run_id = ctx.run_id.as_str();

    for job in &flow.jobs {
        let started_at_ms = clock.epoch_ms();
        observer.on_job_start(flow_id, run_id, &job.id);

        let status = run_job(flow, job, ctx, dispatch, locks, scope, observer, clock).await?;

        let finished_at_ms = clock.epoch_ms();
        ctx.state.set_job_status(run_id, &job.id, status, finished_at_ms)?;
        observer.on_job_end(flow_id, run_id, &job.id, status);

        *status_counts.entry(status).or_insert(0) += 1;
        job_summaries.push(JobSummary {
            job_id: job.id.clone(),
            status,
            started_at_ms,
            finished_at_ms,
        });

        if status == JobStatus::Failed {
            return Ok(());
        }
    }
    Ok(())
}

/// Evaluate dependencies, the gate, and (if both pass) the job's steps.
/// Returns the job's terminal status. A step or template failure is
/// absorbed into `JobStatus::Failed` (and logged) rather than
/// propagated, so the caller still records a job summary and observer
/// event for it; only infrastructure failures (state store I/O,
/// malformed `when` grammar that slipped past validation) propagate.
#[allow(clippy::too_many_arguments)]
async fn run_job(
    flow: &FlowSpec,
    job: &JobSpec,
    ctx: &RunContext,
    dispatch: &RegistryDispatch,
    locks: &StateLockStore,
    scope: &mut Scope<'_>,
    observer: &dyn Observer,
    clock: &dyn Clock,
) -> Result<JobStatus, RunnerError> {
    for dep in &job.depends_on {
        let satisfied = scope
            .jobs
            .get(dep)
            .and_then(|v| v.get("success"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if !satisfied {
            scope.jobs.insert(job.id.clone(), job_outputs_entry(false, &Map::new()));
            return Ok(JobStatus::Blocked);
        }
    }

    if let Some(expr_src) = &job.when {
        let expr = parse_when(expr_src).map_err(|source| RunnerError::InvalidWhen {
            job_id: job.id.clone(),
            expr: expr_src.clone(),
            source,
        })?;
        let passed = eval_bool(&expr, &scope.gate_view()).map_err(|source| RunnerError::GateEval {
            job_id: job.id.clone(),
            expr: expr_src.clone(),
            source,
        })?;
        if !passed {
            scope.jobs.insert(job.id.clone(), job_outputs_entry(false, &Map::new()));
            return Ok(JobStatus::Skipped);
        }
    }

    ctx.state.set_job_status(ctx.run_id.as_str(), &job.id, JobStatus::Running, clock.epoch_ms())?;

    let job_lock_key = match flow.flow.locks.scope {
        LockScope::Job => Some(format!("job:{}:{}", ctx.flow_id.as_str(), job.id)),
        LockScope::Flow | LockScope::None => None,
    };
    if let Some(key) = &job_lock_key {
        let acquired = LockStore::try_acquire_lock(locks, key, ctx.run_id.as_str(), flow.flow.locks.ttl_seconds)?;
        if !acquired {
            tracing::error!(job_id = %job.id, lock_key = %key, "automatic job lock not acquired");
            scope.jobs.insert(job.id.clone(), job_outputs_entry(false, &Map::new()));
            cleanup_dir(ctx, &job.id, flow.flow.workspace.cleanup_policy, false);
            return Ok(JobStatus::Failed);
        }
    }

    let result = run_steps(job, ctx, dispatch, locks, scope, observer, clock).await;

    if let Some(key) = &job_lock_key {
        let _ = LockStore::release_lock(locks, key, ctx.run_id.as_str());
    }

    let (status, outputs) = match result {
        Ok(outcome) => outcome,
        Err(err @ (RunnerError::Step { .. } | RunnerError::Template { .. })) => {
            tracing::error!(job_id = %job.id, %err, "step failed, job marked FAILED");
            (JobStatus::Failed, Map::new())
        }
        Err(err) => return Err(err),
    };

    scope.jobs.insert(job.id.clone(), job_outputs_entry(status == JobStatus::Success, &outputs));
    cleanup_dir(ctx, &job.id, flow.flow.workspace.cleanup_policy, status == JobStatus::Success);
    Ok(status)
}

#[allow(clippy::too_many_arguments)]
async fn run_steps(
    job: &JobSpec,
    ctx: &RunContext,
    dispatch: &RegistryDispatch,
    locks: &StateLockStore,
    scope: &Scope<'_>,
    observer: &dyn Observer,
    clock: &dyn Clock,
) -> Result<(JobStatus, Map<String, Value>), RunnerError> {
    let mut job_outputs: Map<String, Value> = Map::new();
    let mut step_outputs: Map<String, Value> = Map::new();
    let mut cascade_skip = false;

    for step in &job.steps {
        if cascade_skip {
            ctx.state.set_step_status(ctx.run_id.as_str(), &job.id, &step.id, StepStatus::Skipped, clock.epoch_ms())?;
            continue;
        }

        observer.on_step_start(ctx.flow_id.as_str(), ctx.run_id.as_str(), &job.id, &step.id);
        let (status, result) = execute_step(job, step, ctx, dispatch, locks, scope, &job_outputs, &step_outputs, clock).await?;
        observer.on_step_end(ctx.flow_id.as_str(), ctx.run_id.as_str(), &job.id, &step.id, &status.to_string());
        step_outputs.insert(step.id.clone(), result.clone());

        let output_view = scope.step_output_view(&job_outputs, &step_outputs, ctx.flow_id.as_str(), ctx.run_id.as_str(), &result);
        for (name, template) in &step.outputs {
            let rendered = render_string(template, &output_view, &job.id, &step.id, name)?;
            job_outputs.insert(name.clone(), Value::String(rendered));
        }

        if status == StepStatus::Skipped && step.on_no_data == Some(OnNoData::SkipJob) {
            cascade_skip = true;
        }
    }

    let status = if cascade_skip { JobStatus::Skipped } else { JobStatus::Success };
    Ok((status, job_outputs))
}

/// Run (or, on resume, recall) one step. A step already recorded as
/// `SUCCESS`/`SKIPPED` is not re-dispatched (spec.md §8 property 3);
/// its persisted `result` is replayed instead so `outputs` promotion
/// stays consistent without invoking `run` again.
#[allow(clippy::too_many_arguments)]
async fn execute_step(
    job: &JobSpec,
    step: &StepSpec,
    ctx: &RunContext,
    dispatch: &RegistryDispatch,
    locks: &StateLockStore,
    scope: &Scope<'_>,
    job_outputs: &Map<String, Value>,
    step_outputs: &Map<String, Value>,
    clock: &dyn Clock,
) -> Result<(StepStatus, Value), RunnerError> {
    if let Some((status, result)) = ctx.state.get_step_result(ctx.run_id.as_str(), &job.id, &step.id)? {
        return Ok((status, result));
    }

    let input_view = scope.step_input_view(job_outputs, step_outputs, ctx.flow_id.as_str(), ctx.run_id.as_str());
    let rendered_inputs = render_map(&step.inputs, &input_view, &job.id, &step.id)?;

    let artifacts_dir = ctx.artifacts_dir(&job.id);
    std::fs::create_dir_all(&artifacts_dir).map_err(|source| RunnerError::ArtifactsDir {
        job_id: job.id.clone(),
        path: artifacts_dir.display().to_string(),
        source,
    })?;

    let step_ctx = StepContext {
        flow_id: ctx.flow_id.as_str(),
        run_id: ctx.run_id.as_str(),
        resources: &ctx.connectors,
        locks,
        dispatch,
        artifacts_dir,
    };

    let outcome = dispatch
        .run_step(&step.step_type, &Value::Object(rendered_inputs), &step_ctx)
        .await
        .map_err(|source| RunnerError::Step {
            job_id: job.id.clone(),
            step_id: step.id.clone(),
            source,
        })?;

    let status = if step_is_skipped(&outcome.output) { StepStatus::Skipped } else { StepStatus::Success };
    ctx.state.set_step_result(ctx.run_id.as_str(), &job.id, &step.id, status, &outcome.output, clock.epoch_ms())?;

    Ok((status, outcome.output))
}
