// SPDX-License-Identifier: MIT

//! Observer trait (SPEC_FULL.md "Observer trait, not just an event
//! enum" supplement): structured lifecycle events and the final run
//! summary (spec.md §2, §4.5). A trait with a default no-op body per
//! method plus a small family of concrete implementations, so an
//! embedder can swap in their own sink without a fake standing in for
//! a concrete notification target.

use crate::summary::RunSummary;
use aetherflow_core::JobStatus;
use parking_lot::Mutex;

/// Lifecycle events a run reports as it progresses. Implementations
/// must not block the runner for long — `TracingObserver` just emits
/// structured log events.
pub trait Observer: Send + Sync {
    fn on_run_start(&self, flow_id: &str, run_id: &str) {
        let _ = (flow_id, run_id);
    }

    fn on_job_start(&self, flow_id: &str, run_id: &str, job_id: &str) {
        let _ = (flow_id, run_id, job_id);
    }

    fn on_job_end(&self, flow_id: &str, run_id: &str, job_id: &str, status: JobStatus) {
        let _ = (flow_id, run_id, job_id, status);
    }

    fn on_step_start(&self, flow_id: &str, run_id: &str, job_id: &str, step_id: &str) {
        let _ = (flow_id, run_id, job_id, step_id);
    }

    fn on_step_end(&self, flow_id: &str, run_id: &str, job_id: &str, step_id: &str, status: &str) {
        let _ = (flow_id, run_id, job_id, step_id, status);
    }

    fn on_run_summary(&self, summary: &RunSummary) {
        let _ = summary;
    }
}

/// Default observer: `tracing` spans and events, one per run/job/step
/// (`run_id`, `job_id`, `step_id` as span fields).
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_run_start(&self, flow_id: &str, run_id: &str) {
        tracing::info!(flow_id, run_id, "run_start");
    }

    fn on_job_start(&self, flow_id: &str, run_id: &str, job_id: &str) {
        tracing::info!(flow_id, run_id, job_id, "job_start");
    }

    fn on_job_end(&self, flow_id: &str, run_id: &str, job_id: &str, status: JobStatus) {
        tracing::info!(flow_id, run_id, job_id, status = %status, "job_end");
    }

    fn on_step_start(&self, flow_id: &str, run_id: &str, job_id: &str, step_id: &str) {
        tracing::info!(flow_id, run_id, job_id, step_id, "step_start");
    }

    fn on_step_end(&self, flow_id: &str, run_id: &str, job_id: &str, step_id: &str, status: &str) {
        tracing::info!(flow_id, run_id, job_id, step_id, status, "step_end");
    }

    fn on_run_summary(&self, summary: &RunSummary) {
        tracing::info!(
            flow_id = %summary.flow_id,
            run_id = %summary.run_id,
            duration_ms = summary.duration_ms(),
            jobs = summary.jobs.len(),
            "run_summary"
        );
    }
}

/// Observer that does nothing — used when the embedder wants silence
/// (e.g. dry-run validation paths).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl Observer for NullObserver {}

/// Test observer: records every event verbatim for assertion.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl Observer for RecordingObserver {
    fn on_run_start(&self, flow_id: &str, run_id: &str) {
        self.events.lock().push(format!("run_start {flow_id} {run_id}"));
    }

    fn on_job_start(&self, _flow_id: &str, _run_id: &str, job_id: &str) {
        self.events.lock().push(format!("job_start {job_id}"));
    }

    fn on_job_end(&self, _flow_id: &str, _run_id: &str, job_id: &str, status: JobStatus) {
        self.events.lock().push(format!("job_end {job_id} {status}"));
    }

    fn on_step_start(&self, _flow_id: &str, _run_id: &str, job_id: &str, step_id: &str) {
        self.events.lock().push(format!("step_start {job_id}.{step_id}"));
    }

    fn on_step_end(&self, _flow_id: &str, _run_id: &str, job_id: &str, step_id: &str, status: &str) {
        self.events.lock().push(format!("step_end {job_id}.{step_id} {status}"));
    }

    fn on_run_summary(&self, summary: &RunSummary) {
        self.events.lock().push(format!("run_summary {} jobs", summary.jobs.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn recording_observer_captures_events_in_order() {
        let observer = RecordingObserver::new();
        observer.on_run_start("f1", "r1");
        observer.on_job_start("f1", "r1", "job1");
        observer.on_job_end("f1", "r1", "job1", JobStatus::Success);
        let summary = RunSummary {
            flow_id: "f1".to_string(),
            run_id: "r1".to_string(),
            started_at_ms: 0,
            finished_at_ms: 1,
            jobs: Vec::new(),
            status_counts: BTreeMap::new(),
        };
        observer.on_run_summary(&summary);
        assert_eq!(
            observer.events(),
            vec![
                "run_start f1 r1".to_string(),
                "job_start job1".to_string(),
                "job_end job1 SUCCESS".to_string(),
                "run_summary 0 jobs".to_string(),
            ]
        );
    }

    #[test]
    fn null_observer_does_not_panic() {
        let observer = NullObserver;
        observer.on_run_start("f", "r");
        observer.on_job_start("f", "r", "j");
    }
}
