// SPDX-License-Identifier: MIT

//! Run summary shape (SPEC_FULL.md "Run summary shape" supplement):
//! spec.md §4.5 only says "emit `run_summary` with durations and status
//! counts" — this module fixes the concrete fields.

use aetherflow_core::JobStatus;
use std::collections::BTreeMap;

/// Key type for [`RunSummary::status_counts`]. An alias rather than a
/// new enum: `JobStatus` already carries every status kind a finished
/// run can report.
pub type JobStatusKind = JobStatus;

#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: String,
    pub status: JobStatus,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
}

impl JobSummary {
    pub fn duration_ms(&self) -> u64 {
        self.finished_at_ms.saturating_sub(self.started_at_ms)
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub flow_id: String,
    pub run_id: String,
    pub started_at_ms: u64,
    pub finished_at_ms: u64,
    pub jobs: Vec<JobSummary>,
    pub status_counts: BTreeMap<JobStatusKind, usize>,
}

impl RunSummary {
    pub fn duration_ms(&self) -> u64 {
        self.finished_at_ms.saturating_sub(self.started_at_ms)
    }

    pub fn all_successful(&self) -> bool {
        self.jobs.iter().all(|j| j.status == JobStatus::Success || j.status == JobStatus::Skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_is_the_difference_of_timestamps() {
        let summary = JobSummary {
            job_id: "j1".to_string(),
            status: JobStatus::Success,
            started_at_ms: 1_000,
            finished_at_ms: 1_500,
        };
        assert_eq!(summary.duration_ms(), 500);
    }

    #[test]
    fn all_successful_treats_skipped_as_non_failing() {
        let run = RunSummary {
            flow_id: "f".to_string(),
            run_id: "r".to_string(),
            started_at_ms: 0,
            finished_at_ms: 10,
            jobs: vec![
                JobSummary { job_id: "a".to_string(), status: JobStatus::Success, started_at_ms: 0, finished_at_ms: 5 },
                JobSummary { job_id: "b".to_string(), status: JobStatus::Skipped, started_at_ms: 5, finished_at_ms: 10 },
            ],
            status_counts: BTreeMap::new(),
        };
        assert!(run.all_successful());
    }

    #[test]
    fn all_successful_is_false_when_a_job_failed() {
        let run = RunSummary {
            flow_id: "f".to_string(),
            run_id: "r".to_string(),
            started_at_ms: 0,
            finished_at_ms: 10,
            jobs: vec![JobSummary { job_id: "a".to_string(), status: JobStatus::Failed, started_at_ms: 0, finished_at_ms: 5 }],
            status_counts: BTreeMap::new(),
        };
        assert!(!run.all_successful());
    }
}
