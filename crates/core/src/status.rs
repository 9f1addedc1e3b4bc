// SPDX-License-Identifier: MIT

//! Status enums persisted in `StateRecord`s (spec.md §3).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a `JobRun` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
    Blocked,
    Skipped,
}

impl JobStatus {
    /// Whether this status is terminal for the purposes of `depends_on`
    /// gating (§4.5: a dependency is satisfied only by `Success`).
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Success)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Blocked => "BLOCKED",
            JobStatus::Skipped => "SKIPPED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(JobStatus::Running),
            "SUCCESS" => Ok(JobStatus::Success),
            "FAILED" => Ok(JobStatus::Failed),
            "BLOCKED" => Ok(JobStatus::Blocked),
            "SKIPPED" => Ok(JobStatus::Skipped),
            other => Err(format!("unknown job status `{other}`")),
        }
    }
}

/// Status of a `StepRun` record. Absence of a row (modeled as `Option<StepStatus>`
/// at the state-store boundary) means "not successfully completed" — see
/// spec.md §3 invariant (e) and §9 "Resume state".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Success,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Success => "SUCCESS",
            StepStatus::Skipped => "SKIPPED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for StepStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(StepStatus::Success),
            "SKIPPED" => Ok(StepStatus::Skipped),
            other => Err(format!("unknown step status `{other}`")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_display_matches_state_record_vocabulary() {
        assert_eq!(JobStatus::Running.to_string(), "RUNNING");
        assert_eq!(JobStatus::Blocked.to_string(), "BLOCKED");
    }

    #[test]
    fn only_success_satisfies_depends_on() {
        assert!(JobStatus::Success.is_success());
        assert!(!JobStatus::Skipped.is_success());
        assert!(!JobStatus::Failed.is_success());
    }

    #[test]
    fn job_status_round_trips_through_display_and_from_str() {
        for status in [
            JobStatus::Running,
            JobStatus::Success,
            JobStatus::Failed,
            JobStatus::Blocked,
            JobStatus::Skipped,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn step_status_round_trips_through_display_and_from_str() {
        for status in [StepStatus::Success, StepStatus::Skipped] {
            assert_eq!(status.to_string().parse::<StepStatus>().unwrap(), status);
        }
    }
}
