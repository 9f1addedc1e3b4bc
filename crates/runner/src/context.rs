// SPDX-License-Identifier: MIT

//! `RunContext` (spec.md §3): built once at run start, immutable
//! thereafter.

use aetherflow_core::{FlowId, RunId};
use aetherflow_registry::ResourceBag;
use aetherflow_state::StateStore;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct RunContext {
    pub flow_id: FlowId,
    pub run_id: RunId,
    pub env: Arc<HashMap<String, String>>,
    pub connectors: ResourceBag,
    pub state: Arc<StateStore>,
    pub work_root: PathBuf,
}

impl RunContext {
    /// `<work_root>/<flow_id>/<job_id>/<run_id>/manifests`.
    pub fn manifests_dir(&self, job_id: &str) -> PathBuf {
        self.job_run_dir(job_id).join("manifests")
    }

    /// `<work_root>/<flow_id>/<job_id>/<run_id>/artifacts`.
    pub fn artifacts_dir(&self, job_id: &str) -> PathBuf {
        self.job_run_dir(job_id).join("artifacts")
    }

    /// `<work_root>/<flow_id>/<job_id>/<run_id>/artifacts/<step_id>`.
    pub fn step_artifacts_dir(&self, job_id: &str, step_id: &str) -> PathBuf {
        self.artifacts_dir(job_id).join(step_id)
    }

    /// `<work_root>/<flow_id>/<job_id>/<run_id>` — the whole per-job-run
    /// directory a cleanup policy deletes.
    pub fn job_run_dir(&self, job_id: &str) -> PathBuf {
        self.work_root.join(self.flow_id.as_str()).join(job_id).join(self.run_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aetherflow_state::StateStore;

    fn ctx() -> RunContext {
        RunContext {
            flow_id: FlowId::new("f1"),
            run_id: RunId::new("r1"),
            env: Arc::new(HashMap::new()),
            connectors: ResourceBag::new(),
            state: Arc::new(StateStore::open_in_memory().unwrap()),
            work_root: PathBuf::from("/tmp/work"),
        }
    }

    #[test]
    fn step_artifacts_dir_follows_the_documented_layout() {
        let ctx = ctx();
        assert_eq!(
            ctx.step_artifacts_dir("job1", "step1"),
            PathBuf::from("/tmp/work/f1/job1/r1/artifacts/step1")
        );
    }

    #[test]
    fn manifests_dir_is_a_sibling_of_artifacts_dir() {
        let ctx = ctx();
        assert_eq!(ctx.manifests_dir("job1"), PathBuf::from("/tmp/work/f1/job1/r1/manifests"));
    }
}
