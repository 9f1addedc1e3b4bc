use super::*;
use aetherflow_core::{JobStatus, StepStatus};
use tempfile::tempdir;

#[test]
fn job_status_round_trips() {
    let store = StateStore::open_in_memory().unwrap();
    assert_eq!(store.get_job_status("r1", "a").unwrap(), None);
    store.set_job_status("r1", "a", JobStatus::Running, 100).unwrap();
    assert_eq!(store.get_job_status("r1", "a").unwrap(), Some(JobStatus::Running));
    store.set_job_status("r1", "a", JobStatus::Success, 200).unwrap();
    assert_eq!(store.get_job_status("r1", "a").unwrap(), Some(JobStatus::Success));
}

#[test]
fn step_status_round_trips() {
    let store = StateStore::open_in_memory().unwrap();
    store.set_step_status("r1", "a", "s1", StepStatus::Success, 10).unwrap();
    assert_eq!(
        store.get_step_status("r1", "a", "s1").unwrap(),
        Some(StepStatus::Success)
    );
}

#[test]
fn step_result_round_trips_alongside_status() {
    let store = StateStore::open_in_memory().unwrap();
    let result = serde_json::json!({"exit_code": 0, "stdout": "ok"});
    store.set_step_result("r1", "a", "s1", StepStatus::Success, &result, 10).unwrap();
    let (status, stored) = store.get_step_result("r1", "a", "s1").unwrap().unwrap();
    assert_eq!(status, StepStatus::Success);
    assert_eq!(stored, result);
}

#[test]
fn step_result_defaults_to_null_when_written_without_a_result() {
    let store = StateStore::open_in_memory().unwrap();
    store.set_step_status("r1", "a", "s1", StepStatus::Skipped, 10).unwrap();
    let (status, stored) = store.get_step_result("r1", "a", "s1").unwrap().unwrap();
    assert_eq!(status, StepStatus::Skipped);
    assert_eq!(stored, serde_json::Value::Null);
}

#[test]
fn statuses_are_scoped_per_run() {
    let store = StateStore::open_in_memory().unwrap();
    store.set_job_status("r1", "a", JobStatus::Success, 1).unwrap();
    assert_eq!(store.get_job_status("r2", "a").unwrap(), None);
}

#[test]
fn lock_is_acquired_once_and_blocks_other_runs() {
    let store = StateStore::open_in_memory().unwrap();
    assert!(store.try_acquire_lock("flow:f1", "r1", 60, 1000).unwrap());
    assert!(!store.try_acquire_lock("flow:f1", "r2", 60, 1001).unwrap());
}

#[test]
fn lock_is_reentrant_for_same_run() {
    let store = StateStore::open_in_memory().unwrap();
    assert!(store.try_acquire_lock("flow:f1", "r1", 60, 1000).unwrap());
    assert!(store.try_acquire_lock("flow:f1", "r1", 60, 1500).unwrap());
}

#[test]
fn expired_lock_can_be_stolen() {
    let store = StateStore::open_in_memory().unwrap();
    assert!(store.try_acquire_lock("flow:f1", "r1", 1, 0).unwrap());
    // ttl_seconds=1 -> expires at 1000ms
    assert!(store.try_acquire_lock("flow:f1", "r2", 1, 2000).unwrap());
}

#[test]
fn release_only_succeeds_for_holder() {
    let store = StateStore::open_in_memory().unwrap();
    store.try_acquire_lock("flow:f1", "r1", 60, 0).unwrap();
    store.release_lock("flow:f1", "r2").unwrap();
    assert!(!store.try_acquire_lock("flow:f1", "r2", 60, 500).unwrap());
    store.release_lock("flow:f1", "r1").unwrap();
    assert!(store.try_acquire_lock("flow:f1", "r2", 60, 600).unwrap());
}

#[test]
fn opens_and_persists_to_disk() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("state.db");
    {
        let store = StateStore::open(&db_path).unwrap();
        store.set_job_status("r1", "a", JobStatus::Success, 1).unwrap();
    }
    let reopened = StateStore::open(&db_path).unwrap();
    assert_eq!(reopened.get_job_status("r1", "a").unwrap(), Some(JobStatus::Success));
}

#[test]
fn resolve_state_path_joins_relative_to_workspace_root() {
    let root = Path::new("/tmp/work");
    assert_eq!(resolve_state_path(root, "state.db"), root.join("state.db"));
    assert_eq!(resolve_state_path(root, "/abs/state.db"), PathBuf::from("/abs/state.db"));
}
