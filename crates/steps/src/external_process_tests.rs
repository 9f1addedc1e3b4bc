use super::*;
use aetherflow_registry::{LockStore, ResourceBag, StepDispatch};
use std::path::PathBuf;
use tempfile::tempdir;

struct NoLocks;
impl LockStore for NoLocks {
    fn try_acquire_lock(&self, _lock_key: &str, _owner: &str, _ttl_seconds: u64) -> Result<bool, StepError> {
        Ok(true)
    }
    fn release_lock(&self, _lock_key: &str, _owner: &str) -> Result<(), StepError> {
        Ok(())
    }
}

struct NoDispatch;
#[async_trait]
impl StepDispatch for NoDispatch {
    async fn run_step(&self, _step_type: &str, _inputs: &Value, _ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        unreachable!("external.process never recurses into other steps")
    }
}

fn ctx<'a>(resources: &'a ResourceBag, locks: &'a NoLocks, dispatch: &'a NoDispatch, artifacts_dir: PathBuf) -> StepContext<'a> {
    StepContext {
        flow_id: "f1",
        run_id: "r1",
        resources,
        locks,
        dispatch,
        artifacts_dir,
    }
}

#[tokio::test]
async fn succeeds_with_default_exit_code_zero() {
    let artifacts = tempdir().unwrap();
    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, artifacts.path().to_path_buf());

    let step = ExternalProcessStep;
    let inputs = serde_json::json!({ "command": "true", "shell": true });
    let outcome = step.run(&inputs, &context).await.unwrap();
    assert_eq!(outcome.exit_code, Some(0));
    assert_eq!(outcome.output["attempts"], 1);
}

#[tokio::test]
async fn fails_on_nonzero_exit_code() {
    let artifacts = tempdir().unwrap();
    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, artifacts.path().to_path_buf());

    let step = ExternalProcessStep;
    let inputs = serde_json::json!({ "command": "exit 3", "shell": true });
    let err = step.run(&inputs, &context).await.unwrap_err();
    assert!(matches!(err, StepError::Failed(_)));
}

#[tokio::test]
async fn retries_on_configured_exit_code() {
    let artifacts = tempdir().unwrap();
    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, artifacts.path().to_path_buf());

    let step = ExternalProcessStep;
    // always exits 7; retry is configured for it but attempts are exhausted -> still fails
    let inputs = serde_json::json!({
        "command": "exit 7",
        "shell": true,
        "retry": { "max_attempts": 2, "retry_on_exit_codes": [7], "sleep_seconds": 0.01 }
    });
    let err = step.run(&inputs, &context).await.unwrap_err();
    assert!(matches!(err, StepError::Failed(_)));
}

#[tokio::test]
async fn times_out_and_kills_long_running_process() {
    let artifacts = tempdir().unwrap();
    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, artifacts.path().to_path_buf());

    let step = ExternalProcessStep;
    let inputs = serde_json::json!({
        "command": "sleep 5",
        "shell": true,
        "timeout_seconds": 0.2,
        "kill_grace_seconds": 0.1
    });
    let err = step.run(&inputs, &context).await.unwrap_err();
    assert!(matches!(err, StepError::TimedOut { attempts: 1, .. }));
}

#[tokio::test]
async fn timeout_failure_reports_attempts_exhausted_by_retry() {
    let artifacts = tempdir().unwrap();
    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, artifacts.path().to_path_buf());

    let step = ExternalProcessStep;
    let inputs = serde_json::json!({
        "command": "sleep 5",
        "shell": true,
        "timeout_seconds": 0.2,
        "kill_grace_seconds": 0.1,
        "retry": { "max_attempts": 2, "retry_on_timeout": true, "sleep_seconds": 0.01 }
    });
    let err = step.run(&inputs, &context).await.unwrap_err();
    assert!(matches!(err, StepError::TimedOut { attempts: 2, .. }));
}

#[tokio::test]
async fn marker_idempotency_skips_without_spawning() {
    let dir = tempdir().unwrap();
    let marker = dir.path().join("done.marker");
    std::fs::write(&marker, b"").unwrap();

    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, dir.path().to_path_buf());

    let step = ExternalProcessStep;
    let inputs = serde_json::json!({
        "command": "exit 1",
        "shell": true,
        "idempotency": { "strategy": "marker", "marker_path": marker.to_string_lossy() },
        "success": { "marker_file": marker.to_string_lossy() }
    });
    let outcome = step.run(&inputs, &context).await.unwrap();
    assert_eq!(outcome.output["skipped"], true);
    assert_eq!(outcome.output["reason"], "marker_present");
}

#[tokio::test]
async fn atomic_dir_promotes_temp_output_on_success() {
    let dir = tempdir().unwrap();
    let temp_output = dir.path().join("tmp-out");
    let final_output = dir.path().join("final-out");

    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, dir.path().to_path_buf());

    let step = ExternalProcessStep;
    let inputs = serde_json::json!({
        "command": "echo hi > \"$AETHERFLOW_OUTPUT_DIR/out.txt\"",
        "shell": true,
        "idempotency": {
            "strategy": "atomic_dir",
            "temp_output_dir": temp_output.to_string_lossy(),
            "final_output_dir": final_output.to_string_lossy()
        },
        "success": { "required_files": [final_output.join("out.txt").to_string_lossy()] }
    });
    let outcome = step.run(&inputs, &context).await.unwrap();
    assert_eq!(outcome.exit_code, Some(0));
    assert!(final_output.join("out.txt").exists());
    assert!(!temp_output.exists());
}

#[tokio::test]
async fn literal_outputs_are_copied_verbatim() {
    let artifacts = tempdir().unwrap();
    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, artifacts.path().to_path_buf());

    let step = ExternalProcessStep;
    let inputs = serde_json::json!({
        "command": "true",
        "shell": true,
        "outputs": { "kind": "ingest" }
    });
    let outcome = step.run(&inputs, &context).await.unwrap();
    assert_eq!(outcome.output["kind"], "ingest");
}

#[tokio::test]
async fn file_log_mode_writes_captured_stream_to_disk() {
    let dir = tempdir().unwrap();
    let log_path = dir.path().join("step.log");

    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, dir.path().to_path_buf());

    let step = ExternalProcessStep;
    let inputs = serde_json::json!({
        "command": "echo hello",
        "shell": true,
        "log": { "stdout": "file", "stderr": "discard", "file_path": log_path.to_string_lossy() }
    });
    let outcome = step.run(&inputs, &context).await.unwrap();
    assert!(outcome.output.get("stdout").is_none());
    assert_eq!(outcome.output["log_file"], log_path.to_string_lossy().as_ref());
    let written = std::fs::read_to_string(&log_path).unwrap();
    assert_eq!(written.trim(), "hello");
}

#[tokio::test]
async fn rejects_missing_command() {
    let artifacts = tempdir().unwrap();
    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, artifacts.path().to_path_buf());

    let step = ExternalProcessStep;
    let err = step.run(&serde_json::json!({}), &context).await.unwrap_err();
    assert!(matches!(err, StepError::InvalidInput(_, _)));
}

#[tokio::test]
async fn cwd_defaults_to_the_job_artifacts_directory() {
    let artifacts = tempdir().unwrap();
    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, artifacts.path().to_path_buf());

    let step = ExternalProcessStep;
    // relative `required_files` resolve against the same default cwd the
    // child process ran in.
    let inputs = serde_json::json!({
        "command": "pwd > pwd.out",
        "shell": true,
        "success": { "required_files": ["pwd.out"] }
    });
    let outcome = step.run(&inputs, &context).await.unwrap();
    assert_eq!(outcome.exit_code, Some(0));
    let written = std::fs::read_to_string(artifacts.path().join("pwd.out")).unwrap();
    assert_eq!(written.trim(), artifacts.path().canonicalize().unwrap().to_string_lossy());
}

#[tokio::test]
async fn relative_cwd_resolves_against_the_job_artifacts_directory() {
    let artifacts = tempdir().unwrap();
    std::fs::create_dir_all(artifacts.path().join("subdir")).unwrap();
    let resources = ResourceBag::new();
    let locks = NoLocks;
    let dispatch = NoDispatch;
    let context = ctx(&resources, &locks, &dispatch, artifacts.path().to_path_buf());

    let step = ExternalProcessStep;
    let inputs = serde_json::json!({
        "command": "touch marker",
        "shell": true,
        "cwd": "subdir"
    });
    let outcome = step.run(&inputs, &context).await.unwrap();
    assert_eq!(outcome.exit_code, Some(0));
    assert!(artifacts.path().join("subdir").join("marker").exists());
}
