use super::*;
use aetherflow_registry::ResourceBag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

struct FakeLocks {
    held: Mutex<Option<String>>,
    release_calls: AtomicBool,
}

impl FakeLocks {
    fn new() -> Self {
        Self {
            held: Mutex::new(None),
            release_calls: AtomicBool::new(false),
        }
    }
}

impl LockStore for FakeLocks {
    fn try_acquire_lock(&self, lock_key: &str, _owner: &str, _ttl_seconds: u64) -> Result<bool, StepError> {
        let mut held = self.held.lock().unwrap();
        if held.is_some() {
            return Ok(false);
        }
        *held = Some(lock_key.to_string());
        Ok(true)
    }

    fn release_lock(&self, _lock_key: &str, _owner: &str) -> Result<(), StepError> {
        *self.held.lock().unwrap() = None;
        self.release_calls.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct EchoDispatch;

#[async_trait]
impl aetherflow_registry::StepDispatch for EchoDispatch {
    async fn run_step(
        &self,
        step_type: &str,
        inputs: &Value,
        _ctx: &StepContext<'_>,
    ) -> Result<StepOutcome, StepError> {
        if step_type == "fail" {
            return Err(StepError::Failed("inner step failed".to_string()));
        }
        Ok(StepOutcome {
            output: inputs.clone(),
            exit_code: Some(0),
        })
    }
}

fn ctx<'a>(run_id: &'a str, resources: &'a ResourceBag, locks: &'a FakeLocks, dispatch: &'a EchoDispatch) -> StepContext<'a> {
    StepContext {
        flow_id: "f1",
        run_id,
        resources,
        locks,
        dispatch,
        artifacts_dir: std::path::PathBuf::from("/tmp/aetherflow-with-lock-tests/artifacts"),
    }
}

#[tokio::test]
async fn runs_inner_step_and_releases_lock() {
    let locks = FakeLocks::new();
    let dispatch = EchoDispatch;
    let resources = ResourceBag::new();
    let context = ctx("r1", &resources, &locks, &dispatch);

    let step = WithLockStep;
    let inputs = serde_json::json!({
        "lock_key": "flow:f1",
        "step": { "type": "echo", "inputs": { "x": 1 } }
    });
    let outcome = step.run(&inputs, &context).await.unwrap();
    assert_eq!(outcome.output, serde_json::json!({"x": 1}));
    assert!(locks.held.lock().unwrap().is_none());
    assert!(locks.release_calls.load(Ordering::SeqCst));
}

#[tokio::test]
async fn releases_lock_even_when_inner_step_fails() {
    let locks = FakeLocks::new();
    let dispatch = EchoDispatch;
    let resources = ResourceBag::new();
    let context = ctx("r1", &resources, &locks, &dispatch);

    let step = WithLockStep;
    let inputs = serde_json::json!({
        "lock_key": "flow:f1",
        "step": { "type": "fail", "inputs": {} }
    });
    let err = step.run(&inputs, &context).await.unwrap_err();
    assert!(matches!(err, StepError::Failed(_)));
    assert!(locks.held.lock().unwrap().is_none());
}

#[tokio::test]
async fn fails_fast_when_lock_already_held() {
    let locks = FakeLocks::new();
    locks.try_acquire_lock("flow:f1", "other", 60).unwrap();
    let dispatch = EchoDispatch;
    let resources = ResourceBag::new();
    let context = ctx("r1", &resources, &locks, &dispatch);

    let step = WithLockStep;
    let inputs = serde_json::json!({
        "lock_key": "flow:f1",
        "step": { "type": "echo", "inputs": {} }
    });
    let err = step.run(&inputs, &context).await.unwrap_err();
    assert!(matches!(err, StepError::LockAcquisitionFailed(_)));
}

#[tokio::test]
async fn rejects_empty_lock_key() {
    let locks = FakeLocks::new();
    let dispatch = EchoDispatch;
    let resources = ResourceBag::new();
    let context = ctx("r1", &resources, &locks, &dispatch);

    let step = WithLockStep;
    let inputs = serde_json::json!({ "lock_key": "", "step": { "type": "echo" } });
    let err = step.run(&inputs, &context).await.unwrap_err();
    assert!(matches!(err, StepError::InvalidInput(_, _)));
}
