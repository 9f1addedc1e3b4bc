// SPDX-License-Identifier: MIT

//! The `external.process` built-in (spec.md §4.7): timeout escalation,
//! idempotency strategies, retry policy, and output validation.
//!
//! Execution state machine per attempt: Starting -> (Running [->
//! TimedOut] -> Terminating -> Killed) -> Exited -> Validating ->
//! Succeeded | Failed.

use aetherflow_registry::{Step, StepContext, StepError, StepOutcome};
use async_trait::async_trait;
use glob::glob;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

const DEFAULT_KILL_GRACE_SECONDS: f64 = 15.0;
const DEFAULT_MAX_CAPTURE_KB: u64 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamMode {
    Inherit,
    Capture,
    File,
    Discard,
}

impl StreamMode {
    fn parse(s: &str) -> Result<Self, StepError> {
        match s {
            "inherit" => Ok(StreamMode::Inherit),
            "capture" => Ok(StreamMode::Capture),
            "file" => Ok(StreamMode::File),
            "discard" => Ok(StreamMode::Discard),
            other => Err(StepError::InvalidInput(
                "log.stdout/log.stderr".to_string(),
                format!("unknown stream mode `{other}`"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
enum Idempotency {
    None,
    Marker { marker_path: String },
    AtomicDir { temp_output_dir: PathBuf, final_output_dir: PathBuf },
}

#[derive(Debug, Clone)]
struct SuccessRule {
    exit_codes: Vec<i32>,
    marker_file: Option<String>,
    required_files: Vec<String>,
    required_globs: Vec<String>,
    forbidden_files: Vec<String>,
}

impl Default for SuccessRule {
    fn default() -> Self {
        Self {
            exit_codes: vec![0],
            marker_file: None,
            required_files: Vec::new(),
            required_globs: Vec::new(),
            forbidden_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct RetryPolicy {
    max_attempts: u32,
    sleep_seconds: f64,
    backoff_multiplier: f64,
    max_backoff_seconds: f64,
    retry_on_exit_codes: Vec<i32>,
    retry_on_timeout: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            sleep_seconds: 0.0,
            backoff_multiplier: 1.0,
            max_backoff_seconds: f64::MAX,
            retry_on_exit_codes: Vec::new(),
            retry_on_timeout: false,
        }
    }
}

#[derive(Debug, Clone)]
struct ProcessConfig {
    program: String,
    args: Vec<String>,
    shell: bool,
    cwd: Option<PathBuf>,
    timeout_seconds: Option<f64>,
    kill_grace_seconds: f64,
    inherit_env: bool,
    env: HashMap<String, String>,
    stdout_mode: StreamMode,
    stderr_mode: StreamMode,
    log_file_path: Option<PathBuf>,
    max_capture_kb: u64,
    idempotency: Idempotency,
    success: SuccessRule,
    retry: RetryPolicy,
    literal_outputs: Map<String, Value>,
}

fn invalid(field: &str, reason: impl Into<String>) -> StepError {
    StepError::InvalidInput(field.to_string(), reason.into())
}

fn str_vec(value: &Value, field: &str) -> Result<Vec<String>, StepError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(field, "expected an array of strings"))
            })
            .collect(),
        _ => Err(invalid(field, "expected an array of strings")),
    }
}

fn int_vec(value: &Value, field: &str) -> Result<Vec<i32>, StepError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_i64()
                    .map(|n| n as i32)
                    .ok_or_else(|| invalid(field, "expected an array of integers"))
            })
            .collect(),
        _ => Err(invalid(field, "expected an array of integers")),
    }
}

fn parse_config(inputs: &Value) -> Result<ProcessConfig, StepError> {
    let command = inputs.get("command").ok_or_else(|| invalid("command", "required"))?;
    let (program, mut args) = match command {
        Value::String(s) => (s.clone(), Vec::new()),
        Value::Array(items) => {
            let mut parts = items
                .iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(|| invalid("command", "array entries must be strings")))
                .collect::<Result<Vec<_>, _>>()?;
            if parts.is_empty() {
                return Err(invalid("command", "must not be empty"));
            }
            let program = parts.remove(0);
            (program, parts)
        }
        _ => return Err(invalid("command", "must be a string or array of strings")),
    };
    if let Some(extra) = inputs.get("args") {
        args.extend(str_vec(extra, "args")?);
    }
    let shell = inputs.get("shell").and_then(Value::as_bool).unwrap_or(false);
    let cwd = inputs.get("cwd").and_then(Value::as_str).map(PathBuf::from);
    let timeout_seconds = inputs.get("timeout_seconds").and_then(Value::as_f64);
    let kill_grace_seconds = inputs
        .get("kill_grace_seconds")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_KILL_GRACE_SECONDS);
    let inherit_env = inputs.get("inherit_env").and_then(Value::as_bool).unwrap_or(true);
    let env = match inputs.get("env") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| {
                v.as_str()
                    .map(|s| (k.clone(), s.to_string()))
                    .ok_or_else(|| invalid("env", "values must be strings"))
            })
            .collect::<Result<HashMap<_, _>, _>>()?,
        Some(Value::Null) | None => HashMap::new(),
        _ => return Err(invalid("env", "must be a mapping")),
    };

    let log = inputs.get("log").cloned().unwrap_or(Value::Object(Default::default()));
    let stdout_mode = log
        .get("stdout")
        .and_then(Value::as_str)
        .map(StreamMode::parse)
        .transpose()?
        .unwrap_or(StreamMode::Capture);
    let stderr_mode = log
        .get("stderr")
        .and_then(Value::as_str)
        .map(StreamMode::parse)
        .transpose()?
        .unwrap_or(StreamMode::Capture);
    let log_file_path = log.get("file_path").and_then(Value::as_str).map(PathBuf::from);
    let max_capture_kb = log.get("max_capture_kb").and_then(Value::as_u64).unwrap_or(DEFAULT_MAX_CAPTURE_KB);

    let idempotency_value = inputs
        .get("idempotency")
        .cloned()
        .unwrap_or(Value::Object(Default::default()));
    let strategy = idempotency_value.get("strategy").and_then(Value::as_str).unwrap_or("none");
    let idempotency = match strategy {
        "none" => Idempotency::None,
        "marker" => {
            let marker_path = idempotency_value
                .get("marker_path")
                .and_then(Value::as_str)
                .or_else(|| inputs.get("success").and_then(|s| s.get("marker_file")).and_then(Value::as_str))
                .ok_or_else(|| invalid("idempotency.marker_path", "required for the `marker` strategy"))?
                .to_string();
            Idempotency::Marker { marker_path }
        }
        "atomic_dir" => {
            let temp_output_dir = idempotency_value
                .get("temp_output_dir")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("idempotency.temp_output_dir", "required for the `atomic_dir` strategy"))?;
            let final_output_dir = idempotency_value
                .get("final_output_dir")
                .and_then(Value::as_str)
                .ok_or_else(|| invalid("idempotency.final_output_dir", "required for the `atomic_dir` strategy"))?;
            Idempotency::AtomicDir {
                temp_output_dir: PathBuf::from(temp_output_dir),
                final_output_dir: PathBuf::from(final_output_dir),
            }
        }
        other => return Err(invalid("idempotency.strategy", format!("unknown strategy `{other}`"))),
    };

    let success_value = inputs.get("success").cloned().unwrap_or(Value::Object(Default::default()));
    let success = SuccessRule {
        exit_codes: match success_value.get("exit_codes") {
            Some(v) => int_vec(v, "success.exit_codes")?,
            None => vec![0],
        },
        marker_file: success_value.get("marker_file").and_then(Value::as_str).map(str::to_string),
        required_files: success_value
            .get("required_files")
            .map(|v| str_vec(v, "success.required_files"))
            .transpose()?
            .unwrap_or_default(),
        required_globs: success_value
            .get("required_globs")
            .map(|v| str_vec(v, "success.required_globs"))
            .transpose()?
            .unwrap_or_default(),
        forbidden_files: success_value
            .get("forbidden_files")
            .map(|v| str_vec(v, "success.forbidden_files"))
            .transpose()?
            .unwrap_or_default(),
    };

    let retry_value = inputs.get("retry").cloned().unwrap_or(Value::Object(Default::default()));
    let retry = RetryPolicy {
        max_attempts: retry_value.get("max_attempts").and_then(Value::as_u64).unwrap_or(1) as u32,
        sleep_seconds: retry_value
            .get("sleep_seconds")
            .or_else(|| retry_value.get("backoff_seconds"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        backoff_multiplier: retry_value.get("backoff_multiplier").and_then(Value::as_f64).unwrap_or(1.0),
        max_backoff_seconds: retry_value
            .get("max_backoff_seconds")
            .and_then(Value::as_f64)
            .unwrap_or(f64::MAX),
        retry_on_exit_codes: match retry_value.get("retry_on_exit_codes") {
            Some(v) => int_vec(v, "retry.retry_on_exit_codes")?,
            None => Vec::new(),
        },
        retry_on_timeout: retry_value.get("retry_on_timeout").and_then(Value::as_bool).unwrap_or(false),
    };

    let literal_outputs = match inputs.get("outputs") {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };

    Ok(ProcessConfig {
        program,
        args,
        shell,
        cwd,
        timeout_seconds,
        kill_grace_seconds,
        inherit_env,
        env,
        stdout_mode,
        stderr_mode,
        log_file_path,
        max_capture_kb,
        idempotency,
        success,
        retry,
        literal_outputs,
    })
}

fn resolve(base: &Option<PathBuf>, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    match base {
        Some(cwd) => cwd.join(p),
        None => p.to_path_buf(),
    }
}

/// `cwd`, resolved relative to the job's artifacts directory when relative
/// (spec.md §4.7); defaults to the artifacts directory itself when the step
/// declares no `cwd`.
fn resolve_cwd(artifacts_dir: &Path, cwd: Option<PathBuf>) -> PathBuf {
    match cwd {
        None => artifacts_dir.to_path_buf(),
        Some(p) if p.is_absolute() => p,
        Some(p) => artifacts_dir.join(p),
    }
}

fn validate_outputs(cfg: &ProcessConfig) -> Result<(), StepError> {
    for required in &cfg.success.required_files {
        let path = resolve(&cfg.cwd, required);
        if !path.exists() {
            return Err(StepError::Failed(format!("outputs invalid: required file `{}` is missing", path.display())));
        }
    }
    for pattern in &cfg.success.required_globs {
        let full_pattern = resolve(&cfg.cwd, pattern);
        let matched = glob(&full_pattern.to_string_lossy())
            .map_err(|e| StepError::Failed(format!("outputs invalid: bad glob `{pattern}`: {e}")))?
            .filter_map(Result::ok)
            .next()
            .is_some();
        if !matched {
            return Err(StepError::Failed(format!("outputs invalid: required glob `{pattern}` matched nothing")));
        }
    }
    for forbidden in &cfg.success.forbidden_files {
        let path = resolve(&cfg.cwd, forbidden);
        if path.exists() {
            return Err(StepError::Failed(format!("outputs invalid: forbidden file `{}` is present", path.display())));
        }
    }
    if let Some(marker) = &cfg.success.marker_file {
        let path = resolve(&cfg.cwd, marker);
        if !path.exists() {
            return Err(StepError::Failed(format!("outputs invalid: marker file `{}` is absent", path.display())));
        }
    }
    Ok(())
}

fn truncate_capture(bytes: Vec<u8>, max_kb: u64) -> String {
    let limit = (max_kb * 1024) as usize;
    let slice = if bytes.len() > limit { &bytes[..limit] } else { &bytes[..] };
    String::from_utf8_lossy(slice).into_owned()
}

async fn read_all<R: tokio::io::AsyncRead + Unpin>(mut reader: R) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    buf
}

struct AttemptOutput {
    exit_code: Option<i32>,
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
    timed_out: bool,
}

async fn run_attempt(cfg: &ProcessConfig, flow_id: &str, run_id: &str) -> Result<AttemptOutput, StepError> {
    let mut command = if cfg.shell {
        let mut c = Command::new("/bin/sh");
        let mut full = cfg.program.clone();
        for arg in &cfg.args {
            full.push(' ');
            full.push_str(arg);
        }
        c.arg("-c").arg(full);
        c
    } else {
        let mut c = Command::new(&cfg.program);
        c.args(&cfg.args);
        c
    };

    if let Some(cwd) = &cfg.cwd {
        command.current_dir(cwd);
    }
    if !cfg.inherit_env {
        command.env_clear();
    }
    command.envs(&cfg.env);
    command.env("AETHERFLOW_FLOW_ID", flow_id);
    command.env("AETHERFLOW_RUN_ID", run_id);
    if let Idempotency::AtomicDir { temp_output_dir, .. } = &cfg.idempotency {
        command.env("AETHERFLOW_OUTPUT_DIR", temp_output_dir);
    }

    command.stdout(match cfg.stdout_mode {
        StreamMode::Inherit => Stdio::inherit(),
        StreamMode::Discard => Stdio::null(),
        StreamMode::Capture | StreamMode::File => Stdio::piped(),
    });
    command.stderr(match cfg.stderr_mode {
        StreamMode::Inherit => Stdio::inherit(),
        StreamMode::Discard => Stdio::null(),
        StreamMode::Capture | StreamMode::File => Stdio::piped(),
    });

    let mut child = command
        .spawn()
        .map_err(|e| StepError::Failed(format!("failed to spawn `{}`: {e}", cfg.program)))?;

    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let wait = async {
        let status = child.wait().await;
        let stdout = match stdout_handle {
            Some(h) => Some(read_all(h).await),
            None => None,
        };
        let stderr = match stderr_handle {
            Some(h) => Some(read_all(h).await),
            None => None,
        };
        (status, stdout, stderr)
    };

    let (status, stdout_bytes, stderr_bytes) = match cfg.timeout_seconds {
        Some(secs) => match tokio::time::timeout(Duration::from_secs_f64(secs), wait).await {
            Ok(result) => result,
            Err(_elapsed) => {
                // TimedOut -> Terminating: SIGTERM, then wait out the grace
                // period, then force-kill (Killed).
                if let Some(pid) = child.id() {
                    let _ = Command::new("kill").args(["-TERM", &pid.to_string()]).status().await;
                }
                let grace = Duration::from_secs_f64(cfg.kill_grace_seconds);
                if tokio::time::timeout(grace, child.wait()).await.is_err() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
                return Ok(AttemptOutput {
                    exit_code: None,
                    stdout: None,
                    stderr: None,
                    timed_out: true,
                });
            }
        },
        None => wait.await,
    };

    let status = status.map_err(|e| StepError::Failed(format!("`{}` wait failed: {e}", cfg.program)))?;

    Ok(AttemptOutput {
        exit_code: status.code(),
        stdout: stdout_bytes,
        stderr: stderr_bytes,
        timed_out: false,
    })
}

/// Route a captured stream to its configured destination: written to
/// `log.file_path` under the `file` mode (spec.md §4.7's stream table),
/// or truncated to `max_capture_kb` for inclusion in the step output
/// under `capture`. `inherit`/`discard` never reach here.
async fn finalize_stream(mode: StreamMode, bytes: Option<Vec<u8>>, file_path: Option<&Path>, max_kb: u64) -> Result<Option<String>, StepError> {
    let Some(bytes) = bytes else { return Ok(None) };
    match mode {
        StreamMode::File => {
            let path = file_path.ok_or_else(|| invalid("log.file_path", "required when log.stdout/log.stderr is `file`"))?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StepError::Failed(format!("failed to prepare log file directory: {e}")))?;
            }
            tokio::fs::write(path, &bytes)
                .await
                .map_err(|e| StepError::Failed(format!("failed to write log file `{}`: {e}", path.display())))?;
            Ok(None)
        }
        StreamMode::Capture => Ok(Some(truncate_capture(bytes, max_kb))),
        StreamMode::Inherit | StreamMode::Discard => Ok(None),
    }
}

pub struct ExternalProcessStep;

#[async_trait]
impl Step for ExternalProcessStep {
    async fn run(&self, inputs: &Value, ctx: &StepContext<'_>) -> Result<StepOutcome, StepError> {
        let mut cfg = parse_config(inputs)?;
        cfg.cwd = Some(resolve_cwd(&ctx.artifacts_dir, cfg.cwd.take()));

        if let Idempotency::Marker { marker_path } = &cfg.idempotency {
            let path = resolve(&cfg.cwd, marker_path);
            if path.exists() && validate_outputs(&cfg).is_ok() {
                return Ok(StepOutcome {
                    output: Value::Object(
                        [
                            ("skipped".to_string(), Value::Bool(true)),
                            ("marker".to_string(), Value::String(marker_path.clone())),
                            ("reason".to_string(), Value::String("marker_present".to_string())),
                        ]
                        .into_iter()
                        .collect(),
                    ),
                    exit_code: None,
                });
            }
        }

        if let Idempotency::AtomicDir { temp_output_dir, .. } = &cfg.idempotency {
            let _ = tokio::fs::remove_dir_all(temp_output_dir).await;
            tokio::fs::create_dir_all(temp_output_dir)
                .await
                .map_err(|e| StepError::Failed(format!("failed to prepare temp output dir: {e}")))?;
        }

        let mut attempts = 0u32;
        let mut backoff = cfg.retry.sleep_seconds;

        loop {
            attempts += 1;
            let attempt = run_attempt(&cfg, ctx.flow_id, ctx.run_id).await?;

            if attempt.timed_out {
                if cfg.retry.retry_on_timeout && attempts < cfg.retry.max_attempts {
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                    backoff = (backoff * cfg.retry.backoff_multiplier).min(cfg.retry.max_backoff_seconds);
                    continue;
                }
                return Err(StepError::TimedOut {
                    timeout_seconds: cfg.timeout_seconds.unwrap_or(0.0) as u64,
                    attempts,
                });
            }

            let exit_code = attempt.exit_code.unwrap_or(-1);
            if !cfg.success.exit_codes.contains(&exit_code) {
                if cfg.retry.retry_on_exit_codes.contains(&exit_code) && attempts < cfg.retry.max_attempts {
                    tokio::time::sleep(Duration::from_secs_f64(backoff)).await;
                    backoff = (backoff * cfg.retry.backoff_multiplier).min(cfg.retry.max_backoff_seconds);
                    continue;
                }
                return Err(StepError::Failed(format!("exit code {exit_code} not in success.exit_codes")));
            }

            if let Idempotency::AtomicDir { temp_output_dir, final_output_dir } = &cfg.idempotency {
                promote_atomic_dir(temp_output_dir, final_output_dir).await?;
            }

            validate_outputs(&cfg)?;

            let stdout_text = finalize_stream(cfg.stdout_mode, attempt.stdout, cfg.log_file_path.as_deref(), cfg.max_capture_kb).await?;
            let stderr_text = finalize_stream(cfg.stderr_mode, attempt.stderr, cfg.log_file_path.as_deref(), cfg.max_capture_kb).await?;

            let mut output = Map::new();
            output.insert("exit_code".to_string(), Value::from(exit_code));
            output.insert("attempts".to_string(), Value::from(attempts));
            if let Some(stdout) = stdout_text {
                output.insert("stdout".to_string(), Value::String(stdout));
            }
            if let Some(stderr) = stderr_text {
                output.insert("stderr".to_string(), Value::String(stderr));
            }
            if cfg.stdout_mode == StreamMode::File || cfg.stderr_mode == StreamMode::File {
                if let Some(log_file) = &cfg.log_file_path {
                    output.insert("log_file".to_string(), Value::String(log_file.to_string_lossy().into_owned()));
                }
            }
            for (k, v) in &cfg.literal_outputs {
                output.insert(k.clone(), v.clone());
            }

            return Ok(StepOutcome {
                output: Value::Object(output),
                exit_code: Some(exit_code),
            });
        }
    }
}

async fn promote_atomic_dir(temp_dir: &Path, final_dir: &Path) -> Result<(), StepError> {
    if let Some(parent) = final_dir.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StepError::Failed(format!("failed to prepare final output dir: {e}")))?;
    }
    let _ = tokio::fs::remove_dir_all(final_dir).await;
    tokio::fs::rename(temp_dir, final_dir)
        .await
        .map_err(|e| StepError::Failed(format!("failed to promote atomic output dir: {e}")))
}

#[cfg(test)]
#[path = "external_process_tests.rs"]
mod tests;
