// SPDX-License-Identifier: MIT

//! `Settings`: one value built once from the environment snapshot and
//! threaded explicitly through the runner (spec.md §6, §9 "Global
//! settings and secrets hooks").

use crate::error::RunnerError;
use aetherflow_spec::{BundleMode, EnvFileSpec};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorCachePolicy {
    Run,
    Process,
    None,
}

/// Everything the runner reads from `AETHERFLOW_*` environment
/// variables (spec.md §6), fixed into one explicit value rather than
/// read ad hoc at each use site.
#[derive(Debug, Clone)]
pub struct Settings {
    pub work_root: PathBuf,
    pub state_root: PathBuf,
    pub mode: BundleMode,
    pub env_files: Vec<EnvFileSpec>,
    pub profiles_file: Option<PathBuf>,
    pub profiles_json: Option<String>,
    pub plugin_paths: Vec<String>,
    pub secrets_module: Option<String>,
    pub secrets_path: Option<PathBuf>,
    pub strict_templates: bool,
    pub validate_env_strict: bool,
    pub log_format: LogFormat,
    pub connector_cache_default: ConnectorCachePolicy,
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

impl Settings {
    /// Build a `Settings` from a process-style environment snapshot.
    /// `AETHERFLOW_PLUGIN_PATHS` is ignored entirely when `mode` resolves
    /// to `enterprise`, per spec.md §6.
    pub fn from_env(env: &HashMap<String, String>) -> Result<Self, RunnerError> {
        let get = |key: &str| env.get(key).map(String::as_str);

        let work_root = PathBuf::from(get("AETHERFLOW_WORK_ROOT").unwrap_or("/tmp/work"));
        let state_root = PathBuf::from(get("AETHERFLOW_STATE_ROOT").unwrap_or("/tmp/state"));
        let mode = match get("AETHERFLOW_MODE").unwrap_or("internal_fast") {
            "enterprise" => BundleMode::Enterprise,
            _ => BundleMode::InternalFast,
        };

        let env_files = match get("AETHERFLOW_ENV_FILES_JSON") {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_str(raw).map_err(|source| RunnerError::EnvFileJson {
                    path: "AETHERFLOW_ENV_FILES_JSON".to_string(),
                    source,
                })?
            }
            _ => Vec::new(),
        };

        let plugin_paths = if mode == BundleMode::Enterprise {
            Vec::new()
        } else {
            get("AETHERFLOW_PLUGIN_PATHS")
                .map(|raw| raw.split(':').filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default()
        };

        let log_format = match get("AETHERFLOW_LOG_FORMAT").unwrap_or("text") {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let connector_cache_default = match get("AETHERFLOW_CONNECTOR_CACHE_DEFAULT").unwrap_or("run") {
            "process" => ConnectorCachePolicy::Process,
            "none" => ConnectorCachePolicy::None,
            _ => ConnectorCachePolicy::Run,
        };

        Ok(Self {
            work_root,
            state_root,
            mode,
            env_files,
            profiles_file: get("AETHERFLOW_PROFILES_FILE").map(PathBuf::from),
            profiles_json: get("AETHERFLOW_PROFILES_JSON").map(str::to_string),
            plugin_paths,
            secrets_module: get("AETHERFLOW_SECRETS_MODULE").map(str::to_string),
            secrets_path: get("AETHERFLOW_SECRETS_PATH").map(PathBuf::from),
            strict_templates: get("AETHERFLOW_STRICT_TEMPLATES").map(|v| parse_bool(v, true)).unwrap_or(true),
            validate_env_strict: get("AETHERFLOW_VALIDATE_ENV_STRICT").map(|v| parse_bool(v, false)).unwrap_or(false),
            log_format,
            connector_cache_default,
        })
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
