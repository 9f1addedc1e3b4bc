// SPDX-License-Identifier: MIT

//! Builds the immutable environment snapshot a run executes against
//! (spec.md §4.5 step 1, §6 "Env-file spec"). Never mutates the real
//! process environment — everything here reads into an owned map.

use crate::error::RunnerError;
use crate::secrets::SecretsHook;
use aetherflow_spec::{EnvFileSpec, EnvFileType};
use std::collections::HashMap;
use std::path::Path;

fn strip_quotes(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some(eq_pos) = trimmed.find('=') {
            let key = trimmed[..eq_pos].trim().to_string();
            if key.is_empty() {
                continue;
            }
            out.insert(key, strip_quotes(&trimmed[eq_pos + 1..]));
        }
    }
    out
}

fn load_dotenv(path: &Path) -> Result<HashMap<String, String>, RunnerError> {
    let content = std::fs::read_to_string(path).map_err(|source| RunnerError::EnvFile {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_dotenv(&content))
}

fn load_json(path: &Path) -> Result<HashMap<String, String>, RunnerError> {
    let content = std::fs::read_to_string(path).map_err(|source| RunnerError::EnvFile {
        path: path.display().to_string(),
        source,
    })?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|source| RunnerError::EnvFileJson {
            path: path.display().to_string(),
            source,
        })?;
    let mut out = HashMap::new();
    if let serde_json::Value::Object(map) = value {
        for (k, v) in map {
            let text = match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            out.insert(k, text);
        }
    }
    Ok(out)
}

fn load_dir(path: &Path) -> Result<HashMap<String, String>, RunnerError> {
    let mut out = HashMap::new();
    let entries = std::fs::read_dir(path).map_err(|source| RunnerError::EnvFile {
        path: path.display().to_string(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| RunnerError::EnvFile {
            path: path.display().to_string(),
            source,
        })?;
        let entry_path = entry.path();
        if !entry_path.is_file() {
            continue;
        }
        let Some(name) = entry_path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let content = std::fs::read_to_string(&entry_path).map_err(|source| RunnerError::EnvFile {
            path: entry_path.display().to_string(),
            source,
        })?;
        out.insert(name.to_string(), content);
    }
    Ok(out)
}

fn apply_env_file(snapshot: &mut HashMap<String, String>, spec: &EnvFileSpec) -> Result<(), RunnerError> {
    let path = Path::new(&spec.path);
    if spec.optional && !path.exists() {
        return Ok(());
    }
    let loaded = match spec.file_type {
        EnvFileType::Dotenv => load_dotenv(path)?,
        EnvFileType::Json => load_json(path)?,
        EnvFileType::Dir => load_dir(path)?,
    };
    for (key, value) in loaded {
        let key = if spec.prefix.is_empty() {
            key
        } else {
            format!("{}{}", spec.prefix, key)
        };
        snapshot.insert(key, value);
    }
    Ok(())
}

/// Build the frozen environment mapping a run executes against:
/// process env, then `settings`-level env files, then `manifest_env_files`
/// (last-wins), finally passed through the secrets hook's `expand_env`.
pub fn build_env_snapshot(
    process_env: HashMap<String, String>,
    settings_env_files: &[EnvFileSpec],
    manifest_env_files: &[EnvFileSpec],
    secrets: &dyn SecretsHook,
) -> Result<HashMap<String, String>, RunnerError> {
    let mut snapshot = process_env;
    for spec in settings_env_files {
        apply_env_file(&mut snapshot, spec)?;
    }
    for spec in manifest_env_files {
        apply_env_file(&mut snapshot, spec)?;
    }
    Ok(secrets.expand_env(&snapshot))
}

#[cfg(test)]
#[path = "env_snapshot_tests.rs"]
mod tests;
