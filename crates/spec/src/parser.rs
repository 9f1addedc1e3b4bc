// SPDX-License-Identifier: MIT

//! Loading flow, profiles, and bundle manifest documents from disk.

use crate::error::SpecError;
use crate::manifest::BundleManifest;
use crate::model::{FlowSpec, ProfilesFile};
use std::path::Path;

fn read_to_string(path: &Path) -> Result<String, SpecError> {
    std::fs::read_to_string(path).map_err(|source| SpecError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Parse a flow document from its on-disk YAML representation.
pub fn load_flow(path: &Path) -> Result<FlowSpec, SpecError> {
    let text = read_to_string(path)?;
    serde_yaml::from_str(&text).map_err(|source| SpecError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

/// Parse a flow document from an in-memory YAML string (used by tests
/// and by callers embedding flows without a filesystem round trip).
pub fn parse_flow_str(yaml: &str) -> Result<FlowSpec, SpecError> {
    serde_yaml::from_str(yaml).map_err(|source| SpecError::Yaml {
        path: "<inline>".to_string(),
        source,
    })
}

/// Parse a profiles document (name -> overlay fragment).
pub fn load_profiles(path: &Path) -> Result<ProfilesFile, SpecError> {
    let text = read_to_string(path)?;
    serde_yaml::from_str(&text).map_err(|source| SpecError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

/// Parse a bundle manifest (`aetherflow.manifest.json` per spec.md §6).
pub fn load_manifest(path: &Path) -> Result<BundleManifest, SpecError> {
    let text = read_to_string(path)?;
    serde_json::from_str(&text).map_err(|source| SpecError::Json {
        path: path.display().to_string(),
        source,
    })
}
