// SPDX-License-Identifier: MIT

//! Bundle manifest and env-file specs (spec.md §6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleMode {
    InternalFast,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleSourceType {
    Local,
    Git,
    Archive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleSource {
    #[serde(rename = "type")]
    pub source_type: BundleSourceType,
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleLayout {
    pub flows: String,
    pub profiles: String,
    pub plugins: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleSpec {
    pub source: BundleSource,
    pub layout: BundleLayout,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsSpec {
    #[serde(default)]
    pub plugins: Option<String>,
}

/// `type` discriminator for one entry of `env_files` (spec.md §6
/// "Env-file spec").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvFileType {
    Dotenv,
    Json,
    Dir,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvFileSpec {
    #[serde(rename = "type")]
    pub file_type: EnvFileType,
    pub path: String,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BundleManifest {
    pub version: u32,
    pub mode: BundleMode,
    pub bundle: BundleSpec,
    #[serde(default)]
    pub paths: Option<PathsSpec>,
    #[serde(default)]
    pub zip_drivers: Vec<String>,
    #[serde(default)]
    pub env_files: Vec<EnvFileSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_manifest() {
        let yaml = r#"
version: 1
mode: internal_fast
bundle:
  source: { type: local, location: "." }
  layout: { flows: "flows", profiles: "profiles", plugins: "plugins" }
env_files:
  - { type: dotenv, path: ".env", optional: true }
"#;
        let manifest: BundleManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(manifest.mode, BundleMode::InternalFast);
        assert_eq!(manifest.env_files.len(), 1);
        assert!(manifest.env_files[0].optional);
    }
}
