// SPDX-License-Identifier: MIT

//! Profile overlay + template expansion + connector construction
//! pipeline (spec.md §4.4).
//!
//! Resources are built once, in declaration order, for the whole run —
//! every step that references a resource by name shares the same
//! connector handle (spec.md §9 "Connector handle sharing scope":
//! within-run only, never across runs or processes).

use crate::error::ProfileError;
use aetherflow_registry::{Connector, ConnectorRegistry, ResourceBag};
use aetherflow_resolver::{as_standalone_var, render};
use aetherflow_spec::{FlowSpec, ProfileSpec, ProfilesFile, ResourceSpec};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Performs out-of-band decoding of a resolved secret value (e.g.
/// base64, a vault lookup, a file read) for `config` fields a resource
/// marks `true` in its `decode` map (spec.md §3 `ResourceSpec.decode`).
pub trait DecodeHook: Send + Sync {
    fn decode(&self, raw: &str) -> Result<String, String>;
}

/// A decode hook that performs no transformation — used when a flow
/// declares no `decode` fields, or by tests.
pub struct NoopDecodeHook;

impl DecodeHook for NoopDecodeHook {
    fn decode(&self, raw: &str) -> Result<String, String> {
        Ok(raw.to_string())
    }
}

fn merge_maps(base: &Map<String, Value>, overlay: &Map<String, Value>) -> Map<String, Value> {
    let mut out = base.clone();
    for (k, v) in overlay {
        out.insert(k.clone(), v.clone());
    }
    out
}

fn apply_profile(resource: &ResourceSpec, profile: Option<&ProfileSpec>) -> ResourceSpec {
    match profile {
        None => resource.clone(),
        Some(p) => ResourceSpec {
            kind: resource.kind.clone(),
            driver: resource.driver.clone(),
            profile: resource.profile.clone(),
            config: merge_maps(&resource.config, &p.config),
            options: merge_maps(&resource.options, &p.options),
            decode: merge_maps(&resource.decode, &p.decode),
        },
    }
}

/// Renders every string leaf of `value` against `env_root`, except leaves
/// covered by a `true` marker in `decode` (mirrored by shape per spec.md
/// §3/§4.4) — those are left as raw templates for [`apply_decode`] to
/// render and decode in one step, since a decode-marked field must see its
/// own template text to enforce the standalone-token rule.
fn render_with_decode_skip(value: &Value, decode: &Value, env_root: &Value, resource: &str, field: &str) -> Result<Value, ProfileError> {
    if matches!(decode, Value::Bool(true)) {
        return Ok(value.clone());
    }
    match value {
        Value::String(s) => render(s, env_root)
            .map(Value::String)
            .map_err(|source| ProfileError::Template {
                resource: resource.to_string(),
                field: field.to_string(),
                source,
            }),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                out.push(render_with_decode_skip(item, &Value::Null, env_root, resource, &format!("{field}[{i}]"))?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (k, v) in map {
                let sub_decode = decode.get(k).cloned().unwrap_or(Value::Null);
                out.insert(k.clone(), render_with_decode_skip(v, &sub_decode, env_root, resource, &format!("{field}.{k}"))?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Walks `target` alongside `decode`, descending nested mappings, and at
/// every `true` leaf renders the raw template (requiring it be a
/// standalone `{{...}}` token) and runs it through the secrets-decode hook.
fn apply_decode(
    resource_name: &str,
    target: &mut Value,
    decode: &Value,
    env_root: &Value,
    hook: &dyn DecodeHook,
    path: &str,
) -> Result<(), ProfileError> {
    match decode {
        Value::Bool(true) => {
            let raw_template = target.as_str().ok_or_else(|| ProfileError::DecodeRequiresStandaloneToken {
                resource: resource_name.to_string(),
                field: path.to_string(),
            })?;
            let standalone = as_standalone_var(raw_template).map_err(|source| ProfileError::Template {
                resource: resource_name.to_string(),
                field: path.to_string(),
                source,
            })?;
            if standalone.is_none() {
                return Err(ProfileError::DecodeRequiresStandaloneToken {
                    resource: resource_name.to_string(),
                    field: path.to_string(),
                });
            }
            let rendered = render(raw_template, env_root).map_err(|source| ProfileError::Template {
                resource: resource_name.to_string(),
                field: path.to_string(),
                source,
            })?;
            let decoded = hook.decode(&rendered).map_err(|reason| ProfileError::DecodeFailed {
                resource: resource_name.to_string(),
                field: path.to_string(),
                reason,
            })?;
            *target = Value::String(decoded);
            Ok(())
        }
        Value::Object(submap) => {
            let Value::Object(target_map) = target else {
                return Ok(());
            };
            for (k, sub_decode) in submap {
                if let Some(sub_target) = target_map.get_mut(k) {
                    apply_decode(resource_name, sub_target, sub_decode, env_root, hook, &format!("{path}.{k}"))?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Build every resource declared in `flow`, in declaration order,
/// applying its matching profile overlay, rendering templates against
/// `env_root`, decoding marked fields, and constructing the connector
/// through `registry`.
pub fn build_resources(
    flow: &FlowSpec,
    profiles: &ProfilesFile,
    env_root: &Value,
    registry: &ConnectorRegistry,
    decode_hook: &dyn DecodeHook,
) -> Result<IndexMap<String, Arc<dyn Connector>>, ProfileError> {
    let mut bag = IndexMap::new();
    for (name, resource) in &flow.resources {
        let profile = match &resource.profile {
            Some(profile_name) => Some(profiles.get(profile_name).ok_or_else(|| {
                ProfileError::UnknownProfile {
                    resource: name.clone(),
                    profile: profile_name.clone(),
                }
            })?),
            None => None,
        };
        let merged = apply_profile(resource, profile);

        let decode_tree = Value::Object(merged.decode.clone());
        let mut config_value = render_with_decode_skip(&Value::Object(merged.config.clone()), &decode_tree, env_root, name, "config")?;
        let mut options_value = render_with_decode_skip(&Value::Object(merged.options.clone()), &decode_tree, env_root, name, "options")?;

        apply_decode(name, &mut config_value, &decode_tree, env_root, decode_hook, "config")?;
        apply_decode(name, &mut options_value, &decode_tree, env_root, decode_hook, "options")?;

        let config = match config_value {
            Value::Object(m) => m,
            _ => Map::new(),
        };
        let options = options_value;

        let connector = registry.build(&merged.kind, &merged.driver, &Value::Object(config), &options)?;
        bag.insert(name.clone(), connector);
    }
    Ok(bag)
}

/// Convert the declaration-ordered resource bag into the
/// [`ResourceBag`] lookup map steps consume.
pub fn as_resource_bag(built: &IndexMap<String, Arc<dyn Connector>>) -> ResourceBag {
    built.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}
