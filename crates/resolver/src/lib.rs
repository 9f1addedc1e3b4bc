// SPDX-License-Identifier: MIT

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The single strict template resolver (spec.md §4.2).
//!
//! One function renders `{{PATH}}` / `{{PATH:DEFAULT}}` tokens against a
//! `serde_json::Value` variable root. Scoping by phase (env-only, vs.
//! env+steps+job+jobs+run_id+flow_id, vs. +result) is achieved entirely by
//! the caller choosing a smaller root — this module has no notion of
//! phases (spec.md §9 "Scoped variable root for the resolver").

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

/// Errors raised by the resolver (spec.md §7: `ResolverSyntaxError`,
/// `ResolverMissingKeyError`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolverError {
    /// Any string containing `${…}`, `{%…%}`, `{#…#}`, or a bare `{…}`
    /// that doesn't match `{{VAR}}`/`{{VAR:DEFAULT}}`. The message is
    /// fixed by spec.md §4.2/§8 property 6 — callers must not reword it.
    #[error("Unsupported templating syntax. Use {{{{VAR}}}} or {{{{VAR:DEFAULT}}}}")]
    Syntax,
    /// `PATH` resolved to nothing (missing segment or empty string) and
    /// no `DEFAULT` was given.
    #[error("missing required template value: {0}")]
    MissingKey(String),
}

/// One parsed piece of a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var { path: String, default: Option<String> },
}

#[allow(clippy::expect_used)]
static PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("constant regex pattern is valid")
});

fn find_double_close(chars: &[char]) -> Option<usize> {
    if chars.len() < 2 {
        return None;
    }
    (0..=chars.len() - 2).find(|&idx| chars[idx] == '}' && chars[idx + 1] == '}')
}

fn parse_inner(inner: &str) -> Result<(String, Option<String>), ResolverError> {
    let (path_part, default_part) = match inner.find(':') {
        Some(idx) => (&inner[..idx], Some(inner[idx + 1..].to_string())),
        None => (inner, None),
    };
    let path = path_part.trim().to_string();
    if path.is_empty() || !PATH_PATTERN.is_match(&path) {
        return Err(ResolverError::Syntax);
    }
    Ok((path, default_part))
}

/// Split `s` into literal and `{{…}}` segments, rejecting any other
/// brace pattern along the way.
fn tokenize(s: &str) -> Result<Vec<Segment>, ResolverError> {
    let chars: Vec<char> = s.chars().collect();
    let len = chars.len();
    let mut i = 0usize;
    let mut literal = String::new();
    let mut out = Vec::new();

    while i < len {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c == '$' && next == Some('{') {
            return Err(ResolverError::Syntax);
        }
        if c == '{' && next == Some('{') {
            let search_from = i + 2;
            match find_double_close(&chars[search_from..]) {
                Some(rel) => {
                    let inner: String = chars[search_from..search_from + rel].iter().collect();
                    if !literal.is_empty() {
                        out.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    let (path, default) = parse_inner(&inner)?;
                    out.push(Segment::Var { path, default });
                    i = search_from + rel + 2;
                    continue;
                }
                None => return Err(ResolverError::Syntax),
            }
        }
        if c == '{' && (next == Some('%') || next == Some('#')) {
            return Err(ResolverError::Syntax);
        }
        if c == '{' || c == '}' {
            return Err(ResolverError::Syntax);
        }

        literal.push(c);
        i += 1;
    }

    if !literal.is_empty() {
        out.push(Segment::Literal(literal));
    }
    Ok(out)
}

fn traverse<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for seg in path.split('.') {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

fn value_to_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(v.to_string()),
    }
}

fn render_var(path: &str, default: Option<&str>, root: &Value) -> Result<String, ResolverError> {
    let resolved = traverse(root, path).and_then(value_to_text);
    match resolved {
        Some(text) => Ok(text),
        None => match default {
            Some(d) => Ok(d.to_string()),
            None => Err(ResolverError::MissingKey(path.to_string())),
        },
    }
}

/// Render every `{{PATH}}` / `{{PATH:DEFAULT}}` token in `template`
/// against `root`. Runs the full-string syntax check described in
/// spec.md §4.2 first.
pub fn render(template: &str, root: &Value) -> Result<String, ResolverError> {
    let segments = tokenize(template)?;
    let mut out = String::with_capacity(template.len());
    for seg in segments {
        match seg {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Var { path, default } => {
                out.push_str(&render_var(&path, default.as_deref(), root)?)
            }
        }
    }
    Ok(out)
}

/// Every `PATH` referenced by a `{{PATH}}`/`{{PATH:DEFAULT}}` token in
/// `template`, in order of appearance. Used by validation to check
/// references against declared roots without needing a variable root
/// to render against.
pub fn referenced_paths(template: &str) -> Result<Vec<String>, ResolverError> {
    let segments = tokenize(template)?;
    Ok(segments
        .into_iter()
        .filter_map(|seg| match seg {
            Segment::Var { path, .. } => Some(path),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// One `{{PATH}}`/`{{PATH:DEFAULT}}` reference found in a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarToken {
    pub path: String,
    pub default: Option<String>,
}

/// Like [`referenced_paths`], but keeps each token's `DEFAULT` text —
/// used by strict env-validation to skip references that have a
/// fallback (spec.md §4.3).
pub fn referenced_var_tokens(template: &str) -> Result<Vec<VarToken>, ResolverError> {
    let segments = tokenize(template)?;
    Ok(segments
        .into_iter()
        .filter_map(|seg| match seg {
            Segment::Var { path, default } => Some(VarToken { path, default }),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// A template string that is *exactly* one `{{PATH}}`/`{{PATH:DEFAULT}}`
/// token with no surrounding literal text. Used by the profile/resource
/// builder to enforce that `decode`-marked fields are standalone
/// (spec.md §4.2, §9 "Resource-decode on non-standalone tokens").
pub fn as_standalone_var(template: &str) -> Result<Option<(String, Option<String>)>, ResolverError> {
    let segments = tokenize(template)?;
    match segments.as_slice() {
        [Segment::Var { path, default }] => Ok(Some((path.clone(), default.clone()))),
        _ => Ok(None),
    }
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
