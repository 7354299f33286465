//! YAML configuration loading with `defaults:` resolution.
//!
//! Grounded on `original_source/cleared/cli/utils.py`'s
//! `_merge_hydra_configs`/`_deep_merge`/`find_imported_yaml_files`: a
//! `defaults:` list names sibling YAML files (without extension) in the
//! same directory; each is resolved recursively, merged deepest-first, and
//! the importing file's own keys always win over anything it imports.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::DeidError;
use crate::model::EngineConfig;

const DEFAULTS_KEY: &str = "defaults";

/// Load `path`, resolve its `defaults:` chain, and decode the merged
/// document into an [`EngineConfig`].
pub fn load_config(path: &Path) -> Result<EngineConfig, DeidError> {
    let merged = load_merged_value(path)?;
    serde_yaml::from_value(merged)
        .map_err(|e| DeidError::ConfigLoad(format!("cannot decode merged config '{}': {e}", path.display())))
}

/// Resolve `path`'s `defaults:` chain and return the merged, but still
/// untyped, YAML document. Exposed separately from [`load_config`] so
/// `check_syntax`/`format_yaml` can validate structure without requiring
/// every `EngineConfig` field to be present.
pub fn load_merged_value(path: &Path) -> Result<Value, DeidError> {
    let mut visiting = HashSet::new();
    resolve(path, &mut visiting)
}

fn resolve(path: &Path, visiting: &mut HashSet<PathBuf>) -> Result<Value, DeidError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| DeidError::ConfigLoad(format!("cannot resolve '{}': {e}", path.display())))?;
    if !visiting.insert(canonical.clone()) {
        return Err(DeidError::ConfigLoad(format!(
            "defaults cycle detected: '{}' imports itself transitively",
            path.display()
        )));
    }

    let content = fs::read_to_string(path)
        .map_err(|e| DeidError::ConfigLoad(format!("cannot read '{}': {e}", path.display())))?;
    let mut document: Value = serde_yaml::from_str(&content)
        .map_err(|e| DeidError::ConfigLoad(format!("malformed YAML in '{}': {e}", path.display())))?;

    let defaults = take_defaults(&mut document, path)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut merged = Value::Mapping(Mapping::new());
    for name in defaults {
        let import_path = resolve_default_path(dir, &name)
            .ok_or_else(|| DeidError::ConfigLoad(format!("default '{name}' referenced from '{}' not found", path.display())))?;
        let imported = resolve(&import_path, visiting)?;
        merged = deep_merge(merged, imported);
    }
    merged = deep_merge(merged, document);

    visiting.remove(&canonical);
    Ok(merged)
}

fn resolve_default_path(dir: &Path, name: &str) -> Option<PathBuf> {
    for ext in ["yaml", "yml"] {
        let candidate = dir.join(format!("{name}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Pop the `defaults:` sequence out of the document's top-level mapping, if
/// present, leaving the rest of the document untouched.
fn take_defaults(document: &mut Value, path: &Path) -> Result<Vec<String>, DeidError> {
    let Value::Mapping(map) = document else {
        return Err(DeidError::ConfigLoad(format!("'{}' is not a YAML mapping at the top level", path.display())));
    };
    let Some(raw) = map.remove(Value::String(DEFAULTS_KEY.to_string())) else {
        return Ok(Vec::new());
    };
    let Value::Sequence(items) = raw else {
        return Err(DeidError::ConfigLoad(format!("'{}': 'defaults' must be a list", path.display())));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            other => Err(DeidError::ConfigLoad(format!(
                "'{}': 'defaults' entries must be strings, found {other:?}",
                path.display()
            ))),
        })
        .collect()
}

/// Recursively merge `override_value` on top of `base`: mappings merge
/// key-by-key (recursing into shared keys); anything else is replaced
/// outright by `override_value`.
fn deep_merge(base: Value, override_value: Value) -> Value {
    match (base, override_value) {
        (Value::Mapping(mut base_map), Value::Mapping(override_map)) => {
            for (key, value) in override_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, override_value) => override_value,
    }
}
