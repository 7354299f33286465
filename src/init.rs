//! Project scaffolding and config maintenance helpers.
//!
//! Grounded on `original_source/cleared/cli/utils.py` and `cli/simple_cli.py`:
//! `init` writes a starter config (`create_sample_config`), `check_syntax`
//! parses and resolves `defaults:` without requiring a fully valid
//! [`EngineConfig`] (`validate_config`'s path-existence-only mode),
//! `format_yaml` canonicalizes a YAML file's formatting
//! (`format_yaml_file`), and the path helpers mirror `validate_paths`/
//! `create_missing_directories`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::config::load_merged_value;
use crate::error::DeidError;
use crate::model::{EngineConfig, IoConfig};

const SAMPLE_CONFIG: &str = r#"# Sample configuration.
name: "sample_engine"

deid_config:
  time_shift: null

io:
  data:
    input_config:
      io_type: "filesystem"
      configs:
        base_path: "/tmp/input"
        file_format: "csv"
    output_config:
      io_type: "filesystem"
      configs:
        base_path: "/tmp/output"
        file_format: "csv"
  deid_ref:
    input_config: null
    output_config:
      io_type: "filesystem"
      configs:
        base_path: "/tmp/deid_ref"
  runtime_io_path: "/tmp/runtime"

tables: {}
"#;

/// Write a starter configuration to `output_path`. Refuses to overwrite an
/// existing file unless `force` is set (spec §6's init command).
pub fn init(output_path: &Path, force: bool) -> Result<(), DeidError> {
    if output_path.exists() && !force {
        return Err(DeidError::ConfigLoad(format!(
            "'{}' already exists; pass force=true to overwrite",
            output_path.display()
        )));
    }
    fs::write(output_path, SAMPLE_CONFIG)
        .map_err(|e| DeidError::ConfigLoad(format!("cannot write '{}': {e}", output_path.display())))
}

/// Parse `path` and resolve its `defaults:` chain, without requiring every
/// [`EngineConfig`] field to be present. Returns only success/failure; a
/// caller that needs the decoded config should use [`crate::config::load_config`]
/// instead.
pub fn check_syntax(path: &Path) -> Result<(), DeidError> {
    load_merged_value(path).map(|_| ())
}

/// Re-serialize `path` with [`serde_yaml`]'s canonical key ordering and
/// indentation. In `check_only` mode, returns whether the file would change
/// without writing it.
pub fn format_yaml(path: &Path, check_only: bool) -> Result<bool, DeidError> {
    let original = fs::read_to_string(path)
        .map_err(|e| DeidError::ConfigLoad(format!("cannot read '{}': {e}", path.display())))?;
    let document: serde_yaml::Value = serde_yaml::from_str(&original)
        .map_err(|e| DeidError::ConfigLoad(format!("malformed YAML in '{}': {e}", path.display())))?;
    let formatted = serde_yaml::to_string(&document)
        .map_err(|e| DeidError::ConfigLoad(format!("cannot format '{}': {e}", path.display())))?;

    if original.trim() == formatted.trim() {
        return Ok(false);
    }
    if !check_only {
        fs::write(path, &formatted)
            .map_err(|e| DeidError::ConfigLoad(format!("cannot write '{}': {e}", path.display())))?;
    }
    Ok(true)
}

/// One I/O side's `base_path`, labeled for reporting.
fn labeled_paths(config: &EngineConfig) -> Vec<(&'static str, &str)> {
    let mut paths = Vec::new();
    let mut push = |label: &'static str, io: &Option<IoConfig>| {
        if let Some(base_path) = io.as_ref().and_then(|io| io.base_path()) {
            paths.push((label, base_path));
        }
    };
    push("data_input", &config.io.data.input_config);
    push("data_output", &config.io.data.output_config);
    push("deid_ref_input", &config.io.deid_ref.input_config);
    push("deid_ref_output", &config.io.deid_ref.output_config);
    paths.push(("runtime", config.io.runtime_io_path.as_str()));
    paths
}

/// Whether each filesystem path named in `config` currently exists.
pub fn validate_paths(config: &EngineConfig) -> BTreeMap<String, bool> {
    labeled_paths(config)
        .into_iter()
        .map(|(label, path)| (label.to_string(), Path::new(path).exists()))
        .collect()
}

/// Create any filesystem paths named in `config` that don't yet exist.
pub fn create_missing_directories(config: &EngineConfig) -> Result<Vec<String>, DeidError> {
    let mut created = Vec::new();
    for (_, path) in labeled_paths(config) {
        if !Path::new(path).exists() {
            fs::create_dir_all(path)
                .map_err(|e| DeidError::ConfigLoad(format!("cannot create '{path}': {e}")))?;
            created.push(path.to_string());
        }
    }
    Ok(created)
}
