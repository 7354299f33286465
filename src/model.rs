//! Configuration data model (spec §3).
//!
//! These types are the typed tree produced by [`crate::config::loader`] and
//! consumed by the linter, the table pipelines, and the engine. They derive
//! `serde::Deserialize` directly off the YAML shape; no separate builder or
//! DTO layer sits in between.

use serde::Deserialize;
use std::collections::BTreeMap;

/// An identifier: what to de-identify and the logical identity it shares
/// across columns and tables.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Identifier {
    /// Column name in the current table.
    pub name: String,
    /// Logical identity; two columns (even in different tables) sharing a
    /// `uid` surrogate to the same space.
    pub uid: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl Identifier {
    /// The column name the surrogate is written back to. Identical to `name`
    /// — de-identification replaces a column in place.
    pub fn deid_name(&self) -> &str {
        &self.name
    }

    /// The reference-store key for the ID map.
    pub fn deid_uid(&self) -> String {
        format!("{}__deid", self.uid)
    }

    /// The reference-store key for the shift map.
    pub fn shift_uid(&self) -> String {
        format!("{}_shift", self.uid)
    }
}

/// Output representation requested for a transformer's result column.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValueCast {
    Integer,
    String,
    Float,
    DateTime,
}

/// Time-shift sampling method (spec §4.4).
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShiftMethod {
    ShiftByYears,
    ShiftByMonths,
    ShiftByWeeks,
    ShiftByDays,
    ShiftByHours,
    RandomDays,
    RandomHours,
}

impl ShiftMethod {
    /// Whether this method leaks day-of-week or hour-of-day information
    /// (linter rule `timeshift-risk`).
    pub fn is_risky(&self) -> bool {
        matches!(
            self,
            ShiftMethod::ShiftByDays
                | ShiftMethod::ShiftByHours
                | ShiftMethod::RandomDays
                | ShiftMethod::RandomHours
        )
    }
}

/// `deid_config.time_shift` (spec §3, §4.4).
///
/// Per the Open Question in spec §9, `random_days`/`random_hours` are
/// resolved here to per-entity sampling identical to `shift_by_*` — the
/// shift map holds exactly one offset per entity regardless of method, so
/// round-trip (invariant 3) holds universally. See `DESIGN.md`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TimeShiftConfig {
    pub method: ShiftMethod,
    pub min: i64,
    pub max: i64,
}

/// A transformer's own configuration payload (spec §4.3–§4.5). Fields not
/// used by a given `method` are simply left `None`/empty; the linter rule
/// `required-transformer-configs` enforces which ones must be present.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct TransformerConfigs {
    #[serde(default)]
    pub idconfig: Option<Identifier>,
    #[serde(default)]
    pub datetime_column: Option<String>,
    #[serde(default)]
    pub global_time_shift: Option<TimeShiftConfig>,
}

/// Which built-in transformer kind `method` selects (spec §9: closed sum
/// type, no runtime registry).
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransformerMethod {
    Id,
    DateTime,
    ColumnDropper,
}

/// `{method, uid?, depends_on[], configs, filter?, value_cast?}` (spec §3).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TransformerConfig {
    pub method: TransformerMethod,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub configs: TransformerConfigs,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub value_cast: Option<ValueCast>,
}

impl TransformerConfig {
    /// The transformer's DAG-node tag, defaulting to `method`'s idconfig
    /// name when no explicit `uid` is given (transformer uids must still be
    /// globally unique within a table per the linter's
    /// `unique-transformer-uids` rule — an omitted `uid` is only convenient
    /// shorthand for single-transformer tables).
    pub fn uid_or_default(&self) -> String {
        self.uid.clone().unwrap_or_else(|| {
            self.configs
                .idconfig
                .as_ref()
                .map(|id| id.uid.clone())
                .unwrap_or_else(|| format!("{:?}", self.method).to_lowercase())
        })
    }
}

/// `{name, depends_on[], transformers[]}` (spec §3).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub transformers: Vec<TransformerConfig>,
}

/// `io_type` for a store side (spec §6).
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IoType {
    Filesystem,
    Sql,
}

/// One side (input or output) of a paired I/O binding.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct IoConfig {
    pub io_type: IoType,
    #[serde(default)]
    pub configs: BTreeMap<String, serde_yaml::Value>,
}

impl IoConfig {
    pub fn base_path(&self) -> Option<&str> {
        self.configs.get("base_path").and_then(|v| v.as_str())
    }

    pub fn file_format(&self) -> &str {
        self.configs
            .get("file_format")
            .and_then(|v| v.as_str())
            .unwrap_or("csv")
    }

    pub fn delimiter(&self) -> u8 {
        self.configs
            .get("delimiter")
            .and_then(|v| v.as_str())
            .and_then(|s| s.as_bytes().first().copied())
            .unwrap_or(b',')
    }
}

/// `{input, output}` (spec §3).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PairedIo {
    pub input_config: Option<IoConfig>,
    pub output_config: Option<IoConfig>,
}

/// `io:{data:paired, deid_ref:paired, runtime_io_path}` (spec §3).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ClearedIo {
    pub data: PairedIo,
    pub deid_ref: PairedIo,
    #[serde(default = "default_runtime_io_path")]
    pub runtime_io_path: String,
}

fn default_runtime_io_path() -> String {
    "/tmp/runtime".to_string()
}

/// `deid_config:{time_shift?}` (spec §3).
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct DeidConfig {
    #[serde(default)]
    pub time_shift: Option<TimeShiftConfig>,
}

/// The top-level engine configuration (spec §3): `{name, deid_config, io, tables}`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_engine_name")]
    pub name: String,
    #[serde(default)]
    pub deid_config: DeidConfig,
    pub io: ClearedIo,
    #[serde(default)]
    pub tables: BTreeMap<String, TableConfig>,
}

fn default_engine_name() -> String {
    "cleared_engine".to_string()
}
