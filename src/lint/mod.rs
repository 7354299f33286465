//! The static configuration linter (spec §4.8): reads the configuration,
//! never the data, and reports every violation rather than stopping at the
//! first one.

use std::collections::{HashMap, HashSet};

use regex_lite::Regex;

use crate::dag::Dag;
use crate::model::{EngineConfig, ShiftMethod, TableConfig, TimeShiftConfig, TransformerConfig, TransformerMethod, ValueCast};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub rule_id: &'static str,
    pub severity: Severity,
    pub message: String,
    pub location: String,
}

impl Issue {
    fn new(rule_id: &'static str, severity: Severity, message: impl Into<String>, location: impl Into<String>) -> Issue {
        Issue { rule_id, severity, message: message.into(), location: location.into() }
    }
}

/// Run every rule against `config` and return the aggregated, unsuppressed
/// issue list. `source` is the raw configuration text — used both for the
/// `config-complexity` line count and for `disable-line rule:<id>`
/// suppression (spec §4.8): an issue is suppressed if its `location` string
/// appears on a source line also carrying a matching suppression comment.
pub fn lint(config: &EngineConfig, source: &str) -> Vec<Issue> {
    let mut issues = Vec::new();
    check_required_keys(config, &mut issues);
    check_unique_transformer_uids(config, &mut issues);
    check_table_dependencies(config, &mut issues);
    check_transformer_dependencies(config, &mut issues);
    check_circular_dependencies(config, &mut issues);
    check_uid_format(config, &mut issues);
    check_datetime_timeshift(config, &mut issues);
    check_timeshift_range(config, &mut issues);
    check_required_transformer_configs(config, &mut issues);
    check_dropper_order(config, &mut issues);
    check_multiple_transformers_same_column(config, &mut issues);
    check_value_cast_appropriateness(config, &mut issues);
    check_output_paths(config, &mut issues);
    check_config_complexity(source, &mut issues);

    let suppressions = parse_suppressions(source);
    let source_lines: Vec<&str> = source.lines().collect();
    issues
        .into_iter()
        .filter(|issue| !is_suppressed(&source_lines, &suppressions, &issue.location, issue.rule_id))
        .collect()
}

fn effective_time_shift<'a>(config: &'a EngineConfig, transformer: &'a TransformerConfig) -> Option<&'a TimeShiftConfig> {
    transformer
        .configs
        .global_time_shift
        .as_ref()
        .or(config.deid_config.time_shift.as_ref())
}

fn input_columns(t: &TransformerConfig) -> Vec<&str> {
    match t.method {
        TransformerMethod::Id | TransformerMethod::ColumnDropper => {
            t.configs.idconfig.iter().map(|id| id.name.as_str()).collect()
        }
        TransformerMethod::DateTime => {
            let mut cols = Vec::new();
            if let Some(id) = &t.configs.idconfig {
                cols.push(id.name.as_str());
            }
            if let Some(c) = &t.configs.datetime_column {
                cols.push(c.as_str());
            }
            cols
        }
    }
}

fn output_column(t: &TransformerConfig) -> Option<&str> {
    match t.method {
        TransformerMethod::Id | TransformerMethod::ColumnDropper => t.configs.idconfig.as_ref().map(|id| id.name.as_str()),
        TransformerMethod::DateTime => t.configs.datetime_column.as_deref(),
    }
}

fn table_transformer_dag(table: &TableConfig) -> Dag {
    let mut dag = Dag::new();
    for t in &table.transformers {
        let uid = t.uid_or_default();
        dag.add_node(uid.clone());
        for dep in &t.depends_on {
            dag.add_edge(uid.clone(), dep.clone());
        }
    }
    dag
}

fn check_required_keys(config: &EngineConfig, issues: &mut Vec<Issue>) {
    if config.name.trim().is_empty() {
        issues.push(Issue::new("required-keys", Severity::Error, "engine 'name' is empty", "name"));
    }
    if config.tables.is_empty() {
        issues.push(Issue::new("required-keys", Severity::Error, "'tables' has no entries", "tables"));
    }
}

fn check_unique_transformer_uids(config: &EngineConfig, issues: &mut Vec<Issue>) {
    let mut seen: HashMap<String, String> = HashMap::new();
    for (table_name, table) in &config.tables {
        for t in &table.transformers {
            let uid = t.uid_or_default();
            if let Some(first_table) = seen.get(&uid) {
                issues.push(Issue::new(
                    "unique-transformer-uids",
                    Severity::Error,
                    format!("transformer uid '{uid}' used in both '{first_table}' and '{table_name}'"),
                    uid.clone(),
                ));
            } else {
                seen.insert(uid, table_name.clone());
            }
        }
    }
}

fn check_table_dependencies(config: &EngineConfig, issues: &mut Vec<Issue>) {
    for (name, table) in &config.tables {
        for dep in &table.depends_on {
            if !config.tables.contains_key(dep) {
                issues.push(Issue::new(
                    "valid-table-dependencies",
                    Severity::Error,
                    format!("table '{name}' depends on undefined table '{dep}'"),
                    dep.clone(),
                ));
            }
        }
    }
}

fn check_transformer_dependencies(config: &EngineConfig, issues: &mut Vec<Issue>) {
    for (table_name, table) in &config.tables {
        let uids: HashSet<String> = table.transformers.iter().map(|t| t.uid_or_default()).collect();
        for t in &table.transformers {
            for dep in &t.depends_on {
                if !uids.contains(dep) {
                    issues.push(Issue::new(
                        "valid-transformer-dependencies",
                        Severity::Error,
                        format!("transformer '{}' in table '{table_name}' depends on undefined sibling '{dep}'", t.uid_or_default()),
                        dep.clone(),
                    ));
                }
            }
        }
    }
}

fn check_circular_dependencies(config: &EngineConfig, issues: &mut Vec<Issue>) {
    let mut table_dag = Dag::new();
    for (name, table) in &config.tables {
        table_dag.add_node(name.clone());
        for dep in &table.depends_on {
            table_dag.add_edge(name.clone(), dep.clone());
        }
    }
    for cycle in table_dag.find_cycles() {
        issues.push(Issue::new(
            "no-circular-dependencies",
            Severity::Error,
            format!("table dependency cycle: {}", cycle.join(" -> ")),
            cycle.first().cloned().unwrap_or_default(),
        ));
    }

    for table in config.tables.values() {
        let dag = table_transformer_dag(table);
        for cycle in dag.find_cycles() {
            issues.push(Issue::new(
                "no-circular-dependencies",
                Severity::Error,
                format!("transformer dependency cycle in table '{}': {}", table.name, cycle.join(" -> ")),
                cycle.first().cloned().unwrap_or_default(),
            ));
        }
    }
}

fn check_uid_format(config: &EngineConfig, issues: &mut Vec<Issue>) {
    let pattern = Regex::new("^[a-z0-9]([a-z0-9_]*[a-z0-9])?$").expect("uid-format pattern is a valid literal");
    for table in config.tables.values() {
        for t in &table.transformers {
            let uid = t.uid_or_default();
            if !pattern.is_match(&uid) {
                issues.push(Issue::new(
                    "uid-format",
                    Severity::Error,
                    format!("transformer uid '{uid}' does not match [a-z0-9][a-z0-9_]*[a-z0-9]"),
                    uid.clone(),
                ));
            }
            if let Some(id) = &t.configs.idconfig {
                if !pattern.is_match(&id.uid) {
                    issues.push(Issue::new(
                        "uid-format",
                        Severity::Error,
                        format!("identifier uid '{}' does not match [a-z0-9][a-z0-9_]*[a-z0-9]", id.uid),
                        id.uid.clone(),
                    ));
                }
            }
        }
    }
}

fn check_datetime_timeshift(config: &EngineConfig, issues: &mut Vec<Issue>) {
    // The original's ground truth reports each of these two rules at most
    // once per config, not once per offending transformer.
    let mut requires_timeshift_reported = false;
    let mut timeshift_defined_reported = false;
    for table in config.tables.values() {
        for t in &table.transformers {
            if t.method != TransformerMethod::DateTime {
                continue;
            }
            let uid = t.uid_or_default();
            if effective_time_shift(config, t).is_none() {
                if !requires_timeshift_reported {
                    issues.push(Issue::new(
                        "datetime-requires-timeshift",
                        Severity::Error,
                        format!("DateTime transformer '{uid}' has no time_shift (transformer-level or deid_config)"),
                        uid.clone(),
                    ));
                    requires_timeshift_reported = true;
                }
                if !timeshift_defined_reported {
                    issues.push(Issue::new(
                        "datetime-timeshift-defined",
                        Severity::Error,
                        format!("DateTime transformer '{uid}': time_shift.method is not defined"),
                        uid.clone(),
                    ));
                    timeshift_defined_reported = true;
                }
            } else if let Some(shift) = effective_time_shift(config, t) {
                if shift.method.is_risky() {
                    issues.push(Issue::new(
                        "timeshift-risk",
                        Severity::Warning,
                        format!("'{uid}' uses {:?}, which leaks day-of-week/hour-of-day", shift.method),
                        uid.clone(),
                    ));
                }
            }
        }
    }
}

fn check_timeshift_range(config: &EngineConfig, issues: &mut Vec<Issue>) {
    let mut check = |shift: &TimeShiftConfig, location: &str, issues: &mut Vec<Issue>| {
        if shift.min > shift.max {
            issues.push(Issue::new(
                "timeshift-range",
                Severity::Error,
                format!("time_shift.min ({}) > time_shift.max ({}) at '{location}'", shift.min, shift.max),
                location.to_string(),
            ));
        } else if shift.min < 0 && shift.max < 0 {
            issues.push(Issue::new(
                "timeshift-range",
                Severity::Warning,
                format!("time_shift range [{}, {}] at '{location}' is entirely negative", shift.min, shift.max),
                location.to_string(),
            ));
        }
    };
    if let Some(shift) = &config.deid_config.time_shift {
        check(shift, "deid_config.time_shift", issues);
    }
    for table in config.tables.values() {
        for t in &table.transformers {
            if let Some(shift) = &t.configs.global_time_shift {
                check(shift, &t.uid_or_default(), issues);
            }
        }
    }
}

fn check_required_transformer_configs(config: &EngineConfig, issues: &mut Vec<Issue>) {
    for table in config.tables.values() {
        for t in &table.transformers {
            let uid = t.uid_or_default();
            if t.configs.idconfig.is_none() {
                issues.push(Issue::new(
                    "required-transformer-configs",
                    Severity::Error,
                    format!("transformer '{uid}' is missing configs.idconfig"),
                    uid.clone(),
                ));
            }
            if t.method == TransformerMethod::DateTime && t.configs.datetime_column.is_none() {
                issues.push(Issue::new(
                    "required-transformer-configs",
                    Severity::Error,
                    format!("DateTime transformer '{uid}' is missing configs.datetime_column"),
                    uid.clone(),
                ));
            }
        }
    }
}

fn check_dropper_order(config: &EngineConfig, issues: &mut Vec<Issue>) {
    for table in config.tables.values() {
        let dag = table_transformer_dag(table);
        let Ok(order) = dag.topological_order() else { continue };
        let position: HashMap<&str, usize> = order.iter().enumerate().map(|(i, u)| (u.as_str(), i)).collect();

        for dropper in table.transformers.iter().filter(|t| t.method == TransformerMethod::ColumnDropper) {
            let dropper_uid = dropper.uid_or_default();
            let Some(&dropper_pos) = position.get(dropper_uid.as_str()) else { continue };
            let Some(dropped_col) = output_column(dropper) else { continue };

            for reader in &table.transformers {
                let reader_uid = reader.uid_or_default();
                if reader_uid == dropper_uid {
                    continue;
                }
                let Some(&reader_pos) = position.get(reader_uid.as_str()) else { continue };
                if reader_pos > dropper_pos && input_columns(reader).contains(&dropped_col) {
                    issues.push(Issue::new(
                        "dropper-order",
                        Severity::Error,
                        format!(
                            "'{dropper_uid}' drops column '{dropped_col}' before '{reader_uid}' reads it"
                        ),
                        reader_uid.clone(),
                    ));
                }
            }
        }
    }
}

fn check_multiple_transformers_same_column(config: &EngineConfig, issues: &mut Vec<Issue>) {
    for table in config.tables.values() {
        let mut writers: HashMap<&str, Vec<String>> = HashMap::new();
        for t in &table.transformers {
            if t.filter.is_some() {
                continue;
            }
            if let Some(col) = output_column(t) {
                writers.entry(col).or_default().push(t.uid_or_default());
            }
        }
        for (col, uids) in writers {
            if uids.len() > 1 {
                issues.push(Issue::new(
                    "multiple-transformers-same-column",
                    Severity::Warning,
                    format!("column '{col}' is written by unfiltered transformers: {}", uids.join(", ")),
                    col.to_string(),
                ));
            }
        }
    }
}

fn check_value_cast_appropriateness(config: &EngineConfig, issues: &mut Vec<Issue>) {
    for table in config.tables.values() {
        for t in &table.transformers {
            let Some(cast) = t.value_cast else { continue };
            let uid = t.uid_or_default();
            match t.method {
                TransformerMethod::ColumnDropper => {
                    issues.push(Issue::new(
                        "value-cast-appropriateness",
                        Severity::Error,
                        format!("'{uid}' is a ColumnDropper and cannot have a value_cast"),
                        uid.clone(),
                    ));
                }
                TransformerMethod::Id if cast == ValueCast::DateTime => {
                    issues.push(Issue::new(
                        "value-cast-appropriateness",
                        Severity::Warning,
                        format!("'{uid}': casting an ID surrogate to datetime is unusual"),
                        uid.clone(),
                    ));
                }
                TransformerMethod::DateTime if cast != ValueCast::DateTime => {
                    issues.push(Issue::new(
                        "value-cast-appropriateness",
                        Severity::Warning,
                        format!("'{uid}': casting a shifted datetime to {cast:?} is unusual"),
                        uid.clone(),
                    ));
                }
                _ => {}
            }
        }
    }
}

fn check_output_paths(config: &EngineConfig, issues: &mut Vec<Issue>) {
    const SYSTEM_PREFIXES: [&str; 4] = ["/tmp", "/var", "/etc", "/usr"];
    let mut check_path = |label: &str, path: Option<&str>, issues: &mut Vec<Issue>| {
        let Some(path) = path else { return };
        if SYSTEM_PREFIXES.iter().any(|prefix| path.starts_with(prefix)) {
            issues.push(Issue::new(
                "output-paths-system-directories",
                Severity::Warning,
                format!("{label} output path '{path}' is under a system directory"),
                path.to_string(),
            ));
        }
    };
    check_path(
        "data",
        config.io.data.output_config.as_ref().and_then(|c| c.base_path()),
        issues,
    );
    check_path(
        "deid_ref",
        config.io.deid_ref.output_config.as_ref().and_then(|c| c.base_path()),
        issues,
    );
}

fn check_config_complexity(source: &str, issues: &mut Vec<Issue>) {
    let lines = source
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .count();
    if lines > 50 {
        issues.push(Issue::new(
            "config-complexity",
            Severity::Warning,
            format!("configuration has {lines} non-comment, non-blank lines (> 50)"),
            String::new(),
        ));
    }
}

fn parse_suppressions(source: &str) -> HashMap<usize, HashSet<String>> {
    let mut map: HashMap<usize, HashSet<String>> = HashMap::new();
    for (i, line) in source.lines().enumerate() {
        let Some(idx) = line.find("disable-line") else { continue };
        for part in line[idx..].split("rule:").skip(1) {
            let id: String = part.chars().take_while(|c| c.is_ascii_alphanumeric() || *c == '-').collect();
            if !id.is_empty() {
                map.entry(i).or_default().insert(id);
            }
        }
    }
    map
}

fn is_suppressed(source_lines: &[&str], suppressions: &HashMap<usize, HashSet<String>>, location: &str, rule_id: &str) -> bool {
    if location.is_empty() {
        return false;
    }
    source_lines.iter().enumerate().any(|(i, line)| {
        line.contains(location) && suppressions.get(&i).is_some_and(|ids| ids.contains(rule_id))
    })
}
