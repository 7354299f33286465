//! The reverse+compare verification report (spec §6 "Verification report").
//!
//! Built on top of [`crate::engine::Engine::verify`]: reverse each table
//! against the reference store, then compare column-by-column against the
//! original input.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::frame::Value;
use crate::io::Segment;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pass,
    Warning,
    Error,
}

impl Status {
    fn worse(self, other: Status) -> Status {
        use Status::*;
        match (self, other) {
            (Error, _) | (_, Error) => Error,
            (Warning, _) | (_, Warning) => Warning,
            _ => Pass,
        }
    }
}

const MAX_SAMPLE_INDICES: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ColumnReport {
    pub name: String,
    pub status: Status,
    pub message: Option<String>,
    pub original_length: usize,
    pub reversed_length: usize,
    pub mismatch_count: usize,
    pub mismatch_percentage: f64,
    pub sample_indices: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableTotals {
    pub rows: usize,
    pub columns_checked: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TableVerification {
    pub status: Status,
    pub totals: TableTotals,
    pub per_column: Vec<ColumnReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationSummary {
    pub pass: usize,
    pub warning: usize,
    pub error: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub tables: BTreeMap<String, TableVerification>,
    pub summary: VerificationSummary,
}

impl VerificationResult {
    pub fn new(tables: BTreeMap<String, TableVerification>) -> VerificationResult {
        let mut summary = VerificationSummary { pass: 0, warning: 0, error: 0 };
        for table in tables.values() {
            match table.status {
                Status::Pass => summary.pass += 1,
                Status::Warning => summary.warning += 1,
                Status::Error => summary.error += 1,
            }
        }
        VerificationResult { tables, summary }
    }
}

/// Compare one table's original segments against its reversed segments,
/// matched by segment name (invariant 6, spec §8). `dropped_warnings` are
/// the warnings a reverse pass produced (dropped columns, unknown
/// surrogates/entities) — scanned for column names so those columns are
/// reported `warning` rather than silently mismatched.
pub fn compare_table(original: &[Segment], reversed: &[Segment], reverse_warnings: &[String]) -> TableVerification {
    let dropped_columns = dropped_columns_from_warnings(reverse_warnings);

    let mut per_column: BTreeMap<String, ColumnReport> = BTreeMap::new();
    let mut total_rows = 0;

    for orig_segment in original {
        let reversed_segment = reversed.iter().find(|s| s.name == orig_segment.name);
        total_rows += orig_segment.frame.len();

        for column in &orig_segment.frame.columns {
            let report = per_column.entry(column.clone()).or_insert_with(|| ColumnReport {
                name: column.clone(),
                status: Status::Pass,
                message: None,
                original_length: 0,
                reversed_length: 0,
                mismatch_count: 0,
                mismatch_percentage: 0.0,
                sample_indices: Vec::new(),
            });
            let original_values = orig_segment.frame.column_values(column).expect("column just enumerated from this frame");
            report.original_length += original_values.len();

            match reversed_segment.and_then(|s| s.frame.column_values(column).ok()) {
                Some(reversed_values) => {
                    report.reversed_length += reversed_values.len();
                    for (i, (orig, rev)) in original_values.iter().zip(reversed_values.iter()).enumerate() {
                        if !values_match(orig, rev) {
                            report.mismatch_count += 1;
                            if report.sample_indices.len() < MAX_SAMPLE_INDICES {
                                report.sample_indices.push(i);
                            }
                        }
                    }
                }
                None => {
                    if dropped_columns.contains(column) {
                        report.status = Status::Warning;
                        report.message = Some(format!("column '{column}' was dropped and cannot be reversed"));
                    } else {
                        report.status = Status::Error;
                        report.message = Some(format!("column '{column}' is missing from the reversed output"));
                    }
                }
            }
        }
    }

    for report in per_column.values_mut() {
        if report.original_length > 0 {
            report.mismatch_percentage = 100.0 * report.mismatch_count as f64 / report.original_length as f64;
        }
        if report.status == Status::Pass && report.mismatch_count > 0 {
            report.status = Status::Error;
            report.message = Some(format!("{} of {} values did not round-trip", report.mismatch_count, report.original_length));
        }
    }

    let status = per_column.values().fold(Status::Pass, |acc, c| acc.worse(c.status));
    let columns_checked = per_column.len();
    TableVerification {
        status,
        totals: TableTotals { rows: total_rows, columns_checked },
        per_column: per_column.into_values().collect(),
    }
}

fn values_match(a: &Value, b: &Value) -> bool {
    a.to_key() == b.to_key()
}

fn dropped_columns_from_warnings(warnings: &[String]) -> BTreeSet<String> {
    let mut set = BTreeSet::new();
    for warning in warnings {
        if let Some(start) = warning.find('\'') {
            if let Some(end) = warning[start + 1..].find('\'') {
                if warning.contains("dropped") {
                    set.insert(warning[start + 1..start + 1 + end].to_string());
                }
            }
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn segment(name: &str, columns: Vec<&str>, rows: Vec<Vec<Value>>) -> Segment {
        let mut frame = Frame::new(columns.into_iter().map(String::from).collect());
        frame.rows = rows;
        Segment { name: name.to_string(), frame }
    }

    #[test]
    fn matching_values_report_pass() {
        let original = vec![segment("users.csv", vec!["user_id"], vec![vec![Value::Int(101)], vec![Value::Int(202)]])];
        let reversed = vec![segment("users.csv", vec!["user_id"], vec![vec![Value::Int(101)], vec![Value::Int(202)]])];
        let report = compare_table(&original, &reversed, &[]);
        assert_eq!(report.status, Status::Pass);
        assert_eq!(report.per_column[0].mismatch_count, 0);
    }

    #[test]
    fn mismatched_values_report_error_with_sample_indices() {
        let original = vec![segment("users.csv", vec!["user_id"], vec![vec![Value::Int(101)], vec![Value::Int(202)]])];
        let reversed = vec![segment("users.csv", vec!["user_id"], vec![vec![Value::Int(999)], vec![Value::Int(202)]])];
        let report = compare_table(&original, &reversed, &[]);
        assert_eq!(report.status, Status::Error);
        assert_eq!(report.per_column[0].mismatch_count, 1);
        assert_eq!(report.per_column[0].sample_indices, vec![0]);
    }

    #[test]
    fn dropped_column_reports_warning_not_error() {
        let original = vec![segment("users.csv", vec!["ssn"], vec![vec![Value::Str("123-45-6789".into())]])];
        let reversed = vec![segment("users.csv", vec![], vec![vec![]])];
        let warnings = vec!["column 'ssn' was dropped and cannot be reversed".to_string()];
        let report = compare_table(&original, &reversed, &warnings);
        assert_eq!(report.status, Status::Warning);
        assert_eq!(report.per_column[0].status, Status::Warning);
    }
}
