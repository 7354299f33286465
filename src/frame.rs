//! A minimal, column-typed tabular frame.
//!
//! The engine never needs more than this: load a table as rows of typed
//! cells, slice/join/overwrite columns, write it back out. There is no
//! query planner and no laziness — a frame is just `Vec<Value>` per row
//! plus a shared column name list, matching the scale of the data the
//! transformers operate on (one table segment at a time).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDateTime;

/// A single cell value. `Null` is the frame's representation of a missing
/// or unparseable value and is never entered into a reference map.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    DateTime(NaiveDateTime),
}

impl Value {
    /// Canonical string form, used as the hash key for reference-map lookups
    /// and for writing cells back out to CSV/JSON. Two values that should be
    /// treated as "the same identifier" always produce the same key.
    pub fn to_key(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                // Integral floats key identically to the equivalent Int so that
                // "101" and "101.0" read from different segments collide.
                if f.fract() == 0.0 && f.is_finite() {
                    format!("{}", *f as i64)
                } else {
                    f.to_string()
                }
            }
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Parse a raw CSV/JSON string cell into a typed value using a small set
    /// of best-effort heuristics: integer, then float, then RFC3339/ISO
    /// datetime, then bool, falling back to a plain string. Empty strings are
    /// `Null`.
    pub fn infer_from_str(raw: &str) -> Value {
        if raw.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = raw.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = raw.parse::<f64>() {
            return Value::Float(f);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return Value::DateTime(dt);
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
            return Value::DateTime(dt);
        }
        if let Ok(d) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Value::DateTime(d.and_hms_opt(0, 0, 0).unwrap());
        }
        match raw {
            "true" | "True" | "TRUE" => Value::Bool(true),
            "false" | "False" | "FALSE" => Value::Bool(false),
            _ => Value::Str(raw.to_string()),
        }
    }

    /// Cast to the representation requested by a `value_cast` directive.
    /// Casting a `Null` is always a no-op.
    pub fn cast(&self, cast: super::model::ValueCast) -> Result<Value, crate::error::DeidError> {
        use super::model::ValueCast;
        if self.is_null() {
            return Ok(Value::Null);
        }
        match cast {
            ValueCast::Integer => match self {
                Value::Int(_) => Ok(self.clone()),
                Value::Float(f) => Ok(Value::Int(*f as i64)),
                Value::Str(s) => s
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| crate::error::DeidError::TransformError(
                        format!("cannot cast '{s}' to integer"),
                    )),
                other => Err(crate::error::DeidError::TransformError(format!(
                    "cannot cast {other:?} to integer"
                ))),
            },
            ValueCast::Float => match self {
                Value::Float(_) => Ok(self.clone()),
                Value::Int(i) => Ok(Value::Float(*i as f64)),
                Value::Str(s) => s
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| crate::error::DeidError::TransformError(
                        format!("cannot cast '{s}' to float"),
                    )),
                other => Err(crate::error::DeidError::TransformError(format!(
                    "cannot cast {other:?} to float"
                ))),
            },
            ValueCast::String => Ok(Value::Str(self.display())),
            ValueCast::DateTime => match self {
                Value::DateTime(_) => Ok(self.clone()),
                Value::Str(s) => {
                    let v = Value::infer_from_str(s);
                    if matches!(v, Value::DateTime(_)) {
                        Ok(v)
                    } else {
                        Err(crate::error::DeidError::TransformError(format!(
                            "cannot cast '{s}' to datetime"
                        )))
                    }
                }
                other => Err(crate::error::DeidError::TransformError(format!(
                    "cannot cast {other:?} to datetime"
                ))),
            },
        }
    }

    /// Human/CSV-facing rendering of the value.
    pub fn display(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
        }
    }

    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::DateTime(a), Value::DateTime(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// A column-named, row-major table segment.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Frame {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of a column, in row order. Errors if the column is absent.
    pub fn column_values(&self, name: &str) -> Result<Vec<&Value>, crate::error::DeidError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| crate::error::DeidError::TransformError(format!("no such column: {name}")))?;
        Ok(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Distinct non-null values of a column, in first-seen order.
    pub fn distinct_column_values(&self, name: &str) -> Result<Vec<Value>, crate::error::DeidError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| crate::error::DeidError::TransformError(format!("no such column: {name}")))?;
        let mut seen = HashMap::new();
        let mut out = Vec::new();
        for row in &self.rows {
            let v = &row[idx];
            if v.is_null() {
                continue;
            }
            let key = v.to_key();
            if !seen.contains_key(&key) {
                seen.insert(key, ());
                out.push(v.clone());
            }
        }
        Ok(out)
    }

    /// Overwrite (or append, if absent) a column in place.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), crate::error::DeidError> {
        if values.len() != self.rows.len() {
            return Err(crate::error::DeidError::TransformError(format!(
                "column '{name}' write has {} values for {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, v) in self.rows.iter_mut().zip(values.into_iter()) {
                    row[idx] = v;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, v) in self.rows.iter_mut().zip(values.into_iter()) {
                    row.push(v);
                }
            }
        }
        Ok(())
    }

    /// Drop a column. No-op if absent.
    pub fn drop_column(&mut self, name: &str) {
        if let Some(idx) = self.column_index(name) {
            self.columns.remove(idx);
            for row in self.rows.iter_mut() {
                row.remove(idx);
            }
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Keep only the first `limit` rows. A no-op if the frame already has
    /// fewer rows than that.
    pub fn truncated(mut self, limit: usize) -> Frame {
        self.rows.truncate(limit);
        self
    }

    /// Split into (matching, non_matching) by a row predicate, preserving
    /// the original row order within each half and remembering each row's
    /// original position so the halves can be re-merged in order later.
    pub fn partition_by<F>(&self, pred: F) -> (IndexedFrame, IndexedFrame)
    where
        F: Fn(&[Value], &[String]) -> bool,
    {
        let mut matching = IndexedFrame::new(self.columns.clone());
        let mut non_matching = IndexedFrame::new(self.columns.clone());
        for (i, row) in self.rows.iter().enumerate() {
            if pred(row, &self.columns) {
                matching.rows.push((i, row.clone()));
            } else {
                non_matching.rows.push((i, row.clone()));
            }
        }
        (matching, non_matching)
    }
}

/// A frame that remembers each row's position in some original frame, used
/// to restore row order after a filtered transformer re-merges matching and
/// non-matching rows.
#[derive(Debug, Clone)]
pub struct IndexedFrame {
    pub columns: Vec<String>,
    pub rows: Vec<(usize, Vec<Value>)>,
}

impl IndexedFrame {
    pub fn new(columns: Vec<String>) -> Self {
        IndexedFrame {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            columns: self.columns.clone(),
            rows: self.rows.iter().map(|(_, r)| r.clone()).collect(),
        }
    }

    /// Merge two indexed frames (matching + non-matching, already
    /// transformed) back into original row order.
    pub fn merge_ordered(mut matching: IndexedFrame, mut non_matching: IndexedFrame) -> Frame {
        let columns = if !matching.columns.is_empty() {
            matching.columns.clone()
        } else {
            non_matching.columns.clone()
        };
        let mut combined: Vec<(usize, Vec<Value>)> = Vec::with_capacity(matching.rows.len() + non_matching.rows.len());
        combined.append(&mut matching.rows);
        combined.append(&mut non_matching.rows);
        combined.sort_by_key(|(i, _)| *i);
        Frame {
            columns,
            rows: combined.into_iter().map(|(_, r)| r).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_preserves_first_seen_order_and_skips_nulls() {
        let mut f = Frame::new(vec!["user_id".into()]);
        f.rows = vec![
            vec![Value::Int(101)],
            vec![Value::Null],
            vec![Value::Int(202)],
            vec![Value::Int(101)],
        ];
        let d = f.distinct_column_values("user_id").unwrap();
        assert_eq!(d, vec![Value::Int(101), Value::Int(202)]);
    }

    #[test]
    fn set_column_overwrites_in_place() {
        let mut f = Frame::new(vec!["a".into(), "b".into()]);
        f.rows = vec![vec![Value::Int(1), Value::Int(2)]];
        f.set_column("a", vec![Value::Int(99)]).unwrap();
        assert_eq!(f.rows[0][0], Value::Int(99));
        assert_eq!(f.columns, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn partition_and_merge_restores_order() {
        let mut f = Frame::new(vec!["n".into()]);
        f.rows = (0..5).map(|i| vec![Value::Int(i)]).collect();
        let (matching, non_matching) = f.partition_by(|row, _| matches!(row[0], Value::Int(n) if n % 2 == 0));
        let merged = IndexedFrame::merge_ordered(matching, non_matching);
        let values: Vec<i64> = merged
            .rows
            .iter()
            .map(|r| match r[0] {
                Value::Int(n) => n,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn value_to_key_collapses_integral_float_and_int() {
        assert_eq!(Value::Int(101).to_key(), Value::Float(101.0).to_key());
    }
}
