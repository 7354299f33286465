//! ID transformer (spec §4.3): replace a column with a stable integer
//! surrogate drawn from the `uid` ID map.

use std::collections::HashMap;

use super::ReverseOutcome;
use crate::error::DeidError;
use crate::frame::{Frame, Value};
use crate::model::Identifier;
use crate::refstore::ReferenceStore;

pub struct IdTransformer {
    pub identifier: Identifier,
}

impl IdTransformer {
    /// (a) collect distinct values in first-seen order, (b) append-or-lookup
    /// against the `uid` ID map, (c)/(d) join back and overwrite the column.
    /// Nulls pass through and are never entered into the map.
    pub fn forward(&self, frame: &Frame, refs: &ReferenceStore) -> Result<Frame, DeidError> {
        let mut out = frame.clone();
        let distinct = frame.distinct_column_values(&self.identifier.name)?;
        let deids = refs.append_or_lookup(&self.identifier.uid, &distinct);
        let lookup: HashMap<String, i64> = distinct
            .iter()
            .map(|v| v.to_key())
            .zip(deids.into_iter())
            .collect();

        let values = frame.column_values(&self.identifier.name)?;
        let new_col: Vec<Value> = values
            .into_iter()
            .map(|v| {
                if v.is_null() {
                    Value::Null
                } else {
                    Value::Int(*lookup.get(&v.to_key()).expect("distinct value missing from lookup"))
                }
            })
            .collect();
        out.set_column(&self.identifier.name, new_col)?;
        Ok(out)
    }

    /// For each cell, look up the row whose surrogate equals the cell and
    /// replace with the original value; unknown surrogates are left
    /// unchanged and flagged (spec §4.3).
    pub fn reverse(&self, frame: &Frame, refs: &ReferenceStore) -> Result<ReverseOutcome, DeidError> {
        let mut out = frame.clone();
        let mut warnings = Vec::new();
        let values = frame.column_values(&self.identifier.name)?.into_iter().cloned().collect::<Vec<_>>();
        let mut restored = Vec::with_capacity(values.len());
        for (row_idx, v) in values.iter().enumerate() {
            if v.is_null() {
                restored.push(Value::Null);
                continue;
            }
            let deid = match v {
                Value::Int(i) => *i,
                Value::Str(s) => match s.parse::<i64>() {
                    Ok(i) => i,
                    Err(_) => {
                        warnings.push(format!(
                            "{}: row {row_idx}: non-integer surrogate '{s}'",
                            self.identifier.name
                        ));
                        restored.push(v.clone());
                        continue;
                    }
                },
                Value::Float(f) => *f as i64,
                other => {
                    warnings.push(format!("{}: row {row_idx}: unexpected surrogate type {other:?}", self.identifier.name));
                    restored.push(v.clone());
                    continue;
                }
            };
            match refs.lookup_original(&self.identifier.uid, deid) {
                Some(original) => restored.push(original),
                None => {
                    warnings.push(format!(
                        "{}: row {row_idx}: unknown surrogate {deid}",
                        self.identifier.name
                    ));
                    restored.push(v.clone());
                }
            }
        }
        out.set_column(&self.identifier.name, restored)?;
        Ok(ReverseOutcome { frame: out, warnings })
    }
}
