//! DateTime transformer (spec §4.4): shift timestamps by a per-entity
//! offset keyed on an identity column.
//!
//! `random_days`/`random_hours` are resolved to the same per-entity
//! sampling as `shift_by_*` (spec §9 Open Question; see `DESIGN.md`): the
//! shift map holds exactly one offset per entity no matter the method, so
//! round-trip holds universally.

use std::collections::HashMap;

use chrono::{Duration, Months, NaiveDateTime};

use super::ReverseOutcome;
use crate::error::DeidError;
use crate::frame::{Frame, Value};
use crate::hash::sample_in_range;
use crate::model::{Identifier, ShiftMethod, TimeShiftConfig};
use crate::refstore::ReferenceStore;

pub struct DateTimeTransformer {
    pub idconfig: Identifier,
    pub datetime_column: String,
    pub time_shift: TimeShiftConfig,
}

impl DateTimeTransformer {
    pub fn forward(&self, frame: &Frame, refs: &ReferenceStore) -> Result<Frame, DeidError> {
        let mut out = frame.clone();
        let distinct_entities = frame.distinct_column_values(&self.idconfig.name)?;
        let uid = self.idconfig.shift_uid();
        let method = self.time_shift.method;
        let (min, max) = (self.time_shift.min, self.time_shift.max);
        let shifts = refs.append_or_lookup_shift(&uid, &distinct_entities, |v| {
            sample_in_range(&uid, &v.to_key(), min, max)
        });
        let lookup: HashMap<String, i64> = distinct_entities
            .iter()
            .map(|v| v.to_key())
            .zip(shifts.into_iter())
            .collect();

        let entity_col = frame.column_values(&self.idconfig.name)?;
        let dt_col = frame.column_values(&self.datetime_column)?;
        let mut new_dt = Vec::with_capacity(dt_col.len());
        for (entity, dt) in entity_col.into_iter().zip(dt_col.into_iter()) {
            if entity.is_null() || dt.is_null() {
                new_dt.push(dt.clone());
                continue;
            }
            let shift = *lookup
                .get(&entity.to_key())
                .expect("distinct entity missing from shift lookup");
            let naive = require_datetime(dt, &self.datetime_column)?;
            new_dt.push(Value::DateTime(shift_datetime(naive, method, shift)?));
        }
        out.set_column(&self.datetime_column, new_dt)?;
        Ok(out)
    }

    pub fn reverse(&self, frame: &Frame, refs: &ReferenceStore) -> Result<ReverseOutcome, DeidError> {
        let mut out = frame.clone();
        let mut warnings = Vec::new();
        let uid = self.idconfig.shift_uid();
        let method = self.time_shift.method;

        let entity_col: Vec<Value> = frame.column_values(&self.idconfig.name)?.into_iter().cloned().collect();
        let dt_col: Vec<Value> = frame.column_values(&self.datetime_column)?.into_iter().cloned().collect();
        let mut restored = Vec::with_capacity(dt_col.len());
        for (row_idx, (entity, dt)) in entity_col.iter().zip(dt_col.iter()).enumerate() {
            if entity.is_null() || dt.is_null() {
                restored.push(dt.clone());
                continue;
            }
            let shift = match refs.lookup_shift(&uid, entity) {
                Some(s) => s,
                None => {
                    warnings.push(format!(
                        "{}: row {row_idx}: unknown entity in shift map",
                        self.datetime_column
                    ));
                    restored.push(dt.clone());
                    continue;
                }
            };
            let naive = require_datetime(dt, &self.datetime_column)?;
            restored.push(Value::DateTime(shift_datetime(naive, method, -shift)?));
        }
        out.set_column(&self.datetime_column, restored)?;
        Ok(ReverseOutcome { frame: out, warnings })
    }
}

fn require_datetime(v: &Value, column: &str) -> Result<NaiveDateTime, DeidError> {
    match v {
        Value::DateTime(dt) => Ok(*dt),
        other => Err(DeidError::TransformError(format!(
            "column '{column}' is not a datetime: {other:?}"
        ))),
    }
}

/// Add `amount` shift units to `dt` using calendar-aware arithmetic for
/// months/years and exact durations for weeks/days/hours (spec §4.4).
fn shift_datetime(dt: NaiveDateTime, method: ShiftMethod, amount: i64) -> Result<NaiveDateTime, DeidError> {
    match method {
        ShiftMethod::ShiftByYears => add_months(dt, amount * 12),
        ShiftMethod::ShiftByMonths => add_months(dt, amount),
        ShiftMethod::ShiftByWeeks => Ok(dt + Duration::weeks(amount)),
        ShiftMethod::ShiftByDays | ShiftMethod::RandomDays => Ok(dt + Duration::days(amount)),
        ShiftMethod::ShiftByHours | ShiftMethod::RandomHours => Ok(dt + Duration::hours(amount)),
    }
}

fn add_months(dt: NaiveDateTime, months: i64) -> Result<NaiveDateTime, DeidError> {
    if months >= 0 {
        dt.checked_add_months(Months::new(months as u32))
    } else {
        dt.checked_sub_months(Months::new((-months) as u32))
    }
    .ok_or_else(|| DeidError::TransformError(format!("datetime shift of {months} months overflowed")))
}
