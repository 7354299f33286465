//! The transformer framework (spec §4.2–§4.5, §9 "Registry and polymorphism").
//!
//! The source uses a string-keyed dynamic registry to instantiate
//! transformer objects from configuration. Here the closed set is a sum
//! type, [`TransformerKind`], decoded once from [`crate::model::TransformerConfig`].
//! The engine never inspects a transformer's concrete type, only the
//! capability set `{plan, apply, reverse}` exposed by [`Transformer`].

mod column_dropper;
mod datetime;
mod id;

pub use column_dropper::ColumnDropperTransformer;
pub use datetime::DateTimeTransformer;
pub use id::IdTransformer;

use crate::error::DeidError;
use crate::filter::Filter;
use crate::frame::{Frame, IndexedFrame, Value};
use crate::model::{TransformerConfig, TransformerMethod, ValueCast};
use crate::refstore::ReferenceStore;

/// The result of running a transformer in reverse: the reconstructed frame
/// plus any warnings (unknown surrogates, dropped columns) to surface in
/// the verification report.
pub struct ReverseOutcome {
    pub frame: Frame,
    pub warnings: Vec<String>,
}

/// One concrete transformer kind. Extension means adding a variant, never
/// registering at runtime (spec §9).
pub enum TransformerKind {
    Id(IdTransformer),
    DateTime(DateTimeTransformer),
    ColumnDropper(ColumnDropperTransformer),
}

impl TransformerKind {
    fn forward(&self, frame: &Frame, refs: &ReferenceStore) -> Result<Frame, DeidError> {
        match self {
            TransformerKind::Id(t) => t.forward(frame, refs),
            TransformerKind::DateTime(t) => t.forward(frame, refs),
            TransformerKind::ColumnDropper(t) => t.forward(frame),
        }
    }

    fn reverse(&self, frame: &Frame, refs: &ReferenceStore) -> Result<ReverseOutcome, DeidError> {
        match self {
            TransformerKind::Id(t) => t.reverse(frame, refs),
            TransformerKind::DateTime(t) => t.reverse(frame, refs),
            TransformerKind::ColumnDropper(t) => t.reverse(frame),
        }
    }

    /// The column this transformer writes to, used by the linter's
    /// `dropper-order` and `multiple-transformers-same-column` rules.
    pub fn output_column(&self) -> &str {
        match self {
            TransformerKind::Id(t) => &t.identifier.name,
            TransformerKind::DateTime(t) => &t.datetime_column,
            TransformerKind::ColumnDropper(t) => &t.identifier.name,
        }
    }

    /// The columns this transformer reads, used by the linter's
    /// `dropper-order` rule.
    pub fn input_columns(&self) -> Vec<&str> {
        match self {
            TransformerKind::Id(t) => vec![t.identifier.name.as_str()],
            TransformerKind::DateTime(t) => vec![t.idconfig.name.as_str(), t.datetime_column.as_str()],
            TransformerKind::ColumnDropper(t) => vec![t.identifier.name.as_str()],
        }
    }
}

/// A fully compiled transformer: its kind plus the execution wrapper
/// described in spec §4.2 (filter split/merge, value cast, DAG tag).
pub struct Transformer {
    pub uid: String,
    pub depends_on: Vec<String>,
    pub kind: TransformerKind,
    pub filter: Option<Filter>,
    pub value_cast: Option<ValueCast>,
}

impl Transformer {
    /// Compile a [`TransformerConfig`] into an executable [`Transformer`].
    /// `default_time_shift` is the engine-wide `deid_config.time_shift`,
    /// used by `DateTime` transformers that don't carry their own
    /// `global_time_shift` override.
    pub fn compile(
        config: &TransformerConfig,
        default_time_shift: Option<&crate::model::TimeShiftConfig>,
    ) -> Result<Transformer, DeidError> {
        let uid = config.uid_or_default();
        let filter = config.filter.as_deref().map(Filter::parse).transpose()?;
        let kind = match config.method {
            TransformerMethod::Id => {
                let identifier = config.configs.idconfig.clone().ok_or_else(|| {
                    DeidError::ValidationError(format!("transformer '{uid}': ID requires configs.idconfig"))
                })?;
                TransformerKind::Id(IdTransformer { identifier })
            }
            TransformerMethod::DateTime => {
                let idconfig = config.configs.idconfig.clone().ok_or_else(|| {
                    DeidError::ValidationError(format!("transformer '{uid}': DateTime requires configs.idconfig"))
                })?;
                let datetime_column = config.configs.datetime_column.clone().ok_or_else(|| {
                    DeidError::ValidationError(format!("transformer '{uid}': DateTime requires configs.datetime_column"))
                })?;
                let time_shift = config
                    .configs
                    .global_time_shift
                    .clone()
                    .or_else(|| default_time_shift.cloned())
                    .ok_or_else(|| {
                        DeidError::ValidationError(format!(
                            "transformer '{uid}': DateTime requires a time_shift (transformer-level or deid_config.time_shift)"
                        ))
                    })?;
                TransformerKind::DateTime(DateTimeTransformer {
                    idconfig,
                    datetime_column,
                    time_shift,
                })
            }
            TransformerMethod::ColumnDropper => {
                let identifier = config.configs.idconfig.clone().ok_or_else(|| {
                    DeidError::ValidationError(format!("transformer '{uid}': ColumnDropper requires configs.idconfig"))
                })?;
                TransformerKind::ColumnDropper(ColumnDropperTransformer { identifier })
            }
        };
        Ok(Transformer {
            uid,
            depends_on: config.depends_on.clone(),
            kind,
            filter,
            value_cast: config.value_cast,
        })
    }

    /// Execute the transformer against `frame`, honoring the filter
    /// split/merge and value-cast wrapper (spec §4.2).
    pub fn apply(&self, frame: &Frame, refs: &ReferenceStore) -> Result<Frame, DeidError> {
        let mut out = match &self.filter {
            None => self.kind.forward(frame, refs)?,
            Some(filter) => {
                let (matching, non_matching) = frame.partition_by(|row, cols| {
                    filter.evaluate(row, cols).unwrap_or(false)
                });
                let transformed_matching = self.kind.forward(&matching.to_frame(), refs)?;
                let reindexed = IndexedFrame {
                    columns: transformed_matching.columns.clone(),
                    rows: matching
                        .rows
                        .iter()
                        .map(|(i, _)| *i)
                        .zip(transformed_matching.rows.into_iter())
                        .collect(),
                };
                IndexedFrame::merge_ordered(reindexed, non_matching)
            }
        };
        if let Some(cast) = self.value_cast {
            self.apply_value_cast(&mut out, cast)?;
        }
        Ok(out)
    }

    /// Reverse mode: subtract/undo the transformation, per §4.3/§4.4.
    /// Column droppers cannot be recovered; they are skipped with a warning.
    pub fn reverse(&self, frame: &Frame, refs: &ReferenceStore) -> Result<ReverseOutcome, DeidError> {
        match &self.filter {
            None => self.kind.reverse(frame, refs),
            Some(filter) => {
                let (matching, non_matching) = frame.partition_by(|row, cols| {
                    filter.evaluate(row, cols).unwrap_or(false)
                });
                let outcome = self.kind.reverse(&matching.to_frame(), refs)?;
                let reindexed = IndexedFrame {
                    columns: outcome.frame.columns.clone(),
                    rows: matching
                        .rows
                        .iter()
                        .map(|(i, _)| *i)
                        .zip(outcome.frame.rows.into_iter())
                        .collect(),
                };
                let merged = IndexedFrame::merge_ordered(reindexed, non_matching);
                Ok(ReverseOutcome {
                    frame: merged,
                    warnings: outcome.warnings,
                })
            }
        }
    }

    fn apply_value_cast(&self, frame: &mut Frame, cast: ValueCast) -> Result<(), DeidError> {
        let column = self.kind.output_column().to_string();
        if let Some(idx) = frame.column_index(&column) {
            for row in frame.rows.iter_mut() {
                row[idx] = row[idx].cast(cast)?;
            }
        }
        Ok(())
    }
}

/// Entities/nulls pass through unchanged: shared helper for `ID` and
/// `DateTime` forward passes.
pub(crate) fn is_passthrough(v: &Value) -> bool {
    v.is_null()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identifier, TransformerConfigs};

    fn id_config(filter: Option<&str>, value_cast: Option<ValueCast>) -> TransformerConfig {
        TransformerConfig {
            method: TransformerMethod::Id,
            uid: Some("user".into()),
            depends_on: vec![],
            configs: TransformerConfigs {
                idconfig: Some(Identifier {
                    name: "user_id".into(),
                    uid: "user".into(),
                    description: None,
                }),
                datetime_column: None,
                global_time_shift: None,
            },
            filter: filter.map(|s| s.to_string()),
            value_cast,
        }
    }

    #[test]
    fn compile_id_transformer() {
        let cfg = id_config(None, None);
        let t = Transformer::compile(&cfg, None).unwrap();
        assert_eq!(t.uid, "user");
        assert!(matches!(t.kind, TransformerKind::Id(_)));
    }

    #[test]
    fn apply_without_filter_transforms_all_rows() {
        let cfg = id_config(None, None);
        let t = Transformer::compile(&cfg, None).unwrap();
        let refs = ReferenceStore::new();
        let mut frame = Frame::new(vec!["user_id".into()]);
        frame.rows = vec![vec![Value::Int(101)], vec![Value::Int(202)]];
        let out = t.apply(&frame, &refs).unwrap();
        assert_eq!(out.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
    }

    #[test]
    fn apply_with_filter_leaves_non_matching_rows_untouched() {
        let cfg = id_config(Some("user_id >= 200"), None);
        let t = Transformer::compile(&cfg, None).unwrap();
        let refs = ReferenceStore::new();
        let mut frame = Frame::new(vec!["user_id".into()]);
        frame.rows = vec![vec![Value::Int(101)], vec![Value::Int(202)]];
        let out = t.apply(&frame, &refs).unwrap();
        // row 0 (101 < 200) is untouched; row 1 (202 >= 200) is surrogated to 1.
        assert_eq!(out.rows, vec![vec![Value::Int(101)], vec![Value::Int(1)]]);
    }

    #[test]
    fn value_cast_to_string_after_transform() {
        let cfg = id_config(None, Some(ValueCast::String));
        let t = Transformer::compile(&cfg, None).unwrap();
        let refs = ReferenceStore::new();
        let mut frame = Frame::new(vec!["user_id".into()]);
        frame.rows = vec![vec![Value::Int(101)]];
        let out = t.apply(&frame, &refs).unwrap();
        assert_eq!(out.rows[0][0], Value::Str("1".into()));
    }
}
