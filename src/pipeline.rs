//! Table pipeline (spec §4.6): owns one table's transformer DAG plus its
//! segmented I/O.

use crate::dag::Dag;
use crate::error::DeidError;
use crate::frame::Frame;
use crate::io::{Segment, TableStore};
use crate::model::{TableConfig, TimeShiftConfig};
use crate::refstore::ReferenceStore;
use crate::transformers::Transformer;

/// Warnings and row counts surfaced after running one table through its
/// pipeline, independent of whether it succeeded (see `RunReport`).
pub struct PipelineOutcome {
    pub segments_written: usize,
    pub rows_processed: usize,
    pub warnings: Vec<String>,
}

pub struct TablePipeline {
    pub name: String,
    transformers: Vec<Transformer>,
}

impl TablePipeline {
    /// Compile a table's transformers into a pipeline, ordering them by
    /// their own `depends_on` DAG (ties broken by declaration order).
    pub fn compile(table: &TableConfig, default_time_shift: Option<&TimeShiftConfig>) -> Result<TablePipeline, DeidError> {
        let mut dag = Dag::new();
        for t in &table.transformers {
            let uid = t.uid_or_default();
            dag.add_node(uid.clone());
            for dep in &t.depends_on {
                dag.add_edge(uid.clone(), dep.clone());
            }
        }
        let order = dag
            .topological_order()
            .map_err(|e| e.into_pipeline_error(table.name.clone()))?;

        let mut compiled = Vec::with_capacity(table.transformers.len());
        for config in &table.transformers {
            compiled.push(
                Transformer::compile(config, default_time_shift)
                    .map_err(|e| e.into_pipeline_error(table.name.clone()))?,
            );
        }

        let mut ordered = Vec::with_capacity(compiled.len());
        for uid in order {
            if let Some(pos) = compiled.iter().position(|t| t.uid == uid) {
                ordered.push(compiled.remove(pos));
            }
        }
        Ok(TablePipeline { name: table.name.clone(), transformers: ordered })
    }

    /// Run every transformer, in order, over one segment frame.
    pub fn transform(&self, frame: &Frame, refs: &ReferenceStore) -> Result<Frame, DeidError> {
        let mut current = frame.clone();
        for t in &self.transformers {
            current = t
                .apply(&current, refs)
                .map_err(|e| e.into_pipeline_error(self.name.clone()))?;
        }
        Ok(current)
    }

    /// Run every transformer, in reverse topological order, in reverse mode
    /// (spec §4.6 `reverse()`).
    pub fn reverse_frame(&self, frame: &Frame, refs: &ReferenceStore) -> Result<(Frame, Vec<String>), DeidError> {
        let mut current = frame.clone();
        let mut warnings = Vec::new();
        for t in self.transformers.iter().rev() {
            let outcome = t
                .reverse(&current, refs)
                .map_err(|e| e.into_pipeline_error(self.name.clone()))?;
            current = outcome.frame;
            warnings.extend(outcome.warnings);
        }
        Ok((current, warnings))
    }

    /// Enumerate segments from `input`, transform each, and write them to
    /// `output` preserving segment names and the file-vs-directory shape
    /// (spec §4.6, invariant 6). `rows_limit` truncates each segment to its
    /// first N rows before transforming, for a row-bounded dry run;
    /// `test_mode` runs the full pipeline but skips the final write.
    pub fn transform_all(
        &self,
        input: &dyn TableStore,
        output: &dyn TableStore,
        refs: &ReferenceStore,
        rows_limit: Option<usize>,
        test_mode: bool,
    ) -> Result<PipelineOutcome, DeidError> {
        let (shape, segments) = input
            .read_table(&self.name)
            .map_err(|e| e.into_pipeline_error(self.name.clone()))?;
        let mut rows_processed = 0;
        let mut out_segments = Vec::with_capacity(segments.len());
        for segment in segments {
            let frame = match rows_limit {
                Some(limit) => segment.frame.truncated(limit),
                None => segment.frame,
            };
            let transformed = self.transform(&frame, refs)?;
            rows_processed += transformed.len();
            out_segments.push(Segment { name: segment.name, frame: transformed });
        }
        let segments_written = if test_mode {
            0
        } else {
            output
                .write_table(&self.name, &shape, &out_segments)
                .map_err(|e| e.into_pipeline_error(self.name.clone()))?;
            out_segments.len()
        };
        Ok(PipelineOutcome { segments_written, rows_processed, warnings: Vec::new() })
    }

    /// The reverse counterpart of `transform_all`: reads the de-identified
    /// segments from `input`, reverses each, writes the reconstruction to
    /// `output`.
    pub fn reverse_all(
        &self,
        input: &dyn TableStore,
        output: &dyn TableStore,
        refs: &ReferenceStore,
    ) -> Result<PipelineOutcome, DeidError> {
        let (shape, segments) = input
            .read_table(&self.name)
            .map_err(|e| e.into_pipeline_error(self.name.clone()))?;
        let mut rows_processed = 0;
        let mut warnings = Vec::new();
        let mut out_segments = Vec::with_capacity(segments.len());
        for segment in segments {
            let (restored, segment_warnings) = self.reverse_frame(&segment.frame, refs)?;
            rows_processed += restored.len();
            warnings.extend(segment_warnings);
            out_segments.push(Segment { name: segment.name, frame: restored });
        }
        let segments_written = out_segments.len();
        output
            .write_table(&self.name, &shape, &out_segments)
            .map_err(|e| e.into_pipeline_error(self.name.clone()))?;
        Ok(PipelineOutcome { segments_written, rows_processed, warnings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Value;
    use crate::io::TableShape;
    use crate::model::{Identifier, TransformerConfig, TransformerConfigs, TransformerMethod};
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct MemStore {
        tables: RefCell<HashMap<String, (TableShape, Vec<Segment>)>>,
    }

    impl MemStore {
        fn with(name: &str, shape: TableShape, segments: Vec<Segment>) -> MemStore {
            let mut tables = HashMap::new();
            tables.insert(name.to_string(), (shape, segments));
            MemStore { tables: RefCell::new(tables) }
        }

        fn empty() -> MemStore {
            MemStore { tables: RefCell::new(HashMap::new()) }
        }
    }

    impl TableStore for MemStore {
        fn read_table(&self, table: &str) -> Result<(TableShape, Vec<Segment>), DeidError> {
            self.tables
                .borrow()
                .get(table)
                .map(|(s, segs)| (s.clone(), segs.clone()))
                .ok_or_else(|| DeidError::TableNotFound(table.to_string()))
        }

        fn write_table(&self, table: &str, shape: &TableShape, segments: &[Segment]) -> Result<(), DeidError> {
            self.tables
                .borrow_mut()
                .insert(table.to_string(), (shape.clone(), segments.to_vec()));
            Ok(())
        }
    }

    fn id_table() -> TableConfig {
        TableConfig {
            name: "users".into(),
            depends_on: vec![],
            transformers: vec![TransformerConfig {
                method: TransformerMethod::Id,
                uid: Some("user".into()),
                depends_on: vec![],
                configs: TransformerConfigs {
                    idconfig: Some(Identifier { name: "user_id".into(), uid: "user".into(), description: None }),
                    datetime_column: None,
                    global_time_shift: None,
                },
                filter: None,
                value_cast: None,
            }],
        }
    }

    #[test]
    fn transform_all_writes_surrogates_and_preserves_segment_names() {
        let table = id_table();
        let pipeline = TablePipeline::compile(&table, None).unwrap();
        let refs = ReferenceStore::new();
        let mut frame = Frame::new(vec!["user_id".into()]);
        frame.rows = vec![vec![Value::Int(101)], vec![Value::Int(202)], vec![Value::Int(303)]];
        let input = MemStore::with(
            "users",
            TableShape::SingleFile,
            vec![Segment { name: "users.csv".into(), frame }],
        );
        let output = MemStore::empty();
        let outcome = pipeline.transform_all(&input, &output, &refs, None, false).unwrap();
        assert_eq!(outcome.rows_processed, 3);

        let (shape, segments) = output.read_table("users").unwrap();
        assert_eq!(shape, TableShape::SingleFile);
        assert_eq!(segments[0].name, "users.csv");
        assert_eq!(segments[0].frame.rows, vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]]);
    }

    #[test]
    fn reverse_all_restores_original_values() {
        let table = id_table();
        let pipeline = TablePipeline::compile(&table, None).unwrap();
        let refs = ReferenceStore::new();
        let mut frame = Frame::new(vec!["user_id".into()]);
        frame.rows = vec![vec![Value::Int(101)], vec![Value::Int(202)]];
        let input = MemStore::with("users", TableShape::SingleFile, vec![Segment { name: "users.csv".into(), frame }]);
        let deid_store = MemStore::empty();
        pipeline.transform_all(&input, &deid_store, &refs, None, false).unwrap();

        let restored_store = MemStore::empty();
        let outcome = pipeline.reverse_all(&deid_store, &restored_store, &refs).unwrap();
        assert!(outcome.warnings.is_empty());
        let (_, segments) = restored_store.read_table("users").unwrap();
        assert_eq!(segments[0].frame.rows, vec![vec![Value::Int(101)], vec![Value::Int(202)]]);
    }

    #[test]
    fn transform_all_respects_rows_limit_and_test_mode() {
        let table = id_table();
        let pipeline = TablePipeline::compile(&table, None).unwrap();
        let refs = ReferenceStore::new();
        let mut frame = Frame::new(vec!["user_id".into()]);
        frame.rows = vec![vec![Value::Int(101)], vec![Value::Int(202)], vec![Value::Int(303)]];
        let input = MemStore::with(
            "users",
            TableShape::SingleFile,
            vec![Segment { name: "users.csv".into(), frame }],
        );
        let output = MemStore::empty();
        let outcome = pipeline.transform_all(&input, &output, &refs, Some(2), true).unwrap();

        assert_eq!(outcome.rows_processed, 2);
        assert_eq!(outcome.segments_written, 0);
        assert!(output.read_table("users").is_err(), "test_mode must not write output");
    }
}
