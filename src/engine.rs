//! The engine (spec §4.7): owns the table DAG, orchestrates pipelines
//! against the configured stores, and produces a run report.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::dag::Dag;
use crate::error::DeidError;
use crate::io::filesystem::FilesystemStore;
use crate::io::sql::SqlStore;
use crate::io::TableStore;
use crate::model::{EngineConfig, IoConfig, IoType};
use crate::pipeline::TablePipeline;
use crate::refstore::ReferenceStore;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Success,
    Error,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineResult {
    fn success() -> PipelineResult {
        PipelineResult { status: PipelineStatus::Success, error: None }
    }
    fn error(message: String) -> PipelineResult {
        PipelineResult { status: PipelineStatus::Error, error: Some(message) }
    }
    fn skipped() -> PipelineResult {
        PipelineResult { status: PipelineStatus::Skipped, error: None }
    }
    fn cancelled() -> PipelineResult {
        PipelineResult { status: PipelineStatus::Skipped, error: Some(DeidError::Cancelled.to_string()) }
    }
}

/// A cooperative cancellation flag shared between a caller and a running
/// engine (spec §5 "Cancellation"). `run`/`run_reverse` check it once per
/// table, between pipelines, so a table already in flight always finishes
/// before the run winds down.
#[derive(Debug, Clone)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for CancellationToken {
    fn default() -> CancellationToken {
        CancellationToken::new()
    }
}

/// Options for a forward run: `continue_on_error` keeps going past a
/// failed table (unless the failure is fatal); `rows_limit` truncates
/// every table's input to its first N rows; `test_mode` runs the full
/// pipeline but skips writing output, for a dry run.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub continue_on_error: bool,
    pub rows_limit: Option<usize>,
    pub test_mode: bool,
}

/// `{success, execution_order, results}` (spec §6 "Run report").
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub success: bool,
    pub execution_order: Vec<String>,
    pub results: BTreeMap<String, PipelineResult>,
}

fn build_store(io: &IoConfig) -> Result<Box<dyn TableStore>, DeidError> {
    match io.io_type {
        IoType::Filesystem => Ok(Box::new(FilesystemStore::new(io)?)),
        IoType::Sql => Ok(Box::new(SqlStore::new(io))),
    }
}

fn required_io_config<'a>(config: Option<&'a IoConfig>, label: &str) -> Result<&'a IoConfig, DeidError> {
    config.ok_or_else(|| DeidError::ConfigLoad(format!("io.{label} is not configured")))
}

fn build_filesystem_store(base_path: &Path) -> Result<FilesystemStore, DeidError> {
    let io = IoConfig {
        io_type: IoType::Filesystem,
        configs: BTreeMap::from([(
            "base_path".to_string(),
            serde_yaml::Value::String(base_path.to_string_lossy().to_string()),
        )]),
    };
    FilesystemStore::new(&io)
}

pub struct Engine {
    config: EngineConfig,
    refs: ReferenceStore,
    data_input: Box<dyn TableStore>,
    data_output: Box<dyn TableStore>,
    deid_ref_output_path: Option<PathBuf>,
    table_dag: Dag,
}

impl Engine {
    /// Build an engine from a parsed configuration: binds both data stores,
    /// loads the reference store once, and builds the table DAG from
    /// `table_config.depends_on` (spec §4.7, §3 "Lifecycle").
    pub fn new(config: EngineConfig) -> Result<Engine, DeidError> {
        let data_input = build_store(required_io_config(config.io.data.input_config.as_ref(), "data.input_config")?)?;
        let data_output = build_store(required_io_config(config.io.data.output_config.as_ref(), "data.output_config")?)?;

        let refs = match config.io.deid_ref.input_config.as_ref().and_then(|c| c.base_path()) {
            Some(path) => ReferenceStore::load(Path::new(path))?,
            None => ReferenceStore::new(),
        };
        let deid_ref_output_path = config
            .io
            .deid_ref
            .output_config
            .as_ref()
            .and_then(|c| c.base_path())
            .map(PathBuf::from);

        let mut table_dag = Dag::new();
        for (name, table) in &config.tables {
            table_dag.add_node(name.clone());
            for dep in &table.depends_on {
                table_dag.add_edge(name.clone(), dep.clone());
            }
        }

        Ok(Engine { config, refs, data_input, data_output, deid_ref_output_path, table_dag })
    }

    /// `run(config, {continue_on_error, rows_limit, test_mode})` (spec
    /// §4.7, §6). Tables run in topological order; a failed table's
    /// downstream tables are marked `skipped`. References are flushed once
    /// at the end regardless of outcome. If `cancellation` is set before a
    /// table starts, that table and every remaining one are marked
    /// `skipped` instead of running (spec §5 "Cancellation") — a table
    /// already in progress always finishes.
    pub fn run(&self, options: RunOptions, cancellation: &CancellationToken) -> Result<RunReport, DeidError> {
        let order = self.table_dag.topological_order()?;
        let mut results: BTreeMap<String, PipelineResult> = BTreeMap::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut aborted = false;

        for name in &order {
            if cancellation.is_cancelled() {
                results.insert(name.clone(), PipelineResult::cancelled());
                continue;
            }
            if aborted {
                results.insert(name.clone(), PipelineResult::skipped());
                continue;
            }
            let table = match self.config.tables.get(name) {
                Some(t) => t,
                None => continue,
            };
            if table.depends_on.iter().any(|d| failed.contains(d)) {
                results.insert(name.clone(), PipelineResult::skipped());
                failed.insert(name.clone());
                continue;
            }

            let outcome = TablePipeline::compile(table, self.config.deid_config.time_shift.as_ref()).and_then(|pipeline| {
                pipeline.transform_all(
                    self.data_input.as_ref(),
                    self.data_output.as_ref(),
                    &self.refs,
                    options.rows_limit,
                    options.test_mode,
                )
            });

            match outcome {
                Ok(_) => {
                    results.insert(name.clone(), PipelineResult::success());
                }
                Err(e) => {
                    let fatal = e.is_fatal();
                    results.insert(name.clone(), PipelineResult::error(e.to_string()));
                    failed.insert(name.clone());
                    if fatal || !options.continue_on_error {
                        aborted = true;
                    }
                }
            }
        }

        self.flush_refs()?;

        let success = results.values().all(|r| r.status != PipelineStatus::Error);
        Ok(RunReport { success, execution_order: order, results })
    }

    /// `run(reverse=true, reverse_output_path)` (spec §4.7): same table
    /// ordering, each pipeline invoked in reverse mode against the
    /// de-identified data store, writing the reconstruction under
    /// `reverse_output_path`. Cancellation behaves as in [`Engine::run`].
    pub fn run_reverse(&self, reverse_output_path: &Path, cancellation: &CancellationToken) -> Result<RunReport, DeidError> {
        let order = self.table_dag.topological_order()?;
        let mut results: BTreeMap<String, PipelineResult> = BTreeMap::new();
        let reverse_store = build_filesystem_store(reverse_output_path)?;

        for name in &order {
            if cancellation.is_cancelled() {
                results.insert(name.clone(), PipelineResult::cancelled());
                continue;
            }
            let table = match self.config.tables.get(name) {
                Some(t) => t,
                None => continue,
            };
            let outcome = TablePipeline::compile(table, self.config.deid_config.time_shift.as_ref())
                .and_then(|pipeline| pipeline.reverse_all(self.data_output.as_ref(), &reverse_store, &self.refs));
            match outcome {
                Ok(_) => {
                    results.insert(name.clone(), PipelineResult::success());
                }
                Err(e) => {
                    results.insert(name.clone(), PipelineResult::error(e.to_string()));
                }
            }
        }

        let success = results.values().all(|r| r.status != PipelineStatus::Error);
        Ok(RunReport { success, execution_order: order, results })
    }

    /// `verify(config, reverse_output_path) -> VerificationResult` (spec
    /// §6): reverses every table against the reference store and compares
    /// each reconstructed column against the original input.
    pub fn verify(&self, reverse_output_path: &Path) -> Result<crate::verify::VerificationResult, DeidError> {
        let order = self.table_dag.topological_order()?;
        let reverse_store = build_filesystem_store(reverse_output_path)?;

        let mut tables = BTreeMap::new();
        for name in &order {
            let table = match self.config.tables.get(name) {
                Some(t) => t,
                None => continue,
            };
            let pipeline = TablePipeline::compile(table, self.config.deid_config.time_shift.as_ref())?;
            let outcome = pipeline.reverse_all(self.data_output.as_ref(), &reverse_store, &self.refs)?;
            let (_, original_segments) = self.data_input.read_table(name)?;
            let (_, reversed_segments) = reverse_store.read_table(name)?;
            let table_report = crate::verify::compare_table(&original_segments, &reversed_segments, &outcome.warnings);
            tables.insert(name.clone(), table_report);
        }
        Ok(crate::verify::VerificationResult::new(tables))
    }

    fn flush_refs(&self) -> Result<(), DeidError> {
        match &self.deid_ref_output_path {
            Some(path) => self.refs.save(path),
            None => Ok(()),
        }
    }

    /// Writes `status_<unix_ts>.json` under `runtime_io_path` (spec §6 "Run report").
    pub fn save_report(&self, report: &RunReport, runtime_io_path: &Path) -> Result<(), DeidError> {
        std::fs::create_dir_all(runtime_io_path)
            .map_err(|e| DeidError::WriteError(format!("cannot create '{}': {e}", runtime_io_path.display())))?;
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = runtime_io_path.join(format!("status_{ts}.json"));
        let body = serde_json::to_string_pretty(report)
            .map_err(|e| DeidError::WriteError(format!("cannot serialize run report: {e}")))?;
        std::fs::write(&path, body).map_err(|e| DeidError::WriteError(format!("cannot write '{}': {e}", path.display())))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClearedIo, DeidConfig, Identifier, PairedIo, TableConfig, TransformerConfig, TransformerConfigs, TransformerMethod};
    use std::fs;

    fn filesystem_io(path: &Path) -> IoConfig {
        IoConfig {
            io_type: IoType::Filesystem,
            configs: BTreeMap::from([("base_path".to_string(), serde_yaml::Value::String(path.to_string_lossy().to_string()))]),
        }
    }

    fn id_table(name: &str, depends_on: Vec<String>) -> TableConfig {
        TableConfig {
            name: name.to_string(),
            depends_on,
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
    fn run_processes_independent_tables_and_writes_report() {
        let input_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        let ref_dir = tempfile::tempdir().unwrap();
        fs::write(input_dir.path().join("users.csv"), "user_id\n101\n202\n").unwrap();

        let config = EngineConfig {
            name: "test_engine".into(),
            deid_config: DeidConfig::default(),
            io: ClearedIo {
                data: PairedIo {
                    input_config: Some(filesystem_io(input_dir.path())),
                    output_config: Some(filesystem_io(output_dir.path())),
                },
                deid_ref: PairedIo {
                    input_config: Some(filesystem_io(ref_dir.path())),
                    output_config: Some(filesystem_io(ref_dir.path())),
                },
                runtime_io_path: "/tmp/runtime".into(),
            },
            tables: BTreeMap::from([("users".to_string(), id_table("users", vec![]))]),
        };

        let engine = Engine::new(config).unwrap();
        let report = engine.run(RunOptions::default(), &CancellationToken::new()).unwrap();
        assert!(report.success);
        assert_eq!(report.execution_order, vec!["users".to_string()]);
        assert!(ref_dir.path().join("user.csv").exists());
    }

    #[test]
    fn run_continues_past_a_failed_table_when_continue_on_error() {
        let input_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        let ref_dir = tempfile::tempdir().unwrap();
        // "visits" has no input file, so its pipeline fails; "users" upstream still runs.
        fs::write(input_dir.path().join("users.csv"), "user_id\n101\n").unwrap();

        let config = EngineConfig {
            name: "test_engine".into(),
            deid_config: DeidConfig::default(),
            io: ClearedIo {
                data: PairedIo {
                    input_config: Some(filesystem_io(input_dir.path())),
                    output_config: Some(filesystem_io(output_dir.path())),
                },
                deid_ref: PairedIo {
                    input_config: Some(filesystem_io(ref_dir.path())),
                    output_config: Some(filesystem_io(ref_dir.path())),
                },
                runtime_io_path: "/tmp/runtime".into(),
            },
            tables: BTreeMap::from([
                ("users".to_string(), id_table("users", vec![])),
                ("visits".to_string(), id_table("visits", vec!["users".to_string()])),
            ]),
        };

        let engine = Engine::new(config).unwrap();
        let options = RunOptions { continue_on_error: true, ..Default::default() };
        let report = engine.run(options, &CancellationToken::new()).unwrap();
        assert!(!report.success);
        assert_eq!(report.results["users"].status, PipelineStatus::Success);
        assert_eq!(report.results["visits"].status, PipelineStatus::Error);
    }

    #[test]
    fn run_marks_outstanding_tables_skipped_when_cancelled_up_front() {
        let input_dir = tempfile::tempdir().unwrap();
        let output_dir = tempfile::tempdir().unwrap();
        let ref_dir = tempfile::tempdir().unwrap();
        fs::write(input_dir.path().join("users.csv"), "user_id\n101\n").unwrap();

        let config = EngineConfig {
            name: "test_engine".into(),
            deid_config: DeidConfig::default(),
            io: ClearedIo {
                data: PairedIo {
                    input_config: Some(filesystem_io(input_dir.path())),
                    output_config: Some(filesystem_io(output_dir.path())),
                },
                deid_ref: PairedIo {
                    input_config: Some(filesystem_io(ref_dir.path())),
                    output_config: Some(filesystem_io(ref_dir.path())),
                },
                runtime_io_path: "/tmp/runtime".into(),
            },
            tables: BTreeMap::from([("users".to_string(), id_table("users", vec![]))]),
        };

        let engine = Engine::new(config).unwrap();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let report = engine.run(RunOptions::default(), &cancellation).unwrap();

        // A skip due to cancellation doesn't flip `success`, same as a
        // dependency-failure skip — only an actual pipeline error does.
        assert!(report.success);
        let result = &report.results["users"];
        assert_eq!(result.status, PipelineStatus::Skipped);
        assert_eq!(result.error.as_deref(), Some(DeidError::Cancelled.to_string().as_str()));
        // References are still flushed even when cancelled up front.
        assert!(ref_dir.path().exists());
        // Cancelling before any table starts means no output is written.
        assert!(!output_dir.path().join("users.csv").exists());
    }
}
