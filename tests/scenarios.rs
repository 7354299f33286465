//! End-to-end scenarios over the engine's public surface, exercising the
//! invariants and concrete examples around stable identity, cross-table
//! sharing, rerun-append, datetime shifting, multi-segment round-trip,
//! reverse+verify, and lint suppression.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use cleared::config::load_config;
use cleared::engine::{CancellationToken, Engine, RunOptions};
use cleared::lint::lint;
use cleared::model::{
    ClearedIo, DeidConfig, EngineConfig, Identifier, IoConfig, IoType, PairedIo, TableConfig,
    TransformerConfig, TransformerConfigs, TransformerMethod,
};

fn fs_io(path: &Path) -> IoConfig {
    IoConfig {
        io_type: IoType::Filesystem,
        configs: BTreeMap::from([("base_path".to_string(), serde_yaml::Value::String(path.to_string_lossy().to_string()))]),
    }
}

fn id_transformer(uid: &str, column: &str) -> TransformerConfig {
    TransformerConfig {
        method: TransformerMethod::Id,
        uid: Some(uid.to_string()),
        depends_on: vec![],
        configs: TransformerConfigs {
            idconfig: Some(Identifier { name: column.to_string(), uid: uid.to_string(), description: None }),
            datetime_column: None,
            global_time_shift: None,
        },
        filter: None,
        value_cast: None,
    }
}

fn engine_config(
    input_dir: &Path,
    output_dir: &Path,
    ref_input_dir: Option<&Path>,
    ref_output_dir: &Path,
    deid_config: DeidConfig,
    tables: BTreeMap<String, TableConfig>,
) -> EngineConfig {
    EngineConfig {
        name: "scenario_engine".to_string(),
        deid_config,
        io: ClearedIo {
            data: PairedIo { input_config: Some(fs_io(input_dir)), output_config: Some(fs_io(output_dir)) },
            deid_ref: PairedIo {
                input_config: ref_input_dir.map(fs_io),
                output_config: Some(fs_io(ref_output_dir)),
            },
            runtime_io_path: "/tmp/runtime".to_string(),
        },
        tables,
    }
}

/// S1 — single-table ID: surrogates are dense and order-preserving.
#[test]
fn s1_single_table_id() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let refs = tempfile::tempdir().unwrap();
    fs::write(input.path().join("users.csv"), "user_id\n101\n202\n303\n404\n505\n").unwrap();

    let tables = BTreeMap::from([(
        "users".to_string(),
        TableConfig { name: "users".to_string(), depends_on: vec![], transformers: vec![id_transformer("user", "user_id")] },
    )]);
    let config = engine_config(input.path(), output.path(), None, refs.path(), DeidConfig::default(), tables);
    let engine = Engine::new(config).unwrap();
    let report = engine.run(RunOptions::default(), &CancellationToken::new()).unwrap();
    assert!(report.success);

    let out = fs::read_to_string(output.path().join("users.csv")).unwrap();
    assert_eq!(out.lines().collect::<Vec<_>>(), vec!["user_id", "1", "2", "3", "4", "5"]);

    let uid_map = fs::read_to_string(refs.path().join("user.csv")).unwrap();
    assert_eq!(uid_map.lines().count(), 5);
}

/// S2 — cross-table shared uid: overlapping values get the same surrogate.
#[test]
fn s2_cross_table_shared_uid() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let refs = tempfile::tempdir().unwrap();
    fs::write(input.path().join("patients.csv"), "patient_id\n1\n2\n3\n4\n5\n").unwrap();
    fs::write(input.path().join("visits.csv"), "patient_id\n1\n2\n6\n7\n8\n").unwrap();

    let tables = BTreeMap::from([
        (
            "patients".to_string(),
            TableConfig { name: "patients".to_string(), depends_on: vec![], transformers: vec![id_transformer("patient", "patient_id")] },
        ),
        (
            "visits".to_string(),
            TableConfig { name: "visits".to_string(), depends_on: vec![], transformers: vec![id_transformer("patient", "patient_id")] },
        ),
    ]);
    let config = engine_config(input.path(), output.path(), None, refs.path(), DeidConfig::default(), tables);
    let engine = Engine::new(config).unwrap();
    assert!(engine.run(RunOptions::default(), &CancellationToken::new()).unwrap().success);

    let patients = fs::read_to_string(output.path().join("patients.csv")).unwrap();
    assert_eq!(patients.lines().collect::<Vec<_>>(), vec!["patient_id", "1", "2", "3", "4", "5"]);
    let visits = fs::read_to_string(output.path().join("visits.csv")).unwrap();
    assert_eq!(visits.lines().collect::<Vec<_>>(), vec!["patient_id", "1", "2", "6", "7", "8"]);

    let uid_map = fs::read_to_string(refs.path().join("patient.csv")).unwrap();
    assert_eq!(uid_map.lines().count(), 8);
}

/// S3 — rerun append: v1 surrogates are stable, new entities append.
#[test]
fn s3_rerun_append() {
    let input = tempfile::tempdir().unwrap();
    let output_v1 = tempfile::tempdir().unwrap();
    let output_v2 = tempfile::tempdir().unwrap();
    let refs_v1 = tempfile::tempdir().unwrap();
    let refs_v2 = tempfile::tempdir().unwrap();

    fs::write(input.path().join("users.csv"), "user_id\n101\n202\n303\n404\n505\n").unwrap();
    let table = || TableConfig { name: "users".to_string(), depends_on: vec![], transformers: vec![id_transformer("user", "user_id")] };

    let v1 = engine_config(input.path(), output_v1.path(), None, refs_v1.path(), DeidConfig::default(), BTreeMap::from([("users".to_string(), table())]));
    Engine::new(v1).unwrap().run(RunOptions::default(), &CancellationToken::new()).unwrap();

    fs::write(
        input.path().join("users.csv"),
        "user_id\n101\n202\n303\n404\n505\n606\n707\n808\n909\n1010\n",
    )
    .unwrap();
    let v2 = engine_config(
        input.path(),
        output_v2.path(),
        Some(refs_v1.path()),
        refs_v2.path(),
        DeidConfig::default(),
        BTreeMap::from([("users".to_string(), table())]),
    );
    Engine::new(v2).unwrap().run(RunOptions::default(), &CancellationToken::new()).unwrap();

    let out = fs::read_to_string(output_v2.path().join("users.csv")).unwrap();
    assert_eq!(
        out.lines().collect::<Vec<_>>(),
        vec!["user_id", "1", "2", "3", "4", "5", "6", "7", "8", "9", "10"]
    );
}

/// S4 — datetime shift: same entity gets the same offset; rerun with the
/// same shift map reproduces identical output timestamps.
#[test]
fn s4_datetime_shift_is_stable_per_entity() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let refs = tempfile::tempdir().unwrap();
    fs::write(
        input.path().join("visits.csv"),
        "patient_id,visit_at\n1,2020-01-01 00:00:00\n1,2020-06-01 00:00:00\n2,2021-01-01 00:00:00\n",
    )
    .unwrap();

    let transformer = TransformerConfig {
        method: TransformerMethod::DateTime,
        uid: Some("visit_shift".to_string()),
        depends_on: vec![],
        configs: TransformerConfigs {
            idconfig: Some(Identifier { name: "patient_id".to_string(), uid: "patient".to_string(), description: None }),
            datetime_column: Some("visit_at".to_string()),
            global_time_shift: None,
        },
        filter: None,
        value_cast: None,
    };
    let table = TableConfig { name: "visits".to_string(), depends_on: vec![], transformers: vec![transformer] };
    let deid_config = DeidConfig {
        time_shift: Some(cleared::model::TimeShiftConfig { method: cleared::model::ShiftMethod::ShiftByYears, min: -5, max: 5 }),
    };

    let config1 = engine_config(input.path(), output.path(), None, refs.path(), deid_config.clone(), BTreeMap::from([("visits".to_string(), table.clone())]));
    Engine::new(config1).unwrap().run(RunOptions::default(), &CancellationToken::new()).unwrap();
    let first_output = fs::read_to_string(output.path().join("visits.csv")).unwrap();
    let lines: Vec<&str> = first_output.lines().skip(1).collect();
    let offset_row0 = lines[0].trim_end_matches('\r').split(',').nth(1).unwrap();
    let offset_row1 = lines[1].trim_end_matches('\r').split(',').nth(1).unwrap();
    assert_eq!(&offset_row0[..4], &offset_row1[..4], "same entity should get the same year offset");

    // rerun with the same shift map reproduces identical output timestamps
    let output2 = tempfile::tempdir().unwrap();
    let refs2 = tempfile::tempdir().unwrap();
    let config2 = engine_config(input.path(), output2.path(), Some(refs.path()), refs2.path(), deid_config, BTreeMap::from([("visits".to_string(), table)]));
    Engine::new(config2).unwrap().run(RunOptions::default(), &CancellationToken::new()).unwrap();
    let second_output = fs::read_to_string(output2.path().join("visits.csv")).unwrap();
    assert_eq!(first_output, second_output);
}

/// S5 — multi-segment: output keeps the same segment filenames and total
/// row count as the input.
#[test]
fn s5_multi_segment_preserves_filenames_and_row_count() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let refs = tempfile::tempdir().unwrap();
    let users_dir = input.path().join("users");
    fs::create_dir_all(&users_dir).unwrap();
    fs::write(users_dir.join("segment1.csv"), "user_id\n101\n202\n").unwrap();
    fs::write(users_dir.join("segment2.csv"), "user_id\n303\n404\n505\n").unwrap();

    let tables = BTreeMap::from([(
        "users".to_string(),
        TableConfig { name: "users".to_string(), depends_on: vec![], transformers: vec![id_transformer("user", "user_id")] },
    )]);
    let config = engine_config(input.path(), output.path(), None, refs.path(), DeidConfig::default(), tables);
    assert!(Engine::new(config).unwrap().run(RunOptions::default(), &CancellationToken::new()).unwrap().success);

    let output_dir = output.path().join("users");
    assert!(output_dir.join("segment1.csv").exists());
    assert!(output_dir.join("segment2.csv").exists());
    let total_rows = fs::read_to_string(output_dir.join("segment1.csv")).unwrap().lines().count() - 1
        + fs::read_to_string(output_dir.join("segment2.csv")).unwrap().lines().count() - 1;
    assert_eq!(total_rows, 5);
}

/// S6 — reverse+verify: reversing reproduces the original frame and the
/// verification report passes with no errors.
#[test]
fn s6_reverse_and_verify_round_trip() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let refs = tempfile::tempdir().unwrap();
    let reversed = tempfile::tempdir().unwrap();
    fs::write(input.path().join("users.csv"), "user_id\n101\n202\n303\n404\n505\n").unwrap();

    let tables = BTreeMap::from([(
        "users".to_string(),
        TableConfig { name: "users".to_string(), depends_on: vec![], transformers: vec![id_transformer("user", "user_id")] },
    )]);
    let config = engine_config(input.path(), output.path(), None, refs.path(), DeidConfig::default(), tables);
    let engine = Engine::new(config).unwrap();
    assert!(engine.run(RunOptions::default(), &CancellationToken::new()).unwrap().success);

    let reverse_report = engine.run_reverse(reversed.path(), &CancellationToken::new()).unwrap();
    assert!(reverse_report.success);
    let restored = fs::read_to_string(reversed.path().join("users.csv")).unwrap();
    assert_eq!(restored.lines().collect::<Vec<_>>(), vec!["user_id", "101", "202", "303", "404", "505"]);

    let verification = engine.verify(reversed.path()).unwrap();
    assert_eq!(verification.summary.error, 0);
    let table = &verification.tables["users"];
    assert_eq!(table.status, cleared::verify::Status::Pass);
}

/// Rows-limit + test_mode: only the first N rows are processed, and no
/// output is written when running in test mode.
#[test]
fn rows_limit_and_test_mode_produce_a_dry_run() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let refs = tempfile::tempdir().unwrap();
    fs::write(input.path().join("users.csv"), "user_id\n101\n202\n303\n404\n505\n").unwrap();

    let tables = BTreeMap::from([(
        "users".to_string(),
        TableConfig { name: "users".to_string(), depends_on: vec![], transformers: vec![id_transformer("user", "user_id")] },
    )]);
    let config = engine_config(input.path(), output.path(), None, refs.path(), DeidConfig::default(), tables);
    let engine = Engine::new(config).unwrap();
    let options = RunOptions { rows_limit: Some(2), test_mode: true, ..Default::default() };
    let report = engine.run(options, &CancellationToken::new()).unwrap();

    assert!(report.success);
    assert!(!output.path().join("users.csv").exists(), "test_mode must not write output");
    // The reference store still records the (truncated) rows that were processed.
    let uid_map = fs::read_to_string(refs.path().join("user.csv")).unwrap();
    assert_eq!(uid_map.lines().count(), 2);
}

/// Cancellation: a token set before a run starts causes every table to be
/// reported as skipped rather than run, without erroring the call itself.
#[test]
fn cancellation_skips_every_table_without_running_them() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let refs = tempfile::tempdir().unwrap();
    fs::write(input.path().join("users.csv"), "user_id\n101\n202\n").unwrap();

    let tables = BTreeMap::from([(
        "users".to_string(),
        TableConfig { name: "users".to_string(), depends_on: vec![], transformers: vec![id_transformer("user", "user_id")] },
    )]);
    let config = engine_config(input.path(), output.path(), None, refs.path(), DeidConfig::default(), tables);
    let engine = Engine::new(config).unwrap();
    let cancellation = CancellationToken::new();
    cancellation.cancel();
    let report = engine.run(RunOptions::default(), &cancellation).unwrap();

    assert_eq!(report.results["users"].status, cleared::engine::PipelineStatus::Skipped);
    assert!(!output.path().join("users.csv").exists());
}

/// S7 — lint catches a bad config: a min>max time-shift range, a DateTime
/// transformer with no resolvable time_shift, and a table depending on a
/// table that doesn't exist. `disable-line` suppresses each when present.
#[test]
fn s7_lint_catches_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.yaml");
    let source = r#"
name: "broken_engine"
deid_config:
  time_shift: null
io:
  data:
    input_config: {io_type: filesystem, configs: {base_path: "/tmp/in"}}
    output_config: {io_type: filesystem, configs: {base_path: "/tmp/out"}}
  deid_ref:
    input_config: null
    output_config: {io_type: filesystem, configs: {base_path: "/tmp/ref"}}
  runtime_io_path: "/tmp/runtime"
tables:
  visits:
    name: visits
    depends_on:
      - non_existent_table
    transformers:
      - method: date_time
        uid: visit_shift
        configs:
          idconfig: {name: patient_id, uid: patient}
          datetime_column: visit_at
      - method: date_time
        uid: billing_shift
        configs:
          idconfig: {name: patient_id, uid: patient}
          datetime_column: billed_at
          global_time_shift: {method: shift_by_years, min: 30, max: -30}
"#;
    fs::write(&config_path, source).unwrap();
    let config = load_config(&config_path).unwrap();
    let issues = lint(&config, source);

    assert!(issues.iter().any(|i| i.rule_id == "timeshift-range" && i.severity == cleared::lint::Severity::Error));
    assert!(issues.iter().any(|i| i.rule_id == "datetime-timeshift-defined"));
    assert!(issues.iter().any(|i| i.rule_id == "valid-table-dependencies"));

    let suppressed_source = source
        .replace(
            "      - non_existent_table",
            "      - non_existent_table  # disable-line rule:valid-table-dependencies",
        )
        .replace(
            "        uid: visit_shift",
            "        uid: visit_shift  # disable-line rule:datetime-timeshift-defined",
        )
        .replace(
            "        uid: billing_shift",
            "        uid: billing_shift  # disable-line rule:timeshift-range",
        );
    let suppressed_config_path = dir.path().join("suppressed.yaml");
    fs::write(&suppressed_config_path, &suppressed_source).unwrap();
    let suppressed_config = load_config(&suppressed_config_path).unwrap();
    let suppressed_issues = lint(&suppressed_config, &suppressed_source);

    assert!(!suppressed_issues.iter().any(|i| i.rule_id == "valid-table-dependencies"));
    assert!(!suppressed_issues.iter().any(|i| i.rule_id == "timeshift-range"));
}
