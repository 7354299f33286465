//! Filesystem table store (spec §6).
//!
//! A table is either `<base>/<name>.<fmt>` (single-segment) or
//! `<base>/<name>/` (multi-segment: every file inside is one segment,
//! format inferred from each segment's own extension). The single-file form
//! takes precedence when both exist. `csv` and `json` are fully
//! implemented; `parquet`, `xlsx`, `xls`, and `pickle` are accepted as
//! configuration values but produce a `FileFormatError` on actual I/O —
//! no reader/writer is wired in for those formats.
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;

use super::{Segment, TableShape, TableStore};
use crate::error::DeidError;
use crate::frame::{Frame, Value};
use crate::model::IoConfig;

pub struct FilesystemStore {
    base_path: PathBuf,
    default_format: String,
    delimiter: u8,
}

impl FilesystemStore {
    pub fn new(io: &IoConfig) -> Result<FilesystemStore, DeidError> {
        let base_path = io
            .base_path()
            .ok_or_else(|| DeidError::ConfigLoad("filesystem io config missing 'base_path'".into()))?;
        Ok(FilesystemStore {
            base_path: PathBuf::from(base_path),
            default_format: io.file_format().to_string(),
            delimiter: io.delimiter(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn single_file_path(&self, table: &str) -> Option<PathBuf> {
        for fmt in known_formats() {
            let candidate = self.base_path.join(format!("{table}.{fmt}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        let candidate = self.base_path.join(format!("{table}.{}", self.default_format));
        candidate.is_file().then_some(candidate)
    }

    fn segment_dir(&self, table: &str) -> Option<PathBuf> {
        let dir = self.base_path.join(table);
        dir.is_dir().then_some(dir)
    }
}

fn known_formats() -> &'static [&'static str] {
    &["csv", "json", "parquet", "xlsx", "xls", "pickle"]
}

impl TableStore for FilesystemStore {
    fn read_table(&self, table: &str) -> Result<(TableShape, Vec<Segment>), DeidError> {
        if let Some(path) = self.single_file_path(table) {
            let frame = read_segment(&path, self.delimiter)?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| DeidError::FileFormatError(format!("non-UTF8 file name: {}", path.display())))?
                .to_string();
            return Ok((TableShape::SingleFile, vec![Segment { name, frame }]));
        }
        if let Some(dir) = self.segment_dir(table) {
            let mut entries: Vec<PathBuf> = fs::read_dir(&dir)
                .map_err(|e| DeidError::StoreUnavailable(format!("cannot read '{}': {e}", dir.display())))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            entries.sort();
            let mut segments = Vec::with_capacity(entries.len());
            for path in entries {
                let frame = read_segment(&path, self.delimiter)?;
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .ok_or_else(|| DeidError::FileFormatError(format!("non-UTF8 file name: {}", path.display())))?
                    .to_string();
                segments.push(Segment { name, frame });
            }
            return Ok((TableShape::MultiSegment, segments));
        }
        Err(DeidError::TableNotFound(format!(
            "no '{table}.<fmt>' file or '{table}/' directory under '{}'",
            self.base_path.display()
        )))
    }

    fn write_table(&self, table: &str, shape: &TableShape, segments: &[Segment]) -> Result<(), DeidError> {
        match shape {
            TableShape::SingleFile => {
                let segment = segments.first().ok_or_else(|| {
                    DeidError::WriteError(format!("table '{table}' has no segment to write"))
                })?;
                fs::create_dir_all(&self.base_path)
                    .map_err(|e| DeidError::WriteError(format!("cannot create '{}': {e}", self.base_path.display())))?;
                let path = self.base_path.join(&segment.name);
                write_segment(&path, &segment.frame, self.delimiter)
            }
            TableShape::MultiSegment => {
                let dir = self.base_path.join(table);
                fs::create_dir_all(&dir)
                    .map_err(|e| DeidError::WriteError(format!("cannot create '{}': {e}", dir.display())))?;
                for segment in segments {
                    let path = dir.join(&segment.name);
                    write_segment(&path, &segment.frame, self.delimiter)?;
                }
                Ok(())
            }
        }
    }
}

fn format_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("csv")
        .to_lowercase()
}

fn read_segment(path: &Path, delimiter: u8) -> Result<Frame, DeidError> {
    match format_of(path).as_str() {
        "csv" => read_csv(path, delimiter),
        "json" => read_json(path),
        other => Err(DeidError::FileFormatError(format!(
            "format '{other}' is not implemented (file: {})",
            path.display()
        ))),
    }
}

fn write_segment(path: &Path, frame: &Frame, delimiter: u8) -> Result<(), DeidError> {
    match format_of(path).as_str() {
        "csv" => write_csv(path, frame, delimiter),
        "json" => write_json(path, frame),
        other => Err(DeidError::FileFormatError(format!(
            "format '{other}' is not implemented (file: {})",
            path.display()
        ))),
    }
}

fn read_csv(path: &Path, delimiter: u8) -> Result<Frame, DeidError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| DeidError::FileFormatError(format!("cannot open '{}': {e}", path.display())))?;
    let headers = reader
        .headers()
        .map_err(|e| DeidError::FileFormatError(format!("bad header in '{}': {e}", path.display())))?
        .clone();
    let columns: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    let mut frame = Frame::new(columns.clone());
    for record in reader.records() {
        let record = record.map_err(|e| DeidError::FileFormatError(format!("bad row in '{}': {e}", path.display())))?;
        if record.len() != columns.len() {
            return Err(DeidError::FileFormatError(format!(
                "'{}': row has {} fields, header has {}",
                path.display(),
                record.len(),
                columns.len()
            )));
        }
        frame.rows.push(record.iter().map(Value::infer_from_str).collect());
    }
    Ok(frame)
}

fn write_csv(path: &Path, frame: &Frame, delimiter: u8) -> Result<(), DeidError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_path(path)
        .map_err(|e| DeidError::WriteError(format!("cannot open '{}' for write: {e}", path.display())))?;
    writer
        .write_record(&frame.columns)
        .map_err(|e| DeidError::WriteError(format!("header write error on '{}': {e}", path.display())))?;
    for row in &frame.rows {
        let record: Vec<String> = row.iter().map(|v| v.display()).collect();
        writer
            .write_record(&record)
            .map_err(|e| DeidError::WriteError(format!("write error on '{}': {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| DeidError::WriteError(format!("flush error on '{}': {e}", path.display())))
}

fn read_json(path: &Path) -> Result<Frame, DeidError> {
    let content = fs::read_to_string(path)
        .map_err(|e| DeidError::FileFormatError(format!("cannot read '{}': {e}", path.display())))?;
    let rows: Vec<JsonValue> = serde_json::from_str(&content)
        .map_err(|e| DeidError::FileFormatError(format!("malformed JSON in '{}': {e}", path.display())))?;
    let mut columns: Vec<String> = Vec::new();
    for row in &rows {
        if let JsonValue::Object(map) = row {
            for key in map.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        } else {
            return Err(DeidError::FileFormatError(format!(
                "'{}': expected an array of objects",
                path.display()
            )));
        }
    }
    let mut frame = Frame::new(columns.clone());
    for row in rows {
        let map = match row {
            JsonValue::Object(m) => m,
            _ => unreachable!(),
        };
        let mut cells = Vec::with_capacity(columns.len());
        for col in &columns {
            cells.push(json_to_value(map.get(col).unwrap_or(&JsonValue::Null)));
        }
        frame.rows.push(cells);
    }
    Ok(frame)
}

fn write_json(path: &Path, frame: &Frame) -> Result<(), DeidError> {
    let mut rows = Vec::with_capacity(frame.rows.len());
    for row in &frame.rows {
        let mut map = serde_json::Map::new();
        for (col, v) in frame.columns.iter().zip(row.iter()) {
            map.insert(col.clone(), value_to_json(v));
        }
        rows.push(JsonValue::Object(map));
    }
    let content = serde_json::to_string_pretty(&rows)
        .map_err(|e| DeidError::WriteError(format!("cannot serialize '{}': {e}", path.display())))?;
    fs::write(path, content).map_err(|e| DeidError::WriteError(format!("cannot write '{}': {e}", path.display())))
}

fn json_to_value(v: &JsonValue) -> Value {
    match v {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => match Value::infer_from_str(s) {
            dt @ Value::DateTime(_) => dt,
            _ => Value::Str(s.clone()),
        },
        other => Value::Str(other.to_string()),
    }
}

fn value_to_json(v: &Value) -> JsonValue {
    match v {
        Value::Null => JsonValue::Null,
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::DateTime(dt) => JsonValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IoType;
    use std::collections::BTreeMap;

    fn io_config(base: &Path, fmt: &str) -> IoConfig {
        let mut configs = BTreeMap::new();
        configs.insert("base_path".to_string(), serde_yaml::Value::String(base.to_string_lossy().to_string()));
        configs.insert("file_format".to_string(), serde_yaml::Value::String(fmt.to_string()));
        IoConfig { io_type: IoType::Filesystem, configs }
    }

    #[test]
    fn round_trips_single_segment_csv() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("users.csv"),
            "user_id,name\n101,alice\n202,bob\n",
        )
        .unwrap();
        let store = FilesystemStore::new(&io_config(dir.path(), "csv")).unwrap();
        let (shape, segments) = store.read_table("users").unwrap();
        assert_eq!(shape, TableShape::SingleFile);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].frame.rows.len(), 2);

        let out_dir = tempfile::tempdir().unwrap();
        let out_store = FilesystemStore::new(&io_config(out_dir.path(), "csv")).unwrap();
        out_store.write_table("users", &shape, &segments).unwrap();
        assert!(out_dir.path().join("users.csv").exists());
    }

    #[test]
    fn multi_segment_preserves_filenames() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("users")).unwrap();
        fs::write(dir.path().join("users/segment1.csv"), "user_id\n1\n2\n").unwrap();
        fs::write(dir.path().join("users/segment2.csv"), "user_id\n3\n").unwrap();
        let store = FilesystemStore::new(&io_config(dir.path(), "csv")).unwrap();
        let (shape, segments) = store.read_table("users").unwrap();
        assert_eq!(shape, TableShape::MultiSegment);
        let names: Vec<&str> = segments.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["segment1.csv", "segment2.csv"]);
        assert_eq!(segments[0].frame.rows.len() + segments[1].frame.rows.len(), 3);
    }

    #[test]
    fn single_file_takes_precedence_over_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("users.csv"), "user_id\n1\n").unwrap();
        fs::create_dir(dir.path().join("users")).unwrap();
        fs::write(dir.path().join("users/seg.csv"), "user_id\n2\n3\n").unwrap();
        let store = FilesystemStore::new(&io_config(dir.path(), "csv")).unwrap();
        let (shape, segments) = store.read_table("users").unwrap();
        assert_eq!(shape, TableShape::SingleFile);
        assert_eq!(segments[0].frame.rows.len(), 1);
    }

    #[test]
    fn unsupported_format_is_a_file_format_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("users.parquet"), b"not really parquet").unwrap();
        let store = FilesystemStore::new(&io_config(dir.path(), "parquet")).unwrap();
        let err = store.read_table("users").unwrap_err();
        assert!(matches!(err, DeidError::FileFormatError(_)));
    }
}
