//! SQL table store: contract only (spec §1 "a SQL store backend is
//! out-of-scope for this implementation"; spec §6 still names the shape a
//! backend would need). `SqlStore` documents the binding an `io_type: sql`
//! configuration selects; every method returns `FileFormatError` since no
//! driver is wired in.

use super::{Segment, TableShape, TableStore};
use crate::error::DeidError;
use crate::model::IoConfig;

/// Placeholder for a SQL-backed [`TableStore`]. A real implementation would
/// hold a connection pool (e.g. via `sqlx` or `postgres`) keyed off
/// `configs["connection_string"]`/`configs["schema"]`; no SQL driver is
/// wired in, since spec.md scopes the SQL backend's implementation out.
pub struct SqlStore {
    connection_string: Option<String>,
}

impl SqlStore {
    pub fn new(io: &IoConfig) -> SqlStore {
        let connection_string = io
            .configs
            .get("connection_string")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        SqlStore { connection_string }
    }
}

impl TableStore for SqlStore {
    fn read_table(&self, table: &str) -> Result<(TableShape, Vec<Segment>), DeidError> {
        Err(DeidError::FileFormatError(format!(
            "sql store has no driver configured (table '{table}', connection {:?})",
            self.connection_string
        )))
    }

    fn write_table(&self, table: &str, _shape: &TableShape, _segments: &[Segment]) -> Result<(), DeidError> {
        Err(DeidError::FileFormatError(format!(
            "sql store has no driver configured (table '{table}', connection {:?})",
            self.connection_string
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IoType;
    use std::collections::BTreeMap;

    #[test]
    fn read_and_write_report_unimplemented() {
        let io = IoConfig { io_type: IoType::Sql, configs: BTreeMap::new() };
        let store = SqlStore::new(&io);
        assert!(store.read_table("patients").is_err());
        assert!(store.write_table("patients", &TableShape::SingleFile, &[]).is_err());
    }
}
