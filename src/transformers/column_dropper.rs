//! Column dropper (spec §4.5): removes a column outright. Touches no
//! reference frames and cannot be reversed.

use super::ReverseOutcome;
use crate::error::DeidError;
use crate::frame::Frame;
use crate::model::Identifier;

pub struct ColumnDropperTransformer {
    pub identifier: Identifier,
}

impl ColumnDropperTransformer {
    pub fn forward(&self, frame: &Frame) -> Result<Frame, DeidError> {
        let mut out = frame.clone();
        out.drop_column(&self.identifier.name);
        Ok(out)
    }

    /// The column cannot be recovered; reverse emits the row set without it
    /// and records a warning so the verification report can mark it dropped.
    pub fn reverse(&self, frame: &Frame) -> Result<ReverseOutcome, DeidError> {
        Ok(ReverseOutcome {
            frame: frame.clone(),
            warnings: vec![format!("column '{}' was dropped and cannot be reversed", self.identifier.name)],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Value;

    #[test]
    fn forward_removes_the_column() {
        let t = ColumnDropperTransformer {
            identifier: Identifier {
                name: "ssn".into(),
                uid: "ssn".into(),
                description: None,
            },
        };
        let mut frame = Frame::new(vec!["ssn".into(), "age".into()]);
        frame.rows = vec![vec![Value::Str("123-45-6789".into()), Value::Int(30)]];
        let out = t.forward(&frame).unwrap();
        assert!(!out.has_column("ssn"));
        assert_eq!(out.rows[0], vec![Value::Int(30)]);
    }

    #[test]
    fn reverse_warns_column_is_unrecoverable() {
        let t = ColumnDropperTransformer {
            identifier: Identifier {
                name: "ssn".into(),
                uid: "ssn".into(),
                description: None,
            },
        };
        let frame = Frame::new(vec!["age".into()]);
        let out = t.reverse(&frame).unwrap();
        assert_eq!(out.warnings.len(), 1);
    }
}
