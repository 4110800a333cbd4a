use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::ingest::{RawTable, Scalar};

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("static regex"));

/// The first maximal run of ASCII digits in a column label.
pub fn question_number(label: &str) -> Option<i64> {
    DIGIT_RUN.find(label)?.as_str().parse().ok()
}

/// One (source row, value column) cell of a wide table.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRow<'a> {
    /// Position of the source row in the wide table.
    pub row: usize,
    /// Identifier cells, in the order the identifier columns were given.
    pub ids: Vec<&'a Scalar>,
    pub question: i64,
    pub value: &'a Scalar,
}

/// Decode the question index of every value column.
///
/// A label without digits, or two labels yielding the same question, is a
/// `SchemaError`: the value-column pattern is not specific enough.
pub fn question_columns(table: &RawTable, value_columns: &[usize]) -> Result<Vec<(usize, i64)>> {
    let mut seen: HashMap<i64, usize> = HashMap::with_capacity(value_columns.len());
    let mut out = Vec::with_capacity(value_columns.len());
    for &col in value_columns {
        let label = &table.headers[col];
        let q = question_number(label).ok_or_else(|| {
            EngineError::schema(
                &table.name,
                format!("value column `{}` carries no question number", label),
            )
        })?;
        if let Some(prev) = seen.insert(q, col) {
            return Err(EngineError::schema(
                &table.name,
                format!(
                    "columns `{}` and `{}` both map to question {}",
                    table.headers[prev], label, q
                ),
            ));
        }
        out.push((col, q));
    }
    Ok(out)
}

/// Wide-to-long melt. Output order: source rows in order, and within a row
/// the value columns in the order given.
pub fn melt<'a>(
    table: &'a RawTable,
    id_columns: &[usize],
    value_columns: &[usize],
) -> Result<Vec<LongRow<'a>>> {
    let questions = question_columns(table, value_columns)?;
    let mut out = Vec::with_capacity(table.rows.len() * questions.len());
    for (r, row) in table.rows.iter().enumerate() {
        for &(col, question) in &questions {
            out.push(LongRow {
                row: r,
                ids: id_columns.iter().map(|&i| &row[i]).collect(),
                question,
                value: &row[col],
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn wide() -> Result<RawTable> {
        Ok(RawTable::from_raw(
            "alunos.csv",
            vec![
                "NO_IES".into(),
                "CO_CADERNO".into(),
                "DS_VT_ESC_OBJ10".into(),
                "DS_VT_ESC_OBJ2".into(),
            ],
            vec![
                vec![Scalar::text("A"), Scalar::Int(1), Scalar::text("B"), Scalar::text("C")],
                vec![Scalar::text("B"), Scalar::Int(2), Scalar::Empty, Scalar::text("D")],
            ],
        )?)
    }

    #[test]
    fn digit_run_extraction() {
        assert_eq!(question_number("DS_VT_ESC_OBJ12"), Some(12));
        assert_eq!(question_number("Q07_V2"), Some(7));
        assert_eq!(question_number("DS_VT_ESC_OBJ"), None);
    }

    #[test]
    fn melt_preserves_row_then_column_order() -> Result<()> {
        let t = wide()?;
        let long = melt(&t, &[0, 1], &[2, 3])?;
        let shape: Vec<(usize, i64, String)> = long
            .iter()
            .map(|l| (l.row, l.question, l.value.as_text()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (0, 10, "B".to_string()),
                (0, 2, "C".to_string()),
                (1, 10, String::new()),
                (1, 2, "D".to_string()),
            ]
        );
        assert_eq!(long[2].ids, vec![&Scalar::text("B"), &Scalar::Int(2)]);
        Ok(())
    }

    #[test]
    fn label_without_digits_is_schema_error() -> Result<()> {
        let mut t = wide()?;
        t.headers[3] = "DS_VT_ESC_OBJ_X".into();
        let err = melt(&t, &[0], &[2, 3]).unwrap_err();
        assert_eq!(err.stage(), "schema");
        Ok(())
    }

    #[test]
    fn duplicate_question_labels_are_schema_error() -> Result<()> {
        let mut t = wide()?;
        t.headers[3] = "DS_VT_ESC_OBJ010".into();
        assert!(melt(&t, &[0], &[2, 3]).is_err());
        Ok(())
    }
}
