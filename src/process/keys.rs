use serde::Serialize;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::ingest::{RawTable, Scalar};

/// Rows removed by key coercion, per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoercionReport {
    pub table: String,
    pub kept_rows: usize,
    pub dropped_rows: usize,
}

/// Numeric parse + floor truncation; `None` for anything that is not a
/// finite number representable as `i64`.
pub fn coerce_key(value: &Scalar) -> Option<i64> {
    if let Scalar::Int(i) = value {
        return Some(*i);
    }
    let v = value.as_f64()?.floor();
    if v < i64::MIN as f64 || v >= i64::MAX as f64 {
        return None;
    }
    Some(v as i64)
}

/// Force the named key columns to integers, dropping every row where any of
/// them fails to coerce. Dropped rows are a data-quality condition, not an error.
pub fn coerce_keys(mut table: RawTable, key_columns: &[&str]) -> Result<(RawTable, CoercionReport)> {
    let indices = key_columns
        .iter()
        .map(|name| {
            table.column_index(name).ok_or_else(|| {
                EngineError::schema(&table.name, format!("key column `{}` not present", name))
            })
        })
        .collect::<Result<Vec<usize>>>()?;

    let before = table.rows.len();
    table.rows.retain_mut(|row| {
        let mut keys = Vec::with_capacity(indices.len());
        for &i in &indices {
            match coerce_key(&row[i]) {
                Some(k) => keys.push(k),
                None => return false,
            }
        }
        for (&i, k) in indices.iter().zip(keys) {
            row[i] = Scalar::Int(k);
        }
        true
    });

    let report = CoercionReport {
        table: table.name.clone(),
        kept_rows: table.rows.len(),
        dropped_rows: before - table.rows.len(),
    };
    if report.dropped_rows > 0 {
        warn!(
            table = %report.table,
            dropped = report.dropped_rows,
            keys = ?key_columns,
            "dropped rows with missing or non-numeric keys"
        );
    }
    Ok((table, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn floor_truncation_contract() {
        assert_eq!(coerce_key(&Scalar::Text("7".into())), Some(7));
        assert_eq!(coerce_key(&Scalar::Text(" 7.9 ".into())), Some(7));
        assert_eq!(coerce_key(&Scalar::Float(3.0)), Some(3));
        assert_eq!(coerce_key(&Scalar::Float(-1.5)), Some(-2));
        assert_eq!(coerce_key(&Scalar::Int(12)), Some(12));
        assert_eq!(coerce_key(&Scalar::Text("X".into())), None);
        assert_eq!(coerce_key(&Scalar::Empty), None);
        assert_eq!(coerce_key(&Scalar::Float(f64::NAN)), None);
        assert_eq!(coerce_key(&Scalar::Float(1e30)), None);
    }

    #[test]
    fn rows_with_any_bad_key_are_dropped() -> Result<()> {
        let table = RawTable::from_raw(
            "mapa.xlsx",
            vec!["CO_CADERNO".into(), "NU_QUESTAO".into(), "GRANDE_AREA".into()],
            vec![
                vec![Scalar::Float(1.0), Scalar::Text("3".into()), Scalar::text("CLINICA")],
                vec![Scalar::Empty, Scalar::Int(4), Scalar::text("PEDIATRIA")],
                vec![Scalar::Int(2), Scalar::text("n/a"), Scalar::text("CIRURGIA")],
            ],
        )?;
        let (table, report) = coerce_keys(table, &["CO_CADERNO", "NU_QUESTAO"])?;
        assert_eq!(report.dropped_rows, 2);
        assert_eq!(report.kept_rows, 1);
        assert_eq!(table.rows[0][0], Scalar::Int(1));
        assert_eq!(table.rows[0][1], Scalar::Int(3));
        Ok(())
    }

    #[test]
    fn unknown_key_column_is_schema_error() -> Result<()> {
        let table = RawTable::from_raw("t", vec!["A".into()], vec![])?;
        let err = coerce_keys(table, &["CO_CADERNO"]).unwrap_err();
        assert_eq!(err.stage(), "schema");
        Ok(())
    }
}
