use arrow::{
    array::{Array, ArrayRef, AsArray},
    compute::cast,
    datatypes::{DataType, Float64Type, Int64Type},
    record_batch::RecordBatch,
};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::{RawTable, Scalar};
use crate::error::{EngineError, Result};

/// Convert one arrow column into scalar cells, widening integers to i64 and
/// floats to f64; every other type is rendered as text.
fn column_to_scalars(name: &str, col: &ArrayRef) -> Result<Vec<Scalar>> {
    let fail = |e: arrow::error::ArrowError| EngineError::format(name, e);
    let len = col.len();
    let mut out = Vec::with_capacity(len);

    match col.data_type() {
        dt if dt.is_integer() => {
            let ints = cast(col, &DataType::Int64).map_err(fail)?;
            let ints = ints.as_primitive::<Int64Type>();
            for i in 0..len {
                out.push(if ints.is_null(i) {
                    Scalar::Empty
                } else {
                    Scalar::Int(ints.value(i))
                });
            }
        }
        dt if dt.is_floating() || matches!(dt, DataType::Decimal128(_, _) | DataType::Decimal256(_, _)) => {
            let floats = cast(col, &DataType::Float64).map_err(fail)?;
            let floats = floats.as_primitive::<Float64Type>();
            for i in 0..len {
                out.push(if floats.is_null(i) {
                    Scalar::Empty
                } else {
                    Scalar::Float(floats.value(i))
                });
            }
        }
        _ => {
            let strings = cast(col, &DataType::Utf8).map_err(fail)?;
            let strings = strings.as_string::<i32>();
            for i in 0..len {
                out.push(if strings.is_null(i) {
                    Scalar::Empty
                } else {
                    Scalar::text(strings.value(i))
                });
            }
        }
    }
    Ok(out)
}

fn append_batch(name: &str, batch: &RecordBatch, rows: &mut Vec<Vec<Scalar>>) -> Result<()> {
    let columns = batch
        .columns()
        .iter()
        .map(|c| column_to_scalars(name, c))
        .collect::<Result<Vec<_>>>()?;
    for r in 0..batch.num_rows() {
        rows.push(columns.iter().map(|c| c[r].clone()).collect());
    }
    Ok(())
}

/// Read an in-memory Parquet file.
pub fn read_parquet(name: &str, data: &[u8]) -> Result<RawTable> {
    let buf = bytes::Bytes::copy_from_slice(data);
    let builder = ParquetRecordBatchReaderBuilder::try_new(buf)
        .map_err(|e| EngineError::format(name, format!("invalid parquet: {}", e)))?;
    let headers: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder
        .build()
        .map_err(|e| EngineError::format(name, e))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| EngineError::format(name, e))?;
        append_batch(name, &batch, &mut rows)?;
    }

    RawTable::from_raw(name, headers, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use arrow::array::{Float64Array, Int32Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;

    #[test]
    fn reads_typed_parquet_columns() -> Result<()> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("co_caderno", DataType::Int32, true),
            Field::new("nu_questao", DataType::Float64, true),
            Field::new("grande_area", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int32Array::from(vec![Some(1), None])),
                Arc::new(Float64Array::from(vec![Some(3.0), None])),
                Arc::new(StringArray::from(vec![Some("Clinica"), None])),
            ],
        )?;
        let mut buf = Vec::new();
        {
            let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
            writer.write(&batch)?;
            writer.close()?;
        }

        let t = read_parquet("mapa.parquet", &buf)?;
        assert_eq!(t.headers, vec!["CO_CADERNO", "NU_QUESTAO", "GRANDE_AREA"]);
        // second row is null everywhere and gets dropped
        assert_eq!(t.len(), 1);
        assert_eq!(
            t.rows[0],
            vec![
                Scalar::Int(1),
                Scalar::Float(3.0),
                Scalar::Text("Clinica".into())
            ]
        );
        Ok(())
    }

    #[test]
    fn rejects_non_parquet_bytes() {
        let err = read_parquet("x.parquet", b"PAR?").unwrap_err();
        assert!(matches!(err, EngineError::Format { .. }));
    }
}
