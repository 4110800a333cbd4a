// src/export/mod.rs
//! Output tables for collaborators: Parquet for the reconciled and gap
//! tables, CSV for the gap table and a JSON summary document.
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::gaps::{GapQuery, GapRecord, GapReport, Summary};
use crate::reconcile::{ReconcileReport, ReconciledRecord};

/// NaN means "no data" and is written as null.
fn nullable(v: f64) -> Option<f64> {
    if v.is_nan() {
        None
    } else {
        Some(v)
    }
}

fn write_parquet(path: &Path, schema: SchemaRef, columns: Vec<ArrayRef>) -> Result<usize> {
    let batch = RecordBatch::try_new(schema.clone(), columns)
        .map_err(|e| EngineError::export(path, format!("building record batch: {}", e)))?;
    let file = File::create(path).map_err(|e| EngineError::export(path, e))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))
        .map_err(|e| EngineError::export(path, format!("creating Arrow writer: {}", e)))?;
    writer
        .write(&batch)
        .map_err(|e| EngineError::export(path, format!("writing batch: {}", e)))?;
    writer
        .close()
        .map_err(|e| EngineError::export(path, format!("closing writer: {}", e)))?;
    Ok(batch.num_rows())
}

/// One row per scored record.
pub fn write_reconciled_parquet(records: &[ReconciledRecord], path: &Path) -> Result<usize> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("institution", DataType::Utf8, false),
        Field::new("booklet", DataType::Int64, false),
        Field::new("cohort_flag", DataType::Utf8, false),
        Field::new("question", DataType::Int64, false),
        Field::new("response", DataType::Utf8, false),
        Field::new("answer", DataType::Utf8, false),
        Field::new("area", DataType::Utf8, false),
        Field::new("subspecialty", DataType::Utf8, false),
        Field::new("diagnosis", DataType::Utf8, false),
        Field::new("is_correct", DataType::Boolean, false),
    ]));

    let text = |f: fn(&ReconciledRecord) -> &str| -> ArrayRef {
        Arc::new(StringArray::from_iter_values(records.iter().map(f)))
    };
    let columns: Vec<ArrayRef> = vec![
        text(|r| r.institution.as_str()),
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.booklet))),
        text(|r| r.cohort_flag.as_str()),
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.question))),
        text(|r| r.response.as_str()),
        text(|r| r.answer.as_str()),
        text(|r| r.area.as_str()),
        text(|r| r.subspecialty.as_str()),
        text(|r| r.diagnosis.as_str()),
        Arc::new(BooleanArray::from(
            records.iter().map(|r| r.is_correct).collect::<Vec<bool>>(),
        )),
    ];

    let rows = write_parquet(path, schema, columns)?;
    info!(rows, path = %path.display(), "wrote reconciled records");
    Ok(rows)
}

fn bucket_headers(report: &GapReport) -> Vec<&'static str> {
    report.query.group_by.iter().map(|l| l.label()).collect()
}

/// The ranked gap table, one Utf8 column per grouping level.
pub fn write_gaps_parquet(report: &GapReport, path: &Path) -> Result<usize> {
    let levels = bucket_headers(report);
    let mut fields: Vec<Field> = levels
        .iter()
        .map(|l| Field::new(*l, DataType::Utf8, false))
        .collect();
    fields.extend([
        Field::new("institution_rate", DataType::Float64, true),
        Field::new("comparison_rate", DataType::Float64, true),
        Field::new("gap_pp", DataType::Float64, true),
        Field::new("question_count", DataType::UInt64, false),
        Field::new("institution_records", DataType::UInt64, false),
        Field::new("comparison_records", DataType::UInt64, false),
    ]);

    let gaps = &report.gaps;
    let mut columns: Vec<ArrayRef> = (0..levels.len())
        .map(|i| {
            Arc::new(StringArray::from_iter_values(
                gaps.iter().map(|g| g.bucket[i].as_str()),
            )) as ArrayRef
        })
        .collect();
    let rate = |f: fn(&GapRecord) -> f64| -> ArrayRef {
        Arc::new(gaps.iter().map(|g| nullable(f(g))).collect::<Float64Array>())
    };
    let count = |f: fn(&GapRecord) -> usize| -> ArrayRef {
        Arc::new(UInt64Array::from_iter_values(gaps.iter().map(|g| f(g) as u64)))
    };
    columns.extend([
        rate(|g| g.institution_rate),
        rate(|g| g.comparison_rate),
        rate(|g| g.gap_pp),
        count(|g| g.question_count),
        count(|g| g.institution_records),
        count(|g| g.comparison_records),
    ]);

    let rows = write_parquet(path, Arc::new(Schema::new(fields)), columns)?;
    info!(rows, path = %path.display(), "wrote gap table");
    Ok(rows)
}

fn csv_number(v: f64) -> String {
    nullable(v).map(|v| v.to_string()).unwrap_or_default()
}

/// The ranked gap table as CSV; null rates are empty cells.
pub fn write_gaps_csv(report: &GapReport, path: &Path) -> Result<usize> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| EngineError::export(path, e))?;

    let mut header: Vec<&str> = bucket_headers(report);
    header.extend([
        "institution_rate",
        "comparison_rate",
        "gap_pp",
        "question_count",
        "institution_records",
        "comparison_records",
    ]);
    wtr.write_record(&header)
        .map_err(|e| EngineError::export(path, e))?;

    for g in &report.gaps {
        let mut row: Vec<String> = g.bucket.clone();
        row.extend([
            csv_number(g.institution_rate),
            csv_number(g.comparison_rate),
            csv_number(g.gap_pp),
            g.question_count.to_string(),
            g.institution_records.to_string(),
            g.comparison_records.to_string(),
        ]);
        wtr.write_record(&row)
            .map_err(|e| EngineError::export(path, e))?;
    }
    wtr.flush().map_err(|e| EngineError::export(path, e))?;
    Ok(report.gaps.len())
}

/// Headline document: the query, overall rates, the critical gaps and the
/// data-quality counters of the reconciliation behind them.
#[derive(Debug, Serialize)]
pub struct SummaryDocument<'a> {
    pub generated_at: DateTime<Utc>,
    pub query: &'a GapQuery,
    pub summary: &'a Summary,
    pub critical: &'a [GapRecord],
    pub data_quality: &'a ReconcileReport,
}

pub fn write_summary_json(
    report: &GapReport,
    data_quality: &ReconcileReport,
    top_n: usize,
    path: &Path,
) -> Result<()> {
    let doc = SummaryDocument {
        generated_at: Utc::now(),
        query: &report.query,
        summary: &report.summary,
        critical: report.critical(top_n),
        data_quality,
    };
    let file = File::create(path).map_err(|e| EngineError::export(path, e))?;
    // serde_json writes non-finite floats as null
    serde_json::to_writer_pretty(BufWriter::new(file), &doc)
        .map_err(|e| EngineError::export(path, e))?;
    Ok(())
}

/// Files produced by [`export_report`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    pub reconciled: PathBuf,
    pub gaps_parquet: PathBuf,
    pub gaps_csv: PathBuf,
    pub summary: PathBuf,
}

/// File-name stem for an institution: alphanumerics kept, everything else `_`.
pub fn file_stem(institution: &str) -> String {
    let stem: String = institution
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "institution".to_string()
    } else {
        stem
    }
}

/// Write every output table for one gap report under `dir`.
pub fn export_report(
    records: &[ReconciledRecord],
    data_quality: &ReconcileReport,
    report: &GapReport,
    top_n: usize,
    dir: &Path,
) -> Result<ExportPaths> {
    fs::create_dir_all(dir).map_err(|e| EngineError::export(dir, e))?;
    let stem = file_stem(&report.query.institution);
    let paths = ExportPaths {
        reconciled: dir.join("reconciled.parquet"),
        gaps_parquet: dir.join(format!("gaps_{}.parquet", stem)),
        gaps_csv: dir.join(format!("gaps_{}.csv", stem)),
        summary: dir.join(format!("summary_{}.json", stem)),
    };
    write_reconciled_parquet(records, &paths.reconciled)?;
    write_gaps_parquet(report, &paths.gaps_parquet)?;
    write_gaps_csv(report, &paths.gaps_csv)?;
    write_summary_json(report, data_quality, top_n, &paths.summary)?;
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::gaps::{compute_gaps, GapQuery};
    use crate::reconcile::{fixtures, reconcile, Reconciled};
    use anyhow::Result;
    use arrow::array::Array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::tempdir;

    fn sample() -> Result<(Reconciled, GapReport)> {
        let (r, k, t) = fixtures::tables()?;
        let cfg = EngineConfig::default();
        let rec = reconcile(&r, &k, &t, &cfg)?;
        let report = compute_gaps(&rec, &GapQuery::new("IES A"), &cfg);
        Ok((rec, report))
    }

    fn read_back(path: &Path) -> Result<Vec<RecordBatch>> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
        Ok(reader.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    #[test]
    fn export_writes_all_tables() -> Result<()> {
        let (rec, report) = sample()?;
        let dir = tempdir()?;
        let paths = export_report(&rec.records, &rec.report, &report, 10, dir.path())?;

        let batches = read_back(&paths.reconciled)?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, rec.records.len());
        assert_eq!(batches[0].schema().field(9).name(), "is_correct");

        let batches = read_back(&paths.gaps_parquet)?;
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(rows, report.gaps.len());
        assert_eq!(batches[0].schema().field(0).name(), "GRANDE_AREA");

        let mut csv = csv::Reader::from_path(&paths.gaps_csv)?;
        assert_eq!(&csv.headers()?[2], "institution_rate");
        assert_eq!(csv.records().count(), report.gaps.len());

        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&paths.summary)?)?;
        assert!(json["generated_at"].is_string());
        assert_eq!(json["query"]["institution"], "IES A");
        assert_eq!(json["data_quality"]["blank_answers"], 1);
        Ok(())
    }

    #[test]
    fn nan_rates_are_written_as_null() -> Result<()> {
        let (_, mut report) = sample()?;
        report.gaps.truncate(1);
        report.gaps[0].institution_rate = f64::NAN;
        report.gaps[0].gap_pp = f64::NAN;
        report.summary.gap_pp = f64::NAN;
        let dir = tempdir()?;

        let pq = dir.path().join("gaps.parquet");
        write_gaps_parquet(&report, &pq)?;
        let batch = &read_back(&pq)?[0];
        let gap = batch
            .column_by_name("gap_pp")
            .expect("gap_pp column")
            .as_any()
            .downcast_ref::<Float64Array>()
            .expect("float column");
        assert!(gap.is_null(0));

        let csv_path = dir.path().join("gaps.csv");
        write_gaps_csv(&report, &csv_path)?;
        let mut csv = csv::Reader::from_path(&csv_path)?;
        let row = csv.records().next().expect("one row")?;
        assert_eq!(&row[4], "");

        let json_path = dir.path().join("summary.json");
        write_summary_json(&report, &ReconcileReport::default(), 5, &json_path)?;
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&json_path)?)?;
        assert!(json["summary"]["gap_pp"].is_null());
        assert!(json["critical"][0]["institution_rate"].is_null());
        Ok(())
    }

    #[test]
    fn institution_names_become_file_stems() {
        assert_eq!(file_stem("IES A"), "IES_A");
        assert_eq!(file_stem("Univ. São Paulo"), "Univ__São_Paulo");
        assert_eq!(file_stem("  "), "institution");
    }
}
