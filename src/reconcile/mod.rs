// src/reconcile/mod.rs
pub mod cache;
pub mod join;
pub mod score;

use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

use crate::config::{EngineConfig, Sentinels};
use crate::error::{EngineError, Result};
use crate::ingest::{RawTable, Scalar};
use crate::process::{coerce_keys, find_column, melt, require_column, value_columns, CoercionReport};

pub use cache::{fingerprint, ReconcileCache};
pub use join::{join_records, JoinStats};
pub use score::{is_correct, normalize_answer, score_records};

/// One student's answer to one question (long form).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseRecord {
    pub institution: String,
    pub booklet: i64,
    pub cohort_flag: String,
    pub question: i64,
    pub response: String,
}

/// The official answer of one question in one booklet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyRecord {
    pub booklet: i64,
    pub question: i64,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaxonomyRecord {
    pub booklet: i64,
    pub question: i64,
    pub area: String,
    pub subspecialty: String,
    pub diagnosis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledRecord {
    pub institution: String,
    pub booklet: i64,
    pub cohort_flag: String,
    pub question: i64,
    pub response: String,
    pub answer: String,
    pub area: String,
    pub subspecialty: String,
    pub diagnosis: String,
    pub is_correct: bool,
}

/// Headers the column detection settled on.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseLayout {
    pub institution: String,
    pub booklet: String,
    pub cohort_flag: String,
    pub question_columns: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnswerKeyLayout {
    pub booklet: String,
    pub question_columns: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaxonomyLayout {
    pub booklet: String,
    pub question: String,
    pub area: String,
    pub subspecialty: String,
    pub diagnosis: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputLayout {
    pub responses: ResponseLayout,
    pub answer_key: AnswerKeyLayout,
    pub taxonomy: TaxonomyLayout,
}

/// Data-quality counters of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub response_rows: CoercionReport,
    pub answer_key_rows: CoercionReport,
    pub taxonomy_rows: CoercionReport,
    pub response_records: usize,
    pub key_records: usize,
    /// Answer-key cells left blank; their questions stay keyed and score 0.
    pub blank_answers: usize,
    pub taxonomy_records: usize,
    pub join: JoinStats,
    /// Records credited because their question was annulled.
    pub annulled_records: usize,
    pub reconciled_records: usize,
}

/// The scored, taxonomy-tagged record set plus what the gap engine needs
/// besides it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub records: Vec<ReconciledRecord>,
    /// Normalized taxonomy rows, used for bucket question weights.
    pub taxonomy: Vec<TaxonomyRecord>,
    pub layout: InputLayout,
    pub report: ReconcileReport,
}

impl Reconciled {
    /// Distinct institutions, sorted.
    pub fn institutions(&self) -> Vec<String> {
        let set: BTreeSet<&str> = self.records.iter().map(|r| r.institution.as_str()).collect();
        set.into_iter().map(str::to_string).collect()
    }

    /// Distinct booklets, sorted.
    pub fn booklets(&self) -> Vec<i64> {
        let set: BTreeSet<i64> = self.records.iter().map(|r| r.booklet).collect();
        set.into_iter().collect()
    }
}

fn cell_text(cell: &Scalar) -> String {
    cell.as_text().trim().to_string()
}

fn taxonomy_label(cell: Option<&Scalar>, sentinel: &str) -> String {
    let text = cell.map(|c| c.as_text().trim().to_uppercase()).unwrap_or_default();
    if text.is_empty() {
        sentinel.to_string()
    } else {
        text
    }
}

/// Integer value of a key cell after `coerce_keys`.
fn key_int(table: &RawTable, column: usize, cell: &Scalar) -> Result<i64> {
    match cell {
        Scalar::Int(i) => Ok(*i),
        other => Err(EngineError::schema(
            &table.name,
            format!(
                "key column `{}` holds non-integer value `{}`",
                table.headers[column],
                other.as_text()
            ),
        )),
    }
}

/// Melt the per-student wide table into response records.
pub fn extract_responses(
    table: &RawTable,
    config: &EngineConfig,
) -> Result<(Vec<ResponseRecord>, ResponseLayout, CoercionReport)> {
    let cols = &config.columns;
    let inst = require_column(table, "institution", &cols.institution)?;
    let booklet = require_column(table, "booklet", &cols.booklet)?;
    let cohort = require_column(table, "cohort_flag", &cols.cohort_flag)?;
    let values = value_columns(table, &cols.response_pattern)?;

    let layout = ResponseLayout {
        institution: table.headers[inst].clone(),
        booklet: table.headers[booklet].clone(),
        cohort_flag: table.headers[cohort].clone(),
        question_columns: values.len(),
    };

    let (table, coercion) = coerce_keys(table.clone(), &[layout.booklet.as_str()])?;
    let records = melt(&table, &[inst, booklet, cohort], &values)?
        .into_iter()
        .map(|l| {
            Ok(ResponseRecord {
                institution: cell_text(l.ids[0]),
                booklet: key_int(&table, booklet, l.ids[1])?,
                cohort_flag: cell_text(l.ids[2]),
                question: l.question,
                response: l.value.as_text(),
            })
        })
        .collect::<Result<Vec<ResponseRecord>>>()?;
    Ok((records, layout, coercion))
}

/// Melt the per-booklet answer key, one record per cell. Blank cells keep
/// an empty answer, which no response matches; their count is returned
/// alongside.
pub fn extract_answer_key(
    table: &RawTable,
    config: &EngineConfig,
) -> Result<(Vec<KeyRecord>, AnswerKeyLayout, CoercionReport, usize)> {
    let cols = &config.columns;
    let booklet = require_column(table, "booklet", &cols.booklet)?;
    let values = value_columns(table, &cols.answer_pattern)?;
    let layout = AnswerKeyLayout {
        booklet: table.headers[booklet].clone(),
        question_columns: values.len(),
    };

    let (table, coercion) = coerce_keys(table.clone(), &[layout.booklet.as_str()])?;
    let mut blank = 0;
    let mut records = Vec::new();
    for l in melt(&table, &[booklet], &values)? {
        if l.value.is_empty() {
            blank += 1;
        }
        records.push(KeyRecord {
            booklet: key_int(&table, booklet, l.ids[0])?,
            question: l.question,
            answer: l.value.as_text().trim().to_string(),
        });
    }
    Ok((records, layout, coercion, blank))
}

/// Normalize the question-to-taxonomy map.
pub fn extract_taxonomy(
    table: &RawTable,
    config: &EngineConfig,
) -> Result<(Vec<TaxonomyRecord>, TaxonomyLayout, CoercionReport)> {
    let cols = &config.columns;
    let booklet = require_column(table, "booklet", &cols.booklet)?;
    let question = require_column(table, "question", &cols.question)?;
    let area = require_column(table, "area", &cols.area)?;
    let sub = require_column(table, "subspecialty", &cols.subspecialty)?;
    let diag = find_column(table, "diagnosis", &cols.diagnosis)?;
    let layout = TaxonomyLayout {
        booklet: table.headers[booklet].clone(),
        question: table.headers[question].clone(),
        area: table.headers[area].clone(),
        subspecialty: table.headers[sub].clone(),
        diagnosis: diag.map(|d| table.headers[d].clone()),
    };

    let (table, coercion) = coerce_keys(
        table.clone(),
        &[layout.booklet.as_str(), layout.question.as_str()],
    )?;
    let Sentinels {
        area: area_fill,
        subspecialty: sub_fill,
        diagnosis: diag_fill,
    } = &config.sentinels;
    let records = table
        .rows
        .iter()
        .map(|row| {
            Ok(TaxonomyRecord {
                booklet: key_int(&table, booklet, &row[booklet])?,
                question: key_int(&table, question, &row[question])?,
                area: taxonomy_label(Some(&row[area]), area_fill),
                subspecialty: taxonomy_label(Some(&row[sub]), sub_fill),
                diagnosis: taxonomy_label(diag.map(|d| &row[d]), diag_fill),
            })
        })
        .collect::<Result<Vec<TaxonomyRecord>>>()?;
    Ok((records, layout, coercion))
}

/// Reconcile the three normalized inputs into scored records.
///
/// Responses are inner-joined to the answer key on (booklet, question) and
/// left-joined to the taxonomy; duplicate key or taxonomy rows resolve to
/// their first occurrence.
#[tracing::instrument(level = "info", skip_all, fields(responses = %responses.name, answer_key = %answer_key.name, taxonomy = %taxonomy.name))]
pub fn reconcile(
    responses: &RawTable,
    answer_key: &RawTable,
    taxonomy: &RawTable,
    config: &EngineConfig,
) -> Result<Reconciled> {
    let (response_records, resp_layout, response_rows) = extract_responses(responses, config)?;
    let (key_records, key_layout, answer_key_rows, blank_answers) =
        extract_answer_key(answer_key, config)?;
    let (taxonomy_records, tax_layout, taxonomy_rows) = extract_taxonomy(taxonomy, config)?;

    let response_count = response_records.len();
    let (mut records, join) = join_records(
        response_records,
        &key_records,
        &taxonomy_records,
        &config.sentinels,
    );
    let annulled_records = score_records(&mut records, &config.annulled_token);

    let report = ReconcileReport {
        response_rows,
        answer_key_rows,
        taxonomy_rows,
        response_records: response_count,
        key_records: key_records.len(),
        blank_answers,
        taxonomy_records: taxonomy_records.len(),
        join,
        annulled_records,
        reconciled_records: records.len(),
    };

    if report.join.unkeyed_responses > 0 {
        warn!(
            unkeyed = report.join.unkeyed_responses,
            "responses without an answer-key entry were dropped"
        );
    }
    if report.join.unmapped_records > 0 {
        warn!(
            unmapped = report.join.unmapped_records,
            sentinel = %config.sentinels.area,
            "records without a taxonomy entry"
        );
    }
    if report.blank_answers > 0 {
        warn!(blank = report.blank_answers, "answer-key cells left blank");
    }
    info!(
        responses = report.response_records,
        keys = report.key_records,
        taxonomy = report.taxonomy_records,
        reconciled = report.reconciled_records,
        annulled = report.annulled_records,
        "reconciled"
    );

    Ok(Reconciled {
        records,
        taxonomy: taxonomy_records,
        layout: InputLayout {
            responses: resp_layout,
            answer_key: key_layout,
            taxonomy: tax_layout,
        },
        report,
    })
}
