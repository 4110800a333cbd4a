// src/ingest/mod.rs
pub mod archive;
pub mod columnar;
pub mod delimited;
pub mod discover;
pub mod spreadsheet;
pub mod utils;

use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

use crate::error::{EngineError, Result};

pub use discover::{find_input, InputFiles};

/// A single raw cell as delivered by the source encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
}

impl Scalar {
    /// Wraps a text cell, mapping blank/whitespace-only text to `Empty`.
    pub fn text(raw: &str) -> Scalar {
        if raw.trim().is_empty() {
            Scalar::Empty
        } else {
            Scalar::Text(raw.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Scalar::Empty => true,
            Scalar::Text(s) => s.trim().is_empty(),
            Scalar::Float(f) => f.is_nan(),
            Scalar::Int(_) => false,
        }
    }

    /// String rendering used for responses, answers and labels.
    /// Integral floats render without a fractional part (`1.0` -> `1`).
    pub fn as_text(&self) -> String {
        match self {
            Scalar::Empty => String::new(),
            Scalar::Text(s) => s.clone(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) if f.is_nan() => String::new(),
            Scalar::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => (*f as i64).to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }

    /// Numeric view of the cell; `None` when the value does not parse.
    pub fn as_f64(&self) -> Option<f64> {
        let v = match self {
            Scalar::Empty => return None,
            Scalar::Int(i) => *i as f64,
            Scalar::Float(f) => *f,
            Scalar::Text(s) => utils::parse_number(s)?,
        };
        v.is_finite().then_some(v)
    }

    fn fingerprint_into(&self, hasher: &mut Sha256) {
        match self {
            Scalar::Empty => hasher.update([0u8]),
            Scalar::Text(s) => {
                hasher.update([1u8]);
                hasher.update((s.len() as u64).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Scalar::Int(i) => {
                hasher.update([2u8]);
                hasher.update(i.to_le_bytes());
            }
            Scalar::Float(f) => {
                hasher.update([3u8]);
                hasher.update(f.to_bits().to_le_bytes());
            }
        }
    }
}

/// A normalized table: canonical headers, rectangular rows, no fully-empty rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    /// Where the table came from (file name or caller-supplied label).
    pub name: String,
    /// Trimmed, upper-cased column names, unique.
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Scalar>>,
}

impl RawTable {
    /// Normalize a freshly parsed table.
    ///
    /// Headers are trimmed and upper-cased; blank headers become `UNNAMED: <i>`.
    /// Two headers that collide after normalization are a `SchemaError`.
    /// Rows shorter than the header are padded, longer rows are a `FormatError`,
    /// and rows that are empty in every column are removed.
    pub fn from_raw(
        name: impl Into<String>,
        raw_headers: Vec<String>,
        raw_rows: Vec<Vec<Scalar>>,
    ) -> Result<Self> {
        let name = name.into();
        let headers: Vec<String> = raw_headers
            .iter()
            .enumerate()
            .map(|(i, h)| canonical_header(h, i))
            .collect();

        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(headers.len());
        for (i, h) in headers.iter().enumerate() {
            if let Some(first) = seen.insert(h.as_str(), i) {
                return Err(EngineError::schema(
                    &name,
                    format!(
                        "columns {} and {} both normalize to `{}`",
                        first + 1,
                        i + 1,
                        h
                    ),
                ));
            }
        }

        let width = headers.len();
        let mut rows = Vec::with_capacity(raw_rows.len());
        let mut empty_rows = 0usize;
        for (idx, mut row) in raw_rows.into_iter().enumerate() {
            if row.len() > width {
                if row[width..].iter().all(Scalar::is_empty) {
                    row.truncate(width);
                } else {
                    return Err(EngineError::format(
                        &name,
                        format!(
                            "record {} has {} fields but the header has {}",
                            idx + 1,
                            row.len(),
                            width
                        ),
                    ));
                }
            }
            if row.iter().all(Scalar::is_empty) {
                empty_rows += 1;
                continue;
            }
            row.resize(width, Scalar::Empty);
            rows.push(row);
        }

        debug!(table = %name, rows = rows.len(), empty_rows, "normalized table");
        Ok(Self {
            name,
            headers,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn fingerprint_into(&self, hasher: &mut Sha256) {
        hasher.update((self.headers.len() as u64).to_le_bytes());
        for h in &self.headers {
            hasher.update((h.len() as u64).to_le_bytes());
            hasher.update(h.as_bytes());
        }
        hasher.update((self.rows.len() as u64).to_le_bytes());
        for row in &self.rows {
            for cell in row {
                cell.fingerprint_into(hasher);
            }
        }
    }
}

/// Trim + uppercase; blank labels get a positional name.
pub fn canonical_header(raw: &str, index: usize) -> String {
    let cleaned = utils::clean_str(raw);
    if cleaned.is_empty() {
        format!("UNNAMED: {}", index)
    } else {
        cleaned.to_uppercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    /// CSV-like text with a sniffed delimiter.
    Delimited,
    /// Excel/ODS workbook; the first worksheet is read.
    Spreadsheet,
    /// Apache Parquet.
    Columnar,
    /// ZIP archive holding exactly one table in one of the other encodings.
    Archive,
}

impl SourceEncoding {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "txt" | "tsv" => Some(SourceEncoding::Delimited),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(SourceEncoding::Spreadsheet),
            "parquet" | "pq" => Some(SourceEncoding::Columnar),
            "zip" => Some(SourceEncoding::Archive),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
            .ok_or_else(|| {
                EngineError::format(
                    path.display().to_string(),
                    "unrecognised file extension (expected csv, xlsx, parquet or zip)",
                )
            })
    }
}

/// Raw bytes of one input plus the encoding to parse them with.
#[derive(Debug, Clone)]
pub struct TableSource {
    pub name: String,
    pub encoding: SourceEncoding,
    pub data: Vec<u8>,
}

impl TableSource {
    pub fn from_bytes(name: impl Into<String>, encoding: SourceEncoding, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            encoding,
            data,
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let encoding = SourceEncoding::from_path(path)?;
        let data = fs::read(path).map_err(|source| EngineError::Io {
            path: PathBuf::from(path),
            source,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_bytes(name, encoding, data))
    }
}

/// Parse and normalize one input table.
#[tracing::instrument(level = "info", skip(source), fields(source = %source.name, encoding = ?source.encoding))]
pub fn load_table(source: &TableSource) -> Result<RawTable> {
    let table = match source.encoding {
        SourceEncoding::Delimited => delimited::read_delimited(&source.name, &source.data)?,
        SourceEncoding::Spreadsheet => spreadsheet::read_first_sheet(&source.name, &source.data)?,
        SourceEncoding::Columnar => columnar::read_parquet(&source.name, &source.data)?,
        SourceEncoding::Archive => {
            let inner = archive::unpack_single_table(&source.name, &source.data)?;
            if inner.encoding == SourceEncoding::Archive {
                return Err(EngineError::format(&source.name, "nested archives are not supported"));
            }
            load_table(&inner)?
        }
    };
    info!(
        table = %table.name,
        rows = table.len(),
        columns = table.headers.len(),
        "loaded table"
    );
    Ok(table)
}
