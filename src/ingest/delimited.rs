use csv::ReaderBuilder;
use tracing::debug;

use super::{utils, RawTable, Scalar};
use crate::error::{EngineError, Result};

/// Parse delimited text (CSV/TSV/semicolon) into a normalized table.
pub fn read_delimited(name: &str, data: &[u8]) -> Result<RawTable> {
    let text = utils::decode_text(name, data);
    if text.trim().is_empty() {
        return Err(EngineError::format(name, "file is empty"));
    }
    let delimiter = utils::sniff_delimiter(&text);
    debug!(source = %name, delimiter = %(delimiter as char).escape_default(), "sniffed delimiter");

    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true) // short trailing records are padded by RawTable::from_raw
        .from_reader(text.as_bytes());

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| EngineError::format(name, format!("unreadable header: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result
            .map_err(|e| EngineError::format(name, format!("CSV parse error at record {}: {}", idx + 1, e)))?;
        rows.push(record.iter().map(Scalar::text).collect());
    }

    RawTable::from_raw(name, headers, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn reads_semicolon_file_with_bom_and_blank_lines() -> Result<()> {
        let data = "\u{feff} no_ies ;CO_CADERNO;DS_VT_ESC_OBJ1\nESCOLA A;1;A\n;;\nESCOLA B;2;\n";
        let t = read_delimited("alunos.csv", data.as_bytes())?;
        assert_eq!(t.headers, vec!["NO_IES", "CO_CADERNO", "DS_VT_ESC_OBJ1"]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows[1][2], Scalar::Empty);
        assert_eq!(t.rows[0][0], Scalar::Text("ESCOLA A".into()));
        Ok(())
    }

    #[test]
    fn empty_file_is_format_error() {
        let err = read_delimited("vazio.csv", b"   \n").unwrap_err();
        assert!(matches!(err, EngineError::Format { .. }));
    }

    #[test]
    fn record_wider_than_header_is_format_error() {
        let err = read_delimited("x.csv", b"A,B\n1,2\n3,4,5\n").unwrap_err();
        assert!(err.to_string().contains("record 2"));
    }
}
