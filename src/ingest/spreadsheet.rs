use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::io::Cursor;
use tracing::debug;

use super::{RawTable, Scalar};
use crate::error::{EngineError, Result};

fn cell_to_scalar(cell: &Data) -> Scalar {
    match cell {
        Data::Empty => Scalar::Empty,
        Data::String(s) => Scalar::text(s),
        Data::Int(i) => Scalar::Int(*i),
        Data::Float(f) => Scalar::Float(*f),
        Data::Bool(b) => Scalar::Text(if *b { "TRUE" } else { "FALSE" }.into()),
        Data::DateTime(dt) => Scalar::Float(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Scalar::text(s),
        Data::Error(_) => Scalar::Empty,
    }
}

/// Read the first worksheet of a workbook; its first row is the header.
pub fn read_first_sheet(name: &str, data: &[u8]) -> Result<RawTable> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(data.to_vec()))
        .map_err(|e| EngineError::format(name, format!("unreadable workbook: {}", e)))?;

    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| EngineError::format(name, "workbook has no sheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|e| EngineError::format(name, format!("cannot read sheet `{}`: {}", sheet, e)))?;
    debug!(source = %name, sheet = %sheet, size = ?range.get_size(), "reading worksheet");

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| EngineError::format(name, format!("sheet `{}` is empty", sheet)))?
        .iter()
        .map(|c| cell_to_scalar(c).as_text())
        .collect();

    let body = rows
        .map(|row| row.iter().map(cell_to_scalar).collect())
        .collect();

    RawTable::from_raw(name, headers, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    #[test]
    fn reads_first_sheet_of_workbook() -> anyhow::Result<()> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("mapa")?;
        for (col, header) in [" co_caderno", "NU_QUESTAO", "GRANDE_AREA"].iter().enumerate() {
            sheet.write_string(0, col as u16, *header)?;
        }
        sheet.write_number(1, 0, 1.0)?;
        sheet.write_number(1, 1, 3.0)?;
        sheet.write_string(1, 2, "Clinica Medica")?;
        // row 2 left empty
        sheet.write_number(3, 0, 2.0)?;
        sheet.write_number(3, 1, 7.0)?;
        sheet.write_string(3, 2, "Pediatria")?;
        let other = workbook.add_worksheet();
        other.write_string(0, 0, "IGNORED")?;
        let data = workbook.save_to_buffer()?;

        let t = read_first_sheet("base_mapeamento.xlsx", &data)?;
        assert_eq!(t.headers, vec!["CO_CADERNO", "NU_QUESTAO", "GRANDE_AREA"]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.rows[0][0].as_text(), "1");
        assert_eq!(t.rows[1][1].as_f64(), Some(7.0));
        assert_eq!(t.rows[1][2], Scalar::Text("Pediatria".into()));
        Ok(())
    }

    #[test]
    fn garbage_bytes_are_format_error() {
        let err = read_first_sheet("mapa.xlsx", b"definitely not a workbook").unwrap_err();
        assert_eq!(err.stage(), "ingest");
        assert!(err.to_string().contains("mapa.xlsx"));
    }

    #[test]
    fn numeric_cells_keep_their_type() {
        assert_eq!(cell_to_scalar(&Data::Float(3.0)), Scalar::Float(3.0));
        assert_eq!(cell_to_scalar(&Data::Int(7)), Scalar::Int(7));
        assert_eq!(cell_to_scalar(&Data::String("  ".into())), Scalar::Empty);
        assert_eq!(
            cell_to_scalar(&Data::Bool(true)),
            Scalar::Text("TRUE".into())
        );
    }
}
