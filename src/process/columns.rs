use crate::error::{EngineError, Result};
use crate::ingest::RawTable;

/// Resolve one alias against the canonical headers.
///
/// An exact header match wins; otherwise exactly one header containing the
/// alias is accepted. Several containing headers are ambiguous.
fn match_alias(table: &RawTable, field: &str, alias: &str) -> Result<Option<usize>> {
    let alias = alias.trim().to_uppercase();
    if alias.is_empty() {
        return Ok(None);
    }
    if let Some(idx) = table.column_index(&alias) {
        return Ok(Some(idx));
    }
    let hits: Vec<usize> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.contains(&alias))
        .map(|(i, _)| i)
        .collect();
    match hits.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        many => {
            let names: Vec<&str> = many.iter().map(|&i| table.headers[i].as_str()).collect();
            Err(EngineError::schema(
                &table.name,
                format!(
                    "column for `{}` is ambiguous: alias `{}` matches {}",
                    field,
                    alias,
                    names.join(", ")
                ),
            ))
        }
    }
}

/// Locate an optional logical column by trying `aliases` in order.
pub fn find_column(table: &RawTable, field: &str, aliases: &[String]) -> Result<Option<usize>> {
    for alias in aliases {
        if let Some(idx) = match_alias(table, field, alias)? {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

/// Locate a required logical column; absence is a `SchemaError`.
pub fn require_column(table: &RawTable, field: &str, aliases: &[String]) -> Result<usize> {
    find_column(table, field, aliases)?.ok_or_else(|| {
        EngineError::schema(
            &table.name,
            format!(
                "required column `{}` not found (tried {})",
                field,
                aliases.join(", ")
            ),
        )
    })
}

/// Every column whose header contains `pattern`, in column order.
pub fn value_columns(table: &RawTable, pattern: &str) -> Result<Vec<usize>> {
    let pattern = pattern.trim().to_uppercase();
    let cols: Vec<usize> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.contains(&pattern))
        .map(|(i, _)| i)
        .collect();
    if cols.is_empty() {
        return Err(EngineError::schema(
            &table.name,
            format!("no per-question columns match `{}`", pattern),
        ));
    }
    Ok(cols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    fn table(headers: &[&str]) -> RawTable {
        RawTable {
            name: "t.csv".into(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: vec![],
        }
    }

    fn aliases(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn aliases_are_tried_in_order() -> Result<()> {
        let t = table(&["NO_IES", "CO_CADERNO", "IN_P360"]);
        assert_eq!(require_column(&t, "institution", &aliases(&["IES_NOME", "NO_IES"]))?, 0);
        assert_eq!(require_column(&t, "booklet", &aliases(&["CADERNO"]))?, 1);
        assert_eq!(require_column(&t, "cohort", &aliases(&["P360"]))?, 2);
        Ok(())
    }

    #[test]
    fn exact_match_beats_substring_matches() -> Result<()> {
        let t = table(&["NU_QUESTAO_ORIGINAL", "NU_QUESTAO"]);
        assert_eq!(require_column(&t, "question", &aliases(&["NU_QUESTAO"]))?, 1);
        Ok(())
    }

    #[test]
    fn ambiguous_substring_is_schema_error() {
        let t = table(&["CO_CADERNO", "TP_CADERNO"]);
        let err = require_column(&t, "booklet", &aliases(&["CADERNO"])).unwrap_err();
        assert_eq!(err.stage(), "schema");
        assert!(err.to_string().contains("CO_CADERNO, TP_CADERNO"));
    }

    #[test]
    fn missing_required_and_optional_columns() -> Result<()> {
        let t = table(&["GRANDE_AREA"]);
        assert!(require_column(&t, "area", &aliases(&["SUBESPECIALIDADE"])).is_err());
        assert_eq!(find_column(&t, "diagnosis", &aliases(&["DIAGNOSTICO"]))?, None);
        Ok(())
    }

    #[test]
    fn value_columns_keep_column_order() -> Result<()> {
        let t = table(&["DS_VT_ESC_OBJ2", "CO_CADERNO", "DS_VT_ESC_OBJ1"]);
        assert_eq!(value_columns(&t, "ds_vt_esc_obj")?, vec![0, 2]);
        assert!(value_columns(&t, "DS_VT_GAB_OBJ").is_err());
        Ok(())
    }
}
