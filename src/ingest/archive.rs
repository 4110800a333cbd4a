use std::{
    io::{Cursor, Read},
    path::Path,
};
use tracing::debug;
use zip::ZipArchive;

use super::{SourceEncoding, TableSource};
use crate::error::{EngineError, Result};

/// Open a ZIP held in memory and return its single table entry.
///
/// Directories and files with unknown extensions (readme, pdf dictionaries)
/// are skipped; more than one table entry is ambiguous and rejected.
pub fn unpack_single_table(name: &str, data: &[u8]) -> Result<TableSource> {
    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| EngineError::format(name, format!("unreadable ZIP archive: {}", e)))?;

    let mut found: Option<(String, SourceEncoding, usize)> = None;
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| EngineError::format(name, format!("ZIP entry #{}: {}", i, e)))?;
        if !entry.is_file() {
            continue;
        }
        let entry_name = entry.name().to_string();
        let Some(encoding) = Path::new(&entry_name)
            .extension()
            .and_then(|e| e.to_str())
            .and_then(SourceEncoding::from_extension)
        else {
            debug!(archive = %name, entry = %entry_name, "skipping non-table entry");
            continue;
        };
        if let Some((first, _, _)) = &found {
            return Err(EngineError::format(
                name,
                format!("archive holds more than one table ({} and {})", first, entry_name),
            ));
        }
        found = Some((entry_name, encoding, i));
    }

    let (entry_name, encoding, index) =
        found.ok_or_else(|| EngineError::format(name, "archive holds no table file"))?;
    let mut entry = archive
        .by_index(index)
        .map_err(|e| EngineError::format(name, format!("ZIP entry #{}: {}", index, e)))?;
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut buf)
        .map_err(|e| EngineError::format(name, format!("failed to inflate {}: {}", entry_name, e)))?;

    let inner_name = format!("{}!{}", name, entry_name);
    Ok(TableSource::from_bytes(inner_name, encoding, buf))
}
