// src/ingest/discover.rs
use glob::glob;
use serde::Serialize;
use std::{
    io,
    path::{Path, PathBuf},
};
use tracing::{info, warn};

use super::{load_table, RawTable, SourceEncoding, TableSource};
use crate::error::{EngineError, Result};

pub const RESPONSES_STEM: &str = "base_alunos";
pub const ANSWER_KEY_STEM: &str = "base_gabarito";
pub const TAXONOMY_STEM: &str = "base_mapeamento";

/// Locations of the three inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputFiles {
    pub responses: PathBuf,
    pub answer_key: PathBuf,
    pub taxonomy: PathBuf,
}

/// First file (sorted by name) in `dir` named `<stem>.<ext>` with a
/// readable table extension.
pub fn find_input(dir: &Path, stem: &str) -> Result<PathBuf> {
    let pattern = format!("{}/{}.*", dir.display(), stem);
    let entries = glob(&pattern)
        .map_err(|e| EngineError::Config(format!("bad input pattern {}: {}", pattern, e)))?;

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file() && SourceEncoding::from_path(p).is_ok())
        .collect();
    found.sort();

    match found.len() {
        0 => Err(EngineError::Io {
            path: dir.join(format!("{}.*", stem)),
            source: io::Error::new(io::ErrorKind::NotFound, "no table file with this name"),
        }),
        1 => Ok(found.remove(0)),
        n => {
            warn!(stem, candidates = n, chosen = %found[0].display(), "several input files share a name; using the first");
            Ok(found.remove(0))
        }
    }
}

impl InputFiles {
    /// Look up `base_alunos.*`, `base_gabarito.*` and `base_mapeamento.*`.
    pub fn discover(dir: &Path) -> Result<Self> {
        let files = Self {
            responses: find_input(dir, RESPONSES_STEM)?,
            answer_key: find_input(dir, ANSWER_KEY_STEM)?,
            taxonomy: find_input(dir, TAXONOMY_STEM)?,
        };
        info!(
            responses = %files.responses.display(),
            answer_key = %files.answer_key.display(),
            taxonomy = %files.taxonomy.display(),
            "discovered inputs"
        );
        Ok(files)
    }

    /// Read and normalize the three tables: (responses, answer key, taxonomy).
    pub fn load(&self) -> Result<(RawTable, RawTable, RawTable)> {
        Ok((
            load_table(&TableSource::from_path(&self.responses)?)?,
            load_table(&TableSource::from_path(&self.answer_key)?)?,
            load_table(&TableSource::from_path(&self.taxonomy)?)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::fixtures;
    use anyhow::Result;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discovers_and_loads_inputs_by_stem() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("base_alunos.csv"), fixtures::RESPONSES)?;
        fs::write(dir.path().join("base_gabarito.txt"), fixtures::ANSWER_KEY)?;
        fs::write(dir.path().join("base_mapeamento.csv"), fixtures::TAXONOMY)?;
        fs::write(dir.path().join("base_alunos.bak"), "ignored")?;

        let files = InputFiles::discover(dir.path())?;
        assert!(files.responses.ends_with("base_alunos.csv"));
        assert!(files.answer_key.ends_with("base_gabarito.txt"));

        let (r, k, t) = files.load()?;
        assert_eq!(r.len(), 6);
        assert_eq!(k.len(), 2);
        assert_eq!(t.headers[1], "NU_QUESTAO");
        Ok(())
    }

    #[test]
    fn missing_input_names_the_expected_file() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("base_alunos.csv"), fixtures::RESPONSES)?;
        let err = InputFiles::discover(dir.path()).expect_err("answer key missing");
        assert_eq!(err.stage(), "ingest");
        assert!(err.to_string().contains("base_gabarito.*"));
        Ok(())
    }
}
