// src/config.rs

use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

use crate::error::{EngineError, Result};

/// Ordered header aliases for every logical column the engine needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnAliases {
    pub institution: Vec<String>,
    pub booklet: Vec<String>,
    pub cohort_flag: Vec<String>,
    /// Substring shared by every per-question column of the response table.
    pub response_pattern: String,
    /// Substring shared by every per-question column of the answer key.
    pub answer_pattern: String,
    pub question: Vec<String>,
    pub area: Vec<String>,
    pub subspecialty: Vec<String>,
    pub diagnosis: Vec<String>,
}

impl Default for ColumnAliases {
    fn default() -> Self {
        fn list(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }
        Self {
            institution: list(&["IES_NOME", "NO_IES"]),
            booklet: list(&["CADERNO"]),
            cohort_flag: list(&["P360"]),
            response_pattern: "DS_VT_ESC_OBJ".into(),
            answer_pattern: "DS_VT_GAB_OBJ".into(),
            question: list(&["NU_QUESTAO"]),
            area: list(&["GRANDE_AREA"]),
            subspecialty: list(&["SUBESPECIALIDADE"]),
            diagnosis: list(&["DIAGNOSTICO"]),
        }
    }
}

/// Fill values for taxonomy fields of unmapped questions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sentinels {
    pub area: String,
    pub subspecialty: String,
    pub diagnosis: String,
}

impl Default for Sentinels {
    fn default() -> Self {
        Self {
            area: "UNMAPPED".into(),
            subspecialty: "GENERAL".into(),
            diagnosis: "-".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub columns: ColumnAliases,
    /// Cohort-flag values (after trim + uppercase) that mark a comparison-cohort member.
    pub cohort_truthy: Vec<String>,
    /// Answer-key token marking an annulled question.
    pub annulled_token: String,
    pub sentinels: Sentinels,
    /// Size of the headline "critical gaps" table.
    pub top_n: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            columns: ColumnAliases::default(),
            cohort_truthy: ["S", "SIM", "Y", "YES", "1", "T", "TRUE"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            annulled_token: "ANULADA".into(),
            sentinels: Sentinels::default(),
            top_n: 10,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let cfg: EngineConfig = serde_yaml::from_str(text)
            .map_err(|e| EngineError::Config(format!("invalid YAML: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| EngineError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Alias lists and patterns are compared against canonical (trimmed,
    /// upper-cased) headers, so they must be non-empty.
    pub fn validate(&self) -> Result<()> {
        let c = &self.columns;
        let required = [
            ("institution", &c.institution),
            ("booklet", &c.booklet),
            ("cohort_flag", &c.cohort_flag),
            ("question", &c.question),
            ("area", &c.area),
            ("subspecialty", &c.subspecialty),
        ];
        for (field, aliases) in required {
            if aliases.iter().all(|a| a.trim().is_empty()) {
                return Err(EngineError::Config(format!(
                    "no aliases configured for column `{}`",
                    field
                )));
            }
        }
        if c.response_pattern.trim().is_empty() || c.answer_pattern.trim().is_empty() {
            return Err(EngineError::Config(
                "value-column patterns must not be empty".into(),
            ));
        }
        if self.annulled_token.trim().is_empty() {
            return Err(EngineError::Config("annulled_token must not be empty".into()));
        }
        Ok(())
    }

    pub fn is_truthy_cohort(&self, flag: &str) -> bool {
        let flag = flag.trim().to_uppercase();
        self.cohort_truthy
            .iter()
            .any(|t| t.trim().to_uppercase() == flag)
    }
}
