use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no dataset definitions configured")]
    NoDataSets,
    #[error("dataset '{0}' is defined more than once")]
    DuplicateDataSet(String),
    #[error("dataset '{name}' is invalid: {detail}")]
    InvalidDataSet { name: String, detail: String },
    #[error("dataset definitions are not valid JSON")]
    BadJson(#[from] serde_json::Error),
}

/// Static description of one source dataset: how its files are named, which
/// columns key a record, and which columns are copied onto stored records.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataSetDefinition {
    /// Unique dataset name; doubles as the target collection name.
    pub name: String,
    /// Plain prefix matched against the base name of dropped files,
    /// e.g. `LITP_SAMCPHHOLDING`.
    pub file_prefix_format: String,
    /// chrono format of the date token in dropped file names.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// Columns whose value tuple identifies a record.
    pub primary_key_columns: Vec<String>,
    /// Column carrying the per-row change-type letter.
    #[serde(default = "default_change_type_column")]
    pub change_type_column: String,
    /// Columns copied onto the stored record on every upsert.
    pub accumulator_columns: Vec<String>,
}

fn default_date_format() -> String {
    "%Y%m%d".to_string()
}

fn default_change_type_column() -> String {
    crate::fields::CHANGE_TYPE.to_string()
}

impl DataSetDefinition {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |detail: &str| ConfigError::InvalidDataSet {
            name: self.name.clone(),
            detail: detail.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("empty name"));
        }
        if self.file_prefix_format.trim().is_empty() {
            return Err(invalid("empty file prefix"));
        }
        if self.primary_key_columns.is_empty() {
            return Err(invalid("no primary-key columns"));
        }
        if self.accumulator_columns.is_empty() {
            return Err(invalid("no accumulator columns"));
        }
        Ok(())
    }
}

/// A dropped file matched to its dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchedFile {
    pub dataset: String,
    pub logical_date: NaiveDate,
}

/// All configured datasets, loaded once per process.
#[derive(Clone, Debug)]
pub struct DataSetRegistry {
    by_name: BTreeMap<String, DataSetDefinition>,
}

impl DataSetRegistry {
    pub fn new(definitions: Vec<DataSetDefinition>) -> Result<DataSetRegistry, ConfigError> {
        if definitions.is_empty() {
            return Err(ConfigError::NoDataSets);
        }
        let mut by_name = BTreeMap::new();
        for def in definitions {
            def.validate()?;
            let name = def.name.clone();
            if by_name.insert(name.clone(), def).is_some() {
                return Err(ConfigError::DuplicateDataSet(name));
            }
        }
        Ok(DataSetRegistry { by_name })
    }

    /// Load from a JSON array of definitions, the form configuration
    /// carries them in.
    pub fn from_json(raw: &str) -> Result<DataSetRegistry, ConfigError> {
        let definitions: Vec<DataSetDefinition> = serde_json::from_str(raw)?;
        DataSetRegistry::new(definitions)
    }

    pub fn get(&self, name: &str) -> Option<&DataSetDefinition> {
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataSetDefinition> {
        self.by_name.values()
    }

    /// Match an object key's base name against the configured datasets.
    /// Returns None when no prefix matches or no token parses as the
    /// dataset's date; unmatched keys are skipped by acquisition, not failed.
    pub fn match_key(&self, key: &str) -> Option<(&DataSetDefinition, MatchedFile)> {
        let base = base_name(key);
        let def = self
            .by_name
            .values()
            .find(|def| base.starts_with(&def.file_prefix_format))?;

        let stem = base.split('.').next().unwrap_or(base);
        let logical_date = stem.split('_').find_map(|token| {
            NaiveDate::parse_from_str(token, &def.date_format)
                .ok()
                .or_else(|| {
                    // The date token may carry a trailing -HHMMSS portion.
                    let (date_part, time) = token.rsplit_once('-')?;
                    if time.len() == 6 && time.bytes().all(|b| b.is_ascii_digit()) {
                        NaiveDate::parse_from_str(date_part, &def.date_format).ok()
                    } else {
                        None
                    }
                })
        })?;

        Some((
            def,
            MatchedFile {
                dataset: def.name.clone(),
                logical_date,
            },
        ))
    }
}

/// The final path segment of an object key.
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
