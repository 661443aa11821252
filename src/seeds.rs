//! Seed records produced by the search stage, loaded best-effort.
//!
//! A seed file is a JSON array of objects. Each object must carry a link, a
//! predicted language label and a confidence; everything else (snippet, title,
//! engines, category, ...) is passed through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, warn};

/// A starting link, pre-labelled with a language prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedRecord {
    /// Seed URL as written by the search stage.
    pub link: String,
    /// Predicted language/script label, e.g. `urd_Latn`.
    #[serde(rename = "predicted_lid", alias = "predicted_label", alias = "lid_label")]
    pub predicted_label: String,
    /// Confidence of `predicted_label`.
    #[serde(rename = "lid_confidence", alias = "confidence")]
    pub confidence: f64,
    /// Free-form fields carried through unmodified.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SeedRecord {
    /// Creates a record with no passthrough fields.
    pub fn new(link: impl Into<String>, predicted_label: impl Into<String>, confidence: f64) -> Self {
        Self {
            link: link.into(),
            predicted_label: predicted_label.into(),
            confidence,
            extra: Map::new(),
        }
    }

    /// Looks up a field by its serialized name (or a known alias).
    pub fn field(&self, key: &str) -> Option<Value> {
        match key {
            "link" => Some(Value::from(self.link.as_str())),
            "predicted_lid" | "predicted_label" | "lid_label" => {
                Some(Value::from(self.predicted_label.as_str()))
            }
            "lid_confidence" | "confidence" => Some(Value::from(self.confidence)),
            other => self.extra.get(other).cloned(),
        }
    }
}

/// What to do when a single record fails validation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Drop the bad record and keep the rest.
    #[default]
    Lenient,
    /// Reject the whole file, yielding no records.
    Strict,
}

/// Reasons a seed file could not be (fully) loaded.
#[derive(Debug, Error)]
pub enum SeedLoadError {
    /// The seed file does not exist.
    #[error("seed file {0} not found")]
    NotFound(PathBuf),
    /// The seed file exists but could not be read.
    #[error("failed to read seed file {path}: {source}")]
    Io {
        /// Seed file location.
        path: PathBuf,
        /// Underlying I/O failure.
        source: io::Error,
    },
    /// The content is not a JSON array.
    #[error("seed file {path} is not a JSON array: {source}")]
    Malformed {
        /// Seed file location.
        path: PathBuf,
        /// JSON decoding failure.
        source: serde_json::Error,
    },
    /// A record lacks a required field (strict mode only).
    #[error("seed record {index} in {path} is invalid: {reason}")]
    InvalidRecord {
        /// Seed file location.
        path: PathBuf,
        /// Position of the record in the array.
        index: usize,
        /// Validation failure.
        reason: String,
    },
}

/// Seed records for one run. Loading never fails outright: problems are
/// reported through [`SeedSource::failure`] and leave an empty collection.
#[derive(Debug)]
pub struct SeedSource {
    path: PathBuf,
    records: Vec<SeedRecord>,
    rejected: usize,
    failure: Option<SeedLoadError>,
}

impl SeedSource {
    /// Loads and validates `path`.
    pub fn load(path: &Path, strictness: Strictness) -> Self {
        let mut source = Self {
            path: path.to_path_buf(),
            records: Vec::new(),
            rejected: 0,
            failure: None,
        };
        match read_values(path) {
            Ok(values) => source.validate(values, strictness),
            Err(err) => {
                error!(path = %path.display(), error = %err, "seed file unusable");
                source.failure = Some(err);
            }
        }
        source
    }

    /// Builds a source from records already in memory.
    pub fn from_records(records: Vec<SeedRecord>) -> Self {
        Self {
            path: PathBuf::new(),
            records,
            rejected: 0,
            failure: None,
        }
    }

    fn validate(&mut self, values: Vec<Value>, strictness: Strictness) {
        for (index, value) in values.into_iter().enumerate() {
            match serde_json::from_value::<SeedRecord>(value) {
                Ok(record) => self.records.push(record),
                Err(err) => {
                    self.rejected += 1;
                    if strictness == Strictness::Strict {
                        error!(path = %self.path.display(), index, error = %err, "rejecting seed file");
                        self.records.clear();
                        self.failure = Some(SeedLoadError::InvalidRecord {
                            path: self.path.clone(),
                            index,
                            reason: err.to_string(),
                        });
                        return;
                    }
                    warn!(path = %self.path.display(), index, error = %err, "dropping seed record");
                }
            }
        }
        debug!(
            path = %self.path.display(),
            loaded = self.records.len(),
            rejected = self.rejected,
            "seed file loaded"
        );
    }

    /// All valid records in file order.
    pub fn records(&self) -> &[SeedRecord] {
        &self.records
    }

    /// Consumes the source, returning its records.
    pub fn into_records(self) -> Vec<SeedRecord> {
        self.records
    }

    /// Number of records dropped by validation.
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// The load failure, if any.
    pub fn failure(&self) -> Option<&SeedLoadError> {
        self.failure.as_ref()
    }

    /// Record at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&SeedRecord> {
        self.records.get(index)
    }

    /// Records whose `key` field equals `value`.
    pub fn filter_by(&self, key: &str, value: &Value) -> Vec<&SeedRecord> {
        let matches: Vec<_> = self
            .records
            .iter()
            .filter(|record| record.field(key).as_ref() == Some(value))
            .collect();
        if matches.is_empty() {
            debug!(key, %value, "no seed records match");
        }
        matches
    }

    /// Records confident enough to be crawled (strictly above `min_confidence`).
    pub fn eligible(&self, min_confidence: f64) -> Vec<&SeedRecord> {
        self.records
            .iter()
            .filter(|record| record.confidence > min_confidence)
            .collect()
    }
}

fn read_values(path: &Path) -> Result<Vec<Value>, SeedLoadError> {
    let raw = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            SeedLoadError::NotFound(path.to_path_buf())
        } else {
            SeedLoadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    serde_json::from_str(&raw).map_err(|source| SeedLoadError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}
