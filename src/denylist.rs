//! Substring denylist over links and seed records.

use crate::controls::ConfigError;
use crate::seeds::SeedRecord;
use std::fs;
use std::path::Path;

/// Denylisted domain substrings loaded once per process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainFilter {
    domains: Vec<String>,
}

impl DomainFilter {
    /// Reads one domain substring per line. A missing or unreadable file is a startup error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::MissingDenylist(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::UnreadableDenylist {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_domains(raw.lines()))
    }

    /// Builds a filter from in-memory entries. Blank entries are ignored.
    pub fn from_domains<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| d.as_ref().trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains }
    }

    /// Number of denylist entries.
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// Returns true when the denylist is empty.
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// True when `url` contains any denylisted substring.
    pub fn is_denied(&self, url: &str) -> bool {
        self.domains.iter().any(|domain| url.contains(domain.as_str()))
    }

    /// Drops every record whose link is denylisted.
    pub fn filter(&self, records: Vec<SeedRecord>) -> Vec<SeedRecord> {
        records
            .into_iter()
            .filter(|record| !self.is_denied(&record.link))
            .collect()
    }

    /// Drops denylisted entries from a list of links, preserving order.
    pub fn retain_urls<S: AsRef<str>>(&self, urls: impl IntoIterator<Item = S>) -> Vec<String> {
        urls.into_iter()
            .filter(|url| !self.is_denied(url.as_ref()))
            .map(|url| url.as_ref().to_string())
            .collect()
    }
}
