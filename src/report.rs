//! Per-label metadata report and atomic JSON output.

use crate::denylist::DomainFilter;
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Failures writing a report or output file.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Creating, writing or renaming the file failed.
    #[error("failed to write {path}: {source}")]
    Io {
        /// Destination file.
        path: PathBuf,
        /// Underlying failure.
        source: io::Error,
    },
    /// The value could not be encoded.
    #[error("failed to encode {path}: {source}")]
    Encode {
        /// Destination file.
        path: PathBuf,
        /// Encoder failure.
        source: serde_json::Error,
    },
}

/// Link sets and their sizes for one label run.
///
/// `unique_links` are accepted links that were not seeds; `rejected_links` are
/// seeds that did not survive filtering; `active_seed_urls` are the seeds that did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlMetadata {
    /// Seeds that were crawled.
    pub seed_urls: BTreeSet<String>,
    /// `seed_urls` size.
    pub seed_urls_len: usize,
    /// Every link discovered by the crawl, seeds included.
    pub all_website_links: BTreeSet<String>,
    /// `all_website_links` size.
    pub all_website_links_len: usize,
    /// Links accepted by the language filter.
    pub filtered_links: BTreeSet<String>,
    /// `filtered_links` size.
    pub filtered_links_len: usize,
    /// `filtered_links - seed_urls`.
    pub unique_links: BTreeSet<String>,
    /// `unique_links` size.
    pub unique_links_len: usize,
    /// `seed_urls - filtered_links`.
    pub rejected_links: BTreeSet<String>,
    /// `rejected_links` size.
    pub rejected_links_len: usize,
    /// `seed_urls - rejected_links`.
    pub active_seed_urls: BTreeSet<String>,
    /// `active_seed_urls` size.
    pub active_seed_urls_len: usize,
}

impl CrawlMetadata {
    /// Derives every set from the seeds, the discovered links and the accepted links.
    pub fn compute<S, D, A>(seeds: S, discovered: D, accepted: A) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
        A: IntoIterator,
        A::Item: Into<String>,
    {
        Self::from_sets(
            seeds.into_iter().map(Into::into).collect(),
            discovered.into_iter().map(Into::into).collect(),
            accepted.into_iter().map(Into::into).collect(),
        )
    }

    fn from_sets(
        seed_urls: BTreeSet<String>,
        all_website_links: BTreeSet<String>,
        filtered_links: BTreeSet<String>,
    ) -> Self {
        let unique_links: BTreeSet<String> =
            filtered_links.difference(&seed_urls).cloned().collect();
        let rejected_links: BTreeSet<String> =
            seed_urls.difference(&filtered_links).cloned().collect();
        let active_seed_urls: BTreeSet<String> =
            seed_urls.difference(&rejected_links).cloned().collect();

        Self {
            seed_urls_len: seed_urls.len(),
            all_website_links_len: all_website_links.len(),
            filtered_links_len: filtered_links.len(),
            unique_links_len: unique_links.len(),
            rejected_links_len: rejected_links.len(),
            active_seed_urls_len: active_seed_urls.len(),
            seed_urls,
            all_website_links,
            filtered_links,
            unique_links,
            rejected_links,
            active_seed_urls,
        }
    }

    /// Drops denylisted links from every set and recomputes the sizes and the
    /// active seeds.
    pub fn without_denied(&self, denylist: &DomainFilter) -> Self {
        let keep = |set: &BTreeSet<String>| -> BTreeSet<String> {
            set.iter()
                .filter(|link| !denylist.is_denied(link))
                .cloned()
                .collect()
        };
        let seed_urls = keep(&self.seed_urls);
        let all_website_links = keep(&self.all_website_links);
        let filtered_links = keep(&self.filtered_links);
        let unique_links = keep(&self.unique_links);
        let rejected_links = keep(&self.rejected_links);
        let active_seed_urls: BTreeSet<String> =
            seed_urls.difference(&rejected_links).cloned().collect();

        Self {
            seed_urls_len: seed_urls.len(),
            all_website_links_len: all_website_links.len(),
            filtered_links_len: filtered_links.len(),
            unique_links_len: unique_links.len(),
            rejected_links_len: rejected_links.len(),
            active_seed_urls_len: active_seed_urls.len(),
            seed_urls,
            all_website_links,
            filtered_links,
            unique_links,
            rejected_links,
            active_seed_urls,
        }
    }
}

/// Writes `value` as indented JSON to a temporary file next to `path`, then
/// renames it into place. Readers never observe a partial file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ReportError> {
    let io_err = |source: io::Error| ReportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(io_err)?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(b"    "));
        value
            .serialize(&mut serializer)
            .map_err(|source| ReportError::Encode {
                path: path.to_path_buf(),
                source,
            })?;
        writer.write_all(b"\n").map_err(io_err)?;
        writer.flush().map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|err| io_err(err.error))?;
    Ok(())
}
