//! Batch orchestration: one independent harvest per language label.

use crate::classifier::{FastTextProcess, LanguageClassifier, LanguageModel};
use crate::controls::{ConfigError, CrawlMode, HarvestConfig};
use crate::crawler::{CrawlOutcome, SeedCrawler};
use crate::denylist::DomainFilter;
use crate::fetch::{HttpFetcher, PageFetcher};
use crate::frontier::CrawlStatus;
use crate::pipeline::{LabelTarget, LanguageFilter, LinkClassification};
use crate::report::{write_json_atomic, CrawlMetadata};
use crate::seeds::SeedSource;
use crate::text::{HttpTextSource, TextExtractor, TextSource};
use anyhow::Context;
use futures_util::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Builder;
use tracing::{error, info, warn};
use url::Url;

/// What one label run produced.
#[derive(Debug, Clone)]
pub struct LabelSummary {
    /// Language label.
    pub label: String,
    /// Valid records in the seed file.
    pub seeds_loaded: usize,
    /// Records dropped by the denylist.
    pub seeds_denied: usize,
    /// Seeds actually crawled.
    pub seeds_crawled: usize,
    /// Links discovered across all crawls.
    pub discovered: usize,
    /// Links written to the output file.
    pub accepted: usize,
    /// Terminal status of each crawl.
    pub crawl_statuses: Vec<CrawlStatus>,
    /// Accepted-link file.
    pub output_path: PathBuf,
    /// Metadata report file.
    pub metadata_path: PathBuf,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

/// Outcome of a whole batch.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Labels that finished.
    pub completed: Vec<LabelSummary>,
    /// Labels that failed, in order.
    pub failed: Vec<String>,
}

impl BatchSummary {
    /// True when every label finished.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Long-lived collaborators shared by every label run in the process.
pub struct Harvester {
    config: HarvestConfig,
    denylist: DomainFilter,
    crawler: SeedCrawler,
    filter: LanguageFilter,
}

impl Harvester {
    /// Wires the harvester from explicit collaborators.
    pub fn new(
        config: HarvestConfig,
        denylist: DomainFilter,
        fetcher: Arc<dyn PageFetcher>,
        text_source: Arc<dyn TextSource>,
        model: Arc<dyn LanguageModel>,
    ) -> Self {
        let crawler = SeedCrawler::new(config.crawl.clone(), fetcher);
        let filter = LanguageFilter::new(
            text_source,
            LanguageClassifier::new(model),
            config.filter.clone(),
        );
        Self {
            config,
            denylist,
            crawler,
            filter,
        }
    }

    /// Builds the HTTP client, loads the denylist and starts the fastText
    /// process, which must answer a first prediction. Fails only on
    /// configuration problems.
    pub async fn from_config(config: HarvestConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let denylist = DomainFilter::load(&config.denylist_path)?;
        let fetcher: Arc<dyn PageFetcher> = Arc::new(HttpFetcher::new(&config.fetch)?);
        let text_source = Arc::new(HttpTextSource::new(
            Arc::clone(&fetcher),
            TextExtractor::default(),
        ));
        let model = Arc::new(FastTextProcess::new(
            config.fasttext_bin.clone(),
            config.model_path.clone(),
        ));
        model.warm_up().await.map_err(ConfigError::Classifier)?;
        info!(
            labels = config.labels.len(),
            denylist_entries = denylist.len(),
            model = %config.model_path.display(),
            "harvester ready"
        );
        Ok(Self::new(config, denylist, fetcher, text_source, model))
    }

    /// Resolved configuration.
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Runs every configured label in order. A failing or panicking label is
    /// logged and the batch moves on.
    pub async fn run_batch(self: Arc<Self>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for label in self.config.labels.clone() {
            let harvester = Arc::clone(&self);
            let task_label = label.clone();
            let handle = tokio::spawn(async move { harvester.run_label(&task_label).await });

            match handle.await {
                Ok(Ok(done)) => {
                    info!(
                        label = %done.label,
                        accepted = done.accepted,
                        discovered = done.discovered,
                        elapsed_secs = done.elapsed.as_secs_f64(),
                        output = %done.output_path.display(),
                        "label finished"
                    );
                    summary.completed.push(done);
                }
                Ok(Err(err)) => {
                    error!(label = %label, error = ?err, "label failed, continuing");
                    summary.failed.push(label);
                }
                Err(join_err) if join_err.is_panic() => {
                    error!(label = %label, "label run panicked, continuing");
                    summary.failed.push(label);
                }
                Err(join_err) => {
                    error!(label = %label, error = %join_err, "label run cancelled");
                    summary.failed.push(label);
                }
            }
        }
        if !summary.all_succeeded() {
            warn!(failed = ?summary.failed, "batch finished with failures");
        }
        summary
    }

    /// Loads, crawls, classifies and reports a single label.
    pub async fn run_label(&self, label: &str) -> anyhow::Result<LabelSummary> {
        let start = Instant::now();
        let seed_path = self.config.seed_path(label);
        let source = SeedSource::load(&seed_path, self.config.strictness);
        if let Some(failure) = source.failure() {
            anyhow::bail!("seed file for {label} unusable: {failure}");
        }

        let seeds_loaded = source.records().len();
        let allowed = SeedSource::from_records(self.denylist.filter(source.into_records()));
        let seeds_denied = seeds_loaded - allowed.records().len();

        let min_confidence = self.config.filter.min_confidence;
        let mut seen = HashSet::new();
        let seeds: Vec<Url> = allowed
            .eligible(min_confidence)
            .into_iter()
            .filter_map(|record| match Url::parse(record.link.trim()) {
                Ok(mut url) if matches!(url.scheme(), "http" | "https") => {
                    url.set_fragment(None);
                    Some(url)
                }
                Ok(url) => {
                    warn!(label, link = %url, "skipping non-http seed");
                    None
                }
                Err(err) => {
                    warn!(label, link = %record.link, error = %err, "skipping unparseable seed");
                    None
                }
            })
            .filter(|url| seen.insert(url.clone()))
            .collect();
        info!(
            label,
            seeds_loaded,
            seeds_denied,
            seeds_crawled = seeds.len(),
            "seeds ready"
        );

        let outcomes = self.crawl_seeds(&seeds).await;
        let crawl_statuses: Vec<CrawlStatus> = outcomes.iter().map(|o| o.status).collect();
        let discovered: BTreeSet<Url> = outcomes
            .into_iter()
            .flat_map(|outcome| outcome.discovered)
            .collect();

        let target = LabelTarget::new(label, min_confidence);
        let accepted: Vec<LinkClassification> = self
            .filter
            .run(discovered.iter().cloned(), &target)
            .await
            .into_iter()
            .filter(|classification| !self.denylist.is_denied(&classification.link))
            .collect();

        let output_path = self.config.output_path(label);
        write_json_atomic(&output_path, &accepted)
            .with_context(|| format!("writing accepted links for {label}"))?;

        let metadata = CrawlMetadata::compute(
            seeds.iter().map(Url::to_string),
            discovered.iter().map(Url::to_string),
            accepted.iter().map(|c| c.link.clone()),
        )
        .without_denied(&self.denylist);
        let metadata_path = self.config.metadata_path(label);
        write_json_atomic(&metadata_path, &metadata)
            .with_context(|| format!("writing metadata for {label}"))?;

        Ok(LabelSummary {
            label: label.to_string(),
            seeds_loaded,
            seeds_denied,
            seeds_crawled: seeds.len(),
            discovered: discovered.len(),
            accepted: accepted.len(),
            crawl_statuses,
            output_path,
            metadata_path,
            elapsed: start.elapsed(),
        })
    }

    async fn crawl_seeds(&self, seeds: &[Url]) -> Vec<CrawlOutcome> {
        if seeds.is_empty() {
            return Vec::new();
        }
        match self.config.crawl_mode {
            CrawlMode::Combined => vec![self.crawler.crawl(seeds).await],
            CrawlMode::PerSeed => {
                stream::iter(seeds.iter().cloned())
                    .map(|seed| async move { self.crawler.crawl(&[seed]).await })
                    .buffer_unordered(self.config.seed_concurrency.max(1))
                    .collect()
                    .await
            }
        }
    }
}

/// Builds a multi-threaded runtime and runs the whole batch on it.
pub fn run(config: HarvestConfig) -> anyhow::Result<BatchSummary> {
    let rt = Builder::new_multi_thread()
        .enable_all()
        .thread_name("seedcrawl-worker")
        .build()
        .context("failed to start async runtime")?;
    rt.block_on(async {
        let harvester = Arc::new(Harvester::from_config(config).await?);
        Ok::<_, anyhow::Error>(harvester.run_batch().await)
    })
}
