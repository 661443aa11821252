//! Bounded breadth-first expansion of seed sites.

use crate::controls::CrawlControls;
use crate::fetch::PageFetcher;
use crate::frontier::{Claim, CrawlStatus, Frontier, MergeStats};
use crate::html::extract_links;
use futures_util::future::join_all;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

/// Why a candidate link was kept out of the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeRejection {
    /// Host is not a seed host or one of its subdomains.
    OffSite,
    /// URL exceeds the configured length limit.
    TooLong,
}

/// Same-site membership: a host equal to, or a subdomain of, any seed host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteScope {
    hosts: Vec<String>,
    max_url_length: usize,
}

impl SiteScope {
    /// Builds the scope from the seed URLs. Seeds without a host contribute nothing.
    pub fn new<'a>(seeds: impl IntoIterator<Item = &'a Url>, max_url_length: usize) -> Self {
        let mut hosts: Vec<String> = seeds
            .into_iter()
            .filter_map(|seed| seed.host_str())
            .map(|host| host.trim_end_matches('.').to_ascii_lowercase())
            .collect();
        hosts.sort();
        hosts.dedup();
        Self {
            hosts,
            max_url_length,
        }
    }

    /// Checks a candidate link.
    pub fn check(&self, url: &Url) -> Result<(), ScopeRejection> {
        if url.as_str().len() > self.max_url_length {
            return Err(ScopeRejection::TooLong);
        }
        let Some(host) = url.host_str() else {
            return Err(ScopeRejection::OffSite);
        };
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let same_site = self.hosts.iter().any(|seed| {
            host == *seed
                || host
                    .strip_suffix(seed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        });
        if same_site {
            Ok(())
        } else {
            Err(ScopeRejection::OffSite)
        }
    }

    /// Convenience wrapper over [`SiteScope::check`].
    pub fn contains(&self, url: &Url) -> bool {
        self.check(url).is_ok()
    }
}

/// Counters collected while a crawl runs.
#[derive(Default)]
pub struct CrawlMetrics {
    pages_fetched: AtomicUsize,
    fetch_errors: AtomicUsize,
    parse_fallbacks: AtomicUsize,
    skipped_non_html: AtomicUsize,
    urls_discovered: AtomicUsize,
    urls_enqueued: AtomicUsize,
    duplicates_filtered: AtomicUsize,
    off_site_rejections: AtomicUsize,
    length_rejections: AtomicUsize,
}

impl CrawlMetrics {
    fn record_page_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_parse_fallback(&self) {
        self.parse_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    fn record_non_html(&self) {
        self.skipped_non_html.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejection(&self, rejection: ScopeRejection) {
        match rejection {
            ScopeRejection::OffSite => self.off_site_rejections.fetch_add(1, Ordering::Relaxed),
            ScopeRejection::TooLong => self.length_rejections.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn record_merge(&self, stats: MergeStats) {
        self.urls_discovered
            .fetch_add(stats.discovered, Ordering::Relaxed);
        self.urls_enqueued.fetch_add(stats.enqueued, Ordering::Relaxed);
        self.duplicates_filtered
            .fetch_add(stats.duplicates, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> CrawlStats {
        CrawlStats {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            parse_fallbacks: self.parse_fallbacks.load(Ordering::Relaxed),
            skipped_non_html: self.skipped_non_html.load(Ordering::Relaxed),
            urls_discovered: self.urls_discovered.load(Ordering::Relaxed),
            urls_enqueued: self.urls_enqueued.load(Ordering::Relaxed),
            duplicates_filtered: self.duplicates_filtered.load(Ordering::Relaxed),
            off_site_rejections: self.off_site_rejections.load(Ordering::Relaxed),
            length_rejections: self.length_rejections.load(Ordering::Relaxed),
        }
    }

    fn report(&self, elapsed: Duration, status: CrawlStatus) {
        let stats = self.snapshot();
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let pages_per_sec = stats.pages_fetched as f64 / secs;
        info!(
            ?status,
            elapsed_secs = secs,
            pages_fetched = stats.pages_fetched,
            pages_per_sec,
            fetch_errors = stats.fetch_errors,
            parse_fallbacks = stats.parse_fallbacks,
            skipped_non_html = stats.skipped_non_html,
            urls_discovered = stats.urls_discovered,
            urls_enqueued = stats.urls_enqueued,
            duplicates = stats.duplicates_filtered,
            off_site = stats.off_site_rejections,
            too_long = stats.length_rejections,
            "crawl finished"
        );
    }
}

/// Plain copy of [`CrawlMetrics`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlStats {
    /// Pages fetched successfully.
    pub pages_fetched: usize,
    /// Fetches that failed (transport or status).
    pub fetch_errors: usize,
    /// Pages whose links needed the lenient parser.
    pub parse_fallbacks: usize,
    /// Pages skipped because they were not HTML.
    pub skipped_non_html: usize,
    /// Links seen for the first time.
    pub urls_discovered: usize,
    /// Links queued for a visit.
    pub urls_enqueued: usize,
    /// Links already known when found again.
    pub duplicates_filtered: usize,
    /// Links dropped as off-site.
    pub off_site_rejections: usize,
    /// Links dropped for length.
    pub length_rejections: usize,
}

/// Result of one crawl. Every terminal status carries the full accumulated set.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// Every URL seen, seeds included.
    pub discovered: BTreeSet<Url>,
    /// URLs fetched, including ones that failed.
    pub visited: BTreeSet<Url>,
    /// How the crawl ended.
    pub status: CrawlStatus,
    /// Wall-clock duration.
    pub elapsed: Duration,
    /// Counters gathered along the way.
    pub stats: CrawlStats,
}

/// Runs bounded crawls over a shared fetcher.
#[derive(Clone)]
pub struct SeedCrawler {
    controls: CrawlControls,
    fetcher: Arc<dyn PageFetcher>,
}

impl SeedCrawler {
    /// Creates a crawler; `controls` bound every crawl it runs.
    pub fn new(controls: CrawlControls, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self { controls, fetcher }
    }

    /// Bounds applied to each crawl.
    pub fn controls(&self) -> &CrawlControls {
        &self.controls
    }

    /// Crawls outward from `seeds`, staying on their sites. Never fails: page
    /// errors count as pages with no links.
    pub async fn crawl(&self, seeds: &[Url]) -> CrawlOutcome {
        let start = Instant::now();
        let scope = SiteScope::new(seeds, self.controls.max_url_length());
        let frontier = Frontier::new(seeds.iter().cloned(), &self.controls);
        let metrics = CrawlMetrics::default();

        let workers = (0..self.controls.workers())
            .map(|id| self.worker_loop(id, &frontier, &scope, &metrics));
        join_all(workers).await;

        let snapshot = frontier.snapshot();
        let elapsed = start.elapsed();
        metrics.report(elapsed, snapshot.status);
        if snapshot.pending > 0 {
            debug!(
                pending = snapshot.pending,
                status = ?snapshot.status,
                "crawl stopped with queued urls"
            );
        }

        CrawlOutcome {
            discovered: snapshot.discovered,
            visited: snapshot.visited,
            status: snapshot.status,
            elapsed,
            stats: metrics.snapshot(),
        }
    }

    async fn worker_loop(
        &self,
        worker: usize,
        frontier: &Frontier,
        scope: &SiteScope,
        metrics: &CrawlMetrics,
    ) {
        loop {
            let changed = frontier.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match frontier.claim() {
                Claim::Visit(url) => {
                    debug!(worker, url = %url, "visiting");
                    let links = self.visit(&url, scope, metrics).await;
                    metrics.record_merge(frontier.complete(&url, links));

                    let delay = self.controls.politeness_delay();
                    if !delay.is_zero() && !frontier.status().is_terminal() {
                        sleep(delay).await;
                    }
                }
                Claim::Wait => changed.await,
                Claim::Finished(_) => break,
            }
        }
    }

    async fn visit(&self, url: &Url, scope: &SiteScope, metrics: &CrawlMetrics) -> Vec<Url> {
        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(err) => {
                warn!(url = %url, error = %err, "fetch failed, no links from page");
                metrics.record_fetch_error();
                return Vec::new();
            }
        };
        metrics.record_page_fetched();

        if !page.is_html() {
            debug!(url = %url, content_type = ?page.content_type, "skipping non-html page");
            metrics.record_non_html();
            return Vec::new();
        }

        let extracted = extract_links(&page.body, &page.url);
        if extracted.reparsed {
            metrics.record_parse_fallback();
        }

        extracted
            .links
            .into_iter()
            .filter(|link| match scope.check(link) {
                Ok(()) => true,
                Err(rejection) => {
                    metrics.record_rejection(rejection);
                    false
                }
            })
            .collect()
    }
}
