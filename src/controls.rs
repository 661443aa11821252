//! Crawl bounds, filter thresholds and the command-line surface that builds them.

use crate::classifier::ClassifierError;
use crate::seeds::Strictness;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_USER_AGENT: &str = "seedcrawl/0.1 (+https://github.com/seedcrawl/seedcrawl)";
const LANGUAGE_PLACEHOLDER: &str = "{language}";

/// How fetch and classify work is scheduled.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConcurrencyStrategy {
    /// One page at a time, strict breadth-first order.
    Sequential,
    /// A bounded pool of concurrent workers.
    Pool,
}

/// Whether seeds are crawled as independent sites or as one combined frontier.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CrawlMode {
    /// One crawl per seed, results unioned afterwards.
    PerSeed,
    /// A single crawl whose frontier starts with every seed.
    Combined,
}

/// Tunable knobs that bound a single crawl.
#[derive(Clone, Debug, PartialEq)]
pub struct CrawlControls {
    max_pages: usize,
    max_time: Duration,
    politeness_delay: Duration,
    max_url_length: usize,
    growth_factor: usize,
    trap_check_interval: usize,
    strategy: ConcurrencyStrategy,
    pool_size: usize,
}

impl CrawlControls {
    /// Constructs controls with the given page and wall-clock budgets and default everything else.
    pub fn new(max_pages: usize, max_time: Duration) -> Self {
        Self {
            max_pages,
            max_time,
            ..Self::default()
        }
    }

    /// Sets the delay each worker waits after finishing a page.
    pub fn with_politeness_delay(mut self, delay: Duration) -> Self {
        self.politeness_delay = delay;
        self
    }

    /// Sets the longest URL accepted into the frontier.
    pub fn with_max_url_length(mut self, max_url_length: usize) -> Self {
        self.max_url_length = max_url_length;
        self
    }

    /// Tunes the runaway-growth heuristic.
    pub fn with_trap_heuristic(mut self, growth_factor: usize, check_interval: usize) -> Self {
        self.growth_factor = growth_factor;
        self.trap_check_interval = check_interval.max(1);
        self
    }

    /// Selects the scheduling strategy and pool size.
    pub fn with_strategy(mut self, strategy: ConcurrencyStrategy, pool_size: usize) -> Self {
        self.strategy = strategy;
        self.pool_size = pool_size.max(1);
        self
    }

    /// Maximum number of pages visited per crawl.
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Soft wall-clock budget, checked before each dequeue.
    pub fn max_time(&self) -> Duration {
        self.max_time
    }

    /// Time a worker waits between successive fetches.
    pub fn politeness_delay(&self) -> Duration {
        self.politeness_delay
    }

    /// Longest URL that may enter the frontier.
    pub fn max_url_length(&self) -> usize {
        self.max_url_length
    }

    /// Frontier-to-visited ratio above which a trap is suspected.
    pub fn growth_factor(&self) -> usize {
        self.growth_factor
    }

    /// Number of visited pages between trap checks.
    pub fn trap_check_interval(&self) -> usize {
        self.trap_check_interval
    }

    /// Scheduling strategy.
    pub fn strategy(&self) -> ConcurrencyStrategy {
        self.strategy
    }

    /// Number of concurrent fetch workers implied by the strategy.
    pub fn workers(&self) -> usize {
        match self.strategy {
            ConcurrencyStrategy::Sequential => 1,
            ConcurrencyStrategy::Pool => self.pool_size,
        }
    }
}

impl Default for CrawlControls {
    fn default() -> Self {
        Self {
            max_pages: 100,
            max_time: Duration::from_secs(600),
            politeness_delay: Duration::from_millis(1000),
            max_url_length: 2048,
            growth_factor: 10,
            trap_check_interval: 10,
            strategy: ConcurrencyStrategy::Sequential,
            pool_size: 8,
        }
    }
}

/// Acceptance threshold and scheduling for the language filter.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterControls {
    /// Inclusive lower bound on classifier confidence.
    pub min_confidence: f64,
    /// Scheduling strategy for classification.
    pub strategy: ConcurrencyStrategy,
    /// Pool size when `strategy` is `Pool`.
    pub pool_size: usize,
    /// Keep the scraped text on accepted records.
    pub keep_text: bool,
}

impl FilterControls {
    /// Number of links classified concurrently.
    pub fn workers(&self) -> usize {
        match self.strategy {
            ConcurrencyStrategy::Sequential => 1,
            ConcurrencyStrategy::Pool => self.pool_size.max(1),
        }
    }
}

impl Default for FilterControls {
    fn default() -> Self {
        Self {
            min_confidence: 0.8,
            strategy: ConcurrencyStrategy::Sequential,
            pool_size: 8,
            keep_text: false,
        }
    }
}

/// HTTP client settings shared by link and text fetches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchSettings {
    /// Per-request timeout, independent of the crawl budget.
    pub request_timeout: Duration,
    /// User-Agent header sent with every request.
    pub user_agent: String,
    /// Bodies are truncated after this many bytes.
    pub max_body_bytes: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            max_body_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Startup failures. These abort the process before any crawl work begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No language labels were requested.
    #[error("no language labels configured")]
    NoLabels,
    /// The language-identification model file does not exist.
    #[error("language model not found at {0}")]
    MissingModel(PathBuf),
    /// The domain denylist file does not exist.
    #[error("domain denylist not found at {0}")]
    MissingDenylist(PathBuf),
    /// The denylist exists but could not be read.
    #[error("failed to read domain denylist {path}: {source}")]
    UnreadableDenylist {
        /// Denylist location.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// A numeric knob is outside its valid range.
    #[error("invalid value for {name}: {reason}")]
    InvalidValue {
        /// Name of the offending knob.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
    /// The output file name template lacks the language placeholder.
    #[error("output file name {0:?} must contain {{language}} when several labels run")]
    AmbiguousOutputName(String),
    /// The fastText process could not be started or did not answer.
    #[error("language model did not answer a first prediction: {0}")]
    Classifier(#[source] ClassifierError),
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Fully resolved configuration for a harvest run, built once at startup.
#[derive(Clone, Debug)]
pub struct HarvestConfig {
    /// Language labels to process, in order.
    pub labels: Vec<String>,
    /// Directory holding `{label}.json` seed files.
    pub input_dir: PathBuf,
    /// Directory receiving accepted-link files and `meta_data/`.
    pub output_dir: PathBuf,
    /// Accepted-link file name template; `{language}` is replaced by the label.
    pub output_file_name: String,
    /// fastText model location.
    pub model_path: PathBuf,
    /// fastText executable.
    pub fasttext_bin: PathBuf,
    /// Domain denylist location.
    pub denylist_path: PathBuf,
    /// Per-crawl bounds.
    pub crawl: CrawlControls,
    /// Language filter threshold and scheduling.
    pub filter: FilterControls,
    /// HTTP settings.
    pub fetch: FetchSettings,
    /// Per-seed or combined crawling.
    pub crawl_mode: CrawlMode,
    /// Seed sites crawled concurrently in per-seed mode.
    pub seed_concurrency: usize,
    /// Seed validation policy.
    pub strictness: Strictness,
}

impl HarvestConfig {
    /// Seed file for `label`.
    pub fn seed_path(&self, label: &str) -> PathBuf {
        self.input_dir.join(format!("{label}.json"))
    }

    /// Accepted-link output file for `label`.
    pub fn output_path(&self, label: &str) -> PathBuf {
        self.output_dir
            .join(self.output_file_name.replace(LANGUAGE_PLACEHOLDER, label))
    }

    /// Metadata report file for `label`.
    pub fn metadata_path(&self, label: &str) -> PathBuf {
        self.output_dir
            .join("meta_data")
            .join(format!("{label}_meta_data.json"))
    }

    /// Checks everything that must hold before crawling starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.labels.is_empty() {
            return Err(ConfigError::NoLabels);
        }
        if !(0.0..=1.0).contains(&self.filter.min_confidence) {
            return Err(ConfigError::InvalidValue {
                name: "min_confidence",
                reason: format!("{} is outside [0, 1]", self.filter.min_confidence),
            });
        }
        if self.crawl.max_url_length() == 0 {
            return Err(ConfigError::InvalidValue {
                name: "max_url_length",
                reason: "must be positive".to_string(),
            });
        }
        if self.labels.len() > 1 && !self.output_file_name.contains(LANGUAGE_PLACEHOLDER) {
            return Err(ConfigError::AmbiguousOutputName(
                self.output_file_name.clone(),
            ));
        }
        require_file(&self.model_path, ConfigError::MissingModel)?;
        require_file(&self.denylist_path, ConfigError::MissingDenylist)?;
        Ok(())
    }
}

fn require_file(path: &Path, missing: fn(PathBuf) -> ConfigError) -> Result<(), ConfigError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(missing(path.to_path_buf()))
    }
}

/// Command-line interface for the harvest binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "seedcrawl",
    about = "Expand language-labelled seed links into a same-site, language-filtered link set"
)]
pub struct Cli {
    /// Language labels to process (e.g. urd_Latn), comma separated
    #[arg(long, env = "SEEDCRAWL_LABELS")]
    pub labels: String,

    /// Directory containing one `{label}.json` seed file per label
    #[arg(long, env = "SEEDCRAWL_INPUT_DIR", default_value = "data/seeds")]
    pub input_dir: PathBuf,

    /// Directory receiving crawled output and metadata reports
    #[arg(long, env = "SEEDCRAWL_OUTPUT_DIR", default_value = "data/output")]
    pub output_dir: PathBuf,

    /// Output file name template; `{language}` is replaced by the label
    #[arg(
        long,
        env = "SEEDCRAWL_OUTPUT_FILE_NAME",
        default_value = "{language}_crawled_output.json"
    )]
    pub output_file_name: String,

    /// fastText language-identification model
    #[arg(long, env = "SEEDCRAWL_MODEL_PATH", default_value = "model_v3.bin")]
    pub model_path: PathBuf,

    /// fastText executable used for inference
    #[arg(long, env = "SEEDCRAWL_FASTTEXT_BIN", default_value = "fasttext")]
    pub fasttext_bin: PathBuf,

    /// Denylisted domains, one substring per line
    #[arg(long, env = "SEEDCRAWL_DENYLIST", default_value = "domains.txt")]
    pub denylist: PathBuf,

    /// Minimum classifier confidence
    #[arg(long, env = "SEEDCRAWL_MIN_CONFIDENCE", default_value_t = 0.8)]
    pub min_confidence: f64,

    /// Maximum pages visited per crawl
    #[arg(long, env = "SEEDCRAWL_MAX_PAGES", default_value_t = 100)]
    pub max_pages: usize,

    /// Wall-clock budget per crawl in seconds
    #[arg(long, env = "SEEDCRAWL_MAX_TIME_SECS", default_value_t = 600)]
    pub max_time_secs: u64,

    /// Milliseconds each worker waits between fetches
    #[arg(long, env = "SEEDCRAWL_CRAWL_DELAY_MS", default_value_t = 1000)]
    pub crawl_delay_ms: u64,

    /// Per-request timeout in seconds
    #[arg(long, env = "SEEDCRAWL_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Longest URL accepted into the frontier
    #[arg(long, env = "SEEDCRAWL_MAX_URL_LENGTH", default_value_t = 2048)]
    pub max_url_length: usize,

    /// Stop when the frontier exceeds visited pages times this factor
    #[arg(long, env = "SEEDCRAWL_GROWTH_FACTOR", default_value_t = 10)]
    pub growth_factor: usize,

    /// Visited pages between runaway-growth checks
    #[arg(long, env = "SEEDCRAWL_TRAP_CHECK_INTERVAL", default_value_t = 10)]
    pub trap_check_interval: usize,

    /// Response bodies are truncated after this many bytes
    #[arg(long, env = "SEEDCRAWL_MAX_BODY_BYTES", default_value_t = 5 * 1024 * 1024)]
    pub max_body_bytes: usize,

    /// User-Agent header
    #[arg(long, env = "SEEDCRAWL_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Scheduling strategy for fetching and classification
    #[arg(long, env = "SEEDCRAWL_STRATEGY", value_enum, default_value = "sequential")]
    pub strategy: ConcurrencyStrategy,

    /// Fetch workers per crawl (pool strategy)
    #[arg(long, env = "SEEDCRAWL_CRAWL_WORKERS", default_value_t = 8)]
    pub crawl_workers: usize,

    /// Concurrent classifications (pool strategy)
    #[arg(long, env = "SEEDCRAWL_CLASSIFY_WORKERS", default_value_t = 8)]
    pub classify_workers: usize,

    /// Seed sites crawled at once in per-seed mode (pool strategy)
    #[arg(long, env = "SEEDCRAWL_SEED_CONCURRENCY", default_value_t = 4)]
    pub seed_concurrency: usize,

    /// Crawl each seed site separately or all seeds as one frontier
    #[arg(long, env = "SEEDCRAWL_CRAWL_MODE", value_enum, default_value = "per-seed")]
    pub crawl_mode: CrawlMode,

    /// Keep scraped page text in accepted records
    #[arg(long, env = "SEEDCRAWL_KEEP_TEXT", default_value_t = false)]
    pub keep_text: bool,

    /// Reject the whole seed file when any record is malformed
    #[arg(long, env = "SEEDCRAWL_STRICT_SEEDS", default_value_t = false)]
    pub strict_seeds: bool,

    /// Log filter directive (falls back to RUST_LOG, then `info`)
    #[arg(long, env = "SEEDCRAWL_LOG")]
    pub log_filter: Option<String>,
}

impl Cli {
    /// Converts the parsed CLI into a validated `HarvestConfig`.
    pub fn build_config(&self) -> Result<HarvestConfig, ConfigError> {
        let crawl = CrawlControls::new(self.max_pages, Duration::from_secs(self.max_time_secs))
            .with_politeness_delay(Duration::from_millis(self.crawl_delay_ms))
            .with_max_url_length(self.max_url_length)
            .with_trap_heuristic(self.growth_factor, self.trap_check_interval)
            .with_strategy(self.strategy, self.crawl_workers);

        let config = HarvestConfig {
            labels: self.labels_vec(),
            input_dir: self.input_dir.clone(),
            output_dir: self.output_dir.clone(),
            output_file_name: self.output_file_name.clone(),
            model_path: self.model_path.clone(),
            fasttext_bin: self.fasttext_bin.clone(),
            denylist_path: self.denylist.clone(),
            crawl,
            filter: FilterControls {
                min_confidence: self.min_confidence,
                strategy: self.strategy,
                pool_size: self.classify_workers,
                keep_text: self.keep_text,
            },
            fetch: FetchSettings {
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                user_agent: self.user_agent.clone(),
                max_body_bytes: self.max_body_bytes,
            },
            crawl_mode: self.crawl_mode,
            seed_concurrency: match self.strategy {
                ConcurrencyStrategy::Sequential => 1,
                ConcurrencyStrategy::Pool => self.seed_concurrency.max(1),
            },
            strictness: if self.strict_seeds {
                Strictness::Strict
            } else {
                Strictness::Lenient
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn labels_vec(&self) -> Vec<String> {
        self.labels
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
