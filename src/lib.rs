#![warn(missing_docs)]
//! Core library entry points for the seedcrawl harvester.

pub mod classifier;
pub mod controls;
pub mod crawler;
pub mod denylist;
pub mod fetch;
pub mod frontier;
pub mod html;
pub mod pipeline;
pub mod report;
pub mod runtime;
pub mod seeds;
pub mod text;

pub use classifier::{
    parse_label, ClassifierError, FastTextProcess, LanguageClassifier, LanguageModel, Prediction,
    RawPrediction,
};
pub use controls::{
    Cli, ConcurrencyStrategy, ConfigError, CrawlControls, CrawlMode, FetchSettings,
    FilterControls, HarvestConfig,
};
pub use crawler::{CrawlOutcome, CrawlStats, SeedCrawler, SiteScope};
pub use denylist::DomainFilter;
pub use fetch::{FetchError, FetchedPage, HttpFetcher, PageFetcher};
pub use frontier::{CrawlStatus, Frontier};
pub use html::{extract_links, ExtractedLinks};
pub use pipeline::{LabelTarget, LanguageFilter, LinkClassification};
pub use report::{write_json_atomic, CrawlMetadata, ReportError};
pub use runtime::{run as run_harvest, BatchSummary, Harvester, LabelSummary};
pub use seeds::{SeedLoadError, SeedRecord, SeedSource, Strictness};
pub use text::{HttpTextSource, TextExtractor, TextSource};
