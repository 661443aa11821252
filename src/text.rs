//! Main-content text extraction used to feed the language classifier.

use crate::fetch::{FetchError, PageFetcher};
use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;
use url::Url;

const EXCLUDED_TAGS: &[&str] = &[
    "script", "style", "template", "noscript", "svg", "nav", "header", "footer", "aside", "form",
];

/// Extraction tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionConfig {
    /// Stop after this many text blocks.
    pub max_blocks: usize,
    /// Texts shorter than this (in chars) count as "no text".
    pub min_chars: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_blocks: 8192,
            min_chars: 1,
        }
    }
}

/// Stateless HTML-to-text service.
#[derive(Clone)]
pub struct TextExtractor {
    config: ExtractionConfig,
    selectors: RootSelectors,
}

impl TextExtractor {
    /// Builds a new extractor.
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            selectors: RootSelectors::new(),
        }
    }

    /// Returns the main text of `body`, blocks separated by blank lines, or `None`
    /// when the page has no usable text.
    pub fn extract(&self, body: &[u8]) -> Option<String> {
        if body.is_empty() {
            return None;
        }

        let decoded = decode_body(body);
        let document = Html::parse_document(&decoded);
        let root = self.selectors.pick_root(&document);

        let mut collector = BlockCollector::new(&self.config);
        collector.walk(root);
        let mut text = collector.finish();
        if text.is_empty() {
            // No block-level structure; fall back to all visible text under the root.
            text = collapse_whitespace(&visible_text(root));
        }

        (text.chars().count() >= self.config.min_chars.max(1)).then_some(text)
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

#[derive(Clone)]
struct RootSelectors {
    article: Selector,
    main: Selector,
    body: Selector,
}

impl RootSelectors {
    fn new() -> Self {
        Self {
            article: Selector::parse("article").expect("article selector"),
            main: Selector::parse("main").expect("main selector"),
            body: Selector::parse("body").expect("body selector"),
        }
    }

    fn pick_root<'a>(&self, document: &'a Html) -> ElementRef<'a> {
        document
            .select(&self.article)
            .next()
            .or_else(|| document.select(&self.main).next())
            .or_else(|| document.select(&self.body).next())
            .unwrap_or_else(|| document.root_element())
    }
}

fn decode_body(bytes: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(bytes)
}

struct BlockCollector<'cfg> {
    config: &'cfg ExtractionConfig,
    blocks: Vec<String>,
}

impl<'cfg> BlockCollector<'cfg> {
    fn new(config: &'cfg ExtractionConfig) -> Self {
        Self {
            config,
            blocks: Vec::new(),
        }
    }

    fn walk(&mut self, root: ElementRef<'_>) {
        for element in root.descendent_elements() {
            if self.blocks.len() >= self.config.max_blocks {
                break;
            }
            self.maybe_record(element);
        }
    }

    fn maybe_record(&mut self, element: ElementRef<'_>) {
        let tag = element.value().name();
        let preserve_newlines = match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "p" | "li" | "blockquote" | "td" => false,
            "pre" => true,
            _ => return,
        };
        if is_excluded(element) || has_block_ancestor(element) {
            return;
        }

        let raw = visible_text(element);
        let text = if preserve_newlines {
            collapse_newlines(&raw)
        } else {
            collapse_whitespace(&raw)
        };
        if !text.is_empty() {
            self.blocks.push(text);
        }
    }

    fn finish(self) -> String {
        self.blocks.join("\n\n")
    }
}

fn is_excluded(element: ElementRef<'_>) -> bool {
    EXCLUDED_TAGS.contains(&element.value().name())
        || element.ancestors().any(|node| {
            node.value()
                .as_element()
                .is_some_and(|el| EXCLUDED_TAGS.contains(&el.name()))
        })
}

// Nested blocks (a <p> inside an <li>) are already covered by the outer block.
fn has_block_ancestor(element: ElementRef<'_>) -> bool {
    element.ancestors().any(|node| {
        node.value().as_element().is_some_and(|el| {
            matches!(el.name(), "p" | "li" | "blockquote" | "pre" | "td")
        })
    })
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut raw = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| EXCLUDED_TAGS.contains(&el.name()))
        });
        if !hidden {
            raw.push_str(text);
            raw.push(' ');
        }
    }
    raw
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim().to_string()
}

fn collapse_newlines(input: &str) -> String {
    input
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Produces the text of a page for classification.
#[async_trait]
pub trait TextSource: Send + Sync {
    /// Fetches `url` and returns its main text, or `None` when there is none.
    async fn scrape(&self, url: &Url) -> Result<Option<String>, FetchError>;
}

/// Fetches over HTTP and extracts with [`TextExtractor`].
#[derive(Clone)]
pub struct HttpTextSource {
    fetcher: Arc<dyn PageFetcher>,
    extractor: TextExtractor,
}

impl HttpTextSource {
    /// Wraps a fetcher and extractor.
    pub fn new(fetcher: Arc<dyn PageFetcher>, extractor: TextExtractor) -> Self {
        Self { fetcher, extractor }
    }
}

#[async_trait]
impl TextSource for HttpTextSource {
    async fn scrape(&self, url: &Url) -> Result<Option<String>, FetchError> {
        let page = self.fetcher.fetch(url).await?;
        if !page.is_html() {
            debug!(url = %url, content_type = ?page.content_type, "not html, no text");
            return Ok(None);
        }
        let text = self.extractor.extract(&page.body);
        if text.is_none() {
            debug!(url = %url, "no extractable text");
        }
        Ok(text)
    }
}
