//! Link extraction built on `lol_html`, with a `scraper` reparse as fallback.

use lol_html::{element, HtmlRewriter, OutputSink, Settings};
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;
use tracing::warn;
use url::Url;

const STREAM_CHUNK_BYTES: usize = 16 * 1024;

/// Links found on one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedLinks {
    /// Absolute `http(s)` targets, fragments removed.
    pub links: BTreeSet<Url>,
    /// True when the streaming pass failed and the lenient parser was used.
    pub reparsed: bool,
}

/// Extracts every absolute `http(s)` link from `body`, resolved against `base`.
///
/// The streaming rewriter runs first; if it rejects the markup the body is
/// reparsed with the tree builder, which accepts anything. Never fails.
pub fn extract_links(body: &[u8], base: &Url) -> ExtractedLinks {
    match extract_links_streaming(body, base) {
        Ok(links) => ExtractedLinks {
            links,
            reparsed: false,
        },
        Err(err) => {
            warn!(url = %base, error = %err, "streaming link extraction failed, reparsing");
            ExtractedLinks {
                links: extract_links_lenient(body, base),
                reparsed: true,
            }
        }
    }
}

/// Streams `body` through `lol_html`, collecting anchor targets.
pub fn extract_links_streaming(body: &[u8], base: &Url) -> Result<BTreeSet<Url>, LinkExtractError> {
    let mut hrefs: Vec<String> = Vec::new();
    {
        let handler = element!("a[href]", |el| {
            if let Some(href) = el.get_attribute("href") {
                hrefs.push(href);
            }
            Ok(())
        });

        let mut rewriter = HtmlRewriter::new(
            Settings {
                element_content_handlers: vec![handler],
                ..Settings::default()
            },
            NoopSink,
        );

        for chunk in body.chunks(STREAM_CHUNK_BYTES) {
            rewriter.write(chunk).map_err(LinkExtractError::Rewrite)?;
        }
        rewriter.end().map_err(LinkExtractError::Rewrite)?;
    }

    Ok(hrefs
        .iter()
        .filter_map(|href| resolve_link(base, href))
        .collect())
}

/// Parses `body` into a full DOM (lossy UTF-8) and collects anchor targets.
pub fn extract_links_lenient(body: &[u8], base: &Url) -> BTreeSet<Url> {
    let decoded = String::from_utf8_lossy(body);
    let document = Html::parse_document(&decoded);
    let anchors = Selector::parse("a[href]").expect("anchor selector");
    document
        .select(&anchors)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter_map(|href| resolve_link(base, href))
        .collect()
}

/// Resolves `href` against `base`, keeping only `http`/`https` and dropping the fragment.
pub fn resolve_link(base: &Url, href: &str) -> Option<Url> {
    let mut url = base.join(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Errors surfaced by the streaming pass.
#[derive(Debug)]
pub enum LinkExtractError {
    /// The rewriter gave up on the markup.
    Rewrite(lol_html::errors::RewritingError),
}

impl fmt::Display for LinkExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rewrite(err) => write!(f, "html rewrite error: {err}"),
        }
    }
}

impl Error for LinkExtractError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Rewrite(err) => Some(err),
        }
    }
}

struct NoopSink;

impl OutputSink for NoopSink {
    fn handle_chunk(&mut self, _chunk: &[u8]) {}
}
