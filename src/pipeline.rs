//! Scrape-and-classify filter over crawled links.

use crate::classifier::{LanguageClassifier, Prediction};
use crate::controls::FilterControls;
use crate::text::TextSource;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// The language a run is looking for.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelTarget {
    /// Wanted `lang_Script` label.
    pub label: String,
    /// Inclusive lower bound on confidence.
    pub min_confidence: f64,
}

impl LabelTarget {
    /// Creates a target.
    pub fn new(label: impl Into<String>, min_confidence: f64) -> Self {
        Self {
            label: label.into(),
            min_confidence,
        }
    }

    /// Acceptance predicate: same label and confidence at or above the threshold.
    pub fn accepts(&self, label: Option<&str>, confidence: Option<f64>) -> bool {
        match (label, confidence) {
            (Some(label), Some(confidence)) => {
                label == self.label && confidence >= self.min_confidence
            }
            _ => false,
        }
    }
}

/// Classification of a single crawled link, as written to the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkClassification {
    /// Page URL.
    pub link: String,
    /// Predicted label, `None` when fetching or classifying failed.
    #[serde(rename = "lid_label")]
    pub label: Option<String>,
    /// Confidence of `label`.
    #[serde(rename = "lid_confidence")]
    pub confidence: Option<f64>,
    /// Extracted page text, kept only on request.
    #[serde(
        rename = "scraped_text",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub text: Option<String>,
}

impl LinkClassification {
    fn new(link: &Url, prediction: Prediction, text: Option<String>) -> Self {
        Self {
            link: link.to_string(),
            label: prediction.label,
            confidence: prediction.confidence,
            text,
        }
    }

    fn unknown(link: &Url) -> Self {
        Self::new(link, Prediction::default(), None)
    }

    /// True when `target` accepts this classification.
    pub fn is_accepted_by(&self, target: &LabelTarget) -> bool {
        target.accepts(self.label.as_deref(), self.confidence)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FilterTally {
    classified: usize,
    no_text: usize,
    fetch_failures: usize,
    accepted: usize,
}

enum Scraped {
    Extracted,
    Empty,
    Failed,
}

/// Keeps the crawled links whose page text is in the target language.
#[derive(Clone)]
pub struct LanguageFilter {
    source: Arc<dyn TextSource>,
    classifier: LanguageClassifier,
    controls: FilterControls,
}

impl LanguageFilter {
    /// Builds a filter over a text source and a shared classifier.
    pub fn new(
        source: Arc<dyn TextSource>,
        classifier: LanguageClassifier,
        controls: FilterControls,
    ) -> Self {
        Self {
            source,
            classifier,
            controls,
        }
    }

    /// Scrapes and classifies one link. Never fails; failures leave the label empty.
    pub async fn classify(&self, link: &Url) -> LinkClassification {
        let (classification, _) = self.classify_inner(link).await;
        classification
    }

    async fn classify_inner(&self, link: &Url) -> (LinkClassification, Scraped) {
        let text = match self.source.scrape(link).await {
            Ok(Some(text)) => text,
            Ok(None) => return (LinkClassification::unknown(link), Scraped::Empty),
            Err(err) => {
                warn!(url = %link, error = %err, "text extraction failed");
                return (LinkClassification::unknown(link), Scraped::Failed);
            }
        };

        let prediction = self.classifier.predict(Some(&text)).await;
        debug!(
            url = %link,
            label = prediction.label.as_deref().unwrap_or("-"),
            confidence = prediction.confidence.unwrap_or_default(),
            "classified"
        );
        let kept = self.controls.keep_text.then_some(text);
        (LinkClassification::new(link, prediction, kept), Scraped::Extracted)
    }

    /// Classifies every link and returns the accepted ones sorted by link.
    /// Links without extractable text are dropped, not reported as errors.
    pub async fn run(
        &self,
        links: impl IntoIterator<Item = Url>,
        target: &LabelTarget,
    ) -> Vec<LinkClassification> {
        let mut results = stream::iter(links)
            .map(|link| async move { self.classify_inner(&link).await })
            .buffer_unordered(self.controls.workers());

        let mut tally = FilterTally::default();
        let mut accepted = Vec::new();
        while let Some((classification, scraped)) = results.next().await {
            tally.classified += 1;
            match scraped {
                Scraped::Failed => tally.fetch_failures += 1,
                Scraped::Empty => tally.no_text += 1,
                Scraped::Extracted => {}
            }
            if classification.is_accepted_by(target) {
                tally.accepted += 1;
                accepted.push(classification);
            }
        }
        accepted.sort_by(|a, b| a.link.cmp(&b.link));

        info!(
            label = %target.label,
            classified = tally.classified,
            accepted = tally.accepted,
            no_text = tally.no_text,
            fetch_failures = tally.fetch_failures,
            "language filter finished"
        );
        accepted
    }
}
