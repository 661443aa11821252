use async_trait::async_trait;
use pretty_assertions::assert_eq;
use seedcrawl::{
    ClassifierError, ConfigError, CrawlControls, CrawlMetadata, CrawlMode, DomainFilter, FetchError,
    FetchSettings, FetchedPage, FilterControls, HarvestConfig, Harvester, LanguageModel,
    LinkClassification, PageFetcher, RawPrediction, Strictness, TextSource,
};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Serves fixed HTML bodies; unknown URLs fail like a refused connection.
struct FixtureSite {
    pages: HashMap<String, String>,
}

#[async_trait]
impl PageFetcher for FixtureSite {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        self.pages
            .get(url.as_str())
            .map(|body| FetchedPage::ok(url.clone(), body.as_bytes()))
            .ok_or_else(|| FetchError::Other {
                url: url.to_string(),
                message: "connection refused".to_string(),
            })
    }
}

/// Page text is `"<label> <score>"`, read back by [`EchoModel`].
struct FixtureText {
    texts: HashMap<String, String>,
}

#[async_trait]
impl TextSource for FixtureText {
    async fn scrape(&self, url: &Url) -> Result<Option<String>, FetchError> {
        if url.host_str() == Some("boom.test") {
            panic!("scraper blew up on {url}");
        }
        Ok(self.texts.get(url.as_str()).cloned())
    }
}

struct EchoModel;

#[async_trait]
impl LanguageModel for EchoModel {
    async fn predict(&self, text: &str) -> Result<RawPrediction, ClassifierError> {
        let (label, score) = text
            .split_once(' ')
            .ok_or_else(|| ClassifierError::Malformed(text.to_string()))?;
        let confidence = score
            .parse()
            .map_err(|_| ClassifierError::Malformed(text.to_string()))?;
        Ok(RawPrediction {
            raw_label: format!("__label__{label}"),
            confidence,
        })
    }
}

fn config(root: &Path, labels: &[&str], max_pages: usize) -> HarvestConfig {
    HarvestConfig {
        labels: labels.iter().map(|l| l.to_string()).collect(),
        input_dir: root.join("seeds"),
        output_dir: root.join("out"),
        output_file_name: "{language}_crawled_output.json".to_string(),
        model_path: root.join("model.bin"),
        fasttext_bin: "fasttext".into(),
        denylist_path: root.join("domains.txt"),
        crawl: CrawlControls::new(max_pages, Duration::from_secs(30))
            .with_politeness_delay(Duration::ZERO),
        filter: FilterControls::default(),
        fetch: FetchSettings::default(),
        crawl_mode: CrawlMode::PerSeed,
        seed_concurrency: 2,
        strictness: Strictness::Lenient,
    }
}

fn write_seeds(root: &Path, label: &str, body: &str) {
    let dir = root.join("seeds");
    fs::create_dir_all(&dir).expect("seed dir");
    fs::write(dir.join(format!("{label}.json")), body).expect("write seeds");
}

fn harvester(config: HarvestConfig, denylist: DomainFilter) -> Harvester {
    let pages = [
        (
            "http://a.test/x",
            r#"<a href="/y">y</a><a href="https://elsewhere.test/">off</a>"#,
        ),
        ("http://a.test/y", r#"<a href="/x">back</a>"#),
        ("http://b.test/", r#"<a href="/en">english</a>"#),
        ("http://b.test/en", ""),
        ("http://spam.test/", r#"<a href="/more">more</a>"#),
    ];
    let texts = [
        ("http://a.test/x", "xx_Yyyy 0.95"),
        ("http://a.test/y", "xx_Yyyy 0.9"),
        ("http://b.test/", "xx_Yyyy 0.8"),
        ("http://b.test/en", "eng_Latn 0.99"),
        ("http://spam.test/", "xx_Yyyy 0.99"),
    ];
    Harvester::new(
        config,
        denylist,
        Arc::new(FixtureSite {
            pages: pages
                .iter()
                .map(|(u, b)| (u.to_string(), b.to_string()))
                .collect(),
        }),
        Arc::new(FixtureText {
            texts: texts
                .iter()
                .map(|(u, t)| (u.to_string(), t.to_string()))
                .collect(),
        }),
        Arc::new(EchoModel),
    )
}

fn read_output(path: &Path) -> Vec<LinkClassification> {
    serde_json::from_str(&fs::read_to_string(path).expect("output exists")).expect("output json")
}

fn read_metadata(path: &Path) -> CrawlMetadata {
    serde_json::from_str(&fs::read_to_string(path).expect("metadata exists"))
        .expect("metadata json")
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test(flavor = "current_thread")]
async fn single_seed_expands_and_accepts_same_language_pages() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_seeds(
        dir.path(),
        "xx_Yyyy",
        r#"[{"link": "http://a.test/x", "predicted_lid": "xx_Yyyy", "lid_confidence": 0.95}]"#,
    );
    let harvester = harvester(
        config(dir.path(), &["xx_Yyyy"], 10),
        DomainFilter::default(),
    );

    let summary = harvester.run_label("xx_Yyyy").await.expect("label runs");
    assert_eq!(summary.seeds_crawled, 1);
    assert_eq!(summary.discovered, 2);
    assert_eq!(summary.accepted, 2);

    let output = read_output(&summary.output_path);
    let links: Vec<_> = output.iter().map(|c| c.link.as_str()).collect();
    assert_eq!(links, vec!["http://a.test/x", "http://a.test/y"]);
    assert_eq!(output[1].confidence, Some(0.9));

    let meta = read_metadata(&summary.metadata_path);
    assert_eq!(meta.unique_links, set(&["http://a.test/y"]));
    assert!(meta.rejected_links.is_empty());
    assert_eq!(meta.active_seed_urls, set(&["http://a.test/x"]));
    assert_eq!(meta.all_website_links_len, 2);
}

#[tokio::test(flavor = "current_thread")]
async fn low_confidence_and_denied_seeds_are_not_crawled() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_seeds(
        dir.path(),
        "xx_Yyyy",
        r#"[
            {"link": "http://a.test/x", "predicted_lid": "xx_Yyyy", "lid_confidence": 0.95},
            {"link": "http://b.test/", "predicted_lid": "xx_Yyyy", "lid_confidence": 0.8},
            {"link": "http://spam.test/", "predicted_lid": "xx_Yyyy", "lid_confidence": 0.99},
            {"title": "no link at all", "predicted_lid": "xx_Yyyy", "lid_confidence": 0.99}
        ]"#,
    );
    let harvester = harvester(
        config(dir.path(), &["xx_Yyyy"], 10),
        DomainFilter::from_domains(["spam.test"]),
    );

    let summary = harvester.run_label("xx_Yyyy").await.expect("label runs");
    assert_eq!(summary.seeds_loaded, 3);
    assert_eq!(summary.seeds_denied, 1);
    // b.test sits exactly at the threshold; seeds must be strictly above it.
    assert_eq!(summary.seeds_crawled, 1);

    let output = read_output(&summary.output_path);
    assert!(output.iter().all(|c| !c.link.contains("spam.test")));
    assert!(output.iter().all(|c| !c.link.contains("b.test")));
}

#[tokio::test(flavor = "current_thread")]
async fn combined_mode_rejects_seed_in_wrong_language() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_seeds(
        dir.path(),
        "xx_Yyyy",
        r#"[
            {"link": "http://a.test/x", "predicted_lid": "xx_Yyyy", "lid_confidence": 0.95},
            {"link": "http://b.test/en", "predicted_lid": "xx_Yyyy", "lid_confidence": 0.9}
        ]"#,
    );
    let mut config = config(dir.path(), &["xx_Yyyy"], 10);
    config.crawl_mode = CrawlMode::Combined;
    let harvester = harvester(config, DomainFilter::default());

    let summary = harvester.run_label("xx_Yyyy").await.expect("label runs");
    assert_eq!(summary.crawl_statuses.len(), 1);

    let meta = read_metadata(&summary.metadata_path);
    assert_eq!(meta.rejected_links, set(&["http://b.test/en"]));
    assert_eq!(meta.active_seed_urls, set(&["http://a.test/x"]));
    assert_eq!(meta.unique_links, set(&["http://a.test/y"]));
}

#[tokio::test(flavor = "current_thread")]
async fn zero_page_budget_still_classifies_seeds() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_seeds(
        dir.path(),
        "xx_Yyyy",
        r#"[{"link": "http://a.test/x", "predicted_lid": "xx_Yyyy", "lid_confidence": 0.95}]"#,
    );
    let harvester = harvester(config(dir.path(), &["xx_Yyyy"], 0), DomainFilter::default());

    let summary = harvester.run_label("xx_Yyyy").await.expect("label runs");
    assert_eq!(summary.discovered, 1);

    let meta = read_metadata(&summary.metadata_path);
    assert_eq!(meta.all_website_links, set(&["http://a.test/x"]));
    assert!(meta.unique_links.is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn batch_survives_missing_input_and_panicking_label() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_seeds(
        dir.path(),
        "xx_Yyyy",
        r#"[{"link": "http://a.test/x", "predicted_lid": "xx_Yyyy", "lid_confidence": 0.95}]"#,
    );
    write_seeds(
        dir.path(),
        "zz_Zzzz",
        r#"[{"link": "http://boom.test/", "predicted_lid": "zz_Zzzz", "lid_confidence": 0.95}]"#,
    );
    let labels = ["qq_Qqqq", "zz_Zzzz", "xx_Yyyy"];
    let harvester = Arc::new(harvester(
        config(dir.path(), &labels, 0),
        DomainFilter::default(),
    ));

    let summary = harvester.run_batch().await;
    assert_eq!(summary.failed, vec!["qq_Qqqq", "zz_Zzzz"]);
    assert_eq!(summary.completed.len(), 1);
    assert_eq!(summary.completed[0].label, "xx_Yyyy");
    assert!(dir
        .path()
        .join("out/xx_Yyyy_crawled_output.json")
        .is_file());
    assert!(!dir.path().join("out/qq_Qqqq_crawled_output.json").exists());
}

fn write_startup_files(root: &Path) {
    fs::write(root.join("model.bin"), b"not a real model").expect("model file");
    fs::write(root.join("domains.txt"), "spam.test\n").expect("denylist");
}

#[tokio::test(flavor = "current_thread")]
async fn startup_fails_when_classifier_cannot_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_startup_files(dir.path());
    let mut config = config(dir.path(), &["xx_Yyyy"], 10);
    config.fasttext_bin = "/nonexistent/fasttext".into();

    match Harvester::from_config(config).await {
        Err(ConfigError::Classifier(ClassifierError::Spawn { .. })) => {}
        Err(other) => panic!("expected classifier spawn error, got {other}"),
        Ok(_) => panic!("harvester started without a working classifier"),
    }
}

#[cfg(unix)]
#[tokio::test(flavor = "current_thread")]
async fn startup_succeeds_when_classifier_answers() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir");
    write_startup_files(dir.path());
    let script = dir.path().join("fasttext");
    fs::write(
        &script,
        "#!/bin/sh\nwhile read -r line; do echo \"__label__xx_Yyyy 0.5\"; done\n",
    )
    .expect("write script");
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod script");

    let mut config = config(dir.path(), &["xx_Yyyy"], 10);
    config.fasttext_bin = script;
    let harvester = Harvester::from_config(config)
        .await
        .expect("classifier answers warm-up");
    assert_eq!(harvester.config().labels, vec!["xx_Yyyy"]);
}
