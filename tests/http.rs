use mockito::Server;
use seedcrawl::{
    CrawlControls, CrawlStatus, FetchError, FetchSettings, HttpFetcher, HttpTextSource,
    PageFetcher, SeedCrawler, TextExtractor, TextSource,
};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

fn settings() -> FetchSettings {
    FetchSettings {
        request_timeout: Duration::from_secs(5),
        ..FetchSettings::default()
    }
}

fn at(server: &Server, path: &str) -> Url {
    Url::parse(&format!("{}{path}", server.url())).expect("mock url")
}

#[tokio::test(flavor = "current_thread")]
async fn fetches_body_and_headers() {
    let mut server = Server::new_async().await;
    let _page = server
        .mock("GET", "/page")
        .with_status(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_body("<p>salaam</p>")
        .create_async()
        .await;

    let fetcher = HttpFetcher::new(&settings()).expect("client builds");
    let page = fetcher.fetch(&at(&server, "/page")).await.expect("fetch ok");
    assert_eq!(page.status, 200);
    assert_eq!(page.body, b"<p>salaam</p>");
    assert_eq!(
        page.content_type.as_deref(),
        Some("text/html; charset=utf-8")
    );
    assert!(!page.truncated);
}

#[tokio::test(flavor = "current_thread")]
async fn error_status_is_a_fetch_error() {
    let mut server = Server::new_async().await;
    let _missing = server
        .mock("GET", "/missing")
        .with_status(404)
        .with_body("nope")
        .create_async()
        .await;

    let fetcher = HttpFetcher::new(&settings()).expect("client builds");
    match fetcher.fetch(&at(&server, "/missing")).await {
        Err(FetchError::Status { status, .. }) => assert_eq!(status, 404),
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn large_bodies_are_truncated() {
    let mut server = Server::new_async().await;
    let _big = server
        .mock("GET", "/big")
        .with_status(200)
        .with_body("x".repeat(4096))
        .create_async()
        .await;

    let fetcher = HttpFetcher::new(&FetchSettings {
        max_body_bytes: 100,
        ..settings()
    })
    .expect("client builds");
    let page = fetcher.fetch(&at(&server, "/big")).await.expect("fetch ok");
    assert!(page.truncated);
    assert_eq!(page.body.len(), 100);
}

#[tokio::test(flavor = "current_thread")]
async fn text_source_extracts_main_content() {
    let mut server = Server::new_async().await;
    let _article = server
        .mock("GET", "/article")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(
            "<html><body><nav>menu</nav><article><h1>Khabar</h1><p>Aaj ka din.</p></article></body></html>",
        )
        .create_async()
        .await;

    let fetcher = Arc::new(HttpFetcher::new(&settings()).expect("client builds"));
    let source = HttpTextSource::new(fetcher, TextExtractor::default());
    let text = source
        .scrape(&at(&server, "/article"))
        .await
        .expect("scrape ok");
    assert_eq!(text.as_deref(), Some("Khabar\n\nAaj ka din."));
}

#[tokio::test(flavor = "current_thread")]
async fn text_source_skips_non_html_bodies() {
    let mut server = Server::new_async().await;
    let _pdf = server
        .mock("GET", "/report.pdf")
        .with_status(200)
        .with_header("content-type", "application/pdf")
        .with_body("<p>looks like markup but is a pdf</p>")
        .create_async()
        .await;

    let fetcher = Arc::new(HttpFetcher::new(&settings()).expect("client builds"));
    let source = HttpTextSource::new(fetcher, TextExtractor::default());
    let text = source
        .scrape(&at(&server, "/report.pdf"))
        .await
        .expect("scrape ok");
    assert_eq!(text, None);
}

#[tokio::test(flavor = "current_thread")]
async fn crawl_follows_redirects_and_survives_dead_links() {
    let mut server = Server::new_async().await;
    let new_location = format!("{}/new/", server.url());
    let _old = server
        .mock("GET", "/old")
        .with_status(301)
        .with_header("location", &new_location)
        .create_async()
        .await;
    let _new = server
        .mock("GET", "/new/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(r#"<a href="page">page</a><a href="/gone">gone</a>"#)
        .create_async()
        .await;
    let _page = server
        .mock("GET", "/new/page")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<p>end</p>")
        .create_async()
        .await;
    let _gone = server
        .mock("GET", "/gone")
        .with_status(500)
        .create_async()
        .await;

    let fetcher = Arc::new(HttpFetcher::new(&settings()).expect("client builds"));
    let crawler = SeedCrawler::new(
        CrawlControls::new(10, Duration::from_secs(30)).with_politeness_delay(Duration::ZERO),
        fetcher,
    );

    let outcome = crawler.crawl(&[at(&server, "/old")]).await;
    assert_eq!(outcome.status, CrawlStatus::Completed);
    assert!(outcome.discovered.contains(&at(&server, "/new/page")));
    assert!(outcome.visited.contains(&at(&server, "/gone")));
    assert_eq!(outcome.stats.fetch_errors, 1);
    assert_eq!(outcome.visited.len(), 3);
}
