//! Integration tests for the crawler
//!
//! These tests use wiremock to stand in for the listing site and run the
//! crawl end-to-end against a temporary record log.

use redlist::config::{parse_config, Config};
use redlist::crawler::{
    build_http_client, crawl, FetchPolicy, Fetcher, Orchestrator, PassOutcome, RedditSource,
};
use redlist::state::Counters;
use redlist::store::{NdjsonStore, Record};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a fast test configuration pointed at the mock server
fn create_test_config(base_url: &str, output_path: &str) -> Config {
    let toml = format!(
        r#"
[crawler]
target-count = 3
round-delay = 0
restart-delay = 0
cooldown-interval = 0

[fetcher]
min-interval = 0
jitter = 0
request-timeout = 10000
max-attempts = 20

[backoff]
base = 1
jitter = 0
max-backoff = 5
transient-cap = 5
server-cooldown = 1

[verifier]
mode = "batched"
batch-size = 50
max-workers = 2

[frontier]
priority-targets = ["aaa", "bbb"]
firehose-every = 0
self-extend = false

[upstream]
base-url = "{base_url}"

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"
contact-url = "https://example.com/contact"
contact-email = "test@example.com"

[output]
output-path = "{output_path}"
flush-batch-size = 1
"#
    );
    parse_config(&toml).expect("test config should parse")
}

fn listing_page(names: &[&str]) -> String {
    let links: String = names
        .iter()
        .map(|n| format!(r#"<a href="/r/{}/">{}</a>"#, n, n))
        .collect();
    format!("<html><body>{}</body></html>", links)
}

fn info_response(names: &[&str]) -> String {
    let children: Vec<String> = names
        .iter()
        .map(|n| {
            format!(
                r#"{{"kind": "t5", "data": {{"display_name": "{}", "subscribers": 10000, "over18": false}}}}"#,
                n
            )
        })
        .collect();
    format!(
        r#"{{"kind": "Listing", "data": {{"children": [{}]}}}}"#,
        children.join(",")
    )
}

/// Mounts the two listings and a metadata endpoint that knows all three
/// communities they mention
async fn mount_happy_path(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/r/aaa/new/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["xxx", "yyy"])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/bbb/new/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["yyy", "zzz"])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/info.json"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(info_response(&["xxx", "yyy", "zzz"])),
        )
        .expect(2)
        .mount(server)
        .await;
}

/// `sr_name` of every batched lookup the server received, in order
async fn batched_lookups(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == "/api/info.json")
        .filter_map(|request| {
            request
                .url
                .query_pairs()
                .find(|(key, _)| key == "sr_name")
                .map(|(_, value)| value.into_owned())
        })
        .collect()
}

fn sorted_records(output_path: &str) -> Vec<Record> {
    let store = NdjsonStore::open(output_path, Default::default()).unwrap();
    let mut records = store.load().unwrap().records;
    records.sort_by(|a, b| a.identity.cmp(&b.identity));
    records
}

fn output_path(dir: &TempDir) -> String {
    dir.path().join("subs.ndjson").display().to_string()
}

/// Builds an orchestrator over real HTTP with direct access to its pieces
fn http_orchestrator(config: Config) -> Orchestrator {
    let counters = Arc::new(Counters::new());
    let cancel = CancellationToken::new();
    let client = build_http_client(&config.user_agent, &config.fetcher).unwrap();
    let fetcher = Arc::new(Fetcher::new(
        client,
        FetchPolicy::from_config(&config),
        counters.clone(),
        cancel.clone(),
    ));
    let source = Arc::new(RedditSource::new(fetcher.clone(), &config.upstream.base_url).unwrap());
    let store = Arc::new(
        NdjsonStore::open(&config.output.output_path, config.output.durability()).unwrap(),
    );

    Orchestrator::new(config, store, source.clone(), source, counters, cancel)
        .unwrap()
        .with_fetcher(fetcher)
}

#[tokio::test]
async fn test_full_crawl_reaches_target() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    let dir = TempDir::new().unwrap();
    let out = output_path(&dir);
    let config = create_test_config(&server.uri(), &out);

    let summary = crawl(config, CancellationToken::new()).await.unwrap();

    assert_eq!(summary.passes, 1);
    assert_eq!(summary.appended, 3);
    assert!(!summary.cancelled);
    // yyy appears in both listings but is looked up once
    assert_eq!(batched_lookups(&server).await, vec!["xxx,yyy", "zzz"]);
    assert_eq!(
        sorted_records(&out),
        vec![
            Record::new("xxx", 10000, false),
            Record::new("yyy", 10000, false),
            Record::new("zzz", 10000, false),
        ]
    );
}

#[tokio::test]
async fn test_second_run_resumes_without_duplicates() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    let dir = TempDir::new().unwrap();
    let out = output_path(&dir);

    // A crash left one record and a torn line behind
    std::fs::write(
        &out,
        "{\"name\":\"xxx\",\"subscribers\":10000,\"nsfw\":false}\n{\"name\":\"yy",
    )
    .unwrap();

    let config = create_test_config(&server.uri(), &out);
    let orchestrator = http_orchestrator(config);
    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.seen, 3);
    assert_eq!(summary.appended, 2);
    assert_eq!(batched_lookups(&server).await, vec!["yyy", "zzz"]);
    let records = sorted_records(&out);
    let names: Vec<&str> = records.iter().map(|r| r.identity.as_str()).collect();
    assert_eq!(names, vec!["xxx", "yyy", "zzz"]);

    let content = std::fs::read_to_string(&out).unwrap();
    assert_eq!(content.lines().count(), 3);
}

#[tokio::test]
async fn test_rate_limit_threshold_triggers_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(10)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), &output_path(&dir));
    let orchestrator = http_orchestrator(config);

    let report = orchestrator.run_pass().await.unwrap();

    assert_eq!(report.outcome, PassOutcome::Restart);
    assert_eq!(report.appended, 0);
    assert_eq!(orchestrator.counters().rate_limited(), 10);
    // Dropping the server verifies that no 11th request was sent
}

#[tokio::test]
async fn test_run_recovers_after_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(10)
        .mount(&server)
        .await;
    mount_happy_path(&server).await;

    let dir = TempDir::new().unwrap();
    let out = output_path(&dir);
    let config = create_test_config(&server.uri(), &out);
    let orchestrator = http_orchestrator(config);

    let summary = orchestrator.run().await.unwrap();

    assert_eq!(summary.restarts, 1);
    assert_eq!(summary.passes, 2);
    assert_eq!(sorted_records(&out).len(), 3);
}

#[tokio::test]
async fn test_missing_communities_are_not_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r/aaa/new/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(listing_page(&["xxx", "banned", "yyy"])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/r/bbb/new/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_page(&["zzz"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/info.json"))
        .and(query_param("sr_name", "banned,xxx,yyy"))
        .respond_with(ResponseTemplate::new(200).set_body_string(info_response(&["xxx", "yyy"])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/info.json"))
        .and(query_param("sr_name", "zzz"))
        .respond_with(ResponseTemplate::new(200).set_body_string(info_response(&["zzz"])))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let out = output_path(&dir);
    let config = create_test_config(&server.uri(), &out);

    crawl(config, CancellationToken::new()).await.unwrap();

    let names: Vec<String> = sorted_records(&out)
        .into_iter()
        .map(|r| r.identity)
        .collect();
    assert_eq!(names, vec!["xxx", "yyy", "zzz"]);
}

#[tokio::test]
async fn test_cancellation_stops_promptly() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let config = create_test_config(&server.uri(), &output_path(&dir));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let summary = crawl(config, cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.appended, 0);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_continuous_mode_runs_until_cancelled() {
    let server = MockServer::start().await;
    mount_happy_path(&server).await;

    let dir = TempDir::new().unwrap();
    let out = output_path(&dir);
    let mut config = create_test_config(&server.uri(), &out);
    config.crawler.continuous_mode = true;
    config.crawler.cooldown_interval = 50;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let summary = crawl(config, cancel).await.unwrap();

    assert!(summary.cancelled);
    assert!(summary.passes >= 2);
    assert_eq!(summary.appended, 3);
    assert_eq!(sorted_records(&out).len(), 3);
}

#[tokio::test]
async fn test_unwritable_store_aborts_run() {
    let server = MockServer::start().await;

    let dir = TempDir::new().unwrap();
    // The output path is a directory, so the log can be neither read nor appended
    let out = dir.path().display().to_string();
    let config = create_test_config(&server.uri(), &out);

    let err = crawl(config, CancellationToken::new()).await.unwrap_err();
    assert!(err.is_storage_failure(), "unexpected error: {}", err);
}
