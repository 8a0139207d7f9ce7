//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and a temporary
//! SQLite database to test full crawl runs end-to-end.

use id_sweep::config::{ApiConfig, Config, CrawlerConfig, OutputConfig, Scheduling};
use id_sweep::crawler::{registry_from_config, JobRegistry, StartCrawl, TaskStatus};
use id_sweep::record::RecordFields;
use id_sweep::state::{CrawlMode, CrawlState};
use id_sweep::storage::{SqliteStorage, Storage};
use id_sweep::SweepError;
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration against the mock server
fn create_test_config(server: &MockServer, db_path: &str, threshold: u32) -> Config {
    Config {
        crawler: CrawlerConfig {
            start_id: 1,
            end_id: 1,
            max_requests_per_second: 50,
            mode: CrawlMode::Fresh,
            consecutive_invalid_threshold: threshold,
            refresh_interval: 100,
            throttle_backoff_ms: 20, // Very short for testing
            scheduling: Scheduling::Sequential,
            reset_on_transient_error: true,
        },
        api: ApiConfig {
            base_url: server.uri(),
            language: None,
            token_env: "API_TOKEN".to_string(),
            api_token: Some("test-token".to_string()),
            request_timeout_secs: 5,
        },
        output: OutputConfig {
            database_path: db_path.to_string(),
        },
    }
}

fn db_path(dir: &TempDir) -> String {
    dir.path().join("records.db").to_string_lossy().into_owned()
}

fn request(mode: &str, start_id: i64, end_id: i64, max_rps: u32) -> StartCrawl {
    StartCrawl {
        mode: mode.to_string(),
        start_id,
        end_id,
        max_requests_per_second: max_rps,
    }
}

/// Mounts a response for one ID; 200 responses carry a minimal record
async fn mount_id(server: &MockServer, id: i64, status: u16, expected_calls: u64) {
    let template = if status == 200 {
        ResponseTemplate::new(200).set_body_json(json!({
            "id": id,
            "title": format!("Movie {}", id),
            "adult": false,
            "popularity": 12.5,
        }))
    } else {
        ResponseTemplate::new(status)
    };

    Mock::given(method("GET"))
        .and(path(format!("/{}", id)))
        .respond_with(template)
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn with_store<T>(
    registry: &JobRegistry<SqliteStorage>,
    f: impl FnOnce(&mut SqliteStorage) -> T,
) -> T {
    let mut guard = registry.storage().lock().expect("storage lock poisoned");
    f(&mut guard)
}

async fn run_end_to_end(scheduling: Scheduling, max_rps: u32) {
    let server = MockServer::start().await;
    mount_id(&server, 1, 200, 1).await;
    mount_id(&server, 2, 404, 1).await;
    mount_id(&server, 3, 200, 1).await;
    mount_id(&server, 4, 404, 1).await;
    mount_id(&server, 5, 404, 1).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = create_test_config(&server, &db_path(&temp_dir), 2);
    config.crawler.scheduling = scheduling;

    let registry = registry_from_config(&config).expect("Failed to build registry");
    let handle = registry
        .start_crawl(request("fresh", 1, 5, max_rps))
        .expect("Failed to start crawl");

    let summary = registry.wait(handle.job_id).await.expect("Crawl task failed");
    assert_eq!(summary.state, CrawlState::CircuitTripped);
    assert_eq!(summary.stats.items_scraped, 2);
    assert_eq!(summary.stats.consecutive_invalid, 0);
    assert_eq!(summary.processed, 5);

    with_store(&registry, |store| {
        assert!(store.record_exists(1).unwrap());
        assert!(store.record_exists(3).unwrap());
        assert_eq!(store.count_records().unwrap(), 2);

        // Only the marker outside the final streak survives the rollback
        let absent = store.list_absent_ids().unwrap();
        assert_eq!(absent.len(), 1);
        assert!(absent.contains(&2));

        let job = store.get_job(handle.job_id).unwrap();
        assert_eq!(job.state, CrawlState::CircuitTripped);
        assert_eq!(job.stats.items_scraped, 2);
        assert_eq!(job.stats.total_requests, 5);
        assert!(job.finished_at.is_some());
    });
}

#[tokio::test]
async fn test_end_to_end_sequential() {
    run_end_to_end(Scheduling::Sequential, 50).await;
}

#[tokio::test]
async fn test_end_to_end_concurrent_single_batch() {
    run_end_to_end(Scheduling::Concurrent, 5).await;
}

#[tokio::test]
async fn test_end_to_end_concurrent_small_batches() {
    run_end_to_end(Scheduling::Concurrent, 2).await;
}

#[tokio::test]
async fn test_trip_keeps_markers_before_streak() {
    let server = MockServer::start().await;
    mount_id(&server, 1, 404, 1).await;
    mount_id(&server, 2, 200, 1).await;
    for id in 3..=5 {
        mount_id(&server, id, 404, 1).await;
    }
    // Never reached once the breaker trips at ID 5
    mount_id(&server, 6, 200, 0).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server, &db_path(&temp_dir), 3);
    let registry = registry_from_config(&config).unwrap();

    let handle = registry.start_crawl(request("fresh", 1, 6, 50)).unwrap();
    let summary = registry.wait(handle.job_id).await.unwrap();

    assert_eq!(summary.state, CrawlState::CircuitTripped);
    with_store(&registry, |store| {
        let absent = store.list_absent_ids().unwrap();
        assert_eq!(absent.len(), 1);
        assert!(absent.contains(&1));
    });
}

#[tokio::test]
async fn test_excluded_ids_are_never_fetched() {
    let server = MockServer::start().await;
    mount_id(&server, 1, 200, 1).await;
    mount_id(&server, 2, 200, 0).await;
    mount_id(&server, 3, 200, 0).await;
    mount_id(&server, 4, 200, 1).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server, &db_path(&temp_dir), 3);
    let registry = registry_from_config(&config).unwrap();

    with_store(&registry, |store| {
        store.mark_absent(2, 0).unwrap();
        store.mark_absent(3, 0).unwrap();
    });

    let handle = registry.start_crawl(request("fresh", 1, 4, 50)).unwrap();
    let summary = registry.wait(handle.job_id).await.unwrap();

    assert_eq!(summary.state, CrawlState::Completed);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.stats.total_requests, 2);
}

#[tokio::test]
async fn test_missing_mode_skips_stored_records() {
    let server = MockServer::start().await;
    mount_id(&server, 1, 200, 0).await;
    mount_id(&server, 2, 200, 1).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server, &db_path(&temp_dir), 3);
    let registry = registry_from_config(&config).unwrap();

    with_store(&registry, |store| {
        let record = RecordFields::from_payload(1, &json!({"id": 1, "title": "Kept"})).unwrap();
        store.upsert_record(&record).unwrap();
    });

    let handle = registry.start_crawl(request("missing", 1, 2, 50)).unwrap();
    let summary = registry.wait(handle.job_id).await.unwrap();

    assert_eq!(summary.state, CrawlState::Completed);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.stats.items_scraped, 1);

    with_store(&registry, |store| {
        let kept = store.get_record(1).unwrap().unwrap();
        assert_eq!(kept.fields["title"], "Kept");
    });
}

#[tokio::test]
async fn test_fresh_mode_updates_stored_records() {
    let server = MockServer::start().await;
    mount_id(&server, 1, 200, 1).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server, &db_path(&temp_dir), 3);
    let registry = registry_from_config(&config).unwrap();

    let created_at = with_store(&registry, |store| {
        let record = RecordFields::from_payload(1, &json!({"id": 1, "title": "Old"})).unwrap();
        store.upsert_record(&record).unwrap();
        store.get_record(1).unwrap().unwrap().created_at
    });

    let handle = registry.start_crawl(request("fresh", 1, 1, 50)).unwrap();
    let summary = registry.wait(handle.job_id).await.unwrap();
    assert_eq!(summary.stats.items_scraped, 1);

    with_store(&registry, |store| {
        assert_eq!(store.count_records().unwrap(), 1);
        let updated = store.get_record(1).unwrap().unwrap();
        assert_eq!(updated.fields["title"], "Movie 1");
        assert_eq!(updated.created_at, created_at);
    });
}

#[tokio::test]
async fn test_throttled_id_is_retried() {
    let server = MockServer::start().await;
    mount_id(&server, 1, 404, 1).await;

    Mock::given(method("GET"))
        .and(path("/2"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_id(&server, 2, 404, 1).await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server, &db_path(&temp_dir), 3);
    let registry = registry_from_config(&config).unwrap();

    let handle = registry.start_crawl(request("fresh", 1, 2, 50)).unwrap();
    let summary = registry.wait(handle.job_id).await.unwrap();

    assert_eq!(summary.state, CrawlState::Completed);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.stats.total_requests, 3);
    // Throttling neither reset nor extended the streak
    assert_eq!(summary.stats.consecutive_invalid, 2);
}

#[tokio::test]
async fn test_cancel_through_registry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server, &db_path(&temp_dir), 100_000);
    let registry = registry_from_config(&config).unwrap();

    let handle = registry.start_crawl(request("fresh", 1, 10_000, 50)).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(registry.task_status(handle.job_id).unwrap(), TaskStatus::Running);

    registry.cancel(handle.job_id).unwrap();
    let summary = registry.wait(handle.job_id).await.unwrap();

    assert_eq!(summary.state, CrawlState::Cancelled);
    assert!(summary.processed > 0);
    assert!(summary.processed < 10_000);
}

#[tokio::test]
async fn test_cancel_from_another_connection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_delay(Duration::from_millis(50)))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = db_path(&temp_dir);
    let mut config = create_test_config(&server, &path, 100_000);
    config.crawler.scheduling = Scheduling::Concurrent;
    let registry = registry_from_config(&config).unwrap();

    let handle = registry.start_crawl(request("fresh", 1, 10_000, 5)).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Another process would open its own connection to the same database
    let mut other = SqliteStorage::new(std::path::Path::new(&path)).unwrap();
    other.set_cancelled(handle.job_id).unwrap();

    let summary = registry.wait(handle.job_id).await.unwrap();
    assert_eq!(summary.state, CrawlState::Cancelled);
    assert!(summary.processed < 10_000);

    let job = other.get_job(handle.job_id).unwrap();
    assert!(job.cancelled);
    assert_eq!(job.state, CrawlState::Cancelled);
}

#[tokio::test]
async fn test_invalid_requests_create_no_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = create_test_config(&server, &db_path(&temp_dir), 3);
    let registry = registry_from_config(&config).unwrap();

    assert!(matches!(
        registry.start_crawl(request("sideways", 1, 5, 10)),
        Err(SweepError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        registry.start_crawl(request("fresh", 0, 5, 10)),
        Err(SweepError::InvalidConfiguration(_))
    ));
    assert!(matches!(
        registry.start_crawl(request("fresh", 1, 5, 0)),
        Err(SweepError::InvalidConfiguration(_))
    ));

    with_store(&registry, |store| {
        assert!(store.list_jobs().unwrap().is_empty());
    });
}
