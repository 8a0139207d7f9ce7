//! HTTP fetcher implementation
//!
//! This module handles all requests against the external resource:
//! - Building the HTTP client with bearer authentication
//! - Classifying each response into an [`Outcome`]
//! - Retrying throttled IDs after a fixed backoff
//! - Measuring request latency for throughput reporting

use crate::config::ApiConfig;
use crate::ConfigError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Classified result of a single fetch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// HTTP 200 with a JSON body
    Success(Value),

    /// HTTP 404: the ID does not exist
    Absent,

    /// HTTP 429: the resource asks us to slow down
    Throttled,

    /// Any other status, a transport failure, or an unreadable body
    TransientError(String),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(_) => write!(f, "success"),
            Self::Absent => write!(f, "not found"),
            Self::Throttled => write!(f, "throttled"),
            Self::TransientError(reason) => write!(f, "{}", reason),
        }
    }
}

/// What happened while resolving one ID, throttle retries included
#[derive(Debug, Clone, PartialEq)]
pub struct FetchReport {
    pub id: i64,

    /// Final outcome; never `Throttled`
    pub outcome: Outcome,

    /// HTTP requests issued for this ID
    pub attempts: u64,

    /// Summed latency of all attempts
    pub request_time: Duration,
}

impl FetchReport {
    /// Report for an ID whose fetch task never produced a result
    pub fn lost(id: i64, reason: String) -> Self {
        Self {
            id,
            outcome: Outcome::TransientError(reason),
            attempts: 0,
            request_time: Duration::ZERO,
        }
    }
}

/// Builds an HTTP client carrying the bearer token on every request
pub fn build_http_client(config: &ApiConfig, token: &str) -> Result<Client, crate::SweepError> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let mut auth = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
        ConfigError::Validation("API token contains invalid header characters".to_string())
    })?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);

    let client = Client::builder()
        .user_agent(concat!("id-sweep/", env!("CARGO_PKG_VERSION")))
        .default_headers(headers)
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .gzip(true)
        .brotli(true)
        .build()?;

    Ok(client)
}

/// Performs outcome-classified requests against `<base-url>/<id>`
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    base_url: String,
    language: Option<String>,
}

impl FetchClient {
    /// Creates a fetch client, resolving the token from the config or environment
    pub fn new(config: &ApiConfig) -> Result<Self, crate::SweepError> {
        let token = config.resolve_token()?;
        Self::with_token(config, &token)
    }

    /// Creates a fetch client with an explicit token
    pub fn with_token(config: &ApiConfig, token: &str) -> Result<Self, crate::SweepError> {
        let base_url = config.query_free_base().ok_or_else(|| {
            ConfigError::InvalidUrl(format!("Invalid base_url: {}", config.base_url))
        })?;

        Ok(Self {
            client: build_http_client(config, token)?,
            base_url: base_url.to_string(),
            language: config.language.clone(),
        })
    }

    /// URL of the resource for `id`
    pub fn url_for(&self, id: i64) -> String {
        match &self.language {
            Some(language) => format!("{}/{}?language={}", self.base_url, id, language),
            None => format!("{}/{}", self.base_url, id),
        }
    }

    /// Issues one request for `id` and classifies the response
    ///
    /// # Classification
    ///
    /// | Condition | Outcome |
    /// |-----------|---------|
    /// | HTTP 200, JSON body | Success |
    /// | HTTP 404 | Absent |
    /// | HTTP 429 | Throttled |
    /// | Other status | TransientError |
    /// | Transport failure or unreadable body | TransientError |
    pub async fn fetch(&self, id: i64) -> Outcome {
        let url = self.url_for(id);
        tracing::debug!("Fetching ID {} from {}", id, url);

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_timeout() {
                    "request timeout".to_string()
                } else if e.is_connect() {
                    format!("connection failed: {}", e)
                } else {
                    e.to_string()
                };
                return Outcome::TransientError(reason);
            }
        };

        match response.status() {
            StatusCode::OK => match response.json::<Value>().await {
                Ok(payload) => Outcome::Success(payload),
                Err(e) => Outcome::TransientError(format!("invalid JSON body: {}", e)),
            },
            StatusCode::NOT_FOUND => Outcome::Absent,
            StatusCode::TOO_MANY_REQUESTS => Outcome::Throttled,
            status => Outcome::TransientError(format!("unexpected status {}", status.as_u16())),
        }
    }
}

/// Fetches `id`, retrying after `backoff` for as long as the resource throttles
///
/// Throttled attempts are counted and timed like any other attempt but never
/// surface as the final outcome.
pub async fn fetch_with_retry(client: &FetchClient, id: i64, backoff: Duration) -> FetchReport {
    let mut report = FetchReport {
        id,
        outcome: Outcome::Throttled,
        attempts: 0,
        request_time: Duration::ZERO,
    };

    loop {
        let started = Instant::now();
        let outcome = client.fetch(id).await;
        report.request_time += started.elapsed();
        report.attempts += 1;

        if outcome != Outcome::Throttled {
            report.outcome = outcome;
            return report;
        }

        tracing::warn!(
            "Rate limit hit for ID {}. Pausing for {:?} and retrying",
            id,
            backoff
        );
        tokio::time::sleep(backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_config(base_url: &str) -> ApiConfig {
        ApiConfig {
            base_url: base_url.to_string(),
            language: None,
            token_env: "API_TOKEN".to_string(),
            api_token: Some("test-token".to_string()),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn test_build_http_client() {
        let config = api_config("https://api.example.com/items");
        assert!(build_http_client(&config, "token").is_ok());
    }

    #[test]
    fn test_rejects_unprintable_token() {
        let config = api_config("https://api.example.com/items");
        assert!(build_http_client(&config, "bad\ntoken").is_err());
    }

    #[test]
    fn test_url_for() {
        let mut config = api_config("https://api.example.com/3/movie/");
        let client = FetchClient::new(&config).unwrap();
        assert_eq!(client.url_for(12), "https://api.example.com/3/movie/12");

        config.language = Some("en-US".to_string());
        let client = FetchClient::new(&config).unwrap();
        assert_eq!(
            client.url_for(12),
            "https://api.example.com/3/movie/12?language=en-US"
        );
    }

    #[tokio::test]
    async fn test_classifies_responses() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/1"))
            .and(header("authorization", "Bearer test-token"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/3"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/4"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/5"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let client = FetchClient::new(&api_config(&server.uri())).unwrap();

        assert_eq!(client.fetch(1).await, Outcome::Success(json!({"id": 1})));
        assert_eq!(client.fetch(2).await, Outcome::Absent);
        assert_eq!(client.fetch(3).await, Outcome::Throttled);
        assert!(matches!(client.fetch(4).await, Outcome::TransientError(_)));
        assert!(matches!(client.fetch(5).await, Outcome::TransientError(_)));
    }

    #[tokio::test]
    async fn test_sends_language_parameter() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/9"))
            .and(query_param("language", "en-US"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9})))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = api_config(&server.uri());
        config.language = Some("en-US".to_string());
        let client = FetchClient::new(&config).unwrap();

        assert!(matches!(client.fetch(9).await, Outcome::Success(_)));
    }

    #[tokio::test]
    async fn test_transport_failure_is_transient() {
        // Nothing listens on port 9 of localhost
        let client = FetchClient::new(&api_config("http://127.0.0.1:9")).unwrap();
        assert!(matches!(client.fetch(1).await, Outcome::TransientError(_)));
    }

    #[tokio::test]
    async fn test_retries_throttled_id() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/7"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 7})))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new(&api_config(&server.uri())).unwrap();
        let report = fetch_with_retry(&client, 7, Duration::from_millis(5)).await;

        assert_eq!(report.id, 7);
        assert_eq!(report.outcome, Outcome::Success(json!({"id": 7})));
        assert_eq!(report.attempts, 3);
    }

    #[tokio::test]
    async fn test_absent_is_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/8"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = FetchClient::new(&api_config(&server.uri())).unwrap();
        let report = fetch_with_retry(&client, 8, Duration::from_millis(5)).await;

        assert_eq!(report.outcome, Outcome::Absent);
        assert_eq!(report.attempts, 1);
    }
}
