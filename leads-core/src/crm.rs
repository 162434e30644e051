//! CRM session listing client
//!
//! Provides a `SessionSource` trait with the reqwest-backed `CrmClient`
//! implementation that reads one page of `GET <base><session_path>` at a time.
//! Paging policy (when to stop, pacing) lives with the harvester.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use crate::config::CrmConfig;
use crate::models::{SessionPage, SessionRecord};

/// Sort order requested from the listing endpoint.
pub const SESSION_SORT: &str = "createdAt,desc";

// ============================================================================
// SessionSource trait
// ============================================================================

/// Anything that can serve pages of CRM sessions.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Fetch page `page` (0-based) of sessions created inside `window`.
    async fn fetch_page(
        &self,
        window: &FetchWindow,
        page: u32,
    ) -> Result<Vec<SessionRecord>, CrmError>;

    /// Source name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum CrmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Missing API token")]
    MissingToken,
}

// ============================================================================
// Fetch window
// ============================================================================

/// The `startDate`/`endDate` range sent with every page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// `now - days`, saturating at the earliest representable instant.
pub fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    ChronoDuration::try_days(days)
        .and_then(|d| now.checked_sub_signed(d))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl FetchWindow {
    /// `[now - days, now]`.
    pub fn trailing_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: days_before(now, days),
            end: now,
        }
    }

    fn query(&self, page: u32) -> [(&'static str, String); 4] {
        [
            ("startDate", self.start.to_rfc3339_opts(SecondsFormat::Micros, false)),
            ("endDate", self.end.to_rfc3339_opts(SecondsFormat::Micros, false)),
            ("sort", SESSION_SORT.to_string()),
            ("page", page.to_string()),
        ]
    }
}

// ============================================================================
// CrmClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct CrmClient {
    client: Client,
    url: String,
    token: String,
}

impl CrmClient {
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        Self::with_base_url(config, config.base_url.clone())
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: &CrmConfig, base_url: String) -> Result<Self, CrmError> {
        if config.token.trim().is_empty() {
            return Err(CrmError::MissingToken);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let url = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            config.session_path.trim_start_matches('/')
        );

        Ok(Self {
            client,
            url,
            token: config.token.clone(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SessionSource for CrmClient {
    async fn fetch_page(
        &self,
        window: &FetchWindow,
        page: u32,
    ) -> Result<Vec<SessionRecord>, CrmError> {
        let response = self
            .client
            .get(&self.url)
            .bearer_auth(&self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&window.query(page))
            .send()
            .await?;

        let status = response.status();
        tracing::info!(page, status = status.as_u16(), "CRM page requested");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(300).collect();
            return Err(CrmError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        let page: SessionPage =
            serde_json::from_str(&body).map_err(|e| CrmError::Decode(e.to_string()))?;

        Ok(page.items)
    }

    fn name(&self) -> &str {
        "crm"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(token: &str) -> CrmConfig {
        CrmConfig {
            token: token.to_string(),
            ..CrmConfig::default()
        }
    }

    fn window() -> FetchWindow {
        FetchWindow::trailing_days(Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(), 30)
    }

    #[test]
    fn test_huge_day_counts_saturate() {
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap();
        assert_eq!(FetchWindow::trailing_days(now, i64::MAX).start, DateTime::<Utc>::MIN_UTC);
        assert_eq!(days_before(now, 7), Utc.with_ymd_and_hms(2026, 10, 11, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_window_query_parameters() {
        let params = window().query(3);
        assert_eq!(params[0], ("startDate", "2026-09-18T12:00:00.000000+00:00".to_string()));
        assert_eq!(params[1], ("endDate", "2026-10-18T12:00:00.000000+00:00".to_string()));
        assert_eq!(params[2], ("sort", "createdAt,desc".to_string()));
        assert_eq!(params[3], ("page", "3".to_string()));
    }

    #[test]
    fn test_client_requires_token() {
        match CrmClient::new(&test_config("  ")) {
            Err(CrmError::MissingToken) => {}
            other => panic!("Expected MissingToken, got {:?}", other),
        }
    }

    #[test]
    fn test_url_joins_base_and_path() {
        let client =
            CrmClient::with_base_url(&test_config("t"), "http://crm.local/".to_string()).unwrap();
        assert_eq!(client.url(), "http://crm.local/chat/v1/session");
    }

    #[tokio::test]
    async fn test_fetch_page_sends_auth_and_query() {
        let mock_server = MockServer::start().await;
        let client = CrmClient::with_base_url(&test_config("secret"), mock_server.uri()).unwrap();

        Mock::given(method("GET"))
            .and(path("/chat/v1/session"))
            .and(header("authorization", "Bearer secret"))
            .and(query_param("sort", "createdAt,desc"))
            .and(query_param("page", "2"))
            .and(query_param("startDate", "2026-09-18T12:00:00.000000+00:00"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "items": [
                    { "id": "a", "createdAt": "2026-10-17T10:00:00Z" },
                    { "id": "b", "createdAt": "2026-10-16T10:00:00Z" }
                ]
            })))
            .mount(&mock_server)
            .await;

        let items = client.fetch_page(&window(), 2).await.unwrap();
        let ids: Vec<_> = items.iter().filter_map(|r| r.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fetch_page_maps_non_success_to_api_error() {
        let mock_server = MockServer::start().await;
        let client = CrmClient::with_base_url(&test_config("secret"), mock_server.uri()).unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .mount(&mock_server)
            .await;

        match client.fetch_page(&window(), 0).await {
            Err(CrmError::Api { code, message }) => {
                assert_eq!(code, 401);
                assert_eq!(message, "unauthorized");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_page_rejects_non_json_body() {
        let mock_server = MockServer::start().await;
        let client = CrmClient::with_base_url(&test_config("secret"), mock_server.uri()).unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            client.fetch_page(&window(), 0).await,
            Err(CrmError::Decode(_))
        ));
    }
}
