//! Pull channel: the observer REST endpoints.
//!
//! Every call resolves to an [`ApiResponse`] envelope rather than an error.
//! Network failures, non-2xx statuses and non-JSON bodies are all folded into
//! the envelope so callers only ever branch on [`ApiResponse::success`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default base URL of the pull channel.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3000/api";

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Error text for a failed response whose body carries no `error` field.
const REQUEST_FAILED: &str = "Request failed";

/// Configuration for the pull channel.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL the endpoint paths are appended to.
    pub base_url: String,
    /// Timeout for a single request. Defaults to **15 seconds**.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ApiConfig {
    /// Create a config for the given base URL with default timeouts.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Observer endpoints, relative to [`ApiConfig::base_url`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint<'a> {
    /// Game metadata.
    GameByCode { code: &'a str },
    /// Aggregate observer data.
    Observer { code: &'a str },
    /// Full scoreboard.
    Scoreboard { code: &'a str },
    /// Scoreboard scoped to one team.
    TeamScoreboard { code: &'a str, team_id: i64 },
    /// Treasures found by one team.
    TreasuresFound { code: &'a str, team_id: i64 },
    /// Challenge pictures taken by one team.
    Pictures { code: &'a str, team_id: i64 },
}

impl Endpoint<'_> {
    /// Request path, starting with `/`.
    pub fn path(&self) -> String {
        match *self {
            Self::GameByCode { code } => format!("/game/apis/games/by_code/{code}"),
            Self::Observer { code } => format!("/apis/observer/{code}"),
            Self::Scoreboard { code } => format!("/apis/observer/{code}/scoreboard"),
            Self::TeamScoreboard { code, team_id } => {
                format!("/apis/observer/{code}/scoreboard/{team_id}")
            }
            Self::TreasuresFound { code, team_id } => {
                format!("/apis/observer/{code}/treasures_found/{team_id}")
            }
            Self::Pictures { code, team_id } => {
                format!("/apis/observer/{code}/pictures/{team_id}")
            }
        }
    }
}

/// Which pull a response belongs to, independent of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullKind {
    Game,
    Observer,
    Scoreboard,
    TeamScoreboard,
    TreasuresFound,
    Pictures,
}

/// Uniform envelope around every pull response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Parsed JSON body, the raw body as a string if it is not JSON, or
    /// `null` on network failure.
    pub data: Value,
    /// HTTP status, or 500 for network failures.
    pub status: u16,
    /// `true` iff the status is 2xx.
    pub success: bool,
    /// Failure description; `None` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    /// Build the envelope for a completed HTTP exchange.
    ///
    /// ```
    /// use scoreboard_sync::api::ApiResponse;
    ///
    /// let ok = ApiResponse::from_body(200, r#"{"teams":[]}"#);
    /// assert!(ok.success);
    ///
    /// let failed = ApiResponse::from_body(404, "not here");
    /// assert_eq!(failed.error.as_deref(), Some("Request failed"));
    /// assert_eq!(failed.data, "not here");
    /// ```
    pub fn from_body(status: u16, body: &str) -> Self {
        let data = serde_json::from_str::<Value>(body)
            .unwrap_or_else(|_| Value::String(body.to_string()));
        let success = (200..300).contains(&status);
        let error = if success {
            None
        } else {
            Some(
                data.get("error")
                    .and_then(Value::as_str)
                    .unwrap_or(REQUEST_FAILED)
                    .to_string(),
            )
        };
        Self {
            data,
            status,
            success,
            error,
        }
    }

    /// Envelope for a request that never produced a response.
    pub fn network_failure(message: impl Into<String>) -> Self {
        Self {
            data: Value::Null,
            status: 500,
            success: false,
            error: Some(message.into()),
        }
    }

    /// The body, if this response may be folded into a view.
    pub fn usable_data(&self) -> Option<&Value> {
        if self.success && !self.data.is_null() {
            Some(&self.data)
        } else {
            None
        }
    }
}

/// Source of pull-channel responses.
///
/// Implementors only provide [`fetch`](ObserverApi::fetch); the per-endpoint
/// helpers are derived from it.
#[async_trait]
pub trait ObserverApi: Send + Sync + 'static {
    /// Issue a GET for `endpoint`.
    async fn fetch(&self, endpoint: Endpoint<'_>) -> ApiResponse;

    /// Game metadata by game code.
    async fn game_by_code(&self, code: &str) -> ApiResponse {
        self.fetch(Endpoint::GameByCode { code }).await
    }

    /// Aggregate observer data.
    async fn observer(&self, code: &str) -> ApiResponse {
        self.fetch(Endpoint::Observer { code }).await
    }

    /// Full scoreboard.
    async fn scoreboard(&self, code: &str) -> ApiResponse {
        self.fetch(Endpoint::Scoreboard { code }).await
    }

    /// Team-scoped scoreboard.
    async fn team_scoreboard(&self, code: &str, team_id: i64) -> ApiResponse {
        self.fetch(Endpoint::TeamScoreboard { code, team_id }).await
    }

    /// Treasures found by a team.
    async fn treasures_found(&self, code: &str, team_id: i64) -> ApiResponse {
        self.fetch(Endpoint::TreasuresFound { code, team_id }).await
    }

    /// Challenge pictures of a team.
    async fn pictures(&self, code: &str, team_id: i64) -> ApiResponse {
        self.fetch(Endpoint::Pictures { code, team_id }).await
    }
}

#[cfg(feature = "http-api")]
pub use http::HttpObserverApi;

#[cfg(feature = "http-api")]
mod http {
    use std::sync::Arc;

    use async_trait::async_trait;
    use reqwest::{header::CONTENT_TYPE, Client};
    use tracing::{debug, warn};

    use super::{ApiConfig, ApiResponse, Endpoint, ObserverApi};
    use crate::error::Result;

    /// [`ObserverApi`] over HTTP with `reqwest`.
    #[derive(Debug, Clone)]
    pub struct HttpObserverApi {
        client: Client,
        base_url: Arc<str>,
    }

    impl HttpObserverApi {
        /// Build the HTTP client.
        ///
        /// # Errors
        ///
        /// Returns [`ScoreboardError::Http`](crate::ScoreboardError::Http) if
        /// the TLS backend cannot be initialized.
        pub fn new(config: ApiConfig) -> Result<Self> {
            let client = Client::builder().timeout(config.request_timeout).build()?;
            Ok(Self {
                client,
                base_url: Arc::from(config.base_url.trim_end_matches('/')),
            })
        }
    }

    #[async_trait]
    impl ObserverApi for HttpObserverApi {
        async fn fetch(&self, endpoint: Endpoint<'_>) -> ApiResponse {
            let path = endpoint.path();
            let url = format!("{}{}", self.base_url, path);
            debug!(%path, "pull request");

            let response = match self
                .client
                .get(&url)
                .header(CONTENT_TYPE, "application/json")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(%path, error = %e, "pull request failed");
                    return ApiResponse::network_failure(e.to_string());
                }
            };

            let status = response.status().as_u16();
            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(%path, status, error = %e, "failed to read pull response body");
                    return ApiResponse::network_failure(e.to_string());
                }
            };

            let envelope = ApiResponse::from_body(status, &body);
            if !envelope.success {
                warn!(
                    %path,
                    status,
                    error = envelope.error.as_deref().unwrap_or_default(),
                    "pull request unsuccessful"
                );
            }
            envelope
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_paths() {
        let code = "ABC123";
        assert_eq!(
            Endpoint::GameByCode { code }.path(),
            "/game/apis/games/by_code/ABC123"
        );
        assert_eq!(Endpoint::Observer { code }.path(), "/apis/observer/ABC123");
        assert_eq!(
            Endpoint::Scoreboard { code }.path(),
            "/apis/observer/ABC123/scoreboard"
        );
        assert_eq!(
            Endpoint::TeamScoreboard { code, team_id: 7 }.path(),
            "/apis/observer/ABC123/scoreboard/7"
        );
        assert_eq!(
            Endpoint::TreasuresFound { code, team_id: 7 }.path(),
            "/apis/observer/ABC123/treasures_found/7"
        );
        assert_eq!(
            Endpoint::Pictures { code, team_id: 7 }.path(),
            "/apis/observer/ABC123/pictures/7"
        );
    }

    #[test]
    fn failed_response_prefers_body_error() {
        let envelope = ApiResponse::from_body(403, r#"{"error":"game is private"}"#);
        assert!(!envelope.success);
        assert_eq!(envelope.error.as_deref(), Some("game is private"));
        assert_eq!(envelope.data["error"], "game is private");
    }

    #[test]
    fn non_json_body_becomes_string_data() {
        let envelope = ApiResponse::from_body(200, "<html>ok</html>");
        assert!(envelope.success);
        assert_eq!(envelope.data, json!("<html>ok</html>"));
        assert_eq!(envelope.error, None);
    }

    #[test]
    fn network_failure_shape() {
        let envelope = ApiResponse::network_failure("connection refused");
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"data": null, "status": 500, "success": false, "error": "connection refused"})
        );
        assert!(envelope.usable_data().is_none());
    }

    #[test]
    fn usable_data_requires_success() {
        assert!(ApiResponse::from_body(200, "{}").usable_data().is_some());
        assert!(ApiResponse::from_body(500, "{}").usable_data().is_none());
        assert!(ApiResponse::from_body(200, "null").usable_data().is_none());
    }

    #[cfg(feature = "http-api")]
    mod http {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn fetches_scoreboard_json() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/apis/observer/G1/scoreboard"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "teams": [{"game_team_id": 1, "name": "Blue", "score": 10}]
                })))
                .mount(&server)
                .await;

            let api = HttpObserverApi::new(ApiConfig::new(server.uri())).unwrap();
            let envelope = api.scoreboard("G1").await;

            assert!(envelope.success);
            assert_eq!(envelope.status, 200);
            assert_eq!(envelope.data["teams"][0]["name"], "Blue");
        }

        #[tokio::test]
        async fn non_success_status_is_enveloped() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/apis/observer/G1/scoreboard/4"))
                .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
                .mount(&server)
                .await;

            let api = HttpObserverApi::new(ApiConfig::new(format!("{}/", server.uri()))).unwrap();
            let envelope = api.team_scoreboard("G1", 4).await;

            assert!(!envelope.success);
            assert_eq!(envelope.status, 404);
            assert_eq!(envelope.data, json!("Not Found"));
            assert_eq!(envelope.error.as_deref(), Some("Request failed"));
        }

        #[tokio::test]
        async fn unreachable_server_is_a_network_failure() {
            let api = HttpObserverApi::new(
                ApiConfig::new("http://127.0.0.1:1").with_request_timeout(Duration::from_secs(2)),
            )
            .unwrap();
            let envelope = api.observer("G1").await;

            assert_eq!(envelope.status, 500);
            assert!(!envelope.success);
            assert_eq!(envelope.data, Value::Null);
            assert!(envelope.error.is_some());
        }
    }
}
