//! Firestore REST API client.
//!
//! Every call goes through [`FirestoreClient::send_authorized`], which attaches a
//! cached bearer token and retries once when the server reports the token expired.
//! Reads are retried with backoff. Writes are not: a lost response on a
//! conditional write is resolved by the caller re-reading the document.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::{CustomServiceAccount, TokenProvider};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use tracing::{debug, info_span, Instrument};

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::{record_conflict, record_request};
use crate::retry::RetryConfig;
use crate::token_cache::TokenCache;
use crate::types::{
    Aggregation, CountAggregation, Document, FromFirestoreValue, RunAggregationQueryRequest,
    RunAggregationQueryResponse, RunQueryRequest, RunQueryResponse, StructuredAggregationQuery,
    StructuredQuery, Value,
};

const PRODUCTION_ENDPOINT: &str = "https://firestore.googleapis.com";

/// Firestore client configuration.
#[derive(Debug, Clone)]
pub struct FirestoreConfig {
    pub project_id: String,
    /// Usually "(default)"
    pub database_id: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub retry: RetryConfig,
    /// `host:port` of a Firestore emulator. Disables authentication.
    pub emulator_host: Option<String>,
}

impl FirestoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> FirestoreResult<Self> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("FIREBASE_PROJECT_ID"))
            .map_err(|_| {
                FirestoreError::auth_error(
                    "GCP_PROJECT_ID or FIREBASE_PROJECT_ID must be set to access Firestore",
                )
            })?;

        if project_id.is_empty() {
            return Err(FirestoreError::auth_error(
                "GCP_PROJECT_ID or FIREBASE_PROJECT_ID cannot be empty",
            ));
        }

        let timeout_secs: u64 = std::env::var("FIRESTORE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let connect_timeout_secs: u64 = std::env::var("FIRESTORE_CONNECT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            project_id,
            database_id: std::env::var("FIRESTORE_DATABASE_ID")
                .unwrap_or_else(|_| "(default)".to_string()),
            timeout: Duration::from_secs(timeout_secs),
            connect_timeout: Duration::from_secs(connect_timeout_secs),
            retry: RetryConfig::from_env(),
            emulator_host: std::env::var("FIRESTORE_EMULATOR_HOST")
                .ok()
                .filter(|h| !h.is_empty()),
        })
    }

    /// Minimal config for a known project, with default timeouts.
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_id: "(default)".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
            emulator_host: None,
        }
    }

    fn documents_root(&self) -> String {
        format!(
            "projects/{}/databases/{}/documents",
            self.project_id, self.database_id
        )
    }
}

/// Firestore REST API client. Cheap to clone.
#[derive(Clone)]
pub struct FirestoreClient {
    http: Client,
    config: FirestoreConfig,
    base_url: String,
    token_cache: Arc<TokenCache>,
}

impl FirestoreClient {
    /// Create a client, authenticating with the service account from
    /// `GOOGLE_APPLICATION_CREDENTIALS` unless an emulator is configured.
    pub async fn new(config: FirestoreConfig) -> FirestoreResult<Self> {
        match config.emulator_host.clone() {
            Some(host) => {
                debug!(host = %host, "Using Firestore emulator");
                Self::with_endpoint(config, format!("http://{}", host), TokenCache::fixed("owner"))
            }
            None => {
                let auth = Self::create_auth_provider()?;
                Self::with_endpoint(config, PRODUCTION_ENDPOINT, TokenCache::new(auth))
            }
        }
    }

    /// Create from environment variables.
    pub async fn from_env() -> FirestoreResult<Self> {
        Self::new(FirestoreConfig::from_env()?).await
    }

    /// Client against an explicit endpoint such as a mock server.
    pub fn with_endpoint(
        config: FirestoreConfig,
        endpoint: impl AsRef<str>,
        token_cache: TokenCache,
    ) -> FirestoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vidq-firestore/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FirestoreError::Network)?;

        let base_url = format!(
            "{}/v1/{}",
            endpoint.as_ref().trim_end_matches('/'),
            config.documents_root()
        );

        Ok(Self {
            http,
            config,
            base_url,
            token_cache: Arc::new(token_cache),
        })
    }

    fn create_auth_provider() -> FirestoreResult<Arc<dyn TokenProvider>> {
        let service_account = CustomServiceAccount::from_env().map_err(|e| {
            FirestoreError::auth_error(format!("Failed to load service account: {}", e))
        })?;

        match service_account {
            Some(sa) => Ok(Arc::new(sa)),
            None => Err(FirestoreError::auth_error(
                "GOOGLE_APPLICATION_CREDENTIALS not set. \
                 Set it to the path of your service account JSON file.",
            )),
        }
    }

    pub fn config(&self) -> &FirestoreConfig {
        &self.config
    }

    fn document_path(&self, collection: &str, doc_id: &str) -> String {
        format!("{}/{}/{}", self.base_url, collection, doc_id)
    }

    fn is_access_token_expired(body: &str) -> bool {
        body.contains("ACCESS_TOKEN_EXPIRED") || body.contains("\"UNAUTHENTICATED\"")
    }

    /// Send a request built by `build`, refreshing the token once on expiry.
    async fn send_authorized<B>(&self, url: &str, build: B) -> FirestoreResult<Response>
    where
        B: Fn(&str) -> RequestBuilder,
    {
        let token = self.token_cache.get_token().await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        if !Self::is_access_token_expired(&body) {
            return Err(FirestoreError::from_http_status(
                401,
                format!("{} failed: {}", url, body),
            ));
        }

        debug!("Firestore access token expired, refreshing");
        self.token_cache.invalidate().await;
        let token = self.token_cache.get_token().await?;
        Ok(build(&token).send().await?)
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Fetch a document. Returns `None` if it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        doc_id: &str,
    ) -> FirestoreResult<Option<Document>> {
        let url = self.document_path(collection, doc_id);

        self.with_retry("get_document", || {
            self.execute_request("get_document", collection, Some(doc_id), async {
                let response = self
                    .send_authorized(&url, |token| self.http.get(&url).bearer_auth(token))
                    .await?;

                match response.status() {
                    StatusCode::OK => Ok(Some(response.json::<Document>().await?)),
                    StatusCode::NOT_FOUND => Ok(None),
                    status => Err(Self::handle_error_response(status, &url, response).await),
                }
            })
        })
        .await
    }

    /// Create a document with a caller-chosen ID. Fails with
    /// [`FirestoreError::AlreadyExists`] if the ID is taken.
    pub async fn create_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = format!(
            "{}/{}?documentId={}",
            self.base_url,
            collection,
            urlencoding::encode(doc_id)
        );
        let body = Document::new(fields);

        self.execute_request("create_document", collection, Some(doc_id), async {
            let response = self
                .send_authorized(&url, |token| {
                    self.http.post(&url).bearer_auth(token).json(&body)
                })
                .await?;

            match response.status() {
                StatusCode::OK | StatusCode::CREATED => Ok(response.json::<Document>().await?),
                StatusCode::CONFLICT => Err(FirestoreError::AlreadyExists(format!(
                    "{}/{}",
                    collection, doc_id
                ))),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Create or overwrite a document.
    pub async fn set_document(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
    ) -> FirestoreResult<Document> {
        let url = self.document_path(collection, doc_id);
        let body = Document::new(fields);

        self.execute_request("set_document", collection, Some(doc_id), async {
            let response = self
                .send_authorized(&url, |token| {
                    self.http.patch(&url).bearer_auth(token).json(&body)
                })
                .await?;

            match response.status() {
                StatusCode::OK => Ok(response.json::<Document>().await?),
                status => Err(Self::handle_error_response(status, &url, response).await),
            }
        })
        .await
    }

    /// Patch `update_mask` fields, only if the document's `updateTime` still
    /// equals `update_time`.
    ///
    /// A concurrent modification surfaces as [`FirestoreError::PreconditionFailed`].
    pub async fn update_document_with_precondition(
        &self,
        collection: &str,
        doc_id: &str,
        fields: HashMap<String, Value>,
        update_mask: &[&str],
        update_time: &str,
    ) -> FirestoreResult<Document> {
        let mut params: Vec<String> = update_mask
            .iter()
            .map(|f| format!("updateMask.fieldPaths={}", urlencoding::encode(f)))
            .collect();
        params.push(format!(
            "currentDocument.updateTime={}",
            urlencoding::encode(update_time)
        ));
        let url = format!(
            "{}?{}",
            self.document_path(collection, doc_id),
            params.join("&")
        );
        let body = Document::new(fields);

        self.execute_request(
            "update_document_precondition",
            collection,
            Some(doc_id),
            async {
                let response = self
                    .send_authorized(&url, |token| {
                        self.http.patch(&url).bearer_auth(token).json(&body)
                    })
                    .await?;

                match response.status() {
                    StatusCode::OK => Ok(response.json::<Document>().await?),
                    StatusCode::NOT_FOUND => Err(FirestoreError::not_found(format!(
                        "{}/{}",
                        collection, doc_id
                    ))),
                    status => {
                        let body_text = response.text().await.unwrap_or_default();
                        if status == StatusCode::PRECONDITION_FAILED
                            || status == StatusCode::CONFLICT
                            || body_text.contains("FAILED_PRECONDITION")
                        {
                            record_conflict(collection);
                            Err(FirestoreError::PreconditionFailed(format!(
                                "{}/{}: {}",
                                collection, doc_id, body_text
                            )))
                        } else {
                            Err(FirestoreError::from_http_status(
                                status.as_u16(),
                                format!("{} failed: {}", url, body_text),
                            ))
                        }
                    }
                }
            },
        )
        .await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run a structured query against the root collection set.
    pub async fn run_query(&self, query: StructuredQuery) -> FirestoreResult<Vec<Document>> {
        let url = format!("{}:runQuery", self.base_url);
        let request = RunQueryRequest {
            structured_query: query,
        };

        self.with_retry("run_query", || {
            self.execute_request("run_query", "query", None, async {
                let response = self
                    .send_authorized(&url, |token| {
                        self.http.post(&url).bearer_auth(token).json(&request)
                    })
                    .await?;

                match response.status() {
                    StatusCode::OK => {
                        // runQuery streams a JSON array, one element per result
                        let body = response.text().await.unwrap_or_default();
                        let responses: Vec<RunQueryResponse> = serde_json::from_str(&body)
                            .map_err(|e| {
                                FirestoreError::invalid_response(format!(
                                    "runQuery: {} (body prefix: {})",
                                    e,
                                    body.chars().take(200).collect::<String>()
                                ))
                            })?;
                        Ok(responses.into_iter().filter_map(|r| r.document).collect())
                    }
                    status => Err(Self::handle_error_response(status, &url, response).await),
                }
            })
        })
        .await
    }

    /// Count the documents matching `query` without fetching them.
    pub async fn count(&self, query: StructuredQuery) -> FirestoreResult<u64> {
        let url = format!("{}:runAggregationQuery", self.base_url);
        let request = RunAggregationQueryRequest {
            structured_aggregation_query: StructuredAggregationQuery {
                structured_query: query,
                aggregations: vec![Aggregation {
                    alias: "count".to_string(),
                    count: CountAggregation {},
                }],
            },
        };

        self.with_retry("count", || {
            self.execute_request("count", "query", None, async {
                let response = self
                    .send_authorized(&url, |token| {
                        self.http.post(&url).bearer_auth(token).json(&request)
                    })
                    .await?;

                match response.status() {
                    StatusCode::OK => {
                        let responses: Vec<RunAggregationQueryResponse> = response.json().await?;
                        responses
                            .iter()
                            .filter_map(|r| r.result.as_ref())
                            .filter_map(|r| r.aggregate_fields.as_ref())
                            .filter_map(|f| f.get("count"))
                            .find_map(u64::from_firestore_value)
                            .ok_or_else(|| {
                                FirestoreError::invalid_response("aggregation without count")
                            })
                    }
                    status => Err(Self::handle_error_response(status, &url, response).await),
                }
            })
        })
        .await
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    async fn with_retry<T, F, Fut>(&self, operation: &str, op: F) -> FirestoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = FirestoreResult<T>>,
    {
        crate::retry::with_retry(&self.config.retry, operation, op).await
    }

    /// Execute a request with tracing and metrics.
    async fn execute_request<T, F>(
        &self,
        operation: &str,
        collection: &str,
        doc_id: Option<&str>,
        fut: F,
    ) -> FirestoreResult<T>
    where
        F: std::future::Future<Output = FirestoreResult<T>>,
    {
        let span = info_span!(
            "firestore_request",
            operation = %operation,
            collection = %collection,
            doc_id = doc_id.unwrap_or("")
        );

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, status, latency_ms);

        result
    }

    async fn handle_error_response(
        status: StatusCode,
        url: &str,
        response: Response,
    ) -> FirestoreError {
        let body = response.text().await.unwrap_or_default();
        FirestoreError::from_http_status(status.as_u16(), format!("{} failed: {}", url, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Filter, ToFirestoreValue};
    use serial_test::serial;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOCS: &str = "/v1/projects/test-project/databases/(default)/documents";

    fn client(server: &MockServer) -> FirestoreClient {
        let mut config = FirestoreConfig::for_project("test-project");
        config.retry = RetryConfig::none();
        FirestoreClient::with_endpoint(config, server.uri(), TokenCache::fixed("test-token"))
            .unwrap()
    }

    #[test]
    #[serial]
    fn test_config_from_env_requires_project() {
        std::env::remove_var("GCP_PROJECT_ID");
        std::env::remove_var("FIREBASE_PROJECT_ID");
        assert!(FirestoreConfig::from_env().is_err());
    }

    #[test]
    #[serial]
    fn test_config_reads_emulator_host() {
        std::env::set_var("GCP_PROJECT_ID", "test-project");
        std::env::set_var("FIRESTORE_EMULATOR_HOST", "localhost:8080");
        let config = FirestoreConfig::from_env().unwrap();
        assert_eq!(config.emulator_host.as_deref(), Some("localhost:8080"));
        assert_eq!(config.database_id, "(default)");
        std::env::remove_var("FIRESTORE_EMULATOR_HOST");
        std::env::remove_var("GCP_PROJECT_ID");
    }

    #[tokio::test]
    async fn test_get_missing_document_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/jobs/missing", DOCS)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let doc = client(&server).get_document("jobs", "missing").await.unwrap();
        assert!(doc.is_none());
    }

    #[tokio::test]
    async fn test_stale_update_time_is_precondition_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(format!("{}/jobs/j1", DOCS)))
            .and(query_param("currentDocument.updateTime", "2024-01-01T00:00:00Z"))
            .respond_with(ResponseTemplate::new(400).set_body_string(
                r#"{"error":{"code":400,"status":"FAILED_PRECONDITION"}}"#,
            ))
            .mount(&server)
            .await;

        let mut fields = HashMap::new();
        fields.insert("status".to_string(), "processing".to_firestore_value());
        let err = client(&server)
            .update_document_with_precondition(
                "jobs",
                "j1",
                fields,
                &["status"],
                "2024-01-01T00:00:00Z",
            )
            .await
            .unwrap_err();

        assert!(err.is_precondition_failed());
    }

    #[tokio::test]
    async fn test_create_conflict_is_already_exists() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/jobs", DOCS)))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_document("jobs", "j1", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FirestoreError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_run_query_skips_empty_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runQuery", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "document": {
                        "name": "projects/test-project/databases/(default)/documents/jobs/a",
                        "fields": { "status": { "stringValue": "pending" } },
                        "updateTime": "2024-01-01T00:00:00.000001Z"
                    },
                    "readTime": "2024-01-01T00:00:01Z"
                },
                { "readTime": "2024-01-01T00:00:01Z" }
            ])))
            .mount(&server)
            .await;

        let query = StructuredQuery::collection("jobs").filter(Filter::field(
            "status",
            "EQUAL",
            "pending".to_firestore_value(),
        ));
        let docs = client(&server).run_query(query).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id(), Some("a"));
        assert_eq!(docs[0].get::<String>("status").as_deref(), Some("pending"));
    }

    #[tokio::test]
    async fn test_count_reads_aggregate_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}:runAggregationQuery", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "result": { "aggregateFields": { "count": { "integerValue": "42" } } },
                    "readTime": "2024-01-01T00:00:01Z"
                }
            ])))
            .mount(&server)
            .await;

        let count = client(&server)
            .count(StructuredQuery::collection("jobs"))
            .await
            .unwrap();
        assert_eq!(count, 42);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/jobs/j1", DOCS)))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"error":"ACCESS_TOKEN_EXPIRED"}"#),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("{}/jobs/j1", DOCS)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "projects/test-project/databases/(default)/documents/jobs/j1",
                "fields": {}
            })))
            .mount(&server)
            .await;

        let doc = client(&server).get_document("jobs", "j1").await.unwrap();
        assert_eq!(doc.and_then(|d| d.id().map(str::to_string)).as_deref(), Some("j1"));
    }
}
