//! Gemini content analyzer.
//!
//! Sends the source URL as a `fileData` part together with an extraction
//! prompt and parses the JSON the model returns. HTTP failures are mapped onto
//! the typed [`AnalyzerError`] taxonomy so the pool can tell transient errors
//! from rejected input.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vidq_models::{ContentAnalysis, Highlight, JobPayload};

use crate::analyzer::Analyzer;
use crate::error::{AnalyzerError, AnalyzerResult};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    /// Tried in order; the next one is used when a model is unavailable
    pub models: Vec<String>,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            models: vec!["gemini-2.5-flash".to_string(), "gemini-2.5-flash-lite".to_string()],
            timeout: Duration::from_secs(300),
        }
    }
}

impl GeminiConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("GEMINI_BASE_URL").unwrap_or(defaults.base_url),
            models: std::env::var("GEMINI_MODELS")
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|m| m.trim().to_string())
                        .filter(|m| !m.is_empty())
                        .collect::<Vec<_>>()
                })
                .filter(|models| !models.is_empty())
                .unwrap_or(defaults.models),
            timeout: std::env::var("GEMINI_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part {
    FileData {
        #[serde(rename = "fileUri")]
        file_uri: String,
    },
    Text(String),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// JSON object the prompt asks the model to produce.
#[derive(Debug, Deserialize)]
struct ModelOutput {
    video_title: Option<String>,
    summary: Option<String>,
    language: Option<String>,
    #[serde(default)]
    highlights: Vec<Highlight>,
}

/// Analyzer backed by the Gemini `generateContent` API.
pub struct GeminiAnalyzer {
    client: Client,
    config: GeminiConfig,
    api_key: String,
}

impl GeminiAnalyzer {
    pub fn new(config: GeminiConfig, api_key: impl Into<String>) -> AnalyzerResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("vidq-analyzer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AnalyzerError::unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            api_key: api_key.into(),
        })
    }

    fn build_prompt(payload: &JobPayload) -> String {
        let locale = payload.locale.as_deref().unwrap_or("en");
        let options = if payload.options.is_empty() {
            String::new()
        } else {
            format!(
                "\nCaller options (JSON): {}",
                serde_json::Value::Object(payload.options.clone())
            )
        };

        format!(
            r#"Analyze the attached video and return ONLY a single JSON object with this schema:
{{
  "video_title": "Title of the video",
  "summary": "Two or three sentence summary",
  "language": "Spoken language as a BCP-47 tag",
  "highlights": [
    {{
      "id": 1,
      "title": "Short title",
      "start": "HH:MM:SS",
      "end": "HH:MM:SS",
      "duration": 0,
      "hook_category": "Category",
      "reason": "Why this segment stands out",
      "description": "One-line caption"
    }}
  ]
}}

Write titles, summary and captions in locale "{locale}".
Extract 3 to 10 highlights that are 20-90 seconds long and compute duration in seconds.{options}
"#
        )
    }

    async fn call_model(&self, model: &str, payload: &JobPayload) -> AnalyzerResult<ContentAnalysis> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::FileData {
                        file_uri: payload.url.clone(),
                    },
                    Part::Text(Self::build_prompt(payload)),
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AnalyzerError::unavailable(format!("unreadable Gemini response: {}", e)))?;

        let text = extract_text(&body)?;
        let output: ModelOutput = serde_json::from_str(strip_code_fence(text))
            .map_err(|e| AnalyzerError::unavailable(format!("malformed model output: {}", e)))?;

        let mut analysis = ContentAnalysis::new(payload.url.clone());
        analysis.video_title = output.video_title;
        analysis.summary = output.summary;
        analysis.language = output.language;
        analysis.highlights = output.highlights;
        analysis.model = Some(model.to_string());
        Ok(analysis)
    }

    fn map_transport_error(&self, e: reqwest::Error) -> AnalyzerError {
        if e.is_timeout() {
            AnalyzerError::Timeout(self.config.timeout)
        } else {
            AnalyzerError::unavailable(format!("Gemini request failed: {}", e))
        }
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(&self, payload: &JobPayload) -> AnalyzerResult<ContentAnalysis> {
        let mut last_error = None;

        for model in &self.config.models {
            debug!(model = %model, url = %payload.url, "Calling Gemini");
            match self.call_model(model, payload).await {
                Ok(analysis) => {
                    info!(model = %model, highlights = analysis.highlights.len(), "Gemini analysis complete");
                    return Ok(analysis);
                }
                Err(e @ AnalyzerError::Unavailable(_)) => {
                    warn!(model = %model, error = %e, "Gemini model unavailable, trying next");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| AnalyzerError::unavailable("no Gemini models configured")))
    }

    fn name(&self) -> &str {
        self.config.models.first().map(String::as_str).unwrap_or("gemini")
    }
}

fn map_status(status: StatusCode, body: &str) -> AnalyzerError {
    let detail = format!("Gemini returned {}: {}", status, truncate(body, 300));
    match status.as_u16() {
        429 => AnalyzerError::RateLimited(detail),
        400 | 413 | 415 | 422 => AnalyzerError::InvalidInput(detail),
        408 | 504 => AnalyzerError::Timeout(Duration::ZERO),
        _ => AnalyzerError::Unavailable(detail),
    }
}

fn extract_text(response: &GenerateResponse) -> AnalyzerResult<&str> {
    if let Some(reason) = response
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(AnalyzerError::invalid_input(format!("content blocked: {}", reason)));
    }

    let candidate = response
        .candidates
        .first()
        .ok_or_else(|| AnalyzerError::unavailable("Gemini returned no candidates"))?;

    if let Some(reason @ ("SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST")) =
        candidate.finish_reason.as_deref()
    {
        return Err(AnalyzerError::invalid_input(format!("content blocked: {}", reason)));
    }

    candidate
        .content
        .as_ref()
        .and_then(|c| c.parts.iter().find_map(|p| p.text.as_deref()))
        .ok_or_else(|| AnalyzerError::unavailable("Gemini candidate has no text"))
}

/// Remove a surrounding markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn analyzer(server: &MockServer, models: &[&str]) -> GeminiAnalyzer {
        let config = GeminiConfig {
            base_url: server.uri(),
            models: models.iter().map(|m| m.to_string()).collect(),
            timeout: Duration::from_secs(5),
        };
        GeminiAnalyzer::new(config, "test-key").unwrap()
    }

    fn model_reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": { "parts": [{ "text": text }], "role": "model" },
                "finishReason": "STOP"
            }]
        })
    }

    fn payload() -> JobPayload {
        JobPayload::new("https://www.youtube.com/watch?v=dQw4w9WgXcQ").with_locale("pt-BR")
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_request_carries_file_uri() {
        let part = serde_json::to_value(Part::FileData {
            file_uri: "https://youtu.be/x".into(),
        })
        .unwrap();
        assert_eq!(part["fileData"]["fileUri"], "https://youtu.be/x");
        assert_eq!(serde_json::to_value(Part::Text("hi".into())).unwrap()["text"], "hi");
    }

    #[tokio::test]
    async fn test_parses_fenced_model_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(model_reply(
                "```json\n{\"video_title\":\"Demo\",\"summary\":\"s\",\"highlights\":[{\"id\":1,\"title\":\"Hook\",\"start\":\"00:00:10\",\"end\":\"00:00:40\",\"duration\":30}]}\n```",
            )))
            .mount(&server)
            .await;

        let analysis = analyzer(&server, &["gemini-test"]).analyze(&payload()).await.unwrap();
        assert_eq!(analysis.video_title.as_deref(), Some("Demo"));
        assert_eq!(analysis.highlights.len(), 1);
        assert_eq!(analysis.highlights[0].duration, 30);
        assert_eq!(analysis.model.as_deref(), Some("gemini-test"));
        assert_eq!(analysis.video_url, payload().url);
    }

    #[tokio::test]
    async fn test_status_codes_map_to_typed_errors() {
        let cases = [
            (429, "rate_limited"),
            (400, "invalid_input"),
            (503, "unavailable"),
            (504, "timeout"),
        ];
        for (status, kind) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
                .mount(&server)
                .await;

            let err = analyzer(&server, &["m"]).analyze(&payload()).await.unwrap_err();
            assert_eq!(err.kind(), kind, "status {}", status);
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_next_model_when_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/primary:generateContent"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/backup:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(model_reply(
                r#"{"video_title":"Backup","highlights":[]}"#,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let analysis = analyzer(&server, &["primary", "backup"])
            .analyze(&payload())
            .await
            .unwrap();
        assert_eq!(analysis.model.as_deref(), Some("backup"));
    }

    #[tokio::test]
    async fn test_rate_limit_does_not_fall_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/primary:generateContent"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/backup:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(model_reply("{}")))
            .expect(0)
            .mount(&server)
            .await;

        let err = analyzer(&server, &["primary", "backup"])
            .analyze(&payload())
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzerError::RateLimited(_)));
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_invalid_input() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "promptFeedback": { "blockReason": "SAFETY" }
            })))
            .mount(&server)
            .await;

        let err = analyzer(&server, &["m"]).analyze(&payload()).await.unwrap_err();
        assert!(err.is_terminal());
    }
}
