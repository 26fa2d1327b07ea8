//! Completion service abstraction and hosted-provider clients.
//!
//! The service is treated as an opaque function: documents + instruction +
//! optional response schema in, text out (JSON when a schema is given).
//!
//! - **[`GeminiService`]** sends PDFs as inline binary parts and the schema
//!   as `responseSchema`.
//! - **[`OpenAiService`]** talks to any OpenAI-compatible chat endpoint;
//!   binary documents are converted to text first.
//!
//! # Failure classification
//!
//! - Input-length overflow (HTTP 413, or an error text matching
//!   [`OVERFLOW_SIGNATURES`]) → [`AnalysisError::ContextOverflow`], never retried.
//! - Client-side timeout → [`AnalysisError::Timeout`], never retried.
//! - HTTP 429, 5xx and transport errors → retried when `max_retries > 0`
//!   (backoff 1s, 2s, 4s, … capped at 32s), then [`AnalysisError::Service`].
//! - Any other HTTP error → [`AnalysisError::Service`] immediately.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CompletionConfig;
use crate::error::AnalysisError;
use crate::extract::document_as_text;
use crate::models::{DocumentContent, SourceDocument};
use crate::schema::{SchemaDialect, SchemaNode};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Substrings (lower-case) that identify an input-length overflow in a
/// provider's error text.
pub const OVERFLOW_SIGNATURES: &[&str] = &[
    "exceeds the maximum number of tokens",
    "input token count",
    "context length",
    "context_length_exceeded",
    "maximum context",
    "too many tokens",
    "request payload size exceeds",
    "request too large",
];

/// One call to the completion service.
#[derive(Debug, Clone)]
pub struct CompletionRequest<'a> {
    /// Attached in order, before the instruction. Empty for synthesis calls.
    pub documents: &'a [SourceDocument],
    pub instruction: String,
    /// When set, the service must answer with JSON of this shape.
    pub response_schema: Option<SchemaNode>,
    pub temperature: f32,
}

/// A hosted completion endpoint.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Label for logs, e.g. `gemini:gemini-2.5-flash`.
    fn label(&self) -> String;

    /// Performs the call and returns the raw response text.
    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AnalysisError>;
}

/// True when `message` looks like an input-length overflow report.
pub fn is_overflow_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    OVERFLOW_SIGNATURES.iter().any(|sig| lower.contains(sig))
}

/// Maps a failed HTTP exchange to an error, treating 413 and overflow text as overflow.
pub fn classify_http_failure(status: u16, message: &str) -> AnalysisError {
    if status == 413 || is_overflow_message(message) {
        AnalysisError::ContextOverflow(message.to_string())
    } else {
        AnalysisError::Service(format!("HTTP {}: {}", status, message))
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Pulls a readable message out of a provider error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(|m| m.as_str().map(String::from))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Sends a request built by `build`, retrying transient failures.
async fn send_with_retry<F>(build: F, max_retries: u32, timeout_secs: u64) -> Result<Value, AnalysisError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(attempt, delay_secs = delay.as_secs(), "retrying completion call");
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<Value>()
                        .await
                        .map_err(|e| AnalysisError::InvalidResponse(format!("response body is not JSON: {}", e)));
                }

                let body = response.text().await.unwrap_or_default();
                let message = error_message(&body);
                let err = classify_http_failure(status.as_u16(), &message);
                if matches!(err, AnalysisError::Service(_)) && is_retryable_status(status.as_u16()) {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) if e.is_timeout() => return Err(AnalysisError::Timeout(timeout_secs)),
            Err(e) => {
                last_err = Some(AnalysisError::Service(e.to_string()));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| AnalysisError::Service("completion failed after retries".into())))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, AnalysisError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AnalysisError::Service(format!("cannot build HTTP client: {}", e)))
}

// ============ Gemini ============

pub struct GeminiService {
    model: String,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl GeminiService {
    pub fn new(config: &CompletionConfig, api_key: String) -> Self {
        Self {
            model: config.model.clone(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

/// Request body for `models/{model}:generateContent`.
pub fn gemini_body(request: &CompletionRequest<'_>) -> Value {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut parts = Vec::with_capacity(request.documents.len() * 2 + 1);

    for doc in request.documents {
        match &doc.content {
            DocumentContent::Binary { bytes, mime } => {
                parts.push(json!({ "text": format!("===== DOCUMENT: {} =====", doc.name) }));
                parts.push(json!({
                    "inline_data": { "mime_type": mime, "data": engine.encode(bytes) }
                }));
            }
            DocumentContent::Text { text, origin } => {
                parts.push(json!({
                    "text": crate::corpus::text_with_header(&doc.name, origin, text)
                }));
            }
        }
    }
    parts.push(json!({ "text": request.instruction }));

    let mut generation_config = json!({ "temperature": request.temperature });
    match &request.response_schema {
        Some(schema) => {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = schema.render(SchemaDialect::Gemini);
        }
        None => {
            generation_config["responseMimeType"] = json!("text/plain");
        }
    }

    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    })
}

/// Concatenated text of the first candidate.
pub fn parse_gemini_response(json: &Value) -> Result<String, AnalysisError> {
    let candidate = match json.get("candidates").and_then(|c| c.get(0)) {
        Some(c) => c,
        None => {
            let reason = json
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates returned");
            return Err(AnalysisError::Service(format!("request was not answered: {}", reason)));
        }
    };

    let text: String = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        let finish = candidate
            .get("finishReason")
            .and_then(|r| r.as_str())
            .unwrap_or("unknown");
        return Err(AnalysisError::Service(format!(
            "empty response (finish reason: {})",
            finish
        )));
    }
    Ok(text)
}

#[async_trait]
impl CompletionService for GeminiService {
    fn label(&self) -> String {
        format!("gemini:{}", self.model)
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AnalysisError> {
        let client = http_client(self.timeout_secs)?;
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        let body = gemini_body(request);

        let json = send_with_retry(
            || {
                client
                    .post(&url)
                    .header("x-goog-api-key", &self.api_key)
                    .json(&body)
            },
            self.max_retries,
            self.timeout_secs,
        )
        .await?;

        parse_gemini_response(&json)
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiService {
    model: String,
    api_key: String,
    base_url: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiService {
    pub fn new(config: &CompletionConfig, api_key: String) -> Self {
        Self {
            model: config.model.clone(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

/// Request body for `chat/completions`. Binary documents become text here.
pub fn openai_body(model: &str, request: &CompletionRequest<'_>) -> Result<Value, AnalysisError> {
    let mut content = String::new();
    for doc in request.documents {
        let text = document_as_text(doc).map_err(|e| AnalysisError::UnreadableDocument {
            name: doc.name.clone(),
            reason: e.to_string(),
        })?;
        content.push_str(&text);
        content.push_str("\n\n");
    }
    content.push_str(&request.instruction);

    let mut body = json!({
        "model": model,
        "temperature": request.temperature,
        "messages": [{ "role": "user", "content": content }],
    });
    if let Some(schema) = &request.response_schema {
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": "analysis_result",
                "strict": false,
                "schema": schema.render(SchemaDialect::JsonSchema),
            }
        });
    }
    Ok(body)
}

pub fn parse_openai_response(json: &Value) -> Result<String, AnalysisError> {
    let choice = json
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| AnalysisError::Service("no choices returned".into()))?;
    match choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        _ => {
            let finish = choice
                .get("finish_reason")
                .and_then(|r| r.as_str())
                .unwrap_or("unknown");
            Err(AnalysisError::Service(format!(
                "empty response (finish reason: {})",
                finish
            )))
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiService {
    fn label(&self) -> String {
        format!("openai:{}", self.model)
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AnalysisError> {
        let body = openai_body(&self.model, request)?;
        let client = http_client(self.timeout_secs)?;
        let url = format!("{}/chat/completions", self.base_url);

        let json = send_with_retry(
            || {
                client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
            self.max_retries,
            self.timeout_secs,
        )
        .await?;

        parse_openai_response(&json)
    }
}

/// Builds the configured service. Fails when the credential is missing.
pub fn create_service(config: &CompletionConfig) -> anyhow::Result<Arc<dyn CompletionService>> {
    let api_key = config.api_key()?;
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiService::new(config, api_key))),
        "openai" => Ok(Arc::new(OpenAiService::new(config, api_key))),
        other => anyhow::bail!("Unknown completion provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalysisMode, ModeSet};
    use crate::schema::response_schema;

    fn docs() -> Vec<SourceDocument> {
        vec![
            SourceDocument::binary("A.pdf", b"%PDF-1.4".to_vec(), "application/pdf"),
            SourceDocument::text("ref.txt", "Title: X", "bibliographic record"),
        ]
    }

    #[test]
    fn overflow_signatures_match_case_insensitively() {
        assert!(is_overflow_message(
            "The input token count (1200000) exceeds the maximum number of tokens allowed (1048576)."
        ));
        assert!(is_overflow_message("This model's maximum context length is 128000 tokens"));
        assert!(!is_overflow_message("Service Unavailable"));
    }

    #[test]
    fn classification_distinguishes_overflow() {
        assert!(matches!(
            classify_http_failure(400, "Input token count exceeds limit"),
            AnalysisError::ContextOverflow(_)
        ));
        assert!(matches!(
            classify_http_failure(413, "payload"),
            AnalysisError::ContextOverflow(_)
        ));
        assert!(matches!(
            classify_http_failure(500, "internal"),
            AnalysisError::Service(_)
        ));
    }

    #[test]
    fn error_message_prefers_provider_text() {
        assert_eq!(
            error_message(r#"{"error":{"code":400,"message":"bad schema"}}"#),
            "bad schema"
        );
        assert_eq!(error_message(r#"{"error":"quota"}"#), "quota");
        assert_eq!(error_message("  plain failure \n"), "plain failure");
    }

    #[test]
    fn gemini_body_attaches_documents_then_instruction() {
        let docs = docs();
        let req = CompletionRequest {
            documents: &docs,
            instruction: "do the analysis".into(),
            response_schema: Some(response_schema(ModeSet::empty().with(AnalysisMode::Systematic))),
            temperature: 0.2,
        };
        let body = gemini_body(&req);
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[1]["inline_data"]["mime_type"], "application/pdf");
        assert_eq!(parts[1]["inline_data"]["data"], "JVBERi0xLjQ=");
        assert!(parts[2]["text"].as_str().unwrap().contains("DOCUMENT: ref.txt"));
        assert_eq!(parts[3]["text"], "do the analysis");
        let cfg = &body["generationConfig"];
        assert_eq!(cfg["responseMimeType"], "application/json");
        assert!((cfg["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(cfg["responseSchema"]["type"], "OBJECT");
    }

    #[test]
    fn gemini_body_without_schema_is_plain_text() {
        let req = CompletionRequest {
            documents: &[],
            instruction: "synthesise".into(),
            response_schema: None,
            temperature: 0.2,
        };
        let body = gemini_body(&req);
        assert_eq!(body["contents"][0]["parts"].as_array().unwrap().len(), 1);
        assert_eq!(body["generationConfig"]["responseMimeType"], "text/plain");
        assert!(body["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn gemini_response_text_is_concatenated() {
        let json = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"docu" }, { "text": "ments\":[]}" }] } }]
        });
        assert_eq!(parse_gemini_response(&json).unwrap(), "{\"documents\":[]}");
    }

    #[test]
    fn gemini_blocked_prompt_is_a_service_error() {
        let json = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        let err = parse_gemini_response(&json).unwrap_err();
        assert!(err.to_string().contains("SAFETY"));
    }

    #[test]
    fn openai_body_rejects_unreadable_pdf() {
        let docs = vec![SourceDocument::binary("broken.pdf", b"nope".to_vec(), "application/pdf")];
        let req = CompletionRequest {
            documents: &docs,
            instruction: "x".into(),
            response_schema: None,
            temperature: 0.2,
        };
        let err = openai_body("gpt", &req).unwrap_err();
        assert!(matches!(err, AnalysisError::UnreadableDocument { .. }));
        assert!(err.is_local());
    }

    #[test]
    fn openai_body_carries_json_schema() {
        let docs = vec![SourceDocument::text("a.txt", "hello", "file a.txt")];
        let req = CompletionRequest {
            documents: &docs,
            instruction: "analyse".into(),
            response_schema: Some(response_schema(ModeSet::all())),
            temperature: 0.2,
        };
        let body = openai_body("gpt-4o-mini", &req).unwrap();
        let content = body["messages"][0]["content"].as_str().unwrap();
        assert!(content.contains("hello"));
        assert!(content.ends_with("analyse"));
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(
            body["response_format"]["json_schema"]["schema"]["properties"]["analise_tematica"]["type"],
            json!(["object", "null"])
        );
    }

    #[test]
    fn openai_response_content() {
        let json = json!({ "choices": [{ "message": { "content": "{}" }, "finish_reason": "stop" }] });
        assert_eq!(parse_openai_response(&json).unwrap(), "{}");
        let json = json!({ "choices": [{ "message": { "content": "" }, "finish_reason": "length" }] });
        assert!(parse_openai_response(&json).unwrap_err().to_string().contains("length"));
    }
}
