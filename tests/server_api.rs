//! HTTP API tests driven through the router without binding a socket.

use async_trait::async_trait;
use axum::body::Body;
use base64::Engine;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tower::ServiceExt;

use corpus_analysis::completion::{CompletionRequest, CompletionService};
use corpus_analysis::config::Config;
use corpus_analysis::error::AnalysisError;
use corpus_analysis::server::{router, AppState};

const QUESTION: &str = "What is the study's objective?";

/// Answers analysis calls with a fixed mapping and synthesis calls with Markdown.
struct FakeService {
    calls: AtomicUsize,
    overflow: bool,
}

#[async_trait]
impl CompletionService for FakeService {
    fn label(&self) -> String {
        "fake".into()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.overflow {
            return Err(AnalysisError::ContextOverflow("input token count too high".into()));
        }
        if request.response_schema.is_none() {
            return Ok("## Convergences\nBoth state an aim.".into());
        }
        Ok(mapping_reply())
    }
}

fn mapping_reply() -> String {
    json!({
        "documents": [
            {"document": "A.txt", "respostas": [{"pergunta": QUESTION, "resposta": "To measure X",
                "evidencia_textual": "we aim to measure X", "pagina": 3}]},
            {"document": "B.pdf", "respostas": [{"pergunta": QUESTION, "resposta": "To survey Y",
                "evidencia_textual": "this survey of Y", "pagina": null}]}
        ]
    })
    .to_string()
}

/// Holds the first synthesis call until released, so a new analysis can
/// land while it is in flight.
struct GatedService {
    syntheses: AtomicUsize,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl CompletionService for GatedService {
    fn label(&self) -> String {
        "gated".into()
    }

    async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, AnalysisError> {
        if request.response_schema.is_some() {
            return Ok(mapping_reply());
        }
        let n = self.syntheses.fetch_add(1, Ordering::SeqCst) + 1;
        if self.gated.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(format!("synthesis {}", n))
    }
}

fn state_with(config: Config, overflow: bool) -> (AppState, Arc<FakeService>) {
    let service = Arc::new(FakeService {
        calls: AtomicUsize::new(0),
        overflow,
    });
    (AppState::new(config, service.clone()), service)
}

fn state(overflow: bool) -> (AppState, Arc<FakeService>) {
    state_with(Config::default(), overflow)
}

fn pdf_body(size: usize) -> Value {
    let mut bytes = b"%PDF-1.4\n".to_vec();
    bytes.resize(size, b'x');
    json!({
        "modes": ["systematic"],
        "mapping_questions": [QUESTION],
        "documents": [{
            "name": "big.pdf",
            "mime": "application/pdf",
            "data_base64": base64::engine::general_purpose::STANDARD.encode(&bytes)
        }]
    })
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

fn as_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}

async fn new_session(app: &axum::Router) -> String {
    let (status, body) = send(app, "POST", "/sessions", None).await;
    assert_eq!(status, StatusCode::CREATED);
    as_json(&body)["session_id"].as_str().unwrap().to_string()
}

fn analyze_body() -> Value {
    json!({
        "modes": ["systematic"],
        "mapping_questions": [QUESTION],
        "documents": [
            {"name": "A.txt", "text": "We aim to measure X."},
            {"name": "B.pdf", "mime": "application/pdf", "data_base64": "JVBERi0xLjQ="}
        ]
    })
}

#[tokio::test]
async fn health_reports_ok() {
    let (state, _) = state(false);
    let app = router(state);
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["status"], "ok");
}

#[tokio::test]
async fn analyze_then_fetch_tables_and_synthesis() {
    let (state, service) = state(false);
    let app = router(state);
    let id = new_session(&app).await;

    let (status, body) = send(&app, "POST", &format!("/sessions/{}/analyze", id), Some(analyze_body())).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    let json = as_json(&body);
    assert_eq!(json["result"]["mapeamento_sistematico"]["documents"][1]["respostas"][0]["pagina"], Value::Null);

    let (status, body) = send(&app, "GET", &format!("/sessions/{}/tables/mapeamento_quadro?format=tsv", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let tsv = String::from_utf8(body).unwrap();
    assert!(tsv.starts_with("Document\tWhat is the study's objective?\n"));
    assert!(tsv.contains("(Page null)"));

    let (status, _) = send(&app, "GET", &format!("/sessions/{}/tables/temas", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let synth = json!({ "question": QUESTION });
    let (status, body) = send(&app, "POST", &format!("/sessions/{}/synthesis", id), Some(synth.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["cached"], false);

    let (status, body) = send(&app, "POST", &format!("/sessions/{}/synthesis", id), Some(synth)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["cached"], true);
    assert_eq!(service.calls.load(Ordering::SeqCst), 2);

    let refresh = json!({ "question": QUESTION, "refresh": true });
    let (_, body) = send(&app, "POST", &format!("/sessions/{}/synthesis", id), Some(refresh)).await;
    assert_eq!(as_json(&body)["cached"], false);
    assert_eq!(service.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn sessions_do_not_share_results() {
    let (state, _) = state(false);
    let app = router(state);
    let first = new_session(&app).await;
    let second = new_session(&app).await;

    let (status, _) = send(&app, "POST", &format!("/sessions/{}/analyze", first), Some(analyze_body())).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "GET", &format!("/sessions/{}/result", second), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(as_json(&body)["error"]["code"], "not_found");
}

#[tokio::test]
async fn validation_error_names_field_and_skips_service() {
    let (state, service) = state(false);
    let app = router(state);
    let id = new_session(&app).await;

    let body = json!({
        "modes": ["thematic"],
        "documents": [{"name": "A.txt", "text": "x"}]
    });
    let (status, body) = send(&app, "POST", &format!("/sessions/{}/analyze", id), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let json = as_json(&body);
    assert_eq!(json["error"]["code"], "validation_error");
    assert!(json["error"]["message"].as_str().unwrap().contains("thematic_question"));
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn overflow_maps_to_its_own_code() {
    let (state, _) = state(true);
    let app = router(state);
    let id = new_session(&app).await;

    let (status, body) = send(&app, "POST", &format!("/sessions/{}/analyze", id), Some(analyze_body())).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(as_json(&body)["error"]["code"], "context_overflow");
}

#[tokio::test]
async fn deleted_session_is_gone() {
    let (state, _) = state(false);
    let app = router(state);
    let id = new_session(&app).await;

    let (status, _) = send(&app, "DELETE", &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", &format!("/sessions/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", "/sessions/not-a-uuid/result", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn several_mib_upload_reaches_the_service() {
    let (state, service) = state(false);
    let app = router(state);
    let id = new_session(&app).await;

    let uri = format!("/sessions/{}/analyze", id);
    let (status, body) = send(&app, "POST", &uri, Some(pdf_body(5 * 1024 * 1024))).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    assert_eq!(as_json(&body)["corpus_bytes"], 5 * 1024 * 1024);
    assert_eq!(service.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn oversized_bodies_report_corpus_too_large() {
    let mut config = Config::default();
    config.limits.max_corpus_bytes = 64 * 1024;
    let (state, service) = state_with(config, false);
    let app = router(state);
    let id = new_session(&app).await;
    let uri = format!("/sessions/{}/analyze", id);

    // Within the body limit, over the corpus ceiling.
    let (status, body) = send(&app, "POST", &uri, Some(pdf_body(100 * 1024))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(as_json(&body)["error"]["code"], "corpus_too_large");

    // Over the body limit itself.
    let (status, body) = send(&app, "POST", &uri, Some(pdf_body(2 * 1024 * 1024))).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(as_json(&body)["error"]["code"], "corpus_too_large");
    assert_eq!(service.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn synthesis_of_a_replaced_result_is_not_cached() {
    let service = Arc::new(GatedService {
        syntheses: AtomicUsize::new(0),
        gated: AtomicBool::new(true),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let app = router(AppState::new(Config::default(), service.clone()));
    let id = new_session(&app).await;
    let analyze = format!("/sessions/{}/analyze", id);
    let synthesis = format!("/sessions/{}/synthesis", id);

    let (status, _) = send(&app, "POST", &analyze, Some(analyze_body())).await;
    assert_eq!(status, StatusCode::OK);

    let in_flight = {
        let app = app.clone();
        let uri = synthesis.clone();
        tokio::spawn(async move { send(&app, "POST", &uri, Some(json!({ "question": QUESTION }))).await })
    };
    service.entered.notified().await;

    let (status, _) = send(&app, "POST", &analyze, Some(analyze_body())).await;
    assert_eq!(status, StatusCode::OK);
    service.release.notify_one();

    let (status, body) = in_flight.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(as_json(&body)["markdown"], "synthesis 1");

    let (_, body) = send(&app, "POST", &synthesis, Some(json!({ "question": QUESTION }))).await;
    let json = as_json(&body);
    assert_eq!(json["cached"], false);
    assert_eq!(json["markdown"], "synthesis 2");
}
