mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use batch_scribe::{
    config::Config,
    orchestrator::{BatchOrchestrator, RunState},
    server::{AppState, build_router},
};
use common::{FakeEngine, orchestrator_with, pdf_bytes};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app_with(cfg: &Config) -> (Router, Arc<BatchOrchestrator>) {
    let (engine, _spy) = FakeEngine::new();
    app_over(cfg, engine)
}

fn app_over(cfg: &Config, engine: FakeEngine) -> (Router, Arc<BatchOrchestrator>) {
    let orchestrator = Arc::new(orchestrator_with(engine));
    let router = build_router(AppState::new(cfg, Arc::clone(&orchestrator)));
    (router, orchestrator)
}

fn app() -> (Router, Arc<BatchOrchestrator>) {
    app_with(&Config::default())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request builder should not fail")
}

fn post(uri: &str, content_type: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .expect("request builder should not fail")
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .expect("request builder should not fail")
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("response body must be readable")
        .to_bytes()
        .to_vec()
}

async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("response must be valid JSON")
}

fn header_str<'a>(response: &'a Response<Body>, name: header::HeaderName) -> &'a str {
    response
        .headers()
        .get(name)
        .expect("header present")
        .to_str()
        .expect("header must be valid utf-8")
}

#[tokio::test]
async fn healthz_returns_ok_json() {
    let (app, _) = app();
    let response = send(&app, get("/healthz")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn export_without_text_is_a_bad_request() {
    let (app, _) = app();
    for uri in [
        "/export/plain-text",
        "/export/plain-text?text=",
        "/export/rich-document",
    ] {
        let response = send(&app, get(uri)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body_json(response).await["error"], "Text is required");
    }
}

#[tokio::test]
async fn plain_text_export_is_an_attachment() {
    let (app, _) = app();
    let response = send(&app, get("/export/plain-text?text=hello%20world")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE),
        "text/plain; charset=utf-8"
    );
    assert_eq!(
        header_str(&response, header::CONTENT_DISPOSITION),
        "attachment; filename=extracted_text.txt"
    );
    assert_eq!(body_bytes(response).await, b"hello world");
}

#[tokio::test]
async fn rich_document_export_is_a_docx_attachment() {
    let (app, _) = app();
    let response = send(&app, get("/export/rich-document?text=hello")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    );
    assert_eq!(
        header_str(&response, header::CONTENT_DISPOSITION),
        "attachment; filename=extracted_text.docx"
    );
    assert!(body_bytes(response).await.starts_with(b"PK"));
}

#[tokio::test]
async fn extract_with_empty_body_is_a_bad_request() {
    let (app, _) = app();
    let response = send(&app, post("/extract", "image/png", Vec::new())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "No document data received");
}

#[tokio::test]
async fn extract_reads_the_pdf_text_layer() {
    let (app, _) = app();
    let body = pdf_bytes(&["alpha", "beta"]);
    let response = send(&app, post("/extract", "application/pdf", body)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "text": "alpha\nbeta" }));
}

#[tokio::test]
async fn extract_recognizes_images() {
    let (app, _) = app();
    let response = send(&app, post("/extract", "image/png", b"scanned words".to_vec())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "text": "scanned words" }));
}

#[tokio::test]
async fn extract_rejects_unsupported_kinds() {
    let (app, _) = app();
    let response = send(&app, post("/extract", "text/plain", b"just text".to_vec())).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_kind");
}

#[tokio::test]
async fn oversized_uploads_are_rejected() {
    let mut cfg = Config::default();
    cfg.limits.max_document_bytes = 8;
    let (app, _) = app_with(&cfg);
    let response = send(&app, post("/extract", "image/png", vec![b'x'; 64])).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn exporting_an_empty_basket_conflicts() {
    let (app, _) = app();
    let response = send(&app, get("/results/export")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "empty_export");
}

#[tokio::test]
async fn invalid_document_id_is_a_bad_request() {
    let (app, _) = app();
    let response = send(&app, delete("/documents/not-an-id")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_parameter");
}

#[tokio::test]
async fn second_batch_start_conflicts_immediately() {
    let (engine, spy) = FakeEngine::gated();
    let (app, orchestrator) = app_over(&Config::default(), engine);
    orchestrator.submit(common::image("slow"));

    let first = send(&app, post("/batch/start", "application/json", Vec::new())).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(first).await["state"], "starting");

    let second = send(&app, post("/batch/start", "application/json", Vec::new())).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["error"], "already_running");

    spy.release(1);
    for _ in 0..200 {
        if orchestrator.results().len() == 1 && orchestrator.state() == RunState::Idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("batch did not finish in time");
}

#[tokio::test]
async fn batch_flow_over_http() {
    let (app, orchestrator) = app();

    let response = send(
        &app,
        post("/documents?name=scan.png", "image/png", b"from image".to_vec()),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let first = body_json(response).await["id"].as_str().unwrap().to_string();

    let response = send(
        &app,
        post("/documents?name=doc.pdf", "application/pdf", pdf_bytes(&["from pdf"])),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let listed = body_json(send(&app, get("/documents")).await).await;
    assert_eq!(listed.as_array().unwrap().len(), 2);
    assert_eq!(listed[0]["id"], first.as_str());
    assert_eq!(listed[0]["state"]["status"], "pending");

    let response = send(&app, post("/batch/start", "application/json", Vec::new())).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let mut finished = false;
    for _ in 0..200 {
        if orchestrator.results().len() == 2
            && orchestrator.state() == RunState::Idle
        {
            finished = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(finished, "batch did not finish in time");

    let status = body_json(send(&app, get("/batch")).await).await;
    assert_eq!(status["state"], "idle");
    assert_eq!(status["progress"]["fraction"], 1.0);

    let results = body_json(send(&app, get("/results")).await).await;
    assert_eq!(results[0]["text"], "from image");
    assert_eq!(results[1]["text"], "from pdf");

    let response = send(&app, get("/results/export")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, header::CONTENT_DISPOSITION),
        "attachment; filename=ocr_results.txt"
    );
    assert_eq!(
        body_bytes(response).await,
        b"from image\n\n--- Next File ---\n\nfrom pdf"
    );

    let response = send(&app, delete(&format!("/documents/{first}?with_result=true"))).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let results = body_json(send(&app, get("/results")).await).await;
    assert_eq!(results.as_array().unwrap().len(), 1);
}
