//! Control-plane behavior against an in-process router with the mock model.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tempfile::TempDir;
use tower::util::ServiceExt;

use firmforge_llm::PromptLibrary;
use firmforge_mcp::Mcp;
use firmforge_orchestrator::{default_model_factory, ExecutorConfig, PipelineExecutor};
use firmforge_retrieval::{Corpus, DocumentMeta, LoadedDocument, Priority, RetrievalEngine};
use firmforge_server::{build_router, AppState, ServerConfig};

fn test_app(dir: &TempDir) -> (Router, AppState) {
    let config = ServerConfig::default().with_output_root(dir.path());
    let retrieval = Arc::new(RetrievalEngine::new(Corpus::from_documents(vec![
        LoadedDocument {
            meta: DocumentMeta {
                id: "uart-guidance".into(),
                filename: "uart.md".into(),
                domain: "protocol".into(),
                priority: Priority::High,
                keywords: vec!["uart".into()],
                module_types: vec!["uart".into()],
                search_weight: 0.7,
            },
            content: "Use ring buffers for UART receive paths.".into(),
        },
    ])));
    let executor = Arc::new(PipelineExecutor::new(
        ExecutorConfig {
            output_root: dir.path().to_path_buf(),
            ..ExecutorConfig::default()
        },
        Arc::new(Mcp::canonical()),
        retrieval.clone(),
        Arc::new(PromptLibrary::builtin()),
        default_model_factory(),
    ));
    let state = AppState {
        executor,
        retrieval,
        config,
    };
    (build_router(state.clone()), state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

fn generate_body() -> serde_json::Value {
    serde_json::json!({
        "specification": {
            "project_name": "P",
            "mcu": "ESP32",
            "modules": [
                {"id": "uart0", "name": "uart0", "type": "uart",
                 "parameters": {"baud": 115200}}
            ]
        }
    })
}

async fn wait_completed(app: &Router, run_id: &str) -> serde_json::Value {
    for _ in 0..600 {
        let (status, run) = get(app, &format!("/api/runs/{run_id}")).await;
        assert_eq!(status, StatusCode::OK);
        if run["status"] == "completed" || run["status"] == "failed" {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never finished");
}

#[tokio::test]
async fn health_reports_ok() {
    let dir = TempDir::new().unwrap();
    let (app, _) = test_app(&dir);
    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn generate_then_poll_until_completed() {
    let dir = TempDir::new().unwrap();
    let (app, _) = test_app(&dir);

    let (status, response) = post_json(&app, "/api/generate", generate_body()).await;
    assert_eq!(status, StatusCode::OK);
    let run_id = response["run_id"].as_str().unwrap().to_string();

    let run = wait_completed(&app, &run_id).await;
    assert_eq!(run["status"], "completed");
    assert_eq!(run["progress"], 100);

    let (status, runs) = get(&app, "/api/runs").await;
    assert_eq!(status, StatusCode::OK);
    assert!(runs
        .as_array()
        .unwrap()
        .iter()
        .any(|r| r["run_id"] == run_id.as_str()));
}

#[tokio::test]
async fn invalid_specification_is_rejected_without_creating_a_run() {
    let dir = TempDir::new().unwrap();
    let (app, state) = test_app(&dir);
    let body = serde_json::json!({
        "specification": {"project_name": "", "mcu": "ESP32", "modules": []}
    });
    let (status, error) = post_json(&app, "/api/generate", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "bad_request");
    assert!(state.executor.registry().list().is_empty());
}

#[tokio::test]
async fn unknown_runs_return_404() {
    let dir = TempDir::new().unwrap();
    let (app, _) = test_app(&dir);
    let (status, _) = get(&app, "/api/runs/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn artifacts_listing_covers_the_run_and_skips_sidecars() {
    let dir = TempDir::new().unwrap();
    let (app, _) = test_app(&dir);
    let (_, response) = post_json(&app, "/api/generate", generate_body()).await;
    let run_id = response["run_id"].as_str().unwrap().to_string();
    wait_completed(&app, &run_id).await;

    let (status, artifacts) = get(&app, "/api/artifacts").await;
    assert_eq!(status, StatusCode::OK);
    let items = artifacts.as_array().unwrap();
    assert!(!items.is_empty());
    assert!(items
        .iter()
        .all(|a| !a["file_name"].as_str().unwrap().ends_with(".meta.json")));
    assert!(items
        .iter()
        .any(|a| a["file_path"] == "module_code/uart0/uart0.c"));
    assert!(items.iter().all(|a| a["run_id"] == run_id.as_str()));
}

#[tokio::test]
async fn output_endpoint_serves_text_and_parsed_json() {
    let dir = TempDir::new().unwrap();
    let (app, _) = test_app(&dir);
    let (_, response) = post_json(&app, "/api/generate", generate_body()).await;
    let run_id = response["run_id"].as_str().unwrap().to_string();
    wait_completed(&app, &run_id).await;

    let (status, body) =
        get(&app, &format!("/api/output/{run_id}/architecture/architecture.md")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["content"].as_str().unwrap().starts_with("# "));

    let (status, log) =
        get(&app, &format!("/api/output/{run_id}/build_log/build_log.json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log["build_type"], "source_only");

    let (status, _) = get(&app, &format!("/api/output/{run_id}/architecture/nope.md")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, &format!("/api/output/{run_id}/..%2Fsecrets")).await;
    assert_ne!(status, StatusCode::OK);
}

#[tokio::test]
async fn run_logs_lead_with_the_latest_quality_report() {
    let dir = TempDir::new().unwrap();
    let (app, _) = test_app(&dir);
    let (_, response) = post_json(&app, "/api/generate", generate_body()).await;
    let run_id = response["run_id"].as_str().unwrap().to_string();
    wait_completed(&app, &run_id).await;

    let (status, logs) = get(&app, &format!("/api/runs/{run_id}/logs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs["run_id"], run_id.as_str());
    let reports = logs["quality_reports"].as_array().unwrap();
    assert_eq!(reports[0]["filename"], "quality_report_latest.json");
    assert!(reports.len() >= 2);
    let builds = logs["build_logs"].as_array().unwrap();
    assert_eq!(builds[0]["data"]["compilation_status"], "skipped");
}

#[tokio::test]
async fn architecture_endpoints_serve_generated_documents() {
    let dir = TempDir::new().unwrap();
    let (app, _) = test_app(&dir);
    let (_, response) = post_json(&app, "/api/generate", generate_body()).await;
    let run_id = response["run_id"].as_str().unwrap().to_string();
    wait_completed(&app, &run_id).await;

    let (status, arch) = get(&app, &format!("/api/runs/{run_id}/architecture")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(arch["filename"], "architecture.md");

    let (status, all) = get(&app, "/api/architectures").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn templates_and_rag_corpus_are_exposed() {
    let dir = TempDir::new().unwrap();
    let (app, _) = test_app(&dir);

    let (status, templates) = get(&app, "/api/templates").await;
    assert_eq!(status, StatusCode::OK);
    assert!(templates.get("esp32_telemetry").is_some());

    let (status, docs) = get(&app, "/api/docs/rag").await;
    assert_eq!(status, StatusCode::OK);
    let docs = docs.as_array().unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["title"], "uart-guidance");
    assert_eq!(docs[0]["category"], "protocol");
}
