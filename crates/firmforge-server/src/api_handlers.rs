//! Axum handlers for the control plane.
//!
//! Run lookups accept either the run id or the on-disk folder name; runs
//! found only on disk surface as completed with progress 100.

use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use firmforge_artifacts::ArtifactEntry;
use firmforge_orchestrator::{PipelineExecutor, RunState, RunStatus, SubmitError};
use firmforge_retrieval::RetrievalEngine;

use crate::api_errors::ApiError;
use crate::api_models::{
    ArchitectureView, GenerateRequest, GenerateResponse, HealthResponse, LogFileView,
    RagDocView, RunLogsResponse,
};
use crate::config::ServerConfig;
use crate::templates::example_templates;

const RAG_PREVIEW_CHARS: usize = 500;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<PipelineExecutor>,
    pub retrieval: Arc<RetrievalEngine>,
    pub config: ServerConfig,
}

impl AppState {
    fn runs_root(&self) -> PathBuf {
        self.config.output_root.join("runs")
    }

    /// Maps a run id or folder name to the on-disk folder, in-memory runs
    /// first, falling back to a directory of that name.
    fn resolve_folder(&self, id_or_folder: &str) -> Option<String> {
        if let Some(state) = self.executor.registry().resolve(id_or_folder) {
            return Some(state.output_dir);
        }
        let candidate = self.runs_root().join(id_or_folder);
        candidate.is_dir().then(|| id_or_folder.to_string())
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/generate", post(generate))
        .route("/api/runs", get(list_runs))
        .route("/api/runs/:run_id", get(get_run))
        .route("/api/runs/:run_id/logs", get(run_logs))
        .route("/api/runs/:run_id/architecture", get(run_architecture))
        .route("/api/architectures", get(all_architectures))
        .route("/api/artifacts", get(list_artifacts))
        .route("/api/output/:run_id/*path", get(get_output))
        .route("/api/templates", get(templates))
        .route("/api/docs/rag", get(rag_docs))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    let (spec, options) = request.into_parts(state.config.use_real_lm);
    let run_id = state
        .executor
        .submit(spec, options)
        .map_err(|err| match err {
            SubmitError::InvalidInput(inner) => ApiError::bad_request(inner.to_string()),
            SubmitError::Storage(inner) => ApiError::internal(inner.to_string()),
        })?;
    Ok(Json(GenerateResponse {
        message: format!("Generation started with run ID: {run_id}"),
        run_id,
        status: "pending",
    }))
}

async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunState>> {
    let mut runs = state.executor.registry().list();
    let known: std::collections::HashSet<String> =
        runs.iter().map(|r| r.output_dir.clone()).collect();

    if let Ok(entries) = std::fs::read_dir(state.runs_root()) {
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let folder = entry.file_name().to_string_lossy().into_owned();
            if !known.contains(&folder) {
                runs.push(disk_run_state(&folder, &path));
            }
        }
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Json(runs)
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunState>, ApiError> {
    if let Some(run) = state.executor.registry().resolve(&run_id) {
        return Ok(Json(run));
    }
    let dir = state.runs_root().join(&run_id);
    if dir.is_dir() {
        return Ok(Json(disk_run_state(&run_id, &dir)));
    }
    Err(ApiError::not_found(format!("run {run_id} not found")))
}

async fn run_logs(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunLogsResponse>, ApiError> {
    let folder = state
        .resolve_folder(&run_id)
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;
    let run_dir = state.runs_root().join(&folder);

    let mut build_logs = Vec::new();
    for path in files_by_mtime_desc(&run_dir.join("build_log"), &["json"]) {
        if let Some(view) = log_view(&path) {
            build_logs.push(view);
        }
    }

    // The standardized latest pointer leads; timestamped archives follow.
    let reports_dir = run_dir.join("reports");
    let mut quality_reports = Vec::new();
    let latest = reports_dir.join("quality_report_latest.json");
    if let Some(view) = log_view(&latest) {
        quality_reports.push(view);
    }
    for path in files_by_mtime_desc(&reports_dir, &["json", "txt"]) {
        if path.file_name().and_then(|n| n.to_str()) == Some("quality_report_latest.json") {
            continue;
        }
        if let Some(view) = log_view(&path) {
            quality_reports.push(view);
        }
    }

    Ok(Json(RunLogsResponse {
        run_id,
        output_dir: folder,
        build_logs,
        quality_reports,
    }))
}

async fn run_architecture(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<ArchitectureView>, ApiError> {
    let folder = state
        .resolve_folder(&run_id)
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;
    let arch_dir = state.runs_root().join(&folder).join("architecture");
    let newest = files_by_mtime_desc(&arch_dir, &["md"]).into_iter().next();
    let path =
        newest.ok_or_else(|| ApiError::not_found("no architecture found for this run"))?;
    architecture_view(&run_id, &path)
        .map(Json)
        .ok_or_else(|| ApiError::internal("architecture file unreadable"))
}

async fn all_architectures(State(state): State<AppState>) -> Json<Vec<ArchitectureView>> {
    let mut views = Vec::new();
    if let Ok(entries) = std::fs::read_dir(state.runs_root()) {
        for entry in entries.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let folder = entry.file_name().to_string_lossy().into_owned();
            for path in files_by_mtime_desc(&entry.path().join("architecture"), &["md"]) {
                if let Some(view) = architecture_view(&folder, &path) {
                    views.push(view);
                }
            }
        }
    }
    views.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Json(views)
}

async fn list_artifacts(State(state): State<AppState>) -> Json<Vec<ArtifactEntry>> {
    let registry = state.executor.registry();
    let mut entries = Vec::new();
    if let Ok(run_dirs) = std::fs::read_dir(state.runs_root()) {
        for run_dir in run_dirs.flatten() {
            if !run_dir.path().is_dir() {
                continue;
            }
            let folder = run_dir.file_name().to_string_lossy().into_owned();
            let run_id = registry
                .resolve(&folder)
                .map(|s| s.run_id)
                .unwrap_or_else(|| folder.clone());
            collect_artifacts(&run_dir.path(), &run_id, &mut entries);
        }
    }
    entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    Json(entries)
}

async fn get_output(
    State(state): State<AppState>,
    Path((run_id, rel_path)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let folder = state
        .resolve_folder(&run_id)
        .ok_or_else(|| ApiError::not_found(format!("run {run_id} not found")))?;
    if FsPath::new(&rel_path)
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ApiError::bad_request("invalid artifact path"));
    }
    let path = state.runs_root().join(&folder).join(&rel_path);
    if !path.is_file() {
        return Err(ApiError::not_found(format!("file not found: {rel_path}")));
    }
    let content = std::fs::read_to_string(&path)
        .map_err(|err| ApiError::internal(format!("could not read artifact: {err}")))?;
    // JSON artifacts are returned parsed; everything else is wrapped.
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        if let Ok(value) = serde_json::from_str::<Value>(&content) {
            return Ok(Json(value));
        }
    }
    Ok(Json(serde_json::json!({ "content": content })))
}

async fn templates() -> Json<Value> {
    Json(example_templates())
}

async fn rag_docs(State(state): State<AppState>) -> Json<Vec<RagDocView>> {
    let docs = state
        .retrieval
        .corpus()
        .documents()
        .iter()
        .map(|doc| {
            let mut content: String = doc.content.chars().take(RAG_PREVIEW_CHARS).collect();
            if doc.content.chars().count() > RAG_PREVIEW_CHARS {
                content.push_str("...");
            }
            RagDocView {
                title: doc.meta.id.clone(),
                content,
                category: doc.meta.domain.clone(),
            }
        })
        .collect();
    Json(docs)
}

fn disk_run_state(folder: &str, path: &FsPath) -> RunState {
    RunState {
        run_id: folder.to_string(),
        status: RunStatus::Completed,
        progress: 100,
        current_stage: None,
        message: "Loaded from disk".into(),
        started_at: modified_at(path),
        completed_at: None,
        artifacts: None,
        errors: Vec::new(),
        warnings: Vec::new(),
        output_dir: folder.to_string(),
    }
}

fn modified_at(path: &FsPath) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Non-sidecar files with one of the given extensions, newest first.
fn files_by_mtime_desc(dir: &FsPath, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .filter(|p| {
                !p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(".meta.json"))
                    .unwrap_or(false)
            })
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| extensions.contains(&e))
                    .unwrap_or(false)
            })
            .collect(),
        Err(_) => return Vec::new(),
    };
    files.sort_by_key(|p| std::cmp::Reverse(modified_at(p)));
    files
}

fn log_view(path: &FsPath) -> Option<LogFileView> {
    let content = std::fs::read_to_string(path).ok()?;
    let data = serde_json::from_str(&content).ok()?;
    Some(LogFileView {
        filename: path.file_name()?.to_string_lossy().into_owned(),
        path: path.display().to_string(),
        timestamp: modified_at(path)?,
        data,
    })
}

fn architecture_view(run_id: &str, path: &FsPath) -> Option<ArchitectureView> {
    Some(ArchitectureView {
        run_id: run_id.to_string(),
        filename: path.file_name()?.to_string_lossy().into_owned(),
        content: std::fs::read_to_string(path).ok()?,
        timestamp: modified_at(path)?,
    })
}

fn collect_artifacts(run_dir: &FsPath, run_id: &str, entries: &mut Vec<ArtifactEntry>) {
    let Ok(categories) = std::fs::read_dir(run_dir) else {
        return;
    };
    for category in categories.flatten() {
        if !category.path().is_dir() {
            continue;
        }
        let category_name = category.file_name().to_string_lossy().into_owned();
        let mut stack = vec![category.path()];
        while let Some(dir) = stack.pop() {
            let Ok(children) = std::fs::read_dir(&dir) else {
                continue;
            };
            for child in children.flatten() {
                let path = child.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let name = child.file_name().to_string_lossy().into_owned();
                if name.ends_with(".meta.json") {
                    continue;
                }
                let Ok(meta) = child.metadata() else {
                    continue;
                };
                entries.push(ArtifactEntry {
                    run_id: run_id.to_string(),
                    category: category_name.clone(),
                    file_path: path
                        .strip_prefix(run_dir)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .replace('\\', "/"),
                    file_name: name,
                    size: meta.len(),
                    updated_at: meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now()),
                });
            }
        }
    }
}
