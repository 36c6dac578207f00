//! HTTP control plane: submits runs, polls status, serves artifacts, and
//! exposes the retrieval corpus.

mod api_errors;
mod api_handlers;
mod api_models;
mod config;
mod templates;

pub use api_errors::ApiError;
pub use api_handlers::{build_router, AppState};
pub use api_models::{
    ArchitectureView, GenerateRequest, GenerateResponse, HealthResponse, LogFileView,
    RagDocView, RunLogsResponse,
};
pub use config::ServerConfig;
pub use templates::example_templates;

/// Exit-code semantics shared with the CLI wrapper.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_INVALID_INPUT: i32 = 2;
pub const EXIT_RUN_FAILED: i32 = 3;
pub const EXIT_UPSTREAM_UNAVAILABLE: i32 = 4;
