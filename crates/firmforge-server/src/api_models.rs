//! Request and response DTOs for the control plane.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use firmforge_spec::{ModelProvider, RunOptions, Specification};

fn default_true() -> bool {
    true
}

/// The run-submission body. `api_key` rides along only until it is folded
/// into [`RunOptions`] and is excluded from debug output.
#[derive(Clone, Deserialize)]
pub struct GenerateRequest {
    pub specification: Specification,
    #[serde(default = "default_true")]
    pub include_tests: bool,
    #[serde(default = "default_true")]
    pub run_quality_checks: bool,
    #[serde(default)]
    pub model_provider: Option<ModelProvider>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub architecture_only: bool,
}

impl std::fmt::Debug for GenerateRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerateRequest")
            .field("specification", &self.specification)
            .field("include_tests", &self.include_tests)
            .field("run_quality_checks", &self.run_quality_checks)
            .field("model_provider", &self.model_provider)
            .field("model_name", &self.model_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("architecture_only", &self.architecture_only)
            .finish()
    }
}

impl GenerateRequest {
    /// Folds the request into run options; the configured default provider
    /// applies when the request names none.
    pub fn into_parts(self, default_real: bool) -> (Specification, RunOptions) {
        let provider = self.model_provider.unwrap_or(if default_real {
            ModelProvider::Real
        } else {
            ModelProvider::Mock
        });
        let options = RunOptions {
            include_tests: self.include_tests,
            run_quality_checks: self.run_quality_checks,
            architecture_only: self.architecture_only,
            model_provider: provider,
            model_name: self.model_name,
            api_key: self.api_key,
        };
        (self.specification, options)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GenerateResponse {
    pub run_id: String,
    pub status: &'static str,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: DateTime<Utc>,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            timestamp: Utc::now(),
        }
    }
}

/// One build log or quality report, newest first in listings.
#[derive(Clone, Debug, Serialize)]
pub struct LogFileView {
    pub filename: String,
    pub path: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

#[derive(Clone, Debug, Serialize)]
pub struct RunLogsResponse {
    pub run_id: String,
    pub output_dir: String,
    pub build_logs: Vec<LogFileView>,
    pub quality_reports: Vec<LogFileView>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RagDocView {
    pub title: String,
    pub content: String,
    pub category: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ArchitectureView {
    pub run_id: String,
    pub filename: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}
