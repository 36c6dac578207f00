//! The agent contract.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use firmforge_artifacts::ArtifactError;
use firmforge_llm::LlmError;
use firmforge_mcp::{ArtifactType, McpError};

use crate::context::RunContext;

/// Failure modes an agent can surface. The orchestrator contains them within
/// the failing stage.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A required upstream artifact is absent. Display form is
    /// `blocked:<dependency>` so the stage error names the gap.
    #[error("blocked:{dependency}")]
    Blocked { dependency: String },
    #[error(transparent)]
    Permission(#[from] McpError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error("{0}")]
    Model(#[from] LlmError),
    #[error("internal agent failure: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn blocked(dependency: impl Into<String>) -> Self {
        Self::Blocked {
            dependency: dependency.into(),
        }
    }
}

/// What a successful agent invocation produced.
#[derive(Clone, Debug, Default)]
pub struct AgentOutcome {
    pub artifacts: Vec<PathBuf>,
    pub message: String,
    /// Non-fatal problems worth surfacing on the run (e.g. a flagged gap).
    pub warnings: Vec<String>,
}

impl AgentOutcome {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            artifacts: Vec::new(),
            message: message.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, path: PathBuf) -> Self {
        self.artifacts.push(path);
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// One pipeline task unit. The orchestrator checks `run:agent` through MCP
/// before invoking `execute`, and the declared artifact types let it verify
/// capabilities up front.
#[async_trait]
pub trait Agent: Send + Sync {
    fn agent_id(&self) -> String;

    fn declared_inputs(&self) -> &'static [ArtifactType];

    fn declared_outputs(&self) -> &'static [ArtifactType];

    async fn execute(&self, ctx: &RunContext) -> Result<AgentOutcome, AgentError>;
}
