use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use firmforge_llm::PromptLibrary;
use firmforge_mcp::{AuditLog, CapabilityMatrix, Mcp};
use firmforge_orchestrator::{default_model_factory, ExecutorConfig, PipelineExecutor};
use firmforge_retrieval::{Corpus, RetrievalEngine};
use firmforge_server::{build_router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},firmforge=debug"))),
        )
        .init();

    let config = ServerConfig::from_env();

    let mcp = Arc::new(Mcp::new(
        CapabilityMatrix::canonical(),
        Some(AuditLog::new(config.output_root.join("mcp_audit.log"))),
    ));
    let corpus = match &config.corpus_dir {
        Some(dir) => Corpus::load(dir),
        None => Corpus::default(),
    };
    let retrieval = Arc::new(RetrievalEngine::new(corpus));
    let prompts = Arc::new(PromptLibrary::new(config.prompts_dir.clone()));

    let executor = Arc::new(PipelineExecutor::new(
        ExecutorConfig {
            output_root: config.output_root.clone(),
            ..ExecutorConfig::default()
        },
        mcp,
        retrieval.clone(),
        prompts,
        default_model_factory(),
    ));

    let state = AppState {
        executor,
        retrieval,
        config: config.clone(),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!("firmforge control plane listening on http://{}", config.bind_addr());
    axum::serve(listener, app).await?;
    Ok(())
}
