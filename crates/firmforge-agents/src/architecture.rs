//! Architecture agent: turns the specification into a Markdown architecture
//! document.

use async_trait::async_trait;

use firmforge_artifacts::WriteOptions;
use firmforge_mcp::ArtifactType;
use firmforge_retrieval::RetrievalQuery;

use crate::base::{Agent, AgentError, AgentOutcome};
use crate::context::RunContext;

pub struct ArchitectureAgent;

pub const ARCHITECTURE_FILENAME: &str = "architecture.md";

#[async_trait]
impl Agent for ArchitectureAgent {
    fn agent_id(&self) -> String {
        "architecture_agent".into()
    }

    fn declared_inputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Requirements]
    }

    fn declared_outputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Architecture]
    }

    async fn execute(&self, ctx: &RunContext) -> Result<AgentOutcome, AgentError> {
        let agent_id = self.agent_id();
        ctx.mcp.check_run(&agent_id)?;

        // Domain hints from the requested module kinds steer retrieval.
        let mut query_text = String::from("firmware architecture guidelines");
        for module in &ctx.spec.modules {
            query_text.push(' ');
            query_text.push_str(module.kind.as_str());
            query_text.push(' ');
            query_text.push_str(module.kind.domain_hint());
        }
        let retrieved = ctx.retrieval.query(&RetrievalQuery::new(query_text));

        let mut fields = ctx.base_fields(
            &agent_id,
            "Follow MISRA-like rules. Output must be Markdown.",
            &retrieved.context,
        );
        fields.insert(
            "MODULES".into(),
            serde_json::to_string_pretty(&ctx.spec.modules)
                .map_err(|e| AgentError::Internal(e.to_string()))?,
        );
        let prompt = ctx.prompts.compose("architecture_agent", "v1", &fields);

        let generated = ctx.model.complete(&prompt.text).await?;

        let handle = ctx.store.write_artifact(
            &agent_id,
            ArtifactType::Architecture,
            &generated,
            WriteOptions::default()
                .with_filename(ARCHITECTURE_FILENAME)
                .with_extension("md")
                .with_extra("mcu", ctx.spec.mcu.clone().into()),
        )?;

        tracing::info!(run = %ctx.run_id, path = %handle.path.display(), "architecture generated");
        Ok(AgentOutcome::new("architecture generated").with_artifact(handle.path))
    }
}
