//! Test agent: produces a unit-test file and a test-case table per module.

use async_trait::async_trait;

use firmforge_artifacts::WriteOptions;
use firmforge_mcp::ArtifactType;
use firmforge_retrieval::RetrievalQuery;
use firmforge_spec::ModuleSpec;

use crate::base::{Agent, AgentError, AgentOutcome};
use crate::context::RunContext;

const FALLBACK_CASES: &str =
    "# Test Cases\n\nNo structured test cases provided. See test code for details.\n";

pub struct TestAgent {
    module: ModuleSpec,
}

impl TestAgent {
    pub fn new(module: ModuleSpec) -> Self {
        Self { module }
    }
}

#[async_trait]
impl Agent for TestAgent {
    fn agent_id(&self) -> String {
        "test_agent".into()
    }

    fn declared_inputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::ModuleCode]
    }

    fn declared_outputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Tests]
    }

    async fn execute(&self, ctx: &RunContext) -> Result<AgentOutcome, AgentError> {
        let agent_id = self.agent_id();
        let module_id = self.module.effective_id();
        ctx.mcp.check_run(&agent_id)?;

        let read = |filename: String| -> Result<String, AgentError> {
            ctx.store
                .read_text(&agent_id, ArtifactType::ModuleCode, &filename)
                .map_err(|err| match err {
                    firmforge_artifacts::ArtifactError::NotFound(_) => {
                        AgentError::blocked(format!("module_code:{module_id}"))
                    }
                    other => AgentError::Artifact(other),
                })
        };
        let header = read(format!("{module_id}/{module_id}.h"))?;
        let source = read(format!("{module_id}/{module_id}.c"))?;

        let retrieved = ctx
            .retrieval
            .query(&RetrievalQuery::new("unit test patterns deterministic embedded"));

        let mut fields = ctx.base_fields(
            &agent_id,
            "Deterministic tests only. Generate both test code and test case tables.",
            &retrieved.context,
        );
        fields.insert("MODULE".into(), RunContext::module_field(&self.module));
        fields.insert(
            "CODE_FILES".into(),
            format!("// {module_id}.h\n{header}\n\n// {module_id}.c\n{source}"),
        );
        let prompt = ctx.prompts.compose("test_agent", "v1", &fields);

        let generated = ctx.model.complete(&prompt.text).await?;
        let (test_code, test_cases) = extract_test_sections(&generated);

        let code_handle = ctx.store.write_artifact(
            &agent_id,
            ArtifactType::Tests,
            &test_code,
            WriteOptions::default()
                .with_module(module_id.as_str())
                .with_filename(format!("{module_id}_test.c"))
                .with_extension("c"),
        )?;
        let cases_handle = ctx.store.write_artifact(
            &agent_id,
            ArtifactType::Tests,
            &test_cases,
            WriteOptions::default()
                .with_module(module_id.as_str())
                .with_filename(format!("{module_id}_test_cases.md"))
                .with_extension("md"),
        )?;

        tracing::info!(run = %ctx.run_id, module = %module_id, "tests generated");
        Ok(AgentOutcome::new(format!("tests generated for {module_id}"))
            .with_artifact(code_handle.path)
            .with_artifact(cases_handle.path))
    }
}

/// Splits model output at `###TEST_CODE###`/`###TEST_CASES###`. Without
/// markers the whole output is the test code and a stub cases document is
/// produced.
fn extract_test_sections(generated: &str) -> (String, String) {
    if let Some(after_code) = generated.split("###TEST_CODE###").nth(1) {
        let mut parts = after_code.split("###TEST_CASES###");
        let code = parts.next().unwrap_or_default().trim().to_string();
        if let Some(cases) = parts.next() {
            return (code, cases.trim().to_string());
        }
        return (code, FALLBACK_CASES.to_string());
    }
    (generated.trim().to_string(), FALLBACK_CASES.to_string())
}
