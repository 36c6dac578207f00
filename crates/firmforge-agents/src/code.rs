//! Code agent: generates one module's `.h`/`.c` pair.
//!
//! Invoked once per module. The model is asked for JSON
//! `{"header","source"}` or `###HEADER###`/`###SOURCE###` sections; anything
//! else falls through an extraction ladder ending in a split-in-half
//! fallback, so the agent always produces both files.

use async_trait::async_trait;
use serde::Deserialize;

use firmforge_artifacts::WriteOptions;
use firmforge_mcp::ArtifactType;
use firmforge_retrieval::RetrievalQuery;
use firmforge_spec::ModuleSpec;

use crate::base::{Agent, AgentError, AgentOutcome};
use crate::context::RunContext;

pub struct CodeAgent {
    module: ModuleSpec,
}

impl CodeAgent {
    pub fn new(module: ModuleSpec) -> Self {
        Self { module }
    }

    pub fn module_id(&self) -> String {
        self.module.effective_id()
    }
}

#[async_trait]
impl Agent for CodeAgent {
    fn agent_id(&self) -> String {
        format!("code_agent:{}", self.module.effective_id())
    }

    fn declared_inputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Architecture]
    }

    fn declared_outputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::ModuleCode]
    }

    async fn execute(&self, ctx: &RunContext) -> Result<AgentOutcome, AgentError> {
        let agent_id = self.agent_id();
        let module_id = self.module.effective_id();
        ctx.mcp.check_run(&agent_id)?;

        let architecture = ctx
            .store
            .read_latest(&agent_id, ArtifactType::Architecture, Some("md"))?
            .ok_or_else(|| AgentError::blocked("architecture"))?;

        let retrieved = ctx.retrieval.query(
            &RetrievalQuery::new(format!("generate {} module code", self.module.kind))
                .with_module_type(self.module.kind.as_str()),
        );

        let mut fields = ctx.base_fields(
            &agent_id,
            "MINIMAL comments. Return PURE CODE only.",
            &retrieved.context,
        );
        fields.insert("MODULE".into(), RunContext::module_field(&self.module));
        fields.insert("CODE_ARTIFACTS".into(), architecture.1);
        let prompt = ctx.prompts.compose("code_agent", "v1", &fields);

        let generated = ctx.model.complete(&prompt.text).await?;
        let (header, source) = extract_header_source(&generated);

        let handle = ctx.store.write_modular_code(
            &agent_id,
            &module_id,
            &header,
            &source,
            WriteOptions::default()
                .with_extra("framework", ctx.spec.mcu_family().framework().into())
                .with_extra("rag_documents", retrieved.included.len().into()),
        )?;

        tracing::info!(run = %ctx.run_id, module = %module_id, "module code generated");
        let mut outcome = AgentOutcome::new(format!("module code generated for {module_id}"));
        outcome.artifacts = handle.sub_paths;
        Ok(outcome)
    }
}

#[derive(Deserialize)]
struct CodePayload {
    #[serde(default)]
    header: String,
    #[serde(default)]
    source: String,
}

/// Extraction ladder for model output: fenced code blocks, then JSON, then
/// marked sections, then split at the first function definition, then split
/// in half.
pub(crate) fn extract_header_source(raw: &str) -> (String, String) {
    let content = strip_code_fences(raw);

    if let Ok(payload) = serde_json::from_str::<CodePayload>(content.trim().trim_matches('`')) {
        if !payload.header.is_empty() || !payload.source.is_empty() {
            return (payload.header, payload.source);
        }
    }

    if let Some((header, source)) = split_marked_sections(&content) {
        return (header, source);
    }

    let lines: Vec<&str> = content.lines().collect();
    if let Some(split_at) = lines.iter().position(|l| looks_like_function_def(l)) {
        if split_at > 0 {
            return (
                lines[..split_at].join("\n"),
                lines[split_at..].join("\n"),
            );
        }
    }

    let mid = lines.len() / 2;
    (lines[..mid].join("\n"), lines[mid..].join("\n"))
}

/// Returns the largest fenced block's contents, or the input unchanged when
/// no fence is present.
fn strip_code_fences(raw: &str) -> String {
    let mut blocks = Vec::new();
    let mut rest = raw;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let Some(close) = after_open.find("```") else {
            break;
        };
        let block = &after_open[..close];
        // Drop the language tag line (c, cpp, json, ...).
        let body = match block.split_once('\n') {
            Some((first, tail)) if first.trim().len() <= 12 => tail,
            _ => block,
        };
        blocks.push(body.to_string());
        rest = &after_open[close + 3..];
    }
    blocks
        .into_iter()
        .max_by_key(String::len)
        .unwrap_or_else(|| raw.to_string())
}

fn split_marked_sections(content: &str) -> Option<(String, String)> {
    let after_header = content.split("###HEADER###").nth(1)?;
    let mut parts = after_header.split("###SOURCE###");
    let header = parts.next()?.trim().to_string();
    let source = parts.next().map(|s| s.trim().to_string())?;
    Some((header, source))
}

fn looks_like_function_def(line: &str) -> bool {
    const PREFIXES: &[&str] = &["int ", "void ", "uint", "float ", "bool ", "static "];
    PREFIXES.iter().any(|p| line.starts_with(p)) && line.contains('(')
}
