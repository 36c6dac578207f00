//! Per-run execution context handed to every agent.

use std::sync::Arc;

use serde_json::Value;

use firmforge_artifacts::RunStore;
use firmforge_llm::{LanguageModel, PromptFields, PromptLibrary};
use firmforge_mcp::Mcp;
use firmforge_retrieval::RetrievalEngine;
use firmforge_spec::{RunOptions, Specification};

/// Everything an agent may touch during one run. No module-level singletons;
/// the orchestrator assembles one of these per run and agents own nothing
/// outside it.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: String,
    pub spec: Arc<Specification>,
    pub options: RunOptions,
    pub store: Arc<RunStore>,
    pub mcp: Arc<Mcp>,
    pub retrieval: Arc<RetrievalEngine>,
    pub model: Arc<dyn LanguageModel>,
    pub prompts: Arc<PromptLibrary>,
}

impl RunContext {
    /// Prompt fields shared by every agent; callers add their own on top.
    pub fn base_fields(&self, agent_role: &str, constraints: &str, rag_context: &str) -> PromptFields {
        let family = self.spec.mcu_family();
        let modules = self
            .spec
            .modules
            .iter()
            .map(|m| format!("- {} ({})", m.effective_id(), m.kind))
            .collect::<Vec<_>>()
            .join("\n");
        let mut fields = PromptFields::new();
        fields.insert("AGENT_ROLE".into(), agent_role.to_string());
        fields.insert("CONSTRAINTS".into(), constraints.to_string());
        fields.insert("RAG_CONTEXT".into(), rag_context.to_string());
        fields.insert("MCU".into(), self.spec.mcu.clone());
        fields.insert(
            "OPTIMIZATION".into(),
            self.spec.optimization_goal.as_str().to_string(),
        );
        fields.insert(
            "BOARD_SPECS".into(),
            format!(
                "Target: {} ({}), Framework: {}, Optimization: {}",
                self.spec.mcu,
                family.label(),
                family.framework(),
                self.spec.optimization_goal.as_str()
            ),
        );
        fields.insert("MODULES".into(), modules);
        fields
    }

    /// The module description injected into `<<MODULE>>`.
    pub fn module_field(module: &firmforge_spec::ModuleSpec) -> String {
        serde_json::to_value(module)
            .map(|v: Value| v.to_string())
            .unwrap_or_else(|_| module.effective_id())
    }
}
