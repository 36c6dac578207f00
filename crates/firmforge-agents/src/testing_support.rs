//! Shared fixtures for agent tests.

use std::sync::Arc;

use serde_json::Map;
use tempfile::TempDir;

use firmforge_artifacts::RunStore;
use firmforge_llm::{LanguageModel, MockModel, PromptLibrary};
use firmforge_mcp::Mcp;
use firmforge_retrieval::{Corpus, RetrievalEngine};
use firmforge_spec::{ModuleKind, ModuleSpec, OptimizationGoal, RunOptions, Specification};

use crate::context::RunContext;

pub fn spec_with_modules(module_ids: &[&str]) -> Specification {
    Specification {
        project_name: "Demo Project".into(),
        mcu: "ESP32".into(),
        description: "fixture".into(),
        modules: module_ids
            .iter()
            .map(|id| ModuleSpec {
                id: Some(id.to_string()),
                name: id.to_string(),
                kind: ModuleKind::Uart,
                description: None,
                parameters: Map::new(),
                requirements: Vec::new(),
            })
            .collect(),
        requirements: Vec::new(),
        constraints: Map::new(),
        safety_critical: false,
        optimization_goal: OptimizationGoal::Balanced,
    }
}

pub fn mock_context(module_ids: &[&str]) -> (RunContext, TempDir) {
    mock_context_with_model(module_ids, Arc::new(MockModel::new()))
}

pub fn mock_context_with_model(
    module_ids: &[&str],
    model: Arc<dyn LanguageModel>,
) -> (RunContext, TempDir) {
    let dir = TempDir::new().unwrap();
    let mcp = Arc::new(Mcp::canonical());
    let store = Arc::new(
        RunStore::create(dir.path(), "run-fixture", "Demo_Project_run-fixture", mcp.clone())
            .unwrap(),
    );
    let ctx = RunContext {
        run_id: "run-fixture".into(),
        spec: Arc::new(spec_with_modules(module_ids)),
        options: RunOptions::default(),
        store,
        mcp,
        retrieval: Arc::new(RetrievalEngine::new(Corpus::default())),
        model,
        prompts: Arc::new(PromptLibrary::builtin()),
    };
    (ctx, dir)
}
