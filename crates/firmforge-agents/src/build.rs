//! Build agent: records build readiness without compiling.
//!
//! Compiler presence is discovered at startup (`CC` env var, falling back to
//! `gcc` on PATH) and recorded in the log; `source_only` stays the default
//! regardless, the user compiles with their own toolchain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use firmforge_artifacts::{ArtifactError, WriteOptions};
use firmforge_mcp::ArtifactType;

use crate::base::{Agent, AgentError, AgentOutcome};
use crate::context::RunContext;

pub const BUILD_LOG_FILENAME: &str = "build_log.json";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModuleBuildEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_size: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct UnitTestSummary {
    pub passed: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitTestReport {
    pub status: String,
    pub summary: UnitTestSummary,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildLog {
    pub build_type: String,
    pub compilation_status: String,
    pub compiler: Option<String>,
    pub build_type_label: String,
    pub total_modules: usize,
    pub modules_compiled: usize,
    pub compilation_details: serde_json::Map<String, serde_json::Value>,
    pub modules: BTreeMap<String, ModuleBuildEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_tests: Option<UnitTestReport>,
    pub notes: Vec<String>,
}

/// Probes `CC` (or `gcc`) across PATH. Discovery only; nothing is executed.
pub fn discover_compiler() -> Option<String> {
    let name = std::env::var("CC").ok().filter(|v| !v.is_empty());
    let name = name.as_deref().unwrap_or("gcc");
    if Path::new(name).is_absolute() {
        return Path::new(name).is_file().then(|| name.to_string());
    }
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        if dir.join(name).is_file() {
            return Some(name.to_string());
        }
    }
    None
}

pub struct BuildAgent;

#[async_trait]
impl Agent for BuildAgent {
    fn agent_id(&self) -> String {
        "build_agent".into()
    }

    fn declared_inputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::ModuleCode, ArtifactType::Tests]
    }

    fn declared_outputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::BuildLog]
    }

    async fn execute(&self, ctx: &RunContext) -> Result<AgentOutcome, AgentError> {
        let agent_id = self.agent_id();
        ctx.mcp.check_run(&agent_id)?;

        let mut modules: BTreeMap<String, ModuleBuildEntry> = BTreeMap::new();
        let mut missing: Vec<String> = Vec::new();
        let mut tests_found = 0usize;

        for module in &ctx.spec.modules {
            let module_id = module.effective_id();
            ctx.mcp
                .check_read_scoped(&agent_id, ArtifactType::ModuleCode, &module_id)?;

            let mut entry = ModuleBuildEntry::default();
            if let Some(path) = ctx.store.module_file(&module_id, &format!("{module_id}.h")) {
                entry.header_size = file_size(&path);
                entry.header = Some(path.display().to_string());
            }
            if let Some(path) = ctx.store.module_file(&module_id, &format!("{module_id}.c")) {
                entry.source_size = file_size(&path);
                entry.source = Some(path.display().to_string());
            }
            if entry.header.is_none() && entry.source.is_none() {
                missing.push(module_id);
                continue;
            }
            modules.insert(module_id.clone(), entry);

            match ctx.store.read_bytes(
                &agent_id,
                ArtifactType::Tests,
                &format!("{module_id}/{module_id}_test.c"),
            ) {
                Ok(_) => tests_found += 1,
                Err(ArtifactError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        if modules.is_empty() {
            return Err(AgentError::blocked("module_code"));
        }

        let compiler = discover_compiler();
        let mut compilation_details = serde_json::Map::new();
        compilation_details.insert(
            "instruction".into(),
            format!(
                "{} -I. module_code/*/*.c -o firmware.elf",
                compiler.as_deref().unwrap_or("gcc")
            )
            .into(),
        );
        compilation_details.insert("performed".into(), false.into());
        compilation_details.insert("has_compiler".into(), compiler.is_some().into());

        let mut notes = vec![
            "Module code generated in source form (.h/.c); compile with your own toolchain."
                .to_string(),
            "Verify module dependencies and include paths before compiling.".to_string(),
        ];
        for module_id in &missing {
            notes.push(format!("module {module_id} has no generated artifacts"));
        }

        let log = BuildLog {
            build_type: "source_only".into(),
            compilation_status: "skipped".into(),
            compiler,
            build_type_label: "Source-only build (no compilation performed)".into(),
            total_modules: ctx.spec.modules.len(),
            modules_compiled: 0,
            compilation_details,
            modules,
            unit_tests: Some(UnitTestReport {
                status: if tests_found > 0 {
                    "generated".into()
                } else {
                    "not_generated".into()
                },
                summary: UnitTestSummary::default(),
            }),
            notes,
        };

        let handle = ctx.store.write_json_artifact(
            &agent_id,
            ArtifactType::BuildLog,
            &log,
            WriteOptions::default().with_filename(BUILD_LOG_FILENAME),
        )?;

        tracing::info!(
            run = %ctx.run_id,
            modules = log.modules.len(),
            tests = tests_found,
            "build log written"
        );
        let mut outcome = AgentOutcome::new(format!(
            "build ready: {} of {} module(s) present",
            log.modules.len(),
            log.total_modules
        ))
        .with_artifact(handle.path);
        for module_id in &missing {
            outcome = outcome.with_warning(format!("module {module_id} missing from build"));
        }
        Ok(outcome)
    }
}

fn file_size(path: &PathBuf) -> Option<u64> {
    std::fs::metadata(path).map(|m| m.len()).ok()
}
