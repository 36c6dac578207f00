//! Run state and the in-memory run registry.
//!
//! Mutations go through the registry and are single-writer (the executor);
//! readers get consistent snapshots. Progress is monotonically non-decreasing
//! for any single run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use firmforge_artifacts::CategoryCounts;
use firmforge_spec::{RunOptions, Specification};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Observable state of one run; everything the control plane reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<CategoryCounts>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub output_dir: String,
}

impl RunState {
    fn pending(run_id: &str, output_dir: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Pending,
            progress: 0,
            current_stage: None,
            message: "Generation queued".into(),
            started_at: Some(Utc::now()),
            completed_at: None,
            artifacts: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            output_dir: output_dir.to_string(),
        }
    }
}

/// Immutable facts recorded at submit time.
#[derive(Clone)]
pub struct RunDescriptor {
    pub run_id: String,
    pub output_dir: String,
    pub spec: Arc<Specification>,
    pub options: RunOptions,
    pub created_at: DateTime<Utc>,
}

struct RunEntry {
    state: RunState,
    descriptor: RunDescriptor,
    cancelled: Arc<AtomicBool>,
}

/// In-memory registry of runs for the process lifetime.
#[derive(Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<String, RunEntry>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, descriptor: RunDescriptor) {
        let state = RunState::pending(&descriptor.run_id, &descriptor.output_dir);
        let entry = RunEntry {
            state,
            cancelled: Arc::new(AtomicBool::new(false)),
            descriptor,
        };
        if let Ok(mut runs) = self.runs.write() {
            runs.insert(entry.state.run_id.clone(), entry);
        }
    }

    pub fn snapshot(&self, run_id: &str) -> Option<RunState> {
        self.runs
            .read()
            .ok()
            .and_then(|runs| runs.get(run_id).map(|e| e.state.clone()))
    }

    pub fn descriptor(&self, run_id: &str) -> Option<RunDescriptor> {
        self.runs
            .read()
            .ok()
            .and_then(|runs| runs.get(run_id).map(|e| e.descriptor.clone()))
    }

    /// Resolves either a run id or an on-disk folder name to the run id.
    pub fn resolve(&self, id_or_folder: &str) -> Option<RunState> {
        let runs = self.runs.read().ok()?;
        if let Some(entry) = runs.get(id_or_folder) {
            return Some(entry.state.clone());
        }
        runs.values()
            .find(|e| e.state.output_dir == id_or_folder)
            .map(|e| e.state.clone())
    }

    pub fn list(&self) -> Vec<RunState> {
        let mut states: Vec<RunState> = self
            .runs
            .read()
            .map(|runs| runs.values().map(|e| e.state.clone()).collect())
            .unwrap_or_default();
        states.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        states
    }

    pub fn cancelled_flag(&self, run_id: &str) -> Option<Arc<AtomicBool>> {
        self.runs
            .read()
            .ok()
            .and_then(|runs| runs.get(run_id).map(|e| e.cancelled.clone()))
    }

    /// Requests cancellation; the executor polls the flag between stages.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.cancelled_flag(run_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn set_running(&self, run_id: &str, message: &str) {
        self.mutate(run_id, |state| {
            state.status = RunStatus::Running;
            state.message = message.to_string();
        });
    }

    pub fn set_stage(&self, run_id: &str, stage: &str, message: &str) {
        self.mutate(run_id, |state| {
            state.current_stage = Some(stage.to_string());
            state.message = message.to_string();
        });
    }

    /// Monotone progress: values below the current one are ignored.
    pub fn set_progress(&self, run_id: &str, progress: u8) {
        self.mutate(run_id, |state| {
            state.progress = state.progress.max(progress.min(100));
        });
    }

    pub fn add_warning(&self, run_id: &str, warning: String) {
        self.mutate(run_id, |state| state.warnings.push(warning));
    }

    pub fn add_error(&self, run_id: &str, error: String) {
        self.mutate(run_id, |state| state.errors.push(error));
    }

    pub fn finalize(&self, run_id: &str, status: RunStatus, counts: Option<CategoryCounts>) {
        self.mutate(run_id, |state| {
            state.status = status;
            state.completed_at = Some(Utc::now());
            state.artifacts = counts;
            state.current_stage = None;
            match status {
                RunStatus::Completed => {
                    state.progress = 100;
                    state.message = "Generation completed successfully".into();
                }
                RunStatus::Failed => {
                    state.message = state
                        .errors
                        .first()
                        .map(|e| format!("Generation failed: {e}"))
                        .unwrap_or_else(|| "Generation failed".into());
                }
                _ => {}
            }
        });
    }

    fn mutate(&self, run_id: &str, f: impl FnOnce(&mut RunState)) {
        if let Ok(mut runs) = self.runs.write() {
            if let Some(entry) = runs.get_mut(run_id) {
                f(&mut entry.state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn descriptor(run_id: &str) -> RunDescriptor {
        RunDescriptor {
            run_id: run_id.into(),
            output_dir: format!("proj_{run_id}"),
            spec: Arc::new(Specification {
                project_name: "proj".into(),
                mcu: "ESP32".into(),
                description: String::new(),
                modules: Vec::new(),
                requirements: Vec::new(),
                constraints: Map::new(),
                safety_critical: false,
                optimization_goal: Default::default(),
            }),
            options: RunOptions::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn progress_never_decreases() {
        let registry = RunRegistry::new();
        registry.insert(descriptor("r1"));
        registry.set_progress("r1", 40);
        registry.set_progress("r1", 20);
        assert_eq!(registry.snapshot("r1").unwrap().progress, 40);
        registry.set_progress("r1", 120);
        assert_eq!(registry.snapshot("r1").unwrap().progress, 100);
    }

    #[test]
    fn finalize_completed_pins_progress_to_100() {
        let registry = RunRegistry::new();
        registry.insert(descriptor("r1"));
        registry.set_progress("r1", 85);
        registry.finalize("r1", RunStatus::Completed, None);
        let state = registry.snapshot("r1").unwrap();
        assert_eq!(state.progress, 100);
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn failed_runs_keep_partial_progress() {
        let registry = RunRegistry::new();
        registry.insert(descriptor("r1"));
        registry.set_progress("r1", 20);
        registry.add_error("r1", "blocked:architecture".into());
        registry.finalize("r1", RunStatus::Failed, None);
        let state = registry.snapshot("r1").unwrap();
        assert_eq!(state.progress, 20);
        assert!(state.message.contains("blocked:architecture"));
    }

    #[test]
    fn resolve_accepts_run_id_or_folder_name() {
        let registry = RunRegistry::new();
        registry.insert(descriptor("r1"));
        assert!(registry.resolve("r1").is_some());
        assert!(registry.resolve("proj_r1").is_some());
        assert!(registry.resolve("ghost").is_none());
    }

    #[test]
    fn cancel_flags_existing_runs_only() {
        let registry = RunRegistry::new();
        registry.insert(descriptor("r1"));
        assert!(registry.cancel("r1"));
        assert!(!registry.cancel("missing"));
        assert!(registry
            .cancelled_flag("r1")
            .unwrap()
            .load(Ordering::SeqCst));
    }
}
