//! End-to-end pipeline runs against the mock model.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use firmforge_llm::{LanguageModel, LlmError, MockModel, PromptLibrary};
use firmforge_mcp::Mcp;
use firmforge_orchestrator::{
    default_model_factory, ExecutorConfig, ModelFactory, PipelineExecutor, RunState, RunStatus,
    SubmitError,
};
use firmforge_retrieval::{Corpus, RetrievalEngine};
use firmforge_spec::{ModuleKind, ModuleSpec, RunOptions, Specification};

fn spec(project: &str, module_ids: &[&str]) -> Specification {
    Specification {
        project_name: project.into(),
        mcu: "ESP32".into(),
        description: "telemetry node".into(),
        modules: module_ids
            .iter()
            .map(|id| ModuleSpec {
                id: Some(id.to_string()),
                name: id.to_string(),
                kind: ModuleKind::Uart,
                description: None,
                parameters: serde_json::Map::new(),
                requirements: Vec::new(),
            })
            .collect(),
        requirements: vec!["115200 baud".into()],
        constraints: serde_json::Map::new(),
        safety_critical: false,
        optimization_goal: Default::default(),
    }
}

fn executor_with(output_root: &Path, factory: ModelFactory) -> PipelineExecutor {
    PipelineExecutor::new(
        ExecutorConfig {
            output_root: output_root.to_path_buf(),
            ..ExecutorConfig::default()
        },
        Arc::new(Mcp::canonical()),
        Arc::new(RetrievalEngine::new(Corpus::default())),
        Arc::new(PromptLibrary::builtin()),
        factory,
    )
}

fn executor(output_root: &Path) -> PipelineExecutor {
    executor_with(output_root, default_model_factory())
}

async fn wait_terminal(executor: &PipelineExecutor, run_id: &str) -> RunState {
    for _ in 0..600 {
        if let Some(state) = executor.registry().snapshot(run_id) {
            if matches!(state.status, RunStatus::Completed | RunStatus::Failed) {
                return state;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached a terminal state");
}

fn run_dir(root: &Path, state: &RunState) -> PathBuf {
    root.join("runs").join(&state.output_dir)
}

#[tokio::test]
async fn happy_path_single_module_produces_the_full_tree() {
    let dir = TempDir::new().unwrap();
    let executor = executor(dir.path());
    let run_id = executor
        .submit(spec("P", &["uart0"]), RunOptions::default())
        .unwrap();
    let state = wait_terminal(&executor, &run_id).await;

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.progress, 100);
    assert!(state.errors.is_empty());

    let run = run_dir(dir.path(), &state);
    assert!(run.join("architecture/architecture.md").is_file());
    assert!(run.join("module_code/uart0/uart0.h").is_file());
    assert!(run.join("module_code/uart0/uart0.c").is_file());
    assert!(run.join("tests/uart0/uart0_test.c").is_file());
    assert!(run.join("reports/quality_report_latest.json").is_file());
    assert!(run.join("build_log/build_log.json").is_file());

    let archived_report = std::fs::read_dir(run.join("reports"))
        .unwrap()
        .flatten()
        .any(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            name.contains("_quality_agent_") && name.ends_with(".txt")
        });
    assert!(archived_report, "timestamped quality report archive missing");

    let counts = state.artifacts.unwrap();
    assert_eq!(counts.architecture, 1);
    assert_eq!(counts.code, 2);
    assert_eq!(counts.build, 1);
}

#[tokio::test]
async fn architecture_only_skips_every_downstream_stage() {
    let dir = TempDir::new().unwrap();
    let executor = executor(dir.path());
    let options = RunOptions {
        architecture_only: true,
        ..RunOptions::default()
    };
    let run_id = executor.submit(spec("P", &["uart0"]), options).unwrap();
    let state = wait_terminal(&executor, &run_id).await;

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.progress, 100);
    let counts = state.artifacts.unwrap();
    assert_eq!(counts.architecture, 1);
    assert_eq!(counts.code, 0);
    assert_eq!(counts.tests, 0);
    assert_eq!(counts.reports, 0);
    assert_eq!(counts.build, 0);
}

#[tokio::test]
async fn zero_modules_completes_with_an_explanatory_note() {
    let dir = TempDir::new().unwrap();
    let executor = executor(dir.path());
    let run_id = executor
        .submit(spec("P", &[]), RunOptions::default())
        .unwrap();
    let state = wait_terminal(&executor, &run_id).await;

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.progress, 100);
    assert!(state
        .warnings
        .iter()
        .any(|w| w.contains("no modules requested")));
    assert_eq!(state.artifacts.unwrap().code, 0);
}

#[tokio::test]
async fn other_module_kind_still_gets_header_and_source() {
    let dir = TempDir::new().unwrap();
    let executor = executor(dir.path());
    let mut custom = spec("P", &[]);
    custom.modules.push(ModuleSpec {
        id: Some("blackbox".into()),
        name: "blackbox".into(),
        kind: ModuleKind::Other,
        description: Some("vendor-specific logic".into()),
        parameters: serde_json::Map::new(),
        requirements: Vec::new(),
    });
    let run_id = executor.submit(custom, RunOptions::default()).unwrap();
    let state = wait_terminal(&executor, &run_id).await;

    assert_eq!(state.status, RunStatus::Completed);
    let run = run_dir(dir.path(), &state);
    assert!(run.join("module_code/blackbox/blackbox.h").is_file());
    assert!(run.join("module_code/blackbox/blackbox.c").is_file());
}

#[tokio::test]
async fn invalid_specifications_never_create_a_run() {
    let dir = TempDir::new().unwrap();
    let executor = executor(dir.path());
    let mut bad = spec("", &["uart0"]);
    bad.project_name = String::new();
    let err = executor.submit(bad, RunOptions::default()).unwrap_err();
    assert!(matches!(err, SubmitError::InvalidInput(_)));
    assert!(executor.registry().list().is_empty());
    assert!(!dir.path().join("runs").exists());
}

#[tokio::test]
async fn lm_unavailable_fails_the_run_before_any_code_is_written() {
    let dir = TempDir::new().unwrap();
    // Every composed prompt carries the base preamble, so this marker makes
    // the backend fail on all calls, like a provider returning 503.
    let factory: ModelFactory = Arc::new(|_| {
        Ok(Arc::new(MockModel::failing_on(["pipeline".to_string()]))
            as Arc<dyn LanguageModel>)
    });
    let executor = executor_with(dir.path(), factory);
    let run_id = executor
        .submit(spec("P", &["uart0"]), RunOptions::default())
        .unwrap();
    let state = wait_terminal(&executor, &run_id).await;

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state
        .errors
        .iter()
        .any(|e| e.contains("language model unavailable")));
    let run = run_dir(dir.path(), &state);
    assert!(!run.join("module_code").exists());
    let counts = state.artifacts.unwrap();
    assert_eq!(counts.code, 0);
}

#[tokio::test]
async fn partial_module_failure_keeps_siblings_and_fails_the_run() {
    let dir = TempDir::new().unwrap();
    // Fails only the code prompt for mod_b (compact module JSON marker).
    let factory: ModelFactory = Arc::new(|_| {
        Ok(Arc::new(MockModel::failing_on(["\"id\":\"mod_b\"".to_string()]))
            as Arc<dyn LanguageModel>)
    });
    let executor = executor_with(dir.path(), factory);
    let run_id = executor
        .submit(spec("P", &["mod_a", "mod_b"]), RunOptions::default())
        .unwrap();
    let state = wait_terminal(&executor, &run_id).await;

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.warnings.iter().any(|w| w.contains("mod_b failed")));
    assert!(state.errors.iter().any(|e| e.contains("mod_b")));

    let run = run_dir(dir.path(), &state);
    assert!(run.join("module_code/mod_a/mod_a.c").is_file());
    assert!(!run.join("module_code/mod_b").exists());

    // Quality proceeded with what was available and flagged the gap.
    let report: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(run.join("reports/quality_report_latest.json")).unwrap(),
    )
    .unwrap();
    let issues = report["issues"].as_array().unwrap();
    assert!(issues
        .iter()
        .any(|i| i["type"] == "missing_module" && i["severity"] == "high"));
}

#[tokio::test]
async fn safety_critical_module_failure_stops_before_quality() {
    let dir = TempDir::new().unwrap();
    let factory: ModelFactory = Arc::new(|_| {
        Ok(Arc::new(MockModel::failing_on(["\"id\":\"mod_b\"".to_string()]))
            as Arc<dyn LanguageModel>)
    });
    let executor = executor_with(dir.path(), factory);
    let mut safety_spec = spec("P", &["mod_a", "mod_b"]);
    safety_spec.safety_critical = true;
    let run_id = executor
        .submit(safety_spec, RunOptions::default())
        .unwrap();
    let state = wait_terminal(&executor, &run_id).await;

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.errors.iter().any(|e| e.contains("safety-critical")));
    let run = run_dir(dir.path(), &state);
    assert!(!run.join("reports").exists());
    assert!(!run.join("build_log").exists());
}

#[tokio::test]
async fn concurrent_runs_stay_isolated() {
    let dir = TempDir::new().unwrap();
    let executor = executor(dir.path());
    let run_a = executor
        .submit(spec("Alpha", &["uart0"]), RunOptions::default())
        .unwrap();
    let run_b = executor
        .submit(spec("Beta", &["uart0", "spi1"]), RunOptions::default())
        .unwrap();

    let state_a = wait_terminal(&executor, &run_a).await;
    let state_b = wait_terminal(&executor, &run_b).await;

    assert_eq!(state_a.status, RunStatus::Completed);
    assert_eq!(state_b.status, RunStatus::Completed);
    assert_ne!(state_a.output_dir, state_b.output_dir);
    assert!(run_dir(dir.path(), &state_a)
        .join("module_code/uart0/uart0.c")
        .is_file());
    assert!(run_dir(dir.path(), &state_b)
        .join("module_code/spi1/spi1.c")
        .is_file());
}

#[tokio::test]
async fn mock_runs_are_deterministic_modulo_metadata() {
    let dir = TempDir::new().unwrap();
    let executor = executor(dir.path());
    let run_a = executor
        .submit(spec("Same", &["uart0"]), RunOptions::default())
        .unwrap();
    let state_a = wait_terminal(&executor, &run_a).await;
    let run_b = executor
        .submit(spec("Same", &["uart0"]), RunOptions::default())
        .unwrap();
    let state_b = wait_terminal(&executor, &run_b).await;

    // Stable-named artifact trees hash identically across runs; sidecars and
    // timestamped reports are the only files allowed to differ.
    for rel in [
        "architecture/architecture.md",
        "module_code/uart0/uart0.h",
        "module_code/uart0/uart0.c",
        "tests/uart0/uart0_test.c",
        "tests/uart0/uart0_test_cases.md",
    ] {
        let hash = |state: &RunState| {
            let bytes = std::fs::read(run_dir(dir.path(), state).join(rel)).unwrap();
            format!("{:x}", Sha256::digest(bytes))
        };
        assert_eq!(hash(&state_a), hash(&state_b), "divergent artifact: {rel}");
    }
}

#[tokio::test]
async fn cancellation_between_stages_finalizes_failed_and_keeps_artifacts() {
    struct SlowModel(MockModel);

    #[async_trait]
    impl LanguageModel for SlowModel {
        async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.0.complete(prompt).await
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }

    let dir = TempDir::new().unwrap();
    let factory: ModelFactory =
        Arc::new(|_| Ok(Arc::new(SlowModel(MockModel::new())) as Arc<dyn LanguageModel>));
    let executor = executor_with(dir.path(), factory);
    let run_id = executor
        .submit(spec("P", &["uart0"]), RunOptions::default())
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(executor.cancel(&run_id));
    let state = wait_terminal(&executor, &run_id).await;

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state.errors.iter().any(|e| e == "cancelled"));
    // The architecture stage had already started; its artifact remains.
    assert!(run_dir(dir.path(), &state)
        .join("architecture/architecture.md")
        .is_file());
}

#[tokio::test]
async fn agent_timeouts_fail_the_stage_with_a_named_error() {
    struct StuckModel;

    #[async_trait]
    impl LanguageModel for StuckModel {
        async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(String::new())
        }

        fn provider_name(&self) -> &'static str {
            "mock"
        }
    }

    let dir = TempDir::new().unwrap();
    let factory: ModelFactory = Arc::new(|_| Ok(Arc::new(StuckModel) as Arc<dyn LanguageModel>));
    let executor = PipelineExecutor::new(
        ExecutorConfig {
            output_root: dir.path().to_path_buf(),
            agent_timeout: Some(Duration::from_millis(50)),
            ..ExecutorConfig::default()
        },
        Arc::new(Mcp::canonical()),
        Arc::new(RetrievalEngine::new(Corpus::default())),
        Arc::new(PromptLibrary::builtin()),
        factory,
    );
    let run_id = executor
        .submit(spec("P", &["uart0"]), RunOptions::default())
        .unwrap();
    let state = wait_terminal(&executor, &run_id).await;

    assert_eq!(state.status, RunStatus::Failed);
    assert!(state
        .errors
        .iter()
        .any(|e| e == "timeout:architecture_agent"));
}

#[tokio::test]
async fn progress_is_monotone_while_a_run_executes() {
    let dir = TempDir::new().unwrap();
    let executor = executor(dir.path());
    let run_id = executor
        .submit(spec("P", &["uart0", "spi1", "adc2"]), RunOptions::default())
        .unwrap();

    let mut last = 0u8;
    loop {
        let Some(state) = executor.registry().snapshot(&run_id) else {
            continue;
        };
        assert!(state.progress >= last, "progress regressed");
        last = state.progress;
        if matches!(state.status, RunStatus::Completed | RunStatus::Failed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(last, 100);
}
