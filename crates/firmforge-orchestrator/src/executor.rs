//! Pipeline executor: submit, fan-out, rendezvous, finalize.
//!
//! Stage order follows the DAG strictly: architecture, then code per module
//! (tests chained behind each module's code), then quality and build once
//! every module task has joined. Cancellation is polled between stages;
//! a per-agent timeout is the only bound on a stuck model call.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use firmforge_agents::{
    Agent, AgentOutcome, ArchitectureAgent, BuildAgent, CodeAgent, QualityAgent, RunContext,
    TestAgent,
};
use firmforge_artifacts::{ArtifactError, RunStore};
use firmforge_llm::{HttpModel, HttpModelConfig, LanguageModel, LlmError, MockModel, PromptLibrary};
use firmforge_mcp::Mcp;
use firmforge_retrieval::RetrievalEngine;
use firmforge_spec::{ModelProvider, RunOptions, SpecError, Specification};

use crate::run::{RunDescriptor, RunRegistry, RunStatus};

const ARCHITECTURE_WEIGHT: u8 = 20;
const CODE_WEIGHT: u8 = 40;
const TESTS_WEIGHT: u8 = 15;
const QUALITY_WEIGHT: u8 = 15;
const BUILD_WEIGHT: u8 = 10;

const DEFAULT_MODULE_CONCURRENCY: usize = 4;
const MOCK_AGENT_TIMEOUT: Duration = Duration::from_secs(120);
const REAL_AGENT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] SpecError),
    #[error("could not prepare run storage: {0}")]
    Storage(#[from] ArtifactError),
}

/// Builds the per-run language model from the submitted options.
pub type ModelFactory =
    Arc<dyn Fn(&RunOptions) -> Result<Arc<dyn LanguageModel>, LlmError> + Send + Sync>;

pub fn default_model_factory() -> ModelFactory {
    Arc::new(|options| match options.model_provider {
        ModelProvider::Mock => Ok(Arc::new(MockModel::new()) as Arc<dyn LanguageModel>),
        ModelProvider::Real => {
            let mut config = HttpModelConfig::from_env();
            if let Some(model) = &options.model_name {
                config = config.with_model(model.clone());
            }
            if let Some(key) = &options.api_key {
                config = config.with_api_key(key.clone());
            }
            Ok(Arc::new(HttpModel::new(config)?) as Arc<dyn LanguageModel>)
        }
    })
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub output_root: std::path::PathBuf,
    pub module_concurrency: usize,
    /// Overrides the provider-based default (120 s mock, 600 s real).
    pub agent_timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            output_root: "output".into(),
            module_concurrency: DEFAULT_MODULE_CONCURRENCY,
            agent_timeout: None,
        }
    }
}

fn default_agent_timeout(provider: ModelProvider) -> Duration {
    match provider {
        ModelProvider::Mock => MOCK_AGENT_TIMEOUT,
        ModelProvider::Real => REAL_AGENT_TIMEOUT,
    }
}

fn short_run_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Drives runs to completion on the tokio worker pool.
#[derive(Clone)]
pub struct PipelineExecutor {
    config: ExecutorConfig,
    mcp: Arc<Mcp>,
    retrieval: Arc<RetrievalEngine>,
    prompts: Arc<PromptLibrary>,
    registry: Arc<RunRegistry>,
    model_factory: ModelFactory,
}

impl PipelineExecutor {
    pub fn new(
        config: ExecutorConfig,
        mcp: Arc<Mcp>,
        retrieval: Arc<RetrievalEngine>,
        prompts: Arc<PromptLibrary>,
        model_factory: ModelFactory,
    ) -> Self {
        Self {
            config,
            mcp,
            retrieval,
            prompts,
            registry: Arc::new(RunRegistry::new()),
            model_factory,
        }
    }

    pub fn registry(&self) -> &Arc<RunRegistry> {
        &self.registry
    }

    pub fn output_root(&self) -> &std::path::Path {
        &self.config.output_root
    }

    /// Validates, allocates the run, creates its output directory, and
    /// enqueues execution. Returns immediately with the run id.
    pub fn submit(&self, spec: Specification, options: RunOptions) -> Result<String, SubmitError> {
        spec.validate()?;
        let run_id = short_run_id();
        let folder = format!("{}_{}", spec.sanitized_project_name(), run_id);
        let store = Arc::new(RunStore::create(
            &self.config.output_root,
            &run_id,
            &folder,
            self.mcp.clone(),
        )?);
        let descriptor = RunDescriptor {
            run_id: run_id.clone(),
            output_dir: folder,
            spec: Arc::new(spec),
            options,
            created_at: Utc::now(),
        };
        self.registry.insert(descriptor.clone());
        tracing::info!(run = %run_id, dir = %descriptor.output_dir, "run submitted");

        let executor = self.clone();
        tokio::spawn(async move {
            executor.execute_run(descriptor, store).await;
        });
        Ok(run_id)
    }

    pub fn cancel(&self, run_id: &str) -> bool {
        self.registry.cancel(run_id)
    }

    async fn execute_run(&self, descriptor: RunDescriptor, store: Arc<RunStore>) {
        let run_id = descriptor.run_id.clone();
        let registry = self.registry.clone();
        let cancelled = registry.cancelled_flag(&run_id).unwrap_or_default();
        registry.set_running(&run_id, "Starting orchestration");

        let model = match (self.model_factory)(&descriptor.options) {
            Ok(model) => model,
            Err(err) => {
                registry.add_error(&run_id, err.to_string());
                registry.finalize(&run_id, RunStatus::Failed, Some(store.category_counts()));
                return;
            }
        };
        let timeout = self
            .config
            .agent_timeout
            .unwrap_or_else(|| default_agent_timeout(descriptor.options.model_provider));

        let ctx = RunContext {
            run_id: run_id.clone(),
            spec: descriptor.spec.clone(),
            options: descriptor.options.clone(),
            store: store.clone(),
            mcp: self.mcp.clone(),
            retrieval: self.retrieval.clone(),
            model,
            prompts: self.prompts.clone(),
        };

        let architecture_weight = if descriptor.options.architecture_only {
            100
        } else {
            ARCHITECTURE_WEIGHT
        };

        if self.bail_if_cancelled(&run_id, &cancelled, &store) {
            return;
        }

        registry.set_stage(&run_id, "architecture", "Running architecture analysis");
        match self
            .run_agent(&ctx, Arc::new(ArchitectureAgent), timeout)
            .await
        {
            Ok(outcome) => {
                self.apply_outcome(&run_id, outcome);
                registry.set_progress(&run_id, architecture_weight);
            }
            Err(err) => {
                registry.add_error(&run_id, err);
                registry.finalize(&run_id, RunStatus::Failed, Some(store.category_counts()));
                return;
            }
        }

        if descriptor.options.architecture_only {
            registry.finalize(&run_id, RunStatus::Completed, Some(store.category_counts()));
            return;
        }

        if ctx.spec.modules.is_empty() {
            registry.add_warning(
                &run_id,
                "no modules requested; code, tests, quality, and build skipped".into(),
            );
            registry.finalize(&run_id, RunStatus::Completed, Some(store.category_counts()));
            return;
        }

        if self.bail_if_cancelled(&run_id, &cancelled, &store) {
            return;
        }

        let (failed_modules, fanout_granted) = self.run_module_fanout(&ctx, timeout).await;
        if !failed_modules.is_empty() && ctx.spec.safety_critical {
            registry.add_error(
                &run_id,
                format!(
                    "safety-critical run aborted; failed modules: {}",
                    failed_modules.join(", ")
                ),
            );
            registry.finalize(&run_id, RunStatus::Failed, Some(store.category_counts()));
            return;
        }

        if self.bail_if_cancelled(&run_id, &cancelled, &store) {
            return;
        }

        // Progress equals the summed weight of completed (or skipped)
        // stages; a failed stage never grants its weight.
        let mut granted = fanout_granted;

        if descriptor.options.run_quality_checks {
            registry.set_stage(&run_id, "quality", "Running quality analysis");
            match self.run_agent(&ctx, Arc::new(QualityAgent), timeout).await {
                Ok(outcome) => {
                    self.apply_outcome(&run_id, outcome);
                    granted += QUALITY_WEIGHT;
                }
                Err(err) => registry.add_error(&run_id, format!("quality_agent: {err}")),
            }
        } else {
            registry.add_warning(&run_id, "quality checks disabled for this run".into());
            granted += QUALITY_WEIGHT;
        }
        registry.set_progress(&run_id, granted);

        if self.bail_if_cancelled(&run_id, &cancelled, &store) {
            return;
        }

        registry.set_stage(&run_id, "build", "Writing build log");
        match self.run_agent(&ctx, Arc::new(BuildAgent), timeout).await {
            Ok(outcome) => {
                self.apply_outcome(&run_id, outcome);
                granted += BUILD_WEIGHT;
            }
            Err(err) => registry.add_error(&run_id, format!("build_agent: {err}")),
        }
        registry.set_progress(&run_id, granted);

        // A run only completes when every specified module produced code.
        let missing: Vec<String> = ctx
            .spec
            .modules
            .iter()
            .map(|m| m.effective_id())
            .filter(|id| store.module_file(id, &format!("{id}.c")).is_none())
            .collect();
        if !missing.is_empty() {
            registry.add_error(
                &run_id,
                format!(
                    "generated module count does not match specification; missing: {}",
                    missing.join(", ")
                ),
            );
        }

        let has_errors = registry
            .snapshot(&run_id)
            .map(|s| !s.errors.is_empty())
            .unwrap_or(true);
        let status = if has_errors {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        registry.finalize(&run_id, status, Some(store.category_counts()));
    }

    /// Code then tests per module, bounded by `min(modules, cap)` permits.
    /// Returns ids of modules whose code stage failed plus the progress
    /// weight actually earned by the fan-out.
    async fn run_module_fanout(&self, ctx: &RunContext, timeout: Duration) -> (Vec<String>, u8) {
        let run_id = ctx.run_id.clone();
        let registry = self.registry.clone();
        let include_tests = ctx.options.include_tests;
        let module_count = ctx.spec.modules.len();
        let cap = self
            .config
            .module_concurrency
            .clamp(1, module_count.max(1));
        let semaphore = Arc::new(Semaphore::new(cap));
        let code_done = Arc::new(AtomicUsize::new(0));
        let tests_done = Arc::new(AtomicUsize::new(0));

        registry.set_stage(&run_id, "module_code", "Generating module code");

        let mut tasks: JoinSet<(String, Result<(), String>, Option<Result<(), String>>)> =
            JoinSet::new();
        for module in ctx.spec.modules.clone() {
            let executor = self.clone();
            let ctx = ctx.clone();
            let registry = registry.clone();
            let run_id = run_id.clone();
            let semaphore = semaphore.clone();
            let code_done = code_done.clone();
            let tests_done = tests_done.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let module_id = module.effective_id();

                let code_result = executor
                    .run_agent(&ctx, Arc::new(CodeAgent::new(module.clone())), timeout)
                    .await;
                let progress = |codes: usize, tests: usize| {
                    ARCHITECTURE_WEIGHT
                        + ((codes * CODE_WEIGHT as usize + tests * TESTS_WEIGHT as usize)
                            / module_count) as u8
                };
                let code_result = match code_result {
                    Ok(outcome) => {
                        executor.apply_outcome(&run_id, outcome);
                        let codes = code_done.fetch_add(1, Ordering::SeqCst) + 1;
                        registry
                            .set_progress(&run_id, progress(codes, tests_done.load(Ordering::SeqCst)));
                        Ok(())
                    }
                    Err(err) => Err(err),
                };

                let mut test_result = None;
                if include_tests && code_result.is_ok() {
                    let result = executor
                        .run_agent(&ctx, Arc::new(TestAgent::new(module.clone())), timeout)
                        .await;
                    test_result = Some(match result {
                        Ok(outcome) => {
                            executor.apply_outcome(&run_id, outcome);
                            let tests = tests_done.fetch_add(1, Ordering::SeqCst) + 1;
                            registry.set_progress(
                                &run_id,
                                progress(code_done.load(Ordering::SeqCst), tests),
                            );
                            Ok(())
                        }
                        Err(err) => Err(err),
                    });
                }
                (module_id, code_result, test_result)
            });
        }

        let mut failed_modules = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((module_id, code_result, test_result)) => {
                    if let Err(err) = code_result {
                        registry.add_warning(&run_id, format!("module {module_id} failed: {err}"));
                        failed_modules.push(module_id.clone());
                    }
                    if let Some(Err(err)) = test_result {
                        registry.add_warning(
                            &run_id,
                            format!("tests for module {module_id} failed: {err}"),
                        );
                    }
                }
                Err(join_err) => {
                    registry.add_warning(&run_id, format!("module task aborted: {join_err}"));
                }
            }
        }

        // Weight is earned per successful module; a disabled test stage
        // grants its weight as skipped.
        let codes = code_done.load(Ordering::SeqCst);
        let tests_granted = if include_tests {
            (tests_done.load(Ordering::SeqCst) * TESTS_WEIGHT as usize) / module_count
        } else {
            TESTS_WEIGHT as usize
        };
        let earned = ARCHITECTURE_WEIGHT
            + ((codes * CODE_WEIGHT as usize) / module_count + tests_granted) as u8;
        registry.set_progress(&run_id, earned);
        (failed_modules, earned)
    }

    /// Runs one agent on the pool with a timeout. Panics are caught at the
    /// stage boundary; a timed-out agent is aborted at its next await point.
    async fn run_agent(
        &self,
        ctx: &RunContext,
        agent: Arc<dyn Agent>,
        timeout: Duration,
    ) -> Result<AgentOutcome, String> {
        let agent_id = agent.agent_id();
        if let Err(err) = ctx.mcp.check_run(&agent_id) {
            return Err(err.to_string());
        }
        // An agent is only invoked when the matrix backs its declared I/O.
        for artifact_type in agent.declared_inputs() {
            if let Err(err) = ctx.mcp.check_read(&agent_id, *artifact_type) {
                return Err(err.to_string());
            }
        }
        for artifact_type in agent.declared_outputs() {
            if let Err(err) = ctx.mcp.check_write(&agent_id, *artifact_type) {
                return Err(err.to_string());
            }
        }
        let task_ctx = ctx.clone();
        let mut handle = tokio::spawn(async move { agent.execute(&task_ctx).await });
        match tokio::time::timeout(timeout, &mut handle).await {
            Err(_) => {
                handle.abort();
                Err(format!("timeout:{agent_id}"))
            }
            Ok(Err(join_err)) => Err(format!("internal failure in {agent_id}: {join_err}")),
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(agent_err))) => Err(agent_err.to_string()),
        }
    }

    fn apply_outcome(&self, run_id: &str, outcome: AgentOutcome) {
        for warning in outcome.warnings {
            self.registry.add_warning(run_id, warning);
        }
    }

    fn bail_if_cancelled(
        &self,
        run_id: &str,
        cancelled: &Arc<AtomicBool>,
        store: &Arc<RunStore>,
    ) -> bool {
        if cancelled.load(Ordering::SeqCst) {
            self.registry.add_error(run_id, "cancelled".into());
            self.registry
                .finalize(run_id, RunStatus::Failed, Some(store.category_counts()));
            return true;
        }
        false
    }
}
