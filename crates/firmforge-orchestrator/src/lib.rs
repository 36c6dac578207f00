//! Deterministic pipeline execution over the agent DAG.
//!
//! The orchestrator owns each run's mutable state: submission allocates the
//! run, a worker task drives stages in DAG order, per-module code and test
//! stages fan out onto a bounded pool, and progress moves monotonically to
//! 100 exactly when a run completes.

mod executor;
mod run;

pub use executor::{
    default_model_factory, ExecutorConfig, ModelFactory, PipelineExecutor, SubmitError,
};
pub use run::{RunDescriptor, RunRegistry, RunState, RunStatus};
