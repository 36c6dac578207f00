//! Agent contract and the five pipeline agents.
//!
//! An agent is one task unit: it reads named upstream artifacts, queries
//! retrieval, renders its prompt, calls the language model, parses the
//! output, and writes typed artifacts. Agents own nothing persistent between
//! invocations; every collaborator arrives through [`RunContext`].

mod architecture;
mod base;
mod build;
mod code;
mod context;
mod quality;
mod testing;
#[cfg(test)]
pub(crate) mod testing_support;

pub use architecture::ArchitectureAgent;
pub use base::{Agent, AgentError, AgentOutcome};
pub use build::{
    discover_compiler, BuildAgent, BuildLog, ModuleBuildEntry, UnitTestReport, UnitTestSummary,
};
pub use code::CodeAgent;
pub use context::RunContext;
pub use quality::{
    compute_score, AnalysisSummary, Issue, IssueSeverity, MetricEntry, MetricStatus, QualityAgent,
    QualityReport, SourceMetrics,
};
pub use testing::TestAgent;
