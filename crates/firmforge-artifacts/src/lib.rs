//! Typed persistent storage for agent outputs.
//!
//! Artifacts live under `output/runs/<run_folder>/<category>/...` with one
//! metadata sidecar per artifact. The tree is append-only except the
//! `quality_report_latest.json` pointer, which is overwritten atomically.

mod metadata;
mod store;

pub use metadata::{canonical_json, ArtifactFormat, ArtifactMetadata};
pub use store::{ArtifactEntry, ArtifactError, ArtifactHandle, CategoryCounts, RunStore, WriteOptions};
