//! Retrieval layer: scores a curated markdown corpus against an agent query
//! and returns concatenated context under a character budget.
//!
//! The corpus is loaded once at process start and never mutated; queries are
//! lock-free reads. An absent corpus yields empty results, never an error.

mod corpus;
mod engine;

pub use corpus::{Corpus, DocumentMeta, LoadedDocument, Priority};
pub use engine::{RetrievalEngine, RetrievalQuery, RetrievalResult, ScoredDocument};
