//! Corpus loading.
//!
//! A corpus directory holds markdown documents plus a `corpus.json` index
//! describing domain, priority, keywords, module-type tags, and base search
//! weight per document.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn weight(&self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.8,
            Self::Medium => 0.6,
            Self::Low => 0.4,
        }
    }
}

fn default_search_weight() -> f64 {
    0.7
}

fn default_module_types() -> Vec<String> {
    vec!["all".to_string()]
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub filename: String,
    pub domain: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default = "default_module_types")]
    pub module_types: Vec<String>,
    #[serde(default = "default_search_weight")]
    pub search_weight: f64,
}

#[derive(Clone, Debug)]
pub struct LoadedDocument {
    pub meta: DocumentMeta,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct CorpusIndex {
    documents: Vec<DocumentMeta>,
}

/// Immutable document set; empty when the index or directory is missing.
#[derive(Clone, Debug, Default)]
pub struct Corpus {
    documents: Vec<LoadedDocument>,
}

impl Corpus {
    /// Loads `corpus.json` plus the documents it names. Missing index,
    /// missing files, and parse failures degrade to a smaller (possibly
    /// empty) corpus with a warning.
    pub fn load(dir: &Path) -> Self {
        let index_path = dir.join("corpus.json");
        let index: CorpusIndex = match std::fs::read_to_string(&index_path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
        {
            Some(index) => index,
            None => {
                tracing::warn!(path = %index_path.display(), "no corpus index; retrieval disabled");
                return Self::default();
            }
        };

        let mut documents = Vec::with_capacity(index.documents.len());
        for meta in index.documents {
            let path = dir.join(&meta.filename);
            match std::fs::read_to_string(&path) {
                Ok(content) => documents.push(LoadedDocument { meta, content }),
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "skipping unreadable corpus document");
                }
            }
        }
        tracing::info!(count = documents.len(), "retrieval corpus loaded");
        Self { documents }
    }

    pub fn from_documents(documents: Vec<LoadedDocument>) -> Self {
        Self { documents }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn documents(&self) -> &[LoadedDocument] {
        &self.documents
    }
}
