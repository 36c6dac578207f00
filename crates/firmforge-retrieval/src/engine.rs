//! Hybrid scoring and budgeted context assembly.
//!
//! Score per document:
//! `0.40 * keyword_overlap + 0.30 * domain_match + 0.15 * priority_weight +
//! 0.15 * search_weight`, halved when a supplied module type matches neither
//! the document's tags nor `all`. Ties break by priority, then document id.

use std::collections::HashSet;

use serde::Serialize;

use crate::corpus::{Corpus, LoadedDocument};

const KEYWORD_WEIGHT: f64 = 0.40;
const DOMAIN_WEIGHT: f64 = 0.30;
const PRIORITY_WEIGHT: f64 = 0.15;
const SEARCH_WEIGHT: f64 = 0.15;
const MODULE_MISMATCH_FACTOR: f64 = 0.5;

const DEFAULT_TOP_K: usize = 5;
/// 2,000 tokens at roughly four characters per token.
const DEFAULT_BUDGET_CHARS: usize = 8_000;

const SEPARATOR: &str = "\n---\n";

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "is", "in", "to", "of", "for", "with", "how", "what", "when",
    "where", "should",
];

#[derive(Clone, Debug)]
pub struct RetrievalQuery {
    pub text: String,
    pub module_type: Option<String>,
    pub top_k: usize,
    pub budget_chars: usize,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            module_type: None,
            top_k: DEFAULT_TOP_K,
            budget_chars: DEFAULT_BUDGET_CHARS,
        }
    }

    pub fn with_module_type(mut self, module_type: impl Into<String>) -> Self {
        self.module_type = Some(module_type.into());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_budget_chars(mut self, budget_chars: usize) -> Self {
        self.budget_chars = budget_chars;
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ScoredDocument {
    pub doc_id: String,
    pub score: f64,
}

/// Ranked context ready for prompt injection. Documents dropped for budget
/// reasons are reported in `omitted`, not silently discarded.
#[derive(Clone, Debug, Default)]
pub struct RetrievalResult {
    pub context: String,
    pub included: Vec<ScoredDocument>,
    pub omitted: Vec<String>,
}

/// Read-only scoring engine over an immutable corpus.
pub struct RetrievalEngine {
    corpus: Corpus,
}

impl RetrievalEngine {
    pub fn new(corpus: Corpus) -> Self {
        Self { corpus }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn query(&self, query: &RetrievalQuery) -> RetrievalResult {
        if self.corpus.is_empty() {
            return RetrievalResult::default();
        }

        let terms = extract_terms(&query.text);
        let mut ranked: Vec<(&LoadedDocument, f64)> = self
            .corpus
            .documents()
            .iter()
            .map(|doc| (doc, self.score(doc, &terms, query.module_type.as_deref())))
            .collect();
        ranked.sort_by(|(a, sa), (b, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.meta.priority.cmp(&b.meta.priority))
                .then_with(|| a.meta.id.cmp(&b.meta.id))
        });
        ranked.truncate(query.top_k);

        let mut result = RetrievalResult::default();
        for (doc, score) in ranked {
            let remaining = query.budget_chars.saturating_sub(result.context.len());
            let separator_len = if result.context.is_empty() {
                0
            } else {
                SEPARATOR.len()
            };
            match fit_to_budget(&doc.content, remaining.saturating_sub(separator_len)) {
                Some(snippet) => {
                    if separator_len > 0 {
                        result.context.push_str(SEPARATOR);
                    }
                    result.context.push_str(&snippet);
                    result.included.push(ScoredDocument {
                        doc_id: doc.meta.id.clone(),
                        score,
                    });
                }
                None => result.omitted.push(doc.meta.id.clone()),
            }
        }
        result
    }

    fn score(&self, doc: &LoadedDocument, terms: &[String], module_type: Option<&str>) -> f64 {
        let keyword_overlap = keyword_overlap(terms, &doc.meta.keywords);
        let domain_match = domain_match(terms, &doc.meta.domain);
        let mut score = KEYWORD_WEIGHT * keyword_overlap
            + DOMAIN_WEIGHT * domain_match
            + PRIORITY_WEIGHT * doc.meta.priority.weight()
            + SEARCH_WEIGHT * doc.meta.search_weight;

        if let Some(module_type) = module_type {
            let tagged = doc
                .meta
                .module_types
                .iter()
                .any(|t| t == module_type || t == "all");
            if !tagged {
                score *= MODULE_MISMATCH_FACTOR;
            }
        }
        score
    }
}

/// Lower-cased word terms with stopwords and short tokens removed.
fn extract_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| w.len() > 2 && !STOPWORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

fn keyword_overlap(terms: &[String], keywords: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let keyword_set: HashSet<&str> = keywords.iter().map(String::as_str).collect();
    let matches = terms
        .iter()
        .filter(|t| keyword_set.contains(t.as_str()))
        .count();
    matches as f64 / terms.len() as f64
}

fn domain_match(terms: &[String], domain: &str) -> f64 {
    let hit = terms
        .iter()
        .any(|t| t == domain || domain.split('-').any(|token| token == t));
    if hit {
        1.0
    } else {
        0.0
    }
}

/// Returns the largest whole-paragraph prefix fitting the budget, the whole
/// document when it fits, or `None` when not even the first paragraph does.
fn fit_to_budget(content: &str, budget: usize) -> Option<String> {
    if content.len() <= budget {
        return Some(content.to_string());
    }
    let mut assembled = String::new();
    for paragraph in content.split("\n\n") {
        let extra = if assembled.is_empty() {
            paragraph.len()
        } else {
            paragraph.len() + 2
        };
        if assembled.len() + extra > budget {
            break;
        }
        if !assembled.is_empty() {
            assembled.push_str("\n\n");
        }
        assembled.push_str(paragraph);
    }
    if assembled.is_empty() {
        None
    } else {
        Some(assembled)
    }
}
