//! Quality agent: local static metrics plus one qualitative model pass.
//!
//! Metrics are computed without the model; the score is deterministic
//! (100 minus weighted penalties per issue severity, clamped to [0, 100]).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use firmforge_artifacts::{canonical_json, ArtifactError, WriteOptions};
use firmforge_mcp::ArtifactType;
use firmforge_retrieval::RetrievalQuery;

use crate::base::{Agent, AgentError, AgentOutcome};
use crate::context::RunContext;

const EXCERPT_LIMIT: usize = 400;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl IssueSeverity {
    pub fn penalty(&self) -> u32 {
        match self {
            Self::Critical => 25,
            Self::High => 10,
            Self::Medium => 4,
            Self::Low => 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Issue {
    pub severity: IssueSeverity,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MetricStatus {
    Pass,
    Warning,
    Fail,
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct MetricEntry {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<f64>,
    pub status: MetricStatus,
}

impl MetricEntry {
    fn new(value: f64, status: MetricStatus) -> Self {
        Self {
            value,
            unit: None,
            target: None,
            status,
        }
    }

    fn with_unit(mut self, unit: &str) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    fn with_target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct AnalysisSummary {
    pub modules_analyzed: usize,
    pub test_files_found: usize,
    pub total_lines: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_analysis_excerpt: Option<String>,
}

/// The quality report consumed by the control plane and external readers.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct QualityReport {
    pub overall_score: u32,
    pub report_type: String,
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, MetricEntry>,
    pub analysis_summary: AnalysisSummary,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
}

/// Static metrics over one module's combined header and source text.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SourceMetrics {
    pub total_loc: usize,
    pub function_count: usize,
    pub avg_function_length: f64,
    pub max_nesting: usize,
    pub magic_numbers: usize,
    pub banned_patterns: usize,
    pub comment_density: f64,
    pub cyclomatic_complexity: usize,
}

impl SourceMetrics {
    pub fn analyze(sources: &[&str]) -> Self {
        let mut metrics = Self::default();
        let mut total_lines = 0usize;
        let mut comment_lines = 0usize;

        for source in sources {
            let mut depth = 0usize;
            for line in source.lines() {
                let trimmed = line.trim();
                total_lines += 1;
                if !trimmed.is_empty() {
                    metrics.total_loc += 1;
                }
                if trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
                {
                    comment_lines += 1;
                }
                if is_function_definition(trimmed) {
                    metrics.function_count += 1;
                }
                if !trimmed.starts_with("#define") {
                    metrics.magic_numbers += count_magic_numbers(trimmed);
                }
                metrics.banned_patterns += count_banned_patterns(trimmed);
                metrics.cyclomatic_complexity += count_branches(trimmed);

                for c in line.chars() {
                    match c {
                        '{' => {
                            depth += 1;
                            metrics.max_nesting = metrics.max_nesting.max(depth);
                        }
                        '}' => depth = depth.saturating_sub(1),
                        _ => {}
                    }
                }
            }
        }

        metrics.cyclomatic_complexity += 1;
        if metrics.function_count > 0 {
            metrics.avg_function_length =
                metrics.total_loc as f64 / metrics.function_count as f64;
        }
        if total_lines > 0 {
            metrics.comment_density = comment_lines as f64 / total_lines as f64;
        }
        metrics
    }
}

fn is_function_definition(line: &str) -> bool {
    const PREFIXES: &[&str] = &["int ", "void ", "uint", "float ", "bool ", "static "];
    PREFIXES.iter().any(|p| line.starts_with(p)) && line.contains('(') && !line.ends_with(';')
}

/// Numeric literals other than 0 and 1, ignoring suffixes like `u`/`UL`.
fn count_magic_numbers(line: &str) -> usize {
    let mut count = 0usize;
    let mut chars = line.char_indices().peekable();
    while let Some((start, c)) = chars.next() {
        if !c.is_ascii_digit() {
            continue;
        }
        // Skip digits that continue an identifier (e.g. uart0).
        let prev = line[..start].chars().next_back();
        if matches!(prev, Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            while chars.peek().map(|(_, c)| c.is_ascii_alphanumeric()).unwrap_or(false) {
                chars.next();
            }
            continue;
        }
        let mut literal = String::from(c);
        while let Some((_, next)) = chars.peek() {
            if next.is_ascii_alphanumeric() || *next == 'x' || *next == '.' {
                literal.push(*next);
                chars.next();
            } else {
                break;
            }
        }
        let digits: String = literal
            .chars()
            .take_while(|c| c.is_ascii_digit() || *c == 'x' || *c == '.')
            .collect();
        if digits != "0" && digits != "1" {
            count += 1;
        }
    }
    count
}

fn count_banned_patterns(line: &str) -> usize {
    const BANNED: &[&str] = &[
        "malloc(", "calloc(", "realloc(", "free(", "goto ", "while (1)", "while(1)", "for (;;)",
        "for(;;)",
    ];
    BANNED
        .iter()
        .filter(|pattern| line.contains(*pattern))
        .count()
}

fn count_branches(line: &str) -> usize {
    const BRANCHES: &[&str] = &["if ", "if(", "for ", "for(", "while ", "while(", "case ", "&&", "||"];
    BRANCHES
        .iter()
        .map(|pattern| line.matches(*pattern).count())
        .sum()
}

/// Deterministic score: 100 minus weighted penalties, clamped to [0, 100].
pub fn compute_score(issues: &[Issue]) -> u32 {
    let penalty: u32 = issues.iter().map(|i| i.severity.penalty()).sum();
    100u32.saturating_sub(penalty)
}

pub struct QualityAgent;

#[async_trait]
impl Agent for QualityAgent {
    fn agent_id(&self) -> String {
        "quality_agent".into()
    }

    fn declared_inputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::ModuleCode, ArtifactType::Tests]
    }

    fn declared_outputs(&self) -> &'static [ArtifactType] {
        &[ArtifactType::Reports]
    }

    async fn execute(&self, ctx: &RunContext) -> Result<AgentOutcome, AgentError> {
        let agent_id = self.agent_id();
        ctx.mcp.check_run(&agent_id)?;
        ctx.mcp.check_read(&agent_id, ArtifactType::ModuleCode)?;
        ctx.mcp.check_read(&agent_id, ArtifactType::Tests)?;

        let mut combined_sources: Vec<String> = Vec::new();
        let mut missing_modules: Vec<String> = Vec::new();
        let mut empty_modules: Vec<String> = Vec::new();
        let mut test_files_found = 0usize;

        for module in &ctx.spec.modules {
            let module_id = module.effective_id();
            let source = ctx.store.read_text(
                &agent_id,
                ArtifactType::ModuleCode,
                &format!("{module_id}/{module_id}.c"),
            );
            let header = ctx.store.read_text(
                &agent_id,
                ArtifactType::ModuleCode,
                &format!("{module_id}/{module_id}.h"),
            );
            match (header, source) {
                (Ok(header), Ok(source)) => {
                    if source.trim().is_empty() {
                        empty_modules.push(module_id.clone());
                    }
                    combined_sources.push(header);
                    combined_sources.push(source);
                }
                (Err(ArtifactError::NotFound(_)), _) | (_, Err(ArtifactError::NotFound(_))) => {
                    missing_modules.push(module_id.clone());
                }
                (Err(err), _) | (_, Err(err)) => return Err(err.into()),
            }

            match ctx.store.read_text(
                &agent_id,
                ArtifactType::Tests,
                &format!("{module_id}/{module_id}_test.c"),
            ) {
                Ok(_) => test_files_found += 1,
                Err(ArtifactError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let modules_analyzed = ctx.spec.modules.len() - missing_modules.len();
        if modules_analyzed == 0 {
            return Err(AgentError::blocked("module_code"));
        }

        let source_refs: Vec<&str> = combined_sources.iter().map(String::as_str).collect();
        let metrics = SourceMetrics::analyze(&source_refs);

        let retrieved = ctx
            .retrieval
            .query(&RetrievalQuery::new("quality and static analysis rules"));
        let mut fields = ctx.base_fields(
            &agent_id,
            "Flag MISRA/CERT issues.",
            &retrieved.context,
        );
        fields.insert(
            "CODE_ARTIFACTS".into(),
            format!(
                "{} modules, {} lines total, {} test files",
                modules_analyzed, metrics.total_loc, test_files_found
            ),
        );
        let prompt = ctx.prompts.compose("quality_agent", "v1", &fields);
        let analysis = ctx.model.complete(&prompt.text).await?;
        let excerpt: String = analysis.chars().take(EXCERPT_LIMIT).collect();

        let issues = derive_issues(&metrics, &missing_modules, &empty_modules);
        let recommendations = derive_recommendations(&issues);
        let report = QualityReport {
            overall_score: compute_score(&issues),
            report_type: "quality_analysis".into(),
            timestamp: Utc::now(),
            metrics: metric_table(&metrics),
            analysis_summary: AnalysisSummary {
                modules_analyzed,
                test_files_found,
                total_lines: metrics.total_loc,
                llm_analysis_excerpt: Some(excerpt),
            },
            issues,
            recommendations,
        };

        // The archive copy carries JSON content in a .txt artifact; the store
        // maintains the quality_report_latest.json pointer from it.
        let content = canonical_json(&report).map_err(ArtifactError::from)?;
        let handle = ctx.store.write_artifact(
            &agent_id,
            ArtifactType::Reports,
            &content,
            WriteOptions::default().with_extension("txt"),
        )?;

        tracing::info!(
            run = %ctx.run_id,
            score = report.overall_score,
            "quality report generated"
        );
        let mut outcome =
            AgentOutcome::new(format!("quality report generated (score {})", report.overall_score))
                .with_artifact(handle.path);
        for module_id in &missing_modules {
            outcome = outcome.with_warning(format!("module {module_id} missing generated code"));
        }
        Ok(outcome)
    }
}

fn derive_issues(
    metrics: &SourceMetrics,
    missing_modules: &[String],
    empty_modules: &[String],
) -> Vec<Issue> {
    let mut issues = Vec::new();
    for module_id in missing_modules {
        issues.push(Issue {
            severity: IssueSeverity::High,
            kind: "missing_module".into(),
            message: format!("module {module_id} has no generated code"),
            location: Some(format!("module_code/{module_id}")),
        });
    }
    for module_id in empty_modules {
        issues.push(Issue {
            severity: IssueSeverity::High,
            kind: "empty_module".into(),
            message: format!("module {module_id} generated empty source"),
            location: Some(format!("module_code/{module_id}/{module_id}.c")),
        });
    }
    if metrics.banned_patterns > 0 {
        issues.push(Issue {
            severity: IssueSeverity::High,
            kind: "banned_pattern".into(),
            message: format!(
                "{} banned construct(s): dynamic allocation, goto, or unbounded loops",
                metrics.banned_patterns
            ),
            location: None,
        });
    }
    if metrics.max_nesting > 4 {
        issues.push(Issue {
            severity: IssueSeverity::Medium,
            kind: "deep_nesting".into(),
            message: format!("maximum nesting depth {} exceeds 4", metrics.max_nesting),
            location: None,
        });
    }
    if metrics.avg_function_length > 50.0 {
        issues.push(Issue {
            severity: IssueSeverity::Medium,
            kind: "long_functions".into(),
            message: format!(
                "average function length {:.0} lines exceeds 50",
                metrics.avg_function_length
            ),
            location: None,
        });
    }
    if metrics.magic_numbers > 10 {
        issues.push(Issue {
            severity: IssueSeverity::Medium,
            kind: "magic_numbers".into(),
            message: format!("{} magic numbers found", metrics.magic_numbers),
            location: None,
        });
    } else if metrics.magic_numbers > 0 {
        issues.push(Issue {
            severity: IssueSeverity::Low,
            kind: "magic_numbers".into(),
            message: format!("{} magic numbers found", metrics.magic_numbers),
            location: None,
        });
    }
    if metrics.comment_density < 0.05 {
        issues.push(Issue {
            severity: IssueSeverity::Low,
            kind: "low_comment_density".into(),
            message: format!("comment density {:.2} below 0.05", metrics.comment_density),
            location: None,
        });
    }
    issues
}

fn derive_recommendations(issues: &[Issue]) -> Vec<String> {
    let mut recommendations = Vec::new();
    let has = |kind: &str| issues.iter().any(|i| i.kind == kind);
    if has("missing_module") || has("empty_module") {
        recommendations.push("Regenerate the flagged modules before integration.".to_string());
    }
    if has("banned_pattern") {
        recommendations
            .push("Replace dynamic allocation and unbounded loops with static alternatives.".to_string());
    }
    if has("magic_numbers") {
        recommendations.push("Replace magic numbers with named constants.".to_string());
    }
    if has("deep_nesting") || has("long_functions") {
        recommendations.push("Extract helper functions to reduce nesting and length.".to_string());
    }
    if has("low_comment_density") {
        recommendations.push("Document module interfaces and non-obvious invariants.".to_string());
    }
    if recommendations.is_empty() {
        recommendations.push("No structural changes required; keep coverage growing.".to_string());
    }
    recommendations
}

fn metric_table(metrics: &SourceMetrics) -> BTreeMap<String, MetricEntry> {
    let status_max = |value: f64, target: f64| {
        if value <= target {
            MetricStatus::Pass
        } else {
            MetricStatus::Warning
        }
    };
    let mut table = BTreeMap::new();
    table.insert(
        "total_loc".into(),
        MetricEntry::new(metrics.total_loc as f64, MetricStatus::Pass).with_unit("lines"),
    );
    table.insert(
        "avg_function_length".into(),
        MetricEntry::new(
            metrics.avg_function_length,
            status_max(metrics.avg_function_length, 50.0),
        )
        .with_unit("lines")
        .with_target(50.0),
    );
    table.insert(
        "max_nesting".into(),
        MetricEntry::new(
            metrics.max_nesting as f64,
            status_max(metrics.max_nesting as f64, 4.0),
        )
        .with_target(4.0),
    );
    table.insert(
        "magic_numbers".into(),
        MetricEntry::new(
            metrics.magic_numbers as f64,
            status_max(metrics.magic_numbers as f64, 10.0),
        )
        .with_target(10.0),
    );
    table.insert(
        "banned_patterns".into(),
        MetricEntry::new(
            metrics.banned_patterns as f64,
            if metrics.banned_patterns == 0 {
                MetricStatus::Pass
            } else {
                MetricStatus::Fail
            },
        )
        .with_target(0.0),
    );
    table.insert(
        "comment_density".into(),
        MetricEntry::new(
            metrics.comment_density,
            if metrics.comment_density >= 0.05 {
                MetricStatus::Pass
            } else {
                MetricStatus::Warning
            },
        )
        .with_target(0.05),
    );
    table.insert(
        "cyclomatic_complexity".into(),
        MetricEntry::new(metrics.cyclomatic_complexity as f64, MetricStatus::Pass),
    );
    table
}
