//! Versioned prompt templates with `<<NAME>>` placeholder substitution.
//!
//! Templates resolve from `<name>_prompt_<version>.md` in the prompt
//! directory, with a shared `base_prompt.md` prepended when present. Built-in
//! templates back every agent so the pipeline works without a prompt
//! directory. Unfilled placeholders stay literal; they are warnings, not
//! errors.

use std::collections::HashMap;
use std::path::PathBuf;

pub const RECOGNIZED_PLACEHOLDERS: &[&str] = &[
    "AGENT_ROLE",
    "CONSTRAINTS",
    "RAG_CONTEXT",
    "MODULE",
    "MCU",
    "OPTIMIZATION",
    "BOARD_SPECS",
    "MODULES",
    "CODE_ARTIFACTS",
    "CODE_FILES",
];

pub type PromptFields = HashMap<String, String>;

const BASE_PROMPT: &str = "\
You are <<AGENT_ROLE>>, one stage of an embedded firmware generation pipeline.
Target hardware: <<MCU>>.
Constraints: <<CONSTRAINTS>>

Reference material:
<<RAG_CONTEXT>>
";

const ARCHITECTURE_PROMPT: &str = "\
Produce a firmware architecture document in Markdown for the system below.
Board: <<BOARD_SPECS>>
Optimization goal: <<OPTIMIZATION>>
Modules:
<<MODULES>>

Cover module responsibilities, interfaces between modules, initialization
order, and error handling strategy.
";

const CODE_PROMPT: &str = "\
Generate C firmware code for this module:
<<MODULE>>
Board: <<BOARD_SPECS>>
Optimization goal: <<OPTIMIZATION>>

Return JSON of the form {\"header\": \"...\", \"source\": \"...\"} or the two
sections marked ###HEADER### and ###SOURCE###. No dynamic allocation, no
goto, bounded loops only.
";

const TEST_PROMPT: &str = "\
Write deterministic unit tests for this module:
<<MODULE>>
Module sources:
<<CODE_FILES>>

Return the test C file after a ###TEST_CODE### marker and a Markdown test
case table after a ###TEST_CASES### marker.
";

const QUALITY_PROMPT: &str = "\
Review the generated firmware below and give a short qualitative analysis of
maintainability, safety, and style risks. Plain text, a few sentences.
Artifacts:
<<CODE_ARTIFACTS>>
";

#[derive(Clone, Debug)]
pub struct ComposedPrompt {
    pub text: String,
    pub version: String,
    /// Recognized placeholders that stayed literal after substitution.
    pub unfilled: Vec<String>,
}

/// Resolves and composes prompt templates.
pub struct PromptLibrary {
    dir: Option<PathBuf>,
}

impl PromptLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    pub fn builtin() -> Self {
        Self { dir: None }
    }

    /// Raw template for an agent: shared base plus the agent-specific part.
    pub fn load(&self, name: &str, version: &str) -> String {
        let base = self
            .read_template("base_prompt.md")
            .unwrap_or_else(|| BASE_PROMPT.to_string());
        let specific = self
            .read_template(&format!("{name}_prompt_{version}.md"))
            .or_else(|| builtin_template(name).map(str::to_string))
            .unwrap_or_default();
        format!("{base}\n\n{specific}")
    }

    /// Loads the template and performs literal placeholder substitution.
    pub fn compose(&self, name: &str, version: &str, fields: &PromptFields) -> ComposedPrompt {
        let mut text = self.load(name, version);
        for (key, value) in fields {
            text = text.replace(&format!("<<{key}>>"), value);
        }
        let unfilled: Vec<String> = RECOGNIZED_PLACEHOLDERS
            .iter()
            .filter(|p| text.contains(&format!("<<{p}>>")))
            .map(|p| p.to_string())
            .collect();
        if !unfilled.is_empty() {
            tracing::warn!(prompt = name, ?unfilled, "prompt left placeholders unfilled");
        }
        ComposedPrompt {
            text,
            version: version.to_string(),
            unfilled,
        }
    }

    fn read_template(&self, filename: &str) -> Option<String> {
        let dir = self.dir.as_ref()?;
        std::fs::read_to_string(dir.join(filename)).ok()
    }
}

fn builtin_template(name: &str) -> Option<&'static str> {
    match name {
        "architecture_agent" => Some(ARCHITECTURE_PROMPT),
        "code_agent" => Some(CODE_PROMPT),
        "test_agent" => Some(TEST_PROMPT),
        "quality_agent" => Some(QUALITY_PROMPT),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> PromptFields {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn compose_substitutes_supplied_fields() {
        let library = PromptLibrary::builtin();
        let prompt = library.compose(
            "architecture_agent",
            "v1",
            &fields(&[
                ("AGENT_ROLE", "architecture_agent"),
                ("MCU", "ESP32"),
                ("CONSTRAINTS", "MISRA-like rules"),
                ("RAG_CONTEXT", "ring buffer guidance"),
                ("BOARD_SPECS", "Target: ESP32"),
                ("OPTIMIZATION", "balanced"),
                ("MODULES", "- uart0 (uart)"),
            ]),
        );
        assert!(prompt.text.contains("architecture_agent"));
        assert!(prompt.text.contains("ring buffer guidance"));
        assert!(prompt.unfilled.is_empty());
    }

    #[test]
    fn unfilled_placeholders_stay_literal() {
        let library = PromptLibrary::builtin();
        let prompt = library.compose("code_agent", "v1", &fields(&[("MCU", "STM32F4")]));
        assert!(prompt.text.contains("<<MODULE>>"));
        assert!(prompt.unfilled.contains(&"MODULE".to_string()));
        assert!(!prompt.unfilled.contains(&"MCU".to_string()));
    }

    #[test]
    fn directory_templates_override_builtins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("code_agent_prompt_v2.md"),
            "Custom template for <<MODULE>>",
        )
        .unwrap();
        let library = PromptLibrary::new(Some(dir.path().to_path_buf()));
        let prompt = library.compose("code_agent", "v2", &fields(&[("MODULE", "uart0 spec")]));
        assert!(prompt.text.contains("Custom template for uart0 spec"));
    }

    #[test]
    fn base_prompt_is_prepended() {
        let library = PromptLibrary::builtin();
        let raw = library.load("test_agent", "v1");
        let base_at = raw.find("firmware generation pipeline").unwrap();
        let specific_at = raw.find("###TEST_CODE###").unwrap();
        assert!(base_at < specific_at);
    }
}
