//! Specification contracts for the firmforge pipeline.
//!
//! A [`Specification`] is created by the caller and immutable for the run.
//! Validation happens at submit time; a run is never created from an invalid
//! specification.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Module kinds accepted by the pipeline. Anything else is rejected at parse
/// time as invalid input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Uart,
    I2c,
    Spi,
    Can,
    Ethernet,
    Watchdog,
    Eeprom,
    Adc,
    Pwm,
    Sensor,
    Motor,
    Flash,
    Other,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uart => "uart",
            Self::I2c => "i2c",
            Self::Spi => "spi",
            Self::Can => "can",
            Self::Ethernet => "ethernet",
            Self::Watchdog => "watchdog",
            Self::Eeprom => "eeprom",
            Self::Adc => "adc",
            Self::Pwm => "pwm",
            Self::Sensor => "sensor",
            Self::Motor => "motor",
            Self::Flash => "flash",
            Self::Other => "other",
        }
    }

    /// Domain hint used when querying retrieval for this kind of module.
    pub fn domain_hint(&self) -> &'static str {
        match self {
            Self::Uart | Self::I2c | Self::Spi | Self::Can | Self::Ethernet => "protocol",
            Self::Watchdog => "safety",
            Self::Eeprom | Self::Flash => "memory",
            Self::Adc | Self::Pwm | Self::Sensor | Self::Motor => "control-flow",
            Self::Other => "general",
        }
    }
}

impl std::fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationGoal {
    #[default]
    Balanced,
    Performance,
    Size,
    Power,
}

impl OptimizationGoal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Performance => "performance",
            Self::Size => "size",
            Self::Power => "power",
        }
    }
}

/// Language-model backend selector for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelProvider {
    #[default]
    Mock,
    Real,
}

/// One hardware module requested by the caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ModuleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
}

impl ModuleSpec {
    /// The identifier used for paths and permissions: the explicit id when
    /// present, otherwise the sanitized name.
    pub fn effective_id(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => sanitize_identifier(&self.name),
        }
    }
}

/// Known MCU families and the framework label attached to generated code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McuFamily {
    Esp32,
    Stm32,
    Nordic,
    Pic32,
    Rp2040,
    Avr,
    Generic,
}

impl McuFamily {
    /// Maps a free-text MCU/board string onto a known target label.
    pub fn classify(mcu: &str) -> Self {
        let lower = mcu.to_ascii_lowercase();
        if lower.contains("esp32") || lower.contains("esp8266") {
            Self::Esp32
        } else if lower.contains("stm32") || lower.contains("stm") {
            Self::Stm32
        } else if lower.contains("nrf5") || lower.contains("nordic") {
            Self::Nordic
        } else if lower.contains("pic32") || lower.contains("pic") {
            Self::Pic32
        } else if lower.contains("rp2040") || lower.contains("pico") {
            Self::Rp2040
        } else if lower.contains("atmega") || lower.contains("avr") || lower.contains("arduino") {
            Self::Avr
        } else {
            Self::Generic
        }
    }

    pub fn framework(&self) -> &'static str {
        match self {
            Self::Esp32 => "esp-idf",
            Self::Stm32 => "stm32-hal",
            Self::Nordic => "nordic-sdk",
            Self::Pic32 => "harmony",
            Self::Rp2040 => "pico-sdk",
            Self::Avr => "avr-libc",
            Self::Generic => "generic",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Esp32 => "ESP32",
            Self::Stm32 => "STM32",
            Self::Nordic => "nRF52",
            Self::Pic32 => "PIC32",
            Self::Rp2040 => "RP2040",
            Self::Avr => "AVR",
            Self::Generic => "Generic MCU",
        }
    }
}

/// The caller-supplied requirements specification; immutable for the run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Specification {
    pub project_name: String,
    pub mcu: String,
    #[serde(default)]
    pub description: String,
    pub modules: Vec<ModuleSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub constraints: Map<String, Value>,
    #[serde(default)]
    pub safety_critical: bool,
    #[serde(default)]
    pub optimization_goal: OptimizationGoal,
}

impl Specification {
    /// Validates the specification. Runs are never created from an invalid
    /// one, so every check here surfaces at submit time.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.project_name.trim().is_empty() {
            return Err(SpecError::MissingField("project_name"));
        }
        if self.mcu.trim().is_empty() {
            return Err(SpecError::MissingField("mcu"));
        }
        let mut seen = std::collections::HashSet::new();
        for module in &self.modules {
            if module.name.trim().is_empty() && module.id.is_none() {
                return Err(SpecError::MissingField("modules[].name"));
            }
            let id = module.effective_id();
            if id.is_empty() || !is_url_safe(&id) {
                return Err(SpecError::InvalidModuleId(id));
            }
            if !seen.insert(id.clone()) {
                return Err(SpecError::DuplicateModuleId(id));
            }
        }
        Ok(())
    }

    pub fn mcu_family(&self) -> McuFamily {
        McuFamily::classify(&self.mcu)
    }

    /// Folder-safe project name used in the run output directory.
    pub fn sanitized_project_name(&self) -> String {
        sanitize_identifier(&self.project_name)
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.effective_id()).collect()
    }
}

/// Per-run options carried alongside the specification.
///
/// `api_key` is held only for the lifetime of the run and is excluded from
/// both serialization and debug output.
#[derive(Clone, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default = "default_true")]
    pub include_tests: bool,
    #[serde(default = "default_true")]
    pub run_quality_checks: bool,
    #[serde(default)]
    pub architecture_only: bool,
    #[serde(default)]
    pub model_provider: ModelProvider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            include_tests: true,
            run_quality_checks: true,
            architecture_only: false,
            model_provider: ModelProvider::Mock,
            model_name: None,
            api_key: None,
        }
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("include_tests", &self.include_tests)
            .field("run_quality_checks", &self.run_quality_checks)
            .field("architecture_only", &self.architecture_only)
            .field("model_provider", &self.model_provider)
            .field("model_name", &self.model_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid module id: {0:?}")]
    InvalidModuleId(String),
    #[error("duplicate module id: {0}")]
    DuplicateModuleId(String),
    #[error("specification parse error: {0}")]
    Parse(String),
}

/// Lower-cases nothing; replaces whitespace and hyphens with underscores and
/// drops any remaining character that is not URL-safe.
pub fn sanitize_identifier(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn is_url_safe(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_spec() -> Specification {
        Specification {
            project_name: "Telemetry Node".into(),
            mcu: "ESP32".into(),
            description: String::new(),
            modules: vec![ModuleSpec {
                id: Some("uart0".into()),
                name: "uart0".into(),
                kind: ModuleKind::Uart,
                description: None,
                parameters: Map::new(),
                requirements: Vec::new(),
            }],
            requirements: Vec::new(),
            constraints: Map::new(),
            safety_critical: false,
            optimization_goal: OptimizationGoal::Balanced,
        }
    }

    #[test]
    fn validate_accepts_minimal_spec() {
        assert!(minimal_spec().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_project_name() {
        let mut spec = minimal_spec();
        spec.project_name = "  ".into();
        assert!(matches!(
            spec.validate(),
            Err(SpecError::MissingField("project_name"))
        ));
    }

    #[test]
    fn validate_rejects_duplicate_module_ids() {
        let mut spec = minimal_spec();
        spec.modules.push(spec.modules[0].clone());
        assert!(matches!(
            spec.validate(),
            Err(SpecError::DuplicateModuleId(id)) if id == "uart0"
        ));
    }

    #[test]
    fn unknown_module_kind_fails_at_parse_time() {
        let raw = serde_json::json!({
            "id": "x", "name": "x", "type": "quantum_link"
        });
        assert!(serde_json::from_value::<ModuleSpec>(raw).is_err());
    }

    #[test]
    fn effective_id_falls_back_to_sanitized_name() {
        let module = ModuleSpec {
            id: None,
            name: "Main Sensor-Loop".into(),
            kind: ModuleKind::Sensor,
            description: None,
            parameters: Map::new(),
            requirements: Vec::new(),
        };
        assert_eq!(module.effective_id(), "Main_Sensor_Loop");
    }

    #[test]
    fn mcu_classification_covers_known_boards() {
        assert_eq!(McuFamily::classify("ESP32-S3"), McuFamily::Esp32);
        assert_eq!(McuFamily::classify("STM32F407"), McuFamily::Stm32);
        assert_eq!(McuFamily::classify("nRF52840"), McuFamily::Nordic);
        assert_eq!(McuFamily::classify("Cortex-M55"), McuFamily::Generic);
    }

    #[test]
    fn run_options_debug_redacts_api_key() {
        let opts = RunOptions {
            api_key: Some("sk-secret".into()),
            ..RunOptions::default()
        };
        let rendered = format!("{opts:?}");
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn run_options_never_serialize_api_key() {
        let opts = RunOptions {
            api_key: Some("sk-secret".into()),
            ..RunOptions::default()
        };
        let rendered = serde_json::to_string(&opts).unwrap();
        assert!(!rendered.contains("sk-secret"));
    }
}
