//! Sidecar metadata records.
//!
//! Every artifact on disk has exactly one sidecar; an orphan artifact is a
//! consistency violation. Sidecars are canonical JSON: sorted keys, UTF-8
//! without BOM, LF line endings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use firmforge_mcp::ArtifactType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactFormat {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "multi-file")]
    MultiFile,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub artifact_id: String,
    pub agent_id: String,
    pub artifact_type: ArtifactType,
    pub module_id: Option<String>,
    pub prompt_version: String,
    pub timestamp: DateTime<Utc>,
    pub artifact_format: ArtifactFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_artifacts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Serializes through `serde_json::Value` so object keys come out sorted.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    serde_json::to_string_pretty(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_object_keys() {
        let mut map = Map::new();
        map.insert("zeta".into(), Value::from(1));
        map.insert("alpha".into(), Value::from(2));
        let rendered = canonical_json(&map).unwrap();
        let alpha = rendered.find("alpha").unwrap();
        let zeta = rendered.find("zeta").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn canonical_json_uses_lf_only() {
        let rendered = canonical_json(&serde_json::json!({"a": [1, 2]})).unwrap();
        assert!(!rendered.contains('\r'));
        assert!(!rendered.ends_with(char::is_whitespace));
    }

    #[test]
    fn sidecar_round_trips() {
        let meta = ArtifactMetadata {
            artifact_id: "00000000000000000000000000000001".into(),
            agent_id: "architecture_agent".into(),
            artifact_type: ArtifactType::Architecture,
            module_id: None,
            prompt_version: "v1".into(),
            timestamp: Utc::now(),
            artifact_format: ArtifactFormat::Text,
            sub_artifacts: None,
            extra: Map::new(),
        };
        let rendered = canonical_json(&meta).unwrap();
        let parsed: ArtifactMetadata = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed.artifact_id, meta.artifact_id);
        assert_eq!(parsed.artifact_format, ArtifactFormat::Text);
    }
}
