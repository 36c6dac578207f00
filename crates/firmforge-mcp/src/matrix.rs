//! The static capability matrix.
//!
//! Permissions take the form `run:agent`, `read:<type>`, `write:<type>`.
//! Qualified resources (`module_code:<module_id>`) match on the base type, so
//! holding `write:module_code` covers every module directory.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// Artifact categories known to the pipeline. The category governs both the
/// permission check and the storage path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Requirements,
    Architecture,
    ModuleCode,
    Tests,
    Reports,
    Artifacts,
    BuildLog,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requirements => "requirements",
            Self::Architecture => "architecture",
            Self::ModuleCode => "module_code",
            Self::Tests => "tests",
            Self::Reports => "reports",
            Self::Artifacts => "artifacts",
            Self::BuildLog => "build_log",
        }
    }

    /// Parses a base type name. Legacy names such as `quality_report` do not
    /// parse and therefore can never be authorized.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "requirements" => Some(Self::Requirements),
            "architecture" => Some(Self::Architecture),
            "module_code" => Some(Self::ModuleCode),
            "tests" => Some(Self::Tests),
            "reports" => Some(Self::Reports),
            "artifacts" => Some(Self::Artifacts),
            "build_log" => Some(Self::BuildLog),
            _ => None,
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    Write,
    Run,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Run => "run",
        }
    }
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry in an agent's permission set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Permission {
    RunAgent,
    Read(ArtifactType),
    Write(ArtifactType),
}

/// Role to permission-set mapping, immutable after construction.
#[derive(Clone, Debug, Default)]
pub struct CapabilityMatrix {
    roles: HashMap<String, HashSet<Permission>>,
}

impl CapabilityMatrix {
    /// The canonical matrix for the five pipeline agents.
    pub fn canonical() -> Self {
        use ArtifactType::*;
        use Permission::*;
        let mut matrix = Self::default();
        matrix.grant("architecture_agent", [RunAgent, Write(Architecture), Read(Requirements)]);
        matrix.grant("code_agent", [RunAgent, Read(Architecture), Write(ModuleCode)]);
        matrix.grant("test_agent", [RunAgent, Read(ModuleCode), Write(Tests)]);
        matrix.grant(
            "quality_agent",
            [RunAgent, Read(ModuleCode), Read(Tests), Write(Reports)],
        );
        matrix.grant(
            "build_agent",
            [RunAgent, Read(ModuleCode), Read(Tests), Write(Artifacts), Write(BuildLog)],
        );
        matrix
    }

    pub fn grant(&mut self, role: &str, permissions: impl IntoIterator<Item = Permission>) {
        self.roles
            .entry(role.to_string())
            .or_default()
            .extend(permissions);
    }

    /// Per-module code agents are named `code_agent:<module_id>`; they share
    /// the `code_agent` role.
    pub fn role_for(agent_id: &str) -> &str {
        match agent_id.split_once(':') {
            Some((role, _)) if role == "code_agent" => role,
            _ => agent_id,
        }
    }

    pub fn allows(&self, agent_id: &str, action: AccessKind, resource: &str) -> bool {
        let Some(perms) = self.roles.get(Self::role_for(agent_id)) else {
            return false;
        };
        match action {
            AccessKind::Run => perms.contains(&Permission::RunAgent),
            AccessKind::Read | AccessKind::Write => {
                let base = resource.split(':').next().unwrap_or(resource);
                let Some(artifact_type) = ArtifactType::parse(base) else {
                    return false;
                };
                let needed = match action {
                    AccessKind::Read => Permission::Read(artifact_type),
                    _ => Permission::Write(artifact_type),
                };
                perms.contains(&needed)
            }
        }
    }
}
