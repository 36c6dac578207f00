//! Governance layer: the capability matrix and permission checks.
//!
//! Single source of truth for what each agent may do. Every artifact read,
//! write, and agent invocation goes through [`Mcp`]; the matrix is immutable
//! after construction and lock-free to read.

mod audit;
mod matrix;

pub use audit::{AuditEntry, AuditLog};
pub use matrix::{AccessKind, ArtifactType, CapabilityMatrix, Permission};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("agent {agent} not allowed to {action} {resource}")]
    PermissionDenied {
        agent: String,
        action: AccessKind,
        resource: String,
    },
}

/// Permission enforcement with an append-only audit trail.
///
/// Audit failures are logged and never fail the authorization call.
pub struct Mcp {
    matrix: CapabilityMatrix,
    audit: Option<AuditLog>,
}

impl Mcp {
    pub fn new(matrix: CapabilityMatrix, audit: Option<AuditLog>) -> Self {
        Self { matrix, audit }
    }

    /// The canonical matrix with no audit log; used by most tests.
    pub fn canonical() -> Self {
        Self::new(CapabilityMatrix::canonical(), None)
    }

    /// Succeeds iff the agent holds `run:agent`.
    pub fn check_run(&self, agent_id: &str) -> Result<(), McpError> {
        self.enforce(agent_id, AccessKind::Run, "agent")
    }

    /// Succeeds iff the agent holds `read:<type>`. Qualified resources
    /// (`module_code:<module_id>`) match on the base type.
    pub fn check_read(&self, agent_id: &str, artifact_type: ArtifactType) -> Result<(), McpError> {
        self.enforce(agent_id, AccessKind::Read, artifact_type.as_str())
    }

    pub fn check_read_scoped(
        &self,
        agent_id: &str,
        artifact_type: ArtifactType,
        qualifier: &str,
    ) -> Result<(), McpError> {
        let resource = format!("{}:{qualifier}", artifact_type.as_str());
        self.enforce(agent_id, AccessKind::Read, &resource)
    }

    /// Succeeds iff the agent holds `write:<type>`.
    pub fn check_write(&self, agent_id: &str, artifact_type: ArtifactType) -> Result<(), McpError> {
        self.enforce(agent_id, AccessKind::Write, artifact_type.as_str())
    }

    pub fn check_write_scoped(
        &self,
        agent_id: &str,
        artifact_type: ArtifactType,
        qualifier: &str,
    ) -> Result<(), McpError> {
        let resource = format!("{}:{qualifier}", artifact_type.as_str());
        self.enforce(agent_id, AccessKind::Write, &resource)
    }

    /// String-typed enforcement used by callers outside the typed store path.
    /// Resources whose base type is not a known artifact type are denied;
    /// `quality_report` in particular is a legacy name and never authorized.
    pub fn enforce(
        &self,
        agent_id: &str,
        action: AccessKind,
        resource: &str,
    ) -> Result<(), McpError> {
        let allowed = self.authorize(agent_id, action, resource);
        if allowed {
            Ok(())
        } else {
            tracing::warn!(agent = agent_id, %action, resource, "mcp violation");
            Err(McpError::PermissionDenied {
                agent: agent_id.to_string(),
                action,
                resource: resource.to_string(),
            })
        }
    }

    /// Pure decision plus audit record; never errors.
    pub fn authorize(&self, agent_id: &str, action: AccessKind, resource: &str) -> bool {
        let allowed = self.matrix.allows(agent_id, action, resource);
        let reason = (!allowed).then(|| "permission denied".to_string());
        if let Some(audit) = &self.audit {
            audit.record(AuditEntry::new(agent_id, action, resource, allowed, reason));
        }
        tracing::debug!(agent = agent_id, %action, resource, allowed, "mcp authorize");
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_matrix_allows_declared_permissions() {
        let mcp = Mcp::canonical();
        assert!(mcp.check_run("architecture_agent").is_ok());
        assert!(mcp
            .check_write("architecture_agent", ArtifactType::Architecture)
            .is_ok());
        assert!(mcp
            .check_read("architecture_agent", ArtifactType::Requirements)
            .is_ok());
        assert!(mcp.check_write("code_agent", ArtifactType::ModuleCode).is_ok());
        assert!(mcp.check_read("quality_agent", ArtifactType::Tests).is_ok());
        assert!(mcp.check_write("build_agent", ArtifactType::BuildLog).is_ok());
    }

    #[test]
    fn cross_writes_are_denied_with_named_agent_and_action() {
        let mcp = Mcp::canonical();
        let err = mcp
            .check_write("code_agent:uart0", ArtifactType::Architecture)
            .unwrap_err();
        let McpError::PermissionDenied {
            agent,
            action,
            resource,
        } = err;
        assert_eq!(agent, "code_agent:uart0");
        assert_eq!(action, AccessKind::Write);
        assert_eq!(resource, "architecture");
    }

    #[test]
    fn per_module_code_agents_resolve_to_the_code_agent_role() {
        let mcp = Mcp::canonical();
        assert!(mcp.check_run("code_agent:uart0").is_ok());
        assert!(mcp
            .check_write_scoped("code_agent:uart0", ArtifactType::ModuleCode, "uart0")
            .is_ok());
    }

    #[test]
    fn quality_report_resource_is_always_denied() {
        let mcp = Mcp::canonical();
        let err = mcp
            .enforce("quality_agent", AccessKind::Write, "quality_report")
            .unwrap_err();
        assert!(err.to_string().contains("quality_agent"));
        assert!(err.to_string().contains("quality_report"));
    }

    #[test]
    fn unknown_agents_hold_nothing() {
        let mcp = Mcp::canonical();
        assert!(mcp.check_run("rogue_agent").is_err());
        assert!(mcp.check_read("rogue_agent", ArtifactType::Reports).is_err());
    }

    #[test]
    fn audit_log_records_both_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp_audit.log");
        let mcp = Mcp::new(CapabilityMatrix::canonical(), Some(AuditLog::new(&path)));

        assert!(mcp.authorize("architecture_agent", AccessKind::Write, "architecture"));
        assert!(!mcp.authorize("code_agent:m1", AccessKind::Write, "architecture"));

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert!(first.allowed);
        let second: AuditEntry = serde_json::from_str(lines[1]).unwrap();
        assert!(!second.allowed);
        assert_eq!(second.reason.as_deref(), Some("permission denied"));
    }
}
