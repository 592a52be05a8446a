use std::fmt;

use warden_core::tuple::RelationTuple;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Admin,
    Banned,
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleKind::Admin => write!(f, "admin"),
            RoleKind::Banned => write!(f, "banned"),
        }
    }
}

/// One applied role mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleChangeRecord {
    pub id: uuid::Uuid,
    pub actor: String,
    pub target: String,
    pub role: RoleKind,
    pub enabled: bool,
}

impl RoleChangeRecord {
    pub fn new(actor: &str, target: &str, role: RoleKind, enabled: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            actor: actor.to_string(),
            target: target.to_string(),
            role,
            enabled,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("audit sink failed: {0}")]
pub struct AuditError(pub String);

/// Destination for role-change records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &RoleChangeRecord) -> Result<(), AuditError>;
}

/// Writes role changes to the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &RoleChangeRecord) -> Result<(), AuditError> {
        audit_role_change(record);
        Ok(())
    }
}

pub fn audit_role_change(record: &RoleChangeRecord) {
    tracing::info!(
        target: "audit",
        event = "role_change",
        record_id = %record.id,
        actor = %record.actor,
        target_subject = %record.target,
        role = %record.role,
        enabled = record.enabled,
        "role changed"
    );
}

pub fn audit_relationship_mutation(caller: &str, operation: &str, tuple: &RelationTuple) {
    tracing::info!(
        target: "audit",
        event = "relationship_mutation",
        caller = caller,
        operation = operation,
        tuple = %tuple,
        "relationship mutated"
    );
}

pub fn audit_service_auth_success(caller: &str) {
    tracing::info!(
        target: "audit",
        event = "service_auth_success",
        caller = caller,
        "service authentication succeeded"
    );
}

pub fn audit_service_auth_failure(reason: &str) {
    tracing::warn!(
        target: "audit",
        event = "service_auth_failure",
        reason = reason,
        "service authentication failed"
    );
}
