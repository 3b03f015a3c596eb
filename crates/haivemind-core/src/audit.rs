//! Audit Log (AL) - append-only, monotonically-sequenced record of
//! privileged operations. Local per node; never synced (§4.7).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Denied,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditTargetKind {
    Memory,
    Agent,
    Vault,
}

/// A single append-only audit entry. `seq` is assigned by storage on
/// insert and is strictly increasing within a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub seq: i64,
    pub actor_agent_id: Option<String>,
    pub actor_machine_id: String,
    pub operation: String,
    pub target_kind: AuditTargetKind,
    pub target_id: String,
    pub outcome: AuditOutcome,
    pub occurred_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Operations that always require an `AuditRecord`, per §4.7.
pub const PRIVILEGED_OPERATIONS: &[&str] = &[
    "pii_read",
    "hard_delete",
    "bulk_delete",
    "confidentiality_change",
    "contradiction_resolved",
    "sync_conflict",
    "gdpr_delete",
    "gdpr_export",
];

pub fn is_privileged(operation: &str) -> bool {
    PRIVILEGED_OPERATIONS.contains(&operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_privileged_operations() {
        assert!(is_privileged("hard_delete"));
        assert!(is_privileged("sync_conflict"));
        assert!(!is_privileged("search"));
    }
}
