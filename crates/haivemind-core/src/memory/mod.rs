//! Memory Module - Core types and data structures
//!
//! Defines the memory record at the center of the content-addressed store:
//! category taxonomy, the confidentiality lattice, the soft/hard deletion
//! lifecycle, and content hashing for deduplication.

mod hashing;

pub use hashing::{content_hash, normalize_content};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::clock::VectorClock;

// ============================================================================
// CATEGORY
// ============================================================================

/// The recognized category taxonomy. Each category routes to its own
/// embedding collection and freshness half-life (see `confidence::half_life_days`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Project,
    Conversation,
    Agent,
    Global,
    Infrastructure,
    Incidents,
    Deployments,
    Monitoring,
    Runbooks,
    Security,
    Patterns,
    PlaybookSuggestions,
    PlaybookVersions,
    PlaybookExecutions,
    ReviewHistory,
    RecommendationFeedback,
    /// Any user-defined category name not in the recognized set.
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Project => "project",
            Category::Conversation => "conversation",
            Category::Agent => "agent",
            Category::Global => "global",
            Category::Infrastructure => "infrastructure",
            Category::Incidents => "incidents",
            Category::Deployments => "deployments",
            Category::Monitoring => "monitoring",
            Category::Runbooks => "runbooks",
            Category::Security => "security",
            Category::Patterns => "patterns",
            Category::PlaybookSuggestions => "playbook_suggestions",
            Category::PlaybookVersions => "playbook_versions",
            Category::PlaybookExecutions => "playbook_executions",
            Category::ReviewHistory => "review_history",
            Category::RecommendationFeedback => "recommendation_feedback",
            Category::Other => "other",
        }
    }

    /// Parse a category name, routing anything unrecognized to `Other`.
    /// `Other` categories still need their original string preserved by the
    /// caller (stored separately as `category_label` on `Memory`).
    pub fn parse(s: &str) -> Self {
        match s {
            "project" => Category::Project,
            "conversation" => Category::Conversation,
            "agent" => Category::Agent,
            "global" => Category::Global,
            "infrastructure" => Category::Infrastructure,
            "incidents" => Category::Incidents,
            "deployments" => Category::Deployments,
            "monitoring" => Category::Monitoring,
            "runbooks" => Category::Runbooks,
            "security" => Category::Security,
            "patterns" => Category::Patterns,
            "playbook_suggestions" => Category::PlaybookSuggestions,
            "playbook_versions" => Category::PlaybookVersions,
            "playbook_executions" => Category::PlaybookExecutions,
            "review_history" => Category::ReviewHistory,
            "recommendation_feedback" => Category::RecommendationFeedback,
            _ => Category::Other,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CONFIDENTIALITY LATTICE
// ============================================================================

/// Confidentiality lattice. Ordering is derived so `normal < internal <
/// confidential < pii`; a memory's level may only move up this ordering
/// (`Memory::can_raise_confidentiality_to`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConfidentialityLevel {
    #[default]
    Normal,
    Internal,
    Confidential,
    Pii,
}

impl ConfidentialityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidentialityLevel::Normal => "normal",
            ConfidentialityLevel::Internal => "internal",
            ConfidentialityLevel::Confidential => "confidential",
            ConfidentialityLevel::Pii => "pii",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(ConfidentialityLevel::Normal),
            "internal" => Some(ConfidentialityLevel::Internal),
            "confidential" => Some(ConfidentialityLevel::Confidential),
            "pii" => Some(ConfidentialityLevel::Pii),
            _ => None,
        }
    }

    /// Never synced to any peer, under any circumstance.
    pub fn is_pii(&self) -> bool {
        matches!(self, ConfidentialityLevel::Pii)
    }

    /// Local-only: visible to local search/broadcast, but excluded from sync.
    pub fn is_local_only(&self) -> bool {
        matches!(self, ConfidentialityLevel::Confidential | ConfidentialityLevel::Pii)
    }
}

impl std::fmt::Display for ConfidentialityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// FORMAT VERSION
// ============================================================================

/// Memory content encoding version, stamped once at creation (§4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormatVersion {
    /// Verbose, pre-format-guide encoding.
    #[default]
    V1,
    /// Compact encoding, used once a session has received the format guide.
    V2,
}

impl FormatVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatVersion::V1 => "v1",
            FormatVersion::V2 => "v2",
        }
    }
}

// ============================================================================
// DELETION LIFECYCLE
// ============================================================================

/// Where a memory sits in the soft-delete/purge lifecycle (§3.2).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeletionState {
    #[default]
    Live,
    SoftDeleted {
        deleted_at: DateTime<Utc>,
        deleted_by: Option<String>,
        delete_reason: Option<String>,
        delete_expires_at: DateTime<Utc>,
    },
    Purged {
        deleted_at: DateTime<Utc>,
        deleted_by: Option<String>,
        delete_reason: Option<String>,
    },
}

impl DeletionState {
    pub fn is_live(&self) -> bool {
        matches!(self, DeletionState::Live)
    }

    pub fn is_soft_deleted(&self) -> bool {
        matches!(self, DeletionState::SoftDeleted { .. })
    }

    pub fn is_purged(&self) -> bool {
        matches!(self, DeletionState::Purged { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionState::Live => "live",
            DeletionState::SoftDeleted { .. } => "soft_deleted",
            DeletionState::Purged { .. } => "purged",
        }
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// The atomic unit of knowledge stored by the Memory Engine. The Vector
/// Store owns the embedding; this record references it by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// URL-safe random identifier, immutable for the life of the record.
    pub id: String,
    pub content: String,
    /// 256-bit digest of the normalized content; recomputed on every content update.
    pub content_hash: String,
    pub category: Category,
    /// Original category string as supplied by the caller, preserved verbatim
    /// when `category == Other` (a recognized category round-trips via `Category::as_str`).
    pub category_label: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub context: Option<String>,
    pub project_id: Option<String>,
    pub user_id: Option<String>,
    pub machine_id: String,
    pub source_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub vector_clock: VectorClock,
    pub confidentiality_level: ConfidentialityLevel,
    pub format_version: FormatVersion,
    pub deletion_state: DeletionState,
    /// Whether the Vector Store currently holds an embedding for this id.
    pub has_embedding: bool,
}

impl Memory {
    /// Whether this level change is permitted by the one-way ratchet.
    pub fn can_raise_confidentiality_to(&self, new_level: ConfidentialityLevel) -> bool {
        new_level >= self.confidentiality_level
    }

    /// Age in whole days, used by the Confidence Engine's freshness factor.
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds().max(0) as f64 / 86_400.0
    }

    /// Visible to a reader on `reader_machine_id`? Implements the
    /// confidentiality-enforcement rule of §4.1: `pii` only on the owning
    /// machine, `confidential` local-only, everything else unrestricted.
    pub fn visible_to(&self, reader_machine_id: &str) -> bool {
        match self.confidentiality_level {
            ConfidentialityLevel::Pii | ConfidentialityLevel::Confidential => {
                self.machine_id == reader_machine_id
            }
            ConfidentialityLevel::Normal | ConfidentialityLevel::Internal => true,
        }
    }

    /// Should this memory be propagated in an outbound sync push?
    pub fn syncable(&self) -> bool {
        !self.confidentiality_level.is_local_only()
    }
}

// ============================================================================
// SEARCH TYPES
// ============================================================================

/// Search mode for `MemoryEngine::search`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Lexical,
    #[default]
    Hybrid,
}

/// Filters applied to `search`/`recent`/`bulk_delete` (§4.1).
#[derive(Debug, Clone, Default)]
pub struct MemoryFilters {
    pub category: Option<Category>,
    pub project_id: Option<String>,
    pub machine_id: Option<String>,
    pub agent_id: Option<String>,
    pub tags: HashSet<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub min_confidence: Option<f64>,
    pub exclude_confidential: bool,
}

/// How a search result was matched (for response shaping / debugging).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Lexical,
    Both,
}

/// A single ranked search hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub snippet: String,
    pub match_type: MatchType,
}

/// Aggregate statistics returned by the `stats` tool.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_live: i64,
    pub total_soft_deleted: i64,
    pub total_purged: i64,
    pub by_category: Vec<(String, i64)>,
    pub by_confidentiality: Vec<(String, i64)>,
    pub v1_compressible: i64,
    pub average_confidence: f64,
    pub oldest_memory: Option<DateTime<Utc>>,
    pub newest_memory: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_round_trips() {
        for cat in [
            Category::Project,
            Category::Infrastructure,
            Category::Security,
            Category::PlaybookSuggestions,
        ] {
            assert_eq!(Category::parse(cat.as_str()), cat);
        }
    }

    #[test]
    fn unrecognized_category_is_other() {
        assert_eq!(Category::parse("quantum_flux"), Category::Other);
    }

    #[test]
    fn confidentiality_ordering_is_a_lattice() {
        assert!(ConfidentialityLevel::Normal < ConfidentialityLevel::Internal);
        assert!(ConfidentialityLevel::Internal < ConfidentialityLevel::Confidential);
        assert!(ConfidentialityLevel::Confidential < ConfidentialityLevel::Pii);
    }

    #[test]
    fn ratchet_forbids_downgrade() {
        let memory = Memory {
            confidentiality_level: ConfidentialityLevel::Confidential,
            ..sample_memory()
        };
        assert!(!memory.can_raise_confidentiality_to(ConfidentialityLevel::Normal));
        assert!(memory.can_raise_confidentiality_to(ConfidentialityLevel::Pii));
        assert!(memory.can_raise_confidentiality_to(ConfidentialityLevel::Confidential));
    }

    #[test]
    fn pii_only_visible_on_owning_machine() {
        let memory = Memory {
            machine_id: "node-a".into(),
            confidentiality_level: ConfidentialityLevel::Pii,
            ..sample_memory()
        };
        assert!(memory.visible_to("node-a"));
        assert!(!memory.visible_to("node-b"));
        assert!(!memory.syncable());
    }

    #[test]
    fn confidential_is_local_only_but_visible_locally() {
        let memory = Memory {
            machine_id: "node-a".into(),
            confidentiality_level: ConfidentialityLevel::Confidential,
            ..sample_memory()
        };
        assert!(memory.visible_to("node-a"));
        assert!(!memory.visible_to("node-b"));
        assert!(!memory.syncable());
    }

    #[test]
    fn normal_and_internal_are_syncable_and_visible_everywhere() {
        for level in [ConfidentialityLevel::Normal, ConfidentialityLevel::Internal] {
            let memory = Memory {
                machine_id: "node-a".into(),
                confidentiality_level: level,
                ..sample_memory()
            };
            assert!(memory.visible_to("node-b"));
            assert!(memory.syncable());
        }
    }

    fn sample_memory() -> Memory {
        let now = Utc::now();
        Memory {
            id: "m1".into(),
            content: "content".into(),
            content_hash: "hash".into(),
            category: Category::Global,
            category_label: "global".into(),
            tags: vec![],
            context: None,
            project_id: None,
            user_id: None,
            machine_id: "node-a".into(),
            source_agent_id: None,
            created_at: now,
            updated_at: now,
            vector_clock: VectorClock::origin("node-a"),
            confidentiality_level: ConfidentialityLevel::Normal,
            format_version: FormatVersion::V1,
            deletion_state: DeletionState::Live,
            has_embedding: false,
        }
    }
}

