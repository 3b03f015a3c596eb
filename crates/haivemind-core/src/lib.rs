//! # hAIveMind Core
//!
//! Memory engine, confidence scoring, sync, and agent registry for a
//! distributed multi-agent memory and coordination hub.
//!
//! - **Memory Engine (ME)**: content-addressed store with a confidentiality
//!   lattice, soft/hard deletion lifecycle, and hybrid semantic/lexical
//!   search.
//! - **Confidence Engine (CE)**: 7-factor trust scoring (freshness, source
//!   credibility, verification, consensus, no-contradiction, usage success,
//!   context relevance) plus contradiction detection and resolution.
//! - **Sync Service (SS)**: peer discovery, delta exchange, and vector-clock
//!   conflict resolution between nodes.
//! - **Agent Registry (AR)**: capability-based task delegation with
//!   heartbeat-driven liveness.
//! - **Audit Log (AL)**: append-only record of privileged operations.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use haivemind_core::{ConfidentialityLevel, Storage};
//!
//! let storage = Storage::new(None, "node-a".to_string())?;
//! let memory = storage.store(
//!     "Redis cluster has 6 nodes".to_string(),
//!     "infrastructure".to_string(),
//!     vec!["redis".to_string()],
//!     None, None, None, None,
//!     ConfidentialityLevel::Normal,
//!     true,
//! )?;
//! let hits = storage.search("redis cluster", Default::default(), 10, 0.7, "node-a")?;
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local embedding generation with fastembed
//! - `vector-search` (default): HNSW vector search with USearch
//! - `bundled-sqlite` (default): statically-linked SQLite

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod audit;
pub mod bus;
pub mod clock;
pub mod confidence;
pub mod config;
pub mod error;
pub mod memory;
pub mod registry;
pub mod storage;
pub mod sync;

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
pub mod embeddings;

#[cfg(feature = "vector-search")]
#[cfg_attr(docsrs, doc(cfg(feature = "vector-search")))]
pub mod search;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use audit::{is_privileged, AuditOutcome, AuditRecord, AuditTargetKind, PRIVILEGED_OPERATIONS};

pub use bus::{EventBus, SyncEvent};

pub use clock::{ClockOrdering, VectorClock};

pub use confidence::{
    agent_credibility, detect_discriminator_conflict, half_life_days, resolve_default, score,
    Contradiction, ContradictionKind, ContradictionStatus, ContradictionStrategy,
    ConfidenceRecord, DiscriminatorInput, QueryContext, ScoringInputs, UsageOutcome, Verification,
    VerificationKind, VerificationOutcome, Vote, VoteChoice, STRATEGY_ORDER,
};

pub use config::{Config, ConfigError};

pub use error::{HaiveError, Result};

pub use memory::{
    content_hash, Category, ConfidentialityLevel, DeletionState, FormatVersion, MatchType,
    Memory, MemoryFilters, MemoryStats, SearchHit, SearchMode,
};

pub use registry::{
    Agent, AgentRegistry, AgentStatus, RegistryError, RosterFilter, Task, TaskStatus,
};

pub use storage::{Storage, StorageError};

pub use sync::{
    confidentiality_allows_outbound, resolve, ConflictSide, PeerConfig, PullRequest,
    PullResponse, PushOutcome, PushRequest, PushResponse, Resolution, StatusRequest,
    StatusResponse, SubscribeRequest, SyncError, SyncService,
};

#[cfg(feature = "embeddings")]
pub use embeddings::{
    cosine_similarity, euclidean_distance, Embedding, EmbeddingError, EmbeddingService,
    EMBEDDING_DIMENSIONS,
};

#[cfg(feature = "vector-search")]
pub use search::{
    linear_combination, reciprocal_rank_fusion, sanitize_fts5_query, HybridSearchConfig,
    HybridSearcher, KeywordSearcher, VectorIndex, VectorIndexConfig, VectorIndexStats,
    VectorSearchError,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-ai/nomic-embed-text-v1.5";

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        AgentRegistry, AuditRecord, Category, ConfidentialityLevel, Config, EventBus, HaiveError,
        Memory, MemoryFilters, MemoryStats, Result, SearchHit, SearchMode, Storage, StorageError,
        SyncService, VectorClock,
    };

    #[cfg(feature = "embeddings")]
    pub use crate::{Embedding, EmbeddingService};

    #[cfg(feature = "vector-search")]
    pub use crate::{HybridSearcher, VectorIndex};
}
