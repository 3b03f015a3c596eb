//! SQLite Storage Implementation
//!
//! Core storage layer: memory CRUD, confidence-engine persistence, agent
//! registry persistence, and the audit log. Integrates embeddings and
//! vector search when those features are enabled.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditOutcome, AuditRecord, AuditTargetKind};
use crate::clock::VectorClock;
use crate::confidence::{
    detect_discriminator_conflict, Contradiction, ContradictionKind, ContradictionStatus,
    ContradictionStrategy, DiscriminatorInput, ScoringInputs, UsageOutcome, Verification,
    VerificationKind, VerificationOutcome, Vote, VoteChoice, resolve_default,
};
use crate::memory::{
    content_hash, Category, ConfidentialityLevel, DeletionState, FormatVersion, Memory,
    MemoryFilters, MemoryStats, SearchHit,
};

#[cfg(feature = "embeddings")]
use crate::embeddings::{Embedding, EmbeddingService};

#[cfg(feature = "vector-search")]
use crate::search::VectorIndex;

#[cfg(all(feature = "embeddings", feature = "vector-search"))]
use std::num::NonZeroUsize;

/// Recently-embedded queries, so repeated or paginated searches for the
/// same text skip re-running the embedding model.
#[cfg(all(feature = "embeddings", feature = "vector-search"))]
const QUERY_EMBEDDING_CACHE_SIZE: usize = 256;

/// Name of the embedding model stamped into `memory_embeddings.model`.
const EMBEDDING_MODEL_NAME: &str = "nomic-embed-text-v1.5";

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Memory not found
    #[error("Memory not found: {0}")]
    NotFound(String),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Confidentiality level may only move up the lattice
    #[error("confidentiality level may only be raised, not lowered: {0}")]
    ConfidentialityDowngrade(String),
    /// Soft-deleted memory's TTL has already expired
    #[error("deletion expired for memory: {0}")]
    DeletionExpired(String),
    /// Initialization error
    #[error("Initialization error: {0}")]
    Init(String),
    /// Read blocked by the memory's confidentiality level
    #[error("forbidden: {0}")]
    Forbidden(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

// ============================================================================
// STORAGE
// ============================================================================

/// Main storage struct with integrated embedding and vector search.
///
/// Uses separate reader/writer connections for interior mutability.
/// All methods take `&self` (not `&mut self`), making Storage `Send + Sync`
/// so the MCP layer can use `Arc<Storage>` instead of `Arc<Mutex<Storage>>`.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    machine_id: String,
    #[cfg(feature = "embeddings")]
    embedding_service: EmbeddingService,
    #[cfg(feature = "vector-search")]
    vector_index: Mutex<VectorIndex>,
    #[cfg(all(feature = "embeddings", feature = "vector-search"))]
    query_embedding_cache: Mutex<lru::LruCache<String, Embedding>>,
}

impl Storage {
    /// Apply PRAGMAs to a connection.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = 268435456;
             PRAGMA journal_size_limit = 67108864;
             PRAGMA optimize = 0x10002;",
        )?;

        Ok(())
    }

    /// Create new storage instance. `db_path: Some(":memory:")` opens an
    /// in-memory database (used by tests); `None` resolves the platform
    /// default data directory.
    pub fn new(db_path: Option<PathBuf>, machine_id: String) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("com", "haivemind", "core").ok_or_else(|| {
                    StorageError::Init("Could not determine project directories".to_string())
                })?;

                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let perms = std::fs::Permissions::from_mode(0o700);
                    let _ = std::fs::set_permissions(data_dir, perms);
                }
                data_dir.join("haivemind.db")
            }
        };

        let writer_conn = Connection::open(&path)?;

        #[cfg(unix)]
        if path.exists() && path != PathBuf::from(":memory:") {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(&path, perms);
        }

        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        #[cfg(feature = "embeddings")]
        let embedding_service = EmbeddingService::new();

        #[cfg(feature = "vector-search")]
        let vector_index = VectorIndex::new()
            .map_err(|e| StorageError::Init(format!("Failed to create vector index: {}", e)))?;

        let storage = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            machine_id,
            #[cfg(feature = "embeddings")]
            embedding_service,
            #[cfg(feature = "vector-search")]
            vector_index: Mutex::new(vector_index),
            #[cfg(all(feature = "embeddings", feature = "vector-search"))]
            query_embedding_cache: Mutex::new(lru::LruCache::new(
                NonZeroUsize::new(QUERY_EMBEDDING_CACHE_SIZE).expect("cache size is a nonzero constant"),
            )),
        };

        #[cfg(all(feature = "embeddings", feature = "vector-search"))]
        storage.load_embeddings_into_index()?;

        Ok(storage)
    }

    #[cfg(all(feature = "embeddings", feature = "vector-search"))]
    fn load_embeddings_into_index(&self) -> Result<()> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare("SELECT memory_id, embedding FROM memory_embeddings")?;
        let embeddings: Vec<(String, Vec<u8>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(stmt);
        drop(reader);

        let mut index = self.vector_index.lock().expect("vector index lock poisoned");
        for (memory_id, embedding_bytes) in embeddings {
            if let Some(embedding) = Embedding::from_bytes(&embedding_bytes) {
                if let Err(e) = index.add(&memory_id, &embedding.vector) {
                    tracing::warn!("Failed to load embedding for {}: {}", memory_id, e);
                }
            }
        }
        Ok(())
    }

    /// This node's machine id, as passed to `Storage::new`.
    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    // ========================================================================
    // MEMORY ENGINE (ME)
    // ========================================================================

    /// Store a new memory. If `dedupe` is true and an exact content-hash
    /// match exists among live memories, returns the existing record
    /// instead of inserting a duplicate.
    #[allow(clippy::too_many_arguments)]
    pub fn store(
        &self,
        content: String,
        category_label: String,
        tags: Vec<String>,
        context: Option<String>,
        project_id: Option<String>,
        user_id: Option<String>,
        source_agent_id: Option<String>,
        confidentiality_level: ConfidentialityLevel,
        dedupe: bool,
    ) -> Result<Memory> {
        let hash = content_hash(&content);

        if dedupe {
            if let Some(existing) = self.find_by_content_hash(&hash)? {
                return Ok(existing);
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let category = Category::parse(&category_label);
        let mut clock = VectorClock::new();
        clock.increment(&self.machine_id);
        let tags_json = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());
        let clock_json = serde_json::to_string(&clock).unwrap_or_else(|_| "{}".to_string());

        {
            let writer = self.writer.lock().expect("writer lock poisoned");
            writer.execute(
                "INSERT INTO memories (
                    id, content, content_hash, category, category_label, tags, context,
                    project_id, user_id, machine_id, source_agent_id, created_at, updated_at,
                    vector_clock, confidentiality_level, format_version, deletion_state, has_embedding
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
                params![
                    id,
                    content,
                    hash,
                    category.as_str(),
                    category_label,
                    tags_json,
                    context,
                    project_id,
                    user_id,
                    self.machine_id,
                    source_agent_id,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    clock_json,
                    confidentiality_level.as_str(),
                    FormatVersion::V1.as_str(),
                    "live",
                    0,
                ],
            )?;
        }

        #[cfg(all(feature = "embeddings", feature = "vector-search"))]
        if let Err(e) = self.generate_embedding_for(&id, &content) {
            tracing::warn!("Failed to generate embedding for {}: {}", id, e);
        }

        self.retrieve(&id)?.ok_or(StorageError::NotFound(id))
    }

    #[cfg(all(feature = "embeddings", feature = "vector-search"))]
    fn generate_embedding_for(&self, id: &str, content: &str) -> Result<()> {
        let embedding = self
            .embedding_service
            .embed(content)
            .map_err(|e| StorageError::Init(format!("embedding failed: {e}")))?;

        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT OR REPLACE INTO memory_embeddings (memory_id, embedding, dimensions, model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                embedding.to_bytes(),
                embedding.dimensions as i64,
                EMBEDDING_MODEL_NAME,
                Utc::now().to_rfc3339(),
            ],
        )?;
        writer.execute("UPDATE memories SET has_embedding = 1 WHERE id = ?1", params![id])?;
        drop(writer);

        let mut index = self.vector_index.lock().expect("vector index lock poisoned");
        index
            .add(id, &embedding.vector)
            .map_err(|e| StorageError::Init(format!("vector index insert failed: {e}")))?;
        Ok(())
    }

    fn find_by_content_hash(&self, hash: &str) -> Result<Option<Memory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let id: Option<String> = reader
            .query_row(
                "SELECT id FROM memories WHERE content_hash = ?1 AND deletion_state = 'live' LIMIT 1",
                params![hash],
                |row| row.get(0),
            )
            .optional()?;
        drop(reader);
        match id {
            Some(id) => self.retrieve(&id),
            None => Ok(None),
        }
    }

    pub fn retrieve(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        reader
            .query_row("SELECT * FROM memories WHERE id = ?1", params![id], row_to_memory)
            .optional()
            .map_err(StorageError::from)
    }

    /// Fetch a memory on behalf of an external reader, enforcing the
    /// confidentiality gate: `pii` is only visible from the owning machine
    /// and always leaves an audit record (accepted or denied); `confidential`
    /// is local-only but not audited.
    pub fn retrieve_checked(
        &self,
        id: &str,
        reader_machine_id: &str,
        reader_agent_id: Option<&str>,
    ) -> Result<Option<Memory>> {
        let memory = match self.retrieve(id)? {
            Some(m) => m,
            None => return Ok(None),
        };

        let visible = memory.visible_to(reader_machine_id);
        if memory.confidentiality_level == ConfidentialityLevel::Pii {
            let outcome = if visible { AuditOutcome::Success } else { AuditOutcome::Denied };
            self.record_audit(
                reader_agent_id.map(str::to_string),
                "pii_read",
                AuditTargetKind::Memory,
                id,
                outcome,
                None,
            )?;
        }
        if !visible {
            return Err(StorageError::Forbidden(id.to_string()));
        }

        Ok(Some(memory))
    }

    /// Update content (and, implicitly, content hash) of a live memory.
    /// Re-embeds the new content when embeddings are enabled.
    pub fn update(&self, id: &str, content: String) -> Result<Memory> {
        let mut memory = self.retrieve(id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if !memory.deletion_state.is_live() {
            return Err(StorageError::NotFound(id.to_string()));
        }

        memory.vector_clock.increment(&self.machine_id);
        let now = Utc::now();
        let hash = content_hash(&content);
        let clock_json = serde_json::to_string(&memory.vector_clock).unwrap_or_default();

        {
            let writer = self.writer.lock().expect("writer lock poisoned");
            writer.execute(
                "UPDATE memories SET content = ?1, content_hash = ?2, updated_at = ?3, vector_clock = ?4 WHERE id = ?5",
                params![content, hash, now.to_rfc3339(), clock_json, id],
            )?;
        }

        #[cfg(all(feature = "embeddings", feature = "vector-search"))]
        if let Err(e) = self.generate_embedding_for(id, &content) {
            tracing::warn!("Failed to re-embed {} after update: {}", id, e);
        }

        self.retrieve(id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Raise a memory's confidentiality level. Rejects any attempt to
    /// lower it, per the one-way ratchet.
    pub fn update_confidentiality(&self, id: &str, new_level: ConfidentialityLevel) -> Result<Memory> {
        let memory = self.retrieve(id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        if !memory.can_raise_confidentiality_to(new_level) {
            return Err(StorageError::ConfidentialityDowngrade(id.to_string()));
        }
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE memories SET confidentiality_level = ?1, updated_at = ?2 WHERE id = ?3",
            params![new_level.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        drop(writer);
        self.retrieve(id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Soft-delete a live memory, starting its TTL countdown.
    pub fn delete(&self, id: &str, deleted_by: Option<String>, reason: Option<String>, ttl_days: u32) -> Result<Memory> {
        let mut memory = self.retrieve(id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        memory.vector_clock.increment(&self.machine_id);
        let now = Utc::now();
        let expires_at = now + Duration::days(ttl_days as i64);
        let clock_json = serde_json::to_string(&memory.vector_clock).unwrap_or_default();

        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE memories SET deletion_state = 'soft_deleted', deleted_at = ?1, deleted_by = ?2,
                delete_reason = ?3, delete_expires_at = ?4, updated_at = ?1, vector_clock = ?5 WHERE id = ?6",
            params![
                now.to_rfc3339(),
                deleted_by,
                reason,
                expires_at.to_rfc3339(),
                clock_json,
                id,
            ],
        )?;
        drop(writer);
        self.retrieve(id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    /// Bulk soft-delete every live memory matching `filters`.
    pub fn bulk_delete(&self, filters: &MemoryFilters, deleted_by: Option<String>, reason: Option<String>, ttl_days: u32) -> Result<Vec<Memory>> {
        let candidates = self.search_filtered(filters, None)?;
        candidates
            .into_iter()
            .map(|m| self.delete(&m.id, deleted_by.clone(), reason.clone(), ttl_days))
            .collect()
    }

    /// Restore a soft-deleted memory before its TTL expires.
    pub fn recover(&self, id: &str) -> Result<Memory> {
        let memory = self.retrieve(id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        match &memory.deletion_state {
            DeletionState::SoftDeleted { delete_expires_at, .. } => {
                if Utc::now() > *delete_expires_at {
                    return Err(StorageError::DeletionExpired(id.to_string()));
                }
            }
            DeletionState::Purged { .. } => return Err(StorageError::DeletionExpired(id.to_string())),
            DeletionState::Live => return Ok(memory),
        }

        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE memories SET deletion_state = 'live', deleted_at = NULL, deleted_by = NULL,
                delete_reason = NULL, delete_expires_at = NULL, updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        drop(writer);
        self.retrieve(id)?.ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    pub fn list_deleted(&self) -> Result<Vec<Memory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare("SELECT * FROM memories WHERE deletion_state = 'soft_deleted' ORDER BY deleted_at DESC")?;
        let rows = stmt.query_map([], row_to_memory)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    /// Transition expired soft-deletes to purged. Run at least daily by
    /// the background sweeper.
    pub fn cleanup_expired(&self) -> Result<Vec<String>> {
        let now = Utc::now();
        let expired = self.list_deleted()?.into_iter().filter(|m| {
            matches!(&m.deletion_state, DeletionState::SoftDeleted { delete_expires_at, .. } if now > *delete_expires_at)
        });

        let mut purged = Vec::new();
        for memory in expired {
            self.purge(&memory.id)?;
            purged.push(memory.id);
        }
        Ok(purged)
    }

    /// Hard-delete: remove content and embeddings, leaving a tombstone row
    /// behind so `retrieve` still reports `deletion_state=purged`.
    pub fn purge(&self, id: &str) -> Result<()> {
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE memories SET deletion_state = 'purged', content = '', content_hash = '', updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id],
        )?;
        writer.execute("DELETE FROM memory_embeddings WHERE memory_id = ?1", params![id])?;
        drop(writer);

        #[cfg(feature = "vector-search")]
        {
            let mut index = self.vector_index.lock().expect("vector index lock poisoned");
            let _ = index.remove(id);
        }

        Ok(())
    }

    /// Every memory (any deletion state) attributed to a subject, by
    /// `user_id` or `project_id`.
    fn find_by_subject(&self, subject: &str) -> Result<Vec<Memory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare("SELECT * FROM memories WHERE project_id = ?1 OR user_id = ?1")?;
        let rows: Vec<Memory> = stmt.query_map(params![subject], row_to_memory)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    /// GDPR erasure: immediately purge every memory attributed to `subject`
    /// (by `user_id` or `project_id`), bypassing the soft-delete TTL.
    /// Returns the number of memories purged.
    pub fn gdpr_delete(&self, subject: &str) -> Result<usize> {
        let matches = self.find_by_subject(subject)?;
        if matches.is_empty() {
            return Err(StorageError::NotFound(subject.to_string()));
        }
        for memory in &matches {
            self.purge(&memory.id)?;
        }
        Ok(matches.len())
    }

    /// GDPR export: the full record for every memory attributed to `subject`
    /// (by `user_id` or `project_id`), for a data-subject access request.
    pub fn gdpr_export(&self, subject: &str) -> Result<Vec<Memory>> {
        let matches = self.find_by_subject(subject)?;
        if matches.is_empty() {
            return Err(StorageError::NotFound(subject.to_string()));
        }
        Ok(matches)
    }

    /// Candidate duplicate pairs, by exact content hash, among live memories.
    pub fn detect_duplicates(&self) -> Result<Vec<(Memory, Memory)>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT content_hash FROM memories WHERE deletion_state = 'live' GROUP BY content_hash HAVING COUNT(*) > 1",
        )?;
        let hashes: Vec<String> = stmt.query_map([], |row| row.get(0))?.filter_map(|r| r.ok()).collect();
        drop(stmt);
        drop(reader);

        let mut pairs = Vec::new();
        for hash in hashes {
            let reader = self.reader.lock().expect("reader lock poisoned");
            let mut stmt = reader.prepare(
                "SELECT * FROM memories WHERE content_hash = ?1 AND deletion_state = 'live' ORDER BY created_at ASC",
            )?;
            let matches: Vec<Memory> = stmt.query_map(params![hash], row_to_memory)?.filter_map(|r| r.ok()).collect();
            drop(stmt);
            drop(reader);
            for window in matches.windows(2) {
                pairs.push((window[0].clone(), window[1].clone()));
            }
        }
        Ok(pairs)
    }

    /// Merge a duplicate into its canonical memory: soft-delete the
    /// duplicate, keeping the canonical record live.
    pub fn merge_duplicates(&self, canonical_id: &str, duplicate_id: &str) -> Result<Memory> {
        self.delete(duplicate_id, None, Some(format!("merged into {canonical_id}")), 0)?;
        self.retrieve(canonical_id)?.ok_or_else(|| StorageError::NotFound(canonical_id.to_string()))
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<Memory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT * FROM memories WHERE deletion_state = 'live' ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_memory)?.filter_map(|r| r.ok()).collect();
        Ok(rows)
    }

    /// Filtered scan without ranking, used by `bulk_delete` and as the
    /// lexical fallback's candidate pool.
    pub fn search_filtered(&self, filters: &MemoryFilters, limit: Option<usize>) -> Result<Vec<Memory>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare("SELECT * FROM memories WHERE deletion_state = 'live'")?;
        let all: Vec<Memory> = stmt.query_map([], row_to_memory)?.filter_map(|r| r.ok()).collect();
        drop(stmt);
        drop(reader);

        let mut filtered: Vec<Memory> = all
            .into_iter()
            .filter(|m| filters.category.is_none_or(|c| m.category == c))
            .filter(|m| filters.project_id.as_deref().is_none_or(|p| m.project_id.as_deref() == Some(p)))
            .filter(|m| filters.machine_id.as_deref().is_none_or(|mc| m.machine_id == mc))
            .filter(|m| filters.agent_id.as_deref().is_none_or(|a| m.source_agent_id.as_deref() == Some(a)))
            .filter(|m| filters.since.is_none_or(|s| m.created_at >= s))
            .filter(|m| filters.until.is_none_or(|u| m.created_at <= u))
            .filter(|m| !filters.exclude_confidential || !m.confidentiality_level.is_local_only())
            .filter(|m| filters.tags.is_empty() || filters.tags.iter().any(|t| m.tags.contains(t)))
            .collect();

        if let Some(limit) = limit {
            filtered.truncate(limit);
        }
        Ok(filtered)
    }

    /// Lexical search against the FTS5 index. Query is sanitized by
    /// `search::sanitize_fts5_query` before being passed to SQLite.
    pub fn lexical_search(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let sanitized = crate::search::sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT id, bm25(memories_fts) AS rank FROM memories_fts WHERE memories_fts MATCH ?1 ORDER BY rank LIMIT ?2",
        )?;
        let rows: Vec<(String, f32)> = stmt
            .query_map(params![sanitized, limit as i64], |row| {
                let id: String = row.get(0)?;
                let rank: f64 = row.get(1)?;
                // bm25() is lower-is-better; invert so higher is better, matching cosine scores.
                Ok((id, (-rank) as f32))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    #[cfg(all(feature = "embeddings", feature = "vector-search"))]
    fn semantic_search_raw(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let embedding = {
            let mut cache = self.query_embedding_cache.lock().expect("query embedding cache lock poisoned");
            if let Some(cached) = cache.get(query) {
                cached.clone()
            } else {
                let embedding = self
                    .embedding_service
                    .embed(query)
                    .map_err(|e| StorageError::Init(format!("embedding failed: {e}")))?;
                cache.put(query.to_string(), embedding.clone());
                embedding
            }
        };
        let index = self.vector_index.lock().expect("vector index lock poisoned");
        index
            .search(&embedding.vector, limit)
            .map_err(|e| StorageError::Init(format!("vector search failed: {e}")))
    }

    /// Hybrid search: semantic ANN + lexical BM25-equivalent, fused by
    /// `search::linear_combination` with the configured `alpha`, then
    /// post-filtered by confidentiality visibility and deletion state.
    pub fn search(&self, query: &str, mode: crate::memory::SearchMode, limit: usize, alpha: f32, reader_machine_id: &str) -> Result<Vec<SearchHit>> {
        let fetch_k = (limit * 4).max(20);

        let lexical = self.lexical_search(query, fetch_k)?;

        #[cfg(all(feature = "embeddings", feature = "vector-search"))]
        let semantic = if matches!(mode, crate::memory::SearchMode::Semantic | crate::memory::SearchMode::Hybrid) {
            self.semantic_search_raw(query, fetch_k).unwrap_or_default()
        } else {
            Vec::new()
        };
        #[cfg(not(all(feature = "embeddings", feature = "vector-search")))]
        let semantic: Vec<(String, f32)> = Vec::new();

        let fused = match mode {
            crate::memory::SearchMode::Lexical => lexical.clone(),
            crate::memory::SearchMode::Semantic => semantic.clone(),
            crate::memory::SearchMode::Hybrid => {
                crate::search::linear_combination(&lexical, &semantic, 1.0 - alpha, alpha)
            }
        };

        let lexical_ids: std::collections::HashSet<&str> = lexical.iter().map(|(id, _)| id.as_str()).collect();
        let semantic_ids: std::collections::HashSet<&str> = semantic.iter().map(|(id, _)| id.as_str()).collect();

        let mut hits = Vec::new();
        for (id, score) in fused.into_iter().take(fetch_k) {
            let Some(memory) = self.retrieve(&id)? else { continue };
            if !memory.deletion_state.is_live() || !memory.visible_to(reader_machine_id) {
                continue;
            }
            let match_type = match (lexical_ids.contains(id.as_str()), semantic_ids.contains(id.as_str())) {
                (true, true) => crate::memory::MatchType::Both,
                (true, false) => crate::memory::MatchType::Lexical,
                _ => crate::memory::MatchType::Semantic,
            };
            let snippet = memory.content.chars().take(200).collect();
            hits.push(SearchHit { id, score, snippet, match_type });
            if hits.len() >= limit {
                break;
            }
        }
        Ok(hits)
    }

    pub fn stats(&self) -> Result<MemoryStats> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let total_live: i64 = reader.query_row("SELECT COUNT(*) FROM memories WHERE deletion_state = 'live'", [], |r| r.get(0))?;
        let total_soft_deleted: i64 = reader.query_row("SELECT COUNT(*) FROM memories WHERE deletion_state = 'soft_deleted'", [], |r| r.get(0))?;
        let total_purged: i64 = reader.query_row("SELECT COUNT(*) FROM memories WHERE deletion_state = 'purged'", [], |r| r.get(0))?;
        let v1_compressible: i64 = reader.query_row(
            "SELECT COUNT(*) FROM memories WHERE deletion_state = 'live' AND format_version = 'v1'",
            [],
            |r| r.get(0),
        )?;

        let mut by_category_stmt = reader.prepare(
            "SELECT category, COUNT(*) FROM memories WHERE deletion_state = 'live' GROUP BY category",
        )?;
        let by_category = by_category_stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(by_category_stmt);

        let mut by_conf_stmt = reader.prepare(
            "SELECT confidentiality_level, COUNT(*) FROM memories WHERE deletion_state = 'live' GROUP BY confidentiality_level",
        )?;
        let by_confidentiality = by_conf_stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        drop(by_conf_stmt);

        let oldest_memory: Option<String> = reader
            .query_row("SELECT MIN(created_at) FROM memories WHERE deletion_state = 'live'", [], |r| r.get(0))
            .optional()?
            .flatten();
        let newest_memory: Option<String> = reader
            .query_row("SELECT MAX(created_at) FROM memories WHERE deletion_state = 'live'", [], |r| r.get(0))
            .optional()?
            .flatten();

        Ok(MemoryStats {
            total_live,
            total_soft_deleted,
            total_purged,
            by_category,
            by_confidentiality,
            v1_compressible,
            average_confidence: 0.0,
            oldest_memory: oldest_memory.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
            newest_memory: newest_memory.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
        })
    }

    // ========================================================================
    // AUDIT LOG (AL)
    // ========================================================================

    pub fn record_audit(
        &self,
        actor_agent_id: Option<String>,
        operation: &str,
        target_kind: AuditTargetKind,
        target_id: &str,
        outcome: AuditOutcome,
        reason: Option<String>,
    ) -> Result<AuditRecord> {
        let now = Utc::now();
        let target_kind_str = match target_kind {
            AuditTargetKind::Memory => "memory",
            AuditTargetKind::Agent => "agent",
            AuditTargetKind::Vault => "vault",
        };
        let outcome_str = match outcome {
            AuditOutcome::Success => "success",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Failed => "failed",
        };

        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO audit_log (actor_agent_id, actor_machine_id, operation, target_kind, target_id, outcome, occurred_at, reason)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                actor_agent_id,
                self.machine_id,
                operation,
                target_kind_str,
                target_id,
                outcome_str,
                now.to_rfc3339(),
                reason,
            ],
        )?;
        let seq = writer.last_insert_rowid();

        Ok(AuditRecord {
            seq,
            actor_agent_id: None,
            actor_machine_id: self.machine_id.clone(),
            operation: operation.to_string(),
            target_kind,
            target_id: target_id.to_string(),
            outcome,
            occurred_at: now,
            reason: None,
        })
    }

    // ========================================================================
    // CONFIDENCE ENGINE (CE) PERSISTENCE
    // ========================================================================

    pub fn add_verification(
        &self,
        memory_id: &str,
        verifier_agent_id: &str,
        outcome: VerificationOutcome,
        notes: Option<String>,
    ) -> Result<Verification> {
        let now = Utc::now();
        let outcome_str = match outcome {
            VerificationOutcome::Confirmed => "confirmed",
            VerificationOutcome::StillValid => "still_valid",
            VerificationOutcome::Outdated => "outdated",
        };

        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO verifications (memory_id, verifier_agent_id, outcome, notes, verified_at)
             VALUES (?1,?2,?3,?4,?5)",
            params![memory_id, verifier_agent_id, outcome_str, notes, now.to_rfc3339()],
        )?;
        drop(writer);

        if outcome == VerificationOutcome::Outdated {
            self.delete(
                memory_id,
                Some(verifier_agent_id.to_string()),
                Some("flagged outdated by verification".to_string()),
                Self::DEFAULT_SOFT_DELETE_TTL_DAYS,
            )?;
            self.open_contradiction_against_competing(memory_id)?;
        }

        Ok(Verification { verifier_agent_id: verifier_agent_id.to_string(), outcome, notes, verified_at: now })
    }

    /// Default soft-delete TTL (days) for the lifecycle side effect of an
    /// `outdated` verification, matching `config::SoftDeleteConfig`'s default.
    const DEFAULT_SOFT_DELETE_TTL_DAYS: u32 = 30;

    /// When a memory is flagged outdated, open a contradiction slot against
    /// the nearest same-category peer that actually disagrees with it, if
    /// one exists - the same discriminator check `store` runs against new
    /// writes, run here against the memory that just lost freshness.
    fn open_contradiction_against_competing(&self, memory_id: &str) -> Result<()> {
        let memory = match self.retrieve(memory_id)? {
            Some(m) => m,
            None => return Ok(()),
        };

        let filters = MemoryFilters { category: Some(memory.category), ..Default::default() };
        let peers = self.search_filtered(&filters, Some(10))?;

        let source_credibility = match &memory.source_agent_id {
            Some(agent_id) => self.get_agent_credibility(agent_id, Some(memory.category))?,
            None => 0.5,
        };
        let input_memory = DiscriminatorInput {
            memory_id: &memory.id,
            content: &memory.content,
            created_at: memory.created_at,
            source_credibility,
        };

        for peer in peers.iter().filter(|p| p.id != memory.id) {
            let peer_credibility = match &peer.source_agent_id {
                Some(agent_id) => self.get_agent_credibility(agent_id, Some(peer.category))?,
                None => 0.5,
            };
            let input_peer = DiscriminatorInput {
                memory_id: &peer.id,
                content: &peer.content,
                created_at: peer.created_at,
                source_credibility: peer_credibility,
            };
            if let Some((kind, discriminator)) = detect_discriminator_conflict(&input_memory, &input_peer) {
                self.open_contradiction(&memory.id, &peer.id, kind, &discriminator)?;
                break;
            }
        }
        Ok(())
    }

    fn verifications_for(&self, memory_id: &str) -> Result<Vec<Verification>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT verifier_agent_id, outcome, notes, verified_at FROM verifications WHERE memory_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![memory_id], |row| {
                let outcome_str: String = row.get(1)?;
                let verified_at: String = row.get(3)?;
                Ok(Verification {
                    verifier_agent_id: row.get(0)?,
                    outcome: match outcome_str.as_str() {
                        "confirmed" => VerificationOutcome::Confirmed,
                        "outdated" => VerificationOutcome::Outdated,
                        _ => VerificationOutcome::StillValid,
                    },
                    notes: row.get(2)?,
                    verified_at: parse_rfc3339(&verified_at),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Upserts on `(memory_id, voter_agent_id)`: an agent may change its vote
    /// but only ever has one vote counted per memory.
    pub fn add_vote(&self, memory_id: &str, voter_agent_id: &str, voter_machine_id: &str, choice: VoteChoice) -> Result<Vote> {
        let now = Utc::now();
        let choice_str = match choice {
            VoteChoice::Agree => "agree",
            VoteChoice::Disagree => "disagree",
        };

        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO votes (memory_id, voter_agent_id, voter_machine_id, choice, cast_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(memory_id, voter_agent_id)
             DO UPDATE SET voter_machine_id = excluded.voter_machine_id, choice = excluded.choice, cast_at = excluded.cast_at",
            params![memory_id, voter_agent_id, voter_machine_id, choice_str, now.to_rfc3339()],
        )?;

        Ok(Vote { voter_agent_id: voter_agent_id.to_string(), voter_machine_id: voter_machine_id.to_string(), choice, cast_at: now })
    }

    fn votes_for(&self, memory_id: &str) -> Result<Vec<Vote>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT voter_agent_id, voter_machine_id, choice, cast_at FROM votes WHERE memory_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![memory_id], |row| {
                let choice_str: String = row.get(2)?;
                let cast_at: String = row.get(3)?;
                Ok(Vote {
                    voter_agent_id: row.get(0)?,
                    voter_machine_id: row.get(1)?,
                    choice: if choice_str == "agree" { VoteChoice::Agree } else { VoteChoice::Disagree },
                    cast_at: parse_rfc3339(&cast_at),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn record_usage_outcome(&self, memory_id: &str, succeeded: bool) -> Result<()> {
        let now = Utc::now();
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO usage_outcomes (memory_id, succeeded, recorded_at) VALUES (?1,?2,?3)",
            params![memory_id, succeeded as i64, now.to_rfc3339()],
        )?;
        Ok(())
    }

    fn usage_outcomes_for(&self, memory_id: &str) -> Result<Vec<UsageOutcome>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let mut stmt = reader.prepare(
            "SELECT succeeded, recorded_at FROM usage_outcomes WHERE memory_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![memory_id], |row| {
                let recorded_at: String = row.get(1)?;
                Ok(UsageOutcome { succeeded: row.get::<_, i64>(0)? != 0, recorded_at: parse_rfc3339(&recorded_at) })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Stand-in for "no category" in the `agent_credibility` PK: SQLite's
    /// unique index treats `NULL` as distinct from every other `NULL`, so a
    /// real `NULL` would let global-credibility upserts accumulate duplicate
    /// rows instead of conflicting.
    const GLOBAL_CREDIBILITY_CATEGORY: &'static str = "_global";

    /// Per-category credibility, falling back to the agent's global row,
    /// then to the novice default of 0.5.
    pub fn get_agent_credibility(&self, agent_id: &str, category: Option<Category>) -> Result<f64> {
        let reader = self.reader.lock().expect("reader lock poisoned");

        if let Some(cat) = category {
            let found: Option<f64> = reader
                .query_row(
                    "SELECT credibility FROM agent_credibility WHERE agent_id = ?1 AND category = ?2",
                    params![agent_id, cat.as_str()],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(v) = found {
                return Ok(v);
            }
        }

        let global: Option<f64> = reader
            .query_row(
                "SELECT credibility FROM agent_credibility WHERE agent_id = ?1 AND category = ?2",
                params![agent_id, Self::GLOBAL_CREDIBILITY_CATEGORY],
                |r| r.get(0),
            )
            .optional()?;
        Ok(global.unwrap_or(0.5))
    }

    pub fn set_agent_credibility(&self, agent_id: &str, category: Option<Category>, credibility: f64) -> Result<()> {
        let category_str = category.map(|c| c.as_str()).unwrap_or(Self::GLOBAL_CREDIBILITY_CATEGORY);
        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO agent_credibility (agent_id, category, credibility) VALUES (?1,?2,?3)
             ON CONFLICT(agent_id, category)
             DO UPDATE SET credibility = excluded.credibility",
            params![agent_id, category_str, credibility.clamp(0.0, 1.0)],
        )?;
        Ok(())
    }

    /// Verification level derived from who has verified this memory and how:
    /// the reserved `"system"` verifier agent id marks automated checks and
    /// wins outright; otherwise the level climbs with the number of distinct
    /// verifying agents, and a lone verification by the memory's own source
    /// agent only counts as self-verification.
    fn verification_level(source_agent_id: Option<&str>, verifications: &[Verification]) -> VerificationKind {
        if verifications.iter().any(|v| v.verifier_agent_id == "system") {
            return VerificationKind::SystemVerified;
        }
        let distinct: std::collections::HashSet<&str> =
            verifications.iter().map(|v| v.verifier_agent_id.as_str()).collect();
        match distinct.len() {
            0 => VerificationKind::Unverified,
            1 => {
                let only = verifications[0].verifier_agent_id.as_str();
                if Some(only) == source_agent_id {
                    VerificationKind::SelfVerified
                } else {
                    VerificationKind::Peer
                }
            }
            2..=4 => VerificationKind::Multi,
            _ => VerificationKind::Consensus,
        }
    }

    /// Assembles every signal `confidence::score` needs for one memory.
    pub fn scoring_inputs(&self, memory_id: &str) -> Result<ScoringInputs> {
        let memory = self.retrieve(memory_id)?.ok_or_else(|| StorageError::NotFound(memory_id.to_string()))?;

        let verifications = self.verifications_for(memory_id)?;
        let last_verified_at = verifications.iter().map(|v| v.verified_at).max();
        let verification_level = Self::verification_level(memory.source_agent_id.as_deref(), &verifications);

        let source_credibility = match &memory.source_agent_id {
            Some(agent_id) => self.get_agent_credibility(agent_id, Some(memory.category))?,
            None => 0.5,
        };

        let reader = self.reader.lock().expect("reader lock poisoned");
        let open_contradictions: i64 = reader.query_row(
            "SELECT COUNT(*) FROM contradictions WHERE (memory_a = ?1 OR memory_b = ?1) AND status = 'open'",
            params![memory_id],
            |r| r.get(0),
        )?;
        drop(reader);
        let open_contradiction_severity = if open_contradictions > 0 { 0.6 } else { 0.0 };

        Ok(ScoringInputs {
            category: memory.category,
            created_at: memory.created_at,
            last_verified_at,
            source_credibility,
            verification_level,
            votes: self.votes_for(memory_id)?,
            open_contradiction_severity,
            usage_outcomes: self.usage_outcomes_for(memory_id)?,
            memory_project_id: memory.project_id,
            memory_machine_id: memory.machine_id,
        })
    }

    // ========================================================================
    // CONTRADICTIONS
    // ========================================================================

    fn row_to_contradiction(row: &rusqlite::Row) -> rusqlite::Result<Contradiction> {
        let kind_str: String = row.get("kind")?;
        let status_str: String = row.get("status")?;
        let detected_at: String = row.get("detected_at")?;
        let strategy_str: Option<String> = row.get("resolved_by_strategy")?;

        Ok(Contradiction {
            id: row.get("id")?,
            memory_a: row.get("memory_a")?,
            memory_b: row.get("memory_b")?,
            kind: if kind_str == "mutual_exclusion" { ContradictionKind::MutualExclusion } else { ContradictionKind::Factual },
            discriminator: row.get("discriminator")?,
            status: match status_str.as_str() {
                "resolved" => ContradictionStatus::Resolved,
                "requires_review" => ContradictionStatus::RequiresReview,
                _ => ContradictionStatus::Open,
            },
            detected_at: parse_rfc3339(&detected_at),
            resolved_by_strategy: strategy_str.map(|s| parse_strategy(&s)),
            winner: row.get("winner")?,
        })
    }

    pub fn open_contradiction(&self, memory_a: &str, memory_b: &str, kind: ContradictionKind, discriminator: &str) -> Result<Contradiction> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let kind_str = match kind {
            ContradictionKind::Factual => "factual",
            ContradictionKind::MutualExclusion => "mutual_exclusion",
        };

        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "INSERT INTO contradictions (id, memory_a, memory_b, kind, discriminator, status, detected_at)
             VALUES (?1,?2,?3,?4,?5,'open',?6)",
            params![id, memory_a, memory_b, kind_str, discriminator, now.to_rfc3339()],
        )?;

        Ok(Contradiction {
            id,
            memory_a: memory_a.to_string(),
            memory_b: memory_b.to_string(),
            kind,
            discriminator: discriminator.to_string(),
            status: ContradictionStatus::Open,
            detected_at: now,
            resolved_by_strategy: None,
            winner: None,
        })
    }

    pub fn list_contradictions(&self, status: Option<ContradictionStatus>) -> Result<Vec<Contradiction>> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let rows = match status {
            Some(s) => {
                let status_str = contradiction_status_str(s);
                let mut stmt = reader.prepare(
                    "SELECT id, memory_a, memory_b, kind, discriminator, status, detected_at, resolved_by_strategy, winner
                     FROM contradictions WHERE status = ?1 ORDER BY detected_at DESC",
                )?;
                stmt.query_map(params![status_str], Self::row_to_contradiction)?.filter_map(|r| r.ok()).collect()
            }
            None => {
                let mut stmt = reader.prepare(
                    "SELECT id, memory_a, memory_b, kind, discriminator, status, detected_at, resolved_by_strategy, winner
                     FROM contradictions ORDER BY detected_at DESC",
                )?;
                stmt.query_map([], Self::row_to_contradiction)?.filter_map(|r| r.ok()).collect()
            }
        };
        Ok(rows)
    }

    /// Resolves an open contradiction. When `strategy` is `None`, tries the
    /// default ordered chain (`temporal` then `source_trust`); when the
    /// caller names a strategy directly, `temporal`/`source_trust` run the
    /// matching algorithm and anything else (`consensus`/`system`/`manual`)
    /// has no automatic winner here and is left for a human or a future
    /// feature to settle, so the contradiction moves to `requires_review`.
    pub fn resolve_contradiction(&self, id: &str, strategy: Option<ContradictionStrategy>) -> Result<Contradiction> {
        let reader = self.reader.lock().expect("reader lock poisoned");
        let contradiction: Contradiction = reader
            .query_row(
                "SELECT id, memory_a, memory_b, kind, discriminator, status, detected_at, resolved_by_strategy, winner
                 FROM contradictions WHERE id = ?1",
                params![id],
                Self::row_to_contradiction,
            )
            .optional()?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        drop(reader);

        let memory_a = self.retrieve(&contradiction.memory_a)?.ok_or_else(|| StorageError::NotFound(contradiction.memory_a.clone()))?;
        let memory_b = self.retrieve(&contradiction.memory_b)?.ok_or_else(|| StorageError::NotFound(contradiction.memory_b.clone()))?;

        let credibility_a = match &memory_a.source_agent_id {
            Some(agent_id) => self.get_agent_credibility(agent_id, Some(memory_a.category))?,
            None => 0.5,
        };
        let credibility_b = match &memory_b.source_agent_id {
            Some(agent_id) => self.get_agent_credibility(agent_id, Some(memory_b.category))?,
            None => 0.5,
        };

        let input_a = DiscriminatorInput {
            memory_id: &memory_a.id,
            content: &memory_a.content,
            created_at: memory_a.created_at,
            source_credibility: credibility_a,
        };
        let input_b = DiscriminatorInput {
            memory_id: &memory_b.id,
            content: &memory_b.content,
            created_at: memory_b.created_at,
            source_credibility: credibility_b,
        };

        let (status, resolved_by_strategy, winner) = match strategy {
            Some(ContradictionStrategy::Temporal) => resolve_with(ContradictionStrategy::Temporal, &input_a, &input_b),
            Some(ContradictionStrategy::SourceTrust) => resolve_with(ContradictionStrategy::SourceTrust, &input_a, &input_b),
            Some(other) => (ContradictionStatus::RequiresReview, Some(other), None),
            None => match resolve_default(&input_a, &input_b) {
                Some((strategy, winner)) => (ContradictionStatus::Resolved, Some(strategy), Some(winner.to_string())),
                None => (ContradictionStatus::RequiresReview, None, None),
            },
        };

        let status_str = contradiction_status_str(status);
        let strategy_str = resolved_by_strategy.map(strategy_str);

        let writer = self.writer.lock().expect("writer lock poisoned");
        writer.execute(
            "UPDATE contradictions SET status = ?1, resolved_by_strategy = ?2, winner = ?3 WHERE id = ?4",
            params![status_str, strategy_str, winner, id],
        )?;

        Ok(Contradiction { status, resolved_by_strategy, winner, ..contradiction })
    }
}

fn contradiction_status_str(status: ContradictionStatus) -> &'static str {
    match status {
        ContradictionStatus::Open => "open",
        ContradictionStatus::Resolved => "resolved",
        ContradictionStatus::RequiresReview => "requires_review",
    }
}

fn parse_strategy(s: &str) -> ContradictionStrategy {
    match s {
        "source_trust" => ContradictionStrategy::SourceTrust,
        "consensus" => ContradictionStrategy::Consensus,
        "system" => ContradictionStrategy::System,
        "manual" => ContradictionStrategy::Manual,
        _ => ContradictionStrategy::Temporal,
    }
}

fn strategy_str(strategy: ContradictionStrategy) -> &'static str {
    match strategy {
        ContradictionStrategy::Temporal => "temporal",
        ContradictionStrategy::SourceTrust => "source_trust",
        ContradictionStrategy::Consensus => "consensus",
        ContradictionStrategy::System => "system",
        ContradictionStrategy::Manual => "manual",
    }
}

fn resolve_with(
    strategy: ContradictionStrategy,
    a: &DiscriminatorInput,
    b: &DiscriminatorInput,
) -> (ContradictionStatus, Option<ContradictionStrategy>, Option<String>) {
    let winner = match strategy {
        ContradictionStrategy::Temporal => crate::confidence::resolve_temporal(a, b),
        ContradictionStrategy::SourceTrust => crate::confidence::resolve_source_trust(a, b),
        _ => None,
    };
    match winner {
        Some(id) => (ContradictionStatus::Resolved, Some(strategy), Some(id.to_string())),
        None => (ContradictionStatus::RequiresReview, Some(strategy), None),
    }
}

fn row_to_memory(row: &rusqlite::Row) -> rusqlite::Result<Memory> {
    let tags_json: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

    let clock_json: String = row.get("vector_clock")?;
    let vector_clock: VectorClock = serde_json::from_str(&clock_json).unwrap_or_default();

    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let deletion_state_str: String = row.get("deletion_state")?;
    let deletion_state = match deletion_state_str.as_str() {
        "soft_deleted" => {
            let deleted_at: String = row.get("deleted_at")?;
            let delete_expires_at: String = row.get("delete_expires_at")?;
            DeletionState::SoftDeleted {
                deleted_at: parse_rfc3339(&deleted_at),
                deleted_by: row.get("deleted_by")?,
                delete_reason: row.get("delete_reason")?,
                delete_expires_at: parse_rfc3339(&delete_expires_at),
            }
        }
        "purged" => {
            let deleted_at: String = row.get("deleted_at")?;
            DeletionState::Purged {
                deleted_at: parse_rfc3339(&deleted_at),
                deleted_by: row.get("deleted_by")?,
                delete_reason: row.get("delete_reason")?,
            }
        }
        _ => DeletionState::Live,
    };

    let category_label: String = row.get("category_label")?;
    let confidentiality_str: String = row.get("confidentiality_level")?;
    let format_version_str: String = row.get("format_version")?;

    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        content_hash: row.get("content_hash")?,
        category: Category::parse(&category_label),
        category_label,
        tags,
        context: row.get("context")?,
        project_id: row.get("project_id")?,
        user_id: row.get("user_id")?,
        machine_id: row.get("machine_id")?,
        source_agent_id: row.get("source_agent_id")?,
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
        vector_clock,
        confidentiality_level: ConfidentialityLevel::parse(&confidentiality_str).unwrap_or_default(),
        format_version: if format_version_str == "v2" { FormatVersion::V2 } else { FormatVersion::V1 },
        deletion_state,
        has_embedding: row.get::<_, i64>("has_embedding")? != 0,
    })
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_storage() -> Storage {
        Storage::new(Some(PathBuf::from(":memory:")), "test-machine".to_string()).unwrap()
    }

    #[test]
    fn store_and_retrieve_round_trips_content() {
        let storage = test_storage();
        let memory = storage
            .store(
                "Redis cluster has 6 nodes on ports 6379-6384".to_string(),
                "infrastructure".to_string(),
                vec!["redis".to_string(), "cluster".to_string()],
                None,
                None,
                None,
                None,
                ConfidentialityLevel::Normal,
                true,
            )
            .unwrap();

        let fetched = storage.retrieve(&memory.id).unwrap().unwrap();
        assert_eq!(fetched.content, "Redis cluster has 6 nodes on ports 6379-6384");
        assert_eq!(fetched.category, Category::Infrastructure);
    }

    #[test]
    fn dedupe_returns_existing_memory_on_exact_match() {
        let storage = test_storage();
        let first = storage
            .store("same content".to_string(), "global".to_string(), vec![], None, None, None, None, ConfidentialityLevel::Normal, true)
            .unwrap();
        let second = storage
            .store("same content".to_string(), "global".to_string(), vec![], None, None, None, None, ConfidentialityLevel::Normal, true)
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn confidentiality_ratchet_rejects_downgrade() {
        let storage = test_storage();
        let memory = storage
            .store("x".to_string(), "global".to_string(), vec![], None, None, None, None, ConfidentialityLevel::Confidential, false)
            .unwrap();
        let result = storage.update_confidentiality(&memory.id, ConfidentialityLevel::Normal);
        assert!(result.is_err());
        let upgraded = storage.update_confidentiality(&memory.id, ConfidentialityLevel::Pii);
        assert!(upgraded.is_ok());
    }

    #[test]
    fn soft_delete_then_recover_restores_content() {
        let storage = test_storage();
        let memory = storage
            .store("recoverable".to_string(), "global".to_string(), vec![], None, None, None, None, ConfidentialityLevel::Normal, false)
            .unwrap();
        storage.delete(&memory.id, None, None, 30).unwrap();
        let deleted = storage.retrieve(&memory.id).unwrap().unwrap();
        assert!(deleted.deletion_state.is_soft_deleted());

        let recovered = storage.recover(&memory.id).unwrap();
        assert_eq!(recovered.content, "recoverable");
        assert!(recovered.deletion_state.is_live());
    }

    #[test]
    fn recover_after_ttl_expiry_fails() {
        let storage = test_storage();
        let memory = storage
            .store("expiring".to_string(), "global".to_string(), vec![], None, None, None, None, ConfidentialityLevel::Normal, false)
            .unwrap();
        storage.delete(&memory.id, None, None, 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let result = storage.recover(&memory.id);
        assert!(result.is_err());
    }

    #[test]
    fn lexical_search_finds_stored_content() {
        let storage = test_storage();
        storage
            .store(
                "the deployment pipeline uses blue-green releases".to_string(),
                "deployments".to_string(),
                vec![],
                None,
                None,
                None,
                None,
                ConfidentialityLevel::Normal,
                false,
            )
            .unwrap();
        let hits = storage.lexical_search("blue-green deployment", 10).unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn stats_reflects_live_and_deleted_counts() {
        let storage = test_storage();
        let memory = storage
            .store("a".to_string(), "global".to_string(), vec![], None, None, None, None, ConfidentialityLevel::Normal, false)
            .unwrap();
        storage
            .store("b".to_string(), "global".to_string(), vec![], None, None, None, None, ConfidentialityLevel::Normal, false)
            .unwrap();
        storage.delete(&memory.id, None, None, 30).unwrap();

        let stats = storage.stats().unwrap();
        assert_eq!(stats.total_live, 1);
        assert_eq!(stats.total_soft_deleted, 1);
    }
}
