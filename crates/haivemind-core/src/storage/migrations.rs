//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: memories, FTS5 index, audit log",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Agent registry: agents and tasks",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Confidence engine: verifications, votes, usage outcomes, contradictions",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "Sync journal for outbound event acknowledgment tracking",
        up: MIGRATION_V4_UP,
    },
    Migration {
        version: 5,
        description: "Performance: page_size 8192",
        up: MIGRATION_V5_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: memories + FTS5 index + schema_version + audit_log
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    category TEXT NOT NULL,
    category_label TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    context TEXT,
    project_id TEXT,
    user_id TEXT,
    machine_id TEXT NOT NULL,
    source_agent_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    vector_clock TEXT NOT NULL DEFAULT '{}',
    confidentiality_level TEXT NOT NULL DEFAULT 'normal',
    format_version TEXT NOT NULL DEFAULT 'v1',
    deletion_state TEXT NOT NULL DEFAULT 'live',
    deleted_at TEXT,
    deleted_by TEXT,
    delete_reason TEXT,
    delete_expires_at TEXT,
    has_embedding INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_memories_content_hash ON memories(content_hash);
CREATE INDEX IF NOT EXISTS idx_memories_category ON memories(category);
CREATE INDEX IF NOT EXISTS idx_memories_project ON memories(project_id);
CREATE INDEX IF NOT EXISTS idx_memories_machine ON memories(machine_id);
CREATE INDEX IF NOT EXISTS idx_memories_deletion_state ON memories(deletion_state);
CREATE INDEX IF NOT EXISTS idx_memories_delete_expires ON memories(delete_expires_at);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at);

CREATE TABLE IF NOT EXISTS memory_embeddings (
    memory_id TEXT PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    model TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    id UNINDEXED,
    content,
    tags,
    tokenize = 'porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS memories_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, id, content, tags) VALUES (NEW.rowid, NEW.id, NEW.content, NEW.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags) VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.tags);
END;

CREATE TRIGGER IF NOT EXISTS memories_au AFTER UPDATE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, id, content, tags) VALUES ('delete', OLD.rowid, OLD.id, OLD.content, OLD.tags);
    INSERT INTO memories_fts(rowid, id, content, tags) VALUES (NEW.rowid, NEW.id, NEW.content, NEW.tags);
END;

CREATE TABLE IF NOT EXISTS audit_log (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    actor_agent_id TEXT,
    actor_machine_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    target_kind TEXT NOT NULL,
    target_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    occurred_at TEXT NOT NULL,
    reason TEXT
);

CREATE INDEX IF NOT EXISTS idx_audit_occurred ON audit_log(occurred_at);

UPDATE schema_version SET version = 1, applied_at = datetime('now');
INSERT INTO schema_version (version) SELECT 1 WHERE NOT EXISTS (SELECT 1 FROM schema_version);
"#;

/// V2: agents + tasks
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    agent_id TEXT PRIMARY KEY,
    role TEXT NOT NULL,
    capabilities TEXT NOT NULL DEFAULT '[]',
    description TEXT,
    machine_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    last_heartbeat_at TEXT NOT NULL,
    registered_at TEXT NOT NULL,
    active_task_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    requester_agent_id TEXT,
    requester_machine_id TEXT NOT NULL,
    required_capabilities TEXT NOT NULL DEFAULT '[]',
    category TEXT NOT NULL,
    description TEXT NOT NULL,
    local_only INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    assigned_agent_id TEXT,
    created_at TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: confidence engine persistence
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS verifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    verifier_agent_id TEXT NOT NULL,
    outcome TEXT NOT NULL,
    notes TEXT,
    verified_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_verifications_memory ON verifications(memory_id);

CREATE TABLE IF NOT EXISTS votes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    voter_agent_id TEXT NOT NULL,
    voter_machine_id TEXT NOT NULL,
    choice TEXT NOT NULL,
    cast_at TEXT NOT NULL,
    UNIQUE(memory_id, voter_agent_id)
);

CREATE TABLE IF NOT EXISTS usage_outcomes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    succeeded INTEGER NOT NULL,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_usage_memory ON usage_outcomes(memory_id);

CREATE TABLE IF NOT EXISTS agent_credibility (
    agent_id TEXT NOT NULL,
    category TEXT,
    credibility REAL NOT NULL DEFAULT 0.5,
    PRIMARY KEY (agent_id, category)
);

CREATE TABLE IF NOT EXISTS contradictions (
    id TEXT PRIMARY KEY,
    memory_a TEXT NOT NULL,
    memory_b TEXT NOT NULL,
    kind TEXT NOT NULL,
    discriminator TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    detected_at TEXT NOT NULL,
    resolved_by_strategy TEXT,
    winner TEXT
);

CREATE INDEX IF NOT EXISTS idx_contradictions_status ON contradictions(status);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// V4: sync journal, per-peer acknowledgment state
const MIGRATION_V4_UP: &str = r#"
CREATE TABLE IF NOT EXISTS sync_journal (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_id TEXT NOT NULL,
    vector_clock_snapshot TEXT NOT NULL,
    event_kind TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(memory_id, vector_clock_snapshot, event_kind)
);

CREATE TABLE IF NOT EXISTS sync_peer_ack (
    journal_id INTEGER NOT NULL REFERENCES sync_journal(id) ON DELETE CASCADE,
    peer_machine_id TEXT NOT NULL,
    acked_at TEXT,
    PRIMARY KEY (journal_id, peer_machine_id)
);

UPDATE schema_version SET version = 4, applied_at = datetime('now');
"#;

/// V5: Performance - page_size 8192 (VACUUM runs outside execute_batch, see apply_migrations)
const MIGRATION_V5_UP: &str = r#"
UPDATE schema_version SET version = 5, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );

            conn.execute_batch(migration.up)?;

            // V5: page_size upgrade requires VACUUM, which can't run inside execute_batch.
            if migration.version == 5 {
                conn.pragma_update(None, "page_size", 8192)?;
                conn.execute_batch("VACUUM;")?;
                tracing::info!("Database page_size upgraded to 8192 via VACUUM");
            }

            applied += 1;
        }
    }

    Ok(applied)
}
