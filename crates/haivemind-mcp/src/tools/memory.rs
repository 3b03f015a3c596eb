//! Memory Engine tools: store, retrieve, update, update_confidentiality,
//! search, recent, stats, delete, bulk_delete, recover, list_deleted,
//! detect_duplicates, merge_duplicates, cleanup_expired, gdpr_delete,
//! gdpr_export.

use std::sync::Arc;

use haivemind_core::{
    detect_discriminator_conflict, Category, ConfidentialityLevel, DiscriminatorInput, HaiveError,
    MemoryFilters, SearchMode, Storage,
};
use serde_json::Value;

use super::args::{opt_bool, opt_f64, opt_str, opt_tags, opt_u32, opt_usize, require_str};

type ToolResult = Result<Value, HaiveError>;

pub fn store_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {"type": "string", "description": "Memory content"},
            "category": {"type": "string", "description": "Category label, e.g. infrastructure, security, runbooks, agent"},
            "tags": {"type": "array", "items": {"type": "string"}},
            "context": {"type": "string"},
            "projectId": {"type": "string"},
            "userId": {"type": "string"},
            "sourceAgentId": {"type": "string"},
            "confidentialityLevel": {"type": "string", "enum": ["normal", "internal", "confidential", "pii"]},
            "dedupe": {"type": "boolean", "default": true}
        },
        "required": ["content", "category"]
    })
}

pub async fn store(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let content = require_str(&args, "content")?;
    let category = require_str(&args, "category")?;
    let confidentiality = opt_str(&args, "confidentialityLevel")
        .and_then(|s| ConfidentialityLevel::parse(&s))
        .unwrap_or_default();

    let memory = storage.store(
        content,
        category,
        opt_tags(&args),
        opt_str(&args, "context"),
        opt_str(&args, "projectId"),
        opt_str(&args, "userId"),
        opt_str(&args, "sourceAgentId"),
        confidentiality,
        opt_bool(&args, "dedupe", true),
    )?;

    detect_contradictions_against_peers(storage, &memory)?;

    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

/// Cheap, write-time contradiction scan: a full semantic-similarity gate
/// needs a cosine comparison this crate's public `Storage` API doesn't
/// expose outside `search`, so this checks the new memory's discriminator
/// against the most recent handful of other live memories in the same
/// category instead of a true nearest-neighbor set.
fn detect_contradictions_against_peers(storage: &Arc<Storage>, memory: &haivemind_core::Memory) -> Result<(), HaiveError> {
    let filters = MemoryFilters { category: Some(memory.category), ..Default::default() };
    let peers = storage.search_filtered(&filters, Some(10))?;

    let input_new = DiscriminatorInput {
        memory_id: &memory.id,
        content: &memory.content,
        created_at: memory.created_at,
        source_credibility: 0.5,
    };

    for peer in peers.iter().filter(|p| p.id != memory.id) {
        let input_peer = DiscriminatorInput {
            memory_id: &peer.id,
            content: &peer.content,
            created_at: peer.created_at,
            source_credibility: 0.5,
        };
        if let Some((kind, discriminator)) = detect_discriminator_conflict(&input_new, &input_peer) {
            storage.open_contradiction(&memory.id, &peer.id, kind, &discriminator)?;
        }
    }
    Ok(())
}

pub fn retrieve_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "agentId": {"type": "string", "description": "Requesting agent, stamped on any pii audit record"}
        },
        "required": ["id"]
    })
}

pub async fn retrieve(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;
    let agent_id = opt_str(&args, "agentId");
    let memory = storage
        .retrieve_checked(&id, storage.machine_id(), agent_id.as_deref())?
        .ok_or_else(|| HaiveError::NotFound(id))?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn update_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {"id": {"type": "string"}, "content": {"type": "string"}},
        "required": ["id", "content"]
    })
}

pub async fn update(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;
    let content = require_str(&args, "content")?;
    let memory = storage.update(&id, content)?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn update_confidentiality_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "level": {"type": "string", "enum": ["normal", "internal", "confidential", "pii"]}
        },
        "required": ["id", "level"]
    })
}

pub async fn update_confidentiality(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;
    let level_str = require_str(&args, "level")?;
    let level = ConfidentialityLevel::parse(&level_str)
        .ok_or_else(|| HaiveError::InvalidArgument(format!("unknown confidentiality level `{level_str}`")))?;
    let memory = storage.update_confidentiality(&id, level)?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn search_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
            "mode": {"type": "string", "enum": ["semantic", "lexical", "hybrid"], "default": "hybrid"},
            "limit": {"type": "integer", "default": 10},
            "alpha": {"type": "number", "default": 0.7, "description": "Semantic weight in hybrid fusion"}
        },
        "required": ["query"]
    })
}

pub async fn search(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let query = require_str(&args, "query")?;
    let mode = match opt_str(&args, "mode").as_deref() {
        Some("semantic") => SearchMode::Semantic,
        Some("lexical") => SearchMode::Lexical,
        _ => SearchMode::Hybrid,
    };
    let limit = opt_usize(&args, "limit", 10);
    let alpha = opt_f64(&args, "alpha", 0.7) as f32;
    let hits = storage.search(&query, mode, limit, alpha, storage.machine_id())?;
    Ok(serde_json::json!({ "hits": hits }))
}

pub fn recent_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {"limit": {"type": "integer", "default": 20}}
    })
}

pub async fn recent(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let limit = opt_usize(&args, "limit", 20);
    let memories = storage.recent(limit)?;
    Ok(serde_json::json!({ "memories": memories }))
}

pub fn stats_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

pub async fn stats(storage: &Arc<Storage>, _args: Option<Value>) -> ToolResult {
    let stats = storage.stats()?;
    Ok(serde_json::to_value(stats).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn delete_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "hard": {"type": "boolean", "default": false, "description": "Skip the soft-delete TTL and purge immediately"},
            "deletedBy": {"type": "string"},
            "reason": {"type": "string"},
            "ttlDays": {"type": "integer", "default": 30}
        },
        "required": ["id"]
    })
}

pub async fn delete(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;

    if opt_bool(&args, "hard", false) {
        storage.purge(&id)?;
        let memory = storage.retrieve(&id)?.ok_or_else(|| HaiveError::NotFound(id))?;
        return Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?);
    }

    let ttl_days = opt_u32(&args, "ttlDays", 30);
    let memory = storage.delete(&id, opt_str(&args, "deletedBy"), opt_str(&args, "reason"), ttl_days)?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn bulk_delete_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "category": {"type": "string"},
            "projectId": {"type": "string"},
            "confirm": {"type": "boolean", "default": false},
            "deletedBy": {"type": "string"},
            "reason": {"type": "string"},
            "ttlDays": {"type": "integer", "default": 30}
        }
    })
}

pub async fn bulk_delete(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    if !opt_bool(&args, "confirm", false) {
        return Err(HaiveError::ConfirmationRequired(
            "bulk_delete affects multiple memories; pass confirm: true to proceed".to_string(),
        ));
    }
    let filters = MemoryFilters {
        category: opt_str(&args, "category").map(|c| Category::parse(&c)),
        project_id: opt_str(&args, "projectId"),
        ..Default::default()
    };
    let ttl_days = opt_u32(&args, "ttlDays", 30);
    let memories = storage.bulk_delete(&filters, opt_str(&args, "deletedBy"), opt_str(&args, "reason"), ttl_days)?;
    Ok(serde_json::json!({ "deleted": memories.len(), "memories": memories }))
}

pub fn recover_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {"id": {"type": "string"}},
        "required": ["id"]
    })
}

pub async fn recover(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;
    let memory = storage.recover(&id)?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn list_deleted_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

pub async fn list_deleted(storage: &Arc<Storage>, _args: Option<Value>) -> ToolResult {
    let memories = storage.list_deleted()?;
    Ok(serde_json::json!({ "memories": memories }))
}

pub fn detect_duplicates_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

pub async fn detect_duplicates(storage: &Arc<Storage>, _args: Option<Value>) -> ToolResult {
    let pairs = storage.detect_duplicates()?;
    let pairs_json: Vec<Value> = pairs
        .into_iter()
        .map(|(a, b)| serde_json::json!({ "canonical": a, "duplicate": b }))
        .collect();
    Ok(serde_json::json!({ "pairs": pairs_json }))
}

pub fn merge_duplicates_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "canonicalId": {"type": "string"},
            "duplicateId": {"type": "string"}
        },
        "required": ["canonicalId", "duplicateId"]
    })
}

pub async fn merge_duplicates(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let canonical_id = require_str(&args, "canonicalId")?;
    let duplicate_id = require_str(&args, "duplicateId")?;
    let memory = storage.merge_duplicates(&canonical_id, &duplicate_id)?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn cleanup_expired_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

pub async fn cleanup_expired(storage: &Arc<Storage>, _args: Option<Value>) -> ToolResult {
    let purged = storage.cleanup_expired()?;
    Ok(serde_json::json!({ "purgedIds": purged }))
}

pub fn gdpr_delete_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "subject": {"type": "string", "description": "user_id or project_id to erase"},
            "confirm": {"type": "boolean", "default": false}
        },
        "required": ["subject"]
    })
}

pub async fn gdpr_delete(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let subject = require_str(&args, "subject")?;
    if !opt_bool(&args, "confirm", false) {
        return Err(HaiveError::ConfirmationRequired(
            "gdpr_delete is irreversible; pass confirm: true to proceed".to_string(),
        ));
    }
    let purged = storage.gdpr_delete(&subject)?;
    Ok(serde_json::json!({ "subject": subject, "purgedCount": purged }))
}

pub fn gdpr_export_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {"subject": {"type": "string", "description": "user_id or project_id to export"}},
        "required": ["subject"]
    })
}

pub async fn gdpr_export(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let subject = require_str(&args, "subject")?;
    let memories = storage.gdpr_export(&subject)?;
    Ok(serde_json::json!({ "subject": subject, "memories": memories }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_storage() -> (Arc<Storage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(Some(dir.path().join("test.db")), "node-a".to_string()).unwrap();
        (Arc::new(storage), dir)
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips() {
        let (storage, _dir) = test_storage();
        let stored = store(
            &storage,
            Some(serde_json::json!({"content": "redis cluster has 6 nodes", "category": "infrastructure"})),
        )
        .await
        .unwrap();
        let id = stored["id"].as_str().unwrap().to_string();
        let fetched = retrieve(&storage, Some(serde_json::json!({"id": id}))).await.unwrap();
        assert_eq!(fetched["content"], "redis cluster has 6 nodes");
    }

    #[tokio::test]
    async fn bulk_delete_without_confirm_is_rejected() {
        let (storage, _dir) = test_storage();
        let err = bulk_delete(&storage, Some(serde_json::json!({}))).await.unwrap_err();
        assert_eq!(err.kind(), "confirmation_required");
    }

    #[tokio::test]
    async fn retrieve_missing_id_is_not_found() {
        let (storage, _dir) = test_storage();
        let err = retrieve(&storage, Some(serde_json::json!({"id": "missing"}))).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
