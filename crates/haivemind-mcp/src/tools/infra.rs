//! Infrastructure-awareness conveniences: thin wrappers over the Memory
//! Engine that pin content into fixed categories and tag shapes so
//! operational callers don't have to know the category taxonomy by heart.

use std::sync::Arc;

use haivemind_core::{ConfidentialityLevel, HaiveError, Storage};
use serde_json::Value;

use super::args::{opt_str, opt_tags, require_str};

type ToolResult = Result<Value, HaiveError>;

pub fn track_infrastructure_state_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "component": {"type": "string"},
            "state": {"type": "string"},
            "tags": {"type": "array", "items": {"type": "string"}},
            "projectId": {"type": "string"},
            "sourceAgentId": {"type": "string"}
        },
        "required": ["component", "state"]
    })
}

pub async fn track_infrastructure_state(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let component = require_str(&args, "component")?;
    let state = require_str(&args, "state")?;
    let content = format!("{component}: {state}");

    let mut tags = opt_tags(&args);
    tags.push(component.clone());

    let memory = storage.store(
        content,
        "infrastructure".to_string(),
        tags,
        Some(state),
        opt_str(&args, "projectId"),
        None,
        opt_str(&args, "sourceAgentId"),
        ConfidentialityLevel::default(),
        true,
    )?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn record_incident_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "description": {"type": "string"},
            "severity": {"type": "string"},
            "tags": {"type": "array", "items": {"type": "string"}},
            "projectId": {"type": "string"},
            "sourceAgentId": {"type": "string"}
        },
        "required": ["title", "description"]
    })
}

pub async fn record_incident(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let title = require_str(&args, "title")?;
    let description = require_str(&args, "description")?;
    let severity = opt_str(&args, "severity").unwrap_or_else(|| "unknown".to_string());
    let content = format!("[{severity}] {title}: {description}");

    let mut tags = opt_tags(&args);
    tags.push(format!("severity:{severity}"));

    let memory = storage.store(
        content,
        "incidents".to_string(),
        tags,
        None,
        opt_str(&args, "projectId"),
        None,
        opt_str(&args, "sourceAgentId"),
        ConfidentialityLevel::default(),
        false,
    )?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn generate_runbook_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "steps": {"type": "array", "items": {"type": "string"}},
            "tags": {"type": "array", "items": {"type": "string"}},
            "projectId": {"type": "string"},
            "sourceAgentId": {"type": "string"}
        },
        "required": ["title", "steps"]
    })
}

pub async fn generate_runbook(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let title = require_str(&args, "title")?;
    let steps: Vec<String> = args
        .get("steps")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();
    if steps.is_empty() {
        return Err(HaiveError::InvalidArgument("`steps` must contain at least one entry".to_string()));
    }

    let body = steps
        .iter()
        .enumerate()
        .map(|(i, step)| format!("{}. {step}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    let content = format!("# {title}\n\n{body}");

    let memory = storage.store(
        content,
        "runbooks".to_string(),
        opt_tags(&args),
        None,
        opt_str(&args, "projectId"),
        None,
        opt_str(&args, "sourceAgentId"),
        ConfidentialityLevel::default(),
        true,
    )?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn sync_ssh_config_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "hostAlias": {"type": "string"},
            "config": {"type": "string"},
            "projectId": {"type": "string"},
            "sourceAgentId": {"type": "string"}
        },
        "required": ["hostAlias", "config"]
    })
}

/// Stores an SSH host block as a `security`-category memory so it flows
/// through the same confidentiality lattice and retention rules as any other
/// credential-adjacent record instead of living on disk unmanaged.
pub async fn sync_ssh_config(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let host_alias = require_str(&args, "hostAlias")?;
    let config = require_str(&args, "config")?;
    let content = format!("Host {host_alias}\n{config}");

    let memory = storage.store(
        content,
        "security".to_string(),
        vec!["ssh-config".to_string(), host_alias.clone()],
        None,
        opt_str(&args, "projectId"),
        None,
        opt_str(&args, "sourceAgentId"),
        ConfidentialityLevel::Confidential,
        true,
    )?;
    Ok(serde_json::to_value(memory).map_err(|e| HaiveError::Internal(e.to_string()))?)
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
    async fn track_infrastructure_state_tags_the_component() {
        let (storage, _dir) = test_storage();
        let result = track_infrastructure_state(&storage, Some(serde_json::json!({
            "component": "redis-cluster", "state": "6 nodes healthy"
        }))).await.unwrap();
        assert_eq!(result["category"], "infrastructure");
    }

    #[tokio::test]
    async fn generate_runbook_requires_steps() {
        let (storage, _dir) = test_storage();
        let err = generate_runbook(&storage, Some(serde_json::json!({
            "title": "restart service", "steps": []
        }))).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn sync_ssh_config_is_restricted() {
        let (storage, _dir) = test_storage();
        let result = sync_ssh_config(&storage, Some(serde_json::json!({
            "hostAlias": "prod-db", "config": "  User deploy\n  Port 22"
        }))).await.unwrap();
        assert_eq!(result["confidentialityLevel"], "confidential");
    }
}
