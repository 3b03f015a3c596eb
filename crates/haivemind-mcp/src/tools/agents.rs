//! Agent Registry tools: register_agent, roster, delegate, query_agent,
//! broadcast.
//!
//! Unlike the Memory/Confidence tool modules, these take the registry and
//! event bus directly rather than `Storage` alone - the registry is its own
//! in-process component (§5), and `broadcast`/`query_agent` have no direct
//! registry primitive to call, so they compose `get_agent`/`EventBus::publish`
//! instead.

use std::collections::HashSet;
use std::sync::Arc;

use haivemind_core::{
    AgentRegistry, EventBus, HaiveError, RosterFilter, Storage, SyncEvent, Task, TaskStatus,
    VectorClock,
};
use serde_json::Value;

use super::args::{opt_bool, opt_str, require_str};

type ToolResult = Result<Value, HaiveError>;

pub fn register_agent_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "agentId": {"type": "string"},
            "role": {"type": "string"},
            "capabilities": {"type": "array", "items": {"type": "string"}},
            "description": {"type": "string"},
            "machineId": {"type": "string"}
        },
        "required": ["agentId", "role", "machineId"]
    })
}

pub async fn register_agent(registry: &Arc<AgentRegistry>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let agent_id = require_str(&args, "agentId")?;
    let role = require_str(&args, "role")?;
    let machine_id = require_str(&args, "machineId")?;
    let capabilities: HashSet<String> = args
        .get("capabilities")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();

    let agent = registry.register(&agent_id, &role, capabilities, opt_str(&args, "description"), &machine_id);
    Ok(serde_json::to_value(agent).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn roster_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "role": {"type": "string"},
            "capability": {"type": "string"},
            "machineId": {"type": "string"},
            "status": {"type": "string", "enum": ["active", "idle", "offline"]}
        }
    })
}

pub async fn roster(registry: &Arc<AgentRegistry>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let status = opt_str(&args, "status")
        .map(|s| parse_status(&s))
        .transpose()?;
    let filter = RosterFilter {
        role: opt_str(&args, "role"),
        capability: opt_str(&args, "capability"),
        machine_id: opt_str(&args, "machineId"),
        status,
    };
    let agents = registry.roster(&filter);
    Ok(serde_json::json!({ "agents": agents }))
}

fn parse_status(s: &str) -> Result<haivemind_core::AgentStatus, HaiveError> {
    match s {
        "active" => Ok(haivemind_core::AgentStatus::Active),
        "idle" => Ok(haivemind_core::AgentStatus::Idle),
        "offline" => Ok(haivemind_core::AgentStatus::Offline),
        other => Err(HaiveError::InvalidArgument(format!("unknown agent status `{other}`"))),
    }
}

pub fn delegate_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "taskId": {"type": "string"},
            "requesterAgentId": {"type": "string"},
            "requesterMachineId": {"type": "string"},
            "requiredCapabilities": {"type": "array", "items": {"type": "string"}},
            "category": {"type": "string"},
            "description": {"type": "string"},
            "localOnly": {"type": "boolean", "default": false}
        },
        "required": ["taskId", "requesterMachineId", "category", "description"]
    })
}

pub async fn delegate(registry: &Arc<AgentRegistry>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let required_capabilities: HashSet<String> = args
        .get("requiredCapabilities")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();

    let task = Task {
        task_id: require_str(&args, "taskId")?,
        requester_agent_id: opt_str(&args, "requesterAgentId"),
        requester_machine_id: require_str(&args, "requesterMachineId")?,
        required_capabilities,
        category: require_str(&args, "category")?,
        description: require_str(&args, "description")?,
        local_only: opt_bool(&args, "localOnly", false),
        status: TaskStatus::Pending,
        assigned_agent_id: None,
        created_at: chrono::Utc::now(),
        attempt: 0,
        declined_agent_ids: HashSet::new(),
        retry_after: None,
    };

    let offered = registry
        .delegate(task)
        .map_err(|e| HaiveError::Internal(e.to_string()))?;
    Ok(serde_json::to_value(offered).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn query_agent_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": { "agentId": {"type": "string"} },
        "required": ["agentId"]
    })
}

pub async fn query_agent(registry: &Arc<AgentRegistry>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let agent_id = require_str(&args, "agentId")?;
    match registry.get_agent(&agent_id) {
        Some(agent) => Ok(serde_json::to_value(agent).map_err(|e| HaiveError::Internal(e.to_string()))?),
        None => Err(HaiveError::NotFound(format!("agent `{agent_id}` is not registered"))),
    }
}

pub fn broadcast_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "memoryId": {"type": "string"},
            "fromAgentId": {"type": "string"}
        },
        "required": ["memoryId", "fromAgentId"]
    })
}

/// Fan a stored memory out to every other in-process listener (sync
/// mirroring, SSE clients) as an `AgentBroadcast` event. This is the only
/// registry-adjacent operation with no dedicated registry method - it is
/// purely a bus publish, gated on the sender actually being a known agent.
pub async fn broadcast(
    registry: &Arc<AgentRegistry>,
    bus: &Arc<EventBus>,
    storage: &Arc<Storage>,
    args: Option<Value>,
) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let memory_id = require_str(&args, "memoryId")?;
    let from_agent_id = require_str(&args, "fromAgentId")?;

    let agent = registry
        .get_agent(&from_agent_id)
        .ok_or_else(|| HaiveError::NotFound(format!("agent `{from_agent_id}` is not registered")))?;

    storage
        .retrieve(&memory_id)?
        .ok_or_else(|| HaiveError::NotFound(format!("memory `{memory_id}` not found")))?;

    bus.publish(SyncEvent::AgentBroadcast {
        memory_id: memory_id.clone(),
        from_agent_id,
        machine_id: agent.machine_id,
        vector_clock: VectorClock::origin(storage.machine_id()),
        occurred_at: chrono::Utc::now(),
    });

    Ok(serde_json::json!({ "broadcast": true, "memoryId": memory_id }))
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
    async fn register_then_roster_round_trips() {
        let registry = Arc::new(AgentRegistry::new());
        register_agent(&registry, Some(serde_json::json!({
            "agentId": "a1", "role": "worker", "machineId": "m1", "capabilities": ["rust"]
        }))).await.unwrap();

        let result = roster(&registry, Some(serde_json::json!({}))).await.unwrap();
        assert_eq!(result["agents"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn query_agent_missing_is_not_found() {
        let registry = Arc::new(AgentRegistry::new());
        let err = query_agent(&registry, Some(serde_json::json!({"agentId": "ghost"}))).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn broadcast_requires_known_agent_and_memory() {
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(EventBus::new(16));
        let (storage, _dir) = test_storage();

        let err = broadcast(&registry, &bus, &storage, Some(serde_json::json!({
            "memoryId": "does-not-exist", "fromAgentId": "ghost"
        }))).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");

        register_agent(&registry, Some(serde_json::json!({
            "agentId": "a1", "role": "worker", "machineId": "m1"
        }))).await.unwrap();
        let memory = storage.store("redis has 6 nodes".to_string(), "infrastructure".to_string(), vec![], None, None, None, None, Default::default(), true).unwrap();

        let result = broadcast(&registry, &bus, &storage, Some(serde_json::json!({
            "memoryId": memory.id, "fromAgentId": "a1"
        }))).await.unwrap();
        assert_eq!(result["broadcast"], true);
    }
}
