//! MCP server: dispatches JSON-RPC requests from either transport onto the
//! tool surface under `tools/`, and wraps every `HaiveError` the tools raise
//! into the right JSON-RPC shape.

use std::sync::Arc;

use haivemind_core::{AgentRegistry, AuditOutcome, AuditTargetKind, EventBus, HaiveError, Storage};
use serde_json::Value;
use uuid::Uuid;

use crate::protocol::error_code::{self, ToolOutcome};
use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerInfo, ToolDescription,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::tools::format_guide::FormatGuideTracker;
use crate::tools::{agents, confidence, format_guide, infra, memory};

const INSTRUCTIONS: &str = "\
hAIveMind is a shared memory hub for a fleet of agents. Store facts with \
`store` under a category (infrastructure, incidents, runbooks, security, \
patterns, ...) and a confidentiality level; retrieve them with `search` or \
`retrieve`. Confidence in a memory is not fixed - `verify`, `vote`, and \
`report_usage` feed the confidence engine, and `score`/`search_high_confidence` \
surface the result. Agents register once with `register_agent`, discover \
peers with `roster`, and hand off work with `delegate`. The first \
memory-returning call in a session carries a `formatGuide` hint describing \
the compact content convention; `get_format_guide` fetches it on demand.";

struct ToolSpec {
    name: &'static str,
    description: &'static str,
    schema: fn() -> Value,
}

static TOOL_CATALOG: &[ToolSpec] = &[
    // Memory Engine
    ToolSpec { name: "store", description: "Store a new memory under a category, with tags, context, and a confidentiality level.", schema: memory::store_schema },
    ToolSpec { name: "retrieve", description: "Fetch a single memory by id.", schema: memory::retrieve_schema },
    ToolSpec { name: "update", description: "Replace a memory's content, recomputing its content hash and vector clock.", schema: memory::update_schema },
    ToolSpec { name: "update_confidentiality", description: "Raise a memory's confidentiality level (the lattice only ratchets up).", schema: memory::update_confidentiality_schema },
    ToolSpec { name: "search", description: "Hybrid lexical/semantic search over live memories.", schema: memory::search_schema },
    ToolSpec { name: "recent", description: "List the most recently stored memories.", schema: memory::recent_schema },
    ToolSpec { name: "stats", description: "Aggregate counts of memories by category and confidentiality level.", schema: memory::stats_schema },
    ToolSpec { name: "delete", description: "Soft-delete a memory with a recovery window, or pass hard: true to purge immediately.", schema: memory::delete_schema },
    ToolSpec { name: "bulk_delete", description: "Soft-delete every memory matching a filter; requires confirm: true.", schema: memory::bulk_delete_schema },
    ToolSpec { name: "recover", description: "Undo a soft delete before its retention window expires.", schema: memory::recover_schema },
    ToolSpec { name: "list_deleted", description: "List memories currently in the soft-delete window.", schema: memory::list_deleted_schema },
    ToolSpec { name: "detect_duplicates", description: "Find content-hash-equivalent memory pairs.", schema: memory::detect_duplicates_schema },
    ToolSpec { name: "merge_duplicates", description: "Merge a duplicate memory into its canonical twin.", schema: memory::merge_duplicates_schema },
    ToolSpec { name: "cleanup_expired", description: "Hard-purge soft-deleted memories past their retention window.", schema: memory::cleanup_expired_schema },
    ToolSpec { name: "gdpr_delete", description: "Irreversibly erase every memory for a subject (user_id or project_id); requires confirm: true.", schema: memory::gdpr_delete_schema },
    ToolSpec { name: "gdpr_export", description: "Export every memory for a subject (user_id or project_id), for a data-subject access request.", schema: memory::gdpr_export_schema },
    // Confidence Engine
    ToolSpec { name: "score", description: "Compute the current confidence score for a memory.", schema: confidence::score_schema },
    ToolSpec { name: "verify", description: "Record an agent's verification outcome for a memory.", schema: confidence::verify_schema },
    ToolSpec { name: "vote", description: "Cast an agree/disagree vote on a memory.", schema: confidence::vote_schema },
    ToolSpec { name: "report_usage", description: "Report whether acting on a memory succeeded or failed.", schema: confidence::report_usage_schema },
    ToolSpec { name: "search_high_confidence", description: "Search, then keep only hits above a minimum confidence score.", schema: confidence::search_high_confidence_schema },
    ToolSpec { name: "flag_outdated", description: "Flag a memory as outdated (a convenience wrapper over verify).", schema: confidence::flag_outdated_schema },
    ToolSpec { name: "resolve_contradiction", description: "Resolve one or all open contradictions using a strategy.", schema: confidence::resolve_contradiction_schema },
    ToolSpec { name: "get_agent_credibility", description: "Read an agent's credibility score, optionally scoped to a category.", schema: confidence::get_agent_credibility_schema },
    // Agent Registry
    ToolSpec { name: "register_agent", description: "Register or re-register an agent with its role, capabilities, and machine.", schema: agents::register_agent_schema },
    ToolSpec { name: "roster", description: "List registered agents, optionally filtered by role, capability, machine, or status.", schema: agents::roster_schema },
    ToolSpec { name: "delegate", description: "Offer a task to the most eligible registered agent.", schema: agents::delegate_schema },
    ToolSpec { name: "query_agent", description: "Look up a single registered agent by id.", schema: agents::query_agent_schema },
    ToolSpec { name: "broadcast", description: "Fan a stored memory out to other listeners as an agent broadcast event.", schema: agents::broadcast_schema },
    // Infrastructure conveniences
    ToolSpec { name: "track_infrastructure_state", description: "Record a component's current state as an infrastructure memory.", schema: infra::track_infrastructure_state_schema },
    ToolSpec { name: "record_incident", description: "Record an incident with a severity tag.", schema: infra::record_incident_schema },
    ToolSpec { name: "generate_runbook", description: "Store a numbered runbook built from a list of steps.", schema: infra::generate_runbook_schema },
    ToolSpec { name: "sync_ssh_config", description: "Store an SSH host block as a confidential security memory.", schema: infra::sync_ssh_config_schema },
    // Format Guide
    ToolSpec { name: "get_format_guide", description: "Fetch the compact memory format reference on demand.", schema: format_guide::get_format_guide_schema },
    ToolSpec { name: "get_memory_access_stats", description: "Read how many memory-returning calls a session has made.", schema: format_guide::get_memory_access_stats_schema },
];

fn is_memory_bearing(name: &str) -> bool {
    matches!(
        name,
        "store"
            | "retrieve"
            | "update"
            | "update_confidentiality"
            | "search"
            | "recent"
            | "recover"
            | "list_deleted"
            | "detect_duplicates"
            | "merge_duplicates"
            | "gdpr_export"
            | "search_high_confidence"
            | "track_infrastructure_state"
            | "record_incident"
            | "generate_runbook"
            | "sync_ssh_config"
    )
}

/// Maps a tool name onto the `PRIVILEGED_OPERATIONS` string audited for it.
/// `hard_delete`, `pii_read`, and `sync_conflict` aren't detectable from a
/// tool name alone (the first two depend on response content, the third on
/// the sync layer) and are audited at their own call sites instead.
fn privileged_operation(tool_name: &str) -> Option<&'static str> {
    match tool_name {
        "bulk_delete" => Some("bulk_delete"),
        "gdpr_delete" => Some("gdpr_delete"),
        "gdpr_export" => Some("gdpr_export"),
        "update_confidentiality" => Some("confidentiality_change"),
        "resolve_contradiction" => Some("contradiction_resolved"),
        _ => None,
    }
}

/// Dispatches JSON-RPC requests onto the tool surface. One instance per
/// connection: stdio constructs exactly one for the process lifetime, HTTP
/// constructs one per `mcp-session-id`.
pub struct McpServer {
    storage: Arc<Storage>,
    registry: Arc<AgentRegistry>,
    bus: Arc<EventBus>,
    format_guide: Arc<FormatGuideTracker>,
    initialized: bool,
    session_id: String,
}

impl McpServer {
    pub fn new(
        storage: Arc<Storage>,
        registry: Arc<AgentRegistry>,
        bus: Arc<EventBus>,
        format_guide: Arc<FormatGuideTracker>,
    ) -> Self {
        Self {
            storage,
            registry,
            bus,
            format_guide,
            initialized: false,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    /// Returns `None` for notifications (no `id`, no response expected) and
    /// `Some` for every request that needs a reply.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();

        if request.method == "notifications/initialized" {
            return None;
        }

        if !self.initialized && !matches!(request.method.as_str(), "initialize" | "ping") {
            return Some(JsonRpcResponse::error(id, JsonRpcError::server_not_initialized()));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            other => Err(JsonRpcError::method_not_found_with_message(&format!(
                "unknown method `{other}`"
            ))),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => JsonRpcResponse::error(id, err),
        })
    }

    fn handle_initialize(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?
            .unwrap_or_default();

        let protocol_version = if request.protocol_version.as_str() < MCP_VERSION {
            request.protocol_version
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized = true;

        let result = InitializeResult {
            protocol_version,
            server_info: ServerInfo {
                name: "haivemind".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some(std::collections::HashMap::new()),
                prompts: None,
            },
            instructions: Some(INSTRUCTIONS.to_string()),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let tools = TOOL_CATALOG
            .iter()
            .map(|spec| ToolDescription {
                name: spec.name.to_string(),
                description: Some(spec.description.to_string()),
                input_schema: (spec.schema)(),
            })
            .collect();
        serde_json::to_value(ListToolsResult { tools })
            .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = params
            .ok_or_else(|| JsonRpcError::invalid_params("missing tool call params"))
            .and_then(|p| {
                serde_json::from_value(p).map_err(|e| JsonRpcError::invalid_params(&e.to_string()))
            })?;

        let name = request.name.as_str();
        let arguments = request.arguments;
        let outcome = self.dispatch(name, arguments.clone()).await;

        if let Some(operation) = privileged_operation(name) {
            self.record_privileged_audit(operation, &arguments, outcome.is_ok());
        }

        match outcome {
            Ok(mut value) => {
                if is_memory_bearing(name) {
                    if let Some(guide) = self.format_guide.note_memory_access(&self.session_id) {
                        if let Value::Object(ref mut map) = value {
                            map.insert("formatGuide".to_string(), Value::String(guide.to_string()));
                        }
                    }
                }
                let result = CallToolResult::ok(&value);
                serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
            }
            Err(err) => match error_code::map_tool_error(err) {
                ToolOutcome::Protocol(e) => Err(e),
                ToolOutcome::Result(v) => Ok(v),
            },
        }
    }

    async fn dispatch(&self, name: &str, args: Option<Value>) -> Result<Value, HaiveError> {
        match name {
            "store" => memory::store(&self.storage, args).await,
            "retrieve" => memory::retrieve(&self.storage, args).await,
            "update" => memory::update(&self.storage, args).await,
            "update_confidentiality" => memory::update_confidentiality(&self.storage, args).await,
            "search" => memory::search(&self.storage, args).await,
            "recent" => memory::recent(&self.storage, args).await,
            "stats" => memory::stats(&self.storage, args).await,
            "delete" => memory::delete(&self.storage, args).await,
            "bulk_delete" => memory::bulk_delete(&self.storage, args).await,
            "recover" => memory::recover(&self.storage, args).await,
            "list_deleted" => memory::list_deleted(&self.storage, args).await,
            "detect_duplicates" => memory::detect_duplicates(&self.storage, args).await,
            "merge_duplicates" => memory::merge_duplicates(&self.storage, args).await,
            "cleanup_expired" => memory::cleanup_expired(&self.storage, args).await,
            "gdpr_delete" => memory::gdpr_delete(&self.storage, args).await,
            "gdpr_export" => memory::gdpr_export(&self.storage, args).await,

            "score" => confidence::score_tool(&self.storage, args).await,
            "verify" => confidence::verify(&self.storage, args).await,
            "vote" => confidence::vote(&self.storage, args).await,
            "report_usage" => confidence::report_usage(&self.storage, args).await,
            "search_high_confidence" => confidence::search_high_confidence(&self.storage, args).await,
            "flag_outdated" => confidence::flag_outdated(&self.storage, args).await,
            "resolve_contradiction" => confidence::resolve_contradiction(&self.storage, args).await,
            "get_agent_credibility" => confidence::get_agent_credibility(&self.storage, args).await,

            "register_agent" => agents::register_agent(&self.registry, args).await,
            "roster" => agents::roster(&self.registry, args).await,
            "delegate" => agents::delegate(&self.registry, args).await,
            "query_agent" => agents::query_agent(&self.registry, args).await,
            "broadcast" => agents::broadcast(&self.registry, &self.bus, &self.storage, args).await,

            "track_infrastructure_state" => infra::track_infrastructure_state(&self.storage, args).await,
            "record_incident" => infra::record_incident(&self.storage, args).await,
            "generate_runbook" => infra::generate_runbook(&self.storage, args).await,
            "sync_ssh_config" => infra::sync_ssh_config(&self.storage, args).await,

            "get_format_guide" => format_guide::get_format_guide(args).await,
            "get_memory_access_stats" => {
                format_guide::get_memory_access_stats(&self.format_guide, args).await
            }

            other => Err(HaiveError::NotFound(format!("unknown tool `{other}`"))),
        }
    }

    fn record_privileged_audit(&self, operation: &'static str, arguments: &Option<Value>, succeeded: bool) {
        let target_id = arguments
            .as_ref()
            .and_then(|a| a.get("id").or_else(|| a.get("category")))
            .and_then(|v| v.as_str())
            .unwrap_or("*")
            .to_string();
        let actor = arguments
            .as_ref()
            .and_then(|a| a.get("deletedBy").or_else(|| a.get("flaggedByAgentId")))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let outcome = if succeeded { AuditOutcome::Success } else { AuditOutcome::Failed };

        if let Err(err) = self.storage.record_audit(
            actor,
            operation,
            AuditTargetKind::Memory,
            &target_id,
            outcome,
            None,
        ) {
            tracing::warn!(operation, %err, "failed to record audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use haivemind_core::EventBus;
    use tempfile::TempDir;

    fn test_server() -> (McpServer, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(Some(dir.path().join("test.db")), "node-a".to_string()).unwrap());
        let registry = Arc::new(AgentRegistry::new());
        let bus = Arc::new(EventBus::new(16));
        let format_guide = Arc::new(FormatGuideTracker::new());
        (McpServer::new(storage, registry, bus, format_guide), dir)
    }

    fn request(method: &str, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(1)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn calls_before_initialize_are_rejected() {
        let (mut server, _dir) = test_server();
        let response = server.handle_request(request("tools/list", None)).await.unwrap();
        assert_eq!(response.error.unwrap().code, -32003);
    }

    #[tokio::test]
    async fn initialize_then_list_tools_succeeds() {
        let (mut server, _dir) = test_server();
        let init = server.handle_request(request("initialize", None)).await.unwrap();
        assert!(init.error.is_none());

        let list = server.handle_request(request("tools/list", None)).await.unwrap();
        let tools = list.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, TOOL_CATALOG.len());
    }

    #[tokio::test]
    async fn notifications_initialized_gets_no_response() {
        let (mut server, _dir) = test_server();
        server.handle_request(request("initialize", None)).await;
        let response = server.handle_request(request("notifications/initialized", None)).await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn store_then_retrieve_round_trips_through_tools_call() {
        let (mut server, _dir) = test_server();
        server.handle_request(request("initialize", None)).await;

        let store_params = serde_json::json!({
            "name": "store",
            "arguments": {"content": "redis has 6 nodes", "category": "infrastructure"}
        });
        let store_response = server
            .handle_request(request("tools/call", Some(store_params)))
            .await
            .unwrap();
        assert!(store_response.error.is_none());
    }

    #[tokio::test]
    async fn unknown_tool_name_surfaces_as_tool_error_not_protocol_error() {
        let (mut server, _dir) = test_server();
        server.handle_request(request("initialize", None)).await;

        let params = serde_json::json!({"name": "does_not_exist", "arguments": {}});
        let response = server
            .handle_request(request("tools/call", Some(params)))
            .await
            .unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
    }

    #[tokio::test]
    async fn bulk_delete_without_confirm_is_a_tool_error() {
        let (mut server, _dir) = test_server();
        server.handle_request(request("initialize", None)).await;

        let params = serde_json::json!({"name": "bulk_delete", "arguments": {}});
        let response = server
            .handle_request(request("tools/call", Some(params)))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
    }
}
