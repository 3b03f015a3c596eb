//! Maps `HaiveError` kinds onto either a JSON-RPC protocol error or a
//! tool-level error payload, per the boundary `HaiveError::kind()` defines.
//!
//! `invalid_argument`/`content_too_large` are malformed requests
//! (`-32602`); `storage_error`/`unavailable`/`timeout`/`try_again_later` are
//! transport/backend faults (`-32603`). Everything else is a business
//! outcome a client branches on, not a protocol failure, so it rides inside
//! a successful JSON-RPC response as `isError: true`.

use haivemind_core::HaiveError;
use serde_json::Value;

use super::messages::CallToolResult;
use super::types::JsonRpcError;

pub enum ToolOutcome {
    Protocol(JsonRpcError),
    Result(Value),
}

pub fn map_tool_error(err: HaiveError) -> ToolOutcome {
    match err.kind() {
        "invalid_argument" | "content_too_large" => {
            ToolOutcome::Protocol(JsonRpcError::invalid_params(&err.to_string()))
        }
        "storage_error" | "unavailable" | "timeout" | "try_again_later" => {
            ToolOutcome::Protocol(JsonRpcError::internal_error(&err.to_string()))
        }
        kind => {
            let result = CallToolResult::tool_error(kind, &err.to_string());
            ToolOutcome::Result(serde_json::to_value(result).unwrap_or(Value::Null))
        }
    }
}
