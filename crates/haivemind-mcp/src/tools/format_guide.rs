//! Format Guide (FG): on a session's first memory-returning call, prepend a
//! compact format reference and bump the session's access counter. Purely
//! informational - it never changes server-side semantics, only what the
//! response carries alongside the real payload.

use std::collections::HashMap;
use std::sync::Mutex;

use haivemind_core::HaiveError;
use serde_json::Value;

use super::args::opt_str;

type ToolResult = Result<Value, HaiveError>;

/// Compact reference injected into the first memory-returning response of a
/// session. `format_version` stamping (`v2` for memories created in a
/// session that has seen this guide) happens where memories are written;
/// this module only tracks whether a session has been shown it yet.
const FORMAT_GUIDE_TEXT: &str = "\
hAIveMind compact format (v2): memories are plain text content plus a \
category, tags, and optional context. Prefer terse, fact-dense content \
over prose - one claim per memory reads and dedupes better than a \
paragraph. v1 memories predate this convention and are flagged as \
compressible in `stats`/`search` responses.";

/// Per-session bookkeeping for the format guide hook. One instance is
/// shared across a server's lifetime; stdio has exactly one session, HTTP
/// keys by `mcp-session-id`.
#[derive(Default)]
pub struct FormatGuideTracker {
    state: Mutex<HashMap<String, SessionState>>,
}

#[derive(Default, Clone)]
struct SessionState {
    guide_shown: bool,
    memory_access_count: u64,
}

impl FormatGuideTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the dispatch pipeline around every memory-returning tool
    /// call. Returns the guide text only the first time a given session
    /// reaches this hook; every call increments that session's counter.
    pub fn note_memory_access(&self, session_id: &str) -> Option<&'static str> {
        let mut state = self.state.lock().expect("format guide tracker lock poisoned");
        let entry = state.entry(session_id.to_string()).or_default();
        entry.memory_access_count += 1;
        if entry.guide_shown {
            None
        } else {
            entry.guide_shown = true;
            Some(FORMAT_GUIDE_TEXT)
        }
    }

    pub fn access_count(&self, session_id: &str) -> u64 {
        self.state
            .lock()
            .expect("format guide tracker lock poisoned")
            .get(session_id)
            .map(|s| s.memory_access_count)
            .unwrap_or(0)
    }
}

pub fn get_format_guide_schema() -> Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Explicit on-demand fetch of the same guide text the session hook
/// prepends automatically - useful for a client that wants it without
/// triggering a real memory operation first.
pub async fn get_format_guide(_args: Option<Value>) -> ToolResult {
    Ok(serde_json::json!({ "formatVersion": "v2", "guide": FORMAT_GUIDE_TEXT }))
}

pub fn get_memory_access_stats_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": { "sessionId": {"type": "string"} },
        "required": ["sessionId"]
    })
}

pub async fn get_memory_access_stats(tracker: &FormatGuideTracker, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let session_id = opt_str(&args, "sessionId").unwrap_or_else(|| "default".to_string());
    Ok(serde_json::json!({
        "sessionId": session_id,
        "memoryAccessCount": tracker.access_count(&session_id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guide_shown_only_on_first_access() {
        let tracker = FormatGuideTracker::new();
        assert!(tracker.note_memory_access("s1").is_some());
        assert!(tracker.note_memory_access("s1").is_none());
        assert_eq!(tracker.access_count("s1"), 2);
    }

    #[test]
    fn sessions_are_tracked_independently() {
        let tracker = FormatGuideTracker::new();
        tracker.note_memory_access("s1");
        assert_eq!(tracker.access_count("s2"), 0);
        assert!(tracker.note_memory_access("s2").is_some());
    }

    #[tokio::test]
    async fn get_format_guide_returns_v2_reference() {
        let result = get_format_guide(None).await.unwrap();
        assert_eq!(result["formatVersion"], "v2");
    }
}
