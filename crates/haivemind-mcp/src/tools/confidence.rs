//! Confidence Engine tools: score, verify, vote, report_usage,
//! search_high_confidence, flag_outdated, resolve_contradiction,
//! get_agent_credibility.

use std::sync::Arc;

use chrono::Utc;
use haivemind_core::{
    score, Category, ConfidenceRecord, ContradictionStatus, ContradictionStrategy, HaiveError,
    QueryContext, SearchMode, Storage, VerificationOutcome, VoteChoice,
};
use serde_json::Value;

use super::args::{opt_f64, opt_str, opt_usize, require_str};

type ToolResult = Result<Value, HaiveError>;

fn query_context(args: &Value) -> Option<QueryContext> {
    let project_id = opt_str(args, "projectId");
    let machine_id = opt_str(args, "machineId");
    if project_id.is_none() && machine_id.is_none() {
        return None;
    }
    Some(QueryContext { project_id, machine_id, query_similarity: None })
}

fn score_memory(storage: &Arc<Storage>, memory_id: &str, ctx: Option<&QueryContext>) -> Result<ConfidenceRecord, HaiveError> {
    let inputs = storage.scoring_inputs(memory_id)?;
    Ok(score(memory_id, &inputs, ctx, Utc::now()))
}

pub fn score_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "projectId": {"type": "string"},
            "machineId": {"type": "string"}
        },
        "required": ["id"]
    })
}

pub async fn score_tool(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;
    let ctx = query_context(&args);
    let record = score_memory(storage, &id, ctx.as_ref())?;
    Ok(serde_json::to_value(record).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn verify_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "verifierAgentId": {"type": "string"},
            "outcome": {"type": "string", "enum": ["confirmed", "still_valid", "outdated"]},
            "notes": {"type": "string"}
        },
        "required": ["id", "verifierAgentId", "outcome"]
    })
}

pub async fn verify(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;
    let verifier_agent_id = require_str(&args, "verifierAgentId")?;
    let outcome_str = require_str(&args, "outcome")?;
    let outcome = match outcome_str.as_str() {
        "confirmed" => VerificationOutcome::Confirmed,
        "still_valid" => VerificationOutcome::StillValid,
        "outdated" => VerificationOutcome::Outdated,
        other => return Err(HaiveError::InvalidArgument(format!("unknown verification outcome `{other}`"))),
    };
    let verification = storage.add_verification(&id, &verifier_agent_id, outcome, opt_str(&args, "notes"))?;
    Ok(serde_json::to_value(verification).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn vote_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "voterAgentId": {"type": "string"},
            "voterMachineId": {"type": "string"},
            "choice": {"type": "string", "enum": ["agree", "disagree"]}
        },
        "required": ["id", "voterAgentId", "voterMachineId", "choice"]
    })
}

pub async fn vote(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;
    let voter_agent_id = require_str(&args, "voterAgentId")?;
    let voter_machine_id = require_str(&args, "voterMachineId")?;
    let choice_str = require_str(&args, "choice")?;
    let choice = match choice_str.as_str() {
        "agree" => VoteChoice::Agree,
        "disagree" => VoteChoice::Disagree,
        other => return Err(HaiveError::InvalidArgument(format!("unknown vote choice `{other}`"))),
    };
    let vote = storage.add_vote(&id, &voter_agent_id, &voter_machine_id, choice)?;
    Ok(serde_json::to_value(vote).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn report_usage_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "succeeded": {"type": "boolean"}
        },
        "required": ["id", "succeeded"]
    })
}

pub async fn report_usage(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;
    let succeeded = args.get("succeeded").and_then(|v| v.as_bool())
        .ok_or_else(|| HaiveError::InvalidArgument("missing required argument `succeeded`".to_string()))?;
    storage.record_usage_outcome(&id, succeeded)?;
    Ok(serde_json::json!({ "recorded": true }))
}

pub fn search_high_confidence_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
            "minConfidence": {"type": "number", "default": 0.6},
            "limit": {"type": "integer", "default": 10}
        },
        "required": ["query"]
    })
}

pub async fn search_high_confidence(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let query = require_str(&args, "query")?;
    let limit = opt_usize(&args, "limit", 10);
    let min_confidence = opt_f64(&args, "minConfidence", 0.6);

    let fetch_limit = (limit * 4).max(20);
    let hits = storage.search(&query, SearchMode::Hybrid, fetch_limit, 0.7, storage.machine_id())?;

    let mut scored = Vec::new();
    for hit in hits {
        let record = score_memory(storage, &hit.id, None)?;
        if record.final_score >= min_confidence {
            scored.push(serde_json::json!({ "hit": hit, "confidence": record }));
        }
        if scored.len() >= limit {
            break;
        }
    }
    Ok(serde_json::json!({ "results": scored }))
}

pub fn flag_outdated_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {"type": "string"},
            "flaggedByAgentId": {"type": "string"},
            "notes": {"type": "string"}
        },
        "required": ["id", "flaggedByAgentId"]
    })
}

pub async fn flag_outdated(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let id = require_str(&args, "id")?;
    let flagged_by = require_str(&args, "flaggedByAgentId")?;
    let verification = storage.add_verification(&id, &flagged_by, VerificationOutcome::Outdated, opt_str(&args, "notes"))?;
    Ok(serde_json::to_value(verification).map_err(|e| HaiveError::Internal(e.to_string()))?)
}

pub fn resolve_contradiction_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "id": {"type": "string", "description": "Contradiction id; resolves every open contradiction when omitted"},
            "strategy": {"type": "string", "enum": ["temporal", "source_trust", "consensus", "system", "manual"]}
        }
    })
}

pub async fn resolve_contradiction(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let strategy = opt_str(&args, "strategy").map(|s| parse_strategy(&s)).transpose()?;

    let ids: Vec<String> = match opt_str(&args, "id") {
        Some(id) => vec![id],
        None => storage
            .list_contradictions(Some(ContradictionStatus::Open))?
            .into_iter()
            .map(|c| c.id)
            .collect(),
    };

    let mut resolved = Vec::new();
    for id in ids {
        resolved.push(storage.resolve_contradiction(&id, strategy)?);
    }
    Ok(serde_json::json!({ "resolved": resolved }))
}

fn parse_strategy(s: &str) -> Result<ContradictionStrategy, HaiveError> {
    match s {
        "temporal" => Ok(ContradictionStrategy::Temporal),
        "source_trust" => Ok(ContradictionStrategy::SourceTrust),
        "consensus" => Ok(ContradictionStrategy::Consensus),
        "system" => Ok(ContradictionStrategy::System),
        "manual" => Ok(ContradictionStrategy::Manual),
        other => Err(HaiveError::InvalidArgument(format!("unknown contradiction strategy `{other}`"))),
    }
}

pub fn get_agent_credibility_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "agentId": {"type": "string"},
            "category": {"type": "string"}
        },
        "required": ["agentId"]
    })
}

pub async fn get_agent_credibility(storage: &Arc<Storage>, args: Option<Value>) -> ToolResult {
    let args = args.unwrap_or(Value::Null);
    let agent_id = require_str(&args, "agentId")?;
    let category = opt_str(&args, "category").map(|c| Category::parse(&c));
    let credibility = storage.get_agent_credibility(&agent_id, category)?;
    Ok(serde_json::json!({ "agentId": agent_id, "credibility": credibility }))
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
    async fn score_unverified_memory_is_neutral() {
        let (storage, _dir) = test_storage();
        let memory = storage
            .store("db has 6 nodes".to_string(), "infrastructure".to_string(), vec![], None, None, None, None, Default::default(), true)
            .unwrap();
        let result = score_tool(&storage, Some(serde_json::json!({"id": memory.id}))).await.unwrap();
        assert!(result["finalScore"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn vote_then_credibility_round_trip() {
        let (storage, _dir) = test_storage();
        storage.set_agent_credibility("agent-1", None, 0.9).unwrap();
        let result = get_agent_credibility(&storage, Some(serde_json::json!({"agentId": "agent-1"}))).await.unwrap();
        assert_eq!(result["credibility"], 0.9);
    }

    #[tokio::test]
    async fn resolve_contradiction_without_id_resolves_all_open() {
        let (storage, _dir) = test_storage();
        let a = storage.store("port 6379".to_string(), "infrastructure".to_string(), vec![], None, None, None, None, Default::default(), true).unwrap();
        let b = storage.store("port 6380".to_string(), "infrastructure".to_string(), vec![], None, None, None, None, Default::default(), true).unwrap();
        storage.open_contradiction(&a.id, &b.id, haivemind_core::ContradictionKind::Factual, "numeric_mismatch").unwrap();
        let result = resolve_contradiction(&storage, Some(serde_json::json!({}))).await.unwrap();
        assert_eq!(result["resolved"].as_array().unwrap().len(), 1);
    }
}
