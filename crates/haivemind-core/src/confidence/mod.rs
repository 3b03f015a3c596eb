//! Confidence Engine (CE) - seven-factor scoring, verification, voting,
//! usage tracking, and contradiction detection/resolution.

mod contradiction;

pub use contradiction::{
    detect_discriminator_conflict, resolve_default, resolve_source_trust, resolve_temporal,
    Contradiction, ContradictionKind, ContradictionStatus, ContradictionStrategy,
    DiscriminatorInput, STRATEGY_ORDER,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::memory::Category;

/// Default per-factor weights, in the order given by SPEC_FULL.md §4.2.
pub const WEIGHT_FRESHNESS: f64 = 0.20;
pub const WEIGHT_SOURCE_CREDIBILITY: f64 = 0.20;
pub const WEIGHT_VERIFICATION: f64 = 0.15;
pub const WEIGHT_CONSENSUS: f64 = 0.15;
pub const WEIGHT_NO_CONTRADICTION: f64 = 0.10;
pub const WEIGHT_USAGE_SUCCESS: f64 = 0.10;
pub const WEIGHT_CONTEXT_RELEVANCE: f64 = 0.10;

/// Risk-tier thresholds callers may gate decisions on (advisory only).
pub const RISK_TIER_LOW: f64 = 0.40;
pub const RISK_TIER_MEDIUM: f64 = 0.60;
pub const RISK_TIER_HIGH: f64 = 0.75;
pub const RISK_TIER_CRITICAL: f64 = 0.90;

/// Category-specific freshness half-life, in days. Falls back to the
/// `default` entry for anything not listed here.
pub fn half_life_days(category: Category) -> f64 {
    match category {
        Category::Infrastructure => 30.0,
        Category::Security => 20.0,
        Category::Runbooks => 90.0,
        Category::Agent => 180.0,
        _ => 60.0,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    Unverified,
    SelfVerified,
    Peer,
    Multi,
    Consensus,
    SystemVerified,
}

impl VerificationKind {
    /// Factor-3 score for this verification level.
    pub fn score(&self) -> f64 {
        match self {
            VerificationKind::Unverified => 0.3,
            VerificationKind::SelfVerified => 0.5,
            VerificationKind::Peer => 0.7,
            VerificationKind::Multi => 0.85,
            VerificationKind::Consensus => 0.95,
            VerificationKind::SystemVerified => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Confirmed,
    StillValid,
    Outdated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub verifier_agent_id: String,
    pub outcome: VerificationOutcome,
    pub notes: Option<String>,
    pub verified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Agree,
    Disagree,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub voter_agent_id: String,
    pub voter_machine_id: String,
    pub choice: VoteChoice,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageOutcome {
    pub succeeded: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Per-query context used by factor 7 (context relevance).
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    pub project_id: Option<String>,
    pub machine_id: Option<String>,
    pub query_similarity: Option<f64>,
}

/// All the signal inputs `score` needs for one memory. Assembled by the
/// caller (usually `MemoryEngine`) from storage before scoring.
#[derive(Debug, Clone)]
pub struct ScoringInputs {
    pub category: Category,
    pub created_at: DateTime<Utc>,
    pub last_verified_at: Option<DateTime<Utc>>,
    pub source_credibility: f64,
    pub verification_level: VerificationKind,
    pub votes: Vec<Vote>,
    pub open_contradiction_severity: f64,
    pub usage_outcomes: Vec<UsageOutcome>,
    pub memory_project_id: Option<String>,
    pub memory_machine_id: String,
}

/// Per-factor breakdown plus the weighted `final_score`, returned by `score`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceRecord {
    pub memory_id: String,
    pub freshness: f64,
    pub source_credibility: f64,
    pub verification: f64,
    pub consensus: f64,
    pub no_contradiction: f64,
    pub usage_success: f64,
    pub context_relevance: f64,
    pub final_score: f64,
    pub scored_at: DateTime<Utc>,
}

const USAGE_WINDOW_DAYS: i64 = 30;

/// Compute the weighted seven-factor score for one memory.
pub fn score(memory_id: &str, inputs: &ScoringInputs, ctx: Option<&QueryContext>, now: DateTime<Utc>) -> ConfidenceRecord {
    let freshness = freshness_factor(inputs, now);
    let source_credibility = inputs.source_credibility.clamp(0.0, 1.0);
    let verification = inputs.verification_level.score();
    let consensus = consensus_factor(&inputs.votes);
    let no_contradiction = (1.0 - inputs.open_contradiction_severity).clamp(0.0, 1.0);
    let usage_success = usage_success_factor(&inputs.usage_outcomes, now);
    let context_relevance = context_relevance_factor(inputs, ctx);

    let final_score = WEIGHT_FRESHNESS * freshness
        + WEIGHT_SOURCE_CREDIBILITY * source_credibility
        + WEIGHT_VERIFICATION * verification
        + WEIGHT_CONSENSUS * consensus
        + WEIGHT_NO_CONTRADICTION * no_contradiction
        + WEIGHT_USAGE_SUCCESS * usage_success
        + WEIGHT_CONTEXT_RELEVANCE * context_relevance;

    ConfidenceRecord {
        memory_id: memory_id.to_string(),
        freshness,
        source_credibility,
        verification,
        consensus,
        no_contradiction,
        usage_success,
        context_relevance,
        final_score: final_score.clamp(0.0, 1.0),
        scored_at: now,
    }
}

fn freshness_factor(inputs: &ScoringInputs, now: DateTime<Utc>) -> f64 {
    let reference = inputs.last_verified_at.unwrap_or(inputs.created_at);
    let age_days = (now - reference).num_seconds().max(0) as f64 / 86_400.0;
    let half_life = half_life_days(inputs.category);
    0.5_f64.powf(age_days / half_life)
}

/// Proportion of `agree` votes among at least three voters spread across
/// distinct machines; below quorum returns 0 per §4.2 factor 4.
fn consensus_factor(votes: &[Vote]) -> f64 {
    let distinct_machines: std::collections::HashSet<&str> =
        votes.iter().map(|v| v.voter_machine_id.as_str()).collect();
    if votes.len() < 3 || distinct_machines.len() < 3 {
        return 0.0;
    }
    let agree = votes.iter().filter(|v| v.choice == VoteChoice::Agree).count();
    agree as f64 / votes.len() as f64
}

fn usage_success_factor(outcomes: &[UsageOutcome], now: DateTime<Utc>) -> f64 {
    let window_start = now - chrono::Duration::days(USAGE_WINDOW_DAYS);
    let windowed: Vec<&UsageOutcome> = outcomes.iter().filter(|o| o.recorded_at >= window_start).collect();
    if windowed.is_empty() {
        return 0.7;
    }
    let successes = windowed.iter().filter(|o| o.succeeded).count();
    successes as f64 / windowed.len() as f64
}

fn context_relevance_factor(inputs: &ScoringInputs, ctx: Option<&QueryContext>) -> f64 {
    let Some(ctx) = ctx else { return 0.7 };

    let mut matches = 0.0;
    let mut total = 0.0;

    if let Some(project_id) = &ctx.project_id {
        total += 1.0;
        if inputs.memory_project_id.as_deref() == Some(project_id.as_str()) {
            matches += 1.0;
        }
    }
    if let Some(machine_id) = &ctx.machine_id {
        total += 1.0;
        if inputs.memory_machine_id == *machine_id {
            matches += 1.0;
        }
    }
    if let Some(similarity) = ctx.query_similarity {
        total += 1.0;
        matches += similarity.clamp(0.0, 1.0);
    }

    if total == 0.0 {
        0.7
    } else {
        matches / total
    }
}

/// Look up an agent's credibility within a category, falling back to
/// global credibility, then to the novice default.
pub fn agent_credibility(
    per_category: &HashMap<(String, Category), f64>,
    global: &HashMap<String, f64>,
    agent_id: &str,
    category: Category,
) -> f64 {
    per_category
        .get(&(agent_id.to_string(), category))
        .copied()
        .or_else(|| global.get(agent_id).copied())
        .unwrap_or(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_inputs(now: DateTime<Utc>) -> ScoringInputs {
        ScoringInputs {
            category: Category::Infrastructure,
            created_at: now,
            last_verified_at: None,
            source_credibility: 0.5,
            verification_level: VerificationKind::Unverified,
            votes: vec![],
            open_contradiction_severity: 0.0,
            usage_outcomes: vec![],
            memory_project_id: None,
            memory_machine_id: "node-a".into(),
        }
    }

    #[test]
    fn fresh_memory_scores_full_freshness() {
        let now = Utc::now();
        let inputs = base_inputs(now);
        let record = score("m1", &inputs, None, now);
        assert!((record.freshness - 1.0).abs() < 1e-9);
    }

    #[test]
    fn freshness_decays_by_half_at_half_life() {
        let now = Utc::now();
        let mut inputs = base_inputs(now);
        inputs.created_at = now - chrono::Duration::days(30);
        let record = score("m1", &inputs, None, now);
        assert!((record.freshness - 0.5).abs() < 0.01);
    }

    #[test]
    fn consensus_below_quorum_is_zero() {
        let votes = vec![
            Vote { voter_agent_id: "a1".into(), voter_machine_id: "m1".into(), choice: VoteChoice::Agree, cast_at: Utc::now() },
            Vote { voter_agent_id: "a2".into(), voter_machine_id: "m1".into(), choice: VoteChoice::Agree, cast_at: Utc::now() },
        ];
        assert_eq!(consensus_factor(&votes), 0.0);
    }

    #[test]
    fn consensus_at_quorum_across_machines() {
        let votes = vec![
            Vote { voter_agent_id: "a1".into(), voter_machine_id: "m1".into(), choice: VoteChoice::Agree, cast_at: Utc::now() },
            Vote { voter_agent_id: "a2".into(), voter_machine_id: "m2".into(), choice: VoteChoice::Agree, cast_at: Utc::now() },
            Vote { voter_agent_id: "a3".into(), voter_machine_id: "m3".into(), choice: VoteChoice::Disagree, cast_at: Utc::now() },
        ];
        assert!((consensus_factor(&votes) - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn usage_success_defaults_neutral_with_no_data() {
        assert_eq!(usage_success_factor(&[], Utc::now()), 0.7);
    }

    #[test]
    fn usage_success_ignores_outcomes_outside_window() {
        let now = Utc::now();
        let outcomes = vec![UsageOutcome {
            succeeded: false,
            recorded_at: now - chrono::Duration::days(60),
        }];
        assert_eq!(usage_success_factor(&outcomes, now), 0.7);
    }

    #[test]
    fn verification_levels_match_spec_scores() {
        assert_eq!(VerificationKind::Unverified.score(), 0.3);
        assert_eq!(VerificationKind::SystemVerified.score(), 1.0);
    }

    #[test]
    fn agent_credibility_falls_back_through_tiers() {
        let per_category = HashMap::new();
        let mut global = HashMap::new();
        global.insert("a1".to_string(), 0.8);

        assert_eq!(agent_credibility(&per_category, &global, "a1", Category::Security), 0.8);
        assert_eq!(agent_credibility(&per_category, &global, "unknown", Category::Security), 0.5);
    }
}
