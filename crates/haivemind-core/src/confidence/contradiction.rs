//! Contradiction detection and resolution (§4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionKind {
    Factual,
    MutualExclusion,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionStrategy {
    Temporal,
    SourceTrust,
    Consensus,
    System,
    Manual,
}

/// Strategies are tried in this order unless the caller names one
/// explicitly (`resolve_contradiction(id, strategy?)`).
pub const STRATEGY_ORDER: &[ContradictionStrategy] = &[
    ContradictionStrategy::Temporal,
    ContradictionStrategy::SourceTrust,
    ContradictionStrategy::Consensus,
    ContradictionStrategy::System,
    ContradictionStrategy::Manual,
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionStatus {
    Open,
    Resolved,
    RequiresReview,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contradiction {
    pub id: String,
    pub memory_a: String,
    pub memory_b: String,
    pub kind: ContradictionKind,
    pub discriminator: String,
    pub status: ContradictionStatus,
    pub detected_at: DateTime<Utc>,
    pub resolved_by_strategy: Option<ContradictionStrategy>,
    pub winner: Option<String>,
}

/// Minimal facts about one side of a candidate pair, enough to run the
/// discriminator and resolution checks without touching storage directly.
#[derive(Debug, Clone)]
pub struct DiscriminatorInput<'a> {
    pub memory_id: &'a str,
    pub content: &'a str,
    pub created_at: DateTime<Utc>,
    pub source_credibility: f64,
}

const BOOLEAN_STATE_PAIRS: &[(&str, &str)] = &[
    ("running", "stopped"),
    ("enabled", "disabled"),
    ("up", "down"),
    ("online", "offline"),
    ("active", "inactive"),
];

/// Extract a numeric token set (ports, versions, counts) from content, used
/// to compare whether two memories disagree on a concrete number.
fn numeric_tokens(content: &str) -> Vec<&str> {
    content
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '.')
        .filter(|tok| tok.chars().any(|c| c.is_ascii_digit()))
        .collect()
}

fn boolean_state(content: &str) -> Option<&'static str> {
    let lower = content.to_lowercase();
    for (a, b) in BOOLEAN_STATE_PAIRS {
        if lower.contains(a) {
            return Some(a);
        }
        if lower.contains(b) {
            return Some(b);
        }
    }
    None
}

fn has_negation(content: &str) -> bool {
    let lower = content.to_lowercase();
    ["not ", "n't", "no longer", "never"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Given two memories that already passed the cosine-similarity ≥ 0.8
/// gate, decide whether they disagree on a discriminator and, if so, what
/// kind of contradiction to open. Returns `None` when no discriminator
/// fires (the pair is merely similar, not contradictory).
pub fn detect_discriminator_conflict(
    a: &DiscriminatorInput,
    b: &DiscriminatorInput,
) -> Option<(ContradictionKind, String)> {
    let numbers_a: std::collections::HashSet<&str> = numeric_tokens(a.content).into_iter().collect();
    let numbers_b: std::collections::HashSet<&str> = numeric_tokens(b.content).into_iter().collect();
    if !numbers_a.is_empty() && !numbers_b.is_empty() && numbers_a != numbers_b {
        return Some((ContradictionKind::Factual, "numeric_mismatch".to_string()));
    }

    match (boolean_state(a.content), boolean_state(b.content)) {
        (Some(state_a), Some(state_b)) if state_a != state_b => {
            return Some((ContradictionKind::MutualExclusion, "boolean_state".to_string()));
        }
        _ => {}
    }

    if has_negation(a.content) != has_negation(b.content) {
        return Some((ContradictionKind::Factual, "negation".to_string()));
    }

    None
}

/// Apply `temporal`: newer memory wins only if the age gap exceeds 30 days.
pub fn resolve_temporal<'a>(a: &DiscriminatorInput<'a>, b: &DiscriminatorInput<'a>) -> Option<&'a str> {
    let gap = (a.created_at - b.created_at).num_days().abs();
    if gap <= 30 {
        return None;
    }
    Some(if a.created_at > b.created_at { a.memory_id } else { b.memory_id })
}

/// Apply `source_trust`: higher-credibility source wins if the gap ≥ 0.2.
pub fn resolve_source_trust<'a>(a: &DiscriminatorInput<'a>, b: &DiscriminatorInput<'a>) -> Option<&'a str> {
    let gap = (a.source_credibility - b.source_credibility).abs();
    if gap < 0.2 {
        return None;
    }
    Some(if a.source_credibility > b.source_credibility { a.memory_id } else { b.memory_id })
}

/// Run the default ordered attempt (`temporal` then `source_trust`; the
/// remaining strategies need data this function doesn't have and are
/// driven by the caller directly).
pub fn resolve_default<'a>(
    a: &DiscriminatorInput<'a>,
    b: &DiscriminatorInput<'a>,
) -> Option<(ContradictionStrategy, &'a str)> {
    if let Some(winner) = resolve_temporal(a, b) {
        return Some((ContradictionStrategy::Temporal, winner));
    }
    if let Some(winner) = resolve_source_trust(a, b) {
        return Some((ContradictionStrategy::SourceTrust, winner));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(id: &'a str, content: &'a str, days_ago: i64, credibility: f64) -> DiscriminatorInput<'a> {
        DiscriminatorInput {
            memory_id: id,
            content,
            created_at: Utc::now() - chrono::Duration::days(days_ago),
            source_credibility: credibility,
        }
    }

    #[test]
    fn numeric_mismatch_opens_factual_contradiction() {
        let a = input("a", "the service listens on port 6379", 0, 0.5);
        let b = input("b", "the service listens on port 6380", 0, 0.5);
        let result = detect_discriminator_conflict(&a, &b);
        assert_eq!(result.unwrap().0, ContradictionKind::Factual);
    }

    #[test]
    fn boolean_state_mismatch_opens_mutual_exclusion() {
        let a = input("a", "the cache is running normally", 0, 0.5);
        let b = input("b", "the cache is stopped for maintenance", 0, 0.5);
        let result = detect_discriminator_conflict(&a, &b);
        assert_eq!(result.unwrap().0, ContradictionKind::MutualExclusion);
    }

    #[test]
    fn agreeing_memories_produce_no_conflict() {
        let a = input("a", "the cache is running normally", 0, 0.5);
        let b = input("b", "the cache is running fine today", 0, 0.5);
        assert!(detect_discriminator_conflict(&a, &b).is_none());
    }

    #[test]
    fn temporal_resolution_requires_gap_over_30_days() {
        let a = input("a", "x", 5, 0.5);
        let b = input("b", "x", 10, 0.5);
        assert!(resolve_temporal(&a, &b).is_none());

        let old = input("old", "x", 60, 0.5);
        let new = input("new", "x", 1, 0.5);
        assert_eq!(resolve_temporal(&new, &old), Some("new"));
    }

    #[test]
    fn source_trust_resolution_requires_gap_of_0_2() {
        let a = input("a", "x", 0, 0.55);
        let b = input("b", "x", 0, 0.5);
        assert!(resolve_source_trust(&a, &b).is_none());

        let trusted = input("trusted", "x", 0, 0.9);
        let novice = input("novice", "x", 0, 0.4);
        assert_eq!(resolve_source_trust(&trusted, &novice), Some("trusted"));
    }

    #[test]
    fn default_resolution_falls_through_temporal_to_source_trust() {
        let a = input("a", "x", 1, 0.9);
        let b = input("b", "x", 2, 0.4);
        let (strategy, winner) = resolve_default(&a, &b).unwrap();
        assert_eq!(strategy, ContradictionStrategy::SourceTrust);
        assert_eq!(winner, "a");
    }
}
