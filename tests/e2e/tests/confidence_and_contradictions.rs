//! Confidence scoring and contradiction detection/resolution, exercised
//! through `Storage`'s public API end-to-end.

use chrono::Utc;
use haivemind_core::{
    confidence, ContradictionKind, ContradictionStrategy, ConfidentialityLevel, VerificationOutcome, VoteChoice,
};
use haivemind_e2e_tests::harness::db_manager::TestDatabaseManager;

#[test]
fn verification_and_votes_raise_confidence_score() {
    let db = TestDatabaseManager::new_temp();
    let memory = db
        .storage
        .store(
            "the staging cluster uses 3 replicas".to_string(),
            "infrastructure".to_string(),
            vec![],
            None,
            None,
            None,
            Some("agent-a".to_string()),
            ConfidentialityLevel::Normal,
            false,
        )
        .unwrap();

    let baseline = confidence::score(&memory.id, &db.storage.scoring_inputs(&memory.id).unwrap(), None, Utc::now());

    db.storage.add_verification(&memory.id, "agent-b", VerificationOutcome::Confirmed, None).unwrap();
    db.storage.add_vote(&memory.id, "agent-b", "node-b", VoteChoice::Agree).unwrap();
    db.storage.add_vote(&memory.id, "agent-c", "node-c", VoteChoice::Agree).unwrap();

    let improved = confidence::score(&memory.id, &db.storage.scoring_inputs(&memory.id).unwrap(), None, Utc::now());

    assert!(improved.final_score > baseline.final_score);
}

#[test]
fn opened_contradiction_resolves_via_source_trust() {
    let db = TestDatabaseManager::new_temp();

    let a = db
        .storage
        .store(
            "the deploy window is 2am-4am UTC".to_string(),
            "infrastructure".to_string(),
            vec![],
            None,
            None,
            None,
            Some("agent-a".to_string()),
            ConfidentialityLevel::Normal,
            false,
        )
        .unwrap();
    let b = db
        .storage
        .store(
            "the deploy window is 6am-8am UTC".to_string(),
            "infrastructure".to_string(),
            vec![],
            None,
            None,
            None,
            Some("agent-b".to_string()),
            ConfidentialityLevel::Normal,
            false,
        )
        .unwrap();

    db.storage.set_agent_credibility("agent-a", None, 0.9).unwrap();
    db.storage.set_agent_credibility("agent-b", None, 0.3).unwrap();

    let opened = db
        .storage
        .open_contradiction(&a.id, &b.id, ContradictionKind::Factual, "deploy_window")
        .unwrap();
    assert_eq!(opened.status, haivemind_core::ContradictionStatus::Open);

    let resolved = db
        .storage
        .resolve_contradiction(&opened.id, Some(ContradictionStrategy::SourceTrust))
        .unwrap();

    assert_eq!(resolved.status, haivemind_core::ContradictionStatus::Resolved);
    assert_eq!(resolved.resolved_by_strategy, Some(ContradictionStrategy::SourceTrust));
}

#[test]
fn usage_outcomes_feed_into_scoring_inputs() {
    let db = TestDatabaseManager::new_temp();
    let memory = db
        .storage
        .store(
            "restarting the worker pool clears the backlog".to_string(),
            "runbooks".to_string(),
            vec![],
            None,
            None,
            None,
            None,
            ConfidentialityLevel::Normal,
            false,
        )
        .unwrap();

    db.storage.record_usage_outcome(&memory.id, true).unwrap();
    db.storage.record_usage_outcome(&memory.id, true).unwrap();
    db.storage.record_usage_outcome(&memory.id, false).unwrap();

    let inputs = db.storage.scoring_inputs(&memory.id).unwrap();
    assert_eq!(inputs.usage_outcomes.len(), 3);
}
