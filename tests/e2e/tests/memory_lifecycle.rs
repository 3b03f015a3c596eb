//! Store/retrieve/update/soft-delete/recover/purge round trips through the
//! Memory Engine's public `Storage` API.

use haivemind_core::{Category, ConfidentialityLevel, MemoryFilters, SearchMode};
use haivemind_e2e_tests::harness::db_manager::TestDatabaseManager;

#[test]
fn store_then_retrieve_round_trips() {
    let db = TestDatabaseManager::new_temp();

    let stored = db
        .storage
        .store(
            "Deploys go through the blue/green pipeline".to_string(),
            "infrastructure".to_string(),
            vec!["deploys".to_string()],
            Some("onboarding doc".to_string()),
            Some("proj-1".to_string()),
            None,
            Some("agent-a".to_string()),
            ConfidentialityLevel::Internal,
            false,
        )
        .expect("store should succeed");

    let fetched = db.storage.retrieve(&stored.id).expect("retrieve should succeed");
    let fetched = fetched.expect("memory should exist");
    assert_eq!(fetched.content, "Deploys go through the blue/green pipeline");
    assert_eq!(fetched.category, Category::Infrastructure);
    assert_eq!(fetched.confidentiality_level, ConfidentialityLevel::Internal);
}

#[test]
fn dedupe_returns_existing_memory_on_exact_content_match() {
    let db = TestDatabaseManager::new_temp();

    let first = db
        .storage
        .store(
            "the cache TTL is 30 minutes".to_string(),
            "infrastructure".to_string(),
            vec![],
            None,
            None,
            None,
            None,
            ConfidentialityLevel::Normal,
            true,
        )
        .unwrap();

    let second = db
        .storage
        .store(
            "the cache TTL is 30 minutes".to_string(),
            "infrastructure".to_string(),
            vec![],
            None,
            None,
            None,
            None,
            ConfidentialityLevel::Normal,
            true,
        )
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(db.live_count(), 1);
}

#[test]
fn soft_delete_then_recover_restores_the_memory() {
    let db = TestDatabaseManager::new_temp();
    let ids = db.seed_memories(1);
    let id = &ids[0];

    let deleted = db.storage.delete(id, Some("agent-a".to_string()), Some("stale".to_string()), 30).unwrap();
    assert!(!deleted.deletion_state.is_live());
    assert_eq!(db.live_count(), 0);

    let recovered = db.storage.recover(id).unwrap();
    assert!(recovered.deletion_state.is_live());
    assert_eq!(db.live_count(), 1);
}

#[test]
fn gdpr_delete_purges_every_memory_for_the_subject() {
    let db = TestDatabaseManager::new_temp();
    let store = |content: &str, project_id: &str| {
        db.storage
            .store(
                content.to_string(),
                "project".to_string(),
                vec![],
                None,
                Some(project_id.to_string()),
                None,
                None,
                ConfidentialityLevel::Normal,
                false,
            )
            .unwrap()
    };

    store("first fact about proj-x", "proj-x");
    let second = store("second fact about proj-x", "proj-x");
    store("unrelated to proj-x", "proj-y");

    let purged = db.storage.gdpr_delete("proj-x").unwrap();
    assert_eq!(purged, 2);
    assert!(db.storage.recover(&second.id).is_err());
    assert_eq!(db.live_count(), 1);
}

#[test]
fn gdpr_export_returns_every_memory_for_the_subject() {
    let db = TestDatabaseManager::new_temp();
    db.storage
        .store(
            "proj-x fact".to_string(),
            "project".to_string(),
            vec![],
            None,
            Some("proj-x".to_string()),
            None,
            None,
            ConfidentialityLevel::Normal,
            false,
        )
        .unwrap();
    db.storage
        .store(
            "other subject's fact".to_string(),
            "project".to_string(),
            vec![],
            None,
            None,
            Some("user-z".to_string()),
            None,
            ConfidentialityLevel::Normal,
            false,
        )
        .unwrap();

    let exported = db.storage.gdpr_export("proj-x").unwrap();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].content, "proj-x fact");

    assert!(db.storage.gdpr_export("no-such-subject").is_err());
}

#[test]
fn bulk_delete_respects_category_filter() {
    let db = TestDatabaseManager::new_temp();
    db.seed_diverse(2);
    assert_eq!(db.live_count(), 10);

    let filters = MemoryFilters { category: Some(Category::Security), ..Default::default() };
    let deleted = db.storage.bulk_delete(&filters, Some("agent-a".to_string()), Some("cleanup".to_string()), 30).unwrap();

    assert_eq!(deleted.len(), 2);
    assert_eq!(db.live_count(), 8);
}

#[test]
fn lexical_search_finds_seeded_content() {
    let db = TestDatabaseManager::new_temp();
    db.storage
        .store(
            "the incident runbook lives in the ops repo".to_string(),
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

    let hits = db.storage.search("incident runbook", SearchMode::Lexical, 10, 0.7, "test-machine").unwrap();
    assert!(!hits.is_empty());
}
