//! Test storage manager
//!
//! Provides isolated `Storage` instances for testing, seeded the way real
//! agents would populate them.

use std::path::PathBuf;

use haivemind_core::{ConfidentialityLevel, Storage};
use tempfile::TempDir;

/// Isolated storage instance backed by a temp dir; cleaned up on drop.
pub struct TestDatabaseManager {
    pub storage: Storage,
    _temp_dir: TempDir,
    db_path: PathBuf,
}

impl TestDatabaseManager {
    pub fn new_temp() -> Self {
        Self::new_temp_for_machine("test-machine")
    }

    pub fn new_temp_for_machine(machine_id: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let db_path = temp_dir.path().join("test_haivemind.db");
        let storage =
            Storage::new(Some(db_path.clone()), machine_id.to_string()).expect("failed to create test storage");

        Self { storage, _temp_dir: temp_dir, db_path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.db_path
    }

    pub fn is_empty(&self) -> bool {
        self.storage.stats().map(|s| s.total_live == 0).unwrap_or(true)
    }

    pub fn live_count(&self) -> i64 {
        self.storage.stats().map(|s| s.total_live).unwrap_or(0)
    }

    /// Store `count` plain facts, round-robining across five tags.
    pub fn seed_memories(&self, count: usize) -> Vec<String> {
        (0..count)
            .filter_map(|i| {
                self.storage
                    .store(
                        format!("Test memory content {i}"),
                        "project".to_string(),
                        vec![format!("test-{}", i % 5)],
                        None,
                        None,
                        None,
                        Some("seed-agent".to_string()),
                        ConfidentialityLevel::Normal,
                        false,
                    )
                    .ok()
                    .map(|m| m.id)
            })
            .collect()
    }

    /// Store one memory per category, for tests that exercise `by_category`
    /// stats or category-filtered search.
    pub fn seed_diverse(&self, count_per_category: usize) -> Vec<String> {
        let categories = ["project", "infrastructure", "incidents", "patterns", "security"];
        let mut ids = Vec::with_capacity(count_per_category * categories.len());

        for category in categories {
            for i in 0..count_per_category {
                if let Ok(memory) = self.storage.store(
                    format!("Test {category} content {i}"),
                    category.to_string(),
                    vec![category.to_string()],
                    None,
                    None,
                    None,
                    Some("seed-agent".to_string()),
                    ConfidentialityLevel::Normal,
                    false,
                ) {
                    ids.push(memory.id);
                }
            }
        }

        ids
    }
}
