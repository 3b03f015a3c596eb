//! Agent Registry liveness/delegation and Sync Service bookkeeping.

use std::collections::HashSet;

use chrono::{Duration, Utc};
use haivemind_core::{
    confidentiality_allows_outbound, AgentRegistry, AgentStatus, ConfidentialityLevel, PeerConfig, RosterFilter,
    SyncService, Task, TaskStatus,
};

fn capability_set(caps: &[&str]) -> HashSet<String> {
    caps.iter().map(|c| c.to_string()).collect()
}

#[test]
fn register_then_roster_reflects_the_agent() {
    let registry = AgentRegistry::new();
    registry.register("agent-a", "reviewer", capability_set(&["code-review"]), None, "node-a");

    let roster = registry.roster(&RosterFilter::default());
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].agent_id, "agent-a");
    assert_eq!(roster[0].status, AgentStatus::Active);
}

#[test]
fn roster_filters_by_capability() {
    let registry = AgentRegistry::new();
    registry.register("agent-a", "reviewer", capability_set(&["code-review"]), None, "node-a");
    registry.register("agent-b", "deployer", capability_set(&["deploy"]), None, "node-a");

    let filter = RosterFilter { capability: Some("deploy".to_string()), ..Default::default() };
    let roster = registry.roster(&filter);

    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].agent_id, "agent-b");
}

#[test]
fn sweep_stale_drops_agents_with_no_recent_heartbeat() {
    let registry = AgentRegistry::new();
    registry.register("agent-a", "reviewer", HashSet::new(), None, "node-a");

    let far_future = Utc::now() + Duration::hours(1);
    let stale = registry.sweep_stale(far_future);

    assert_eq!(stale, vec!["agent-a".to_string()]);
    assert!(registry.roster(&RosterFilter::default()).is_empty());
}

#[test]
fn delegate_assigns_to_the_capable_agent() {
    let registry = AgentRegistry::new();
    registry.register("agent-a", "deployer", capability_set(&["deploy"]), None, "node-a");

    let task = Task {
        task_id: "t1".to_string(),
        requester_agent_id: Some("agent-b".to_string()),
        requester_machine_id: "node-a".to_string(),
        required_capabilities: capability_set(&["deploy"]),
        category: "infrastructure".to_string(),
        description: "roll out v2".to_string(),
        local_only: false,
        status: TaskStatus::Pending,
        assigned_agent_id: None,
        created_at: Utc::now(),
        attempt: 0,
        declined_agent_ids: HashSet::new(),
        retry_after: None,
    };

    let assigned = registry.delegate(task).unwrap();
    assert_eq!(assigned.assigned_agent_id.as_deref(), Some("agent-a"));
    assert_eq!(assigned.status, TaskStatus::Offered);
}

#[test]
fn decline_falls_back_to_the_next_capable_agent() {
    let registry = AgentRegistry::new();
    registry.register("agent-a", "deployer", capability_set(&["deploy"]), None, "node-a");
    registry.register("agent-b", "deployer", capability_set(&["deploy"]), None, "node-a");

    let task = Task {
        task_id: "t1".to_string(),
        requester_agent_id: Some("agent-c".to_string()),
        requester_machine_id: "node-a".to_string(),
        required_capabilities: capability_set(&["deploy"]),
        category: "infrastructure".to_string(),
        description: "roll out v2".to_string(),
        local_only: false,
        status: TaskStatus::Pending,
        assigned_agent_id: None,
        created_at: Utc::now(),
        attempt: 0,
        declined_agent_ids: HashSet::new(),
        retry_after: None,
    };

    let offered = registry.delegate(task).unwrap();
    let first = offered.assigned_agent_id.clone().unwrap();

    let after_decline = registry.decline("t1", &first).unwrap();
    assert_eq!(after_decline.status, TaskStatus::Offered);
    assert_ne!(after_decline.assigned_agent_id.as_deref(), Some(first.as_str()));

    let second = after_decline.assigned_agent_id.clone().unwrap();
    let after_both_decline = registry.decline("t1", &second).unwrap();
    assert_eq!(after_both_decline.status, TaskStatus::Pending);
    assert!(after_both_decline.retry_after.is_some());
    assert!(registry.retry_pending(Utc::now()).is_empty());
}

#[test]
fn confidentiality_gate_blocks_pii_and_confidential_to_every_peer() {
    let peer = PeerConfig { machine_id: "node-b".to_string(), endpoint: "http://node-b:8899".to_string(), internal: true };

    assert!(confidentiality_allows_outbound(ConfidentialityLevel::Normal, &peer));
    assert!(confidentiality_allows_outbound(ConfidentialityLevel::Internal, &peer));
    assert!(!confidentiality_allows_outbound(ConfidentialityLevel::Confidential, &peer));
    assert!(!confidentiality_allows_outbound(ConfidentialityLevel::Pii, &peer));
}

#[test]
fn sync_service_tracks_peer_clocks_and_tombstones() {
    use haivemind_core::VectorClock;

    let peers = vec![PeerConfig { machine_id: "node-b".to_string(), endpoint: "http://node-b:8899".to_string(), internal: false }];
    let sync = SyncService::new(peers);

    assert!(sync.peer_clock("node-b").is_none());
    sync.record_peer_clock("node-b", VectorClock::origin("node-b"));
    assert!(sync.peer_clock("node-b").is_some());

    let now = Utc::now();
    assert!(!sync.tombstone_suppresses("m1", now));
    sync.record_tombstone("m1", now);
    assert!(sync.tombstone_suppresses("m1", now));
}
