//! Sync Service (SS) - discover peers, exchange memory deltas, resolve
//! conflicts using the vector clock, propagate deletions.

pub mod protocol;
pub mod resolve;

pub use protocol::{
    PeerConfig, PullRequest, PullResponse, PushOutcome, PushRequest, PushResponse, StatusRequest,
    StatusResponse, SubscribeRequest,
};
pub use resolve::{resolve, ConflictSide, Resolution};

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Duration;

use crate::clock::VectorClock;
use crate::memory::ConfidentialityLevel;

/// Grace period peers must suppress concurrent updates for a purged id, to
/// avoid resurrecting a hard-deleted memory (§4.3).
pub const PURGE_TOMBSTONE_GRACE_DAYS: i64 = 7;

/// Bounded in-flight outbound queue depth per peer before `push` returns
/// `TryAgainLater` (§4.3 backpressure).
pub const MAX_INFLIGHT_PER_PEER: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("unknown peer: {0}")]
    UnknownPeer(String),
    #[error("peer busy, try again later")]
    TryAgainLater,
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Whether a memory at the given confidentiality level may be sent to a
/// given peer. `pii` never leaves the node; `confidential` never leaves the
/// node; `internal` only to peers explicitly marked internal.
pub fn confidentiality_allows_outbound(level: ConfidentialityLevel, peer: &PeerConfig) -> bool {
    match level {
        ConfidentialityLevel::Pii | ConfidentialityLevel::Confidential => false,
        ConfidentialityLevel::Internal => peer.internal,
        ConfidentialityLevel::Normal => true,
    }
}

/// Tracks per-peer sync state: known peers, last-seen clocks, tombstones
/// still within their resurrection-suppression grace period, and a bounded
/// in-flight counter per peer for backpressure.
pub struct SyncService {
    peers: HashMap<String, PeerConfig>,
    state: Mutex<SyncState>,
}

#[derive(Default)]
struct SyncState {
    last_known_peer_clocks: HashMap<String, VectorClock>,
    tombstones: HashMap<String, chrono::DateTime<chrono::Utc>>,
    inflight: HashMap<String, usize>,
}

impl SyncService {
    pub fn new(peers: Vec<PeerConfig>) -> Self {
        Self {
            peers: peers.into_iter().map(|p| (p.machine_id.clone(), p)).collect(),
            state: Mutex::new(SyncState::default()),
        }
    }

    pub fn peer(&self, machine_id: &str) -> Option<&PeerConfig> {
        self.peers.get(machine_id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerConfig> {
        self.peers.values()
    }

    pub fn record_peer_clock(&self, machine_id: &str, clock: VectorClock) {
        self.state
            .lock()
            .expect("sync state lock poisoned")
            .last_known_peer_clocks
            .insert(machine_id.to_string(), clock);
    }

    pub fn peer_clock(&self, machine_id: &str) -> Option<VectorClock> {
        self.state
            .lock()
            .expect("sync state lock poisoned")
            .last_known_peer_clocks
            .get(machine_id)
            .cloned()
    }

    /// Record a purge tombstone, starting its resurrection-suppression window.
    pub fn record_tombstone(&self, memory_id: &str, purged_at: chrono::DateTime<chrono::Utc>) {
        self.state
            .lock()
            .expect("sync state lock poisoned")
            .tombstones
            .insert(memory_id.to_string(), purged_at);
    }

    /// Whether an incoming concurrent update for `memory_id` should be
    /// suppressed because it falls within the tombstone's grace period.
    pub fn tombstone_suppresses(&self, memory_id: &str, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.state
            .lock()
            .expect("sync state lock poisoned")
            .tombstones
            .get(memory_id)
            .is_some_and(|purged_at| now - *purged_at < Duration::days(PURGE_TOMBSTONE_GRACE_DAYS))
    }

    /// Try to reserve an in-flight outbound slot for `peer`; callers must
    /// release it (`release_slot`) once the send completes or fails.
    pub fn try_reserve_slot(&self, peer_machine_id: &str) -> Result<()> {
        if !self.peers.contains_key(peer_machine_id) {
            return Err(SyncError::UnknownPeer(peer_machine_id.to_string()));
        }
        let mut state = self.state.lock().expect("sync state lock poisoned");
        let count = state.inflight.entry(peer_machine_id.to_string()).or_insert(0);
        if *count >= MAX_INFLIGHT_PER_PEER {
            return Err(SyncError::TryAgainLater);
        }
        *count += 1;
        Ok(())
    }

    pub fn release_slot(&self, peer_machine_id: &str) {
        let mut state = self.state.lock().expect("sync state lock poisoned");
        if let Some(count) = state.inflight.get_mut(peer_machine_id) {
            *count = count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(machine_id: &str, internal: bool) -> PeerConfig {
        PeerConfig {
            machine_id: machine_id.to_string(),
            endpoint: format!("http://{machine_id}.local:8899"),
            internal,
        }
    }

    #[test]
    fn pii_and_confidential_never_go_outbound() {
        let p = peer("b", true);
        assert!(!confidentiality_allows_outbound(ConfidentialityLevel::Pii, &p));
        assert!(!confidentiality_allows_outbound(ConfidentialityLevel::Confidential, &p));
    }

    #[test]
    fn internal_requires_internal_peer_flag() {
        assert!(confidentiality_allows_outbound(ConfidentialityLevel::Internal, &peer("b", true)));
        assert!(!confidentiality_allows_outbound(ConfidentialityLevel::Internal, &peer("b", false)));
    }

    #[test]
    fn normal_always_allowed() {
        assert!(confidentiality_allows_outbound(ConfidentialityLevel::Normal, &peer("b", false)));
    }

    #[test]
    fn backpressure_caps_inflight_per_peer() {
        let service = SyncService::new(vec![peer("b", false)]);
        for _ in 0..MAX_INFLIGHT_PER_PEER {
            service.try_reserve_slot("b").unwrap();
        }
        assert!(matches!(service.try_reserve_slot("b"), Err(SyncError::TryAgainLater)));
        service.release_slot("b");
        assert!(service.try_reserve_slot("b").is_ok());
    }

    #[test]
    fn tombstone_suppresses_within_grace_period() {
        let service = SyncService::new(vec![]);
        let now = chrono::Utc::now();
        service.record_tombstone("m1", now);
        assert!(service.tombstone_suppresses("m1", now + Duration::days(1)));
        assert!(!service.tombstone_suppresses("m1", now + Duration::days(8)));
    }
}
