//! Wire types for the peer sync RPC (§4.3, bound to transports in §6).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::bus::SyncEvent;
use crate::clock::VectorClock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub machine_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub machine_id: String,
    pub vector_clock: VectorClock,
    pub last_known_peer_clocks: BTreeMap<String, VectorClock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub since_clock: VectorClock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub events: Vec<SyncEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub events: Vec<SyncEvent>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    Accepted,
    Duplicate,
    Conflict,
    TryAgainLater,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub outcomes: Vec<PushOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub machine_id: String,
}

/// A configured sync peer, loaded from `sync.peers` in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConfig {
    pub machine_id: String,
    pub endpoint: String,
    /// Whether `internal`-confidentiality memories may be sent to this peer.
    #[serde(default)]
    pub internal: bool,
}
