//! The peer data model: liveness state and the snapshot exposed to callers.

use std::time::{Duration, Instant};

use pnet::util::MacAddr;

/// Online/offline lifecycle state of a peer, as tracked by the presence
/// manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Online,
    Offline,
}

/// Internal bookkeeping kept per peer by the presence manager. Not exposed
/// directly; `Engine::list_peers` hands out `PeerInfo` snapshots instead.
#[derive(Debug, Clone)]
pub(crate) struct PeerRecord {
    pub name: String,
    pub last_seen: Instant,
    pub state: PeerState,
}

/// A point-in-time snapshot of one peer, as returned by `Engine::list_peers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub mac: MacAddr,
    pub name: String,
    pub state: PeerState,
    /// How long ago this peer was last heard from.
    pub last_seen: Duration,
}
