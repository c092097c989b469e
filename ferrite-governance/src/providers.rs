//! Interfaces of the node subsystems the governance manager depends on.
//!
//! The manager owns none of these: the blockchain view, masternode list,
//! peer connections, content-store daemon, and signal bus are all
//! provided by the embedding node and mocked in tests.

use thiserror::Error;

use ferrite_shared_types::governance::{GovernanceObject, GovernanceVote};
use ferrite_shared_types::masternode::MasternodeList;
use ferrite_shared_types::p2p::{GovernanceMessage, Inv, PeerId};
use ferrite_shared_types::{ConsensusParams, Hash};

/// Snapshot of one peer connection, as handed out by the connection
/// manager.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub id: PeerId,
    /// Printable network address, also the key for per-address request
    /// cooldowns.
    pub addr: String,
    /// Negotiated protocol version.
    pub version: u32,
    pub inbound: bool,
    /// True for short-lived masternode service connections.
    pub masternode: bool,
}

/// Where and how deep an object's collateral transaction is buried.
#[derive(Debug, Clone, Copy)]
pub struct CollateralInfo {
    pub confirmations: u32,
    /// Height of the containing block.
    pub block_height: u32,
    /// Hash of the containing block.
    pub block_hash: Hash,
}

/// Read-only view of the blockchain and node sync state.
pub trait ChainClient: Send + Sync {
    /// Network-adjusted wall clock, seconds.
    fn adjusted_time(&self) -> i64;
    fn now_millis(&self) -> i64;
    fn tip_height(&self) -> u32;
    fn block_time_at(&self, height: u32) -> Option<i64>;
    /// Lookup of an object's collateral transaction; `None` when the
    /// transaction is unknown (treated as insufficient confirmations,
    /// never as a hard rejection).
    fn collateral_info(&self, tx_hash: &Hash) -> Option<CollateralInfo>;
    fn consensus_params(&self) -> ConsensusParams;
    fn is_blockchain_synced(&self) -> bool;
    fn is_synced(&self) -> bool;
    /// Whether deterministic masternode rules are in force at `height`.
    fn is_deterministic_mns_active(&self, height: u32) -> bool;
    /// True when this node runs as a masternode.
    fn masternode_mode(&self) -> bool;
    fn shutdown_requested(&self) -> bool;
}

/// Source of the authoritative masternode list.
pub trait MasternodeListProvider: Send + Sync {
    fn list_at_tip(&self) -> MasternodeList;
}

/// Per-masternode governance metadata kept by the masternode manager.
pub trait MasternodeMetaStore: Send + Sync {
    /// Hashes of objects whose votes must be cleared and re-derived,
    /// cleared on read.
    fn take_dirty_governance_hashes(&self) -> Vec<Hash>;
    fn remove_governance_object(&self, hash: &Hash);
}

/// The superblock trigger subsystem.
pub trait TriggerManager: Send + Sync {
    /// Register a trigger object; false means the trigger was rejected
    /// and the object should be marked for deletion.
    fn add_new_trigger(&self, hash: Hash) -> bool;
    /// Drop expired or invalid triggers.
    fn clean_and_remove(&self);
    fn execute_best_superblock(&self, height: u32);
}

/// Outbound peer messaging and misbehavior scoring.
pub trait ConnectionManager: Send + Sync {
    fn push_message(&self, peer: PeerId, message: GovernanceMessage);
    /// Drop a pending ask-for entry once the data arrived.
    fn remove_ask_for(&self, hash: &Hash);
    fn fully_connected_peers(&self) -> Vec<PeerInfo>;
    /// Schedule a getdata-style request against one peer.
    fn ask_for(&self, peer: PeerId, inv: Inv);
    /// Queue an inventory announcement for one peer.
    fn push_inventory(&self, peer: PeerId, inv: Inv);
    /// Current depth of the peer's ask-for queue, for backpressure.
    fn ask_for_queue_len(&self, peer: PeerId) -> usize;
    fn misbehaving(&self, peer: PeerId, score: i32);
}

#[derive(Debug, Clone, Error)]
#[error("content store: {0}")]
pub struct ContentStoreError(pub String);

/// External content-store daemon used to pin record payloads.
pub trait ContentStore: Send + Sync {
    /// List a directory; returns the daemon's JSON listing with `Size`
    /// fields at arbitrary depth.
    fn list(&self, path: &str) -> Result<serde_json::Value, ContentStoreError>;
    fn pin_recursive(&self, path: &str) -> Result<(), ContentStoreError>;
    fn unpin_recursive(&self, path: &str) -> Result<(), ContentStoreError>;
}

/// Signal bus notifying non-core subscribers of admitted data.
pub trait GovernanceSignals: Send + Sync {
    fn notify_governance_object(&self, object: &GovernanceObject);
    fn notify_governance_vote(&self, vote: &GovernanceVote);
}
