//! Ferrite Coin governance object manager.
//!
//! Maintains the replicated store of governance objects (proposals,
//! records, triggers) and their masternode votes: ingestion and
//! validation of peer submissions, orphan and postponed queues, per-peer
//! sync, per-masternode rate limiting, reactive vote invalidation on
//! masternode list changes, chain-driven eviction, and content-store
//! pinning for record payloads.

pub mod cache;
pub mod chain_tip;
pub mod content_pinning;
pub mod error;
pub mod ingest;
pub mod maintenance;
pub mod manager;
pub mod object;
pub mod proposal_validation;
pub mod providers;
pub mod rate_limiter;
pub mod store;
pub mod sync;

pub use cache::{CappedMap, CappedMultiMap};
pub use content_pinning::{lax_content_check, valid_content_id};
pub use error::{GovernanceError, Severity};
pub use manager::{GovernanceManager, GovernanceSnapshot, SERIALIZATION_VERSION};
pub use object::{GovernanceObjectState, LocalValidity, VoteFile};
pub use proposal_validation::{ProposalValidationError, ProposalValidator};
pub use providers::{
    ChainClient, CollateralInfo, ConnectionManager, ContentStore, ContentStoreError,
    GovernanceSignals, MasternodeListProvider, MasternodeMetaStore, PeerInfo, TriggerManager,
};
pub use rate_limiter::{MasternodeRateLimiter, RateCheckBuffer, RateCheckResult};

/// Capacity of each capped vote cache (live index, invalid set, orphans).
pub const MAX_CACHE_SIZE: usize = 1_000_000;

/// Submissions timestamped further than this into the future are rejected.
pub const MAX_TIME_FUTURE_DEVIATION: i64 = 60 * 60;

/// Margin after which a freshly-created object is assumed to have reached
/// the whole network and no longer needs an extra relay pass.
pub const RELIABLE_PROPAGATION_TIME: i64 = 60;

/// How long orphan objects and votes wait for their dependency.
pub const GOVERNANCE_ORPHAN_EXPIRATION_TIME: i64 = 600;

/// Grace period between an object being flagged for deletion and its
/// eviction from the live store.
pub const GOVERNANCE_DELETION_DELAY: i64 = 600;

/// Confirmations a collateral transaction needs before its object is
/// admitted.
pub const GOVERNANCE_FEE_CONFIRMATIONS: u32 = 6;

/// Minimum seconds between successive vote updates by the same voter on
/// the same signal.
pub const GOVERNANCE_UPDATE_MIN: i64 = 60 * 60;

/// False positive rate of the vote sync Bloom filter.
pub const GOVERNANCE_FILTER_FP_RATE: f64 = 0.001;

/// Peers below this protocol version are rejected from governance sync.
pub const MIN_GOVERNANCE_PEER_PROTO_VERSION: u32 = 70213;

/// Bloom-filtered vote requests are honoured from this version on.
pub const GOVERNANCE_FILTER_PROTO_VERSION: u32 = 70206;

/// At most this many orphan objects are held per submitting masternode.
pub const MAX_ORPHAN_OBJECTS_PER_MASTERNODE: u32 = 10;

/// Upper bound on a peer's ask-for queue before we stop scheduling vote
/// requests against it.
pub const ASK_FOR_QUEUE_MAX: usize = 100_000;

/// How long a (hash, peer) vote request stays on cooldown.
pub const VOTE_REQUEST_TIMEOUT: i64 = 60 * 60;

/// How many peers are asked for the same object's votes at most.
pub const VOTE_REQUEST_PEERS_PER_HASH: usize = 3;

/// Directory payloads above this total size are not pinned.
pub const CONTENT_PIN_SIZE_LIMIT: i64 = 10_000_000;
