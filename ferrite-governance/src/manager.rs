//! The governance object manager: owned state, construction, accessors,
//! request discipline, persistence, and introspection.
//!
//! One non-recursive mutex guards every mutable field. Public methods
//! lock once; the private helpers in the sibling modules take the locked
//! state by `&mut` and never re-acquire.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use ferrite_shared_types::governance::{GovernanceObject, GovernanceVote, ObjectType};
use ferrite_shared_types::masternode::MasternodeList;
use ferrite_shared_types::p2p::{Inv, InvType, PeerId};
use ferrite_shared_types::{Hash, OutPoint};

use crate::cache::{CappedMap, CappedMultiMap};
use crate::error::GovernanceError;
use crate::object::GovernanceObjectState;
use crate::proposal_validation::ProposalValidator;
use crate::providers::{
    ChainClient, ContentStore, GovernanceSignals, MasternodeListProvider, MasternodeMetaStore,
    TriggerManager,
};
use crate::rate_limiter::MasternodeRateLimiter;
use crate::store::ObjectStore;
use crate::MAX_CACHE_SIZE;

/// Version tag of the on-disk manager state.
pub const SERIALIZATION_VERSION: &str = "CGovernanceManager-Version-15";

/// A governance object parked until its masternode appears.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanObjectEntry {
    pub object: GovernanceObjectState,
    pub expiration_time: i64,
    pub from_peer: PeerId,
}

/// A vote parked until its parent object arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrphanVoteEntry {
    pub vote: GovernanceVote,
    pub expiration_time: i64,
}

fn default_true() -> bool {
    true
}

/// Everything the manager mutates, guarded by one mutex.
#[derive(Serialize, Deserialize)]
pub(crate) struct ManagerState {
    /// Live governance objects by content hash.
    pub objects: ObjectStore,
    /// Objects awaiting collateral confirmations.
    pub postponed: HashMap<Hash, GovernanceObjectState>,
    /// Tombstones of evicted objects: hash -> retain-until time.
    pub erased: HashMap<Hash, i64>,
    /// Objects whose submitting masternode is not (yet) in the list.
    pub orphan_objects: HashMap<Hash, OrphanObjectEntry>,
    /// Orphan objects held per submitting masternode.
    pub orphan_counter: HashMap<OutPoint, u32>,
    /// Live vote index: vote hash -> parent object hash.
    pub vote_to_object: CappedMap<Hash, Hash>,
    /// Permanently rejected vote hashes.
    pub invalid_votes: CappedMap<Hash, ()>,
    /// Parent object hash -> votes waiting for it.
    pub orphan_votes: CappedMultiMap<Hash, OrphanVoteEntry>,
    pub rate_limiter: MasternodeRateLimiter,
    /// Masternode list snapshot the current vote set was validated
    /// against; diffed on every new tip.
    pub last_mn_list: MasternodeList,
    /// Object hashes scheduled for a second relay once their creation
    /// time becomes credible to other nodes.
    #[serde(skip)]
    pub additional_relay: HashSet<Hash>,
    #[serde(skip)]
    pub requested_objects: HashSet<Hash>,
    #[serde(skip)]
    pub requested_votes: HashSet<Hash>,
    /// Peers (by address) that already pulled the full object list this
    /// session.
    #[serde(skip)]
    pub full_sync_peers: HashSet<String>,
    /// Vote-request cooldowns: object hash -> peer address -> retry-at.
    #[serde(skip)]
    pub asked_recently: HashMap<Hash, HashMap<String, i64>>,
    #[serde(skip, default = "default_true")]
    pub rate_checks_enabled: bool,
    #[serde(skip)]
    pub cached_height: u32,
}

impl ManagerState {
    fn new() -> Self {
        ManagerState {
            objects: ObjectStore::new(),
            postponed: HashMap::new(),
            erased: HashMap::new(),
            orphan_objects: HashMap::new(),
            orphan_counter: HashMap::new(),
            vote_to_object: CappedMap::new(MAX_CACHE_SIZE),
            invalid_votes: CappedMap::new(MAX_CACHE_SIZE),
            orphan_votes: CappedMultiMap::new(MAX_CACHE_SIZE),
            rate_limiter: MasternodeRateLimiter::new(),
            last_mn_list: MasternodeList::default(),
            additional_relay: HashSet::new(),
            requested_objects: HashSet::new(),
            requested_votes: HashSet::new(),
            full_sync_peers: HashSet::new(),
            asked_recently: HashMap::new(),
            rate_checks_enabled: true,
            cached_height: 0,
        }
    }

    /// Consume one previously recorded request for `hash`; false means
    /// the data was never asked for (or already delivered once).
    pub fn accept_message(set: &mut HashSet<Hash>, hash: &Hash) -> bool {
        set.remove(hash)
    }

    /// Run `f` with rate checks off, restoring the previous setting on
    /// the way out.
    pub fn with_rate_checks_disabled<R>(&mut self, f: impl FnOnce(&mut ManagerState) -> R) -> R {
        let previous = self.rate_checks_enabled;
        self.rate_checks_enabled = false;
        let result = f(self);
        self.rate_checks_enabled = previous;
        result
    }
}

/// Counts reported by [`GovernanceManager::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceSnapshot {
    pub objects_total: usize,
    pub proposals: usize,
    pub records: usize,
    pub triggers: usize,
    pub other: usize,
    pub erased: usize,
    pub votes: usize,
}

/// The governance object manager. Construct one at startup and share it
/// behind `Arc`; all entry points take `&self`.
pub struct GovernanceManager {
    pub(crate) chain: Arc<dyn ChainClient>,
    pub(crate) mn_provider: Arc<dyn MasternodeListProvider>,
    pub(crate) mn_meta: Arc<dyn MasternodeMetaStore>,
    pub(crate) triggers: Arc<dyn TriggerManager>,
    pub(crate) content_store: Arc<dyn ContentStore>,
    pub(crate) signals: Arc<dyn GovernanceSignals>,
    pub(crate) validator: ProposalValidator,
    pub(crate) state: Mutex<ManagerState>,
}

impl GovernanceManager {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        mn_provider: Arc<dyn MasternodeListProvider>,
        mn_meta: Arc<dyn MasternodeMetaStore>,
        triggers: Arc<dyn TriggerManager>,
        content_store: Arc<dyn ContentStore>,
        signals: Arc<dyn GovernanceSignals>,
    ) -> Self {
        GovernanceManager {
            chain,
            mn_provider,
            mn_meta,
            triggers,
            content_store,
            signals,
            validator: ProposalValidator::default(),
            state: Mutex::new(ManagerState::new()),
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap()
    }

    pub fn have_object_for_hash(&self, hash: &Hash) -> bool {
        let state = self.lock_state();
        state.objects.contains(hash) || state.postponed.contains_key(hash)
    }

    pub fn have_vote_for_hash(&self, vote_hash: &Hash) -> bool {
        let state = self.lock_state();
        match state.vote_to_object.get(vote_hash) {
            Some(parent) => state
                .objects
                .find(parent)
                .map(|obj| obj.vote_file.has_vote(vote_hash))
                .unwrap_or(false),
            None => false,
        }
    }

    pub fn vote_count(&self) -> usize {
        self.lock_state().vote_to_object.size()
    }

    pub fn object_count(&self) -> usize {
        self.lock_state().objects.len()
    }

    pub fn orphan_vote_count(&self) -> usize {
        self.lock_state().orphan_votes.size()
    }

    pub fn postponed_count(&self) -> usize {
        self.lock_state().postponed.len()
    }

    /// How long an evicted object's tombstone is retained, if present.
    pub fn erased_retain_until(&self, hash: &Hash) -> Option<i64> {
        self.lock_state().erased.get(hash).copied()
    }

    /// Canonical bytes of a live or postponed object, for relay.
    pub fn serialize_object_for_hash(&self, hash: &Hash) -> Option<Vec<u8>> {
        let state = self.lock_state();
        let object = state
            .objects
            .find(hash)
            .or_else(|| state.postponed.get(hash))?;
        bincode::serialize(&object.object).ok()
    }

    /// Canonical bytes of a known vote, for relay.
    pub fn serialize_vote_for_hash(&self, vote_hash: &Hash) -> Option<Vec<u8>> {
        let state = self.lock_state();
        let parent = state.vote_to_object.get(vote_hash)?;
        let vote = state.objects.find(parent)?.vote_file.get_vote(vote_hash)?;
        bincode::serialize(vote).ok()
    }

    pub fn get_object(&self, hash: &Hash) -> Option<GovernanceObjectState> {
        self.lock_state().objects.find(hash).cloned()
    }

    /// Wire objects created at or after `time`.
    pub fn all_newer_than(&self, time: i64) -> Vec<GovernanceObject> {
        self.lock_state()
            .objects
            .all_newer_than(time)
            .into_iter()
            .map(|obj| obj.object.clone())
            .collect()
    }

    /// Current vote stances on one object, optionally restricted to a
    /// single masternode collateral.
    pub fn current_votes(
        &self,
        parent_hash: &Hash,
        outpoint_filter: Option<&OutPoint>,
    ) -> Vec<GovernanceVote> {
        self.lock_state()
            .objects
            .find(parent_hash)
            .map(|obj| obj.current_votes(outpoint_filter))
            .unwrap_or_default()
    }

    /// Does any live object carry `cid` as its content id?
    pub fn is_cid_duplicate(&self, cid: &str) -> bool {
        let state = self.lock_state();
        let found = state.objects.iter().any(|(_, obj)| {
            crate::content_pinning::extract_content_id(&obj.object).as_deref() == Some(cid)
        });
        found
    }

    /// Block that buried an object's collateral, if known.
    pub fn collateral_block_hash(&self, collateral_hash: &Hash) -> Option<Hash> {
        match self.chain.collateral_info(collateral_hash) {
            Some(info) => Some(info.block_hash),
            None => {
                info!("collateral_block_hash -- can't get transaction");
                None
            }
        }
    }

    /// Record that we are about to request `inv` from a peer. Returns
    /// false when the data is already held or the request should not be
    /// made; the matching delivery is accepted exactly once.
    pub fn confirm_inventory_request(&self, inv: &Inv) -> bool {
        if !self.chain.is_blockchain_synced() {
            return false;
        }
        let mut state = self.lock_state();
        debug!("confirm_inventory_request -- inv = {}", inv);

        match inv.inv_type {
            InvType::GovernanceObject => {
                if state.objects.contains(&inv.hash) || state.postponed.contains_key(&inv.hash) {
                    debug!("confirm_inventory_request -- already have governance object");
                    return false;
                }
                state.requested_objects.insert(inv.hash);
            }
            InvType::GovernanceObjectVote => {
                if state.vote_to_object.has_key(&inv.hash) {
                    debug!("confirm_inventory_request -- already have governance vote");
                    return false;
                }
                state.requested_votes.insert(inv.hash);
            }
        }
        true
    }

    /// Whether a trigger from this object's masternode would currently
    /// pass the submission rate check. Does not mark failure status.
    pub fn masternode_rate_check(&self, object: &GovernanceObject) -> bool {
        let params = self.chain.consensus_params();
        let mut state = self.lock_state();
        let enabled = state.rate_checks_enabled;
        state
            .rate_limiter
            .check(
                object,
                false,
                true,
                enabled,
                self.chain.is_synced(),
                self.chain.adjusted_time(),
                params.superblock_cycle_seconds(),
            )
            .ok
    }

    pub fn snapshot(&self) -> GovernanceSnapshot {
        let state = self.lock_state();
        let mut snapshot = GovernanceSnapshot {
            objects_total: state.objects.len(),
            proposals: 0,
            records: 0,
            triggers: 0,
            other: 0,
            erased: state.erased.len(),
            votes: state.vote_to_object.size(),
        };
        for (_, obj) in state.objects.iter() {
            match obj.object_type() {
                ObjectType::Proposal => snapshot.proposals += 1,
                ObjectType::Record => snapshot.records += 1,
                ObjectType::Trigger => snapshot.triggers += 1,
                ObjectType::Other => snapshot.other += 1,
            }
        }
        snapshot
    }

    pub fn to_display_string(&self) -> String {
        let s = self.snapshot();
        format!(
            "Governance Objects: {} (Proposals: {}, Records: {}, Triggers: {}, Other: {}; Erased: {}), Votes: {}",
            s.objects_total, s.proposals, s.records, s.triggers, s.other, s.erased, s.votes
        )
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }

    /// Serialize the whole manager state under the version tag.
    pub fn serialize(&self) -> Result<Vec<u8>, GovernanceError> {
        let state = self.lock_state();
        bincode::serialize(&(SERIALIZATION_VERSION, &*state))
            .map_err(|err| GovernanceError::internal(format!("serialize failed: {}", err)))
    }

    /// Replace the manager state from serialized bytes. Call
    /// [`GovernanceManager::init_on_load`] afterwards to rebuild the
    /// derived indexes.
    pub fn restore(&self, bytes: &[u8]) -> Result<(), GovernanceError> {
        let (version, new_state): (String, ManagerState) = bincode::deserialize(bytes)
            .map_err(|err| GovernanceError::internal(format!("deserialize failed: {}", err)))?;
        if version != SERIALIZATION_VERSION {
            return Err(GovernanceError::internal(format!(
                "unexpected serialization version: {}",
                version
            )));
        }
        *self.lock_state() = new_state;
        Ok(())
    }

    /// Post-load fixup: rebuild the vote index from the vote files and
    /// re-register cached triggers.
    pub fn init_on_load(&self) {
        let start = self.chain.now_millis();
        info!("Preparing governance indexes and cached triggers...");
        {
            let mut state = self.lock_state();
            self.rebuild_indexes(&mut state);
            self.add_cached_triggers(&mut state);
        }
        info!(
            "Governance indexes and cached triggers prepared  {}ms",
            self.chain.now_millis() - start
        );
        info!("     {}", self.to_display_string());
    }

    /// Reconstruct the vote index from the embedded vote files.
    pub(crate) fn rebuild_indexes(&self, state: &mut ManagerState) {
        state.vote_to_object.clear();
        for hash in state.objects.hashes() {
            let Some(object) = state.objects.find(&hash) else {
                continue;
            };
            let vote_hashes: Vec<Hash> =
                object.vote_file.votes().iter().map(|v| v.hash()).collect();
            for vote_hash in vote_hashes {
                state.vote_to_object.insert(vote_hash, hash);
            }
        }
    }

    /// Register every cached trigger with the trigger manager; triggers
    /// the manager refuses are marked for deletion.
    pub(crate) fn add_cached_triggers(&self, state: &mut ManagerState) {
        let now = self.chain.adjusted_time();
        for hash in state.objects.hashes() {
            let Some(object) = state.objects.find_mut(&hash) else {
                continue;
            };
            if object.object_type() != ObjectType::Trigger {
                continue;
            }
            if !self.triggers.add_new_trigger(hash) {
                object.mark_for_deletion(now);
            }
        }
    }
}
