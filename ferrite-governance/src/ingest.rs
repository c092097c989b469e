//! Peer message dispatch and the object/vote ingestion pipeline.
//!
//! Every handler returns silently on failure; the only observable
//! effects are log lines and misbehavior scores. Errors never cross the
//! message boundary.

use log::{debug, info, warn};

use ferrite_shared_types::governance::{GovernanceObject, GovernanceVote, ObjectType};
use ferrite_shared_types::p2p::{GovernanceMessage, Inv, InvType, REJECT_OBSOLETE};
use ferrite_shared_types::{hash_hex, Hash};

use crate::content_pinning::{lax_content_check, pin_object_content};
use crate::error::{GovernanceError, Severity};
use crate::manager::{GovernanceManager, ManagerState, OrphanObjectEntry, OrphanVoteEntry};
use crate::object::GovernanceObjectState;
use crate::providers::{ConnectionManager, PeerInfo};
use crate::{
    GOVERNANCE_ORPHAN_EXPIRATION_TIME, MAX_ORPHAN_OBJECTS_PER_MASTERNODE,
    MIN_GOVERNANCE_PEER_PROTO_VERSION,
};

impl GovernanceManager {
    /// Entry point for all governance messages received from a peer.
    pub fn process_message(
        &self,
        peer: &PeerInfo,
        message: GovernanceMessage,
        conn: &dyn ConnectionManager,
    ) {
        if !self.chain.is_blockchain_synced() {
            return;
        }
        match message {
            GovernanceMessage::Sync {
                parent_hash,
                filter,
            } => self.handle_governance_sync(peer, parent_hash, filter, conn),
            GovernanceMessage::Object(object) => self.handle_object(peer, object, conn),
            GovernanceMessage::Vote(vote) => self.handle_vote(peer, vote, conn),
            // Progress counts and rejects are consumed by the sync
            // tracker, not by the manager.
            GovernanceMessage::SyncStatusCount { .. } | GovernanceMessage::Reject { .. } => {}
        }
    }

    fn peer_version_ok(&self, peer: &PeerInfo, command: &str, conn: &dyn ConnectionManager) -> bool {
        if peer.version >= MIN_GOVERNANCE_PEER_PROTO_VERSION {
            return true;
        }
        debug!(
            "{} -- peer={} using obsolete version {}",
            command, peer.id, peer.version
        );
        conn.push_message(
            peer.id,
            GovernanceMessage::Reject {
                command: command.to_string(),
                code: REJECT_OBSOLETE,
                reason: format!(
                    "Version must be {} or greater",
                    MIN_GOVERNANCE_PEER_PROTO_VERSION
                ),
            },
        );
        false
    }

    /// A new governance object has arrived.
    pub(crate) fn handle_object(
        &self,
        peer: &PeerInfo,
        object: GovernanceObject,
        conn: &dyn ConnectionManager,
    ) {
        let hash = object.hash();
        conn.remove_ask_for(&hash);

        if !self.peer_version_ok(peer, "MNGOVERNANCEOBJECT", conn) {
            return;
        }

        debug!("MNGOVERNANCEOBJECT -- received object: {}", hash_hex(&hash));

        let params = self.chain.consensus_params();
        let now = self.chain.adjusted_time();
        let mut guard = self.lock_state();
        let state = &mut *guard;

        if !ManagerState::accept_message(&mut state.requested_objects, &hash) {
            info!(
                "MNGOVERNANCEOBJECT -- received unrequested object: {}",
                hash_hex(&hash)
            );
            return;
        }

        if state.objects.contains(&hash)
            || state.postponed.contains_key(&hash)
            || state.erased.contains_key(&hash)
            || state.orphan_objects.contains_key(&hash)
        {
            debug!(
                "MNGOVERNANCEOBJECT -- received already seen object: {}",
                hash_hex(&hash)
            );
            return;
        }

        let enabled = state.rate_checks_enabled;
        let synced = self.chain.is_synced();
        let cycle_seconds = params.superblock_cycle_seconds();
        let rate = state.rate_limiter.check(
            &object,
            true,
            false,
            enabled,
            synced,
            now,
            cycle_seconds,
        );
        if !rate.ok {
            info!(
                "MNGOVERNANCEOBJECT -- masternode rate check failed - {} - (current block height {})",
                hash_hex(&hash),
                state.cached_height
            );
            return;
        }

        let mn_list = self.mn_provider.list_at_tip();
        let mut obj_state = GovernanceObjectState::new(object);
        let validity = obj_state.is_valid_locally(&*self.chain, &mn_list, true);

        if rate.bypassed && (validity.valid || validity.masternode_missing) {
            let forced = state.rate_limiter.check(
                &obj_state.object,
                true,
                true,
                enabled,
                synced,
                now,
                cycle_seconds,
            );
            if !forced.ok {
                info!(
                    "MNGOVERNANCEOBJECT -- masternode rate check failed (after signature verification) - {} - (current block height {})",
                    hash_hex(&hash),
                    state.cached_height
                );
                return;
            }
        }

        if !validity.valid {
            if validity.masternode_missing {
                let count = state
                    .orphan_counter
                    .entry(obj_state.object.masternode_outpoint)
                    .or_insert(0);
                if *count >= MAX_ORPHAN_OBJECTS_PER_MASTERNODE {
                    debug!(
                        "MNGOVERNANCEOBJECT -- too many orphan objects, missing masternode={}",
                        obj_state.object.masternode_outpoint.to_string_short()
                    );
                    // Ask for this object again later.
                    conn.ask_for(peer.id, Inv::new(InvType::GovernanceObject, hash));
                    return;
                }
                *count += 1;
                info!(
                    "MNGOVERNANCEOBJECT -- missing masternode for: {}, error = {}",
                    hash_hex(&hash),
                    validity.error
                );
                state.orphan_objects.insert(
                    hash,
                    OrphanObjectEntry {
                        object: obj_state,
                        expiration_time: now + GOVERNANCE_ORPHAN_EXPIRATION_TIME,
                        from_peer: peer.id,
                    },
                );
            } else if validity.missing_confirmations {
                if lax_content_check(&obj_state.object) {
                    info!(
                        "MNGOVERNANCEOBJECT -- not enough fee confirmations for: {}, error = {}",
                        hash_hex(&hash),
                        validity.error
                    );
                    pin_object_content(
                        &*self.content_store,
                        &obj_state.object,
                        self.chain.masternode_mode(),
                    );
                    state.postponed.insert(hash, obj_state);
                } else {
                    info!("MNGOVERNANCEOBJECT -- content id NOT valid");
                }
            } else {
                warn!(
                    "MNGOVERNANCEOBJECT -- governance object is invalid - {}",
                    validity.error
                );
                conn.misbehaving(peer.id, 20);
            }
            return;
        }

        if lax_content_check(&obj_state.object) {
            pin_object_content(
                &*self.content_store,
                &obj_state.object,
                self.chain.masternode_mode(),
            );
            self.add_object_with_state(state, obj_state, Some(peer), conn);
        } else {
            info!("MNGOVERNANCEOBJECT -- content id NOT valid");
        }
    }

    /// Admit a locally submitted object (e.g. from RPC).
    pub fn add_governance_object(&self, object: GovernanceObject, conn: &dyn ConnectionManager) {
        let mut obj_state = GovernanceObjectState::new(object);
        let mut state = self.lock_state();
        pin_object_content(
            &*self.content_store,
            &obj_state.object,
            self.chain.masternode_mode(),
        );
        let mn_list = self.mn_provider.list_at_tip();
        let _ = obj_state.is_valid_locally(&*self.chain, &mn_list, true);
        self.add_object_with_state(&mut state, obj_state, None, conn);
    }

    /// Final admission into the live store: refresh cached state,
    /// re-validate under the lock, register triggers, relay, replay
    /// orphan votes, and notify observers.
    pub(crate) fn add_object_with_state(
        &self,
        state: &mut ManagerState,
        mut obj_state: GovernanceObjectState,
        from_peer: Option<&PeerInfo>,
        conn: &dyn ConnectionManager,
    ) {
        let hash = obj_state.hash();
        let now = self.chain.adjusted_time();
        let mn_list = self.mn_provider.list_at_tip();

        obj_state.update_sentinel_variables(mn_list.valid_count(), now);

        let validity = obj_state.is_valid_locally(&*self.chain, &mn_list, true);
        if !validity.valid {
            info!(
                "add_object_with_state -- invalid governance object - {} - (cached height {})",
                validity.error, state.cached_height
            );
            return;
        }
        obj_state.local_validity = validity;

        debug!(
            "add_object_with_state -- adding object: hash = {}, type = {:?}",
            hash_hex(&hash),
            obj_state.object_type()
        );

        let object = obj_state.object.clone();
        let object_type = obj_state.object_type();

        if !state.objects.emplace_unique(obj_state) {
            info!(
                "add_object_with_state -- already have governance object {}",
                hash_hex(&hash)
            );
            return;
        }

        if object_type == ObjectType::Trigger && !self.triggers.add_new_trigger(hash) {
            debug!(
                "add_object_with_state -- undo adding invalid trigger object: hash = {}",
                hash_hex(&hash)
            );
            if let Some(rejected) = state.objects.find_mut(&hash) {
                rejected.mark_for_deletion(now);
            }
            return;
        }

        info!(
            "add_object_with_state -- {} new, received from {}",
            hash_hex(&hash),
            from_peer.map(|p| p.addr.clone()).unwrap_or_else(|| "local".into())
        );
        self.relay_object(&hash, conn);

        if state.rate_limiter.update(&object, now) {
            // Not yet credible to most peers; relay again after the
            // reliable propagation margin passes.
            state.additional_relay.insert(hash);
        }

        self.check_orphan_votes_for(state, &hash, conn);

        self.signals.notify_governance_object(&object);
    }

    /// A new governance vote has arrived.
    pub(crate) fn handle_vote(
        &self,
        peer: &PeerInfo,
        vote: GovernanceVote,
        conn: &dyn ConnectionManager,
    ) {
        let vote_hash = vote.hash();
        conn.remove_ask_for(&vote_hash);

        if !self.peer_version_ok(peer, "MNGOVERNANCEOBJECTVOTE", conn) {
            return;
        }

        debug!("MNGOVERNANCEOBJECTVOTE -- received vote: {}", vote);

        let mut state = self.lock_state();

        if !ManagerState::accept_message(&mut state.requested_votes, &vote_hash) {
            debug!(
                "MNGOVERNANCEOBJECTVOTE -- received unrequested vote: {}, hash: {}, peer = {}",
                vote,
                hash_hex(&vote_hash),
                peer.id
            );
            return;
        }

        match self.process_vote_with_state(&mut state, Some(peer), &vote, conn) {
            Ok(()) => {
                debug!("MNGOVERNANCEOBJECTVOTE -- {} new", hash_hex(&vote_hash));
                self.relay_vote(&vote_hash, conn);
                self.signals.notify_governance_vote(&vote);
            }
            Err(err) => {
                debug!("MNGOVERNANCEOBJECTVOTE -- rejected vote, error = {}", err);
                if err.penalty != 0 && self.chain.is_synced() {
                    conn.misbehaving(peer.id, err.penalty);
                }
            }
        }
    }

    /// Route one vote to its parent object, or park it as an orphan.
    pub(crate) fn process_vote_with_state(
        &self,
        state: &mut ManagerState,
        from_peer: Option<&PeerInfo>,
        vote: &GovernanceVote,
        conn: &dyn ConnectionManager,
    ) -> Result<(), GovernanceError> {
        let vote_hash = vote.hash();
        let parent_hash = vote.parent_hash;
        let now = self.chain.adjusted_time();

        if state.vote_to_object.has_key(&vote_hash) {
            return Err(GovernanceError::warning(format!(
                "process_vote -- skipping known valid vote {} for object {}",
                hash_hex(&vote_hash),
                hash_hex(&parent_hash)
            )));
        }

        if state.invalid_votes.has_key(&vote_hash) {
            return Err(GovernanceError::permanent(
                format!(
                    "process_vote -- old invalid vote, MN outpoint = {}, governance object hash = {}",
                    vote.masternode_outpoint.to_string_short(),
                    hash_hex(&parent_hash)
                ),
                20,
            ));
        }

        if !state.objects.contains(&parent_hash) {
            let err = GovernanceError::warning(format!(
                "process_vote -- unknown parent object {}, MN outpoint = {}",
                hash_hex(&parent_hash),
                vote.masternode_outpoint.to_string_short()
            ));
            let inserted = state.orphan_votes.insert(
                parent_hash,
                OrphanVoteEntry {
                    vote: vote.clone(),
                    expiration_time: now + GOVERNANCE_ORPHAN_EXPIRATION_TIME,
                },
            );
            if inserted {
                if let Some(peer) = from_peer {
                    self.request_object_sync(state, peer, &parent_hash, false, conn);
                }
            }
            return Err(err);
        }

        // Record votes are only accepted while the record's voting
        // period, bounded by its collateral's next superblock, is open.
        let record_window_closed = {
            let Some(object) = state.objects.find(&parent_hash) else {
                return Err(GovernanceError::internal("parent object vanished"));
            };
            if object.object_type() == ObjectType::Record {
                match object.collateral_next_superblock {
                    Some(superblock) if superblock <= self.chain.tip_height() => {
                        match self.chain.block_time_at(superblock) {
                            Some(block_time) => vote.timestamp >= block_time,
                            None => false,
                        }
                    }
                    _ => false,
                }
            } else if object.cached_delete || object.expired {
                return Err(GovernanceError::warning(format!(
                    "process_vote -- ignoring vote for expired or deleted object, hash = {}",
                    hash_hex(&parent_hash)
                )));
            } else {
                false
            }
        };
        if record_window_closed {
            return Err(GovernanceError::warning(format!(
                "process_vote -- ignoring vote for record past its voting period, hash = {}",
                hash_hex(&parent_hash)
            )));
        }

        let mn_list = self.mn_provider.list_at_tip();
        let Some(object) = state.objects.find_mut(&parent_hash) else {
            return Err(GovernanceError::internal("parent object vanished"));
        };
        match object.process_vote(vote, &mn_list, now) {
            Ok(()) => {
                state.vote_to_object.insert(vote_hash, parent_hash);
                Ok(())
            }
            Err(err) => {
                if err.severity == Severity::PermanentError && err.penalty > 0 {
                    state.invalid_votes.insert(vote_hash, ());
                }
                Err(err)
            }
        }
    }

    /// Replay parked votes once their parent object is admitted.
    pub(crate) fn check_orphan_votes_for(
        &self,
        state: &mut ManagerState,
        parent_hash: &Hash,
        conn: &dyn ConnectionManager,
    ) {
        let entries = state.orphan_votes.get_all(parent_hash);
        if entries.is_empty() {
            return;
        }
        let now = self.chain.adjusted_time();
        let parent_hash = *parent_hash;
        state.with_rate_checks_disabled(|state| {
            for entry in entries {
                let remove = if entry.expiration_time < now {
                    true
                } else {
                    match self.process_vote_with_state(state, None, &entry.vote, conn) {
                        Ok(()) => {
                            self.relay_vote(&entry.vote.hash(), conn);
                            self.signals.notify_governance_vote(&entry.vote);
                            true
                        }
                        // Keep invariant: a permanently rejected vote
                        // lives in the invalid cache, not here.
                        Err(err) => err.severity == Severity::PermanentError,
                    }
                };
                if remove {
                    state.orphan_votes.erase(&parent_hash, &entry);
                }
            }
        });
    }

    /// Announce an object to every governance-capable peer.
    pub(crate) fn relay_object(&self, hash: &Hash, conn: &dyn ConnectionManager) {
        let inv = Inv::new(InvType::GovernanceObject, *hash);
        for peer in conn.fully_connected_peers() {
            if peer.version < MIN_GOVERNANCE_PEER_PROTO_VERSION {
                continue;
            }
            conn.push_inventory(peer.id, inv);
        }
    }

    /// Announce a vote to every governance-capable peer.
    pub(crate) fn relay_vote(&self, vote_hash: &Hash, conn: &dyn ConnectionManager) {
        let inv = Inv::new(InvType::GovernanceObjectVote, *vote_hash);
        for peer in conn.fully_connected_peers() {
            if peer.version < MIN_GOVERNANCE_PEER_PROTO_VERSION {
                continue;
            }
            conn.push_inventory(peer.id, inv);
        }
    }
}
