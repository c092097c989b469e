//! Periodic maintenance: orphan cleanup and retry, cache refresh, and
//! eviction of deleted or expired objects.

use log::{debug, info};

use ferrite_shared_types::governance::ObjectType;
use ferrite_shared_types::{hash_hex, Hash};

use crate::content_pinning::unpin_record_content;
use crate::manager::{GovernanceManager, ManagerState};
use crate::providers::ConnectionManager;
use crate::GOVERNANCE_DELETION_DELAY;

impl GovernanceManager {
    /// One maintenance tick. Gated on full sync and shutdown.
    pub fn do_maintenance(&self, conn: &dyn ConnectionManager) {
        if !self.chain.is_synced() || self.chain.shutdown_requested() {
            return;
        }

        let mut state = self.lock_state();

        // Check objects we've asked for, remove old entries.
        self.clean_orphan_votes(&mut state);
        self.request_orphan_objects(&state, conn);
        self.check_orphan_objects(&mut state, conn);

        // Check and remove, reprocess governance objects.
        self.update_caches_and_clean(&mut state);
    }

    /// Drop expired entries from the orphan-vote multimap.
    pub(crate) fn clean_orphan_votes(&self, state: &mut ManagerState) {
        let now = self.chain.adjusted_time();
        let expired: Vec<_> = state
            .orphan_votes
            .item_list()
            .filter(|(_, entry)| entry.expiration_time < now)
            .map(|(parent, entry)| (*parent, entry.clone()))
            .collect();
        for (parent, entry) in expired {
            state.orphan_votes.erase(&parent, &entry);
        }
    }

    /// Ask regular peers for every orphan-vote parent we do not hold.
    pub(crate) fn request_orphan_objects(&self, state: &ManagerState, conn: &dyn ConnectionManager) {
        let missing: Vec<Hash> = state
            .orphan_votes
            .keys()
            .into_iter()
            .filter(|hash| !state.objects.contains(hash))
            .collect();

        debug!(
            "request_orphan_objects -- number objects = {}",
            missing.len()
        );

        let peers = conn.fully_connected_peers();
        for hash in &missing {
            for peer in &peers {
                if peer.masternode {
                    continue;
                }
                self.request_object_sync(state, peer, hash, false, conn);
            }
        }
    }

    /// Retry orphan objects: admit the ones whose masternode appeared,
    /// keep the ones still waiting, penalize the source of expired ones.
    pub(crate) fn check_orphan_objects(&self, state: &mut ManagerState, conn: &dyn ConnectionManager) {
        let now = self.chain.adjusted_time();
        let mn_list = self.mn_provider.list_at_tip();
        let hashes: Vec<Hash> = state.orphan_objects.keys().copied().collect();

        state.with_rate_checks_disabled(|state| {
            for hash in hashes {
                let Some(entry) = state.orphan_objects.get(&hash) else {
                    continue;
                };
                let mut object = entry.object.clone();
                let from_peer = entry.from_peer;
                let expired = entry.expiration_time < now;
                let outpoint = object.object.masternode_outpoint;

                let mut admit = false;
                if !expired {
                    let validity = object.is_valid_locally(&*self.chain, &mn_list, true);
                    if validity.masternode_missing {
                        // Still waiting.
                        continue;
                    }
                    admit = validity.valid;
                } else {
                    // The promised masternode never appeared.
                    conn.misbehaving(from_peer, 20);
                }

                state.orphan_objects.remove(&hash);
                let drained = match state.orphan_counter.get_mut(&outpoint) {
                    Some(count) => {
                        *count = count.saturating_sub(1);
                        *count == 0
                    }
                    None => false,
                };
                if drained {
                    state.orphan_counter.remove(&outpoint);
                }

                if admit {
                    crate::content_pinning::pin_object_content(
                        &*self.content_store,
                        &object.object,
                        self.chain.masternode_mode(),
                    );
                    self.add_object_with_state(state, object, None, conn);
                }
            }
        });
    }

    /// Refresh dirty caches and evict deleted or expired objects,
    /// recording tombstones per the retention policy.
    pub(crate) fn update_caches_and_clean(&self, state: &mut ManagerState) {
        debug!("update_caches_and_clean");

        let now = self.chain.adjusted_time();
        let params = self.chain.consensus_params();
        let cycle_seconds = params.superblock_cycle_seconds();
        let mn_list = self.mn_provider.list_at_tip();
        let mn_count = mn_list.valid_count();

        // Votes of masternodes the meta manager flagged must be
        // re-derived.
        for hash in self.mn_meta.take_dirty_governance_hashes() {
            if let Some(object) = state.objects.find_mut(&hash) {
                let stale: Vec<_> = object
                    .vote_file
                    .votes()
                    .iter()
                    .filter(|vote| mn_list.get_by_collateral(&vote.masternode_outpoint).is_none())
                    .map(|vote| vote.masternode_outpoint)
                    .collect();
                for outpoint in stale {
                    for vote_hash in object.vote_file.remove_votes_from(&outpoint) {
                        state.vote_to_object.erase(&vote_hash);
                    }
                }
                object.dirty_cache = true;
            }
        }

        state.with_rate_checks_disabled(|state| {
            // Clean up any expired or invalid triggers.
            self.triggers.clean_and_remove();

            for hash in state.objects.hashes() {
                let Some(object) = state.objects.find_mut(&hash) else {
                    continue;
                };

                if object.dirty_cache {
                    object.update_local_validity(&*self.chain, &mn_list);
                    object.update_sentinel_variables(mn_count, now);
                }

                // Triggers past two full cycles can never pay out again.
                if object.object_type() == ObjectType::Trigger
                    && object.object.creation_time < now - 2 * cycle_seconds
                    && !object.expired
                {
                    object.expired = true;
                    object.mark_for_deletion(now);
                }

                let time_since_deletion = now - object.deletion_time;
                debug!(
                    "update_caches_and_clean -- checking object for deletion: {}, deletion time = {}, time since deletion = {}, delete flag = {}, expired flag = {}",
                    hash_hex(&hash),
                    object.deletion_time,
                    time_since_deletion,
                    object.cached_delete,
                    object.expired
                );

                if (object.cached_delete || object.expired)
                    && !object.is_lock_protected()
                    && time_since_deletion >= GOVERNANCE_DELETION_DELAY
                {
                    info!("update_caches_and_clean -- erase obj {}", hash_hex(&hash));
                    self.mn_meta.remove_governance_object(&hash);

                    if object.object_type() == ObjectType::Record {
                        unpin_record_content(&*self.content_store, &object.object);
                    }

                    // Remove vote references.
                    let dangling: Vec<Hash> = state
                        .vote_to_object
                        .item_list()
                        .filter(|(_, parent)| **parent == hash)
                        .map(|(vote_hash, _)| *vote_hash)
                        .collect();
                    for vote_hash in dangling {
                        state.vote_to_object.erase(&vote_hash);
                    }

                    let Some(object) = state.objects.erase(&hash) else {
                        continue;
                    };
                    // Keep hashes of deleted proposals and records
                    // forever; other types only as long as a stray copy
                    // could still be relayed.
                    let retain_until = match object.object_type() {
                        ObjectType::Proposal | ObjectType::Record => i64::MAX,
                        _ => object.object.creation_time
                            + 2 * cycle_seconds
                            + GOVERNANCE_DELETION_DELAY,
                    };
                    state.erased.insert(hash, retain_until);
                } else {
                    // Triggers are handled via the trigger manager.
                    let validate = match object.object_type() {
                        ObjectType::Proposal => true,
                        ObjectType::Record => !object.is_lock_protected(),
                        _ => false,
                    };
                    if validate && self.validator.validate(&object.object, now).is_err() {
                        info!(
                            "update_caches_and_clean -- set for deletion expired obj {}",
                            hash_hex(&hash)
                        );
                        object.mark_for_deletion(now);
                    }
                }
            }
        });

        // Forget about expired deleted objects.
        state.erased.retain(|_, retain_until| *retain_until >= now);

        info!("update_caches_and_clean -- {}", display_string(state));
    }
}

fn display_string(state: &ManagerState) -> String {
    let mut proposals = 0;
    let mut records = 0;
    let mut triggers = 0;
    let mut other = 0;
    for (_, object) in state.objects.iter() {
        match object.object_type() {
            ObjectType::Proposal => proposals += 1,
            ObjectType::Record => records += 1,
            ObjectType::Trigger => triggers += 1,
            ObjectType::Other => other += 1,
        }
    }
    format!(
        "Governance Objects: {} (Proposals: {}, Records: {}, Triggers: {}, Other: {}; Erased: {}), Votes: {}",
        state.objects.len(),
        proposals,
        records,
        triggers,
        other,
        state.erased.len(),
        state.vote_to_object.size()
    )
}
