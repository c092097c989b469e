//! Reaction to new chain tips: vote invalidation on masternode key
//! rotation, postponed-object reprocessing, and superblock execution.

use log::{debug, info};

use ferrite_shared_types::governance::ObjectType;
use ferrite_shared_types::masternode::{MN_FIELD_OPERATOR_KEY, MN_FIELD_VOTING_KEY};
use ferrite_shared_types::{hash_hex, Hash, OutPoint};

use crate::manager::{GovernanceManager, ManagerState};
use crate::providers::ConnectionManager;
use crate::{MAX_TIME_FUTURE_DEVIATION, RELIABLE_PROPAGATION_TIME};

impl GovernanceManager {
    /// Handle a new best chain tip at `height`.
    pub fn updated_block_tip(&self, height: u32, conn: &dyn ConnectionManager) {
        let mut state = self.lock_state();
        state.cached_height = height;
        debug!("updated_block_tip -- cached height: {}", height);

        if self.chain.is_deterministic_mns_active(height) {
            self.remove_invalid_votes(&mut state);
        }

        self.check_postponed_objects(&mut state, conn);

        self.triggers.execute_best_superblock(height);
    }

    /// Invalidate votes of masternodes whose voting or operator key
    /// changed (or that disappeared) since the remembered list.
    pub(crate) fn remove_invalid_votes(&self, state: &mut ManagerState) {
        if !self.chain.is_synced() {
            return;
        }

        let current_list = self.mn_provider.list_at_tip();
        let diff = state.last_mn_list.build_diff(&current_list);

        let mut changed_outpoints: Vec<OutPoint> = Vec::new();
        for (internal_id, state_diff) in &diff.updated_mns {
            if state_diff.fields & (MN_FIELD_VOTING_KEY | MN_FIELD_OPERATOR_KEY) == 0 {
                continue;
            }
            if let Some(old) = state.last_mn_list.get_by_internal_id(*internal_id) {
                changed_outpoints.push(old.collateral_outpoint);
            }
        }
        for internal_id in &diff.removed_mns {
            if let Some(old) = state.last_mn_list.get_by_internal_id(*internal_id) {
                changed_outpoints.push(old.collateral_outpoint);
            }
        }

        let tip_height = self.chain.tip_height();

        for outpoint in changed_outpoints {
            for hash in state.objects.hashes() {
                let Some(object) = state.objects.find_mut(&hash) else {
                    continue;
                };
                // Record votes stay binding once the record's superblock
                // has passed; only invalidate while voting is still open.
                if object.object_type() == ObjectType::Record {
                    let still_open = object
                        .collateral_next_superblock
                        .map(|superblock| tip_height < superblock)
                        .unwrap_or(false);
                    if !still_open {
                        continue;
                    }
                }

                let removed = object.vote_file.remove_votes_from(&outpoint);
                if removed.is_empty() {
                    continue;
                }
                info!(
                    "remove_invalid_votes -- removed {} votes from {} on object {}",
                    removed.len(),
                    outpoint.to_string_short(),
                    hash_hex(&hash)
                );
                for vote_hash in removed {
                    state.vote_to_object.erase(&vote_hash);
                    state.invalid_votes.erase(&vote_hash);
                    state.requested_votes.remove(&vote_hash);

                    let orphaned: Vec<_> = state
                        .orphan_votes
                        .item_list()
                        .filter(|(_, entry)| entry.vote.hash() == vote_hash)
                        .map(|(parent, entry)| (*parent, entry.clone()))
                        .collect();
                    for (parent, entry) in orphaned {
                        state.orphan_votes.erase(&parent, &entry);
                    }
                }
            }
        }

        // Store the current list so the next tip diffs against it.
        state.last_mn_list = current_list;
    }

    /// Re-check objects parked for missing collateral confirmations, and
    /// run the scheduled second relays.
    pub(crate) fn check_postponed_objects(
        &self,
        state: &mut ManagerState,
        conn: &dyn ConnectionManager,
    ) {
        if !self.chain.is_synced() {
            return;
        }

        let mn_list = self.mn_provider.list_at_tip();

        // Check postponed objects.
        let hashes: Vec<Hash> = state.postponed.keys().copied().collect();
        for hash in hashes {
            let Some(mut object) = state.postponed.remove(&hash) else {
                continue;
            };
            let validity = object.is_valid_locally(&*self.chain, &mn_list, true);
            if validity.missing_confirmations {
                // Wait for more confirmations.
                state.postponed.insert(hash, object);
                continue;
            }
            if validity.valid {
                crate::content_pinning::pin_object_content(
                    &*self.content_store,
                    &object.object,
                    self.chain.masternode_mode(),
                );
                self.add_object_with_state(state, object, None, conn);
            } else {
                info!("check_postponed_objects -- {} invalid", hash_hex(&hash));
            }
        }

        // Perform additional relays for objects that were timestamped
        // slightly into the future at submission.
        let now = self.chain.adjusted_time();
        let cycle_seconds = self.chain.consensus_params().superblock_cycle_seconds();

        let scheduled: Vec<Hash> = state.additional_relay.iter().copied().collect();
        for hash in scheduled {
            if let Some(object) = state.objects.find(&hash) {
                let timestamp = object.object.creation_time;
                let valid = timestamp <= now + MAX_TIME_FUTURE_DEVIATION
                    && timestamp >= now - 2 * cycle_seconds;
                let ready = timestamp <= now + MAX_TIME_FUTURE_DEVIATION - RELIABLE_PROPAGATION_TIME;

                if valid {
                    if !ready {
                        continue;
                    }
                    info!(
                        "check_postponed_objects -- additional relay: hash = {}",
                        hash_hex(&hash)
                    );
                    self.relay_object(&hash, conn);
                }
            } else {
                info!(
                    "check_postponed_objects -- additional relay of unknown object: {}",
                    hash_hex(&hash)
                );
            }
            state.additional_relay.remove(&hash);
        }
    }
}
