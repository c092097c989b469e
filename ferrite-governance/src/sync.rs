//! Peer sync: full object lists, per-object vote deltas, and the
//! maintenance-driven vote pull.

use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;

use ferrite_shared_types::bloom::BloomFilter;
use ferrite_shared_types::governance::{ObjectType, VoteSignal};
use ferrite_shared_types::p2p::{GovernanceMessage, Inv, InvType, SyncAsset};
use ferrite_shared_types::{hash_hex, Hash, Network};

use crate::manager::{GovernanceManager, ManagerState};
use crate::object::vote_is_valid;
use crate::providers::{ConnectionManager, PeerInfo};
use crate::{
    ASK_FOR_QUEUE_MAX, GOVERNANCE_FILTER_FP_RATE, GOVERNANCE_FILTER_PROTO_VERSION,
    MIN_GOVERNANCE_PEER_PROTO_VERSION, VOTE_REQUEST_PEERS_PER_HASH, VOTE_REQUEST_TIMEOUT,
};

impl GovernanceManager {
    /// A peer asked for governance data: the whole object list
    /// (`parent_hash` zero) or the votes of one object.
    pub(crate) fn handle_governance_sync(
        &self,
        peer: &PeerInfo,
        parent_hash: Hash,
        filter: Option<BloomFilter>,
        conn: &dyn ConnectionManager,
    ) {
        if peer.version < MIN_GOVERNANCE_PEER_PROTO_VERSION {
            debug!(
                "MNGOVERNANCESYNC -- peer={} using obsolete version {}",
                peer.id, peer.version
            );
            conn.push_message(
                peer.id,
                GovernanceMessage::Reject {
                    command: ferrite_shared_types::p2p::MNGOVERNANCESYNC.to_string(),
                    code: ferrite_shared_types::p2p::REJECT_OBSOLETE,
                    reason: format!(
                        "Version must be {} or greater",
                        MIN_GOVERNANCE_PEER_PROTO_VERSION
                    ),
                },
            );
            return;
        }

        // This is a heavy request; finish syncing ourselves first.
        if !self.chain.is_synced() {
            return;
        }

        // Bloom filters are only honoured from peers new enough to build
        // them correctly.
        let filter = if peer.version >= GOVERNANCE_FILTER_PROTO_VERSION {
            filter
        } else {
            None
        };

        if parent_hash == [0u8; 32] {
            self.sync_objects(peer, conn);
        } else {
            self.sync_single_obj_votes(peer, &parent_hash, filter, conn);
        }
        debug!(
            "MNGOVERNANCESYNC -- syncing governance objects to our peer at {}",
            peer.addr
        );
    }

    /// Push the full live object list as inventory, once per peer per
    /// session. Repeat requests earn a misbehavior score.
    pub(crate) fn sync_objects(&self, peer: &PeerInfo, conn: &dyn ConnectionManager) {
        let mut state = self.lock_state();

        if state.full_sync_peers.contains(&peer.addr) {
            // Asking for the whole list multiple times in a short period
            // of time is no good.
            debug!("sync_objects -- peer already asked me for the list");
            conn.misbehaving(peer.id, 20);
            return;
        }
        state.full_sync_peers.insert(peer.addr.clone());

        let mut count: u32 = 0;
        debug!("sync_objects -- syncing all objects to peer={}", peer.id);

        for (hash, object) in state.objects.iter() {
            if (object.cached_delete || object.expired)
                && object.object_type() != ObjectType::Record
            {
                debug!(
                    "sync_objects -- not syncing deleted/expired govobj: {}, peer={}",
                    hash_hex(hash),
                    peer.id
                );
                continue;
            }
            conn.push_inventory(peer.id, Inv::new(InvType::GovernanceObject, *hash));
            count += 1;
        }

        conn.push_message(
            peer.id,
            GovernanceMessage::SyncStatusCount {
                asset: SyncAsset::GovernanceObjects,
                count,
            },
        );
        info!("sync_objects -- sent {} objects to peer={}", count, peer.id);
    }

    /// Push the votes of one object as inventory, skipping hashes the
    /// peer's Bloom filter already covers.
    pub(crate) fn sync_single_obj_votes(
        &self,
        peer: &PeerInfo,
        parent_hash: &Hash,
        filter: Option<BloomFilter>,
        conn: &dyn ConnectionManager,
    ) {
        let state = self.lock_state();
        let mn_list = self.mn_provider.list_at_tip();

        let Some(object) = state.objects.find(parent_hash) else {
            debug!(
                "sync_single_obj_votes -- no matching object for hash {}, peer={}",
                hash_hex(parent_hash),
                peer.id
            );
            return;
        };

        if (object.cached_delete || object.expired) && object.object_type() != ObjectType::Record {
            info!(
                "sync_single_obj_votes -- not syncing deleted/expired govobj: {}, peer={}",
                hash_hex(parent_hash),
                peer.id
            );
            return;
        }

        let mut count: u32 = 0;
        for vote in object.vote_file.votes() {
            let vote_hash = vote.hash();

            let only_voting_key = matches!(
                object.object_type(),
                ObjectType::Proposal | ObjectType::Record
            ) && vote.signal == VoteSignal::Funding;

            if let Some(filter) = &filter {
                if filter.contains(&vote_hash) {
                    continue;
                }
            }
            if !vote_is_valid(vote, &mn_list, only_voting_key) {
                continue;
            }
            conn.push_inventory(peer.id, Inv::new(InvType::GovernanceObjectVote, vote_hash));
            count += 1;
        }

        conn.push_message(
            peer.id,
            GovernanceMessage::SyncStatusCount {
                asset: SyncAsset::GovernanceObjectVotes,
                count,
            },
        );
        info!(
            "sync_single_obj_votes -- sent {} votes to peer={}",
            count, peer.id
        );
    }

    /// Ask one peer for an object, attaching a Bloom filter of the votes
    /// we already hold when the peer can interpret it.
    pub(crate) fn request_object_sync(
        &self,
        state: &ManagerState,
        peer: &PeerInfo,
        hash: &Hash,
        use_filter: bool,
        conn: &dyn ConnectionManager,
    ) {
        debug!(
            "request_object_sync -- hash = {} peer={}",
            hash_hex(hash),
            peer.id
        );

        if peer.version < GOVERNANCE_FILTER_PROTO_VERSION {
            conn.push_message(
                peer.id,
                GovernanceMessage::Sync {
                    parent_hash: *hash,
                    filter: None,
                },
            );
            return;
        }

        let mut filter = None;
        if use_filter {
            if let Some(object) = state.objects.find(hash) {
                let params = self.chain.consensus_params();
                let mut built = BloomFilter::with_params(
                    params.governance_filter_elements,
                    GOVERNANCE_FILTER_FP_RATE,
                    rand::thread_rng().gen(),
                );
                for vote in object.vote_file.votes() {
                    built.insert(&vote.hash());
                }
                debug!(
                    "request_object_sync -- hash = {} vote count {} peer={}",
                    hash_hex(hash),
                    object.vote_file.vote_count(),
                    peer.id
                );
                filter = Some(built);
            }
        }

        conn.push_message(
            peer.id,
            GovernanceMessage::Sync {
                parent_hash: *hash,
                filter,
            },
        );
    }

    /// Maintenance-driven vote pull: pick objects (triggers first) and
    /// ask a bounded number of peers for their votes, respecting
    /// per-(hash, peer) cooldowns and ask-for backpressure.
    pub fn request_governance_object_votes(
        &self,
        peers: &[PeerInfo],
        conn: &dyn ConnectionManager,
    ) -> i64 {
        if peers.is_empty() {
            return -1;
        }

        let now = self.chain.adjusted_time();
        let params = self.chain.consensus_params();
        let masternode_mode = self.chain.masternode_mode();

        // Testnet is far smaller, so a single request there covers many
        // more votes; scale the per-node object count to keep request
        // sizes comparable to mainnet.
        let projected_votes: usize = 2000;
        let max_obj_requests_per_node = if params.network == Network::Main {
            1
        } else {
            let valid = self.mn_provider.list_at_tip().valid_count().max(1);
            (projected_votes / valid).max(1)
        };

        let mut guard = self.lock_state();
        let state = &mut *guard;

        if state.objects.is_empty() {
            return -2;
        }

        let mut trigger_hashes: Vec<Hash> = Vec::new();
        let mut other_hashes: Vec<Hash> = Vec::new();
        for (hash, object) in state.objects.iter() {
            if let Some(asked) = state.asked_recently.get(hash) {
                let live = asked.values().filter(|expire| **expire >= now).count();
                if live >= VOTE_REQUEST_PEERS_PER_HASH {
                    continue;
                }
            }
            if object.object_type() == ObjectType::Trigger {
                trigger_hashes.push(*hash);
            } else {
                other_hashes.push(*hash);
            }
        }
        for asked in state.asked_recently.values_mut() {
            asked.retain(|_, expire| *expire >= now);
        }

        debug!(
            "request_governance_object_votes -- start: triggers {} others {} asked_recently {}",
            trigger_hashes.len(),
            other_hashes.len(),
            state.asked_recently.len()
        );

        let mut rng = rand::thread_rng();
        trigger_hashes.shuffle(&mut rng);
        other_hashes.shuffle(&mut rng);

        let mut i = 0;
        while i < max_obj_requests_per_node {
            // Ask for triggers first.
            let hash = match trigger_hashes.last().or(other_hashes.last()) {
                Some(hash) => *hash,
                None => break,
            };

            let mut asked = false;
            for peer in peers {
                // Skip masternode service connections, and inbound peers
                // when we are a masternode ourselves; both are too
                // short-lived to finish a vote sync.
                if peer.masternode || (masternode_mode && peer.inbound) {
                    continue;
                }
                if peer.version < MIN_GOVERNANCE_PEER_PROTO_VERSION {
                    continue;
                }
                // Stop early to prevent ask-for overflow.
                if conn.ask_for_queue_len(peer.id) + projected_votes > ASK_FOR_QUEUE_MAX / 2 {
                    continue;
                }
                // Too early to ask the same node again.
                if state
                    .asked_recently
                    .get(&hash)
                    .map(|m| m.contains_key(&peer.addr))
                    .unwrap_or(false)
                {
                    continue;
                }

                self.request_object_sync(state, peer, &hash, true, conn);
                state
                    .asked_recently
                    .entry(hash)
                    .or_default()
                    .insert(peer.addr.clone(), now + VOTE_REQUEST_TIMEOUT);
                asked = true;

                if state.asked_recently[&hash].len() >= VOTE_REQUEST_PEERS_PER_HASH {
                    break;
                }
            }

            if trigger_hashes.pop().is_none() {
                other_hashes.pop();
            }
            // An unaskable hash does not use up the per-node budget.
            if asked {
                i += 1;
            }
        }

        debug!(
            "request_governance_object_votes -- end: triggers {} others {} asked_recently {}",
            trigger_hashes.len(),
            other_hashes.len(),
            state.asked_recently.len()
        );

        (trigger_hashes.len() + other_hashes.len()) as i64
    }
}
