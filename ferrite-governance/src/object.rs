//! Manager-side state of a governance object: cache flags, the vote file,
//! vote processing rules, and local validation glue.

use std::collections::HashMap;

use ed25519_dalek::{Signature as DalekSignature, VerifyingKey};
use log::debug;
use serde::{Deserialize, Serialize};

use ferrite_shared_types::governance::{
    GovernanceObject, GovernanceVote, ObjectType, VoteOutcome, VoteSignal,
};
use ferrite_shared_types::masternode::MasternodeList;
use ferrite_shared_types::{Hash, OutPoint, PublicKey, Signature};

use crate::error::GovernanceError;
use crate::providers::ChainClient;
use crate::{GOVERNANCE_FEE_CONFIRMATIONS, GOVERNANCE_UPDATE_MIN, MAX_TIME_FUTURE_DEVIATION};

/// Latest accepted stance of one voter on one signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteInstance {
    pub outcome: VoteOutcome,
    pub creation_time: i64,
}

/// All current stances of one voter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub instances: HashMap<VoteSignal, VoteInstance>,
}

/// Ordered collection of the accepted votes on one object, indexable by
/// vote hash and by voter outpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteFile {
    votes: Vec<GovernanceVote>,
    index: HashMap<Hash, usize>,
    records: HashMap<OutPoint, VoteRecord>,
}

impl VoteFile {
    pub fn has_vote(&self, vote_hash: &Hash) -> bool {
        self.index.contains_key(vote_hash)
    }

    pub fn get_vote(&self, vote_hash: &Hash) -> Option<&GovernanceVote> {
        self.index.get(vote_hash).map(|i| &self.votes[*i])
    }

    pub fn votes(&self) -> &[GovernanceVote] {
        &self.votes
    }

    pub fn vote_count(&self) -> usize {
        self.votes.len()
    }

    pub fn record(&self, outpoint: &OutPoint) -> Option<&VoteRecord> {
        self.records.get(outpoint)
    }

    /// Append an accepted vote and update the voter's current stance.
    pub fn add_vote(&mut self, vote: GovernanceVote) {
        let hash = vote.hash();
        if self.index.contains_key(&hash) {
            return;
        }
        self.records
            .entry(vote.masternode_outpoint)
            .or_default()
            .instances
            .insert(
                vote.signal,
                VoteInstance {
                    outcome: vote.outcome,
                    creation_time: vote.timestamp,
                },
            );
        self.index.insert(hash, self.votes.len());
        self.votes.push(vote);
    }

    /// Drop every vote cast from `outpoint`; returns the removed hashes.
    pub fn remove_votes_from(&mut self, outpoint: &OutPoint) -> Vec<Hash> {
        let removed: Vec<Hash> = self
            .votes
            .iter()
            .filter(|v| v.masternode_outpoint == *outpoint)
            .map(|v| v.hash())
            .collect();
        if removed.is_empty() {
            return removed;
        }
        self.votes.retain(|v| v.masternode_outpoint != *outpoint);
        self.records.remove(outpoint);
        self.index = self
            .votes
            .iter()
            .enumerate()
            .map(|(i, v)| (v.hash(), i))
            .collect();
        removed
    }

    /// Net yes count (yes minus no) for one signal over current stances.
    pub fn absolute_yes_count(&self, signal: VoteSignal) -> i64 {
        let mut count = 0i64;
        for record in self.records.values() {
            if let Some(instance) = record.instances.get(&signal) {
                match instance.outcome {
                    VoteOutcome::Yes => count += 1,
                    VoteOutcome::No => count -= 1,
                    VoteOutcome::Abstain => {}
                }
            }
        }
        count
    }
}

/// Result of validating an object against the local chain and masternode
/// views.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalValidity {
    pub valid: bool,
    /// The submitting masternode is not in the current list.
    pub masternode_missing: bool,
    /// The collateral transaction is unknown or too shallow.
    pub missing_confirmations: bool,
    pub error: String,
}

impl LocalValidity {
    fn ok() -> Self {
        LocalValidity {
            valid: true,
            ..Default::default()
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        LocalValidity {
            error: error.into(),
            ..Default::default()
        }
    }
}

/// A governance object together with the node-local state the manager
/// keeps for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceObjectState {
    pub object: GovernanceObject,
    pub vote_file: VoteFile,
    /// Set when votes changed and the cached flags below are stale.
    pub dirty_cache: bool,
    pub expired: bool,
    pub cached_funding: bool,
    pub cached_valid: bool,
    pub cached_delete: bool,
    pub cached_endorsed: bool,
    /// Records only: the network voted the record valid; eviction of the
    /// record requires both locks to be absent.
    pub record_locked: bool,
    /// Records only: the network endorsed the record permanently.
    pub perm_locked: bool,
    pub deletion_time: i64,
    pub local_validity: LocalValidity,
    /// First superblock height after the collateral confirmed, once known.
    pub collateral_next_superblock: Option<u32>,
}

impl GovernanceObjectState {
    pub fn new(object: GovernanceObject) -> Self {
        GovernanceObjectState {
            object,
            vote_file: VoteFile::default(),
            dirty_cache: true,
            expired: false,
            cached_funding: false,
            cached_valid: true,
            cached_delete: false,
            cached_endorsed: false,
            record_locked: false,
            perm_locked: false,
            deletion_time: 0,
            local_validity: LocalValidity::default(),
            collateral_next_superblock: None,
        }
    }

    pub fn hash(&self) -> Hash {
        self.object.hash()
    }

    pub fn object_type(&self) -> ObjectType {
        self.object.object_type
    }

    /// A record the network has both validated and endorsed is exempt
    /// from eviction. One predicate for both the eviction check and the
    /// content unpin path.
    pub fn is_lock_protected(&self) -> bool {
        self.object.object_type == ObjectType::Record && self.record_locked && self.perm_locked
    }

    /// Flag the object for deferred deletion.
    pub fn mark_for_deletion(&mut self, now: i64) {
        self.cached_delete = true;
        if self.deletion_time == 0 {
            self.deletion_time = now;
        }
    }

    /// Validate the object against the chain and masternode views.
    /// Updates `collateral_next_superblock` when the collateral resolves.
    pub fn is_valid_locally(
        &mut self,
        chain: &dyn ChainClient,
        mn_list: &MasternodeList,
        check_collateral: bool,
    ) -> LocalValidity {
        let now = chain.adjusted_time();
        if self.object.creation_time > now + MAX_TIME_FUTURE_DEVIATION {
            return LocalValidity::invalid("creation time too far in the future");
        }
        if self.object.json().is_err() {
            return LocalValidity::invalid("payload is not valid JSON");
        }

        match self.object.object_type {
            ObjectType::Trigger => {
                let Some(mn) = mn_list.get_by_collateral(&self.object.masternode_outpoint) else {
                    return LocalValidity {
                        masternode_missing: true,
                        error: format!(
                            "masternode {} not found",
                            self.object.masternode_outpoint.to_string_short()
                        ),
                        ..Default::default()
                    };
                };
                if !verify_signature(
                    &mn.state.operator_key,
                    &self.object.signing_payload(),
                    &self.object.signature,
                ) {
                    return LocalValidity::invalid("invalid trigger signature");
                }
                LocalValidity::ok()
            }
            ObjectType::Proposal | ObjectType::Record | ObjectType::Other => {
                if !check_collateral {
                    return LocalValidity::ok();
                }
                match chain.collateral_info(&self.object.collateral_hash) {
                    None => LocalValidity {
                        missing_confirmations: true,
                        error: "collateral transaction not found".into(),
                        ..Default::default()
                    },
                    Some(info) if info.confirmations < GOVERNANCE_FEE_CONFIRMATIONS => {
                        LocalValidity {
                            missing_confirmations: true,
                            error: format!(
                                "collateral has {} of {} confirmations",
                                info.confirmations, GOVERNANCE_FEE_CONFIRMATIONS
                            ),
                            ..Default::default()
                        }
                    }
                    Some(info) => {
                        self.collateral_next_superblock = Some(
                            chain
                                .consensus_params()
                                .next_superblock_height(info.block_height),
                        );
                        LocalValidity::ok()
                    }
                }
            }
        }
    }

    /// Re-derive `local_validity` from the current chain state.
    pub fn update_local_validity(&mut self, chain: &dyn ChainClient, mn_list: &MasternodeList) {
        self.local_validity = self.is_valid_locally(chain, mn_list, true);
    }

    /// Recompute the cached vote-summary flags from the vote file.
    pub fn update_sentinel_variables(&mut self, mn_count: usize, now: i64) {
        if mn_count == 0 {
            return;
        }
        let quorum = (mn_count / 10).max(1) as i64;

        self.cached_funding = self.vote_file.absolute_yes_count(VoteSignal::Funding) >= quorum;
        self.cached_valid = self.vote_file.absolute_yes_count(VoteSignal::Valid) >= -quorum;
        self.cached_endorsed = self.vote_file.absolute_yes_count(VoteSignal::Endorsed) >= quorum;

        if self.vote_file.absolute_yes_count(VoteSignal::Delete) >= quorum && !self.cached_delete {
            self.mark_for_deletion(now);
        }

        if self.object.object_type == ObjectType::Record {
            self.record_locked = self.vote_file.absolute_yes_count(VoteSignal::Valid) >= quorum;
            self.perm_locked = self.cached_endorsed;
        }

        self.dirty_cache = false;
    }

    /// Validate and record one vote. The caller decides what to do with
    /// the returned error (orphan, invalid cache, peer penalty).
    pub fn process_vote(
        &mut self,
        vote: &GovernanceVote,
        mn_list: &MasternodeList,
        now: i64,
    ) -> Result<(), GovernanceError> {
        if mn_list
            .get_by_collateral(&vote.masternode_outpoint)
            .is_none()
        {
            return Err(GovernanceError::warning(format!(
                "process_vote -- masternode {} not found",
                vote.masternode_outpoint.to_string_short()
            )));
        }

        if vote.timestamp > now + MAX_TIME_FUTURE_DEVIATION {
            return Err(GovernanceError::permanent(
                format!("process_vote -- vote {} timestamped too far in the future", vote),
                20,
            ));
        }

        if let Some(record) = self.vote_file.record(&vote.masternode_outpoint) {
            if let Some(existing) = record.instances.get(&vote.signal) {
                if existing.creation_time >= vote.timestamp {
                    return Err(GovernanceError::warning(format!(
                        "process_vote -- obsolete vote from {}, existing = {}, new = {}",
                        vote.masternode_outpoint.to_string_short(),
                        existing.creation_time,
                        vote.timestamp
                    )));
                }
                if vote.timestamp < existing.creation_time + GOVERNANCE_UPDATE_MIN {
                    return Err(GovernanceError::permanent(
                        format!(
                            "process_vote -- vote updated too soon by {}",
                            vote.masternode_outpoint.to_string_short()
                        ),
                        0,
                    ));
                }
            }
        }

        let only_voting_key = matches!(
            self.object.object_type,
            ObjectType::Proposal | ObjectType::Record
        ) && vote.signal == VoteSignal::Funding;

        if !vote_is_valid(vote, mn_list, only_voting_key) {
            return Err(GovernanceError::permanent(
                format!("process_vote -- invalid signature on vote {}", vote),
                20,
            ));
        }

        debug!("process_vote -- accepted vote {}", vote);
        self.vote_file.add_vote(vote.clone());
        self.update_sentinel_variables(mn_list.valid_count(), now);
        Ok(())
    }

    /// Snapshot the current stances as reconstructed votes (unsigned),
    /// optionally restricted to one masternode collateral.
    pub fn current_votes(&self, outpoint_filter: Option<&OutPoint>) -> Vec<GovernanceVote> {
        let parent_hash = self.hash();
        let mut result = Vec::new();
        for (outpoint, record) in &self.vote_file.records {
            if let Some(filter) = outpoint_filter {
                if outpoint != filter {
                    continue;
                }
            }
            for (signal, instance) in &record.instances {
                result.push(GovernanceVote {
                    masternode_outpoint: *outpoint,
                    parent_hash,
                    signal: *signal,
                    outcome: instance.outcome,
                    timestamp: instance.creation_time,
                    signature: [0u8; 64],
                });
            }
        }
        result
    }
}

/// Verify an Ed25519 signature over `payload`.
pub fn verify_signature(key: &PublicKey, payload: &[u8], signature: &Signature) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(key) else {
        return false;
    };
    let sig = DalekSignature::from_bytes(signature);
    verifying_key.verify_strict(payload, &sig).is_ok()
}

/// Check a vote's signature against its masternode's keys. The voting
/// key always qualifies; the operator key only when `only_voting_key` is
/// off.
pub fn vote_is_valid(vote: &GovernanceVote, mn_list: &MasternodeList, only_voting_key: bool) -> bool {
    let Some(mn) = mn_list.get_by_collateral(&vote.masternode_outpoint) else {
        return false;
    };
    let payload = vote.signing_payload();
    if verify_signature(&mn.state.voting_key, &payload, &vote.signature) {
        return true;
    }
    !only_voting_key && verify_signature(&mn.state.operator_key, &payload, &vote.signature)
}
