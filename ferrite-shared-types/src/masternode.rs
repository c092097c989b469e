//! Deterministic masternode list types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{OutPoint, PublicKey};

/// Represents the unique identifier for a masternode, derived from its
/// collateral UTXO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MasternodeID(pub OutPoint);

impl From<OutPoint> for MasternodeID {
    fn from(outpoint: OutPoint) -> Self {
        MasternodeID(outpoint)
    }
}

/// The mutable registration state of a deterministic masternode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeState {
    /// Key authorized to cast governance votes.
    pub voting_key: PublicKey,
    /// Key the operator signs service messages and triggers with.
    pub operator_key: PublicKey,
    /// Network address (IP:port) of the node.
    pub address: String,
    /// Human-readable identity label claimed at registration.
    pub identity: String,
    /// Set while the masternode is banned for failing proof-of-service.
    pub pose_banned: bool,
}

/// One entry of the deterministic masternode list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicMasternode {
    /// Stable numeric id assigned at registration, never reused.
    pub internal_id: u64,
    pub collateral_outpoint: OutPoint,
    pub state: MasternodeState,
}

impl DeterministicMasternode {
    pub fn is_valid(&self) -> bool {
        !self.state.pose_banned
    }
}

/// Field-change flags used by [`MasternodeListDiff`].
pub const MN_FIELD_VOTING_KEY: u16 = 1 << 0;
pub const MN_FIELD_OPERATOR_KEY: u16 = 1 << 1;
pub const MN_FIELD_ADDRESS: u16 = 1 << 2;
pub const MN_FIELD_POSE_BANNED: u16 = 1 << 3;

/// State change of a single masternode between two list snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeStateDiff {
    /// Bit set of `MN_FIELD_*` flags naming the changed fields.
    pub fields: u16,
    /// The new state.
    pub state: MasternodeState,
}

/// Difference between two deterministic list snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeListDiff {
    /// internal_id -> state diff for masternodes present in both lists.
    pub updated_mns: Vec<(u64, MasternodeStateDiff)>,
    /// internal_ids present in the old list but gone from the new one.
    pub removed_mns: Vec<u64>,
}

/// A snapshot of the deterministic masternode list at one chain height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasternodeList {
    /// internal_id -> masternode, ordered for deterministic iteration.
    pub masternodes: BTreeMap<u64, DeterministicMasternode>,
    /// Height this snapshot was built at.
    pub height: u32,
}

impl MasternodeList {
    pub fn new(height: u32) -> Self {
        MasternodeList {
            masternodes: BTreeMap::new(),
            height,
        }
    }

    pub fn add(&mut self, mn: DeterministicMasternode) {
        self.masternodes.insert(mn.internal_id, mn);
    }

    pub fn get_by_internal_id(&self, id: u64) -> Option<&DeterministicMasternode> {
        self.masternodes.get(&id)
    }

    pub fn get_by_collateral(&self, outpoint: &OutPoint) -> Option<&DeterministicMasternode> {
        self.masternodes
            .values()
            .find(|mn| mn.collateral_outpoint == *outpoint)
    }

    /// Visit every masternode; with `valid_only` set, PoSe-banned entries
    /// are skipped.
    pub fn for_each_mn<F: FnMut(&DeterministicMasternode)>(&self, valid_only: bool, mut f: F) {
        for mn in self.masternodes.values() {
            if valid_only && !mn.is_valid() {
                continue;
            }
            f(mn);
        }
    }

    pub fn valid_count(&self) -> usize {
        self.masternodes.values().filter(|mn| mn.is_valid()).count()
    }

    /// Identity labels currently claimed by registered masternodes.
    pub fn identities_in_use(&self) -> Vec<String> {
        self.masternodes
            .values()
            .map(|mn| mn.state.identity.clone())
            .collect()
    }

    /// Compute what changed from `self` to `other`.
    pub fn build_diff(&self, other: &MasternodeList) -> MasternodeListDiff {
        let mut diff = MasternodeListDiff::default();

        for (id, old) in &self.masternodes {
            match other.masternodes.get(id) {
                None => diff.removed_mns.push(*id),
                Some(new) if new.state != old.state => {
                    let mut fields = 0u16;
                    if new.state.voting_key != old.state.voting_key {
                        fields |= MN_FIELD_VOTING_KEY;
                    }
                    if new.state.operator_key != old.state.operator_key {
                        fields |= MN_FIELD_OPERATOR_KEY;
                    }
                    if new.state.address != old.state.address {
                        fields |= MN_FIELD_ADDRESS;
                    }
                    if new.state.pose_banned != old.state.pose_banned {
                        fields |= MN_FIELD_POSE_BANNED;
                    }
                    diff.updated_mns.push((
                        *id,
                        MasternodeStateDiff {
                            fields,
                            state: new.state.clone(),
                        },
                    ));
                }
                Some(_) => {}
            }
        }

        diff
    }
}
