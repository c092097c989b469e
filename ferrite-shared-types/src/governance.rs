//! Data structures for Ferrite Coin's masternode governance objects and votes.

use serde::{Deserialize, Serialize};

use crate::{Hash, OutPoint, Signature};

/// Enumerates the classes of governance objects carried by the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    /// A fundable governance object.
    Proposal,
    /// A governance object anchoring off-chain content via CID; may be lockable.
    Record,
    /// A governance object scheduling a superblock payout.
    Trigger,
    /// Reserved / unrecognized object class.
    Other,
}

/// The aspect of an object a vote speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteSignal {
    Funding,
    Valid,
    Delete,
    Endorsed,
}

impl VoteSignal {
    pub const ALL: [VoteSignal; 4] = [
        VoteSignal::Funding,
        VoteSignal::Valid,
        VoteSignal::Delete,
        VoteSignal::Endorsed,
    ];
}

/// The stance a vote takes on its signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteOutcome {
    Yes,
    No,
    Abstain,
}

/// A governance object as it travels the wire: structured payload +
/// collateral + submitter identity + signature. All fields are immutable
/// once signed; node-local caching state lives in the governance crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceObject {
    pub object_type: ObjectType,
    /// Opaque UTF-8 JSON document describing the object.
    pub data: Vec<u8>,
    /// Collateral outpoint of the submitting masternode (zero for
    /// collateral-backed objects submitted without a masternode).
    pub masternode_outpoint: OutPoint,
    /// On-chain transaction backing this object.
    pub collateral_hash: Hash,
    pub creation_time: i64,
    /// Ed25519 signature by the submitting masternode's operator key.
    #[serde(with = "serde_bytes")]
    pub signature: Signature,
}

impl GovernanceObject {
    /// Content hash identifying this object; covers every signed field
    /// plus the signature itself.
    pub fn hash(&self) -> Hash {
        match bincode::serialize(self) {
            Ok(bytes) => blake3::hash(&bytes).into(),
            Err(_) => [0u8; 32],
        }
    }

    /// Canonical bytes the submitter signs (everything but the signature).
    pub fn signing_payload(&self) -> Vec<u8> {
        let unsigned = (
            &self.object_type,
            &self.data,
            &self.masternode_outpoint,
            &self.collateral_hash,
            self.creation_time,
        );
        bincode::serialize(&unsigned).unwrap_or_default()
    }

    pub fn data_as_plain_string(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Parse the payload as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.data)
    }
}

/// A signed statement by a masternode about one governance object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceVote {
    /// Collateral outpoint of the voting masternode.
    pub masternode_outpoint: OutPoint,
    /// Hash of the governance object being voted on.
    pub parent_hash: Hash,
    pub signal: VoteSignal,
    pub outcome: VoteOutcome,
    pub timestamp: i64,
    /// Ed25519 signature by the masternode's voting key (operator key is
    /// accepted where the consumer allows it).
    #[serde(with = "serde_bytes")]
    pub signature: Signature,
}

impl GovernanceVote {
    pub fn hash(&self) -> Hash {
        match bincode::serialize(self) {
            Ok(bytes) => blake3::hash(&bytes).into(),
            Err(_) => [0u8; 32],
        }
    }

    /// Canonical bytes the voter signs (everything but the signature).
    pub fn signing_payload(&self) -> Vec<u8> {
        let unsigned = (
            &self.masternode_outpoint,
            &self.parent_hash,
            &self.signal,
            &self.outcome,
            self.timestamp,
        );
        bincode::serialize(&unsigned).unwrap_or_default()
    }
}

impl std::fmt::Display for GovernanceVote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{:?}:{:?}:{}",
            self.masternode_outpoint.to_string_short(),
            self.signal,
            self.outcome,
            crate::hash_hex(&self.parent_hash),
        )
    }
}
