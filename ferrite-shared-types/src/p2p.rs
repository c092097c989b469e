//! P2P message and inventory types for the governance subsystem.

use serde::{Deserialize, Serialize};

use crate::bloom::BloomFilter;
use crate::governance::{GovernanceObject, GovernanceVote};
use crate::Hash;

/// Node-local identifier of a peer connection.
pub type PeerId = u64;

/// Wire command strings. Names are part of the network protocol and must
/// not change between releases.
pub const MNGOVERNANCESYNC: &str = "govsync";
pub const MNGOVERNANCEOBJECT: &str = "govobj";
pub const MNGOVERNANCEOBJECTVOTE: &str = "govobjvote";
pub const SYNCSTATUSCOUNT: &str = "ssc";

/// Reject code sent to peers speaking an obsolete protocol version.
pub const REJECT_OBSOLETE: u8 = 0x11;

/// Inventory type codes, as carried in `inv` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvType {
    GovernanceObject,
    GovernanceObjectVote,
}

impl InvType {
    /// Numeric wire code.
    pub fn code(&self) -> u32 {
        match self {
            InvType::GovernanceObject => 17,
            InvType::GovernanceObjectVote => 18,
        }
    }
}

/// Inventory advertisement of one governance item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Inv {
    pub inv_type: InvType,
    pub hash: Hash,
}

impl Inv {
    pub fn new(inv_type: InvType, hash: Hash) -> Self {
        Inv { inv_type, hash }
    }
}

impl std::fmt::Display for Inv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}:{}", self.inv_type, crate::hash_hex(&self.hash))
    }
}

/// Sync progress asset ids reported via `ssc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncAsset {
    GovernanceObjects,
    GovernanceObjectVotes,
}

/// Governance subsystem messages exchanged with peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GovernanceMessage {
    /// Request all objects (`parent_hash == [0; 32]`) or the votes of one
    /// object, optionally excluding vote hashes matched by the filter.
    Sync {
        parent_hash: Hash,
        filter: Option<BloomFilter>,
    },
    /// Push of a governance object.
    Object(GovernanceObject),
    /// Push of a governance vote.
    Vote(GovernanceVote),
    /// Sync progress notification.
    SyncStatusCount { asset: SyncAsset, count: u32 },
    /// Rejection of a peer message, e.g. for an obsolete protocol version.
    Reject {
        command: String,
        code: u8,
        reason: String,
    },
}

impl GovernanceMessage {
    /// Wire command string for this message.
    pub fn command(&self) -> &'static str {
        match self {
            GovernanceMessage::Sync { .. } => MNGOVERNANCESYNC,
            GovernanceMessage::Object(_) => MNGOVERNANCEOBJECT,
            GovernanceMessage::Vote(_) => MNGOVERNANCEOBJECTVOTE,
            GovernanceMessage::SyncStatusCount { .. } => SYNCSTATUSCOUNT,
            GovernanceMessage::Reject { .. } => "reject",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inv_type_codes_are_stable() {
        assert_eq!(InvType::GovernanceObject.code(), 17);
        assert_eq!(InvType::GovernanceObjectVote.code(), 18);
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = GovernanceMessage::SyncStatusCount {
            asset: SyncAsset::GovernanceObjects,
            count: 12,
        };
        let bytes = bincode::serialize(&msg).unwrap();
        let back: GovernanceMessage = bincode::deserialize(&bytes).unwrap();
        assert_eq!(msg, back);
    }
}
