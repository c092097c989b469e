//! Shared data types for Ferrite Coin node subsystems.
//!
//! Plain serializable types only; subsystem logic lives in the
//! subsystem crates that consume these.

use serde::{Deserialize, Serialize};

pub mod bloom;
pub mod governance;
pub mod masternode;
pub mod p2p;

pub type PublicKey = [u8; 32];
pub type Signature = [u8; 64];
pub type Hash = [u8; 32];

/// References a single transaction output by containing txid and index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    /// The transaction ID (hash) of the transaction containing the output.
    pub txid: Hash,
    /// The index of the output within that transaction.
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash, vout: u32) -> Self {
        OutPoint { txid, vout }
    }

    /// Abbreviated form for log lines.
    pub fn to_string_short(&self) -> String {
        format!("{}:{}", &hex::encode(self.txid)[..16], self.vout)
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hex::encode(self.txid), self.vout)
    }
}

/// Which chain this node follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    Main,
    Test,
    Reg,
}

/// Consensus parameters the governance subsystem depends on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusParams {
    pub network: Network,
    /// Number of blocks between payout superblocks.
    pub superblock_cycle: u32,
    /// Target seconds between blocks.
    pub pow_target_spacing: u32,
    /// Element capacity of the governance vote Bloom filter.
    pub governance_filter_elements: usize,
}

impl ConsensusParams {
    /// Wall-clock length of one superblock cycle.
    pub fn superblock_cycle_seconds(&self) -> i64 {
        self.superblock_cycle as i64 * self.pow_target_spacing as i64
    }

    /// The first superblock height strictly after `height`.
    pub fn next_superblock_height(&self, height: u32) -> u32 {
        (height / self.superblock_cycle + 1) * self.superblock_cycle
    }
}

/// Shorthand for log lines; full hashes are too noisy at info level.
pub fn hash_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outpoint_display() {
        let op = OutPoint::new([0xab; 32], 3);
        assert!(op.to_string().ends_with(":3"));
        assert_eq!(op.to_string_short().len(), 16 + 2);
    }

    #[test]
    fn test_next_superblock_height() {
        let params = ConsensusParams {
            network: Network::Main,
            superblock_cycle: 100,
            pow_target_spacing: 150,
            governance_filter_elements: 20_000,
        };
        assert_eq!(params.next_superblock_height(0), 100);
        assert_eq!(params.next_superblock_height(99), 100);
        assert_eq!(params.next_superblock_height(100), 200);
        assert_eq!(params.superblock_cycle_seconds(), 15_000);
    }
}
