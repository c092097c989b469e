//! End-to-end scenarios for the governance manager against mocked node
//! subsystems.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ed25519_dalek::{Signer, SigningKey};

use ferrite_governance::{
    ChainClient, CollateralInfo, ConnectionManager, ContentStore, ContentStoreError,
    GovernanceManager, GovernanceSignals, MasternodeListProvider, MasternodeMetaStore, PeerInfo,
    TriggerManager, GOVERNANCE_DELETION_DELAY,
};
use ferrite_shared_types::bloom::BloomFilter;
use ferrite_shared_types::governance::{
    GovernanceObject, GovernanceVote, ObjectType, VoteOutcome, VoteSignal,
};
use ferrite_shared_types::masternode::{DeterministicMasternode, MasternodeList, MasternodeState};
use ferrite_shared_types::p2p::{GovernanceMessage, Inv, InvType, PeerId, SyncAsset};
use ferrite_shared_types::{ConsensusParams, Hash, Network, OutPoint};

const BASE_TIME: i64 = 1_700_000_000;
const GOOD_CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

// ---------------------------------------------------------------------
// Mock subsystems
// ---------------------------------------------------------------------

struct MockChain {
    now: Mutex<i64>,
    tip: Mutex<u32>,
    collaterals: Mutex<HashMap<Hash, CollateralInfo>>,
    block_times: Mutex<HashMap<u32, i64>>,
    masternode_mode: bool,
}

impl MockChain {
    fn new() -> Self {
        MockChain {
            now: Mutex::new(BASE_TIME),
            tip: Mutex::new(60),
            collaterals: Mutex::new(HashMap::new()),
            block_times: Mutex::new(HashMap::new()),
            masternode_mode: true,
        }
    }

    fn advance(&self, seconds: i64) {
        *self.now.lock().unwrap() += seconds;
    }

    fn add_collateral(&self, tx_hash: Hash, confirmations: u32, block_height: u32) {
        self.collaterals.lock().unwrap().insert(
            tx_hash,
            CollateralInfo {
                confirmations,
                block_height,
                block_hash: [0xbb; 32],
            },
        );
    }
}

impl ChainClient for MockChain {
    fn adjusted_time(&self) -> i64 {
        *self.now.lock().unwrap()
    }

    fn now_millis(&self) -> i64 {
        self.adjusted_time() * 1000
    }

    fn tip_height(&self) -> u32 {
        *self.tip.lock().unwrap()
    }

    fn block_time_at(&self, height: u32) -> Option<i64> {
        self.block_times.lock().unwrap().get(&height).copied()
    }

    fn collateral_info(&self, tx_hash: &Hash) -> Option<CollateralInfo> {
        self.collaterals.lock().unwrap().get(tx_hash).copied()
    }

    fn consensus_params(&self) -> ConsensusParams {
        ConsensusParams {
            network: Network::Main,
            superblock_cycle: 100,
            pow_target_spacing: 10,
            governance_filter_elements: 20_000,
        }
    }

    fn is_blockchain_synced(&self) -> bool {
        true
    }

    fn is_synced(&self) -> bool {
        true
    }

    fn is_deterministic_mns_active(&self, _height: u32) -> bool {
        true
    }

    fn masternode_mode(&self) -> bool {
        self.masternode_mode
    }

    fn shutdown_requested(&self) -> bool {
        false
    }
}

struct MockMnProvider {
    list: Mutex<MasternodeList>,
}

impl MasternodeListProvider for MockMnProvider {
    fn list_at_tip(&self) -> MasternodeList {
        self.list.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct MockMeta {
    dirty: Mutex<Vec<Hash>>,
    removed: Mutex<Vec<Hash>>,
}

impl MasternodeMetaStore for MockMeta {
    fn take_dirty_governance_hashes(&self) -> Vec<Hash> {
        std::mem::take(&mut *self.dirty.lock().unwrap())
    }

    fn remove_governance_object(&self, hash: &Hash) {
        self.removed.lock().unwrap().push(*hash);
    }
}

struct MockTriggers {
    accept: bool,
    executed: Mutex<Vec<u32>>,
}

impl TriggerManager for MockTriggers {
    fn add_new_trigger(&self, _hash: Hash) -> bool {
        self.accept
    }

    fn clean_and_remove(&self) {}

    fn execute_best_superblock(&self, height: u32) {
        self.executed.lock().unwrap().push(height);
    }
}

#[derive(Default)]
struct MockContentStore {
    pinned: Mutex<Vec<String>>,
    unpinned: Mutex<Vec<String>>,
}

impl ContentStore for MockContentStore {
    fn list(&self, _path: &str) -> Result<serde_json::Value, ContentStoreError> {
        Ok(serde_json::json!({"Objects": [{"Size": 1234}]}))
    }

    fn pin_recursive(&self, path: &str) -> Result<(), ContentStoreError> {
        self.pinned.lock().unwrap().push(path.to_string());
        Ok(())
    }

    fn unpin_recursive(&self, path: &str) -> Result<(), ContentStoreError> {
        self.unpinned.lock().unwrap().push(path.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct MockSignals {
    objects: Mutex<Vec<Hash>>,
    votes: Mutex<Vec<Hash>>,
}

impl GovernanceSignals for MockSignals {
    fn notify_governance_object(&self, object: &GovernanceObject) {
        self.objects.lock().unwrap().push(object.hash());
    }

    fn notify_governance_vote(&self, vote: &GovernanceVote) {
        self.votes.lock().unwrap().push(vote.hash());
    }
}

#[derive(Default)]
struct MockConn {
    peers: Mutex<Vec<PeerInfo>>,
    messages: Mutex<Vec<(PeerId, GovernanceMessage)>>,
    inventory: Mutex<Vec<(PeerId, Inv)>>,
    asked: Mutex<Vec<(PeerId, Inv)>>,
    misbehaving: Mutex<Vec<(PeerId, i32)>>,
}

impl MockConn {
    fn inventory_of(&self, peer: PeerId, inv_type: InvType) -> Vec<Inv> {
        self.inventory
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, inv)| *id == peer && inv.inv_type == inv_type)
            .map(|(_, inv)| *inv)
            .collect()
    }

    fn sync_status_counts(&self, peer: PeerId) -> Vec<(SyncAsset, u32)> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(id, msg)| match msg {
                GovernanceMessage::SyncStatusCount { asset, count } if *id == peer => {
                    Some((*asset, *count))
                }
                _ => None,
            })
            .collect()
    }

    fn sync_requests(&self, peer: PeerId) -> Vec<Hash> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(id, msg)| match msg {
                GovernanceMessage::Sync { parent_hash, .. } if *id == peer => Some(*parent_hash),
                _ => None,
            })
            .collect()
    }
}

impl ConnectionManager for MockConn {
    fn push_message(&self, peer: PeerId, message: GovernanceMessage) {
        self.messages.lock().unwrap().push((peer, message));
    }

    fn remove_ask_for(&self, _hash: &Hash) {}

    fn fully_connected_peers(&self) -> Vec<PeerInfo> {
        self.peers.lock().unwrap().clone()
    }

    fn ask_for(&self, peer: PeerId, inv: Inv) {
        self.asked.lock().unwrap().push((peer, inv));
    }

    fn push_inventory(&self, peer: PeerId, inv: Inv) {
        self.inventory.lock().unwrap().push((peer, inv));
    }

    fn ask_for_queue_len(&self, _peer: PeerId) -> usize {
        0
    }

    fn misbehaving(&self, peer: PeerId, score: i32) {
        self.misbehaving.lock().unwrap().push((peer, score));
    }
}

// ---------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------

struct Harness {
    manager: GovernanceManager,
    chain: Arc<MockChain>,
    mn_provider: Arc<MockMnProvider>,
    triggers: Arc<MockTriggers>,
    content: Arc<MockContentStore>,
    signals: Arc<MockSignals>,
    conn: MockConn,
}

fn voting_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

fn operator_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed.wrapping_add(100); 32])
}

fn mn_outpoint(seed: u8) -> OutPoint {
    OutPoint::new([seed; 32], 0)
}

fn masternode(seed: u8) -> DeterministicMasternode {
    DeterministicMasternode {
        internal_id: seed as u64,
        collateral_outpoint: mn_outpoint(seed),
        state: MasternodeState {
            voting_key: voting_key(seed).verifying_key().to_bytes(),
            operator_key: operator_key(seed).verifying_key().to_bytes(),
            address: format!("10.0.0.{}:7777", seed),
            identity: format!("mn-{}", seed),
            pose_banned: false,
        },
    }
}

fn harness_with_masternodes(seeds: &[u8]) -> Harness {
    let mut list = MasternodeList::new(60);
    for seed in seeds {
        list.add(masternode(*seed));
    }

    let chain = Arc::new(MockChain::new());
    let mn_provider = Arc::new(MockMnProvider {
        list: Mutex::new(list),
    });
    let meta = Arc::new(MockMeta::default());
    let triggers = Arc::new(MockTriggers {
        accept: true,
        executed: Mutex::new(Vec::new()),
    });
    let content = Arc::new(MockContentStore::default());
    let signals = Arc::new(MockSignals::default());

    let manager = GovernanceManager::new(
        chain.clone(),
        mn_provider.clone(),
        meta.clone(),
        triggers.clone(),
        content.clone(),
        signals.clone(),
    );

    let conn = MockConn::default();
    conn.peers.lock().unwrap().push(peer(2));

    Harness {
        manager,
        chain,
        mn_provider,
        triggers,
        content,
        signals,
        conn,
    }
}

fn peer(id: PeerId) -> PeerInfo {
    PeerInfo {
        id,
        addr: format!("192.168.1.{}:9999", id),
        version: 70215,
        inbound: false,
        masternode: false,
    }
}

fn proposal_object(name: &str) -> GovernanceObject {
    GovernanceObject {
        object_type: ObjectType::Proposal,
        data: format!(
            r#"{{"name":"{}","start_epoch":{},"end_epoch":{},"payment_amount":10.0}}"#,
            name,
            BASE_TIME,
            BASE_TIME + 1_000_000
        )
        .into_bytes(),
        masternode_outpoint: mn_outpoint(1),
        collateral_hash: blake3::hash(name.as_bytes()).into(),
        creation_time: BASE_TIME - 100,
        signature: [0u8; 64],
    }
}

fn record_object(name: &str) -> GovernanceObject {
    GovernanceObject {
        object_type: ObjectType::Record,
        data: format!(r#"{{"name":"{}","ipfscid":"{}"}}"#, name, GOOD_CID).into_bytes(),
        masternode_outpoint: mn_outpoint(1),
        collateral_hash: blake3::hash(name.as_bytes()).into(),
        creation_time: BASE_TIME - 100,
        signature: [0u8; 64],
    }
}

fn trigger_object(seed: u8, creation_time: i64) -> GovernanceObject {
    let mut object = GovernanceObject {
        object_type: ObjectType::Trigger,
        data: br#"{"event_block_height":100}"#.to_vec(),
        masternode_outpoint: mn_outpoint(seed),
        collateral_hash: [0u8; 32],
        creation_time,
        signature: [0u8; 64],
    };
    object.signature = operator_key(seed).sign(&object.signing_payload()).to_bytes();
    object
}

fn signed_vote(
    seed: u8,
    parent_hash: Hash,
    signal: VoteSignal,
    outcome: VoteOutcome,
    timestamp: i64,
) -> GovernanceVote {
    let mut vote = GovernanceVote {
        masternode_outpoint: mn_outpoint(seed),
        parent_hash,
        signal,
        outcome,
        timestamp,
        signature: [0u8; 64],
    };
    vote.signature = voting_key(seed).sign(&vote.signing_payload()).to_bytes();
    vote
}

/// Request + deliver one object the way a real peer round-trip would.
fn inject_object(h: &Harness, from: &PeerInfo, object: GovernanceObject) -> Hash {
    let hash = object.hash();
    h.manager
        .confirm_inventory_request(&Inv::new(InvType::GovernanceObject, hash));
    h.manager
        .process_message(from, GovernanceMessage::Object(object), &h.conn);
    hash
}

/// Request + deliver one vote.
fn inject_vote(h: &Harness, from: &PeerInfo, vote: GovernanceVote) -> Hash {
    let hash = vote.hash();
    h.manager
        .confirm_inventory_request(&Inv::new(InvType::GovernanceObjectVote, hash));
    h.manager
        .process_message(from, GovernanceMessage::Vote(vote), &h.conn);
    hash
}

// ---------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------

#[test]
fn test_duplicate_object_admitted_once() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let object = proposal_object("prop-dup");
    h.chain.add_collateral(object.collateral_hash, 10, 50);

    let hash = inject_object(&h, &from, object.clone());
    assert_eq!(h.manager.object_count(), 1);
    assert_eq!(h.signals.objects.lock().unwrap().len(), 1);
    assert!(h.manager.have_object_for_hash(&hash));

    // A second delivery cannot even be requested any more, and the
    // handler drops the unrequested copy.
    assert!(!h
        .manager
        .confirm_inventory_request(&Inv::new(InvType::GovernanceObject, hash)));
    h.manager
        .process_message(&from, GovernanceMessage::Object(object), &h.conn);

    assert_eq!(h.manager.object_count(), 1);
    assert_eq!(h.signals.objects.lock().unwrap().len(), 1);
}

#[test]
fn test_unrequested_object_is_dropped() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let object = proposal_object("prop-unrequested");
    h.chain.add_collateral(object.collateral_hash, 10, 50);

    // No confirm_inventory_request first.
    h.manager
        .process_message(&from, GovernanceMessage::Object(object), &h.conn);
    assert_eq!(h.manager.object_count(), 0);
}

#[test]
fn test_orphan_vote_drained_when_parent_arrives() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let object = proposal_object("prop-orphan");
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    let parent_hash = object.hash();

    let vote = signed_vote(
        1,
        parent_hash,
        VoteSignal::Funding,
        VoteOutcome::Yes,
        BASE_TIME - 50,
    );
    let vote_hash = inject_vote(&h, &from, vote);

    // Parked, not indexed, and the parent was requested from the peer.
    assert_eq!(h.manager.orphan_vote_count(), 1);
    assert_eq!(h.manager.vote_count(), 0);
    assert!(!h.manager.have_vote_for_hash(&vote_hash));
    assert!(h.conn.sync_requests(from.id).contains(&parent_hash));

    inject_object(&h, &from, object);

    assert_eq!(h.manager.orphan_vote_count(), 0);
    assert_eq!(h.manager.vote_count(), 1);
    assert!(h.manager.have_vote_for_hash(&vote_hash));
    // The drained vote was relayed to the connected peer.
    let relayed = h.conn.inventory_of(2, InvType::GovernanceObjectVote);
    assert!(relayed.iter().any(|inv| inv.hash == vote_hash));
    assert_eq!(h.signals.votes.lock().unwrap().len(), 1);
}

#[test]
fn test_trigger_rate_limiting() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    // Four triggers from the same masternode within 200 seconds; the
    // superblock cycle is 1000 seconds, so only the first survives.
    let times = [
        BASE_TIME - 200,
        BASE_TIME - 150,
        BASE_TIME - 100,
        BASE_TIME - 50,
    ];
    for creation_time in times {
        inject_object(&h, &from, trigger_object(1, creation_time));
    }

    assert_eq!(h.manager.object_count(), 1);
    assert_eq!(h.signals.objects.lock().unwrap().len(), 1);

    // The masternode's status is burned: forced checks now fail.
    assert!(!h.manager.masternode_rate_check(&trigger_object(1, BASE_TIME)));

    // A different masternode is unaffected.
    let h2 = harness_with_masternodes(&[1, 2]);
    inject_object(&h2, &from, trigger_object(2, BASE_TIME - 50));
    assert_eq!(h2.manager.object_count(), 1);
}

#[test]
fn test_slow_triggers_all_admitted() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    // One trigger per cycle passes the rate limit.
    for i in 0..3 {
        if i > 0 {
            h.chain.advance(1100);
        }
        let object = trigger_object(1, h.chain.adjusted_time() - 100);
        inject_object(&h, &from, object);
    }
    assert_eq!(h.manager.object_count(), 3);
}

#[test]
fn test_deleted_record_preserved_as_erased_and_unpinned() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let object = record_object("rec-evict");
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    let hash = inject_object(&h, &from, object);
    assert_eq!(h.manager.object_count(), 1);
    // Record content was pinned on admission.
    assert!(h
        .content
        .pinned
        .lock()
        .unwrap()
        .contains(&format!("/ipfs/{}", GOOD_CID)));

    // A delete vote from the only masternode reaches the quorum of one
    // and flags the record.
    let vote = signed_vote(1, hash, VoteSignal::Delete, VoteOutcome::Yes, BASE_TIME - 50);
    inject_vote(&h, &from, vote);
    assert_eq!(h.manager.vote_count(), 1);

    // Not evicted before the deletion delay passes.
    h.manager.do_maintenance(&h.conn);
    assert_eq!(h.manager.object_count(), 1);

    h.chain.advance(GOVERNANCE_DELETION_DELAY + 1);
    h.manager.do_maintenance(&h.conn);

    assert_eq!(h.manager.object_count(), 0);
    assert!(!h.manager.have_object_for_hash(&hash));
    // Records keep their tombstone forever.
    assert_eq!(h.manager.erased_retain_until(&hash), Some(i64::MAX));
    // The vote index was rewritten before the lock was released.
    assert_eq!(h.manager.vote_count(), 0);
    // And the record's content was unpinned.
    assert!(h
        .content
        .unpinned
        .lock()
        .unwrap()
        .contains(&format!("/ipfs/{}", GOOD_CID)));

    // The tombstone blocks re-admission.
    let object = record_object("rec-evict");
    h.manager
        .confirm_inventory_request(&Inv::new(InvType::GovernanceObject, hash));
    h.manager
        .process_message(&from, GovernanceMessage::Object(object), &h.conn);
    assert_eq!(h.manager.object_count(), 0);
}

#[test]
fn test_voting_key_rotation_invalidates_votes() {
    let h = harness_with_masternodes(&[1, 2]);
    let from = peer(1);

    let object = proposal_object("prop-rotate");
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    let parent_hash = inject_object(&h, &from, object);

    let vote = signed_vote(
        1,
        parent_hash,
        VoteSignal::Funding,
        VoteOutcome::Yes,
        BASE_TIME - 50,
    );
    let vote_hash = inject_vote(&h, &from, vote);
    assert_eq!(h.manager.vote_count(), 1);

    // First tip notification remembers the current list.
    h.manager.updated_block_tip(61, &h.conn);
    assert_eq!(h.manager.vote_count(), 1);

    // Rotate masternode 1's voting key.
    {
        let mut list = h.mn_provider.list.lock().unwrap();
        list.masternodes.get_mut(&1).unwrap().state.voting_key = [0xee; 32];
        list.height = 62;
    }
    h.manager.updated_block_tip(62, &h.conn);

    assert_eq!(h.manager.vote_count(), 0);
    assert!(!h.manager.have_vote_for_hash(&vote_hash));
    // The hash can be requested again: no trace left in the caches or
    // the request set.
    assert!(h
        .manager
        .confirm_inventory_request(&Inv::new(InvType::GovernanceObjectVote, vote_hash)));

    // Superblock execution was delegated on each tip.
    assert_eq!(*h.triggers.executed.lock().unwrap(), vec![61, 62]);
}

#[test]
fn test_bloom_filtered_vote_sync() {
    let h = harness_with_masternodes(&[1, 2, 3, 4, 5]);
    let from = peer(1);

    let object = proposal_object("prop-bloom");
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    let parent_hash = inject_object(&h, &from, object);

    let mut vote_hashes = Vec::new();
    for seed in 1..=5u8 {
        let vote = signed_vote(
            seed,
            parent_hash,
            VoteSignal::Funding,
            VoteOutcome::Yes,
            BASE_TIME - 50,
        );
        vote_hashes.push(inject_vote(&h, &from, vote));
    }
    assert_eq!(h.manager.vote_count(), 5);

    // The requesting peer already has four of the five votes.
    let mut filter = BloomFilter::with_params(20_000, 0.001, 7);
    for vote_hash in &vote_hashes[..4] {
        filter.insert(vote_hash);
    }

    let requester = peer(9);
    h.manager.process_message(
        &requester,
        GovernanceMessage::Sync {
            parent_hash,
            filter: Some(filter),
        },
        &h.conn,
    );

    let sent = h.conn.inventory_of(requester.id, InvType::GovernanceObjectVote);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].hash, vote_hashes[4]);
    assert_eq!(
        h.conn.sync_status_counts(requester.id),
        vec![(SyncAsset::GovernanceObjectVotes, 1)]
    );
}

#[test]
fn test_full_sync_once_per_session() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let object = proposal_object("prop-sync");
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    let hash = inject_object(&h, &from, object);

    let requester = peer(9);
    h.manager.process_message(
        &requester,
        GovernanceMessage::Sync {
            parent_hash: [0u8; 32],
            filter: None,
        },
        &h.conn,
    );

    let sent = h.conn.inventory_of(requester.id, InvType::GovernanceObject);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].hash, hash);
    assert_eq!(
        h.conn.sync_status_counts(requester.id),
        vec![(SyncAsset::GovernanceObjects, 1)]
    );

    // Asking again in the same session earns a misbehavior score.
    h.manager.process_message(
        &requester,
        GovernanceMessage::Sync {
            parent_hash: [0u8; 32],
            filter: None,
        },
        &h.conn,
    );
    assert!(h
        .conn
        .misbehaving
        .lock()
        .unwrap()
        .contains(&(requester.id, 20)));
}

#[test]
fn test_obsolete_peer_rejected() {
    let h = harness_with_masternodes(&[1]);
    let old_peer = PeerInfo {
        version: 70000,
        ..peer(3)
    };

    h.manager.process_message(
        &old_peer,
        GovernanceMessage::Sync {
            parent_hash: [0u8; 32],
            filter: None,
        },
        &h.conn,
    );

    let rejected = h
        .conn
        .messages
        .lock()
        .unwrap()
        .iter()
        .any(|(id, msg)| *id == old_peer.id && matches!(msg, GovernanceMessage::Reject { .. }));
    assert!(rejected);
}

#[test]
fn test_postponed_object_admitted_after_confirmations() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let object = proposal_object("prop-postponed");
    // Collateral known but too shallow.
    h.chain.add_collateral(object.collateral_hash, 2, 50);
    let hash = inject_object(&h, &from, object.clone());

    assert_eq!(h.manager.object_count(), 0);
    assert_eq!(h.manager.postponed_count(), 1);
    assert!(h.manager.have_object_for_hash(&hash));

    // Collateral confirms; the next tip reprocesses the queue.
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    h.manager.updated_block_tip(61, &h.conn);

    assert_eq!(h.manager.postponed_count(), 0);
    assert_eq!(h.manager.object_count(), 1);
    assert_eq!(h.signals.objects.lock().unwrap().len(), 1);
}

#[test]
fn test_orphan_object_admitted_when_masternode_appears() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    // Trigger from masternode 2, which is not in the list yet.
    let object = trigger_object(2, BASE_TIME - 50);
    let hash = inject_object(&h, &from, object);
    assert_eq!(h.manager.object_count(), 0);
    assert!(!h.manager.have_object_for_hash(&hash));

    // Masternode 2 registers; the next maintenance tick retries.
    h.mn_provider.list.lock().unwrap().add(masternode(2));
    h.manager.do_maintenance(&h.conn);

    assert_eq!(h.manager.object_count(), 1);
    assert!(h.manager.have_object_for_hash(&hash));
}

#[test]
fn test_record_vote_after_superblock_dropped() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let object = record_object("rec-window");
    // Collateral at height 50: next superblock is 100.
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    let parent_hash = inject_object(&h, &from, object);

    // Chain has passed the record's superblock.
    *h.chain.tip.lock().unwrap() = 120;
    h.chain
        .block_times
        .lock()
        .unwrap()
        .insert(100, BASE_TIME - 80);

    // Vote timestamped after the superblock's block time is dropped.
    let late = signed_vote(1, parent_hash, VoteSignal::Valid, VoteOutcome::Yes, BASE_TIME - 50);
    inject_vote(&h, &from, late);
    assert_eq!(h.manager.vote_count(), 0);

    // Vote timestamped before the superblock's block time is accepted.
    let early = signed_vote(1, parent_hash, VoteSignal::Valid, VoteOutcome::Yes, BASE_TIME - 90);
    inject_vote(&h, &from, early);
    assert_eq!(h.manager.vote_count(), 1);
}

#[test]
fn test_invalid_vote_penalized_and_cached() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let object = proposal_object("prop-invalid-vote");
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    let parent_hash = inject_object(&h, &from, object);

    // Vote signed by a key that belongs to no masternode entry.
    let mut vote = GovernanceVote {
        masternode_outpoint: mn_outpoint(1),
        parent_hash,
        signal: VoteSignal::Funding,
        outcome: VoteOutcome::Yes,
        timestamp: BASE_TIME - 50,
        signature: [0u8; 64],
    };
    vote.signature = SigningKey::from_bytes(&[0x77; 32])
        .sign(&vote.signing_payload())
        .to_bytes();
    let vote_hash = inject_vote(&h, &from, vote.clone());

    assert_eq!(h.manager.vote_count(), 0);
    assert!(h.conn.misbehaving.lock().unwrap().contains(&(from.id, 20)));

    // The rejection is cached: resending earns the penalty again
    // without reprocessing.
    h.manager
        .confirm_inventory_request(&Inv::new(InvType::GovernanceObjectVote, vote_hash));
    h.manager
        .process_message(&from, GovernanceMessage::Vote(vote), &h.conn);
    assert_eq!(
        h.conn
            .misbehaving
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, score)| *id == from.id && *score == 20)
            .count(),
        2
    );
}

#[test]
fn test_persistence_roundtrip() {
    let h = harness_with_masternodes(&[1, 2]);
    let from = peer(1);

    // Live object with a vote.
    let object = proposal_object("prop-persist");
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    let parent_hash = inject_object(&h, &from, object);
    let vote = signed_vote(
        1,
        parent_hash,
        VoteSignal::Funding,
        VoteOutcome::Yes,
        BASE_TIME - 50,
    );
    let vote_hash = inject_vote(&h, &from, vote);

    // Postponed object.
    let postponed = proposal_object("prop-persist-postponed");
    h.chain.add_collateral(postponed.collateral_hash, 2, 50);
    let postponed_hash = inject_object(&h, &from, postponed);

    // Orphan vote for an unknown parent.
    let orphan_parent = [0x42; 32];
    let orphan_vote = signed_vote(
        2,
        orphan_parent,
        VoteSignal::Valid,
        VoteOutcome::Yes,
        BASE_TIME - 40,
    );
    inject_vote(&h, &from, orphan_vote);

    let bytes = h.manager.serialize().unwrap();

    let restored = harness_with_masternodes(&[1, 2]);
    restored.manager.restore(&bytes).unwrap();
    restored.manager.init_on_load();

    assert_eq!(restored.manager.snapshot(), h.manager.snapshot());
    assert!(restored.manager.have_object_for_hash(&parent_hash));
    assert!(restored.manager.have_object_for_hash(&postponed_hash));
    assert!(restored.manager.have_vote_for_hash(&vote_hash));
    assert_eq!(restored.manager.vote_count(), 1);
    assert_eq!(restored.manager.orphan_vote_count(), 1);
    assert_eq!(restored.manager.postponed_count(), 1);
}

#[test]
fn test_restore_rejects_wrong_version() {
    let h = harness_with_masternodes(&[1]);
    let bytes = bincode::serialize(&("CGovernanceManager-Version-14", 0u8)).unwrap();
    assert!(h.manager.restore(&bytes).is_err());
}

#[test]
fn test_snapshot_and_display() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let object = proposal_object("prop-snap");
    h.chain.add_collateral(object.collateral_hash, 10, 50);
    inject_object(&h, &from, object);

    let snapshot = h.manager.snapshot();
    assert_eq!(snapshot.objects_total, 1);
    assert_eq!(snapshot.proposals, 1);
    assert_eq!(snapshot.records, 0);

    let display = h.manager.to_display_string();
    assert!(display.contains("Governance Objects: 1"));
    assert!(display.contains("Proposals: 1"));

    let json = h.manager.to_json();
    assert_eq!(json["objects_total"], 1);
}

#[test]
fn test_vote_pull_prefers_triggers_and_caps_peers() {
    let h = harness_with_masternodes(&[1]);
    let from = peer(1);

    let proposal = proposal_object("prop-pull");
    h.chain.add_collateral(proposal.collateral_hash, 10, 50);
    inject_object(&h, &from, proposal);
    let trigger = trigger_object(1, BASE_TIME - 50);
    let trigger_hash = inject_object(&h, &from, trigger);

    let peers: Vec<PeerInfo> = (10u64..16).map(peer).collect();
    h.manager.request_governance_object_votes(&peers, &h.conn);

    // Mainnet asks for one object per pass, triggers first, from at
    // most three peers.
    let asked: Vec<Hash> = peers
        .iter()
        .flat_map(|p| h.conn.sync_requests(p.id))
        .collect();
    assert_eq!(asked.len(), 3);
    assert!(asked.iter().all(|hash| *hash == trigger_hash));
}
