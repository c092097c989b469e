//! Content-store pinning policy for record and proposal payloads.
//!
//! Masternodes pin the directory a record's CID points at, provided it
//! stays under the size limit, and unpin it when the record is evicted.
//! Daemon failures are logged and never fail the calling path.

use log::{debug, info, warn};
use serde_json::Value;

use ferrite_shared_types::governance::{GovernanceObject, ObjectType};

use crate::providers::ContentStore;
use crate::CONTENT_PIN_SIZE_LIMIT;

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Strict CID v0 shape check: 46 characters, `Qm` prefix, base58 alphabet.
pub fn valid_content_id(cid: &str) -> bool {
    if cid.len() != 46 || !cid.starts_with("Qm") {
        return false;
    }
    cid.chars().all(|c| BASE58_ALPHABET.contains(c))
}

/// Lax pre-filter applied at ingestion: the payload must carry a CID
/// field of plausible length. The strict check runs later, in payload
/// validation.
pub fn lax_content_check(object: &GovernanceObject) -> bool {
    match extract_content_id(object) {
        Some(cid) => {
            if cid.len() < 50 {
                true
            } else {
                info!("lax_content_check -- content id NOT valid");
                false
            }
        }
        None => {
            // Only content-bearing types need a CID at all.
            !matches!(object.object_type, ObjectType::Record)
        }
    }
}

/// Pull the `ipfscid` field out of the object's JSON payload.
pub fn extract_content_id(object: &GovernanceObject) -> Option<String> {
    let json = object.json().ok()?;
    json.get("ipfscid")
        .and_then(Value::as_str)
        .map(str::to_owned)
}

/// Sum every numeric `Size` field in the daemon's listing, at any depth.
fn sum_listing_sizes(value: &Value) -> i64 {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(key, v)| {
                if key == "Size" {
                    v.as_i64().unwrap_or(0)
                } else {
                    sum_listing_sizes(v)
                }
            })
            .sum(),
        Value::Array(items) => items.iter().map(sum_listing_sizes).sum(),
        _ => 0,
    }
}

/// Pin the content behind a record or proposal, subject to the size
/// limit. Only meaningful on masternodes; no-op otherwise.
pub fn pin_object_content(store: &dyn ContentStore, object: &GovernanceObject, masternode_mode: bool) {
    if !masternode_mode {
        return;
    }
    if !matches!(
        object.object_type,
        ObjectType::Record | ObjectType::Proposal
    ) {
        debug!(
            "pin_object_content -- not a record or proposal, type = {:?}",
            object.object_type
        );
        return;
    }

    let Some(cid) = extract_content_id(object) else {
        warn!("pin_object_content -- could not get content id from payload");
        return;
    };
    let path = format!("/ipfs/{}", cid);

    let listing = match store.list(&path) {
        Ok(listing) => listing,
        Err(err) => {
            warn!(
                "pin_object_content -- {} is not a valid content directory or this masternode does not require pinning: {}",
                path, err
            );
            return;
        }
    };

    let total_size = sum_listing_sizes(&listing);
    if total_size > CONTENT_PIN_SIZE_LIMIT {
        info!(
            "pin_object_content -- size check failed: limit {} bytes, got {} bytes, path = {}",
            CONTENT_PIN_SIZE_LIMIT, total_size, path
        );
        return;
    }

    info!("pin_object_content -- pin attempt: {}", path);
    match store.pin_recursive(&path) {
        Ok(()) => info!("pin_object_content -- pinned {}", path),
        Err(err) => warn!("pin_object_content -- pin failed for {}: {}", path, err),
    }
}

/// Unpin an evicted record's content.
pub fn unpin_record_content(store: &dyn ContentStore, object: &GovernanceObject) {
    let Some(cid) = extract_content_id(object) else {
        return;
    };
    let path = format!("/ipfs/{}", cid);
    match store.unpin_recursive(&path) {
        Ok(()) => info!("unpin_record_content -- unpinned {}", path),
        Err(err) => warn!("unpin_record_content -- unpin failed for {}: {}", path, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ContentStoreError;
    use ferrite_shared_types::OutPoint;
    use std::sync::Mutex;

    const GOOD_CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    fn record_with_cid(cid: &str) -> GovernanceObject {
        GovernanceObject {
            object_type: ObjectType::Record,
            data: format!(r#"{{"name":"rec","ipfscid":"{}"}}"#, cid).into_bytes(),
            masternode_outpoint: OutPoint::new([1u8; 32], 0),
            collateral_hash: [2u8; 32],
            creation_time: 0,
            signature: [0u8; 64],
        }
    }

    #[derive(Default)]
    struct FakeStore {
        listing: Option<Value>,
        pinned: Mutex<Vec<String>>,
        unpinned: Mutex<Vec<String>>,
    }

    impl ContentStore for FakeStore {
        fn list(&self, _path: &str) -> Result<Value, ContentStoreError> {
            self.listing
                .clone()
                .ok_or_else(|| ContentStoreError("daemon unreachable".into()))
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

    #[test]
    fn test_strict_cid_shape() {
        assert!(valid_content_id(GOOD_CID));
        assert!(!valid_content_id("Qmshort"));
        // 'l' is not in the base58 alphabet.
        assert!(!valid_content_id(&format!("Qm{}l", &GOOD_CID[2..45])));
        assert!(!valid_content_id(&GOOD_CID.replace("Qm", "Qx")));
    }

    #[test]
    fn test_lax_check_accepts_short_ids() {
        assert!(lax_content_check(&record_with_cid("anything-short")));
        let long = "x".repeat(60);
        assert!(!lax_content_check(&record_with_cid(&long)));
    }

    #[test]
    fn test_size_sum_is_recursive() {
        let listing = serde_json::json!({
            "Objects": [
                {"Size": 100, "Links": [{"Size": 200}, {"Size": 300}]},
                {"Size": 400}
            ]
        });
        assert_eq!(sum_listing_sizes(&listing), 1000);
    }

    #[test]
    fn test_oversized_content_not_pinned() {
        let store = FakeStore {
            listing: Some(serde_json::json!({"Size": CONTENT_PIN_SIZE_LIMIT + 1})),
            ..Default::default()
        };
        pin_object_content(&store, &record_with_cid(GOOD_CID), true);
        assert!(store.pinned.lock().unwrap().is_empty());
    }

    #[test]
    fn test_pin_and_unpin_paths() {
        let store = FakeStore {
            listing: Some(serde_json::json!({"Size": 1234})),
            ..Default::default()
        };
        let record = record_with_cid(GOOD_CID);
        pin_object_content(&store, &record, true);
        assert_eq!(
            store.pinned.lock().unwrap().as_slice(),
            [format!("/ipfs/{}", GOOD_CID)]
        );

        unpin_record_content(&store, &record);
        assert_eq!(
            store.unpinned.lock().unwrap().as_slice(),
            [format!("/ipfs/{}", GOOD_CID)]
        );
    }

    #[test]
    fn test_daemon_errors_are_swallowed() {
        let store = FakeStore::default();
        // Must not panic or propagate.
        pin_object_content(&store, &record_with_cid(GOOD_CID), true);
        assert!(store.pinned.lock().unwrap().is_empty());
    }

    #[test]
    fn test_non_masternode_does_not_pin() {
        let store = FakeStore {
            listing: Some(serde_json::json!({"Size": 1})),
            ..Default::default()
        };
        pin_object_content(&store, &record_with_cid(GOOD_CID), false);
        assert!(store.pinned.lock().unwrap().is_empty());
    }
}
