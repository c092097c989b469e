//! Per-masternode trigger submission rate limiting.

use std::collections::{HashMap, VecDeque};

use log::info;
use serde::{Deserialize, Serialize};

use ferrite_shared_types::governance::{GovernanceObject, ObjectType};
use ferrite_shared_types::OutPoint;

use crate::MAX_TIME_FUTURE_DEVIATION;

/// How many recent submission timestamps are kept per masternode.
const RATE_BUFFER_SIZE: usize = 5;

/// Sliding window of recent submission timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateCheckBuffer {
    timestamps: VecDeque<i64>,
}

impl RateCheckBuffer {
    pub fn new() -> Self {
        RateCheckBuffer::default()
    }

    pub fn add_timestamp(&mut self, timestamp: i64) {
        if self.timestamps.len() >= RATE_BUFFER_SIZE {
            self.timestamps.pop_front();
        }
        self.timestamps.push_back(timestamp);
    }

    pub fn count(&self) -> usize {
        self.timestamps.len()
    }

    /// Submissions per second over the buffered window; zero until at
    /// least two timestamps are known. A window of identical timestamps
    /// yields an infinite rate, which always fails the limit check.
    pub fn rate(&self) -> f64 {
        if self.timestamps.len() < 2 {
            return 0.0;
        }
        let min = *self.timestamps.iter().min().unwrap_or(&0);
        let max = *self.timestamps.iter().max().unwrap_or(&0);
        self.timestamps.len() as f64 / (max - min) as f64
    }
}

/// Rate state for one masternode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasternodeRateRecord {
    pub trigger_buffer: RateCheckBuffer,
    /// Cleared when the masternode exceeds the submission rate; while
    /// false every non-forced check runs the full rate computation.
    pub status_ok: bool,
}

impl MasternodeRateRecord {
    fn new() -> Self {
        MasternodeRateRecord {
            trigger_buffer: RateCheckBuffer::new(),
            status_ok: true,
        }
    }
}

/// Outcome of a rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateCheckResult {
    pub ok: bool,
    /// The check was skipped because the masternode's status is still
    /// good; the caller must re-check with `force` after signature
    /// verification.
    pub bypassed: bool,
}

impl RateCheckResult {
    fn pass() -> Self {
        RateCheckResult {
            ok: true,
            bypassed: false,
        }
    }

    fn fail() -> Self {
        RateCheckResult {
            ok: false,
            bypassed: false,
        }
    }
}

/// Polices trigger submissions per masternode collateral.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MasternodeRateLimiter {
    records: HashMap<OutPoint, MasternodeRateRecord>,
}

impl MasternodeRateLimiter {
    pub fn new() -> Self {
        MasternodeRateLimiter::default()
    }

    pub fn record(&self, outpoint: &OutPoint) -> Option<&MasternodeRateRecord> {
        self.records.get(outpoint)
    }

    /// Record an accepted submission and reset the masternode's status.
    /// Returns true when the object's creation time is close enough to
    /// the future bound that the caller should schedule an extra relay
    /// once the timestamp becomes credible to other nodes.
    pub fn update(&mut self, object: &GovernanceObject, now: i64) -> bool {
        if object.object_type != ObjectType::Trigger {
            return false;
        }
        let record = self
            .records
            .entry(object.masternode_outpoint)
            .or_insert_with(MasternodeRateRecord::new);

        let timestamp = object.creation_time;
        record.trigger_buffer.add_timestamp(timestamp);
        record.status_ok = true;

        timestamp > now + MAX_TIME_FUTURE_DEVIATION - crate::RELIABLE_PROPAGATION_TIME
    }

    /// Check whether `object` may be submitted.
    ///
    /// The two-phase bypass: while `status_ok` holds and `force` is off
    /// the check is skipped (`bypassed = true`) so callers can defer the
    /// expensive signature verification; the post-verification call with
    /// `force = true` then enforces the rate.
    #[allow(clippy::too_many_arguments)]
    pub fn check(
        &mut self,
        object: &GovernanceObject,
        update_fail_status: bool,
        force: bool,
        enabled: bool,
        synced: bool,
        now: i64,
        superblock_cycle_seconds: i64,
    ) -> RateCheckResult {
        if !synced || !enabled {
            return RateCheckResult::pass();
        }
        if object.object_type != ObjectType::Trigger {
            return RateCheckResult::pass();
        }

        let outpoint = &object.masternode_outpoint;
        let timestamp = object.creation_time;

        if timestamp < now - 2 * superblock_cycle_seconds {
            info!(
                "MasternodeRateLimiter -- object {} rejected, too old timestamp: masternode = {}, timestamp = {}, now = {}",
                ferrite_shared_types::hash_hex(&object.hash()),
                outpoint.to_string_short(),
                timestamp,
                now
            );
            return RateCheckResult::fail();
        }
        if timestamp > now + MAX_TIME_FUTURE_DEVIATION {
            info!(
                "MasternodeRateLimiter -- object {} rejected, too far in future: masternode = {}, timestamp = {}, now = {}",
                ferrite_shared_types::hash_hex(&object.hash()),
                outpoint.to_string_short(),
                timestamp,
                now
            );
            return RateCheckResult::fail();
        }

        let Some(record) = self.records.get_mut(outpoint) else {
            return RateCheckResult::pass();
        };

        if record.status_ok && !force {
            return RateCheckResult {
                ok: true,
                bypassed: true,
            };
        }

        // Allow 1 trigger per masternode per cycle, with a small fudge factor.
        let max_rate = 2.0 * 1.1 / superblock_cycle_seconds as f64;

        // Temporary copy to check the rate after the new timestamp is added.
        let mut buffer = record.trigger_buffer.clone();
        buffer.add_timestamp(timestamp);
        let rate = buffer.rate();

        if rate < max_rate {
            return RateCheckResult::pass();
        }

        info!(
            "MasternodeRateLimiter -- rate too high: masternode = {}, timestamp = {}, rate = {}, max rate = {}",
            outpoint.to_string_short(),
            timestamp,
            rate,
            max_rate
        );
        if update_fail_status {
            record.status_ok = false;
        }
        RateCheckResult::fail()
    }
}
