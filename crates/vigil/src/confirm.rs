//! Confirmation state machine: what to do with a classified height.
//!
//! Two policies, chosen at startup:
//!
//! - [Policy::Direct]: a fresh `MISSED` is reported at once.
//! - [Policy::DoubleConfirm]: a fresh `MISSED` is parked in the pending ledger and reported
//!   only if a later re-check classifies it `MISSED` again. `SIGNED`/`NOT_IN_SET` on re-check
//!   discards it; `UNVERIFIED` keeps it until the TTL runs out, then it is dropped unreported.
//!
//! The machine only mutates [WatcherState]; sending the alert is the caller's job. A height is
//! recorded as alerted when the decision is made, so a height never yields two
//! [Decision::Alert]s however many times it is fed in.

use crate::classify::Classification;
use crate::oracle::Height;
use crate::state::{UnixTime, WatcherState};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Direct,
    DoubleConfirm { pending_ttl: Duration },
}

impl Policy {
    pub fn from_flag(double_confirm: bool, pending_ttl: Duration) -> Self {
        if double_confirm {
            Self::DoubleConfirm { pending_ttl }
        } else {
            Self::Direct
        }
    }

    fn pending_ttl_secs(&self) -> Option<i64> {
        match self {
            Self::Direct => None,
            Self::DoubleConfirm { pending_ttl } => {
                Some(i64::try_from(pending_ttl.as_secs()).unwrap_or(i64::MAX))
            }
        }
    }
}

/// Outcome for one height.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Send a missed-block alert. The height is already recorded as alerted.
    Alert,
    /// Parked (fresh scan) or kept (re-check) in the pending ledger.
    Hold,
    /// Removed from pending without an alert: the miss did not reproduce.
    Discard,
    /// Removed from pending without an alert: unresolved past the TTL.
    Expire,
    /// Nothing to do (not a miss, or already handled).
    Ignore,
}

/// Confirmation state machine over a borrowed [WatcherState].
pub struct Confirmer<'a> {
    policy: Policy,
    state: &'a mut WatcherState,
}

impl<'a> Confirmer<'a> {
    pub fn new(policy: Policy, state: &'a mut WatcherState) -> Self {
        Self { policy, state }
    }

    /// Feed a height classified by the forward scan.
    pub fn on_fresh(&mut self, height: Height, result: Classification, now: UnixTime) -> Decision {
        if result != Classification::Missed {
            return Decision::Ignore;
        }
        if self.state.is_alerted(height) {
            return Decision::Ignore;
        }
        match self.policy {
            Policy::Direct => {
                self.state.mark_alerted(height);
                Decision::Alert
            }
            Policy::DoubleConfirm { .. } => {
                if self.state.is_pending(height) {
                    return Decision::Ignore;
                }
                self.state.pending.insert(height, now);
                Decision::Hold
            }
        }
    }

    /// Feed the re-check of a pending height.
    pub fn on_recheck(&mut self, height: Height, result: Classification, now: UnixTime) -> Decision {
        let Some(&first_seen) = self.state.pending.get(&height) else {
            return Decision::Ignore;
        };
        match result {
            Classification::Missed => {
                if self.state.is_alerted(height) {
                    self.state.pending.remove(&height);
                    Decision::Discard
                } else {
                    self.state.mark_alerted(height);
                    Decision::Alert
                }
            }
            Classification::Signed | Classification::NotInSet => {
                self.state.pending.remove(&height);
                Decision::Discard
            }
            Classification::Unverified => {
                // Direct mode never creates entries; leftovers from an earlier run expire at once.
                let expired = match self.policy.pending_ttl_secs() {
                    Some(ttl) => now.saturating_sub(first_seen) > ttl,
                    None => true,
                };
                if expired {
                    self.state.pending.remove(&height);
                    Decision::Expire
                } else {
                    Decision::Hold
                }
            }
        }
    }
}
