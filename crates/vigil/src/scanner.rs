//! Window scanner: one watcher cycle, the startup backfill, and the polling loop.
//!
//! Per cycle: fetch the tip, step back by the confirmation lag, re-check pending heights (in
//! ascending order), then classify `last_checked + 1 ..= safe_tip` and move the watermark to
//! `safe_tip`. State goes in and comes out by value; nothing else holds it.
//!
//! A height skipped for freshness during the forward sweep is still covered by the watermark
//! advance and is not revisited. Liveness of the watermark wins over completeness here.

use crate::classify::{classify, Classification};
use crate::config::WatcherConfig;
use crate::confirm::{Confirmer, Decision, Policy};
use crate::notify::{missed_block_message, startup_message, Notifier};
use crate::oracle::{ChainOracle, Height};
use crate::state::WatcherState;
use crate::store::StateStore;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::future::Future;
use tokio::time::sleep;

/// What one cycle did; for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// `None` when the tip was unavailable and the cycle did nothing.
    pub tip: Option<Height>,
    pub safe_tip: Height,
    pub pending_checked: usize,
    pub scanned: usize,
    pub skipped_fresh: usize,
    pub held: usize,
    pub discarded: usize,
    pub expired: usize,
    /// Heights a missed-block alert was issued for, in order.
    pub alerted: Vec<Height>,
    pub alerts_failed: usize,
    pub evicted: usize,
}

/// Result of the startup backfill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    pub start: Height,
    pub end: Height,
    pub signed: usize,
    pub missed: usize,
    pub missed_heights: Vec<Height>,
}

/// How the startup pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Startup {
    /// No tip from the oracle; nothing changed.
    TipUnavailable,
    /// Persisted watermark is recent enough; scanning resumes from it.
    Resumed,
    /// Backfill ran and the watermark now sits at the safe tip.
    Backfilled(BackfillSummary),
}

/// The watcher: oracle, notifier, and the immutable config they run under.
pub struct Watcher<O, N> {
    config: WatcherConfig,
    policy: Policy,
    oracle: O,
    notifier: N,
}

impl<O: ChainOracle, N: Notifier> Watcher<O, N> {
    pub fn new(config: WatcherConfig, oracle: O, notifier: N) -> Self {
        let policy = Policy::from_flag(config.double_confirm, config.pending_ttl);
        Self {
            config,
            policy,
            oracle,
            notifier,
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    fn safe_tip(&self, tip: Height) -> Height {
        tip.saturating_sub(self.config.confirm_lag)
    }

    /// Tip, with 0 and errors both meaning "unavailable".
    async fn tip(&self) -> Option<Height> {
        match self.oracle.latest_height().await {
            Ok(0) => None,
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(reason = %e, "latest height unavailable");
                None
            }
        }
    }

    /// True when the block is known to be younger than the freshness threshold. Unknown block
    /// time never skips.
    async fn is_too_fresh(&self, height: Height, now: DateTime<Utc>) -> bool {
        let Ok(block_time) = self.oracle.block_time(height).await else {
            return false;
        };
        let threshold = chrono::Duration::from_std(self.config.fresh_block_skip)
            .unwrap_or(chrono::Duration::zero());
        now.signed_duration_since(block_time) < threshold
    }

    /// Send the startup notice.
    pub async fn announce(&self) -> bool {
        let text = startup_message(
            &self.config.watcher_label,
            &self.config.network,
            &self.config.rpc_url,
            self.config.validator.as_str(),
            self.config.poll_interval,
        );
        self.notifier.send(&text).await
    }

    /// Startup pass over the last `backfill_window` heights below the safe tip. Classifies
    /// them for the log summary, sends nothing, and moves the watermark to the safe tip.
    ///
    /// Skipped when the persisted watermark is within the window, so a restart resumes
    /// scanning (and alerting) from where it stopped.
    pub async fn initialize(
        &self,
        mut state: WatcherState,
        now: DateTime<Utc>,
    ) -> (WatcherState, Startup) {
        let Some(tip) = self.tip().await else {
            return (state, Startup::TipUnavailable);
        };
        let end = self.safe_tip(tip);
        if end == 0 {
            return (state, Startup::Resumed);
        }
        let window = self.config.backfill_window;
        if state.last_checked > 0 && end.saturating_sub(state.last_checked) <= window {
            tracing::info!(last_checked = state.last_checked, safe_tip = end, "resuming from persisted watermark");
            return (state, Startup::Resumed);
        }

        let start = end.saturating_sub(window).saturating_add(1).max(1);
        let mut summary = BackfillSummary {
            start,
            end,
            ..Default::default()
        };
        for height in start..=end {
            if self.is_too_fresh(height, now).await {
                continue;
            }
            match classify(&self.oracle, &self.config.validator, height).await {
                Classification::Signed => summary.signed += 1,
                Classification::Missed => {
                    summary.missed += 1;
                    summary.missed_heights.push(height);
                }
                Classification::NotInSet | Classification::Unverified => {}
            }
        }
        state.advance_watermark(end);
        tracing::info!(
            start = summary.start,
            end = summary.end,
            signed = summary.signed,
            missed = summary.missed,
            missed_heights = ?summary.missed_heights,
            "backfill window"
        );
        (state, Startup::Backfilled(summary))
    }

    /// One cycle. Never fails; an unavailable tip leaves the state untouched.
    pub async fn run_cycle(
        &self,
        mut state: WatcherState,
        now: DateTime<Utc>,
    ) -> (WatcherState, CycleReport) {
        let mut report = CycleReport::default();
        let Some(tip) = self.tip().await else {
            return (state, report);
        };
        let safe_tip = self.safe_tip(tip);
        report.tip = Some(tip);
        report.safe_tip = safe_tip;
        let now_ts = now.timestamp();

        let pending: Vec<Height> = state.pending.keys().copied().collect();
        for height in pending {
            if self.is_too_fresh(height, now).await {
                report.skipped_fresh += 1;
                continue;
            }
            let result = classify(&self.oracle, &self.config.validator, height).await;
            report.pending_checked += 1;
            let decision = Confirmer::new(self.policy, &mut state).on_recheck(height, result, now_ts);
            self.apply(decision, height, now, &mut report).await;
        }

        let start = state.last_checked.saturating_add(1).max(1);
        if start <= safe_tip {
            for height in start..=safe_tip {
                if self.is_too_fresh(height, now).await {
                    report.skipped_fresh += 1;
                    continue;
                }
                let result = classify(&self.oracle, &self.config.validator, height).await;
                report.scanned += 1;
                let decision = Confirmer::new(self.policy, &mut state).on_fresh(height, result, now_ts);
                self.apply(decision, height, now, &mut report).await;
            }
            state.advance_watermark(safe_tip);
        }

        report.evicted = state.enforce_retention(&self.config.retention);
        (state, report)
    }

    async fn apply(&self, decision: Decision, height: Height, now: DateTime<Utc>, report: &mut CycleReport) {
        match decision {
            Decision::Alert => {
                report.alerted.push(height);
                let text = missed_block_message(
                    height,
                    &self.config.network,
                    &self.config.watcher_label,
                    &now.with_timezone(&Local),
                );
                if self.notifier.send(&text).await {
                    tracing::info!(height, "missed block alert sent");
                } else {
                    report.alerts_failed += 1;
                    tracing::warn!(height, "missed block alert not delivered");
                }
            }
            Decision::Hold => {
                report.held += 1;
                tracing::debug!(height, "miss pending confirmation");
            }
            Decision::Discard => {
                report.discarded += 1;
                tracing::info!(height, "pending miss did not reproduce");
            }
            Decision::Expire => {
                report.expired += 1;
                tracing::info!(height, "pending miss unresolved past TTL, dropped");
            }
            Decision::Ignore => {}
        }
    }

    /// Poll until `shutdown` resolves. State is loaded from `store`, saved after every cycle
    /// and once more on the way out.
    pub async fn run<F>(&self, store: &StateStore, shutdown: F) -> WatcherState
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut state = store.load();
        loop {
            let (next, startup) = self.initialize(state, Utc::now()).await;
            state = next;
            if startup != Startup::TipUnavailable {
                break;
            }
            tokio::select! {
                _ = &mut shutdown => return state,
                _ = sleep(self.config.poll_interval) => {}
            }
        }
        store.save(&state);

        loop {
            let (next, report) = self.run_cycle(state, Utc::now()).await;
            state = next;
            if report.tip.is_some() {
                store.save(&state);
            }
            tracing::debug!(?report, last_checked = state.last_checked, "cycle done");

            tokio::select! {
                _ = &mut shutdown => break,
                _ = sleep(self.config.poll_interval) => {}
            }
        }
        store.save(&state);
        tracing::info!(last_checked = state.last_checked, "watcher stopped");
        state
    }
}
