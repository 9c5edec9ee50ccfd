//! Off-chain validator watcher: signing verification and missed-block alerts for CometBFT chains.
//!
//! - **RpcOracle**: typed queries against the node (tip, block time, commit flag, validator-set
//!   membership) with bounded retries; failures come back as values, never panics.
//! - **classify**: turns those facts into SIGNED / MISSED / NOT_IN_SET / UNVERIFIED for one height.
//! - **Confirmer**: the pending-miss ledger and alerted set; with double confirmation a miss is
//!   reported only after a later re-check reproduces it.
//! - **Watcher**: drives classification across `last_checked + 1 ..= tip - lag` each cycle,
//!   skipping blocks that are too fresh, and persists [WatcherState] through [StateStore].

pub mod classify;
pub mod config;
pub mod confirm;
pub mod notify;
pub mod oracle;
pub mod rpc;
pub mod scanner;
pub mod state;
pub mod store;

pub use classify::{classify, Classification};
pub use config::{
    ConfigError, PagingConfig, RetentionConfig, RetryConfig, TelegramConfig, ValidatorAddress,
    WatcherConfig,
};
pub use confirm::{Confirmer, Decision, Policy};
pub use notify::{Notifier, NotifyError, TelegramNotifier};
pub use oracle::{BlockIdFlag, ChainOracle, Height, OracleError};
pub use rpc::RpcOracle;
pub use scanner::{BackfillSummary, CycleReport, Startup, Watcher};
pub use state::{UnixTime, WatcherState};
pub use store::{StateError, StateStore};
