//! Chain oracle: the typed facts the watcher needs from the consensus node.
//!
//! Every query returns a `Result`; an `Err` is the "unavailable" sentinel for that call and the
//! callers decide what absence means (see [crate::classify] and [crate::scanner]).

use crate::config::ValidatorAddress;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Block height.
pub type Height = u64;

/// Per-signature marker in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockIdFlag {
    Absent,
    Commit,
    Nil,
    /// Any value outside the three known flags.
    Unknown,
}

impl BlockIdFlag {
    /// Integer form, per the CometBFT protobuf enum.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Absent,
            2 => Self::Commit,
            3 => Self::Nil,
            _ => Self::Unknown,
        }
    }

    /// String form. Unrecognized names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "BLOCK_ID_FLAG_COMMIT" => Some(Self::Commit),
            "BLOCK_ID_FLAG_NIL" => Some(Self::Nil),
            "BLOCK_ID_FLAG_ABSENT" => Some(Self::Absent),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("unavailable after {attempts} attempts: {url}")]
    Unavailable { url: String, attempts: u32 },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Read-only queries against the consensus node.
#[allow(async_fn_in_trait)]
pub trait ChainOracle {
    /// Latest block height known to the node.
    async fn latest_height(&self) -> Result<Height, OracleError>;

    /// Header timestamp of block `height`.
    async fn block_time(&self, height: Height) -> Result<DateTime<Utc>, OracleError>;

    /// Flag of `validator`'s signature in the commit for `height`; `Ok(None)` when the commit
    /// carries no entry for it.
    async fn commit_signature(
        &self,
        height: Height,
        validator: &ValidatorAddress,
    ) -> Result<Option<BlockIdFlag>, OracleError>;

    /// Whether `validator` is in the validator set at `height`.
    async fn is_in_validator_set(
        &self,
        height: Height,
        validator: &ValidatorAddress,
    ) -> Result<bool, OracleError>;
}
