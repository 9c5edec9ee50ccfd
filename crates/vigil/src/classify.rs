//! Height classification: did the watched validator sign block `h`?

use crate::config::ValidatorAddress;
use crate::oracle::{BlockIdFlag, ChainOracle, Height};
use serde::Serialize;

/// Outcome of one classification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Signed,
    Missed,
    NotInSet,
    /// Oracle data incomplete or unusable; may resolve on a later attempt.
    Unverified,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Signed => "SIGNED",
            Self::Missed => "MISSED",
            Self::NotInSet => "NOT_IN_SET",
            Self::Unverified => "UNVERIFIED",
        };
        f.write_str(s)
    }
}

/// Classify `height` for `validator`.
///
/// A flag in the commit is authoritative. Only when the commit has no usable entry for the
/// validator (or cannot be fetched) is the validator set consulted, to tell "not a signer at
/// this height" apart from "should have signed and did not". Never fails: oracle trouble on
/// the fallback path comes back as [Classification::Unverified].
pub async fn classify<O: ChainOracle>(
    oracle: &O,
    validator: &ValidatorAddress,
    height: Height,
) -> Classification {
    let flag = match oracle.commit_signature(height, validator).await {
        Ok(flag) => flag,
        Err(e) => {
            tracing::debug!(height, reason = %e, "commit unavailable, falling back to validator set");
            None
        }
    };

    let result = match flag {
        Some(BlockIdFlag::Commit) => Classification::Signed,
        Some(BlockIdFlag::Nil) | Some(BlockIdFlag::Absent) => Classification::Missed,
        Some(BlockIdFlag::Unknown) => Classification::Unverified,
        None => match oracle.is_in_validator_set(height, validator).await {
            Ok(true) => Classification::Missed,
            Ok(false) => Classification::NotInSet,
            Err(e) => {
                tracing::warn!(height, reason = %e, "validator set lookup failed");
                Classification::Unverified
            }
        },
    };
    tracing::debug!(height, %result, "classified");
    result
}
