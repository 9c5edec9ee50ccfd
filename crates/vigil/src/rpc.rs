//! CometBFT RPC implementation of [ChainOracle].
//!
//! Plain HTTP GET against the node's JSON endpoints (`/status`, `/block`, `/commit`,
//! `/validators`). Transport and JSON errors are retried a fixed number of times with a fixed
//! delay; after that the call yields [OracleError::Unavailable]. Field paths follow the
//! CometBFT RPC responses exactly.

use crate::config::{PagingConfig, RetryConfig, ValidatorAddress, WatcherConfig};
use crate::oracle::{BlockIdFlag, ChainOracle, Height, OracleError};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::time::sleep;

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct StatusResult {
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    #[serde(deserialize_with = "height_from_string_or_number")]
    latest_block_height: Height,
}

#[derive(Debug, Deserialize)]
struct BlockResult {
    block: Block,
}

#[derive(Debug, Deserialize)]
struct Block {
    header: Header,
}

#[derive(Debug, Deserialize)]
struct Header {
    time: String,
}

#[derive(Debug, Deserialize)]
struct CommitResult {
    signed_header: SignedHeader,
}

#[derive(Debug, Deserialize)]
struct SignedHeader {
    commit: Commit,
}

#[derive(Debug, Deserialize)]
struct Commit {
    #[serde(default)]
    signatures: Vec<CommitSig>,
}

#[derive(Debug, Deserialize)]
struct CommitSig {
    #[serde(default)]
    validator_address: String,
    #[serde(default)]
    block_id_flag: Option<Value>,
    #[serde(default)]
    block_id_flag_str: Option<Value>,
}

impl CommitSig {
    /// `Some(flag)` when the entry carries a usable flag; `None` when it should be treated as
    /// if the validator had no entry at all.
    fn flag(&self) -> Option<BlockIdFlag> {
        match self.block_id_flag.as_ref().or(self.block_id_flag_str.as_ref())? {
            Value::Number(n) => Some(n.as_i64().map_or(BlockIdFlag::Unknown, BlockIdFlag::from_code)),
            Value::String(s) => BlockIdFlag::from_name(s),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ValidatorsResult {
    #[serde(default)]
    validators: Vec<ValidatorEntry>,
}

#[derive(Debug, Deserialize)]
struct ValidatorEntry {
    address: String,
}

fn height_from_string_or_number<'de, D>(deserializer: D) -> Result<Height, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => s.parse().map_err(serde::de::Error::custom),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("height not a u64")),
        other => Err(serde::de::Error::custom(format!("unexpected height {}", other))),
    }
}

/// Parse a header timestamp. Timestamps without an offset are taken as UTC.
pub fn parse_block_time(s: &str) -> Result<DateTime<Utc>, OracleError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|e| OracleError::Decode(format!("block time {:?}: {}", s, e)))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, OracleError> {
    serde_json::from_value::<Envelope<T>>(value)
        .map(|e| e.result)
        .map_err(|e| OracleError::Decode(e.to_string()))
}

/// HTTP oracle against a CometBFT node.
#[derive(Debug, Clone)]
pub struct RpcOracle {
    client: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
    paging: PagingConfig,
}

impl RpcOracle {
    pub fn new(
        base_url: impl Into<String>,
        retry: RetryConfig,
        paging: PagingConfig,
    ) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(retry.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
            paging,
        })
    }

    pub fn from_config(config: &WatcherConfig) -> Result<Self, OracleError> {
        Self::new(&config.rpc_url, config.retry.clone(), config.paging.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_once(&self, url: &str) -> Result<Value, OracleError> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        let json: Value = resp.json().await?;
        if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
            return Err(OracleError::Rpc(err.to_string()));
        }
        Ok(json)
    }

    /// GET `url` with bounded retries.
    async fn get_json(&self, url: &str) -> Result<Value, OracleError> {
        let attempts = self.retry.attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.get_once(url).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    tracing::debug!(%url, attempt, reason = %e, "RPC attempt failed");
                    last_err = Some(e);
                }
            }
            if attempt < attempts {
                sleep(self.retry.delay).await;
            }
        }
        if let Some(e) = last_err {
            tracing::warn!(%url, reason = %e, "RPC unavailable");
        }
        Err(OracleError::Unavailable {
            url: url.to_string(),
            attempts,
        })
    }
}

impl ChainOracle for RpcOracle {
    async fn latest_height(&self) -> Result<Height, OracleError> {
        let url = format!("{}/status", self.base_url);
        let status: StatusResult = decode(self.get_json(&url).await?)?;
        Ok(status.sync_info.latest_block_height)
    }

    async fn block_time(&self, height: Height) -> Result<DateTime<Utc>, OracleError> {
        let url = format!("{}/block?height={}", self.base_url, height);
        let block: BlockResult = decode(self.get_json(&url).await?)?;
        parse_block_time(&block.block.header.time)
    }

    async fn commit_signature(
        &self,
        height: Height,
        validator: &ValidatorAddress,
    ) -> Result<Option<BlockIdFlag>, OracleError> {
        let url = format!("{}/commit?height={}", self.base_url, height);
        let commit: CommitResult = decode(self.get_json(&url).await?)?;
        let flag = commit
            .signed_header
            .commit
            .signatures
            .iter()
            .filter(|s| validator.matches(&s.validator_address))
            .find_map(CommitSig::flag);
        Ok(flag)
    }

    /// Walks the paginated validator listing. A page that cannot be fetched or decoded, an
    /// empty page, or running out of pages all answer `false`.
    async fn is_in_validator_set(
        &self,
        height: Height,
        validator: &ValidatorAddress,
    ) -> Result<bool, OracleError> {
        let PagingConfig { pages_max, per_page } = self.paging;
        if pages_max == 0 || per_page == 0 {
            return Err(OracleError::InvalidRequest(format!(
                "validator paging pages_max={} per_page={}",
                pages_max, per_page
            )));
        }
        for page in 1..=pages_max {
            let url = format!(
                "{}/validators?height={}&per_page={}&page={}",
                self.base_url, height, per_page, page
            );
            let listing = match self.get_json(&url).await.and_then(decode::<ValidatorsResult>) {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::warn!(height, page, reason = %e, "validator set page unavailable, treating as not found");
                    return Ok(false);
                }
            };
            if listing.validators.iter().any(|v| validator.matches(&v.address)) {
                return Ok(true);
            }
            if listing.validators.is_empty() {
                return Ok(false);
            }
        }
        Ok(false)
    }
}
