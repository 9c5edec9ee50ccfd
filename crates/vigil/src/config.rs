//! Watcher configuration.
//!
//! Built once at startup (see [WatcherConfig::from_env]) and passed by reference into every
//! component; nothing inside the scan loop reads the environment.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_RPC_URL: &str = "https://rpc.story.cumulo.me";
pub const DEFAULT_STATE_FILE: &str = "/var/lib/story-external-watcher/state.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("invalid validator address: {0}")]
    ValidatorAddress(String),
}

/// Upper-cased hex consensus address of the watched validator (VALCONS).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ValidatorAddress(String);

impl ValidatorAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against an address as reported by the node.
    pub fn matches(&self, reported: &str) -> bool {
        reported.eq_ignore_ascii_case(&self.0)
    }
}

impl FromStr for ValidatorAddress {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| ConfigError::ValidatorAddress(e.to_string()))?;
        if bytes.len() != 20 {
            return Err(ConfigError::ValidatorAddress(format!(
                "must be 20 bytes (40 hex chars), got {}",
                bytes.len()
            )));
        }
        Ok(Self(s.to_ascii_uppercase()))
    }
}

impl std::fmt::Display for ValidatorAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bounded retry policy for oracle HTTP calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts per call (at least 1).
    pub attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            delay: Duration::from_millis(400),
            timeout: Duration::from_secs(8),
        }
    }
}

/// Validator-set pagination limits.
#[derive(Debug, Clone)]
pub struct PagingConfig {
    pub pages_max: u32,
    pub per_page: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            pages_max: 12,
            per_page: 100,
        }
    }
}

/// Size bounds for the alerted set and the pending ledger.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Alerted set is pruned once it grows past this many heights...
    pub alerted_max: usize,
    /// ...down to this many of the newest ones. Also the cap on the persisted list.
    pub alerted_keep: usize,
    /// Pending ledger evicts its lowest heights beyond this size.
    pub pending_max: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            alerted_max: 5000,
            alerted_keep: 2000,
            pending_max: 1000,
        }
    }
}

#[derive(Clone, Default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        !self.bot_token.is_empty() && !self.chat_id.is_empty()
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Watcher configuration.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// CometBFT RPC base URL (no trailing slash).
    pub rpc_url: String,
    pub validator: ValidatorAddress,
    pub telegram: TelegramConfig,
    /// Network label used in messages.
    pub network: String,
    /// Host/instance label used in messages.
    pub watcher_label: String,
    pub poll_interval: Duration,
    /// Heights covered by the startup backfill pass.
    pub backfill_window: u64,
    pub state_file: std::path::PathBuf,
    pub paging: PagingConfig,
    pub retry: RetryConfig,
    /// Blocks kept between the chain tip and the highest classified height.
    pub confirm_lag: u64,
    /// Blocks younger than this are skipped for the current cycle.
    pub fresh_block_skip: Duration,
    pub double_confirm: bool,
    pub pending_ttl: Duration,
    pub retention: RetentionConfig,
}

impl WatcherConfig {
    /// Config with defaults for everything except the required identities.
    pub fn new(rpc_url: impl Into<String>, validator: ValidatorAddress) -> Self {
        Self {
            rpc_url: rpc_url.into().trim_end_matches('/').to_string(),
            validator,
            telegram: TelegramConfig::default(),
            network: "story-1".into(),
            watcher_label: "unknown".into(),
            poll_interval: Duration::from_secs(2),
            backfill_window: 100,
            state_file: DEFAULT_STATE_FILE.into(),
            paging: PagingConfig::default(),
            retry: RetryConfig::default(),
            confirm_lag: 2,
            fresh_block_skip: Duration::from_secs(3),
            double_confirm: true,
            pending_ttl: Duration::from_secs(30),
            retention: RetentionConfig::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let validator: ValidatorAddress = required("VALCONS_ADDRESS")?.parse()?;
        let telegram = TelegramConfig {
            bot_token: required("TELEGRAM_BOT_TOKEN")?,
            chat_id: required("TELEGRAM_CHAT_ID")?,
        };

        let rpc_url = get("STORY_RPC_HTTP").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        let mut config = Self::new(rpc_url, validator);
        config.telegram = telegram;
        if let Some(network) = get("NETWORK_LABEL") {
            config.network = network;
        }
        if let Some(label) = get("WATCHER_LABEL")
            .or_else(|| get("HOSTNAME"))
            .or_else(system_hostname)
        {
            config.watcher_label = label;
        }
        if let Some(path) = get("STATE_FILE") {
            config.state_file = path.into();
        }

        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parse_opt(&get, key)?.map(Duration::from_secs).unwrap_or(default))
        };
        config.poll_interval = secs("POLL_INTERVAL_SEC", config.poll_interval)?;
        config.fresh_block_skip = secs("FRESH_BLOCK_SKIP_SEC", config.fresh_block_skip)?;
        config.pending_ttl = secs("PENDING_TTL_SEC", config.pending_ttl)?;
        config.retry.timeout = secs("HTTP_TIMEOUT_SEC", config.retry.timeout)?;
        if let Some(ms) = parse_opt(&get, "RETRY_DELAY_MS")? {
            config.retry.delay = Duration::from_millis(ms);
        }

        config.backfill_window =
            parse_opt(&get, "BACKFILL_LAST_N")?.unwrap_or(config.backfill_window);
        config.confirm_lag = parse_opt(&get, "BLOCK_CONFIRM_LAG")?.unwrap_or(config.confirm_lag);
        config.paging.pages_max =
            parse_opt(&get, "VALIDATORS_PAGES_MAX")?.unwrap_or(config.paging.pages_max);
        config.paging.per_page =
            parse_opt(&get, "VALIDATORS_PER_PAGE")?.unwrap_or(config.paging.per_page);
        let attempts: u32 = parse_opt(&get, "RETRY_HTTP")?.unwrap_or(config.retry.attempts);
        config.retry.attempts = attempts.max(1);

        config.retention.alerted_max =
            parse_opt(&get, "ALERTED_MAX")?.unwrap_or(config.retention.alerted_max);
        config.retention.alerted_keep =
            parse_opt(&get, "ALERTED_KEEP")?.unwrap_or(config.retention.alerted_keep);
        config.retention.pending_max =
            parse_opt(&get, "PENDING_MAX")?.unwrap_or(config.retention.pending_max);

        // Only the literal "true" enables it; anything else set explicitly disables it.
        if let Some(v) = get("DOUBLE_CONFIRM") {
            config.double_confirm = v.eq_ignore_ascii_case("true");
        }
        Ok(config)
    }
}

/// Host name as reported by the kernel.
pub fn system_hostname() -> Option<String> {
    ["/proc/sys/kernel/hostname", "/etc/hostname"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
}

fn parse_opt<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}
