//! Common helpers for integration tests.
//! Some helpers are only used by specific test binaries; allow dead_code to avoid per-binary warnings.
#![allow(dead_code)]

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use vigil::{BlockIdFlag, ChainOracle, Height, Notifier, OracleError, ValidatorAddress, WatcherConfig};

pub const VALCONS: &str = "0F1E2D3C4B5A69788796A5B4C3D2E1F00F1E2D3C";
pub const OTHER: &str = "AAAABBBBCCCCDDDDEEEEFFFF0000111122223333";

pub fn validator() -> ValidatorAddress {
    VALCONS.parse().expect("valid address")
}

/// Config for fixture-driven tests: no freshness skip, lag 2, TTL 30s.
pub fn test_config(double_confirm: bool) -> WatcherConfig {
    let mut c = WatcherConfig::new("http://fixture.invalid", validator());
    c.double_confirm = double_confirm;
    c.fresh_block_skip = std::time::Duration::ZERO;
    c.backfill_window = 10;
    c.network = "test-net".into();
    c.watcher_label = "test-host".into();
    c
}

pub fn at(ts: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(ts, 0).expect("timestamp")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("vigil=debug"))
        .with_test_writer()
        .try_init();
}

/// Scripted answer for the commit query at one height.
#[derive(Debug, Clone, Copy)]
pub enum CommitAnswer {
    Flag(BlockIdFlag),
    NoEntry,
    Unavailable,
}

/// Scripted answer for validator-set membership at one height.
#[derive(Debug, Clone, Copy)]
pub enum SetAnswer {
    Member,
    NotMember,
    Fails,
}

#[derive(Debug, Default)]
struct Chain {
    tip: Option<Height>,
    block_times: HashMap<Height, DateTime<Utc>>,
    commits: HashMap<Height, CommitAnswer>,
    sets: HashMap<Height, SetAnswer>,
    commit_queries: Vec<Height>,
}

/// Deterministic in-memory oracle. Unscripted heights are signed; block times are unknown.
#[derive(Debug, Default)]
pub struct FixtureOracle {
    chain: Mutex<Chain>,
}

impl FixtureOracle {
    pub fn with_tip(tip: Height) -> Self {
        let o = Self::default();
        o.set_tip(Some(tip));
        o
    }

    pub fn set_tip(&self, tip: Option<Height>) {
        self.chain.lock().unwrap().tip = tip;
    }

    pub fn set_commit(&self, height: Height, answer: CommitAnswer) {
        self.chain.lock().unwrap().commits.insert(height, answer);
    }

    pub fn set_in_set(&self, height: Height, answer: SetAnswer) {
        self.chain.lock().unwrap().sets.insert(height, answer);
    }

    pub fn set_block_time(&self, height: Height, t: DateTime<Utc>) {
        self.chain.lock().unwrap().block_times.insert(height, t);
    }

    /// Mark `height` as missed (absent flag).
    pub fn miss(&self, height: Height) {
        self.set_commit(height, CommitAnswer::Flag(BlockIdFlag::Absent));
    }

    pub fn sign(&self, height: Height) {
        self.set_commit(height, CommitAnswer::Flag(BlockIdFlag::Commit));
    }

    /// Heights the commit endpoint was asked for, in order; clears the log.
    pub fn take_commit_queries(&self) -> Vec<Height> {
        std::mem::take(&mut self.chain.lock().unwrap().commit_queries)
    }
}

fn unavailable() -> OracleError {
    OracleError::Unavailable {
        url: "fixture".into(),
        attempts: 1,
    }
}

impl ChainOracle for FixtureOracle {
    async fn latest_height(&self) -> Result<Height, OracleError> {
        self.chain.lock().unwrap().tip.ok_or_else(unavailable)
    }

    async fn block_time(&self, height: Height) -> Result<DateTime<Utc>, OracleError> {
        self.chain
            .lock()
            .unwrap()
            .block_times
            .get(&height)
            .copied()
            .ok_or_else(unavailable)
    }

    async fn commit_signature(
        &self,
        height: Height,
        validator: &ValidatorAddress,
    ) -> Result<Option<BlockIdFlag>, OracleError> {
        assert_eq!(validator.as_str(), VALCONS);
        let mut chain = self.chain.lock().unwrap();
        chain.commit_queries.push(height);
        match chain
            .commits
            .get(&height)
            .copied()
            .unwrap_or(CommitAnswer::Flag(BlockIdFlag::Commit))
        {
            CommitAnswer::Flag(f) => Ok(Some(f)),
            CommitAnswer::NoEntry => Ok(None),
            CommitAnswer::Unavailable => Err(unavailable()),
        }
    }

    async fn is_in_validator_set(
        &self,
        height: Height,
        _validator: &ValidatorAddress,
    ) -> Result<bool, OracleError> {
        match self
            .chain
            .lock()
            .unwrap()
            .sets
            .get(&height)
            .copied()
            .unwrap_or(SetAnswer::Member)
        {
            SetAnswer::Member => Ok(true),
            SetAnswer::NotMember => Ok(false),
            SetAnswer::Fails => Err(OracleError::InvalidRequest("fixture".into())),
        }
    }
}

/// Notifier that records every message; can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Heights mentioned in missed-block alerts, in send order.
    pub fn alerted_heights(&self) -> Vec<Height> {
        self.messages()
            .iter()
            .filter_map(|m| {
                let rest = m.split("Height: *").nth(1)?;
                rest.split('*').next()?.parse().ok()
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> bool {
        self.sent.lock().unwrap().push(text.to_string());
        !self.failing.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// One request seen by the HTTP fixture.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    /// Path plus query, e.g. `/commit?height=5`.
    pub target: String,
    pub body: String,
}

pub type Seen = Arc<Mutex<Vec<SeenRequest>>>;

/// Serve canned responses on a dynamic loopback port. `handler` maps each request to
/// `(status, body)`. Returns the base URL and the request log.
pub async fn spawn_http_fixture<F>(handler: F) -> Result<(String, Seen)>
where
    F: Fn(&SeenRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.context("bind fixture")?;
    let url = format!("http://{}", listener.local_addr()?);
    let seen: Seen = Arc::default();
    let handler = Arc::new(handler);
    let log = Arc::clone(&seen);
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            let handler = Arc::clone(&handler);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let Some(req) = read_request(&mut sock).await else {
                    return;
                };
                log.lock().unwrap().push(req.clone());
                let (status, body) = handler(&req);
                let resp = format!(
                    "HTTP/1.1 {} Fixture\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    Ok((url, seen))
}

async fn read_request(sock: &mut tokio::net::TcpStream) -> Option<SeenRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = sock.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = sock.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buf[header_end..body_end]).to_string();
    Some(SeenRequest { method, target, body })
}
