use crate::error::{AppError, Result};
use crate::types::SourceId;

pub const DEFAULT_SOURCE_URLS: &str = "1=http://127.0.0.1:5001/get_odds1,\
2=http://127.0.0.1:5002/get_odds2,\
3=http://127.0.0.1:5003/get_odds3";

/// Per-request timeout for a source feed fetch (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 15;

/// Attempts per source per cycle before the whole cycle is abandoned.
pub const FETCH_RETRIES: u32 = 3;

/// Fixed delay between fetch attempts (milliseconds).
pub const FETCH_RETRY_DELAY_MS: u64 = 1_000;

/// Normal ingestion cadence while matches are being found (seconds).
pub const INGEST_INTERVAL_SECS: u64 = 5;

/// Sleep after a cycle abandoned because a required source failed (seconds).
pub const FAILURE_BACKOFF_SECS: u64 = 60;

/// Sleep after a cycle that matched zero fixtures (seconds).
pub const STANDBY_SECS: u64 = 600;

/// Broadcaster poll interval over the latest-matches cache (seconds).
pub const BROADCAST_INTERVAL_SECS: u64 = 2;

/// Upper bound of the monitor window, relative to now (hours).
pub const MONITOR_HORIZON_HOURS: i64 = 12;

/// Monitor sleep while both detectors are disabled (seconds).
pub const MONITOR_IDLE_SECS: u64 = 60;

/// Max records per source returned by the history endpoint.
pub const HISTORY_LIMIT: usize = 200;

/// Persisted point warnings older than this are not served by the cached-warnings endpoint.
pub const POINT_WARNING_LOOKBACK_HOURS: i64 = 48;

/// Look-ahead for the upcoming-odds dump (hours).
pub const UPCOMING_LOOKAHEAD_HOURS: i64 = 24;

/// Pool acquire timeout, bounds every statement's wait for a connection (seconds).
pub const DB_ACQUIRE_TIMEOUT_SECS: u64 = 10;

/// SQLite busy handler wait on a locked database (seconds).
pub const DB_BUSY_TIMEOUT_SECS: u64 = 5;

/// Deadline for the history and range reads (seconds).
pub const DB_QUERY_TIMEOUT_SECS: u64 = 15;

/// Relay heartbeat ping interval (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 30;

/// Relay reconnect backoff values in milliseconds.
pub const RECONNECT_BACKOFF_MS: &[u64] = &[500, 1_000, 2_000, 5_000, 10_000];

/// Channel capacity between the ingestor and the persistence writer.
pub const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEndpoint {
    pub id: SourceId,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Feeds to poll, all required every cycle (SOURCE_URLS, `id=url` comma-separated)
    pub sources: Vec<SourceEndpoint>,
    /// Source whose names define match identity (CANONICAL_SOURCE)
    pub canonical_source: SourceId,
    /// Source whose prices feed the 189 index and the range check (INDEX_SOURCE)
    pub index_source: SourceId,
    /// Pool bounds (DB_MIN_CONNECTIONS / DB_MAX_CONNECTIONS)
    pub db_min_connections: u32,
    pub db_max_connections: u32,
    /// Optional external WebSocket relay for the broadcast payload (BROADCAST_RELAY_URL)
    pub broadcast_relay_url: Option<String>,
    /// Initial state of the consecutive-decrease detector (MONITOR_ENABLED)
    pub monitor_enabled: bool,
    /// Initial state of the point-drop detector (POINT_MONITOR_ENABLED)
    pub point_monitor_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let sources = parse_source_urls(
            &std::env::var("SOURCE_URLS").unwrap_or_else(|_| DEFAULT_SOURCE_URLS.to_string()),
        )?;
        let canonical_source = std::env::var("CANONICAL_SOURCE")
            .unwrap_or_else(|_| "3".to_string())
            .parse::<SourceId>()
            .map_err(|_| AppError::Config("CANONICAL_SOURCE must be a source id".to_string()))?;
        let index_source = std::env::var("INDEX_SOURCE")
            .unwrap_or_else(|_| "2".to_string())
            .parse::<SourceId>()
            .map_err(|_| AppError::Config("INDEX_SOURCE must be a source id".to_string()))?;

        let cfg = Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "odds.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8766".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            sources,
            canonical_source,
            index_source,
            db_min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<u32>()
                .unwrap_or(1),
            db_max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse::<u32>()
                .unwrap_or(5),
            broadcast_relay_url: std::env::var("BROADCAST_RELAY_URL")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            monitor_enabled: env_flag("MONITOR_ENABLED"),
            point_monitor_enabled: env_flag("POINT_MONITOR_ENABLED"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(|s| s.id).collect()
    }

    fn validate(&self) -> Result<()> {
        let ids = self.source_ids();
        if !ids.contains(&self.canonical_source) {
            return Err(AppError::Config(format!(
                "CANONICAL_SOURCE {} is not listed in SOURCE_URLS",
                self.canonical_source
            )));
        }
        if !ids.contains(&self.index_source) {
            return Err(AppError::Config(format!(
                "INDEX_SOURCE {} is not listed in SOURCE_URLS",
                self.index_source
            )));
        }
        if self.db_min_connections > self.db_max_connections || self.db_max_connections == 0 {
            return Err(AppError::Config(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS and the max must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parses `1=http://a,2=http://b`. Ids must be 1..=3 (the binding table has three column groups)
/// and unique.
pub fn parse_source_urls(raw: &str) -> Result<Vec<SourceEndpoint>> {
    let mut out: Vec<SourceEndpoint> = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((id, url)) = entry.split_once('=') else {
            return Err(AppError::Config(format!("SOURCE_URLS entry '{entry}' is not id=url")));
        };
        let id = id
            .trim()
            .parse::<SourceId>()
            .ok()
            .filter(|id| (1..=3).contains(id))
            .ok_or_else(|| AppError::Config(format!("SOURCE_URLS id '{id}' must be 1, 2 or 3")))?;
        if out.iter().any(|s| s.id == id) {
            return Err(AppError::Config(format!("SOURCE_URLS lists source {id} twice")));
        }
        out.push(SourceEndpoint { id, url: url.trim().to_string() });
    }
    if out.len() < 2 {
        return Err(AppError::Config("SOURCE_URLS needs at least two sources".to_string()));
    }
    out.sort_by_key(|s| s.id);
    Ok(out)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}
