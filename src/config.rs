//! Configuration for the Ideawell engine
//!
//! CLI arguments and environment variable handling using clap, plus the
//! hot-reloadable runtime settings shared by every component.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::Parser;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::types::{EngineError, Result};

/// Ideawell engine configuration
#[derive(Parser, Debug, Clone)]
#[command(name = "ideawell")]
#[command(about = "Dual-store write/query engine for the Ideawell platform")]
pub struct Args {
    /// Number of physical partitions per sharded counter
    #[arg(long, env = "COUNTER_SHARDS", default_value = "16")]
    pub counter_shards: usize,

    /// Use random partition selection for counters by default
    /// (spreads hot keys; reads must scatter-gather)
    #[arg(long, env = "COUNTER_RANDOM_SHARDING", default_value = "false")]
    pub counter_random_sharding: bool,

    /// Force scatter-gather reads across all counter partitions
    /// (kept on for the duration of a shard-count migration)
    #[arg(long, env = "COUNTER_READ_ALL_SHARDS", default_value = "false")]
    pub counter_read_all_shards: bool,

    /// How many period lengths a counter shard outlives its period
    #[arg(long, env = "COUNTER_RETENTION_MULTIPLIER", default_value = "3")]
    pub counter_retention_multiplier: u32,

    /// TTL in seconds for the counter dedupe negative cache
    #[arg(long, env = "COUNTER_CACHE_TTL_SECONDS", default_value = "600")]
    pub counter_cache_ttl_seconds: u64,

    /// Maximum entries held by the counter dedupe negative cache
    #[arg(long, env = "COUNTER_CACHE_MAX_ENTRIES", default_value = "100000")]
    pub counter_cache_max_entries: usize,

    /// Confidence level for Wilson lower-bound ranking, in (0, 1)
    #[arg(long, env = "RANK_CONFIDENCE_LEVEL", default_value = "0.95")]
    pub rank_confidence_level: f64,

    /// Base64-encoded 32-byte secret for cursor encryption
    /// (required in production; rotation invalidates outstanding cursors)
    #[arg(long, env = "CURSOR_SECRET")]
    pub cursor_secret: Option<String>,

    /// Enable development mode (generates an ephemeral cursor secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Maximum items per record-store batch operation
    #[arg(long, env = "BATCH_SIZE", default_value = "25")]
    pub batch_size: usize,

    /// How many times a partial batch is retried before escalation
    #[arg(long, env = "BATCH_RETRY_BUDGET", default_value = "4")]
    pub batch_retry_budget: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.counter_shards == 0 {
            return Err(EngineError::Config(
                "COUNTER_SHARDS must be at least 1".into(),
            ));
        }

        if !(self.rank_confidence_level > 0.0 && self.rank_confidence_level < 1.0) {
            return Err(EngineError::Config(
                "RANK_CONFIDENCE_LEVEL must be in (0, 1)".into(),
            ));
        }

        if self.batch_size == 0 {
            return Err(EngineError::Config("BATCH_SIZE must be at least 1".into()));
        }

        if !self.dev_mode && self.cursor_secret.is_none() {
            return Err(EngineError::Config(
                "CURSOR_SECRET is required in production mode".into(),
            ));
        }

        Ok(())
    }

    /// Decode the cursor secret, or generate an ephemeral one in dev mode.
    pub fn cursor_secret_bytes(&self) -> Result<[u8; 32]> {
        match &self.cursor_secret {
            Some(encoded) => {
                let bytes = BASE64.decode(encoded).map_err(|e| {
                    EngineError::Config(format!("CURSOR_SECRET is not valid base64: {e}"))
                })?;
                bytes.as_slice().try_into().map_err(|_| {
                    EngineError::Config(format!(
                        "CURSOR_SECRET must decode to 32 bytes, got {}",
                        bytes.len()
                    ))
                })
            }
            None if self.dev_mode => {
                use rand::RngCore;
                let mut bytes = [0u8; 32];
                rand::rngs::OsRng.fill_bytes(&mut bytes);
                Ok(bytes)
            }
            None => Err(EngineError::Config(
                "CURSOR_SECRET is required in production mode".into(),
            )),
        }
    }

    /// Build the runtime settings view from this configuration.
    pub fn settings(&self) -> Result<EngineSettings> {
        self.validate()?;
        Ok(EngineSettings::new(self, self.cursor_secret_bytes()?))
    }
}

/// Cursor encryption secret, zeroized when dropped or replaced.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CursorSecret([u8; 32]);

impl CursorSecret {
    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Hot-reloadable runtime settings.
///
/// Shared as `Arc<EngineSettings>` across stores and components. Setters
/// take effect immediately on subsequent operations; nothing here is
/// persisted state.
pub struct EngineSettings {
    confidence_bits: AtomicU64,
    shard_count: AtomicUsize,
    random_sharding: AtomicBool,
    read_all_shards: AtomicBool,
    retention_multiplier: AtomicU32,
    cursor_secret: RwLock<CursorSecret>,
    batch_size: usize,
    batch_retry_budget: u32,
    cache_ttl_seconds: u64,
    cache_max_entries: usize,
}

impl EngineSettings {
    fn new(args: &Args, secret: [u8; 32]) -> Self {
        Self {
            confidence_bits: AtomicU64::new(args.rank_confidence_level.to_bits()),
            shard_count: AtomicUsize::new(args.counter_shards),
            random_sharding: AtomicBool::new(args.counter_random_sharding),
            read_all_shards: AtomicBool::new(args.counter_read_all_shards),
            retention_multiplier: AtomicU32::new(args.counter_retention_multiplier),
            cursor_secret: RwLock::new(CursorSecret(secret)),
            batch_size: args.batch_size,
            batch_retry_budget: args.batch_retry_budget,
            cache_ttl_seconds: args.counter_cache_ttl_seconds,
            cache_max_entries: args.counter_cache_max_entries,
        }
    }

    /// Settings suitable for tests: one deterministic secret, small bounds.
    pub fn for_tests() -> Self {
        let args = Args {
            counter_shards: 4,
            counter_random_sharding: false,
            counter_read_all_shards: false,
            counter_retention_multiplier: 3,
            counter_cache_ttl_seconds: 60,
            counter_cache_max_entries: 1024,
            rank_confidence_level: 0.95,
            cursor_secret: None,
            dev_mode: true,
            batch_size: 25,
            batch_retry_budget: 4,
            log_level: "info".into(),
        };
        Self::new(&args, [7u8; 32])
    }

    /// Confidence level for Wilson lower-bound ranking.
    pub fn confidence_level(&self) -> f64 {
        f64::from_bits(self.confidence_bits.load(Ordering::Relaxed))
    }

    /// Change the ranking confidence level. Scores are recomputed from raw
    /// tallies at read/update time, so no historical data is re-derived.
    pub fn set_confidence_level(&self, level: f64) {
        self.confidence_bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count.load(Ordering::Relaxed)
    }

    pub fn set_shard_count(&self, count: usize) {
        self.shard_count.store(count.max(1), Ordering::Relaxed);
    }

    pub fn random_sharding(&self) -> bool {
        self.random_sharding.load(Ordering::Relaxed)
    }

    pub fn set_random_sharding(&self, on: bool) {
        self.random_sharding.store(on, Ordering::Relaxed);
    }

    /// Whether counter reads must scatter-gather every partition regardless
    /// of the write policy. Operators keep this on while changing the shard
    /// count.
    pub fn read_all_shards(&self) -> bool {
        self.read_all_shards.load(Ordering::Relaxed)
    }

    pub fn set_read_all_shards(&self, on: bool) {
        self.read_all_shards.store(on, Ordering::Relaxed);
    }

    pub fn retention_multiplier(&self) -> u32 {
        self.retention_multiplier.load(Ordering::Relaxed)
    }

    pub fn set_retention_multiplier(&self, multiplier: u32) {
        self.retention_multiplier
            .store(multiplier.max(1), Ordering::Relaxed);
    }

    /// Copy of the current cursor secret.
    pub fn cursor_secret(&self) -> [u8; 32] {
        *self
            .cursor_secret
            .read()
            .expect("cursor secret lock poisoned")
            .bytes()
    }

    /// Replace the cursor secret. All outstanding cursors become invalid;
    /// callers restart pagination on `InvalidCursor`.
    pub fn rotate_cursor_secret(&self, secret: [u8; 32]) {
        let mut guard = self
            .cursor_secret
            .write()
            .expect("cursor secret lock poisoned");
        *guard = CursorSecret(secret);
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_retry_budget(&self) -> u32 {
        self.batch_retry_budget
    }

    pub fn cache_ttl_seconds(&self) -> u64 {
        self.cache_ttl_seconds
    }

    pub fn cache_max_entries(&self) -> usize {
        self.cache_max_entries
    }
}
