//! Configuration for the ledger and the streaming pipeline

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::types::{LedgerError, LedgerResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Decimal places of the smallest currency unit
    pub minor_unit_scale: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { minor_unit_scale: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub chunk_size: usize,
    pub max_concurrency: usize,
    /// Estimated bytes above which intake pauses between chunks
    pub memory_threshold_bytes: usize,
    /// Upper bound on a single back-pressure pause
    #[serde(with = "duration_millis")]
    pub backpressure_wait: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            max_concurrency: 8,
            memory_threshold_bytes: 256 * 1024 * 1024,
            backpressure_wait: Duration::from_secs(5),
        }
    }
}

impl StreamConfig {
    pub fn new(chunk_size: usize, max_concurrency: usize, memory_threshold_bytes: usize) -> Self {
        Self {
            chunk_size,
            max_concurrency,
            memory_threshold_bytes,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.chunk_size == 0 {
            return Err(LedgerError::Validation(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(LedgerError::Validation(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub ledger: LedgerConfig,
    pub stream: StreamConfig,
}

impl ReconciliationConfig {
    /// Load from `RECON_*` environment variables, falling back to defaults
    pub fn from_env() -> LedgerResult<Self> {
        let defaults = Self::default();
        let config = Self {
            ledger: LedgerConfig {
                minor_unit_scale: env_or("RECON_MINOR_UNIT_SCALE", defaults.ledger.minor_unit_scale),
            },
            stream: StreamConfig {
                chunk_size: env_or("RECON_CHUNK_SIZE", defaults.stream.chunk_size),
                max_concurrency: env_or("RECON_MAX_CONCURRENCY", defaults.stream.max_concurrency),
                memory_threshold_bytes: env_or(
                    "RECON_MEMORY_THRESHOLD_BYTES",
                    defaults.stream.memory_threshold_bytes,
                ),
                backpressure_wait: Duration::from_millis(env_or(
                    "RECON_BACKPRESSURE_WAIT_MS",
                    defaults.stream.backpressure_wait.as_millis() as u64,
                )),
            },
        };
        config.stream.validate()?;
        Ok(config)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
