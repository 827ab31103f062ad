//! The mempool parser and broadcast engine's tunables, loaded once at
//! startup alongside [`bdv_store::Config`] (spec §9).

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum pending transactions a single broadcast batch accumulates
    /// before it flushes, even if `batch_max_latency` hasn't elapsed (spec
    /// §4.4 "Broadcast batches").
    pub batch_max_items: usize,

    /// Maximum time a broadcast batch waits to accumulate `batch_max_items`
    /// before flushing anyway.
    #[serde(with = "duration_ms")]
    pub batch_max_latency: Duration,

    /// How long a broadcast batch waits for every watched hash's inv+getdata
    /// round trip before giving up and falling back to RPC (spec §4.4
    /// "Broadcast batches", §6 error code `ZcBatch_Timeout`).
    #[serde(with = "duration_ms")]
    pub broadcast_timeout: Duration,

    /// The watcher-inv thread flushes its batch of observed peer inv
    /// hashes once it holds this many, even if `watcher_inv_flush_interval`
    /// hasn't elapsed (spec §5 "watcher-inv thread").
    pub watcher_inv_flush_count: usize,

    #[serde(with = "duration_ms")]
    pub watcher_inv_flush_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            batch_max_items: 250,
            batch_max_latency: Duration::from_millis(500),
            broadcast_timeout: Duration::from_secs(10),
            watcher_inv_flush_count: 500,
            watcher_inv_flush_interval: Duration::from_millis(250),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (value.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
