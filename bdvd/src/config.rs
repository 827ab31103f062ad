//! The top-level TOML configuration `bdvd` loads once at startup and hands
//! down, already parsed, to every crate that needs a slice of it.
//!
//! Mirrors the process-wide, load-once convention `bdv_store::Config` and
//! `bdv_mempool::Config` already follow: this struct just nests those two
//! alongside the settings that are `bdvd`'s own (client listen address, the
//! single upstream node to speak P2P with, worker-pool sizing, the shutdown
//! cookie file).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: bdv_store::Config,
    pub mempool: bdv_mempool::Config,

    /// Address `bdvd` listens on for client BDV sessions.
    pub listen_addr: SocketAddr,

    /// The single local node `bdvd` speaks the P2P protocol to, watching
    /// `inv`/`tx` traffic and announcing broadcasts.
    pub node_addr: SocketAddr,

    /// Cookie file compared byte-for-byte against a `shutdown`/
    /// `shutdownNode` command's supplied cookie.
    pub cookie_file: PathBuf,

    /// OS threads processing session commands concurrently. Defaults to
    /// the number of available cores.
    pub session_worker_threads: usize,

    /// OS threads draining the notification dispatcher's per-session
    /// inboxes.
    pub notification_worker_threads: usize,

    /// How often the new-block poll loop rescans `store.blocks_dir` for
    /// files the local node has written since the last pass.
    #[serde(with = "duration_secs")]
    pub poll_interval: std::time::Duration,
}

impl Default for Config {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        Config {
            store: bdv_store::Config::default(),
            mempool: bdv_mempool::Config::default(),
            listen_addr: "127.0.0.1:9900".parse().expect("valid default listen addr"),
            node_addr: "127.0.0.1:8333".parse().expect("valid default node addr"),
            cookie_file: PathBuf::from("./bdvd.cookie"),
            session_worker_threads: cores,
            notification_worker_threads: cores.min(4).max(1),
            poll_interval: std::time::Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&text).map_err(Error::from)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
