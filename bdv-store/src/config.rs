//! The process-wide, load-once-at-init configuration spec §9 calls for.
//!
//! `bdvd` owns the TOML file this is deserialized from; `bdv-store`,
//! `bdv-mempool`, and `bdv-session` only see the already-parsed struct (or
//! the slice of it relevant to them), and none of them mutate it after
//! startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which on-disk table layout a KV store directory holds. Stored in every
/// table's DB-info record (spec §4.1, §6); opening a store whose recorded
/// type doesn't match `Config::db_type` is `ConfigError` (spec §7).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    /// Per-wallet narrow scanning: only registered scrAddrs are tracked.
    Narrow,
    /// Every scrAddr ever seen is tracked (spec §4.5 "Supernode").
    Supernode,
}

impl DbType {
    pub const fn tag(self) -> u8 {
        match self {
            DbType::Narrow => 0,
            DbType::Supernode => 1,
        }
    }

    pub fn from_tag(tag: u8) -> Option<DbType> {
        match tag {
            0 => Some(DbType::Narrow),
            1 => Some(DbType::Supernode),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Narrow or supernode scanning mode (spec §4.5).
    pub db_type: DbType,

    /// Directory holding the sled KV store.
    pub db_dir: PathBuf,

    /// Directory holding numbered `blkNNNNN.dat` block files (spec §6).
    pub blocks_dir: PathBuf,

    /// 4-byte network magic prefixing block-file records and P2P messages.
    pub network: bdv_chain::parameters::Network,

    /// OS threads used to parse block files in parallel during the initial
    /// load (spec §4.3 step 4, one worker per file).
    pub builder_threads: usize,

    /// How many blocks behind the header-index tip the scan cursor is
    /// rewound at startup, to absorb late-arrived sibling blocks (spec
    /// §4.3 step 3).
    pub rewind_blocks: u32,

    /// Bounded repair-attempt count for scan-verification mismatches and
    /// damaged tx filters (spec §4.3 step 6, §4.5 "Post-scan").
    pub max_repair_attempts: u32,

    /// Number of trailing files' filters rebuilt on a scan-verification
    /// mismatch (spec §4.3 step 6).
    pub repair_trailing_files: u32,
}

impl Default for DbType {
    fn default() -> Self {
        DbType::Narrow
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_type: DbType::default(),
            db_dir: PathBuf::from("./bdv-db"),
            blocks_dir: PathBuf::from("./blocks"),
            network: bdv_chain::parameters::Network::Mainnet,
            builder_threads: 4,
            rewind_blocks: 100,
            max_repair_attempts: 5,
            repair_trailing_files: 5,
        }
    }
}
