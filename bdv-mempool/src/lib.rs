//! The mempool snapshot, ZC parser, and broadcast engine (spec §4.4) —
//! "the hard part" of the unconfirmed-transaction side of the server,
//! grounded on the teacher's `zebra-state` finalized-state commit pattern
//! and `pending_utxos` broadcast fan-out, generalized to a concurrently
//! readable, single-writer-committed pool of unconfirmed transactions.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod parsed_tx;
pub mod parser;
pub mod records;
pub mod snapshot;

pub use config::Config;
pub use error::{Error, Result};
pub use parsed_tx::{InputResolution, ParsedTx, TxState};
pub use parser::{CommitOutcome, PurgePacket, ZcParser};
pub use snapshot::{MempoolSnapshot, Pool, POOL_MERGE_THRESHOLD};
