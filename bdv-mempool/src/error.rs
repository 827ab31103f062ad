//! The mempool snapshot, parser, and broadcast engine's error taxonomy
//! (spec §7), scoped to the non-fatal classes the parser and broadcast
//! engine can themselves produce; anything fatal bubbles up as
//! [`bdv_store::Error`].

use thiserror::Error;

use bdv_chain::transaction;

#[derive(Error, Debug)]
pub enum Error {
    #[error("the KV store reported an error: {0}")]
    Store(#[from] bdv_store::Error),

    #[error("transaction {0} failed basic structural validation")]
    InvalidTx(transaction::Hash),

    #[error("no outstanding broadcast batch for tx {0}")]
    UnknownBatch(transaction::Hash),

    #[error("broadcast batch for tx {0} timed out waiting for a peer response")]
    BatchTimeout(transaction::Hash),

    #[error("the P2P layer rejected tx {hash}: {reason}")]
    PeerRejected {
        hash: transaction::Hash,
        reason: String,
    },

    #[error("RPC broadcast fallback failed for tx {hash}: {message}")]
    RpcFailure { hash: transaction::Hash, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The numeric error codes a broadcast notification's `error` event reports
/// (spec §6). Negative codes mirror node-RPC-style verify-rejection codes;
/// positive codes are this server's own broadcast/RPC-fallback taxonomy.
pub mod code {
    pub const ZC_BROADCAST_ALREADY_IN_CHAIN: i32 = -27;
    pub const ZC_BROADCAST_VERIFY_REJECTED: i32 = -26;
    pub const ZC_BROADCAST_ERROR: i32 = -25;
    pub const P2P_REJECT_DUPLICATE: i32 = 18;
    pub const P2P_REJECT_INSUFFICIENT_FEE: i32 = 66;
    pub const ZC_BATCH_TIMEOUT: i32 = 30000;
    pub const ZC_BROADCAST_ALREADY_IN_MEMPOOL: i32 = 30001;
    pub const RPC_FAILURE_UNKNOWN: i32 = 40000;
    pub const RPC_FAILURE_JSON: i32 = 40001;
    pub const RPC_FAILURE_INTERNAL: i32 = 40002;
}
