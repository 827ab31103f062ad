//! Errors a session command can fail with: a command that can't be
//! dispatched at all (unknown command, malformed argument) is
//! serialized back to the owning session as an error response and the
//! command is dropped — it never reaches `bdv-store`/`bdv-mempool`, and it
//! never poisons any other session's state.

use thiserror::Error;

use bdv_chain::{block, transaction};

#[derive(Error, Debug)]
pub enum Error {
    #[error("the KV store reported an error: {0}")]
    Store(#[from] bdv_store::Error),

    #[error("the mempool reported an error: {0}")]
    Mempool(#[from] bdv_mempool::Error),

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("command {command} received a malformed argument: {reason}")]
    BadArgument { command: &'static str, reason: String },

    #[error("wallet {0:?} is not registered on this session")]
    UnknownWallet(WalletId),

    #[error("no header at height {0:?}")]
    UnknownHeight(block::Height),

    #[error("no header with hash {0:?}")]
    UnknownHash(block::Hash),

    #[error("no transaction with hash {0:?}")]
    UnknownTx(transaction::Hash),

    #[error("message id {got} arrived out of order; session last processed {last_processed}")]
    OutOfOrder { got: u64, last_processed: u64 },
}

pub type Result<T> = std::result::Result<T, Error>;

pub use crate::wallet::WalletId;
