//! The error taxonomy of spec §7, scoped to the KV store, header index,
//! block-file reader, database builder, and script-history scanner.

use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by `bdv-store`.
///
/// `ConfigError` and the `Fatal` variant (spec §7) are the only ones this
/// crate treats as unrecoverable; everything else is logged by the caller
/// and the affected operation returns empty/not-found or retries.
#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "the KV store's on-disk magic bytes ({found:x?}) don't match the configured network magic ({expected:x?})"
    )]
    MagicMismatch { expected: [u8; 4], found: [u8; 4] },

    #[error(
        "table `{table}`'s on-disk DB type {found:?} doesn't match the configured DB type {expected:?}"
    )]
    DbTypeMismatch {
        table: &'static str,
        expected: crate::config::DbType,
        found: crate::config::DbType,
    },

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("sled transaction error: {0}")]
    Transaction(#[from] sled::transaction::TransactionError<BoxError>),

    #[error("malformed record at key {0:x?}")]
    Corrupt(Vec<u8>),

    #[error("block file {0} is missing or unreadable")]
    MissingBlockFile(u32),

    #[error(
        "scan-verification mismatch: expected top hash {expected:?}, scanned top hash {scanned:?}, after {attempts} repair attempts"
    )]
    ScanVerificationFailed {
        expected: bdv_chain::block::Hash,
        scanned: Option<bdv_chain::block::Hash>,
        attempts: u32,
    },

    #[error("a header required by the index is missing: {0:?}")]
    MissingHeader(bdv_chain::block::Hash),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error belongs to spec §7's `Fatal`/`ConfigError`
    /// classes, which abort the process after flushing logs rather than
    /// being handled by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::MagicMismatch { .. } | Error::DbTypeMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
