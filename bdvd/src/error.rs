//! The daemon's own error type: every sub-crate's error folds in here, plus
//! the handful of failures that only make sense at the process boundary
//! (a malformed config file, a cookie file that can't be read).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("the KV store reported an error: {0}")]
    Store(#[from] bdv_store::Error),

    #[error("the mempool reported an error: {0}")]
    Mempool(#[from] bdv_mempool::Error),

    #[error("a session reported an error: {0}")]
    Session(#[from] bdv_session::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("malformed client message: {0}")]
    Codec(#[from] bincode::Error),
}

impl Error {
    /// Whether this failure should abort the process rather than just
    /// being logged and dropped (mirrors `bdv_store::Error::is_fatal`).
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Store(inner) => inner.is_fatal(),
            Error::Config(_) | Error::Io(_) => true,
            Error::Mempool(_) | Error::Session(_) | Error::Codec(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
