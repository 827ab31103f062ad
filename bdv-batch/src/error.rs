//! Errors produced by a [`crate::Batch`] and its worker.

use std::sync::Arc;

/// An error produced by a `Batch` service.
#[derive(Debug, Clone)]
pub struct ServiceError {
    inner: Arc<BoxError>,
}

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

impl ServiceError {
    pub(crate) fn new(inner: BoxError) -> Self {
        ServiceError {
            inner: Arc::new(inner),
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "batch worker errored: {}", self.inner)
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&**self.inner)
    }
}

/// The batch worker's channel dropped without producing a response; only
/// possible if the worker panicked or the `Batch` itself was dropped while a
/// request was in flight.
#[derive(Debug)]
pub struct Closed {
    _p: (),
}

impl Closed {
    pub(crate) fn new() -> Self {
        Closed { _p: () }
    }
}

impl std::fmt::Display for Closed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("batch worker closed")
    }
}

impl std::error::Error for Closed {}
