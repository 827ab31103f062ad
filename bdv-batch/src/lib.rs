//! A generic request-batching `tower::Service` wrapper.
//!
//! This is the same "coalesce many independent requests behind a single
//! worker task, flush on a count-or-deadline trigger" shape used elsewhere in
//! this lineage of crates to batch zk-SNARK proof verification; here it
//! batches transaction broadcasts (`bdv-mempool::broadcast`, spec §4.4).
//!
//! A `Batch<T, Request>` is cheap to clone and safe to share across tasks:
//! callers push a [`BatchControl::Item`] and get back a future for the
//! eventual response, while a single [`Worker`] owns the wrapped service and
//! processes requests one at a time, in order, preserving whatever ordering
//! guarantee the inner service depends on (for the broadcast engine, that
//! the watcher map is only ever touched by one task at a time — spec §5).
//! [`BatchControl::Flush`] is inserted by the worker itself once a batch has
//! accumulated `max_items` requests, or by a background timer once
//! `max_latency` has elapsed since the batch's first item, whichever comes
//! first — the inner service decides what "flushing" a batch means.

mod error;
mod message;
mod semaphore;
mod service;
mod worker;

pub use error::{Closed, ServiceError};
pub use service::Batch;
pub use worker::Worker;

/// A single request pushed through a [`Batch`], tagged as either an ordinary
/// item or a flush trigger. The wrapped inner service is the only thing that
/// understands what a batch boundary means for its domain.
#[derive(Debug)]
pub enum BatchControl<Request> {
    /// A single item to add to the in-progress batch.
    Item(Request),
    /// Flush the in-progress batch now.
    Flush,
}

impl<Request> BatchControl<Request> {
    /// Returns the wrapped item, if this is an `Item`.
    pub fn into_item(self) -> Option<Request> {
        match self {
            BatchControl::Item(req) => Some(req),
            BatchControl::Flush => None,
        }
    }
}
