//! A counting semaphore bounding the number of requests in flight toward a
//! `Batch`'s worker, mirroring `tower::buffer`'s backpressure mechanism.

use std::sync::Arc;

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore as TokioSemaphore};

#[derive(Clone, Debug)]
pub(crate) enum Semaphore {
    Bounded(Arc<TokioSemaphore>),
    Unbounded,
}

#[derive(Debug)]
pub(crate) enum Permit {
    Bounded(OwnedSemaphorePermit),
    Unbounded,
}

impl Semaphore {
    pub(crate) fn new_bounded(permits: usize) -> Self {
        Semaphore::Bounded(Arc::new(TokioSemaphore::new(permits)))
    }

    pub(crate) fn new_unbounded() -> Self {
        Semaphore::Unbounded
    }

    pub(crate) async fn acquire(&self) -> Result<Permit, AcquireError> {
        match self {
            Semaphore::Bounded(sem) => {
                let sem = sem.clone();
                let permit = sem.acquire_owned().await?;
                Ok(Permit::Bounded(permit))
            }
            Semaphore::Unbounded => Ok(Permit::Unbounded),
        }
    }

    pub(crate) fn close(&self) {
        if let Semaphore::Bounded(sem) = self {
            sem.close();
        }
    }
}
