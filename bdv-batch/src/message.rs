use crate::error::ServiceError;
use tokio::sync::oneshot;

/// Message sent to the batch worker.
///
/// Carries one [`crate::BatchControl`] request, a one-shot channel the
/// worker uses to hand back the inner service's future once it has accepted
/// the request, the request's tracing span, and the semaphore permit that
/// bounds how many requests may be in flight toward the worker at once.
#[derive(Debug)]
pub(crate) struct Message<Request, Fut> {
    pub(crate) request: Request,
    pub(crate) tx: Tx<Fut>,
    pub(crate) span: tracing::Span,
    pub(super) _permit: crate::semaphore::Permit,
}

/// Response sender
pub(crate) type Tx<Fut> = oneshot::Sender<Result<Fut, ServiceError>>;

/// Response receiver
pub(crate) type Rx<Fut> = oneshot::Receiver<Result<Fut, ServiceError>>;
