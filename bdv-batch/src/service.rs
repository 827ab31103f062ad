use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use tower::Service;

use crate::{
    error::{Closed, ServiceError},
    message::Message,
    semaphore::{Permit, Semaphore},
    worker::Worker,
    BatchControl,
};

type AcquireFuture =
    Pin<Box<dyn Future<Output = Result<Permit, tokio::sync::AcquireError>> + Send>>;

/// A cloneable handle to a batching worker.
///
/// `Batch` implements `tower::Service<Request>`; every clone shares the same
/// worker task and therefore the same batch-in-progress. Dropping every
/// `Batch` clone closes the request channel, which ends the worker's `run`
/// loop.
pub struct Batch<T, Request>
where
    T: Service<BatchControl<Request>>,
{
    tx: mpsc::UnboundedSender<Message<BatchControl<Request>, T::Future>>,
    semaphore: Semaphore,
    permit: Option<Permit>,
    acquire: Option<AcquireFuture>,
}

impl<T, Request> Clone for Batch<T, Request>
where
    T: Service<BatchControl<Request>>,
{
    fn clone(&self) -> Self {
        Batch {
            tx: self.tx.clone(),
            semaphore: self.semaphore.clone(),
            permit: None,
            acquire: None,
        }
    }
}

impl<T, Request> Batch<T, Request>
where
    T: Service<BatchControl<Request>> + Send + 'static,
    T::Future: Send + 'static,
    T::Error: Into<crate::error::BoxError>,
    Request: Send + 'static,
{
    /// Wraps `service` in a `Batch`, spawning its `Worker` onto the current
    /// tokio runtime. Batches are flushed after `max_items` items or
    /// `max_latency`, whichever happens first. `bound` caps the number of
    /// requests that may be in flight toward the worker at once; `None`
    /// means unbounded (the watcher map's own size is the real backpressure
    /// signal in `bdv-mempool`, so the broadcast engine uses `None`).
    pub fn new(service: T, max_items: usize, max_latency: Duration, bound: Option<usize>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let semaphore = match bound {
            Some(n) => Semaphore::new_bounded(n),
            None => Semaphore::new_unbounded(),
        };
        let worker = Worker::new(service, rx, max_items, max_latency);
        tokio::spawn(worker.run());
        Batch {
            tx,
            semaphore,
            permit: None,
            acquire: None,
        }
    }
}

impl<T, Request> Service<Request> for Batch<T, Request>
where
    T: Service<BatchControl<Request>>,
{
    type Response = T::Response;
    type Error = ServiceError;
    type Future = ResponseFuture<T::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.permit.is_some() {
            return Poll::Ready(Ok(()));
        }

        let fut = self.acquire.get_or_insert_with(|| {
            let semaphore = self.semaphore.clone();
            Box::pin(async move { semaphore.acquire().await })
        });

        match fut.as_mut().poll(cx) {
            Poll::Ready(Ok(permit)) => {
                self.permit = Some(permit);
                self.acquire = None;
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(_)) => {
                self.acquire = None;
                Poll::Ready(Err(ServiceError::new(Box::new(Closed::new()))))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let permit = self
            .permit
            .take()
            .expect("poll_ready must be called before call");
        let (tx, rx) = oneshot::channel();
        let span = tracing::Span::current();
        let message = Message {
            request: BatchControl::Item(request),
            tx,
            span,
            _permit: permit,
        };
        if self.tx.send(message).is_err() {
            let (closed_tx, closed_rx) = oneshot::channel();
            let _ = closed_tx.send(Err(ServiceError::new(Box::new(Closed::new()))));
            return ResponseFuture::new(closed_rx);
        }
        ResponseFuture::new(rx)
    }
}

/// The future returned by [`Batch::call`]: first waits for the worker to
/// accept the request and hand back the inner service's own future, then
/// waits for that future to resolve.
pub struct ResponseFuture<F> {
    state: ResponseState<F>,
}

enum ResponseState<F> {
    Waiting(oneshot::Receiver<Result<F, ServiceError>>),
    Polling(F),
    Done,
}

impl<F> ResponseFuture<F> {
    fn new(rx: oneshot::Receiver<Result<F, ServiceError>>) -> Self {
        ResponseFuture {
            state: ResponseState::Waiting(rx),
        }
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>> + Unpin,
    E: Into<crate::error::BoxError>,
{
    type Output = Result<T, ServiceError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ResponseState::Waiting(rx) => match Pin::new(rx).poll(cx) {
                    Poll::Ready(Ok(Ok(fut))) => this.state = ResponseState::Polling(fut),
                    Poll::Ready(Ok(Err(e))) => {
                        this.state = ResponseState::Done;
                        return Poll::Ready(Err(e));
                    }
                    Poll::Ready(Err(_)) => {
                        this.state = ResponseState::Done;
                        return Poll::Ready(Err(ServiceError::new(Box::new(Closed::new()))));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                ResponseState::Polling(fut) => match Pin::new(fut).poll(cx) {
                    Poll::Ready(result) => {
                        this.state = ResponseState::Done;
                        return Poll::Ready(result.map_err(|e| ServiceError::new(e.into())));
                    }
                    Poll::Pending => return Poll::Pending,
                },
                ResponseState::Done => panic!("polled ResponseFuture after completion"),
            }
        }
    }
}
