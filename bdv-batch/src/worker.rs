use std::time::Duration;

use tokio::sync::mpsc;
use tower::Service;
use tracing::Instrument;

use crate::{
    error::ServiceError,
    message::{Message, Tx},
    BatchControl,
};

/// Drains the request channel and drives the wrapped service, one request at
/// a time, preserving submission order. A single `Worker` is the only task
/// that ever holds `&mut T` — this is what lets the inner service assume
/// single-writer access to whatever state it owns (the watcher map, for
/// `bdv-mempool`'s broadcast engine).
pub struct Worker<T, Request>
where
    T: Service<BatchControl<Request>>,
{
    rx: mpsc::UnboundedReceiver<Message<BatchControl<Request>, T::Future>>,
    service: T,
    max_items: usize,
    max_latency: Duration,
    failed: Option<ServiceError>,
}

impl<T, Request> Worker<T, Request>
where
    T: Service<BatchControl<Request>>,
    T::Error: Into<crate::error::BoxError>,
{
    pub(crate) fn new(
        service: T,
        rx: mpsc::UnboundedReceiver<Message<BatchControl<Request>, T::Future>>,
        max_items: usize,
        max_latency: Duration,
    ) -> Self {
        Worker {
            rx,
            service,
            max_items,
            max_latency,
            failed: None,
        }
    }

    /// Runs the worker loop until the channel closes (every `Batch` handle
    /// has been dropped). Call via `tokio::spawn(worker.run())`.
    pub async fn run(mut self) {
        let mut items_since_flush = 0usize;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            if let Some(err) = &self.failed {
                // The inner service is dead; drain and fail every remaining
                // request rather than hanging callers forever.
                match self.rx.recv().await {
                    Some(msg) => {
                        let _ = msg.tx.send(Err(err.clone()));
                    }
                    None => return,
                }
                continue;
            }

            let next = match deadline {
                Some(at) => {
                    tokio::select! {
                        msg = self.rx.recv() => msg.map(Next::Message).unwrap_or(Next::Closed),
                        _ = tokio::time::sleep_until(at) => Next::Timeout,
                    }
                }
                None => self
                    .rx
                    .recv()
                    .await
                    .map(Next::Message)
                    .unwrap_or(Next::Closed),
            };

            match next {
                Next::Closed => return,
                Next::Timeout => {
                    deadline = None;
                    items_since_flush = 0;
                    self.flush().await;
                }
                Next::Message(msg) => {
                    let is_item = matches!(msg.request, BatchControl::Item(_));
                    if is_item && deadline.is_none() {
                        deadline = Some(tokio::time::Instant::now() + self.max_latency);
                    }
                    self.forward(msg).await;
                    if is_item {
                        items_since_flush += 1;
                        if items_since_flush >= self.max_items {
                            deadline = None;
                            items_since_flush = 0;
                            self.flush().await;
                        }
                    } else {
                        deadline = None;
                        items_since_flush = 0;
                    }
                }
            }
        }
    }

    async fn flush(&mut self) {
        let span = tracing::trace_span!("batch_flush");
        self.call_inner(BatchControl::Flush, span, None).await;
    }

    async fn forward(&mut self, msg: Message<BatchControl<Request>, T::Future>) {
        let Message {
            request,
            tx,
            span,
            _permit,
        } = msg;
        self.call_inner(request, span, Some(tx)).await;
    }

    async fn call_inner(
        &mut self,
        request: BatchControl<Request>,
        span: tracing::Span,
        tx: Option<Tx<T::Future>>,
    ) {
        let ready = futures_util::future::poll_fn(|cx| self.service.poll_ready(cx))
            .instrument(span.clone())
            .await;

        if let Err(e) = ready {
            let err = ServiceError::new(e.into());
            self.failed = Some(err.clone());
            if let Some(tx) = tx {
                let _ = tx.send(Err(err));
            }
            return;
        }

        let fut = span.in_scope(|| self.service.call(request));
        if let Some(tx) = tx {
            let _ = tx.send(Ok(fut));
        }
    }
}

enum Next<T> {
    Message(T),
    Timeout,
    Closed,
}
