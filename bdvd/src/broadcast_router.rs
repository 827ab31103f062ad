//! Wires the mempool's [`BroadcastEngine`] into `bdvd`'s own session/
//! notification plumbing (spec §4.4 "Broadcast batches", §5.4, §8
//! property 5).
//!
//! `bdvd` needs the *same* engine instance reachable two ways at once: a
//! session worker's `broadcastZc` submits through the batched
//! `tower::Service<BroadcastRequest>` path (spec §5.4's count/latency
//! flush trigger), while the peer-connection task and the periodic sweep
//! timer call its plain `&self` methods (`on_peer_accepted`,
//! `on_peer_rejected`, `mark_resolved_elsewhere`, `sweep_timeouts`)
//! directly. [`bdv_mempool::broadcast::spawn`] can't serve both, since it
//! takes the engine by value into its own worker task — [`EngineHandle`]
//! instead holds a shared `Arc<BroadcastEngine>` and forwards
//! `Service::call` into it, the way `bdvd`'s rest of the P2P layer keeps
//! one shared connection handle for both directions.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tower::{Service, ServiceExt};

use bdv_chain::transaction::{self, Transaction};

use bdv_mempool::broadcast::{BroadcastEngine, BroadcastRequest, PeerOutbound, RequestorId, RpcBroadcaster};
use bdv_mempool::{Error, MempoolSnapshot, Result};
use bdv_store::KvStore;

use bdv_batch::{Batch, BatchControl};

use bdv_session::notification::{Deliver, Notification, NotificationDispatcher};
use bdv_session::session::{BroadcastSink, RefreshSink, RpcSink};
use bdv_session::wallet::RefreshId;
use bdv_session::{BdvId, SessionRegistry};

use crate::notify;

/// A cloneable `Service<BatchControl<BroadcastRequest>>` over a shared
/// `Arc<BroadcastEngine>`, letting `bdvd` keep using the engine's own
/// `&self` methods on the same instance a [`Batch`] wraps.
pub struct EngineHandle<P, R> {
    engine: Arc<BroadcastEngine<P, R>>,
}

impl<P, R> Clone for EngineHandle<P, R> {
    fn clone(&self) -> Self {
        EngineHandle {
            engine: self.engine.clone(),
        }
    }
}

impl<P, R> EngineHandle<P, R> {
    pub fn new(engine: Arc<BroadcastEngine<P, R>>) -> EngineHandle<P, R> {
        EngineHandle { engine }
    }
}

impl<P, R> Service<BatchControl<BroadcastRequest>> for EngineHandle<P, R>
where
    P: PeerOutbound,
    R: RpcBroadcaster,
{
    type Response = u64;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<u64>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: BatchControl<BroadcastRequest>) -> Self::Future {
        let broadcast_id = match request {
            BatchControl::Item(item) => self.engine.register(item.tx, item.requestor),
            BatchControl::Flush => {
                self.engine.flush_pending_invs();
                0
            }
        };
        Box::pin(async move { Ok(broadcast_id) })
    }
}

/// The real [`BroadcastSink`] a running `bdvd` hands to every
/// [`bdv_session::session::SharedServices`]: submits through the batched
/// engine, remembers which session minted each `requestor` id (spec §8
/// property 5), and fans a `zc` notification to every session watching an
/// address the freshly committed tx touches (spec §4.4 "Notify").
pub struct RoutedBroadcastSink<P, R, D> {
    batch: Batch<EngineHandle<P, R>, BroadcastRequest>,
    requestor_to_bdv: Mutex<HashMap<RequestorId, (BdvId, transaction::Hash)>>,
    store: Arc<KvStore>,
    mempool: Arc<MempoolSnapshot>,
    /// Set once, immediately after the registry is constructed — `bdvd`
    /// builds this sink before the registry exists, since
    /// `SharedServices::broadcast` and `SessionRegistry::new` each need
    /// the other already built. A `Mutex<Option<_>>` set once at startup
    /// is simpler than restructuring the construction order around it.
    registry: Mutex<Option<Arc<SessionRegistry>>>,
    dispatcher: Arc<NotificationDispatcher<D>>,
}

impl<P, R, D> RoutedBroadcastSink<P, R, D>
where
    P: PeerOutbound,
    R: RpcBroadcaster,
    D: Deliver,
{
    pub fn new(
        batch: Batch<EngineHandle<P, R>, BroadcastRequest>,
        store: Arc<KvStore>,
        mempool: Arc<MempoolSnapshot>,
        dispatcher: Arc<NotificationDispatcher<D>>,
    ) -> RoutedBroadcastSink<P, R, D> {
        RoutedBroadcastSink {
            batch,
            requestor_to_bdv: Mutex::new(HashMap::new()),
            store,
            mempool,
            registry: Mutex::new(None),
            dispatcher,
        }
    }

    /// Completes construction once the registry this sink fans `zc`
    /// notifications through exists. Must be called before any session
    /// can broadcast, i.e. before the client listener starts accepting
    /// connections.
    pub fn set_registry(&self, registry: Arc<SessionRegistry>) {
        *self.registry.lock().expect("registry slot poisoned") = Some(registry);
    }

    /// Which session minted `requestor`, and the hash it submitted, so a
    /// drained [`bdv_mempool::broadcast::BroadcastNotification`] can be
    /// translated into that session's `BroadcastRejected`. Callers should
    /// [`Self::forget_requestor`] once a notification resolves it, since a
    /// `requestor` id is never reused but the map would otherwise grow
    /// unbounded over the process's lifetime.
    pub fn bdv_id_for_requestor(&self, requestor: RequestorId) -> Option<(BdvId, transaction::Hash)> {
        self.requestor_to_bdv
            .lock()
            .expect("requestor map poisoned")
            .get(&requestor)
            .cloned()
    }

    pub fn forget_requestor(&self, requestor: RequestorId) {
        self.requestor_to_bdv.lock().expect("requestor map poisoned").remove(&requestor);
    }
}

impl<P, R, D> BroadcastSink for RoutedBroadcastSink<P, R, D>
where
    P: PeerOutbound,
    R: RpcBroadcaster,
    D: Deliver,
{
    fn submit(&self, bdv_id: &BdvId, tx: Arc<Transaction>, requestor: RequestorId) {
        self.requestor_to_bdv
            .lock()
            .expect("requestor map poisoned")
            .insert(requestor, (bdv_id.clone(), tx.hash()));

        let registry = self.registry.lock().expect("registry slot poisoned").clone();
        if let Some(registry) = registry {
            let pool = self.mempool.load();
            if let Some(parsed) = pool.txs.get(&tx.hash()) {
                if !parsed.scr_addrs_touched.is_empty() {
                    let entries = notify::ledger_entries_for_zc(&self.store, &pool, parsed);
                    if !entries.is_empty() {
                        for target in registry.sessions_watching_any(&parsed.scr_addrs_touched) {
                            let request_id = if &target == bdv_id { Some(requestor) } else { None };
                            self.dispatcher.notify(
                                target,
                                Notification::Zc {
                                    entries: entries.clone(),
                                    request_id,
                                },
                            );
                        }
                    }
                }
            }
        }

        let svc = self.batch.clone();
        let request = BroadcastRequest { tx, requestor };
        tokio::spawn(async move {
            if let Err(error) = svc.oneshot(request).await {
                tracing::warn!(%error, "broadcast batch submission failed");
            }
        });
    }
}

impl<P, R, D> RefreshSink for RoutedBroadcastSink<P, R, D>
where
    P: PeerOutbound,
    R: RpcBroadcaster,
    D: Deliver,
{
    fn notify_refresh(&self, bdv_id: &BdvId, refresh_id: RefreshId) {
        self.dispatcher.notify(bdv_id.clone(), Notification::Refresh { refresh_id });
    }
}

/// The real [`RpcSink`]: `bdvd` has no JSON-RPC credentials of its own to
/// submit through, so `broadcastThroughRpc` reuses the same unsolicited-`tx`
/// fallback path a timed-out broadcast batch falls back to.
pub struct NodeRpcSink<R> {
    inner: R,
}

impl<R> NodeRpcSink<R> {
    pub fn new(inner: R) -> NodeRpcSink<R> {
        NodeRpcSink { inner }
    }
}

impl<R: RpcBroadcaster> RpcSink for NodeRpcSink<R> {
    fn submit_raw(&self, raw_tx: Vec<u8>) {
        use bdv_chain::BitcoinDeserialize;
        use std::io::Cursor;

        let mut cursor = Cursor::new(&raw_tx[..]);
        match Transaction::bitcoin_deserialize(&mut cursor) {
            Ok(tx) => {
                if let Err(error) = self.inner.broadcast(Arc::new(tx)) {
                    tracing::warn!(%error, "rpc-fallback broadcast failed");
                }
            }
            Err(error) => tracing::warn!(%error, "malformed raw transaction submitted through rpc"),
        }
    }
}
