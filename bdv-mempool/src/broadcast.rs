//! The broadcast engine (spec §4.4 "Broadcast batches", §5.4, §8 invariant
//! 5, S6): takes a wallet-submitted transaction, tracks it in a watcher map
//! keyed by hash, and resolves it once a peer's `inv`/`getdata` round trip
//! confirms it propagated (or a timeout falls back to RPC).
//!
//! The batching half of this — coalescing many submissions behind one
//! worker, flushing an `inv` announcement on a count-or-deadline trigger —
//! is exactly the shape [`bdv_batch::Batch`] already generalizes (spec §5.4
//! names it directly); this module supplies the inner
//! `tower::Service<BatchControl<BroadcastRequest>>` that crate wraps.
//!
//! The P2P round trip and the RPC fallback are both expressed as small
//! traits (`PeerOutbound`, `RpcBroadcaster`) rather than a concrete network
//! client, since neither `bdv-protocol` nor this crate owns a live peer
//! connection — `bdvd` supplies the real implementations when it wires the
//! server together (spec §7's "RPC-fallback thread", expressed here as a
//! `tower_fallback`-style wrapper the way `zebra-consensus` depends on its
//! sibling `tower-fallback` crate, even though no such crate was available
//! to pull in directly — implemented inline instead).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tower::Service;

use bdv_chain::transaction;
use bdv_protocol::protocol::external::message::RejectReason;

use crate::error::{code, Error, Result};

pub type RequestorId = u64;
pub type BroadcastId = u64;

/// One submission pushed through a [`bdv_batch::Batch`] wrapping a
/// [`BroadcastEngine`] (spec §4.4 "Broadcast batches").
pub struct BroadcastRequest {
    pub tx: Arc<transaction::Transaction>,
    pub requestor: RequestorId,
}

/// What happened to one watched hash, reported back to whichever layer
/// forwards it to the notification dispatcher (spec §4.7 "zc"/"error").
#[derive(Debug, Clone)]
pub enum BroadcastNotification {
    /// The primary requestor's own submission made it onto a peer's
    /// mempool; carries the broadcast id so the client can correlate it.
    Success {
        requestor: RequestorId,
        broadcast_id: BroadcastId,
    },
    /// An extra requestor's hash was already being tracked under someone
    /// else's submission when theirs arrived (spec §5.4 "extra
    /// requestors").
    AlreadyInMempool { requestor: RequestorId },
    AlreadyInChain { requestor: RequestorId },
    Rejected {
        requestor: RequestorId,
        code: i32,
        message: String,
    },
}

/// Sends outbound wire traffic for hashes this engine wants announced.
/// `bdvd` implements this over the real peer-connection pool.
pub trait PeerOutbound: Send + Sync + 'static {
    fn send_inv(&self, hashes: &[transaction::Hash]);
}

/// Broadcasts a transaction through the node's RPC interface instead of the
/// P2P network, used once a batch's peer round trip times out (spec §4.4,
/// §6 RPC-fallback error codes).
pub trait RpcBroadcaster: Send + Sync + 'static {
    fn broadcast(&self, tx: Arc<transaction::Transaction>) -> std::result::Result<(), String>;
}

struct WatcherEntry {
    raw_tx: Arc<transaction::Transaction>,
    primary_requestor: RequestorId,
    extra_requestors: Vec<RequestorId>,
    inved: bool,
    /// Set once a reorg/collision purge has already told this hash's
    /// requestors it's gone; a late peer response shouldn't re-notify them
    /// (spec §4.4 "Collision/replacement" interacting with "Broadcast
    /// batches").
    ignore_watcher_inv: bool,
    deadline: Instant,
    broadcast_id: BroadcastId,
}

/// The watcher map plus whatever it takes to drive one hash from "queued"
/// to "resolved" (spec §4.4, §5 "watcher map protected by single mutex,
/// touched only by parser + broadcast paths").
pub struct BroadcastEngine<P, R> {
    watchers: Mutex<HashMap<transaction::Hash, WatcherEntry>>,
    peer: P,
    rpc: R,
    timeout: Duration,
    next_broadcast_id: AtomicU64,
    notify: std::sync::mpsc::Sender<BroadcastNotification>,
}

impl<P: PeerOutbound, R: RpcBroadcaster> BroadcastEngine<P, R> {
    pub fn new(
        peer: P,
        rpc: R,
        timeout: Duration,
        notify: std::sync::mpsc::Sender<BroadcastNotification>,
    ) -> BroadcastEngine<P, R> {
        BroadcastEngine {
            watchers: Mutex::new(HashMap::new()),
            peer,
            rpc,
            timeout,
            next_broadcast_id: AtomicU64::new(0),
            notify,
        }
    }

    /// Registers a submission under the watcher map. `pub` (rather than
    /// private) so a caller sharing one `Arc<BroadcastEngine>` between this
    /// crate's own `Service<BatchControl<_>>` impl and a `bdvd`-side
    /// forwarding wrapper — needed so `on_peer_accepted`/`sweep_timeouts`/
    /// etc. stay callable on the same instance a `bdv_batch::Batch` wraps —
    /// can build an equivalent `Service` impl without reaching into
    /// private state.
    pub fn register(&self, tx: Arc<transaction::Transaction>, requestor: RequestorId) -> BroadcastId {
        let hash = tx.hash();
        let mut watchers = self.watchers.lock().expect("watcher map poisoned");
        match watchers.get_mut(&hash) {
            Some(entry) => {
                // Extra requestor for a hash already in flight under
                // another submission (spec §5.4 "extra requestors").
                entry.extra_requestors.push(requestor);
                let _ = self.notify.send(BroadcastNotification::AlreadyInMempool { requestor });
                entry.broadcast_id
            }
            None => {
                let broadcast_id = self.next_broadcast_id.fetch_add(1, Ordering::Relaxed);
                watchers.insert(
                    hash,
                    WatcherEntry {
                        raw_tx: tx,
                        primary_requestor: requestor,
                        extra_requestors: Vec::new(),
                        inved: false,
                        ignore_watcher_inv: false,
                        deadline: Instant::now() + self.timeout,
                        broadcast_id,
                    },
                );
                broadcast_id
            }
        }
    }

    /// Announces every not-yet-inved hash to peers and marks it inved
    /// (spec §4.4 "Broadcast batches", the `Flush` trigger). `pub` for the
    /// same reason as [`Self::register`].
    pub fn flush_pending_invs(&self) {
        let mut watchers = self.watchers.lock().expect("watcher map poisoned");
        let pending: Vec<transaction::Hash> = watchers
            .iter()
            .filter(|(_, entry)| !entry.inved)
            .map(|(hash, _)| *hash)
            .collect();
        if pending.is_empty() {
            return;
        }
        self.peer.send_inv(&pending);
        for hash in &pending {
            if let Some(entry) = watchers.get_mut(hash) {
                entry.inved = true;
            }
        }
    }

    /// A peer answered `getdata` with the transaction itself: the intended
    /// success path (spec §4.4 "Broadcast batches"). The primary requestor
    /// gets `Success` with the broadcast id; every extra requestor gets
    /// `Success` too, but without a correlating id of their own (spec §5.4
    /// "success with no request id for additional matched ZC").
    pub fn on_peer_accepted(&self, hash: transaction::Hash) {
        let entry = {
            let mut watchers = self.watchers.lock().expect("watcher map poisoned");
            watchers.remove(&hash)
        };
        let Some(entry) = entry else { return };
        if entry.ignore_watcher_inv {
            return;
        }
        let _ = self.notify.send(BroadcastNotification::Success {
            requestor: entry.primary_requestor,
            broadcast_id: entry.broadcast_id,
        });
        for requestor in entry.extra_requestors {
            let _ = self.notify.send(BroadcastNotification::Success {
                requestor,
                broadcast_id: entry.broadcast_id,
            });
        }
    }

    /// A peer answered `getdata` with a `reject` message (spec §4.4, §6
    /// error codes `P2PReject_Duplicate`/`P2PReject_InsufficientFee`).
    pub fn on_peer_rejected(&self, hash: transaction::Hash, ccode: RejectReason, reason: &str) {
        let entry = {
            let mut watchers = self.watchers.lock().expect("watcher map poisoned");
            watchers.remove(&hash)
        };
        let Some(entry) = entry else { return };
        if entry.ignore_watcher_inv {
            return;
        }
        let code = match ccode {
            RejectReason::Duplicate => code::P2P_REJECT_DUPLICATE,
            RejectReason::Nonstandard | RejectReason::Dust | RejectReason::InsufficientFee => {
                code::P2P_REJECT_INSUFFICIENT_FEE
            }
            _ => code::ZC_BROADCAST_VERIFY_REJECTED,
        };
        self.notify_all(&entry, code, reason.to_string());
    }

    /// A block mined or purged this hash out from under the broadcast
    /// before a peer ever answered; tells every requestor it's no longer
    /// pending rather than leaving them to time out (spec §4.4 "Block-based
    /// purge" interacting with "Broadcast batches").
    pub fn mark_resolved_elsewhere(&self, hash: transaction::Hash, already_in_chain: bool) {
        let entry = {
            let mut watchers = self.watchers.lock().expect("watcher map poisoned");
            watchers.remove(&hash)
        };
        let Some(entry) = entry else { return };
        let code = if already_in_chain {
            code::ZC_BROADCAST_ALREADY_IN_CHAIN
        } else {
            code::ZC_BROADCAST_ERROR
        };
        self.notify_all(&entry, code, "resolved outside the broadcast batch".to_string());
    }

    fn notify_all(&self, entry: &WatcherEntry, code: i32, message: String) {
        let _ = self.notify.send(BroadcastNotification::Rejected {
            requestor: entry.primary_requestor,
            code,
            message: message.clone(),
        });
        for &requestor in &entry.extra_requestors {
            let _ = self.notify.send(BroadcastNotification::Rejected {
                requestor,
                code,
                message: message.clone(),
            });
        }
    }

    /// Sweeps every watcher past its deadline, falling back to RPC
    /// broadcast for each (spec §4.4, §5 "RPC-fallback thread"). Intended
    /// to be driven by a periodic timer task in `bdvd`.
    pub fn sweep_timeouts(&self) {
        let expired: Vec<(transaction::Hash, Arc<transaction::Transaction>)> = {
            let watchers = self.watchers.lock().expect("watcher map poisoned");
            let now = Instant::now();
            watchers
                .iter()
                .filter(|(_, entry)| !entry.ignore_watcher_inv && entry.deadline <= now)
                .map(|(hash, entry)| (*hash, entry.raw_tx.clone()))
                .collect()
        };

        for (hash, tx) in expired {
            let entry = {
                let mut watchers = self.watchers.lock().expect("watcher map poisoned");
                watchers.remove(&hash)
            };
            let Some(entry) = entry else { continue };

            match self.rpc.broadcast(tx) {
                Ok(()) => {
                    let _ = self.notify.send(BroadcastNotification::Success {
                        requestor: entry.primary_requestor,
                        broadcast_id: entry.broadcast_id,
                    });
                    for requestor in entry.extra_requestors {
                        let _ = self.notify.send(BroadcastNotification::Success {
                            requestor,
                            broadcast_id: entry.broadcast_id,
                        });
                    }
                }
                Err(message) => self.notify_all(&entry, code::ZC_BATCH_TIMEOUT, message),
            }
        }
    }
}

impl<P, R> Service<bdv_batch::BatchControl<BroadcastRequest>> for BroadcastEngine<P, R>
where
    P: PeerOutbound,
    R: RpcBroadcaster,
{
    type Response = BroadcastId;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<BroadcastId>> + Send>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: bdv_batch::BatchControl<BroadcastRequest>) -> Self::Future {
        match request {
            bdv_batch::BatchControl::Item(item) => {
                let broadcast_id = self.register(item.tx, item.requestor);
                Box::pin(async move { Ok(broadcast_id) })
            }
            bdv_batch::BatchControl::Flush => {
                self.flush_pending_invs();
                Box::pin(async move { Ok(0) })
            }
        }
    }
}

/// Wraps a [`BroadcastEngine`] in a [`bdv_batch::Batch`], the cloneable,
/// `tower::Service<BroadcastRequest>` handle every session worker submits
/// broadcasts through (spec §4.4, §5.4).
pub fn spawn<P, R>(
    engine: BroadcastEngine<P, R>,
    max_items: usize,
    max_latency: Duration,
) -> bdv_batch::Batch<BroadcastEngine<P, R>, BroadcastRequest>
where
    P: PeerOutbound,
    R: RpcBroadcaster,
{
    bdv_batch::Batch::new(engine, max_items, max_latency, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdv_chain::transaction::{LockTime, Transaction};
    use bdv_chain::transparent::{CoinbaseData, Input, Output, Script};
    use std::sync::mpsc;

    struct NoopPeer {
        sent: Mutex<Vec<transaction::Hash>>,
    }
    impl PeerOutbound for Arc<NoopPeer> {
        fn send_inv(&self, hashes: &[transaction::Hash]) {
            self.sent.lock().unwrap().extend_from_slice(hashes);
        }
    }

    struct AlwaysFailsRpc;
    impl RpcBroadcaster for AlwaysFailsRpc {
        fn broadcast(&self, _tx: Arc<Transaction>) -> std::result::Result<(), String> {
            Err("no rpc configured".to_string())
        }
    }

    fn sample_tx() -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::Coinbase {
                height: None,
                data: CoinbaseData(vec![0]),
                sequence: 0,
            }],
            vec![Output {
                value: bdv_chain::amount::Amount::try_from(100).unwrap(),
                lock_script: Script(vec![]),
            }],
            LockTime::Height(bdv_chain::block::Height(0)),
        ))
    }

    #[test]
    fn a_duplicate_submission_notifies_the_second_requestor_already_in_mempool() {
        let peer = Arc::new(NoopPeer { sent: Mutex::new(Vec::new()) });
        let (tx, rx) = mpsc::channel();
        let engine = BroadcastEngine::new(peer, AlwaysFailsRpc, Duration::from_secs(10), tx);

        let tx1 = sample_tx();
        let id1 = engine.register(tx1.clone(), 1);
        let id2 = engine.register(tx1, 2);
        assert_eq!(id1, id2);

        let notification = rx.try_recv().unwrap();
        assert!(matches!(notification, BroadcastNotification::AlreadyInMempool { requestor: 2 }));
    }

    #[test]
    fn peer_acceptance_notifies_every_requestor() {
        let peer = Arc::new(NoopPeer { sent: Mutex::new(Vec::new()) });
        let (tx, rx) = mpsc::channel();
        let engine = BroadcastEngine::new(peer, AlwaysFailsRpc, Duration::from_secs(10), tx);

        let sample = sample_tx();
        let hash = sample.hash();
        engine.register(sample.clone(), 1);
        let _ = rx.try_recv(); // drain nothing, first registration sends no notification
        engine.register(sample, 2);
        let _ = rx.try_recv(); // AlreadyInMempool for requestor 2

        engine.on_peer_accepted(hash);
        let mut seen = vec![rx.try_recv().unwrap(), rx.try_recv().unwrap()];
        seen.sort_by_key(|n| match n {
            BroadcastNotification::Success { requestor, .. } => *requestor,
            _ => u64::MAX,
        });
        assert!(matches!(seen[0], BroadcastNotification::Success { requestor: 1, .. }));
        assert!(matches!(seen[1], BroadcastNotification::Success { requestor: 2, .. }));
    }
}
