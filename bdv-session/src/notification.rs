//! The notification dispatcher: fans `new_block`/`zc`/`refresh`/
//! `progress`/`node_status`/`error`/`ready`/`invalidated_zc` events out to
//! whichever sessions registered interest, preserving ordering rules —
//! in particular that `ready` is always first,
//! and that a `new_block` for height h is only delivered after every ZC
//! notification for transactions that were in the mempool prior to h being
//! processed (since both flow through the same per-bdv ordered delivery
//! path, this falls out of callers enqueueing them in that order rather
//! than anything the dispatcher itself reorders).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use bdv_chain::{block, transaction};
use bdv_protocol::protocol::external::message::RejectReason;
use bdv_store::{keys::DbKey, scr_addr::ScrAddr};

use crate::wallet::RefreshId;
use crate::BdvId;

/// One new or updated TxIO a client's wallet should reflect, enough for a
/// `zc`/ledger update without a further round trip.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub scr_addr: ScrAddr,
    pub tx_key: DbKey,
    pub tx_hash: transaction::Hash,
    pub value_delta: i64,
    pub height: Option<block::Height>,
}

/// A structured error notification.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationError {
    pub code: i32,
    pub data: Option<Vec<u8>>,
    pub message: String,
    pub request_id: Option<u64>,
}

/// One event the dispatcher fans out to a session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Notification {
    /// Always the first notification a session receives.
    Ready,
    NewBlock {
        height: block::Height,
        branch_height: Option<block::Height>,
        invalidated_zc_keys: Vec<DbKey>,
    },
    /// A new or updated set of unconfirmed ledger entries, optionally tied
    /// to a broadcast this session originated.
    Zc {
        entries: Vec<LedgerEntry>,
        request_id: Option<u64>,
    },
    InvalidatedZc {
        tx_keys: Vec<DbKey>,
    },
    /// A broadcast this session originated was rejected by a peer or by
    /// RPC, surfaced with whatever reason the rejecting side gave.
    BroadcastRejected {
        tx_hash: transaction::Hash,
        reason: RejectReason,
        message: String,
    },
    /// Completion of `register_wallet`/`register_lockbox`/
    /// `unregister_addresses`.
    Refresh {
        refresh_id: RefreshId,
    },
    Progress {
        phase: String,
        numerator: u64,
        denominator: u64,
    },
    NodeStatus {
        connected: bool,
    },
    Error(NotificationError),
}

/// Per-session outbound delivery: whatever transport `bdvd` wires a session
/// up to implements this to actually push bytes to the client.
pub trait Deliver: Send + Sync + 'static {
    fn deliver(&self, bdv_id: &BdvId, notification: &Notification);
}

struct Inbox {
    spinlock: crate::spinlock::SessionSpinlock,
    pending: Mutex<Vec<Notification>>,
}

/// Fans notifications out to every interested session, serializing
/// delivery per session.
///
/// Grounded on the same single-permit spinlock-retry shape
/// [`crate::session::Session::dispatch`] uses for command ordering,
/// generalized here from "ordered by message id" to "ordered by
/// arrival" — notifications aren't numbered the way commands are, only
/// required to never interleave two delivery attempts for the same
/// session.
pub struct NotificationDispatcher<D> {
    deliver: D,
    inboxes: Mutex<HashMap<BdvId, Arc<Inbox>>>,
}

impl<D: Deliver> NotificationDispatcher<D> {
    pub fn new(deliver: D) -> Self {
        NotificationDispatcher {
            deliver,
            inboxes: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_session(&self, bdv_id: BdvId) {
        let mut inboxes = self.inboxes.lock().expect("inbox map poisoned");
        inboxes.entry(bdv_id).or_insert_with(|| {
            Arc::new(Inbox {
                spinlock: crate::spinlock::SessionSpinlock::new(),
                pending: Mutex::new(Vec::new()),
            })
        });
    }

    pub fn unregister_session(&self, bdv_id: &BdvId) {
        self.inboxes.lock().expect("inbox map poisoned").remove(bdv_id);
    }

    /// Enqueues `notification` for `bdv_id` and attempts delivery. If the
    /// session's spinlock is already held by a concurrent delivery attempt,
    /// the notification stays queued in the inbox and the *other* attempt
    /// (the one holding the lock) drains it before releasing — so nothing
    /// is lost, and per-session order is preserved without a caller-side
    /// retry loop.
    pub fn notify(&self, bdv_id: BdvId, notification: Notification) {
        let inbox = {
            let mut inboxes = self.inboxes.lock().expect("inbox map poisoned");
            inboxes
                .entry(bdv_id.clone())
                .or_insert_with(|| {
                    Arc::new(Inbox {
                        spinlock: crate::spinlock::SessionSpinlock::new(),
                        pending: Mutex::new(Vec::new()),
                    })
                })
                .clone()
        };

        inbox.pending.lock().expect("pending queue poisoned").push(notification);
        self.drain(&bdv_id, &inbox);
    }

    fn drain(&self, bdv_id: &BdvId, inbox: &Inbox) {
        let _guard = match inbox.spinlock.try_enter() {
            Some(guard) => guard,
            // Another worker is already draining this session's inbox;
            // it will see the notification just pushed and deliver it in
            // turn, so returning here is safe.
            None => return,
        };

        loop {
            let batch: Vec<Notification> = {
                let mut pending = inbox.pending.lock().expect("pending queue poisoned");
                std::mem::take(&mut *pending)
            };
            if batch.is_empty() {
                return;
            }
            for notification in &batch {
                self.deliver.deliver(bdv_id, notification);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDeliver {
        count: AtomicUsize,
    }
    impl Deliver for Arc<CountingDeliver> {
        fn deliver(&self, _bdv_id: &BdvId, _notification: &Notification) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn every_enqueued_notification_is_eventually_delivered() {
        let deliver = Arc::new(CountingDeliver {
            count: AtomicUsize::new(0),
        });
        let dispatcher = NotificationDispatcher::new(deliver.clone());
        let bdv_id = BdvId([1u8; 10]);
        dispatcher.register_session(bdv_id.clone());

        dispatcher.notify(bdv_id.clone(), Notification::Ready);
        dispatcher.notify(
            bdv_id,
            Notification::Refresh { refresh_id: 1 },
        );

        assert_eq!(deliver.count.load(Ordering::SeqCst), 2);
    }
}
