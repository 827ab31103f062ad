//! Maps opaque per-connection bdv-ids to their [`Session`], and maintains
//! the process-wide union of every scrAddr any session currently watches
//! — what [`bdv_mempool::ZcParser::set_watched`] filters against, and what
//! the database builder's repeated history-scan passes need each time a
//! new wallet is registered mid-run.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use bdv_store::scr_addr::ScrAddr;

use crate::session::{Session, SharedServices};
use crate::BdvId;

/// Every live session, keyed by its bdv-id, plus the watched-address union
/// every session's wallets contribute to.
pub struct SessionRegistry {
    services: Arc<SharedServices>,
    sessions: RwLock<HashMap<BdvId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(services: Arc<SharedServices>) -> Self {
        SessionRegistry {
            services,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates and registers a new session for a freshly accepted
    /// connection.
    pub fn open_session(&self, id: BdvId) -> Arc<Session> {
        let session = Arc::new(Session::new(id.clone(), self.services.clone()));
        self.sessions
            .write()
            .expect("session registry poisoned")
            .insert(id, session.clone());
        session
    }

    pub fn session(&self, id: &BdvId) -> Option<Arc<Session>> {
        self.sessions.read().expect("session registry poisoned").get(id).cloned()
    }

    /// Drops a session (on disconnect) and refreshes the watched-address
    /// union to reflect whatever addresses only it was watching.
    pub fn close_session(&self, id: &BdvId) {
        self.sessions.write().expect("session registry poisoned").remove(id);
        self.refresh_watched_set();
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().expect("session registry poisoned").len()
    }

    /// Recomputes the full watched-scrAddr union across every live
    /// session's wallets and pushes it to the ZC parser. Called after any
    /// registration/unregistration completes and after a session closes,
    /// so the parser's filter never lags the sessions actually connected.
    pub fn refresh_watched_set(&self) {
        self.services.zc_parser.set_watched(self.watched_scr_addrs());
    }

    /// The current watched-scrAddr union, for a caller (the database
    /// builder's repeated scan passes) that needs it directly rather than
    /// through the ZC parser's copy.
    pub fn watched_scr_addrs(&self) -> HashSet<ScrAddr> {
        let mut watched = HashSet::new();
        for session in self.sessions.read().expect("session registry poisoned").values() {
            watched.extend(session.watched_scr_addrs());
        }
        watched
    }

    /// Every live, online session's id — what a `new_block` notification
    /// fans out to, since a new block is relevant regardless of which
    /// scrAddrs a session watches (spec §4.7).
    pub fn online_session_ids(&self) -> Vec<BdvId> {
        self.sessions
            .read()
            .expect("session registry poisoned")
            .values()
            .filter(|session| session.is_online())
            .map(|session| session.id.clone())
            .collect()
    }

    /// Every live session that watches at least one of `scr_addrs`, for
    /// routing a `zc`/`invalidated_zc` notification to just the sessions it
    /// actually concerns (spec §4.4 "Notify", §4.7).
    pub fn sessions_watching_any(&self, scr_addrs: &[ScrAddr]) -> Vec<BdvId> {
        self.sessions
            .read()
            .expect("session registry poisoned")
            .values()
            .filter(|session| {
                let watched = session.watched_scr_addrs();
                scr_addrs.iter().any(|scr_addr| watched.contains(scr_addr))
            })
            .map(|session| session.id.clone())
            .collect()
    }
}

impl Session {
    /// Every scrAddr registered across this session's wallets, the input
    /// [`SessionRegistry::refresh_watched_set`] folds into the process-wide
    /// union.
    pub fn watched_scr_addrs(&self) -> HashSet<ScrAddr> {
        self.wallet_scr_addrs_union()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdv_mempool::{MempoolSnapshot, ZcParser};
    use bdv_store::config::Config;
    use bdv_store::{HeaderIndex, KvStore};
    use tempdir::TempDir;

    struct NoopBroadcast;
    impl crate::session::BroadcastSink for NoopBroadcast {
        fn submit(&self, _bdv_id: &BdvId, _tx: Arc<bdv_chain::transaction::Transaction>, _requestor: u64) {}
    }
    struct NoopRpc;
    impl crate::session::RpcSink for NoopRpc {
        fn submit_raw(&self, _raw_tx: Vec<u8>) {}
    }
    struct NoopRefresh;
    impl crate::session::RefreshSink for NoopRefresh {
        fn notify_refresh(&self, _bdv_id: &BdvId, _refresh_id: crate::wallet::RefreshId) {}
    }

    #[test]
    fn opening_and_closing_sessions_updates_the_registry() {
        let dir = TempDir::new("bdv-session").unwrap();
        let config = Config {
            db_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let store = Arc::new(KvStore::open(&config).unwrap());
        let mempool = Arc::new(MempoolSnapshot::new());
        let services = Arc::new(SharedServices {
            zc_parser: Arc::new(ZcParser::new(store.clone(), mempool.clone())),
            store,
            header_index: Arc::new(RwLock::new(HeaderIndex::new())),
            mempool,
            broadcast: Arc::new(NoopBroadcast),
            rpc: Arc::new(NoopRpc),
            refresh: Arc::new(NoopRefresh),
            config,
            shutdown_cookie: Vec::new(),
            requestor_counter: std::sync::atomic::AtomicU64::new(0),
        });

        let registry = SessionRegistry::new(services);
        let id = BdvId([5u8; 10]);
        registry.open_session(id.clone());
        assert_eq!(registry.session_count(), 1);
        assert!(registry.session(&id).is_some());

        registry.close_session(&id);
        assert_eq!(registry.session_count(), 0);
        assert!(registry.session(&id).is_none());
    }
}
