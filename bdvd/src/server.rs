//! Wires every other module into a running process: opens the store, runs
//! the initial load-and-scan, connects to the upstream node, and starts
//! serving BDV client sessions (spec §4, §5). `db-repair` takes a much
//! narrower path through the same store/block-file types, without ever
//! starting the session side.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use bdv_mempool::broadcast::{BroadcastEngine, BroadcastNotification};
use bdv_mempool::{MempoolSnapshot, ZcParser};
use bdv_protocol::protocol::external::message::RejectReason;
use bdv_store::block_file::{enumerate_block_files, BlockFileReader};
use bdv_store::builder::DatabaseBuilder;
use bdv_store::history_scanner::HistoryScanner;
use bdv_store::{HeaderIndex, KvStore, LoadOutcome};

use bdv_session::notification::{Notification, NotificationDispatcher};
use bdv_session::session::SharedServices;
use bdv_session::{BdvId, SessionRegistry};

use crate::broadcast_router::{EngineHandle, NodeRpcSink, RoutedBroadcastSink};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::transport::{self, ChannelDeliver};
use crate::{node_link, notify};

type Engine = BroadcastEngine<node_link::OutboundHandle, node_link::RpcFallback>;
type Sink = RoutedBroadcastSink<node_link::OutboundHandle, node_link::RpcFallback, Arc<ChannelDeliver>>;
type Dispatcher = NotificationDispatcher<Arc<ChannelDeliver>>;

/// Runs the `start` command: builds a tokio runtime sized to
/// `config.session_worker_threads` and blocks on [`serve`].
pub fn run_start(config: Config) -> color_eyre::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.session_worker_threads.max(1))
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))?;
    Ok(())
}

/// Runs the `db-repair` command: reopens the store and rebuilds the
/// transaction-hash filter pool for the trailing `trailing_files` block
/// files, without touching the header index or serving any sessions (spec
/// §4.3's repair loop, run by hand instead of automatically).
pub fn run_db_repair(config: Config, trailing_files: u32) -> color_eyre::Result<()> {
    let store = KvStore::open(&config.store)?;
    let scanner = HistoryScanner::new(&store, config.store.db_type);

    let files = enumerate_block_files(&config.store.blocks_dir)?;
    let from = files.len().saturating_sub(trailing_files as usize);

    for file in &files[from..] {
        let reader = BlockFileReader::open(file, config.store.network)?;
        let hashes: Vec<_> = reader
            .parse_all()
            .iter()
            .flat_map(|record| record.block_data.block.transactions.iter().map(|tx| tx.hash()))
            .collect();
        scanner.rebuild_filter_pool(file.file_id, &hashes)?;
        tracing::info!(file_id = file.file_id, tx_count = hashes.len(), "rebuilt a filter pool");
    }

    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    let store = Arc::new(KvStore::open(&config.store)?);
    let cookie = load_or_create_cookie(&config.cookie_file)?;

    let header_index = Arc::new(RwLock::new(HeaderIndex::new()));
    run_load_and_scan(&store, &config, &header_index, HashSet::new()).await?;

    let mempool = Arc::new(MempoolSnapshot::new());
    let zc_parser = Arc::new(ZcParser::new(store.clone(), mempool.clone()));

    let (peer_events_tx, peer_events_rx) = mpsc::unbounded_channel();
    let best_block = header_index
        .read()
        .expect("header index poisoned")
        .main_chain_tip()
        .map(|(_, height)| height)
        .unwrap_or(bdv_chain::block::Height(0));
    let outbound = node_link::spawn(config.node_addr, config.store.network, best_block, peer_events_tx);

    let (broadcast_notify_tx, broadcast_notify_rx) = std::sync::mpsc::channel();
    let engine: Arc<Engine> = Arc::new(BroadcastEngine::new(
        outbound.clone(),
        node_link::RpcFallback::new(&outbound),
        config.mempool.broadcast_timeout,
        broadcast_notify_tx,
    ));
    let batch = bdv_batch::Batch::new(
        EngineHandle::new(engine.clone()),
        config.mempool.batch_max_items,
        config.mempool.batch_max_latency,
        None,
    );

    let deliver = Arc::new(ChannelDeliver::new());
    let dispatcher: Arc<Dispatcher> = Arc::new(NotificationDispatcher::new(deliver.clone()));

    let broadcast_sink: Arc<Sink> = Arc::new(RoutedBroadcastSink::new(
        batch,
        store.clone(),
        mempool.clone(),
        dispatcher.clone(),
    ));
    let rpc_sink = Arc::new(NodeRpcSink::new(node_link::RpcFallback::new(&outbound)));

    let services = Arc::new(SharedServices {
        store: store.clone(),
        header_index: header_index.clone(),
        mempool: mempool.clone(),
        zc_parser: zc_parser.clone(),
        broadcast: broadcast_sink.clone(),
        rpc: rpc_sink,
        refresh: broadcast_sink.clone() as Arc<dyn bdv_session::session::RefreshSink>,
        config: config.store.clone(),
        shutdown_cookie: cookie,
        requestor_counter: AtomicU64::new(0),
    });

    let registry = Arc::new(SessionRegistry::new(services));
    broadcast_sink.set_registry(registry.clone());

    spawn_peer_event_task(
        zc_parser.clone(),
        mempool.clone(),
        store.clone(),
        registry.clone(),
        dispatcher.clone(),
        engine.clone(),
        peer_events_rx,
    );
    spawn_broadcast_notify_task(broadcast_sink.clone(), dispatcher.clone(), broadcast_notify_rx);
    spawn_poll_task(
        config.clone(),
        store.clone(),
        header_index.clone(),
        zc_parser.clone(),
        registry.clone(),
        dispatcher.clone(),
        engine.clone(),
    );
    spawn_timeout_sweep_task(engine.clone(), config.mempool.broadcast_timeout);

    let listener = TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "listening for bdv client sessions");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                let mut id_bytes = [0u8; 10];
                rand::thread_rng().fill(&mut id_bytes[..]);
                let bdv_id = BdvId(id_bytes);
                let session = registry.open_session(bdv_id.clone());
                let registry = registry.clone();
                let dispatcher = dispatcher.clone();
                let deliver = deliver.clone();
                tokio::spawn(async move {
                    tracing::info!(%addr, "bdv client connected");
                    transport::serve(stream, bdv_id, session, registry, dispatcher, deliver).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down on ctrl-c");
                return Ok(());
            }
        }
    }
}

async fn run_load_and_scan(
    store: &Arc<KvStore>,
    config: &Config,
    header_index: &Arc<RwLock<HeaderIndex>>,
    watched: HashSet<bdv_store::ScrAddr>,
) -> Result<LoadOutcome> {
    let store = store.clone();
    let header_index = header_index.clone();
    let config_store = config.store.clone();
    tokio::task::spawn_blocking(move || -> bdv_store::Result<LoadOutcome> {
        let mut index = header_index.write().expect("header index poisoned");
        let builder = DatabaseBuilder::new(&store, &config_store);
        builder.load_and_scan(&mut index, &watched)
    })
    .await
    .expect("database builder task panicked")
    .map_err(Error::from)
}

/// Forwards the node connection's `tx`/`reject` traffic into the mempool
/// pipeline: every inbound `tx` is preprocessed and committed the same way
/// a wallet's own `broadcastZc` submission is (spec §4.4 steps 1-3), and a
/// successful commit fans a `zc` notification to whichever sessions watch
/// an address it touches.
fn spawn_peer_event_task(
    zc_parser: Arc<ZcParser>,
    mempool: Arc<MempoolSnapshot>,
    store: Arc<KvStore>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<Engine>,
    mut events: mpsc::UnboundedReceiver<node_link::PeerEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                node_link::PeerEvent::Tx(tx) => {
                    engine.on_peer_accepted(tx.hash());

                    let task_parser = zc_parser.clone();
                    let committed = tokio::task::spawn_blocking(move || -> bdv_mempool::Result<_> {
                        let parsed = task_parser.preprocess(tx)?;
                        let outcome = task_parser.commit(parsed)?;
                        if let Some(outcome) = &outcome {
                            // `commit` already released `commit_lock` by the
                            // time it returned, so rescheduling here can't
                            // deadlock against it (spec §4.4
                            // "Collision/replacement").
                            task_parser.reschedule_evicted(outcome.evicted.clone());
                        }
                        Ok(outcome)
                    })
                    .await;

                    match committed {
                        Ok(Ok(Some(outcome))) => {
                            if outcome.scr_addrs_touched.is_empty() {
                                continue;
                            }
                            let pool = mempool.load();
                            if let Some(parsed) = pool.txs.get(&outcome.committed.hash) {
                                let entries = notify::ledger_entries_for_zc(&store, &pool, parsed);
                                if !entries.is_empty() {
                                    for target in registry.sessions_watching_any(&outcome.scr_addrs_touched) {
                                        dispatcher.notify(
                                            target,
                                            Notification::Zc {
                                                entries: entries.clone(),
                                                request_id: None,
                                            },
                                        );
                                    }
                                }
                            }
                        }
                        Ok(Ok(None)) => {}
                        Ok(Err(error)) => tracing::warn!(%error, "failed to commit a peer-sourced transaction"),
                        Err(error) => tracing::error!(%error, "preprocess task panicked"),
                    }
                }
                node_link::PeerEvent::Reject { tx_hash, reason, message } => {
                    engine.on_peer_rejected(tx_hash, reason, &message);
                }
            }
        }
    });
}

/// Drains the broadcast engine's resolution channel and translates every
/// non-success outcome into the requesting session's `BroadcastRejected`
/// notification (spec §4.7 "error"/§6). Runs on a plain OS thread since the
/// channel is `std::sync::mpsc`, the same as the engine itself uses so its
/// `&self` methods stay callable from synchronous code.
fn spawn_broadcast_notify_task(
    sink: Arc<Sink>,
    dispatcher: Arc<Dispatcher>,
    rx: std::sync::mpsc::Receiver<BroadcastNotification>,
) {
    std::thread::spawn(move || {
        while let Ok(notification) = rx.recv() {
            let (requestor, reason, message) = match notification {
                BroadcastNotification::Success { .. } => continue,
                BroadcastNotification::AlreadyInMempool { requestor } => {
                    (requestor, RejectReason::Duplicate, "already tracked in the mempool".to_string())
                }
                BroadcastNotification::AlreadyInChain { requestor } => {
                    (requestor, RejectReason::Duplicate, "already confirmed in the chain".to_string())
                }
                BroadcastNotification::Rejected { requestor, code, message } => {
                    (requestor, RejectReason::Other, format!("{} (code {})", message, code))
                }
            };
            if let Some((bdv_id, tx_hash)) = sink.bdv_id_for_requestor(requestor) {
                dispatcher.notify(bdv_id, Notification::BroadcastRejected { tx_hash, reason, message });
            }
            sink.forget_requestor(requestor);
        }
    });
}

/// The periodic rescan driving spec §4.3's repair loop and §4.4's
/// block-based purge while the server runs: each pass re-derives whatever
/// the local node has appended to `blocks_dir` since the last one, purges
/// mempool entries the new block invalidates, and fans a `newBlock`
/// notification to every online session.
fn spawn_poll_task(
    config: Config,
    store: Arc<KvStore>,
    header_index: Arc<RwLock<HeaderIndex>>,
    zc_parser: Arc<ZcParser>,
    registry: Arc<SessionRegistry>,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<Engine>,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(config.poll_interval).await;

            let watched = registry.watched_scr_addrs();
            let outcome = match run_load_and_scan(&store, &config, &header_index, watched).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    if error.is_fatal() {
                        panic!("fatal store error during a database builder pass: {error}");
                    }
                    tracing::error!(%error, "database builder pass failed");
                    continue;
                }
            };

            let purge = zc_parser.purge_for_new_block(
                &outcome.reorg,
                &outcome.newly_mined_outpoints,
                &outcome.reorged_out_tx_hashes,
            );
            let invalidated_zc_keys: Vec<_> = purge.invalidated.iter().map(|tx| tx.zc_key).collect();
            for tx in &purge.invalidated {
                engine.mark_resolved_elsewhere(tx.hash, false);
            }

            // `commit_lock` is already released by the time
            // `purge_for_new_block` returns, so resetting and resubmitting
            // the invalidated txs here can't deadlock against it (spec
            // §4.4 "Block-based purge", Scenario S5).
            let reschedule_parser = zc_parser.clone();
            let reschedule_invalidated = purge.invalidated;
            tokio::task::spawn_blocking(move || {
                reschedule_parser.reschedule_evicted(reschedule_invalidated);
            })
            .await
            .expect("reschedule task panicked");

            let branch_height = if outcome.reorg.prev_top_still_valid {
                None
            } else {
                Some(outcome.reorg.branch_point)
            };

            for bdv_id in registry.online_session_ids() {
                dispatcher.notify(
                    bdv_id,
                    Notification::NewBlock {
                        height: outcome.top,
                        branch_height,
                        invalidated_zc_keys: invalidated_zc_keys.clone(),
                    },
                );
            }
        }
    });
}

fn spawn_timeout_sweep_task(engine: Arc<Engine>, broadcast_timeout: Duration) {
    let interval = (broadcast_timeout / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            engine.sweep_timeouts();
        }
    });
}

/// A fresh random token is written to `path` at every startup, the same way
/// a node's own RPC cookie file is never expected to outlive the process
/// that wrote it — `shutdown`/`shutdownNode` only need to agree with
/// whichever cookie this run handed out.
fn load_or_create_cookie(path: &Path) -> Result<Vec<u8>> {
    let mut cookie = vec![0u8; 32];
    rand::thread_rng().fill(&mut cookie[..]);
    std::fs::write(path, &cookie).map_err(Error::Io)?;
    tracing::info!(path = %path.display(), "wrote a fresh shutdown cookie");
    Ok(cookie)
}
