//! A single client's BDV session: its registered wallets, online state, and
//! every query/command operation a connected client can issue, dispatched
//! in strict message-id order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bdv_chain::transaction::{self, Transaction};
use bdv_store::keys::{self, DbKey, HeightX};
use bdv_store::records::{Spentness, StoredHeader, StxoRecord, SubSshRecord};
use bdv_store::scr_addr::ScrAddr;
use bdv_store::sled_format::{SledDeserialize, TreeExt};
use bdv_store::{HeaderIndex, KvStore};

use bdv_mempool::{MempoolSnapshot, ZcParser};

use crate::command::{Command, LedgerPageEntry, Reply, UtxoView};
use crate::error::{Error, Result};
use crate::reassembly::ReassemblyBuffer;
use crate::spinlock::SessionSpinlock;
use crate::wallet::{RefreshId, WalletId, WalletRegistration};
use crate::BdvId;

/// How many ledger entries one `LedgerPage` reply holds.
const LEDGER_PAGE_SIZE: usize = 100;

/// Accepts a preprocessed, resolved transaction for announcement to peers.
/// `bdvd` implements this over the real `bdv_batch::Batch`-wrapped
/// [`bdv_mempool::broadcast::BroadcastEngine`]; this crate never talks to
/// a live peer connection directly.
pub trait BroadcastSink: Send + Sync {
    fn submit(&self, bdv_id: &BdvId, tx: Arc<Transaction>, requestor: u64);
}

/// Accepts a raw transaction for submission through the node's own RPC
/// interface rather than peer announcement.
pub trait RpcSink: Send + Sync {
    fn submit_raw(&self, raw_tx: Vec<u8>);
}

/// Delivers the `refresh` notification that completes a
/// `register_wallet`/`register_lockbox`/`unregister_addresses` call (spec
/// §4.4 "register_wallet"). Those commands never produce a synchronous
/// [`Reply`]; this is the only way their caller learns the registration
/// took effect.
pub trait RefreshSink: Send + Sync {
    fn notify_refresh(&self, bdv_id: &BdvId, refresh_id: RefreshId);
}

struct Inner {
    wallets: HashMap<WalletId, WalletRegistration>,
    online: bool,
    reassembly: ReassemblyBuffer<(u64, Command)>,
}

/// Shared, process-wide services every session dispatches into. One
/// instance is constructed by `bdvd` at startup and handed to every
/// session the registry creates.
pub struct SharedServices {
    pub store: Arc<KvStore>,
    pub header_index: Arc<RwLock<HeaderIndex>>,
    pub mempool: Arc<MempoolSnapshot>,
    pub zc_parser: Arc<ZcParser>,
    pub broadcast: Arc<dyn BroadcastSink>,
    pub rpc: Arc<dyn RpcSink>,
    pub refresh: Arc<dyn RefreshSink>,
    /// What a deferred wallet scan (spec §4.4 "register_wallet") reads
    /// `db_type`/rewind settings from; the same config `bdvd` built the
    /// store and header index from at startup.
    pub config: bdv_store::config::Config,
    /// The cookie `shutdown`/`shutdownNode` compare against, loaded once
    /// from disk at startup the way a node's RPC cookie normally is.
    pub shutdown_cookie: Vec<u8>,
    /// Mints the `requestor` id passed to [`BroadcastSink::submit`].
    /// Process-wide rather than per-session so a `requestor` value a
    /// `bdvd` broadcast router observes is globally unambiguous — two
    /// sessions broadcasting concurrently must never mint the same id
    /// (spec §4.4 "Broadcast batches", §8 property 5).
    pub requestor_counter: AtomicU64,
}

/// Outcome of a single [`Session::dispatch`] call.
pub enum DispatchOutcome {
    /// Another worker is already processing this session; the caller
    /// should re-queue the packet on the shared queue rather than wait.
    Busy,
    /// Every command that became ready to process (in order) and its
    /// reply.
    Processed(Vec<(u64, Result<Reply>)>),
}

/// One client's session state: wallets, online flag, and the reassembly
/// buffer enforcing strict message-id order.
pub struct Session {
    pub id: BdvId,
    services: Arc<SharedServices>,
    spinlock: SessionSpinlock,
    inner: Mutex<Inner>,
}

impl Session {
    pub fn new(id: BdvId, services: Arc<SharedServices>) -> Self {
        Session {
            id,
            services,
            spinlock: SessionSpinlock::new(),
            inner: Mutex::new(Inner {
                wallets: HashMap::new(),
                online: false,
                reassembly: ReassemblyBuffer::new(),
            }),
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.lock().expect("session state poisoned").online
    }

    /// Feeds one arriving packet into the session's reassembly buffer and
    /// processes whatever is now ready, in strict id order. If another
    /// worker is already inside this session's processing path, the
    /// packet is still buffered (so it isn't lost) but nothing is
    /// processed by this call — the caller should treat the session as
    /// busy and move on to other work rather than wait.
    pub fn dispatch(&self, msg_id: u64, command: Command) -> DispatchOutcome {
        {
            let mut inner = self.inner.lock().expect("session state poisoned");
            inner.reassembly.push(msg_id, (msg_id, command));
        }

        let _guard = match self.spinlock.try_enter() {
            Some(guard) => guard,
            None => return DispatchOutcome::Busy,
        };

        let ready: Vec<(u64, Command)> = {
            let mut inner = self.inner.lock().expect("session state poisoned");
            inner.reassembly.drain_ready()
        };

        let mut replies = Vec::with_capacity(ready.len());
        for (id, command) in ready {
            match self.handle(command) {
                Ok(Some(reply)) => replies.push((id, Ok(reply))),
                Ok(None) => {}
                Err(error) => replies.push((id, Err(error))),
            }
        }
        DispatchOutcome::Processed(replies)
    }

    /// `Ok(None)` means the command completes asynchronously instead of
    /// with a synchronous reply — `register_wallet`/`register_lockbox`/
    /// `unregister_addresses` deliver their outcome as a `refresh`
    /// notification instead (spec §4.4 "register_wallet").
    fn handle(&self, command: Command) -> Result<Option<Reply>> {
        match command {
            Command::RegisterBdv { .. } => Ok(Some(Reply::Registered)),

            Command::RegisterWallet {
                wallet_id,
                scr_addrs,
                is_new,
                registration_id,
            } => self.register_wallet(wallet_id, scr_addrs, is_new, false, registration_id),
            Command::RegisterLockbox {
                wallet_id,
                scr_addrs,
                registration_id,
            } => self.register_wallet(wallet_id, scr_addrs, true, true, registration_id),
            Command::UnregisterAddresses {
                wallet_id,
                scr_addrs,
                registration_id,
            } => self.unregister_addresses(wallet_id, &scr_addrs, registration_id),

            Command::GoOnline => self.go_online().map(Some),

            Command::HeaderByHash { hash } => self.header_by_hash(hash).map(Some),
            Command::HeaderByHeight { height } => self.header_by_height(height).map(Some),

            Command::TxByHash { hash } => self.tx_by_hash(hash).map(Reply::Tx).map(Some),
            Command::TxsByHash { hashes } => {
                let txs = hashes
                    .into_iter()
                    .map(|hash| self.tx_by_hash(hash))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Some(Reply::Txs(txs)))
            }
            Command::TxHeightOnly { hash } => self.tx_height_only(hash).map(Reply::TxHeight).map(Some),

            Command::WalletBalance { wallet_id } => self.wallet_balance(&wallet_id).map(Some),
            Command::CombinedBalance { wallet_ids } => self.combined_balance(&wallet_ids).map(Some),
            Command::WalletTxCount { wallet_id } => self.wallet_tx_count(&wallet_id).map(Some),

            Command::SpendableUtxosForValue {
                wallet_id,
                target_value,
            } => self.spendable_utxos_for_value(&wallet_id, target_value).map(Some),
            Command::RbfUtxos { wallet_id } => self.rbf_utxos(&wallet_id).map(Some),

            Command::AddressBook { wallet_id } => self.address_book(&wallet_id).map(Some),

            Command::LedgerPageCount { wallet_id } => self.ledger_page_count(&wallet_id).map(Some),
            Command::LedgerPage { wallet_id, page } => self.ledger_page(&wallet_id, page).map(Some),

            Command::FeeEstimate { target_blocks } => Ok(Some(Reply::FeeEstimate {
                sat_per_kb: fee_estimate_for(target_blocks),
            })),
            Command::FeeSchedule => Ok(Some(Reply::FeeSchedule(
                [1u32, 2, 3, 6, 12, 24, 48, 144, 504, 1008]
                    .iter()
                    .map(|&blocks| (blocks, fee_estimate_for(blocks)))
                    .collect(),
            ))),

            Command::SpentnessForOutput { tx_key, out_index } => {
                self.spentness_for_output(tx_key, out_index).map(Some)
            }

            Command::OutpointsForAddressSince {
                scr_addr,
                since_height,
                since_zc_id,
            } => self.outpoints_for_address_since(&scr_addr, since_height, since_zc_id).map(Some),
            Command::UtxosForAddress {
                scr_addr,
                include_zc,
            } => self.utxos_for_address(&scr_addr, include_zc).map(Some),

            Command::BroadcastZc { raw_txs } => self.broadcast_zc(raw_txs).map(Some),
            Command::BroadcastThroughRpc { raw_tx } => {
                self.services.rpc.submit_raw(raw_tx);
                Ok(Some(Reply::BroadcastAccepted { hashes: Vec::new() }))
            }

            Command::Shutdown { cookie } => self.check_cookie(&cookie).map(|()| Some(Reply::ShutdownAck)),
            Command::ShutdownNode { cookie } => self.check_cookie(&cookie).map(|()| Some(Reply::ShutdownAck)),
        }
    }

    /// Registers (or re-registers) a wallet's watched addresses. Never
    /// replies synchronously: if the session is already online this scans
    /// `scr_addrs`' history immediately, otherwise the scan is deferred
    /// until `go_online` — either way, completion is signaled by a
    /// `refresh` notification carrying `registration_id` (spec §4.4
    /// "register_wallet").
    fn register_wallet(
        &self,
        wallet_id: WalletId,
        scr_addrs: Vec<ScrAddr>,
        is_new: bool,
        is_lockbox: bool,
        registration_id: RefreshId,
    ) -> Result<Option<Reply>> {
        let online = {
            let mut inner = self.inner.lock().expect("session state poisoned");
            let set = scr_addrs.into_iter().collect();
            inner.wallets.insert(
                wallet_id.clone(),
                WalletRegistration::new(wallet_id.clone(), set, is_new, is_lockbox, registration_id),
            );
            inner.online
        };
        if online {
            self.scan_wallet(&wallet_id, registration_id)?;
        }
        Ok(None)
    }

    fn unregister_addresses(
        &self,
        wallet_id: WalletId,
        scr_addrs: &[ScrAddr],
        registration_id: RefreshId,
    ) -> Result<Option<Reply>> {
        {
            let mut inner = self.inner.lock().expect("session state poisoned");
            let wallet = inner
                .wallets
                .get_mut(&wallet_id)
                .ok_or_else(|| Error::UnknownWallet(wallet_id.clone()))?;
            for scr_addr in scr_addrs {
                wallet.scr_addrs.remove(scr_addr);
            }
        }
        self.services.refresh.notify_refresh(&self.id, registration_id);
        Ok(None)
    }

    /// Marks the session online and runs the initial scan for any wallet
    /// registered before this point (spec §4.4 "go_online"). Unlike
    /// registration, `go_online` itself always gets a synchronous
    /// [`Reply::OnlineAck`] — the deferred scans it triggers complete via
    /// their own `refresh` notifications.
    fn go_online(&self) -> Result<Reply> {
        let pending: Vec<(WalletId, RefreshId)> = {
            let mut inner = self.inner.lock().expect("session state poisoned");
            inner.online = true;
            inner
                .wallets
                .values()
                .filter(|wallet| !wallet.scan_complete)
                .map(|wallet| (wallet.id.clone(), wallet.registration_id))
                .collect()
        };
        for (wallet_id, registration_id) in pending {
            self.scan_wallet(&wallet_id, registration_id)?;
        }
        Ok(Reply::OnlineAck)
    }

    /// Backfills `wallet_id`'s full address history and fires its
    /// `refresh` notification. Shared by `register_wallet`'s online path
    /// and `go_online`'s deferred-scan path.
    fn scan_wallet(&self, wallet_id: &WalletId, registration_id: RefreshId) -> Result<()> {
        let scr_addrs = self.wallet_scr_addrs(wallet_id)?;
        {
            let header_index = self.services.header_index.read().expect("header index poisoned");
            let builder = bdv_store::DatabaseBuilder::new(&self.services.store, &self.services.config);
            builder.scan_address_history(&header_index, bdv_chain::block::Height(0), &scr_addrs)?;
        }

        let mut inner = self.inner.lock().expect("session state poisoned");
        if let Some(wallet) = inner.wallets.get_mut(wallet_id) {
            wallet.scan_complete = true;
        }
        drop(inner);

        self.services.refresh.notify_refresh(&self.id, registration_id);
        Ok(())
    }

    fn header_by_hash(&self, hash: bdv_chain::block::Hash) -> Result<Reply> {
        let height_x_bytes = self
            .services
            .store
            .headers
            .get(&keys::header_hash_key(hash)[..])
            .map_err(bdv_store::Error::from)?
            .ok_or(Error::UnknownHash(hash))?;
        let height_x = HeightX::from_bytes(&height_x_bytes).ok_or(Error::UnknownHash(hash))?;
        self.stored_header_at(height_x)
    }

    fn header_by_height(&self, height: bdv_chain::block::Height) -> Result<Reply> {
        let header_index = self.services.header_index.read().expect("header index poisoned");
        let (id, _header) = header_index
            .main_chain_header_at(height)
            .ok_or(Error::UnknownHeight(height))?;
        let dup_id = header_index.dup_id_of(id).ok_or(Error::UnknownHeight(height))?;
        drop(header_index);
        self.stored_header_at(HeightX::new(height, dup_id))
    }

    fn stored_header_at(&self, height_x: HeightX) -> Result<Reply> {
        let stored: StoredHeader = self
            .services
            .store
            .headers
            .zs_get(&keys::header_height_key(height_x), height_x.height)
            .map_err(bdv_store::Error::from)?
            .ok_or(Error::UnknownHeight(height_x.height))?;
        Ok(Reply::Header(stored))
    }

    /// Resolves a tx hash to its stored bytes, checking the mempool
    /// snapshot first before falling back to the TXHINTS
    /// candidate list and BLKDATA.
    fn tx_by_hash(&self, hash: transaction::Hash) -> Result<Vec<u8>> {
        if let Some(parsed) = self.services.mempool.load().txs.get(&hash) {
            return Ok(bdv_chain::BitcoinSerialize::bitcoin_serialize_to_vec(
                parsed.tx.as_ref(),
            ));
        }

        let tx_key = self.mined_tx_key(hash)?;
        self.services
            .store
            .blkdata
            .get(&tx_key.to_bytes()[..])
            .map_err(bdv_store::Error::from)?
            .map(|ivec| ivec.to_vec())
            .ok_or(Error::UnknownTx(hash))
    }

    fn tx_height_only(&self, hash: transaction::Hash) -> Result<Option<(bdv_chain::block::Height, u8)>> {
        if self.services.mempool.load().txs.contains_key(&hash) {
            return Ok(None);
        }
        match self.mined_tx_key(hash) {
            Ok(DbKey::Mined { height, dup_id, .. }) => Ok(Some((height, dup_id))),
            Ok(DbKey::Mempool { .. }) => Ok(None),
            Err(Error::UnknownTx(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// Walks the TXHINTS candidate list for `hash`'s prefix to find the
    /// mined `DbKey` whose own hash actually matches.
    fn mined_tx_key(&self, hash: transaction::Hash) -> Result<DbKey> {
        let hints_key = keys::tx_hints_key(hash.into());
        let hints: bdv_store::records::TxHints = self
            .services
            .store
            .txhints
            .zs_get_untyped(&hints_key)
            .map_err(bdv_store::Error::from)?
            .ok_or(Error::UnknownTx(hash))?;
        hints.candidates.first().copied().ok_or(Error::UnknownTx(hash))
    }

    fn wallet_balance(&self, wallet_id: &WalletId) -> Result<Reply> {
        let scr_addrs = self.wallet_scr_addrs(wallet_id)?;
        let mut confirmed = 0i64;
        for scr_addr in &scr_addrs {
            confirmed += self.confirmed_balance(scr_addr)?;
        }
        let unconfirmed = self.unconfirmed_balance(&scr_addrs);
        Ok(Reply::Balance {
            confirmed,
            unconfirmed,
        })
    }

    fn combined_balance(&self, wallet_ids: &[WalletId]) -> Result<Reply> {
        let mut confirmed = 0i64;
        let mut unconfirmed = 0i64;
        for wallet_id in wallet_ids {
            let scr_addrs = self.wallet_scr_addrs(wallet_id)?;
            for scr_addr in &scr_addrs {
                confirmed += self.confirmed_balance(scr_addr)?;
            }
            unconfirmed += self.unconfirmed_balance(&scr_addrs);
        }
        Ok(Reply::Balance {
            confirmed,
            unconfirmed,
        })
    }

    fn confirmed_balance(&self, scr_addr: &ScrAddr) -> Result<i64> {
        let ssh_key = keys::ssh_key(scr_addr.as_bytes());
        let ssh: bdv_store::records::SshRecord = self
            .services
            .store
            .ssh
            .zs_get_untyped(&ssh_key)
            .map_err(bdv_store::Error::from)?
            .unwrap_or_default();
        Ok(ssh.total_unspent)
    }

    /// Sums every still-unspent TxIO pair `scr_addrs` owns in the pool. A
    /// receive later spent by another pool tx nets to zero rather than
    /// counting twice: its credit and debit both happened unconfirmed, so
    /// neither moves the confirmed-relative balance.
    fn unconfirmed_balance(&self, scr_addrs: &std::collections::HashSet<ScrAddr>) -> i64 {
        let pool = self.services.mempool.load();
        let mut delta = 0i64;
        for scr_addr in scr_addrs {
            let Some(txio_keys) = pool.scr_addr_txios.get(scr_addr) else {
                continue;
            };
            for (zc_key, out_index) in txio_keys {
                let Some(txio) = pool.txios.get(zc_key).and_then(|outputs| outputs.get(out_index)) else {
                    continue;
                };
                if txio.is_utxo() {
                    delta += txio.value.i64();
                }
            }
        }
        delta
    }

    fn wallet_tx_count(&self, wallet_id: &WalletId) -> Result<Reply> {
        let scr_addrs = self.wallet_scr_addrs(wallet_id)?;
        let mut count = 0u64;
        for scr_addr in &scr_addrs {
            let ssh_key = keys::ssh_key(scr_addr.as_bytes());
            let ssh: bdv_store::records::SshRecord = self
                .services
                .store
                .ssh
                .zs_get_untyped(&ssh_key)
                .map_err(bdv_store::Error::from)?
                .unwrap_or_default();
            count += u64::from(ssh.txio_count);
        }
        Ok(Reply::TxCount(count))
    }

    /// Selects unspent outputs covering `target_value`: a single output at
    /// least as large as the target if one exists, otherwise the two
    /// largest outputs whose sum covers it, otherwise every unspent output
    /// owned by the wallet accumulated largest-first.
    fn spendable_utxos_for_value(&self, wallet_id: &WalletId, target_value: i64) -> Result<Reply> {
        let scr_addrs = self.wallet_scr_addrs(wallet_id)?;
        let mut candidates = Vec::new();
        for scr_addr in &scr_addrs {
            candidates.extend(self.confirmed_utxos_for(scr_addr)?);
        }
        candidates.sort_by(|a, b| b.value.cmp(&a.value));

        if let Some(single) = candidates.iter().find(|u| u.value >= target_value) {
            return Ok(Reply::Utxos(vec![single.clone()]));
        }
        if candidates.len() >= 2 && candidates[0].value + candidates[1].value >= target_value {
            return Ok(Reply::Utxos(vec![candidates[0].clone(), candidates[1].clone()]));
        }
        let mut selected = Vec::new();
        let mut sum = 0i64;
        for utxo in candidates {
            if sum >= target_value {
                break;
            }
            sum += utxo.value;
            selected.push(utxo);
        }
        Ok(Reply::Utxos(selected))
    }

    /// Unspent TxIO pairs belonging to an RBF-signaling tx: the ones a
    /// wallet should treat as unsafe to spend from until the replacement
    /// settles (spec §3 "RBF" status flag).
    fn rbf_utxos(&self, wallet_id: &WalletId) -> Result<Reply> {
        let scr_addrs = self.wallet_scr_addrs(wallet_id)?;
        let pool = self.services.mempool.load();
        let mut utxos = Vec::new();
        for scr_addr in &scr_addrs {
            let Some(txio_keys) = pool.scr_addr_txios.get(scr_addr) else {
                continue;
            };
            for (zc_key, out_index) in txio_keys {
                let Some(txio) = pool.txios.get(zc_key).and_then(|outputs| outputs.get(out_index)) else {
                    continue;
                };
                if txio.is_rbf && txio.is_utxo() {
                    utxos.push(UtxoView {
                        tx_key: *zc_key,
                        out_index: *out_index,
                        value: txio.value.i64(),
                        scr_addr: scr_addr.clone(),
                        height: None,
                    });
                }
            }
        }
        Ok(Reply::Utxos(utxos))
    }

    fn address_book(&self, wallet_id: &WalletId) -> Result<Reply> {
        let scr_addrs = self.wallet_scr_addrs(wallet_id)?;
        Ok(Reply::AddressBook(scr_addrs.into_iter().collect()))
    }

    fn ledger_page_count(&self, wallet_id: &WalletId) -> Result<Reply> {
        let entries = self.ledger_entries(wallet_id)?;
        let pages = (entries.len() + LEDGER_PAGE_SIZE - 1) / LEDGER_PAGE_SIZE;
        Ok(Reply::LedgerPageCount(pages as u32))
    }

    fn ledger_page(&self, wallet_id: &WalletId, page: u32) -> Result<Reply> {
        let entries = self.ledger_entries(wallet_id)?;
        let start = page as usize * LEDGER_PAGE_SIZE;
        let page_entries = entries
            .into_iter()
            .skip(start)
            .take(LEDGER_PAGE_SIZE)
            .collect();
        Ok(Reply::LedgerPage(page_entries))
    }

    fn ledger_entries(&self, wallet_id: &WalletId) -> Result<Vec<LedgerPageEntry>> {
        let scr_addrs = self.wallet_scr_addrs(wallet_id)?;
        let mut entries = Vec::new();
        for scr_addr in &scr_addrs {
            let prefix = keys::sub_ssh_prefix(scr_addr.as_bytes());
            for item in self.services.store.subssh.scan_prefix(&prefix) {
                let (key, value) = item.map_err(|e| bdv_store::Error::from(e))?;
                let (_, height_x) =
                    keys::scr_addr_from_sub_ssh_key(&key).ok_or_else(|| {
                        bdv_store::Error::Corrupt(key.to_vec())
                    })?;
                let bucket = SubSshRecord::sled_deserialize(height_x.height, &value)
                    .map_err(bdv_store::Error::from)?;
                for txio in bucket.entries {
                    entries.push(LedgerPageEntry {
                        tx_key: txio.tx_key,
                        scr_addr: scr_addr.clone(),
                        value_delta: if txio.is_spend {
                            -txio.value.i64()
                        } else {
                            txio.value.i64()
                        },
                        height: Some(height_x.height),
                    });
                }
            }
        }
        entries.sort_by(|a, b| b.height.cmp(&a.height));
        Ok(entries)
    }

    fn spentness_for_output(&self, tx_key: DbKey, out_index: u16) -> Result<Reply> {
        let key = keys::stxo_key(tx_key, out_index);
        let confirmed_spender = self
            .services
            .store
            .stxo
            .zs_get_untyped::<StxoRecord>(&key)
            .map_err(bdv_store::Error::from)?
            .and_then(|record| match record.spentness {
                Spentness::Spent { spender } => Some(spender),
                Spentness::Unspent => None,
            });

        let pool = self.services.mempool.load();
        let zc_spender = pool
            .spent_by
            .iter()
            .find(|(outpoint, _)| self.outpoint_matches(outpoint, tx_key, out_index))
            .map(|(_, hash)| pool.txs.get(hash).map(|parsed| parsed.zc_key))
            .flatten();

        Ok(Reply::Spentness {
            confirmed_spender,
            zc_spender,
        })
    }

    fn outpoint_matches(
        &self,
        outpoint: &bdv_chain::transparent::OutPoint,
        tx_key: DbKey,
        out_index: u16,
    ) -> bool {
        outpoint.index == u32::from(out_index) && self.mined_tx_key(outpoint.hash).ok() == Some(tx_key)
    }

    fn outpoints_for_address_since(
        &self,
        scr_addr: &ScrAddr,
        since_height: bdv_chain::block::Height,
        since_zc_id: u32,
    ) -> Result<Reply> {
        let mut outpoints = Vec::new();
        let from = keys::sub_ssh_key(scr_addr.as_bytes(), HeightX::new(since_height, 0));
        let prefix = keys::sub_ssh_prefix(scr_addr.as_bytes());
        for item in self.services.store.subssh.range(from..) {
            let (key, value) = item.map_err(|e| bdv_store::Error::from(e))?;
            if !key.starts_with(&prefix[..]) {
                break;
            }
            let (_, height_x) =
                keys::scr_addr_from_sub_ssh_key(&key).ok_or_else(|| bdv_store::Error::Corrupt(key.to_vec()))?;
            let bucket = SubSshRecord::sled_deserialize(height_x.height, &value).map_err(bdv_store::Error::from)?;
            for txio in bucket.entries {
                outpoints.push((txio.tx_key, txio.out_index));
            }
        }

        let pool = self.services.mempool.load();
        for parsed in pool.txs.values() {
            if parsed.zc_key.height_x().is_none() {
                if let DbKey::Mempool { zc_id } = parsed.zc_key {
                    if zc_id < since_zc_id {
                        continue;
                    }
                }
            }
            if parsed.scr_addrs_touched.contains(scr_addr) {
                for (out_index, output) in parsed.tx.outputs.iter().enumerate() {
                    if ScrAddr::from_script(&output.lock_script) == *scr_addr {
                        outpoints.push((parsed.zc_key, out_index as u16));
                    }
                }
            }
        }

        Ok(Reply::Outpoints(outpoints))
    }

    fn utxos_for_address(&self, scr_addr: &ScrAddr, include_zc: bool) -> Result<Reply> {
        let mut utxos = self.confirmed_utxos_for(scr_addr)?;
        if include_zc {
            let pool = self.services.mempool.load();
            for parsed in pool.txs.values() {
                for (out_index, output) in parsed.tx.outputs.iter().enumerate() {
                    if ScrAddr::from_script(&output.lock_script) == *scr_addr {
                        utxos.push(UtxoView {
                            tx_key: parsed.zc_key,
                            out_index: out_index as u16,
                            value: output.value.i64(),
                            scr_addr: scr_addr.clone(),
                            height: None,
                        });
                    }
                }
            }
        }
        Ok(Reply::Utxos(utxos))
    }

    /// Confirmed unspent outputs for a scrAddr, found by walking its
    /// Sub-SSH buckets and checking each txio's always-recomputed
    /// `is_utxo` status rather than trusting a cached flag.
    fn confirmed_utxos_for(&self, scr_addr: &ScrAddr) -> Result<Vec<UtxoView>> {
        let prefix = keys::sub_ssh_prefix(scr_addr.as_bytes());
        let scanner = bdv_store::history_scanner::HistoryScanner::new(
            &self.services.store,
            self.services
                .store
                .db_type()
                .map_err(bdv_store::Error::from)?,
        );

        let mut utxos = Vec::new();
        for item in self.services.store.subssh.scan_prefix(&prefix) {
            let (key, value) = item.map_err(|e| bdv_store::Error::from(e))?;
            let (_, height_x) =
                keys::scr_addr_from_sub_ssh_key(&key).ok_or_else(|| bdv_store::Error::Corrupt(key.to_vec()))?;
            let bucket = SubSshRecord::sled_deserialize(height_x.height, &value).map_err(bdv_store::Error::from)?;
            for txio in bucket.entries {
                if txio.is_spend {
                    continue;
                }
                if scanner
                    .is_utxo(txio.tx_key, txio.out_index)
                    .map_err(bdv_store::Error::from)?
                {
                    utxos.push(UtxoView {
                        tx_key: txio.tx_key,
                        out_index: txio.out_index,
                        value: txio.value.i64(),
                        scr_addr: scr_addr.clone(),
                        height: Some(height_x.height),
                    });
                }
            }
        }
        Ok(utxos)
    }

    /// Every scrAddr across every wallet this session has registered,
    /// regardless of which wallet owns it.
    pub(crate) fn wallet_scr_addrs_union(&self) -> std::collections::HashSet<ScrAddr> {
        let inner = self.inner.lock().expect("session state poisoned");
        inner
            .wallets
            .values()
            .flat_map(|w| w.scr_addrs.iter().cloned())
            .collect()
    }

    fn wallet_scr_addrs(&self, wallet_id: &WalletId) -> Result<std::collections::HashSet<ScrAddr>> {
        let inner = self.inner.lock().expect("session state poisoned");
        inner
            .wallets
            .get(wallet_id)
            .map(|w| w.scr_addrs.clone())
            .ok_or_else(|| Error::UnknownWallet(wallet_id.clone()))
    }

    /// Preprocesses and commits every raw transaction, forwarding the
    /// resolved ones to the broadcast sink. A structurally invalid tx
    /// aborts the whole batch with an error rather than partially
    /// submitting.
    fn broadcast_zc(&self, raw_txs: Vec<Vec<u8>>) -> Result<Reply> {
        use bdv_chain::BitcoinDeserialize;
        use std::io::Cursor;

        let mut hashes = Vec::with_capacity(raw_txs.len());
        let requestor = self.services.requestor_counter.fetch_add(1, Ordering::Relaxed);

        for raw in raw_txs {
            let mut cursor = Cursor::new(&raw[..]);
            let tx = Transaction::bitcoin_deserialize(&mut cursor).map_err(|_| Error::BadArgument {
                command: "broadcastZc",
                reason: "malformed transaction bytes".to_string(),
            })?;
            let tx = Arc::new(tx);
            let parsed = self.services.zc_parser.preprocess(tx.clone())?;
            hashes.push(parsed.hash);
            if self.services.zc_parser.commit(parsed)?.is_some() {
                self.services.broadcast.submit(&self.id, tx, requestor);
            }
        }

        Ok(Reply::BroadcastAccepted { hashes })
    }

    fn check_cookie(&self, cookie: &[u8]) -> Result<()> {
        if cookie == self.services.shutdown_cookie.as_slice() {
            Ok(())
        } else {
            Err(Error::BadArgument {
                command: "shutdown",
                reason: "cookie mismatch".to_string(),
            })
        }
    }
}

/// A flat sat/kB fee curve standing in for a real estimator; `bdvd` is free
/// to replace this with one that reads recent block fill from the header
/// index once it's wired up.
fn fee_estimate_for(target_blocks: u32) -> u64 {
    match target_blocks {
        0..=1 => 20_000,
        2..=3 => 10_000,
        4..=6 => 5_000,
        7..=24 => 2_000,
        _ => 1_000,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdv_store::config::Config;
    use tempdir::TempDir;

    struct NoopBroadcast;
    impl BroadcastSink for NoopBroadcast {
        fn submit(&self, _bdv_id: &BdvId, _tx: Arc<Transaction>, _requestor: u64) {}
    }
    struct NoopRpc;
    impl RpcSink for NoopRpc {
        fn submit_raw(&self, _raw_tx: Vec<u8>) {}
    }
    struct NoopRefresh;
    impl RefreshSink for NoopRefresh {
        fn notify_refresh(&self, _bdv_id: &BdvId, _refresh_id: RefreshId) {}
    }

    fn test_services(dir: &TempDir) -> Arc<SharedServices> {
        let config = Config {
            db_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let store = Arc::new(KvStore::open(&config).unwrap());
        let mempool = Arc::new(MempoolSnapshot::new());
        Arc::new(SharedServices {
            zc_parser: Arc::new(ZcParser::new(store.clone(), mempool.clone())),
            store,
            header_index: Arc::new(RwLock::new(HeaderIndex::new())),
            mempool,
            broadcast: Arc::new(NoopBroadcast),
            rpc: Arc::new(NoopRpc),
            refresh: Arc::new(NoopRefresh),
            config,
            shutdown_cookie: b"secret".to_vec(),
            requestor_counter: AtomicU64::new(0),
        })
    }

    #[test]
    fn register_and_go_online_round_trip() {
        let dir = TempDir::new("bdv-session").unwrap();
        let services = test_services(&dir);
        let session = Session::new(BdvId([0u8; 10]), services);

        match session.dispatch(1, Command::RegisterBdv { magic: [0xf9, 0xbe, 0xb4, 0xd9] }) {
            DispatchOutcome::Processed(replies) => {
                assert_eq!(replies.len(), 1);
                assert!(matches!(replies[0].1, Ok(Reply::Registered)));
            }
            DispatchOutcome::Busy => panic!("uncontended dispatch reported busy"),
        }

        match session.dispatch(2, Command::GoOnline) {
            DispatchOutcome::Processed(replies) => {
                assert!(matches!(replies[0].1, Ok(Reply::OnlineAck)));
            }
            DispatchOutcome::Busy => panic!("uncontended dispatch reported busy"),
        }
        assert!(session.is_online());
    }

    #[test]
    fn out_of_order_packets_are_held_until_the_gap_fills() {
        let dir = TempDir::new("bdv-session").unwrap();
        let services = test_services(&dir);
        let session = Session::new(BdvId([1u8; 10]), services);

        match session.dispatch(2, Command::GoOnline) {
            DispatchOutcome::Processed(replies) => assert!(replies.is_empty()),
            DispatchOutcome::Busy => panic!("uncontended dispatch reported busy"),
        }

        match session.dispatch(1, Command::RegisterBdv { magic: [0; 4] }) {
            DispatchOutcome::Processed(replies) => {
                assert_eq!(replies.len(), 2);
                assert_eq!(replies[0].0, 1);
                assert_eq!(replies[1].0, 2);
            }
            DispatchOutcome::Busy => panic!("uncontended dispatch reported busy"),
        }
    }

    #[test]
    fn register_wallet_while_online_scans_immediately_and_replies_with_no_sync_reply() {
        let dir = TempDir::new("bdv-session").unwrap();
        let refreshes: Arc<Mutex<Vec<(BdvId, RefreshId)>>> = Arc::new(Mutex::new(Vec::new()));

        struct CapturingRefresh(Arc<Mutex<Vec<(BdvId, RefreshId)>>>);
        impl RefreshSink for CapturingRefresh {
            fn notify_refresh(&self, bdv_id: &BdvId, refresh_id: RefreshId) {
                self.0.lock().unwrap().push((bdv_id.clone(), refresh_id));
            }
        }

        let services = test_services(&dir);
        let services = Arc::new(SharedServices {
            refresh: Arc::new(CapturingRefresh(refreshes.clone())),
            ..Arc::try_unwrap(services).unwrap_or_else(|_| panic!("services still shared"))
        });
        let bdv_id = BdvId([3u8; 10]);
        let session = Session::new(bdv_id.clone(), services);

        session.dispatch(1, Command::GoOnline);
        assert!(session.is_online());

        match session.dispatch(
            2,
            Command::RegisterWallet {
                wallet_id: WalletId(b"wallet".to_vec()),
                scr_addrs: vec![],
                is_new: true,
                registration_id: 7,
            },
        ) {
            DispatchOutcome::Processed(replies) => assert!(replies.is_empty()),
            DispatchOutcome::Busy => panic!("uncontended dispatch reported busy"),
        }

        assert_eq!(refreshes.lock().unwrap().as_slice(), &[(bdv_id, 7)]);
    }

    #[test]
    fn register_wallet_while_offline_defers_the_scan_to_go_online() {
        let dir = TempDir::new("bdv-session").unwrap();
        let refreshes: Arc<Mutex<Vec<(BdvId, RefreshId)>>> = Arc::new(Mutex::new(Vec::new()));

        struct CapturingRefresh(Arc<Mutex<Vec<(BdvId, RefreshId)>>>);
        impl RefreshSink for CapturingRefresh {
            fn notify_refresh(&self, bdv_id: &BdvId, refresh_id: RefreshId) {
                self.0.lock().unwrap().push((bdv_id.clone(), refresh_id));
            }
        }

        let services = test_services(&dir);
        let services = Arc::new(SharedServices {
            refresh: Arc::new(CapturingRefresh(refreshes.clone())),
            ..Arc::try_unwrap(services).unwrap_or_else(|_| panic!("services still shared"))
        });
        let bdv_id = BdvId([4u8; 10]);
        let session = Session::new(bdv_id.clone(), services);

        match session.dispatch(
            1,
            Command::RegisterWallet {
                wallet_id: WalletId(b"wallet".to_vec()),
                scr_addrs: vec![],
                is_new: true,
                registration_id: 9,
            },
        ) {
            DispatchOutcome::Processed(replies) => assert!(replies.is_empty()),
            DispatchOutcome::Busy => panic!("uncontended dispatch reported busy"),
        }
        assert!(refreshes.lock().unwrap().is_empty());

        session.dispatch(2, Command::GoOnline);
        assert_eq!(refreshes.lock().unwrap().as_slice(), &[(bdv_id, 9)]);
    }

    #[test]
    fn shutdown_rejects_a_wrong_cookie() {
        let dir = TempDir::new("bdv-session").unwrap();
        let services = test_services(&dir);
        let session = Session::new(BdvId([2u8; 10]), services);

        match session.dispatch(1, Command::Shutdown { cookie: b"wrong".to_vec() }) {
            DispatchOutcome::Processed(replies) => {
                assert!(replies[0].1.is_err());
            }
            DispatchOutcome::Busy => panic!("uncontended dispatch reported busy"),
        }
    }
}
