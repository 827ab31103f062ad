//! The mempool snapshot: a read-mostly, lock-free view of every currently
//! tracked unconfirmed transaction (spec §4.4, §5).
//!
//! Every other thread in the process (session workers answering balance and
//! UTXO queries, the watcher-inv thread, the notification dispatcher) reads
//! through [`MempoolSnapshot::load`], which is a single atomic pointer load
//! and an `Arc` clone — no lock is ever held across a read. The parser
//! thread is the pool's single writer (spec §5 "ZC parser thread"); this is
//! the one seam of this crate the teacher's `zebra-state` doesn't already
//! have a pattern for (its finalized state mutates in place behind `&mut
//! self`, never read concurrently with a writer), so the swap itself is
//! grounded on the standard `arc-swap` crate instead, used the way
//! `zebra-state`'s [`crate::...pending_utxos`]-style broadcast fan-out
//! pattern is used elsewhere in this lineage: publish a new immutable value,
//! let every reader pick it up independently.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use bdv_chain::transaction;
use bdv_chain::transparent::OutPoint;

use bdv_store::keys::DbKey;
use bdv_store::scr_addr::ScrAddr;

use crate::parsed_tx::{ParsedTx, TxioKey};

/// Above this many incremental clone-and-mutate commits since the last full
/// rebuild, the parser performs a full rebuild instead of cloning again,
/// bounding how large the pool's own "copy-on-write churn" can grow
/// (grounded on `cppForSwig/ZeroConf.h`'s `POOL_MERGE_THRESHOLD`, spec §9).
pub const POOL_MERGE_THRESHOLD: u32 = 10_000;

/// One immutable snapshot of the pool's contents.
#[derive(Clone, Default)]
pub struct Pool {
    pub txs: HashMap<transaction::Hash, Arc<ParsedTx>>,
    /// Every outpoint currently spent by some tracked tx, so a newly parsed
    /// tx can detect a double-spend against the pool in O(1) (spec §4.4
    /// "Collision/replacement").
    pub spent_by: HashMap<OutPoint, transaction::Hash>,
    /// Every TxIO key a scrAddr currently has in the pool, unconfirmed
    /// spends and receives alike (spec §3 "TxIO pair"). Denormalized from
    /// `txios` for O(1) per-address lookup; [`Pool::recompute_scr_addr_txios`]
    /// re-derives it from scratch for consistency checks.
    pub scr_addr_txios: HashMap<ScrAddr, HashSet<TxioKey>>,
    /// Every tracked tx's own outputs, by output index, as `TxIoPair`s
    /// (spec §3). A tx's entry here is the authority for whether one of its
    /// outputs has since been spent by another pool tx.
    pub txios: HashMap<DbKey, HashMap<u16, crate::parsed_tx::TxIoPair>>,
}

impl Pool {
    pub fn new() -> Pool {
        Pool::default()
    }

    /// A working copy to mutate and later publish, the common "incremental"
    /// path (spec §4.4).
    pub fn clone_for_update(&self) -> Pool {
        self.clone()
    }

    pub fn insert(&mut self, parsed: Arc<ParsedTx>) {
        for (input, resolution) in parsed.tx.inputs.iter().zip(parsed.input_resolution.iter()) {
            if let bdv_chain::transparent::Input::PrevOut { outpoint, .. } = input {
                self.spent_by.insert(*outpoint, parsed.hash);
                if let crate::parsed_tx::InputResolution::Zc(parent_key) = resolution {
                    if let Some(outputs) = self.txios.get_mut(parent_key) {
                        if let Some(txio) = outputs.get_mut(&(outpoint.index as u16)) {
                            txio.spender_key = Some(parsed.zc_key);
                        }
                    }
                }
            }
        }

        for txio in &parsed.output_txios {
            self.scr_addr_txios
                .entry(txio.scr_addr.clone())
                .or_default()
                .insert(txio.output_key);
            self.txios
                .entry(parsed.zc_key)
                .or_default()
                .insert(txio.output_key.1, txio.clone());
        }

        self.txs.insert(parsed.hash, parsed);
    }

    /// Removes a tx and its spent-outpoint entries. Callers handling a
    /// conflict or a block-purge walk `spent_by` first to find descendants
    /// before calling this (spec §4.4 "Collision/replacement", "Block-based
    /// purge").
    pub fn remove(&mut self, hash: &transaction::Hash) -> Option<Arc<ParsedTx>> {
        let removed = self.txs.remove(hash)?;
        for (input, resolution) in removed.tx.inputs.iter().zip(removed.input_resolution.iter()) {
            if let bdv_chain::transparent::Input::PrevOut { outpoint, .. } = input {
                if self.spent_by.get(outpoint) == Some(hash) {
                    self.spent_by.remove(outpoint);
                }
                if let crate::parsed_tx::InputResolution::Zc(parent_key) = resolution {
                    if let Some(outputs) = self.txios.get_mut(parent_key) {
                        if let Some(txio) = outputs.get_mut(&(outpoint.index as u16)) {
                            if txio.spender_key == Some(removed.zc_key) {
                                txio.spender_key = None;
                            }
                        }
                    }
                }
            }
        }

        if let Some(outputs) = self.txios.remove(&removed.zc_key) {
            for (index, txio) in outputs {
                if let Some(keys) = self.scr_addr_txios.get_mut(&txio.scr_addr) {
                    keys.remove(&(removed.zc_key, index));
                    if keys.is_empty() {
                        self.scr_addr_txios.remove(&txio.scr_addr);
                    }
                }
            }
        }

        Some(removed)
    }

    pub fn conflicting_tx(&self, tx: &bdv_chain::transaction::Transaction) -> Option<transaction::Hash> {
        tx.inputs.iter().find_map(|input| match input {
            bdv_chain::transparent::Input::PrevOut { outpoint, .. } => {
                self.spent_by.get(outpoint).copied()
            }
            bdv_chain::transparent::Input::Coinbase { .. } => None,
        })
    }

    /// Re-derives the scrAddr→txio-key index from `txios` alone, for
    /// verifying the two never drift apart (spec §9 Testable Property 1).
    pub fn recompute_scr_addr_txios(&self) -> HashMap<ScrAddr, HashSet<TxioKey>> {
        let mut recomputed: HashMap<ScrAddr, HashSet<TxioKey>> = HashMap::new();
        for (zc_key, outputs) in &self.txios {
            for (index, txio) in outputs {
                recomputed
                    .entry(txio.scr_addr.clone())
                    .or_default()
                    .insert((*zc_key, *index));
            }
        }
        recomputed
    }
}

/// The pool's single published copy, swapped atomically by the parser
/// thread and read without locking by everyone else.
pub struct MempoolSnapshot {
    inner: ArcSwap<Pool>,
    merges_since_rebuild: AtomicU32,
}

impl Default for MempoolSnapshot {
    fn default() -> Self {
        MempoolSnapshot::new()
    }
}

impl MempoolSnapshot {
    pub fn new() -> MempoolSnapshot {
        MempoolSnapshot {
            inner: ArcSwap::from_pointee(Pool::new()),
            merges_since_rebuild: AtomicU32::new(0),
        }
    }

    /// The current snapshot. Cheap: one atomic load plus an `Arc` clone.
    pub fn load(&self) -> Arc<Pool> {
        self.inner.load_full()
    }

    /// Whether the parser's next commit should rebuild `next` from scratch
    /// (re-deriving it from the DB-confirmed UTXO set plus every still-valid
    /// tracked tx) rather than clone-and-mutate the current pool.
    pub fn needs_full_rebuild(&self) -> bool {
        self.merges_since_rebuild.load(Ordering::Relaxed) >= POOL_MERGE_THRESHOLD
    }

    /// Publishes `next` as the pool's new contents. `was_incremental` must
    /// reflect how `next` was built: `true` for a clone-and-mutate of the
    /// previous pool (the common case, which bumps the merge counter
    /// toward [`POOL_MERGE_THRESHOLD`]), `false` for a full rebuild (which
    /// resets it).
    pub fn publish(&self, next: Pool, was_incremental: bool) {
        if was_incremental {
            self.merges_since_rebuild.fetch_add(1, Ordering::Relaxed);
        } else {
            self.merges_since_rebuild.store(0, Ordering::Relaxed);
        }
        self.inner.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdv_chain::transaction::{LockTime, Transaction};
    use bdv_chain::transparent::{Input, Output, Script};
    use bdv_store::keys::DbKey;

    fn spending_tx(outpoint: OutPoint) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint,
                unlock_script: Script(vec![]),
                sequence: 0,
            }],
            vec![Output {
                value: bdv_chain::amount::Amount::try_from(1000).unwrap(),
                lock_script: Script(vec![]),
            }],
            LockTime::Height(bdv_chain::block::Height(0)),
        ))
    }

    #[test]
    fn insert_then_conflicting_tx_detects_the_double_spend() {
        let snapshot = MempoolSnapshot::new();
        let outpoint = OutPoint {
            hash: transaction::Hash([1u8; 32]),
            index: 0,
        };
        let tx = spending_tx(outpoint);
        let parsed = Arc::new(ParsedTx::new(DbKey::mempool(1), tx.clone()));

        let mut pool = snapshot.load().clone_for_update();
        pool.insert(parsed.clone());
        snapshot.publish(pool, true);

        let pool = snapshot.load();
        let conflicting = spending_tx(outpoint);
        assert_eq!(pool.conflicting_tx(&conflicting), Some(tx.hash()));
    }

    #[test]
    fn remove_clears_the_spent_by_entry() {
        let snapshot = MempoolSnapshot::new();
        let outpoint = OutPoint {
            hash: transaction::Hash([2u8; 32]),
            index: 0,
        };
        let tx = spending_tx(outpoint);
        let hash = tx.hash();
        let parsed = Arc::new(ParsedTx::new(DbKey::mempool(1), tx));

        let mut pool = snapshot.load().clone_for_update();
        pool.insert(parsed);
        snapshot.publish(pool, true);

        let mut pool = snapshot.load().clone_for_update();
        pool.remove(&hash);
        snapshot.publish(pool, true);

        assert!(snapshot.load().spent_by.get(&outpoint).is_none());
    }

    fn txio(scr_addr: ScrAddr, output_key: TxioKey, value: i64) -> crate::parsed_tx::TxIoPair {
        crate::parsed_tx::TxIoPair {
            scr_addr,
            output_key,
            value: bdv_chain::amount::Amount::try_from(value).unwrap(),
            spender_key: None,
            is_coinbase: false,
            is_rbf: false,
            is_chained_zc: false,
        }
    }

    fn receiving_tx(seed: u8) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::Coinbase {
                height: None,
                data: bdv_chain::transparent::CoinbaseData(vec![seed]),
                sequence: 0,
            }],
            vec![Output {
                value: bdv_chain::amount::Amount::try_from(1000).unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            LockTime::Height(bdv_chain::block::Height(0)),
        ))
    }

    #[test]
    fn insert_populates_the_scr_addr_and_txio_indexes() {
        let parent_key = DbKey::mempool(1);
        let scr_addr = ScrAddr(vec![0x51]);
        let mut parent = ParsedTx::new(parent_key, receiving_tx(1));
        parent.output_txios = vec![txio(scr_addr.clone(), (parent_key, 0), 1000)];

        let mut pool = Pool::new();
        pool.insert(Arc::new(parent));

        assert_eq!(
            pool.scr_addr_txios.get(&scr_addr),
            Some(&HashSet::from([(parent_key, 0)]))
        );
        assert_eq!(pool.recompute_scr_addr_txios(), pool.scr_addr_txios);
        assert!(pool.txios[&parent_key][&0].is_utxo());
    }

    #[test]
    fn spending_a_pool_output_marks_its_txio_pair_spent_then_remove_clears_it() {
        let parent_key = DbKey::mempool(1);
        let parent_tx = receiving_tx(2);
        let parent_hash = parent_tx.hash();
        let scr_addr = ScrAddr(vec![0x52]);
        let mut parent = ParsedTx::new(parent_key, parent_tx);
        parent.output_txios = vec![txio(scr_addr, (parent_key, 0), 1000)];

        let child_key = DbKey::mempool(2);
        let child_tx = spending_tx(OutPoint { hash: parent_hash, index: 0 });
        let child_hash = child_tx.hash();
        let mut child = ParsedTx::new(child_key, child_tx);
        child.input_resolution = vec![crate::parsed_tx::InputResolution::Zc(parent_key)];

        let mut pool = Pool::new();
        pool.insert(Arc::new(parent));
        pool.insert(Arc::new(child));

        assert_eq!(pool.txios[&parent_key][&0].spender_key, Some(child_key));
        assert!(!pool.txios[&parent_key][&0].is_utxo());
        assert_eq!(pool.recompute_scr_addr_txios(), pool.scr_addr_txios);

        pool.remove(&child_hash);
        assert_eq!(pool.txios[&parent_key][&0].spender_key, None);
    }
}
