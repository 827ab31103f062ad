//! The ZC parser: the single writer that preprocesses, resolves, filters,
//! commits, and schedules notifications for every unconfirmed transaction
//! (spec §4.4).
//!
//! Every mutating step funnels through [`ZcParser::commit`], which is the
//! only place a new [`Pool`] is published — mirroring the teacher's
//! `zebra-state` finalized-state commit path, generalized from "apply one
//! block under `&mut self`" to "apply one resolved tx (or one purge) by
//! cloning, mutating, and publishing a new immutable [`Pool`]".

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;

use bdv_chain::transaction;
use bdv_chain::transparent::{Input, OutPoint};

use bdv_store::config::DbType;
use bdv_store::header_index::ReorganizationState;
use bdv_store::keys::{self, DbKey};
use bdv_store::records::{Spentness, StxoRecord, TxHints};
use bdv_store::scr_addr::ScrAddr;
use bdv_store::sled_format::TreeExt;
use bdv_store::KvStore;

use crate::error::Result;
use crate::parsed_tx::{InputResolution, ParsedTx, TxIoPair, TxState};
use crate::records::ZcTxRecord;
use crate::snapshot::{MempoolSnapshot, Pool};

/// What a [`ZcParser::commit`] produces for the notification dispatcher
/// (spec §4.4 "Notify", §4.7): the tx that landed, whatever it displaced,
/// and the scrAddrs any session should be told to refresh against.
pub struct CommitOutcome {
    pub committed: Arc<ParsedTx>,
    /// Every tx this commit displaced, still holding its own raw tx — what
    /// [`ZcParser::reschedule_evicted`] feeds back through preprocess and
    /// commit for potential re-entry (spec §4.4 "Collision/replacement").
    pub evicted: Vec<Arc<ParsedTx>>,
    pub scr_addrs_touched: Vec<ScrAddr>,
}

/// The result of purging the pool against a newly extended or reorganized
/// main chain (spec §4.4 "Block-based purge").
pub struct PurgePacket {
    /// Every tx this purge invalidated, still holding its own raw tx — what
    /// [`ZcParser::reschedule_evicted`] feeds back through preprocess and
    /// commit for potential re-entry (spec §4.4 "Block-based purge",
    /// Scenario S5).
    pub invalidated: Vec<Arc<ParsedTx>>,
    pub surviving_by_scr_addr: HashMap<ScrAddr, Vec<DbKey>>,
}

pub struct ZcParser {
    store: Arc<KvStore>,
    snapshot: Arc<MempoolSnapshot>,
    /// The scrAddrs any registered wallet currently watches; in Supernode
    /// mode every scrAddr is implicitly watched and this set is never
    /// consulted (spec §4.5 "Supernode").
    watched: ArcSwap<HashSet<ScrAddr>>,
    next_zc_id: AtomicU32,
    /// Serializes commits. The parser is architecturally single-writer
    /// already (spec §5, one FIFO action queue feeding one task); this
    /// mutex is the belt to that suspenders, so a future caller can't
    /// accidentally race two commits against the same snapshot.
    commit_lock: Mutex<()>,
}

impl ZcParser {
    pub fn new(store: Arc<KvStore>, snapshot: Arc<MempoolSnapshot>) -> ZcParser {
        ZcParser {
            store,
            snapshot,
            watched: ArcSwap::from_pointee(HashSet::new()),
            next_zc_id: AtomicU32::new(0),
            commit_lock: Mutex::new(()),
        }
    }

    pub fn set_watched(&self, watched: HashSet<ScrAddr>) {
        self.watched.store(Arc::new(watched));
    }

    pub fn snapshot(&self) -> &MempoolSnapshot {
        &self.snapshot
    }

    /// Step 1 (spec §4.4 "Preprocess"): assigns a ZC id, hashes the tx, and
    /// resolves every input against mined storage and the current pool.
    pub fn preprocess(&self, tx: Arc<transaction::Transaction>) -> Result<ParsedTx> {
        let zc_id = self.next_zc_id.fetch_add(1, Ordering::Relaxed);
        let mut parsed = ParsedTx::new(DbKey::mempool(zc_id), tx);
        let pool = self.snapshot.load();
        self.resolve(&mut parsed, &pool)?;
        Ok(parsed)
    }

    /// Steps 1-2 (spec §4.4 "Preprocess", "Finalize resolution"): re-derives
    /// every input's [`InputResolution`] and the overall [`TxState`] against
    /// `pool`. Safe to call repeatedly — e.g. once at preprocess time and
    /// again immediately before commit, since the pool may have moved on.
    fn resolve(&self, parsed: &mut ParsedTx, pool: &Pool) -> Result<()> {
        let mut resolutions = Vec::with_capacity(parsed.tx.inputs.len());
        let mut any_unresolved = false;
        let mut any_pending_parent = false;
        let mut any_chained_zc = false;
        let mut touched = Vec::new();

        for input in &parsed.tx.inputs {
            let outpoint = match input {
                Input::PrevOut { outpoint, .. } => *outpoint,
                Input::Coinbase { .. } => {
                    // A coinbase input can never appear in an unconfirmed
                    // tx; treat it as an immediate structural failure.
                    parsed.state = TxState::Invalid;
                    return Ok(());
                }
            };

            if let Some((tx_key, script)) = self.lookup_mined_output(outpoint)? {
                resolutions.push(InputResolution::Mined(tx_key));
                touched.push(ScrAddr::from_script(&script));
                continue;
            }

            if let Some(parent) = pool.txs.get(&outpoint.hash) {
                resolutions.push(InputResolution::Zc(parent.zc_key));
                any_chained_zc = true;
                if let Some(output) = parent.tx.outputs.get(outpoint.index as usize) {
                    touched.push(ScrAddr::from_script(&output.lock_script));
                }
                if !matches!(parent.state, TxState::Resolved | TxState::Mined) {
                    any_pending_parent = true;
                }
                continue;
            }

            resolutions.push(InputResolution::Unresolved);
            any_unresolved = true;
        }

        let mut output_txios = Vec::with_capacity(parsed.tx.outputs.len());
        for (out_index, output) in parsed.tx.outputs.iter().enumerate() {
            let scr_addr = ScrAddr::from_script(&output.lock_script);
            touched.push(scr_addr.clone());
            output_txios.push(TxIoPair {
                scr_addr,
                output_key: (parsed.zc_key, out_index as u16),
                value: output.value,
                spender_key: None,
                is_coinbase: false,
                is_rbf: parsed.is_rbf,
                is_chained_zc: any_chained_zc,
            });
        }
        touched.sort();
        touched.dedup();

        // Supernode mode tracks every scrAddr; Narrow mode only bothers
        // building notification-worthy data for addresses some registered
        // wallet actually watches (spec §4.4 "Filter", §4.5 "Supernode").
        if matches!(self.store.db_type()?, DbType::Narrow) {
            let watched = self.watched.load();
            touched.retain(|addr| watched.contains(addr));
            output_txios.retain(|txio| watched.contains(&txio.scr_addr));
        }

        parsed.input_resolution = resolutions;
        parsed.scr_addrs_touched = touched;
        parsed.output_txios = output_txios;
        parsed.is_chained_zc = any_chained_zc;
        parsed.state = if any_unresolved {
            TxState::Unresolved
        } else if any_pending_parent {
            TxState::ResolveAgain
        } else {
            TxState::Resolved
        };
        Ok(())
    }

    /// Looks an outpoint up against TXHINTS/STXO, the mined-UTXO path (spec
    /// §4.4, §6). Returns the owning tx's `DbKey` and output script when the
    /// outpoint is a currently-unspent mined output.
    fn lookup_mined_output(&self, outpoint: OutPoint) -> Result<Option<(DbKey, bdv_chain::transparent::Script)>> {
        let hints_key = keys::tx_hints_key(outpoint.hash.into());
        let hints: TxHints = self
            .store
            .txhints
            .zs_get_untyped(&hints_key)?
            .unwrap_or_default();

        for candidate in hints.candidates {
            if candidate.is_mempool() {
                continue;
            }
            let stxo_key = keys::stxo_key(candidate, outpoint.index as u16);
            if let Some(record) = self.store.stxo.zs_get_untyped::<StxoRecord>(&stxo_key)? {
                if matches!(record.spentness, Spentness::Unspent) {
                    return Ok(Some((candidate, record.script)));
                }
            }
        }
        Ok(None)
    }

    /// Steps 3-4 (spec §4.4 "Filter", "Commit"): finalizes `parsed` against
    /// the latest pool, detects and evicts a conflicting (double-spending)
    /// tx and its descendants, persists the tx to `ZERO_CONF`, and publishes
    /// the new pool. Returns `None` if `parsed` isn't ready to commit yet
    /// (still `Unresolved`/`ResolveAgain` against the latest pool) — the
    /// caller re-queues it rather than committing a half-resolved tx.
    pub fn commit(&self, mut parsed: ParsedTx) -> Result<Option<CommitOutcome>> {
        let _guard = self.commit_lock.lock().expect("commit lock poisoned");

        let current = self.snapshot.load();
        self.resolve(&mut parsed, &current)?;
        if !matches!(parsed.state, TxState::Resolved) {
            return Ok(None);
        }

        let conflict = current.conflicting_tx(&parsed.tx);
        let use_rebuild = self.snapshot.needs_full_rebuild();
        let mut pool = if use_rebuild {
            self.rebuild_from(&current)
        } else {
            current.clone_for_update()
        };

        let mut evicted = Vec::new();
        if let Some(conflict_hash) = conflict {
            if conflict_hash != parsed.hash {
                evicted = self.evict_with_descendants(&mut pool, conflict_hash);
            }
        }

        let committed = Arc::new(parsed);
        pool.insert(committed.clone());
        self.persist(&committed)?;

        self.snapshot.publish(pool, !use_rebuild);

        Ok(Some(CommitOutcome {
            scr_addrs_touched: committed.scr_addrs_touched.clone(),
            committed,
            evicted,
        }))
    }

    /// Resets each evicted/invalidated tx's resolution and re-runs it
    /// through preprocess and commit, so it can re-enter the pool if it
    /// still stands on its own (spec §4.4 "Collision/replacement",
    /// "Block-based purge", Scenario S5). Best-effort: a tx that no longer
    /// resolves cleanly (its spent parent is genuinely gone) is simply
    /// dropped, the same as any tx that fails preprocessing on first
    /// submission. Must be called after the [`Self::commit`]/
    /// [`Self::purge_for_new_block`] call that produced `evicted` has
    /// returned, since both already released `commit_lock` by then.
    pub fn reschedule_evicted(&self, evicted: Vec<Arc<ParsedTx>>) {
        for victim in evicted {
            match self.preprocess(victim.tx.clone()) {
                Ok(parsed) => {
                    if let Err(error) = self.commit(parsed) {
                        tracing::warn!(%error, hash = %victim.hash, "failed to recommit an evicted transaction");
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, hash = %victim.hash, "failed to re-preprocess an evicted transaction")
                }
            }
        }
    }

    /// A full rebuild re-derives the pool from the currently-published one
    /// rather than the mined UTXO set, since every tx it holds already
    /// passed resolution once; this bounds the `HashMap` churn a long run
    /// of incremental clones accrues without re-walking storage (spec §9
    /// design note).
    fn rebuild_from(&self, current: &Pool) -> Pool {
        let mut rebuilt = Pool::new();
        for tx in current.txs.values() {
            rebuilt.insert(tx.clone());
        }
        rebuilt
    }

    /// Removes `hash` and every tx in `pool` that (transitively) spends one
    /// of its outputs, resetting nothing itself — the caller must reset and
    /// re-schedule the returned txs via [`Self::reschedule_evicted`] (spec
    /// §4.4 "Collision/replacement").
    fn evict_with_descendants(&self, pool: &mut Pool, hash: transaction::Hash) -> Vec<Arc<ParsedTx>> {
        let mut evicted = Vec::new();
        let mut frontier = vec![hash];
        while let Some(victim) = frontier.pop() {
            if pool.txs.contains_key(&victim) {
                let children: Vec<transaction::Hash> = pool
                    .txs
                    .values()
                    .filter(|candidate| {
                        candidate.tx.inputs.iter().any(|input| match input {
                            Input::PrevOut { outpoint, .. } => outpoint.hash == victim,
                            Input::Coinbase { .. } => false,
                        })
                    })
                    .map(|candidate| candidate.hash)
                    .collect();
                if let Some(removed) = pool.remove(&victim) {
                    evicted.push(removed);
                }
                frontier.extend(children);
            }
        }
        evicted
    }

    fn persist(&self, parsed: &ParsedTx) -> Result<()> {
        let tx_key = keys::zc_tx_key(parsed.zc_key);
        self.store
            .zero_conf
            .zs_insert(&tx_key, &ZcTxRecord::from_tx(&parsed.tx))?;

        for (out_index, output) in parsed.tx.outputs.iter().enumerate() {
            let out_key = keys::zc_output_key(parsed.zc_key, out_index as u16);
            let record = StxoRecord {
                value: output.value,
                script: output.lock_script.clone(),
                spentness: Spentness::Unspent,
            };
            self.store.zero_conf.zs_insert(&out_key, &record)?;
        }
        Ok(())
    }

    /// Step 5 removal path (spec §4.4 "Block-based purge"): a newly admitted
    /// main-chain block mines some previously-unconfirmed outpoints, and —
    /// if the previous main-chain tip turned out to be on a now-orphaned
    /// branch — some previously-mined transactions are un-mined. Both
    /// invalidate any pool tx (and its descendants) that spent something
    /// which no longer has the spendable shape the tx was built against.
    pub fn purge_for_new_block(
        &self,
        reorg: &ReorganizationState,
        newly_mined_outpoints: &HashSet<OutPoint>,
        reorged_out_tx_hashes: &HashSet<transaction::Hash>,
    ) -> PurgePacket {
        let _guard = self.commit_lock.lock().expect("commit lock poisoned");
        let mut pool = self.snapshot.load().clone_for_update();

        let to_purge: Vec<transaction::Hash> = pool
            .txs
            .values()
            .filter(|tx| {
                tx.tx.inputs.iter().any(|input| match input {
                    Input::PrevOut { outpoint, .. } => {
                        newly_mined_outpoints.contains(outpoint)
                            || (!reorg.prev_top_still_valid && reorged_out_tx_hashes.contains(&outpoint.hash))
                    }
                    Input::Coinbase { .. } => false,
                })
            })
            .map(|tx| tx.hash)
            .collect();

        // Each root is only evicted once — `evict_with_descendants` checks
        // `pool.txs.contains_key` before removing, so a tx already swept up
        // as another root's descendant is simply skipped when its own turn
        // comes, no separate dedup pass needed.
        let mut invalidated = Vec::new();
        for hash in to_purge {
            invalidated.extend(self.evict_with_descendants(&mut pool, hash));
        }

        let mut surviving_by_scr_addr: HashMap<ScrAddr, Vec<DbKey>> = HashMap::new();
        for tx in pool.txs.values() {
            for scr_addr in &tx.scr_addrs_touched {
                surviving_by_scr_addr
                    .entry(scr_addr.clone())
                    .or_default()
                    .push(tx.zc_key);
            }
        }

        self.snapshot.publish(pool, true);

        PurgePacket {
            invalidated,
            surviving_by_scr_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdv_chain::amount::Amount;
    use bdv_chain::transaction::{LockTime, Transaction};
    use bdv_chain::transparent::{Output, Script};
    use bdv_store::config::Config;
    use tempdir::TempDir;

    fn store() -> (TempDir, Arc<KvStore>) {
        let dir = TempDir::new("bdv-mempool-parser").unwrap();
        let config = Config {
            db_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let store = Arc::new(KvStore::open(&config).unwrap());
        (dir, store)
    }

    /// Marks `tx`'s output `index` as an unspent mined UTXO at `tx_key`, the
    /// way [`bdv_store::builder::DatabaseBuilder`] would after scanning the
    /// block that mined it.
    fn mark_mined(store: &KvStore, tx: &Transaction, index: u16, tx_key: DbKey) {
        let hints_key = keys::tx_hints_key(tx.hash().into());
        store
            .txhints
            .zs_insert(&hints_key, &TxHints { candidates: vec![tx_key] })
            .unwrap();
        let stxo_key = keys::stxo_key(tx_key, index);
        let output = &tx.outputs[index as usize];
        store
            .stxo
            .zs_insert(
                &stxo_key,
                &StxoRecord {
                    value: output.value,
                    script: output.lock_script.clone(),
                    spentness: Spentness::Unspent,
                },
            )
            .unwrap();
    }

    fn root_tx() -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::Coinbase {
                height: None,
                data: bdv_chain::transparent::CoinbaseData(vec![0]),
                sequence: 0,
            }],
            vec![Output {
                value: Amount::try_from(1000).unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            LockTime::Height(bdv_chain::block::Height(0)),
        ))
    }

    fn spend(parent_hash: transaction::Hash, value: i64) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: parent_hash,
                    index: 0,
                },
                unlock_script: Script(vec![]),
                sequence: 0,
            }],
            vec![Output {
                value: Amount::try_from(value).unwrap(),
                lock_script: Script(vec![0x51]),
            }],
            LockTime::Height(bdv_chain::block::Height(0)),
        ))
    }

    #[test]
    fn commits_a_fully_resolved_chained_pair_and_evicts_a_double_spend() {
        let (_dir, store) = store();
        let root = root_tx();
        mark_mined(&store, &root, 0, DbKey::mined(bdv_chain::block::Height(1), 0, 0));

        let snapshot = Arc::new(MempoolSnapshot::new());
        let parser = ZcParser::new(store, snapshot);

        let parent = spend(root.hash(), 900);
        let parent_hash = parent.hash();

        let parsed_parent = parser.preprocess(parent).unwrap();
        assert_eq!(parsed_parent.state, TxState::Resolved);
        let outcome = parser.commit(parsed_parent).unwrap().expect("commit accepted");
        assert_eq!(outcome.committed.hash, parent_hash);

        let child_a = spend(parent_hash, 800);
        let parsed_a = parser.preprocess(child_a).unwrap();
        assert_eq!(parsed_a.state, TxState::Resolved);
        let outcome_a = parser.commit(parsed_a).unwrap().expect("commit accepted");
        assert!(outcome_a.evicted.is_empty());

        let child_b = spend(parent_hash, 700);
        let child_b_hash = child_b.hash();
        let parsed_b = parser.preprocess(child_b).unwrap();
        let outcome_b = parser.commit(parsed_b).unwrap().expect("commit accepted");
        assert_eq!(outcome_b.evicted.len(), 1);
        assert_eq!(outcome_b.evicted[0].hash, outcome_a.committed.hash);

        let pool = parser.snapshot().load();
        assert!(pool.txs.contains_key(&child_b_hash));
        assert!(!pool.txs.contains_key(&outcome_a.committed.hash));
    }

    /// A descendant invalidated by a block purge has its resolution reset
    /// and is re-submitted through preprocess/commit rather than being
    /// dropped outright (spec §4.4 "Block-based purge", Scenario S5).
    #[test]
    fn purge_invalidated_descendants_are_reset_and_can_re_enter() {
        let (_dir, store) = store();
        let root = root_tx();
        let root_key = DbKey::mined(bdv_chain::block::Height(1), 0, 0);
        mark_mined(&store, &root, 0, root_key);

        let snapshot = Arc::new(MempoolSnapshot::new());
        let parser = ZcParser::new(store, snapshot);

        let parent = spend(root.hash(), 900);
        let parent_hash = parent.hash();
        let parsed_parent = parser.preprocess(parent).unwrap();
        let outcome_parent = parser.commit(parsed_parent).unwrap().expect("commit accepted");
        assert!(outcome_parent.evicted.is_empty());

        let child = spend(parent_hash, 800);
        let parsed_child = parser.preprocess(child).unwrap();
        let outcome_child = parser.commit(parsed_child).unwrap().expect("commit accepted");
        assert!(outcome_child.evicted.is_empty());

        // Simulate `parent`'s own spend of `root:0` having just been mined
        // in a block, which invalidates it (and, transitively, `child`).
        let reorg = ReorganizationState {
            prev_top_still_valid: true,
            branch_point: bdv_chain::block::Height(0),
            new_top: 0,
        };
        let mut newly_mined = HashSet::new();
        newly_mined.insert(OutPoint {
            hash: root.hash(),
            index: 0,
        });
        let purge = parser.purge_for_new_block(&reorg, &newly_mined, &HashSet::new());
        assert_eq!(purge.invalidated.len(), 2);

        let pool = parser.snapshot().load();
        assert!(!pool.txs.contains_key(&parent_hash));
        assert!(!pool.txs.contains_key(&outcome_child.committed.hash));

        parser.reschedule_evicted(purge.invalidated);

        // `root:0`'s STXO record was never actually marked spent by the
        // purge, so both `parent` and `child` resolve cleanly again and
        // re-enter the pool under fresh zc keys.
        let pool = parser.snapshot().load();
        assert!(pool.txs.contains_key(&parent_hash));
        assert!(pool.txs.contains_key(&outcome_child.committed.hash));
    }
}
