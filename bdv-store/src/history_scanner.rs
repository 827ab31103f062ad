//! The script-history scanner (spec §4.5): applies a range of blocks to the
//! per-address SSH/Sub-SSH tables, in either Narrow (only registered
//! scrAddrs are tracked) or Supernode (every scrAddr is tracked) mode, and
//! undoes a range on reorg.
//!
//! Grounded on `zebra-state`'s finalized-block-commit path (walk a block's
//! transactions, update per-output/per-input indexes, persist via the
//! store's own transactional `insert` calls) generalized from a single
//! UTXO set to BDV's per-scrAddr Sub-SSH buckets.

use std::collections::HashSet;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};

use bdv_chain::{block, transaction, transparent};

use crate::config::DbType;
use crate::db::KvStore;
use crate::error::{Error, Result};
use crate::keys::{self, DbKey, HeightX};
use crate::records::{
    FilterPool, SshRecord, StxoRecord, SubSshMetaRecord, SubSshRecord, TxHints, TxioEntry,
};
use crate::scr_addr::ScrAddr;
use crate::sled_format::TreeExt;

/// One block to apply or undo, paired with the branch disambiguator a
/// reorg-aware scan needs (spec §3, §4.5).
pub struct ScanBlock {
    pub height: block::Height,
    pub dup_id: u8,
    pub block: Arc<block::Block>,
}

/// Applies and undoes block ranges against the SSH/Sub-SSH tables (spec
/// §4.5). `watched` is ignored entirely in [`DbType::Supernode`] mode,
/// where every scrAddr is tracked.
pub struct HistoryScanner<'a> {
    store: &'a KvStore,
    db_type: DbType,
}

impl<'a> HistoryScanner<'a> {
    pub fn new(store: &'a KvStore, db_type: DbType) -> Self {
        HistoryScanner { store, db_type }
    }

    /// Applies every block in `blocks` (expected in ascending height order)
    /// to the Sub-SSH tables, then brings the SSH aggregates up to date and
    /// records the new top-scanned hash (spec §4.5 "Post-scan").
    ///
    /// `watched` is the union of scrAddrs registered across every BDV
    /// session (spec §4.4 "Filter"); in [`DbType::Supernode`] mode it is
    /// unused.
    pub fn scan_range(&self, blocks: &[ScanBlock], watched: &HashSet<ScrAddr>) -> Result<()> {
        for scan_block in blocks {
            self.scan_block(scan_block, watched)?;
        }

        if let Some(last) = blocks.last() {
            let mut info = self.store.db_info()?;
            info.top_block_height = last.height;
            info.top_scanned_hash = Some(block::Hash::from(last.block.as_ref()));
            self.store.set_db_info(&info)?;
        }
        Ok(())
    }

    fn scan_block(&self, scan_block: &ScanBlock, watched: &HashSet<ScrAddr>) -> Result<()> {
        let height_x = HeightX::new(scan_block.height, scan_block.dup_id);
        let mut touched: HashSet<Vec<u8>> = HashSet::new();

        for (tx_index, tx) in scan_block.block.transactions.iter().enumerate() {
            let tx_key = DbKey::mined(scan_block.height, scan_block.dup_id, tx_index as u16);
            self.commit_tx_hint(tx.hash(), tx_key)?;

            for input in &tx.inputs {
                if let transparent::Input::PrevOut { outpoint, .. } = input {
                    self.apply_spend(*outpoint, tx_key, watched, &mut touched)?;
                }
            }

            for (out_index, output) in tx.outputs.iter().enumerate() {
                self.apply_output(
                    tx_key,
                    out_index as u16,
                    output,
                    height_x,
                    watched,
                    &mut touched,
                )?;
            }
        }

        if !touched.is_empty() {
            let key = height_x.to_bytes();
            let mut meta = self
                .store
                .subssh_meta
                .zs_get_untyped::<SubSshMetaRecord>(&key)?
                .unwrap_or_default();
            for scr_addr in touched {
                if !meta.scr_addrs.contains(&scr_addr) {
                    meta.scr_addrs.push(scr_addr);
                }
            }
            self.store.subssh_meta.zs_insert(&key, &meta)?;
        }

        Ok(())
    }

    fn commit_tx_hint(&self, hash: transaction::Hash, tx_key: DbKey) -> Result<()> {
        let key = keys::tx_hints_key(hash.into());
        let mut hints = self
            .store
            .txhints
            .zs_get_untyped::<TxHints>(&key)?
            .unwrap_or_default();
        if !hints.candidates.contains(&tx_key) {
            hints.candidates.push(tx_key);
        }
        self.store.txhints.zs_insert(&key, &hints)?;
        Ok(())
    }

    fn is_watched(&self, scr_addr: &ScrAddr, watched: &HashSet<ScrAddr>) -> bool {
        matches!(self.db_type, DbType::Supernode) || watched.contains(scr_addr)
    }

    /// Writes a Sub-SSH entry and, if this output is ever to be resolvable
    /// as a future input's spend target, a narrow-mode STXO record for it.
    /// Per-output STXO rows are otherwise only written in full in
    /// [`DbType::Supernode`] mode by the database builder; Narrow mode
    /// writes one lazily here, scoped to watched scrAddrs, so its own
    /// future spend lookups succeed without paying for output records on
    /// addresses nobody registered.
    fn apply_output(
        &self,
        tx_key: DbKey,
        out_index: u16,
        output: &transparent::Output,
        height_x: HeightX,
        watched: &HashSet<ScrAddr>,
        touched: &mut HashSet<Vec<u8>>,
    ) -> Result<()> {
        let scr_addr = ScrAddr::from_script(&output.lock_script);
        if !self.is_watched(&scr_addr, watched) {
            return Ok(());
        }

        self.upsert_sub_ssh(
            &scr_addr,
            height_x,
            TxioEntry {
                tx_key,
                out_index,
                value: output.value,
                is_spend: false,
            },
        )?;
        self.bump_ssh_received(&scr_addr, output.value)?;
        touched.insert(scr_addr.0.clone());

        let stxo_key = keys::stxo_key(tx_key, out_index);
        self.store.stxo.zs_insert(
            &stxo_key,
            &StxoRecord {
                value: output.value,
                script: output.lock_script.clone(),
                spentness: crate::records::Spentness::Unspent,
            },
        )?;
        Ok(())
    }

    /// Resolves a spent outpoint via TXHINTS→STXO, writes the spend's
    /// Sub-SSH entry (if the output belongs to a tracked scrAddr), and
    /// marks the STXO/SPENTNESS record spent (spec §4.5 "for each input,
    /// resolve the referenced STXO via TXHINTS+STXO").
    fn apply_spend(
        &self,
        outpoint: transparent::OutPoint,
        spender_key: DbKey,
        watched: &HashSet<ScrAddr>,
        touched: &mut HashSet<Vec<u8>>,
    ) -> Result<()> {
        let prefix = outpoint.hash.into();
        let hints = self.store.txhints.zs_get_untyped::<TxHints>(&keys::tx_hints_key(prefix))?;
        let hints = match hints {
            Some(h) => h,
            None => return Ok(()),
        };

        for candidate in hints.candidates {
            let stxo_key = keys::stxo_key(candidate, outpoint.index as u16);
            let record = self.store.stxo.zs_get_untyped::<StxoRecord>(&stxo_key)?;
            let mut record = match record {
                Some(r) => r,
                None => continue,
            };

            let scr_addr = ScrAddr::from_script(&record.script);
            if self.is_watched(&scr_addr, watched) {
                let height_x = candidate
                    .height_x()
                    .ok_or_else(|| Error::Corrupt(stxo_key.to_vec()))?;
                self.upsert_sub_ssh(
                    &scr_addr,
                    height_x,
                    TxioEntry {
                        tx_key: candidate,
                        out_index: outpoint.index as u16,
                        value: record.value,
                        is_spend: true,
                    },
                )?;
                touched.insert(scr_addr.0.clone());
            }

            record.spentness = crate::records::Spentness::Spent { spender: spender_key };
            self.store.stxo.zs_insert(&stxo_key, &record)?;

            if matches!(self.db_type, DbType::Supernode) {
                if let Some(height_x) = candidate.height_x() {
                    let spentness_key =
                        keys::spentness_key(height_x, tx_index_of(candidate), outpoint.index as u16);
                    self.store.spentness.zs_insert(
                        &spentness_key,
                        &crate::records::SpentnessRecord {
                            spentness: crate::records::Spentness::Spent { spender: spender_key },
                        },
                    )?;
                }
            }
            return Ok(());
        }
        Ok(())
    }

    fn upsert_sub_ssh(&self, scr_addr: &ScrAddr, height_x: HeightX, entry: TxioEntry) -> Result<()> {
        let key = keys::sub_ssh_key(scr_addr.as_bytes(), height_x);
        let mut record = self
            .store
            .subssh
            .zs_get_untyped::<SubSshRecord>(&key)?
            .unwrap_or_default();
        record.entries.retain(|e| !(e.tx_key == entry.tx_key && e.out_index == entry.out_index));
        record.entries.push(entry);
        self.store.subssh.zs_insert(&key, &record)?;
        Ok(())
    }

    fn bump_ssh_received(&self, scr_addr: &ScrAddr, value: bdv_chain::amount::Amount<bdv_chain::amount::NonNegative>) -> Result<()> {
        let key = keys::ssh_key(scr_addr.as_bytes());
        let mut record = self.store.ssh.zs_get_untyped::<SshRecord>(&key)?.unwrap_or_default();
        record.txio_count += 1;
        record.total_unspent += value.i64();
        self.store.ssh.zs_insert(&key, &record)?;
        Ok(())
    }

    /// Rolls back every Sub-SSH bucket touched in `(branch_point, prev_top]`
    /// (spec §4.5 `undo`): for each affected scrAddr, removes the
    /// height's Sub-SSH entries, reverses their effect on the SSH
    /// aggregate, and restores the STXO spentness of whatever they spent.
    pub fn undo(&self, branch_point: block::Height, prev_top: block::Height, dup_id_at: impl Fn(block::Height) -> u8) -> Result<()> {
        let mut height = prev_top;
        while height.0 > branch_point.0 {
            let dup_id = dup_id_at(height);
            let height_x = HeightX::new(height, dup_id);
            self.undo_height(height_x)?;
            if height.0 == 0 {
                break;
            }
            height = block::Height(height.0 - 1);
        }

        let mut info = self.store.db_info()?;
        info.top_block_height = branch_point;
        self.store.set_db_info(&info)?;
        Ok(())
    }

    fn undo_height(&self, height_x: HeightX) -> Result<()> {
        let meta_key = height_x.to_bytes();
        let meta = self
            .store
            .subssh_meta
            .zs_get_untyped::<SubSshMetaRecord>(&meta_key)?;
        let meta = match meta {
            Some(m) => m,
            None => return Ok(()),
        };

        for scr_addr_bytes in &meta.scr_addrs {
            let key = keys::sub_ssh_key(scr_addr_bytes, height_x);
            if let Some(record) = self.store.subssh.zs_get_untyped::<SubSshRecord>(&key)? {
                let ssh_key = keys::ssh_key(scr_addr_bytes);
                let mut ssh = self.store.ssh.zs_get_untyped::<SshRecord>(&ssh_key)?.unwrap_or_default();

                for entry in &record.entries {
                    ssh.txio_count = ssh.txio_count.saturating_sub(1);
                    if entry.is_spend {
                        ssh.total_unspent += entry.value.i64();
                        let stxo_key = keys::stxo_key(entry.tx_key, entry.out_index);
                        if let Some(mut stxo) = self.store.stxo.zs_get_untyped::<StxoRecord>(&stxo_key)? {
                            stxo.spentness = crate::records::Spentness::Unspent;
                            self.store.stxo.zs_insert(&stxo_key, &stxo)?;
                        }
                    } else {
                        ssh.total_unspent -= entry.value.i64();
                    }
                }
                self.store.ssh.zs_insert(&ssh_key, &ssh)?;
            }
            self.store.subssh.remove(&key)?;
        }
        self.store.subssh_meta.remove(&meta_key)?;
        Ok(())
    }

    /// The always-recomputed-never-persisted UTXO flag (spec §3, §4.5,
    /// §8 invariant 3): true iff no spentness record exists for this
    /// output at read time.
    pub fn is_utxo(&self, tx_key: DbKey, out_index: u16) -> Result<bool> {
        let stxo_key = keys::stxo_key(tx_key, out_index);
        match self.store.stxo.zs_get_untyped::<StxoRecord>(&stxo_key)? {
            Some(record) => Ok(matches!(record.spentness, crate::records::Spentness::Unspent)),
            None => Ok(true),
        }
    }

    /// Rebuilds a per-file transaction-hash filter pool (spec §4.3 step 5,
    /// §6): used both by the initial build and by the bounded repair loop
    /// on a scan-verification mismatch or filter-integrity check failure.
    pub fn rebuild_filter_pool(&self, file_num: u32, tx_hashes: &[transaction::Hash]) -> Result<()> {
        let mut bytes = Vec::with_capacity(4 + tx_hashes.len() * 4);
        let mut count_buf = [0u8; 4];
        BigEndian::write_u32(&mut count_buf, tx_hashes.len() as u32);
        bytes.extend_from_slice(&count_buf);
        for hash in tx_hashes {
            let prefix: transaction::HashPrefix = (*hash).into();
            bytes.extend_from_slice(&prefix.0);
        }
        let key = keys::filter_pool_key(file_num);
        self.store.txfilters.zs_insert(&key, &FilterPool { bytes })?;
        Ok(())
    }
}

fn tx_index_of(key: DbKey) -> u16 {
    match key {
        DbKey::Mined { tx_index, .. } => tx_index,
        DbKey::Mempool { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdv_chain::block::merkle;
    use bdv_chain::transaction::{LockTime, Transaction};
    use bdv_chain::transparent::{CoinbaseData, Input, Output, Script};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempdir::TempDir;

    fn test_store() -> (TempDir, KvStore) {
        let dir = TempDir::new("bdv-history-scanner").unwrap();
        let config = crate::config::Config {
            db_dir: dir.path().to_path_buf(),
            ..crate::config::Config::default()
        };
        let store = KvStore::open(&config).unwrap();
        (dir, store)
    }

    fn p2pkh_script(tag: u8) -> Script {
        let mut v = vec![0x76, 0xa9, 0x14];
        v.extend(std::iter::repeat(tag).take(20));
        v.push(0x88);
        v.push(0xac);
        Script(v)
    }

    fn header(prev: block::Hash) -> block::Header {
        block::Header::new(
            1,
            prev,
            merkle::Root([0u8; 32]),
            Utc.timestamp(1_600_000_000, 0),
            bdv_chain::work::difficulty::CompactDifficulty(0x1d00ffff),
            0,
        )
    }

    fn coinbase_tx(value: i64, to_tag: u8) -> Transaction {
        Transaction::new(
            1,
            vec![Input::Coinbase {
                height: None,
                data: CoinbaseData(vec![0]),
                sequence: 0,
            }],
            vec![Output {
                value: bdv_chain::amount::Amount::try_from(value).unwrap(),
                lock_script: p2pkh_script(to_tag),
            }],
            LockTime::Height(block::Height(0)),
        )
    }

    fn spend_tx(outpoint: transparent::OutPoint, value: i64, to_tag: u8) -> Transaction {
        Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint,
                unlock_script: Script(vec![]),
                sequence: 0xffffffff,
            }],
            vec![Output {
                value: bdv_chain::amount::Amount::try_from(value).unwrap(),
                lock_script: p2pkh_script(to_tag),
            }],
            LockTime::Height(block::Height(0)),
        )
    }

    #[test]
    fn scans_an_output_into_sub_ssh_and_bumps_ssh_total() {
        let (_dir, store) = test_store();
        let scanner = HistoryScanner::new(&store, DbType::Narrow);

        let tag = 42u8;
        let scr_addr = ScrAddr::from_script(&p2pkh_script(tag));
        let mut watched = HashSet::new();
        watched.insert(scr_addr.clone());

        let tx = Arc::new(coinbase_tx(50_000, tag));
        let block = Arc::new(block::Block {
            header: header(block::Hash([0u8; 32])),
            transactions: vec![tx],
        });

        scanner
            .scan_range(
                &[ScanBlock {
                    height: block::Height(100),
                    dup_id: 0,
                    block,
                }],
                &watched,
            )
            .unwrap();

        let ssh = store
            .ssh
            .zs_get_untyped::<SshRecord>(&keys::ssh_key(scr_addr.as_bytes()))
            .unwrap()
            .unwrap();
        assert_eq!(ssh.total_unspent, 50_000);
        assert_eq!(ssh.txio_count, 1);
    }

    #[test]
    fn spend_marks_the_output_not_a_utxo_and_undo_restores_it() {
        let (_dir, store) = test_store();
        let scanner = HistoryScanner::new(&store, DbType::Narrow);

        let tag = 7u8;
        let scr_addr = ScrAddr::from_script(&p2pkh_script(tag));
        let mut watched = HashSet::new();
        watched.insert(scr_addr.clone());

        let coinbase = Arc::new(coinbase_tx(10_000, tag));
        let coinbase_hash = coinbase.hash();
        let block100 = Arc::new(block::Block {
            header: header(block::Hash([0u8; 32])),
            transactions: vec![coinbase],
        });

        let spend = Arc::new(spend_tx(
            transparent::OutPoint {
                hash: coinbase_hash,
                index: 0,
            },
            9_000,
            200,
        ));
        let block101 = Arc::new(block::Block {
            header: header(block::Hash([1u8; 32])),
            transactions: vec![spend],
        });

        scanner
            .scan_range(
                &[
                    ScanBlock {
                        height: block::Height(100),
                        dup_id: 0,
                        block: block100,
                    },
                    ScanBlock {
                        height: block::Height(101),
                        dup_id: 0,
                        block: block101,
                    },
                ],
                &watched,
            )
            .unwrap();

        let tx_key = DbKey::mined(block::Height(100), 0, 0);
        assert!(!scanner.is_utxo(tx_key, 0).unwrap());

        scanner
            .undo(block::Height(100), block::Height(101), |_| 0)
            .unwrap();

        assert!(scanner.is_utxo(tx_key, 0).unwrap());
    }
}
