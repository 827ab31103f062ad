//! Builds the [`LedgerEntry`] lists a `zc` notification carries, translating
//! what the mempool primitives hand back (a `ParsedTx`, a `Pool` snapshot)
//! into the per-scrAddr net value change a client's wallet applies directly
//! (spec §4.4 "Notify", §4.7 "zc").
//!
//! `ParsedTx` only keeps `input_resolution`/`scr_addrs_touched`, not the
//! resolved value of each spent input — this module re-derives it the same
//! way `ZcParser::resolve` found the input in the first place (mined STXO,
//! or a still-unconfirmed parent in the pool), rather than threading a new
//! field through a type `bdv-mempool` already publishes widely.

use std::collections::HashMap;

use bdv_chain::transparent::{Input, OutPoint};

use bdv_mempool::snapshot::Pool;
use bdv_mempool::ParsedTx;
use bdv_store::keys;
use bdv_store::records::{StxoRecord, TxHints};
use bdv_store::scr_addr::ScrAddr;
use bdv_store::sled_format::TreeExt;
use bdv_store::KvStore;

use bdv_session::notification::LedgerEntry;

/// One [`LedgerEntry`] per scrAddr `tx` touches, carrying the net satoshi
/// change that scrAddr's balance sees from this unconfirmed tx landing.
/// `pool` must be the snapshot `tx` was resolved against — the one loaded
/// immediately before the `ZcParser::commit` call that produced it — since
/// a spent input's value may only be found in a still-unconfirmed parent
/// that a later snapshot may no longer contain.
pub fn ledger_entries_for_zc(store: &KvStore, pool: &Pool, tx: &ParsedTx) -> Vec<LedgerEntry> {
    let mut delta: HashMap<ScrAddr, i64> = HashMap::new();

    for input in &tx.tx.inputs {
        let outpoint = match input {
            Input::PrevOut { outpoint, .. } => outpoint,
            Input::Coinbase { .. } => continue,
        };
        if let Some((value, scr_addr)) = spent_output(store, pool, outpoint) {
            if tx.scr_addrs_touched.contains(&scr_addr) {
                *delta.entry(scr_addr).or_insert(0) -= value;
            }
        }
    }

    for output in &tx.tx.outputs {
        let scr_addr = ScrAddr::from_script(&output.lock_script);
        if tx.scr_addrs_touched.contains(&scr_addr) {
            *delta.entry(scr_addr).or_insert(0) += output.value.i64();
        }
    }

    delta
        .into_iter()
        .map(|(scr_addr, value_delta)| LedgerEntry {
            scr_addr,
            tx_key: tx.zc_key,
            tx_hash: tx.hash,
            value_delta,
            height: None,
        })
        .collect()
}

/// Looks up the value and scrAddr of whatever `outpoint` spends, checking
/// the live pool first (an unconfirmed parent) and the mined UTXO set
/// second — the same order [`bdv_mempool::ZcParser`]'s own resolution pass
/// uses.
fn spent_output(store: &KvStore, pool: &Pool, outpoint: &OutPoint) -> Option<(i64, ScrAddr)> {
    if let Some(parent) = pool.txs.get(&outpoint.hash) {
        let output = parent.tx.outputs.get(outpoint.index as usize)?;
        return Some((output.value.i64(), ScrAddr::from_script(&output.lock_script)));
    }

    let hints_key = keys::tx_hints_key(outpoint.hash.into());
    let hints: TxHints = store.txhints.zs_get_untyped(&hints_key).ok().flatten().unwrap_or_default();
    for candidate in hints.candidates {
        if candidate.is_mempool() {
            continue;
        }
        let stxo_key = keys::stxo_key(candidate, outpoint.index as u16);
        if let Some(record) = store.stxo.zs_get_untyped::<StxoRecord>(&stxo_key).ok().flatten() {
            return Some((record.value.i64(), ScrAddr::from_script(&record.script)));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdv_chain::amount::Amount;
    use bdv_chain::transaction::{LockTime, Transaction};
    use bdv_chain::transparent::{CoinbaseData, Output, Script};
    use bdv_store::config::Config;
    use bdv_store::keys::DbKey;
    use std::sync::Arc;
    use tempdir::TempDir;

    fn store() -> (TempDir, KvStore) {
        let dir = TempDir::new("bdvd-notify").unwrap();
        let config = Config {
            db_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let store = KvStore::open(&config).unwrap();
        (dir, store)
    }

    fn coinbase_like(value: i64, script: Vec<u8>) -> Arc<Transaction> {
        Arc::new(Transaction::new(
            1,
            vec![Input::Coinbase {
                height: None,
                data: CoinbaseData(vec![0]),
                sequence: 0,
            }],
            vec![Output {
                value: Amount::try_from(value).unwrap(),
                lock_script: Script(script),
            }],
            LockTime::Height(bdv_chain::block::Height(0)),
        ))
    }

    #[test]
    fn a_plain_receive_produces_one_positive_entry() {
        let (_dir, store) = store();
        let pool = Pool::new();
        let tx = coinbase_like(500, vec![0x51]);
        let scr_addr = ScrAddr::from_script(&tx.outputs[0].lock_script);
        let parsed = ParsedTx {
            scr_addrs_touched: vec![scr_addr.clone()],
            ..ParsedTx::new(DbKey::mempool(0), tx)
        };

        let entries = ledger_entries_for_zc(&store, &pool, &parsed);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].scr_addr, scr_addr);
        assert_eq!(entries[0].value_delta, 500);
        assert_eq!(entries[0].height, None);
    }

    #[test]
    fn spending_an_unconfirmed_parent_output_produces_a_negative_entry() {
        let (_dir, store) = store();
        let mut pool = Pool::new();

        let parent_tx = coinbase_like(1000, vec![0x51]);
        let scr_addr = ScrAddr::from_script(&parent_tx.outputs[0].lock_script);
        let parent = Arc::new(ParsedTx {
            scr_addrs_touched: vec![scr_addr.clone()],
            ..ParsedTx::new(DbKey::mempool(0), parent_tx.clone())
        });
        pool.insert(parent.clone());

        let child_tx = Arc::new(Transaction::new(
            1,
            vec![Input::PrevOut {
                outpoint: OutPoint {
                    hash: parent_tx.hash(),
                    index: 0,
                },
                unlock_script: Script(vec![]),
                sequence: 0,
            }],
            vec![Output {
                value: Amount::try_from(900).unwrap(),
                lock_script: Script(vec![0x52]),
            }],
            LockTime::Height(bdv_chain::block::Height(0)),
        ));
        let other_addr = ScrAddr::from_script(&child_tx.outputs[0].lock_script);
        let child = ParsedTx {
            scr_addrs_touched: vec![scr_addr.clone(), other_addr.clone()],
            ..ParsedTx::new(DbKey::mempool(1), child_tx)
        };

        let entries = ledger_entries_for_zc(&store, &pool, &child);
        assert_eq!(entries.len(), 2);
        let spend = entries.iter().find(|e| e.scr_addr == scr_addr).unwrap();
        assert_eq!(spend.value_delta, -1000);
        let receive = entries.iter().find(|e| e.scr_addr == other_addr).unwrap();
        assert_eq!(receive.value_delta, 900);
    }
}
