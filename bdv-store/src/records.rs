//! Persisted record shapes, spec §3/§6.
//!
//! Records that are already consensus-shaped (headers, transaction outputs)
//! reuse `bdv_chain`'s `BitcoinSerialize`/`BitcoinDeserialize`; the BDV-only
//! aggregate records (SSH/Sub-SSH, DB-info, filter pools, TXHINTS lists) get
//! their own encodings here, all built through the `SledSerialize`/
//! `SledDeserialize` trait trio in [`crate::sled_format`].

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use bdv_chain::{
    amount::{Amount, NonNegative},
    block, transparent,
};

use crate::config::DbType;
use crate::keys::DbKey;
use crate::sled_format::{SledDeserialize, SledSerialize};

/// A header admitted to the in-memory header graph, carrying the
/// branch-disambiguating `dupId` and monotonic `uid` the consensus header
/// bytes themselves don't encode (spec §3, §4.2).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub header: block::Header,
    pub height: block::Height,
    pub dup_id: u8,
    pub uid: u32,
    pub on_main_chain: bool,
    pub tx_count: u32,
    pub block_size: u32,
    pub file_id: u32,
    pub offset: u64,
}

impl SledSerialize for StoredHeader {
    fn sled_serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(bdv_chain::block::Header::len() + 1 + 4 + 1 + 4 + 4 + 4 + 8);
        buf.extend_from_slice(&self.header.bitcoin_serialize_to_vec());
        buf.push(self.dup_id);
        let mut uid_buf = [0u8; 4];
        BigEndian::write_u32(&mut uid_buf, self.uid);
        buf.extend_from_slice(&uid_buf);
        buf.push(self.on_main_chain as u8);
        let mut n = [0u8; 4];
        BigEndian::write_u32(&mut n, self.tx_count);
        buf.extend_from_slice(&n);
        BigEndian::write_u32(&mut n, self.block_size);
        buf.extend_from_slice(&n);
        BigEndian::write_u32(&mut n, self.file_id);
        buf.extend_from_slice(&n);
        let mut off = [0u8; 8];
        BigEndian::write_u64(&mut off, self.offset);
        buf.extend_from_slice(&off);
        buf
    }
}

impl SledDeserialize for StoredHeader {
    fn sled_deserialize(height: block::Height, bytes: &[u8]) -> crate::error::Result<Self> {
        use bdv_chain::BitcoinDeserialize;
        use std::io::Cursor;

        let header_len = block::Header::len();
        if bytes.len() < header_len + 1 + 4 + 1 + 4 + 4 + 4 + 8 {
            return Err(crate::error::Error::Corrupt(bytes.to_vec()));
        }
        let mut cursor = Cursor::new(&bytes[..header_len]);
        let header = block::Header::bitcoin_deserialize(&mut cursor)
            .map_err(|_| crate::error::Error::Corrupt(bytes.to_vec()))?;
        let mut pos = header_len;
        let dup_id = bytes[pos];
        pos += 1;
        let uid = BigEndian::read_u32(&bytes[pos..pos + 4]);
        pos += 4;
        let on_main_chain = bytes[pos] != 0;
        pos += 1;
        let tx_count = BigEndian::read_u32(&bytes[pos..pos + 4]);
        pos += 4;
        let block_size = BigEndian::read_u32(&bytes[pos..pos + 4]);
        pos += 4;
        let file_id = BigEndian::read_u32(&bytes[pos..pos + 4]);
        pos += 4;
        let offset = BigEndian::read_u64(&bytes[pos..pos + 8]);

        Ok(StoredHeader {
            header,
            height,
            dup_id,
            uid,
            on_main_chain,
            tx_count,
            block_size,
            file_id,
            offset,
        })
    }
}

/// The spentness state of an STXO, recorded once an output's spending
/// transaction is scanned (spec §3 UTXO-flag invariant: a STXO's absence
/// means unspent, never the reverse).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Spentness {
    Unspent,
    Spent { spender: DbKey },
}

/// A single transaction output's value/script and its current spentness,
/// keyed by `keys::stxo_key` (spec §3, §4.1, §4.5).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StxoRecord {
    pub value: Amount<NonNegative>,
    pub script: transparent::Script,
    pub spentness: Spentness,
}

impl SledSerialize for StxoRecord {
    fn sled_serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut value_buf = [0u8; 8];
        BigEndian::write_i64(&mut value_buf, self.value.i64());
        buf.extend_from_slice(&value_buf);
        match self.spentness {
            Spentness::Unspent => buf.push(0),
            Spentness::Spent { spender } => {
                buf.push(1);
                buf.extend_from_slice(&spender.to_bytes());
            }
        }
        let mut len_buf = [0u8; 4];
        BigEndian::write_u32(&mut len_buf, self.script.0.len() as u32);
        buf.extend_from_slice(&len_buf);
        buf.extend_from_slice(&self.script.0);
        buf
    }
}

impl SledDeserialize for StxoRecord {
    fn sled_deserialize(_height: block::Height, bytes: &[u8]) -> crate::error::Result<Self> {
        if bytes.len() < 8 + 1 {
            return Err(crate::error::Error::Corrupt(bytes.to_vec()));
        }
        let raw_value = BigEndian::read_i64(&bytes[0..8]);
        let value = Amount::try_from(raw_value).map_err(|_| crate::error::Error::Corrupt(bytes.to_vec()))?;
        let mut pos = 8;
        let tag = bytes[pos];
        pos += 1;
        let spentness = if tag == 0 {
            Spentness::Unspent
        } else {
            if bytes.len() < pos + DbKey::LEN {
                return Err(crate::error::Error::Corrupt(bytes.to_vec()));
            }
            let spender = DbKey::from_bytes(&bytes[pos..pos + DbKey::LEN])
                .ok_or_else(|| crate::error::Error::Corrupt(bytes.to_vec()))?;
            pos += DbKey::LEN;
            Spentness::Spent { spender }
        };
        if bytes.len() < pos + 4 {
            return Err(crate::error::Error::Corrupt(bytes.to_vec()));
        }
        let script_len = BigEndian::read_u32(&bytes[pos..pos + 4]) as usize;
        pos += 4;
        if bytes.len() < pos + script_len {
            return Err(crate::error::Error::Corrupt(bytes.to_vec()));
        }
        let script = transparent::Script(bytes[pos..pos + script_len].to_vec());
        Ok(StxoRecord {
            value,
            script,
            spentness,
        })
    }
}

/// One Sub-SSH bucket entry: a single txio touching a scrAddr at a given
/// `heightX` (spec §3, §4.5).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TxioEntry {
    pub tx_key: DbKey,
    pub out_index: u16,
    pub value: Amount<NonNegative>,
    pub is_spend: bool,
}

/// A Sub-SSH record: all txio activity touching a scrAddr at one `heightX`
/// (spec §4.5, `undo` rewrites/removes this per affected height).
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct SubSshRecord {
    pub entries: Vec<TxioEntry>,
}

impl SledSerialize for SubSshRecord {
    fn sled_serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut count_buf = [0u8; 4];
        BigEndian::write_u32(&mut count_buf, self.entries.len() as u32);
        buf.extend_from_slice(&count_buf);
        for entry in &self.entries {
            buf.extend_from_slice(&entry.tx_key.to_bytes());
            let mut idx_buf = [0u8; 2];
            BigEndian::write_u16(&mut idx_buf, entry.out_index);
            buf.extend_from_slice(&idx_buf);
            let mut value_buf = [0u8; 8];
            BigEndian::write_i64(&mut value_buf, entry.value.i64());
            buf.extend_from_slice(&value_buf);
            buf.push(entry.is_spend as u8);
        }
        buf
    }
}

impl SledDeserialize for SubSshRecord {
    fn sled_deserialize(_height: block::Height, bytes: &[u8]) -> crate::error::Result<Self> {
        if bytes.len() < 4 {
            return Err(crate::error::Error::Corrupt(bytes.to_vec()));
        }
        let count = BigEndian::read_u32(&bytes[0..4]) as usize;
        let mut pos = 4;
        let mut entries = Vec::with_capacity(count);
        const ENTRY_LEN: usize = DbKey::LEN + 2 + 8 + 1;
        for _ in 0..count {
            if bytes.len() < pos + ENTRY_LEN {
                return Err(crate::error::Error::Corrupt(bytes.to_vec()));
            }
            let tx_key = DbKey::from_bytes(&bytes[pos..pos + DbKey::LEN])
                .ok_or_else(|| crate::error::Error::Corrupt(bytes.to_vec()))?;
            pos += DbKey::LEN;
            let out_index = BigEndian::read_u16(&bytes[pos..pos + 2]);
            pos += 2;
            let raw_value = BigEndian::read_i64(&bytes[pos..pos + 8]);
            pos += 8;
            let value =
                Amount::try_from(raw_value).map_err(|_| crate::error::Error::Corrupt(bytes.to_vec()))?;
            let is_spend = bytes[pos] != 0;
            pos += 1;
            entries.push(TxioEntry {
                tx_key,
                out_index,
                value,
                is_spend,
            });
        }
        Ok(SubSshRecord { entries })
    }
}

/// The SSH aggregate record: running totals across every Sub-SSH bucket for
/// a scrAddr, maintained incrementally as Sub-SSH buckets are written
/// (spec §4.5).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct SshRecord {
    pub txio_count: u32,
    pub total_unspent: i64,
    pub scanned_up_to: u32,
}

impl SledSerialize for SshRecord {
    fn sled_serialize(&self) -> Vec<u8> {
        let mut buf = [0u8; 16];
        BigEndian::write_u32(&mut buf[0..4], self.txio_count);
        BigEndian::write_i64(&mut buf[4..12], self.total_unspent);
        BigEndian::write_u32(&mut buf[12..16], self.scanned_up_to);
        buf.to_vec()
    }
}

impl SledDeserialize for SshRecord {
    fn sled_deserialize(_height: block::Height, bytes: &[u8]) -> crate::error::Result<Self> {
        if bytes.len() != 16 {
            return Err(crate::error::Error::Corrupt(bytes.to_vec()));
        }
        Ok(SshRecord {
            txio_count: BigEndian::read_u32(&bytes[0..4]),
            total_unspent: BigEndian::read_i64(&bytes[4..12]),
            scanned_up_to: BigEndian::read_u32(&bytes[12..16]),
        })
    }
}

/// The TXHINTS table's value: the (usually singleton) list of tx keys whose
/// hash shares this 4-byte prefix (spec §3, §6).
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct TxHints {
    pub candidates: Vec<DbKey>,
}

impl SledSerialize for TxHints {
    fn sled_serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.candidates.len() * DbKey::LEN);
        for key in &self.candidates {
            buf.extend_from_slice(&key.to_bytes());
        }
        buf
    }
}

impl SledDeserialize for TxHints {
    fn sled_deserialize(_height: block::Height, bytes: &[u8]) -> crate::error::Result<Self> {
        if bytes.len() % DbKey::LEN != 0 {
            return Err(crate::error::Error::Corrupt(bytes.to_vec()));
        }
        let candidates = bytes
            .chunks_exact(DbKey::LEN)
            .map(DbKey::from_bytes)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| crate::error::Error::Corrupt(bytes.to_vec()))?;
        Ok(TxHints { candidates })
    }
}

/// The supernode-mode per-output spentness record (spec §4.5 "Supernode"),
/// kept separate from the narrow-mode `StxoRecord` so a full value/script
/// copy isn't duplicated for every scrAddr the node tracks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SpentnessRecord {
    pub spentness: Spentness,
}

impl SledSerialize for SpentnessRecord {
    fn sled_serialize(&self) -> Vec<u8> {
        match self.spentness {
            Spentness::Unspent => vec![0],
            Spentness::Spent { spender } => {
                let mut buf = vec![1];
                buf.extend_from_slice(&spender.to_bytes());
                buf
            }
        }
    }
}

impl SledDeserialize for SpentnessRecord {
    fn sled_deserialize(_height: block::Height, bytes: &[u8]) -> crate::error::Result<Self> {
        match bytes.first() {
            Some(0) => Ok(SpentnessRecord {
                spentness: Spentness::Unspent,
            }),
            Some(1) if bytes.len() == 1 + DbKey::LEN => {
                let spender = DbKey::from_bytes(&bytes[1..])
                    .ok_or_else(|| crate::error::Error::Corrupt(bytes.to_vec()))?;
                Ok(SpentnessRecord {
                    spentness: Spentness::Spent { spender },
                })
            }
            _ => Err(crate::error::Error::Corrupt(bytes.to_vec())),
        }
    }
}

/// The DB-info record (spec §6): the process's own network magic, DB type,
/// and scan progress, checked against `Config` on open.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DbInfo {
    pub magic: [u8; 4],
    pub db_type: DbType,
    pub top_block_height: block::Height,
    pub top_scanned_hash: Option<block::Hash>,
}

impl SledSerialize for DbInfo {
    fn sled_serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 1 + 4 + 1 + 32);
        buf.extend_from_slice(&self.magic);
        buf.push(self.db_type.tag());
        let mut h = [0u8; 4];
        BigEndian::write_u32(&mut h, self.top_block_height.0);
        buf.extend_from_slice(&h);
        match self.top_scanned_hash {
            None => buf.push(0),
            Some(hash) => {
                buf.push(1);
                buf.extend_from_slice(&hash.0);
            }
        }
        buf
    }
}

impl SledDeserialize for DbInfo {
    fn sled_deserialize(_height: block::Height, bytes: &[u8]) -> crate::error::Result<Self> {
        if bytes.len() < 4 + 1 + 4 + 1 {
            return Err(crate::error::Error::Corrupt(bytes.to_vec()));
        }
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let db_type =
            DbType::from_tag(bytes[4]).ok_or_else(|| crate::error::Error::Corrupt(bytes.to_vec()))?;
        let top_block_height = block::Height(BigEndian::read_u32(&bytes[5..9]));
        let top_scanned_hash = match bytes[9] {
            0 => None,
            1 => {
                if bytes.len() != 10 + 32 {
                    return Err(crate::error::Error::Corrupt(bytes.to_vec()));
                }
                let mut hash_bytes = [0u8; 32];
                hash_bytes.copy_from_slice(&bytes[10..42]);
                Some(block::Hash(hash_bytes))
            }
            _ => return Err(crate::error::Error::Corrupt(bytes.to_vec())),
        };
        Ok(DbInfo {
            magic,
            db_type,
            top_block_height,
            top_scanned_hash,
        })
    }
}

/// The SUBSSH_META table's value, keyed directly by a block's `heightX`
/// bytes: every scrAddr touched by that block, so [`crate::history_scanner::
/// HistoryScanner::undo`] can find and roll back every affected Sub-SSH
/// bucket for a reorged-out height without a full-table scan (spec §4.5
/// `undo`, and "Supernode" shard grouping, which buckets these same
/// per-height scrAddr lists by a filter function of height).
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct SubSshMetaRecord {
    pub scr_addrs: Vec<Vec<u8>>,
}

impl SledSerialize for SubSshMetaRecord {
    fn sled_serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut count_buf = [0u8; 4];
        BigEndian::write_u32(&mut count_buf, self.scr_addrs.len() as u32);
        buf.extend_from_slice(&count_buf);
        for scr_addr in &self.scr_addrs {
            let mut len_buf = [0u8; 4];
            BigEndian::write_u32(&mut len_buf, scr_addr.len() as u32);
            buf.extend_from_slice(&len_buf);
            buf.extend_from_slice(scr_addr);
        }
        buf
    }
}

impl SledDeserialize for SubSshMetaRecord {
    fn sled_deserialize(_height: block::Height, bytes: &[u8]) -> crate::error::Result<Self> {
        if bytes.len() < 4 {
            return Err(crate::error::Error::Corrupt(bytes.to_vec()));
        }
        let count = BigEndian::read_u32(&bytes[0..4]) as usize;
        let mut pos = 4;
        let mut scr_addrs = Vec::with_capacity(count);
        for _ in 0..count {
            if bytes.len() < pos + 4 {
                return Err(crate::error::Error::Corrupt(bytes.to_vec()));
            }
            let len = BigEndian::read_u32(&bytes[pos..pos + 4]) as usize;
            pos += 4;
            if bytes.len() < pos + len {
                return Err(crate::error::Error::Corrupt(bytes.to_vec()));
            }
            scr_addrs.push(bytes[pos..pos + len].to_vec());
            pos += len;
        }
        Ok(SubSshMetaRecord { scr_addrs })
    }
}

/// A per-block-file transaction-hash filter pool (spec §4.3 step 4, §6):
/// an opaque blob the filter module builds and re-verifies, stored whole.
#[derive(Clone, Debug, Eq, PartialEq, Default)]
pub struct FilterPool {
    pub bytes: Vec<u8>,
}

impl SledSerialize for FilterPool {
    fn sled_serialize(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}

impl SledDeserialize for FilterPool {
    fn sled_deserialize(_height: block::Height, bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(FilterPool {
            bytes: bytes.to_vec(),
        })
    }
}
