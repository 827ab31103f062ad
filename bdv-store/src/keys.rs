//! Byte-exact key encodings, spec §6.
//!
//! Every function here is a pure encode/decode pair; no table knows how its
//! own keys are built, it just stores whatever bytes `keys` hands it. Keys
//! are lexicographically ordered byte strings by construction (big-endian
//! integers throughout) so that `sled::Tree::range`/`scan_prefix` give the
//! seek-to-GE/seek-to-LE/ordered-iteration semantics spec §4.1 calls for.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use bdv_chain::{block, transaction};

/// Single-byte table-within-table discriminators (spec §6).
pub mod prefix {
    pub const TXHINTS: u8 = 0x02;
    pub const SSH: u8 = 0x03;
    pub const ZERO_CONF: u8 = 0x04;
    pub const DBINFO: u8 = 0x05;
    /// `HEADHASH`: header hash → `heightX`, the HEADERS table's secondary
    /// hash index (spec §4.1).
    pub const HEADHASH: u8 = 0x06;
    /// `HEADHGT`: `heightX` → `StoredHeader`, the HEADERS table's primary
    /// storage keyed the way [`crate::sled_format::SledDeserialize`]'s
    /// `StoredHeader` impl expects (height recovered from the key, not
    /// re-encoded into the value).
    pub const HEADHGT: u8 = 0x07;
}

/// `height(3B BE) | dupId(1B)`, the branch-disambiguated height used to key
/// Sub-SSH buckets and as the high bits of a mined tx key (spec §3, §6).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HeightX {
    pub height: block::Height,
    pub dup_id: u8,
}

impl HeightX {
    pub fn new(height: block::Height, dup_id: u8) -> Self {
        HeightX { height, dup_id }
    }

    pub fn to_bytes(self) -> [u8; 4] {
        let mut buf = [0u8; 4];
        let h = self.height.0;
        buf[0] = (h >> 16) as u8;
        buf[1] = (h >> 8) as u8;
        buf[2] = h as u8;
        buf[3] = self.dup_id;
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 4 {
            return None;
        }
        let h = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
        Some(HeightX {
            height: block::Height(h),
            dup_id: bytes[3],
        })
    }
}

/// A compact 6-byte transaction location, either mined (`height|dupId|txIndex`)
/// or mempool (`0xFFFF|zcId`), spec §3.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum DbKey {
    Mined {
        height: block::Height,
        dup_id: u8,
        tx_index: u16,
    },
    Mempool {
        zc_id: u32,
    },
}

impl DbKey {
    pub const LEN: usize = 6;

    pub fn mined(height: block::Height, dup_id: u8, tx_index: u16) -> Self {
        DbKey::Mined {
            height,
            dup_id,
            tx_index,
        }
    }

    pub fn mempool(zc_id: u32) -> Self {
        DbKey::Mempool { zc_id }
    }

    pub fn is_mempool(self) -> bool {
        matches!(self, DbKey::Mempool { .. })
    }

    pub fn height_x(self) -> Option<HeightX> {
        match self {
            DbKey::Mined { height, dup_id, .. } => Some(HeightX::new(height, dup_id)),
            DbKey::Mempool { .. } => None,
        }
    }

    pub fn to_bytes(self) -> [u8; 6] {
        let mut buf = [0u8; 6];
        match self {
            DbKey::Mined {
                height,
                dup_id,
                tx_index,
            } => {
                let h = height.0;
                buf[0] = (h >> 16) as u8;
                buf[1] = (h >> 8) as u8;
                buf[2] = h as u8;
                buf[3] = dup_id;
                BigEndian::write_u16(&mut buf[4..6], tx_index);
            }
            DbKey::Mempool { zc_id } => {
                buf[0] = 0xff;
                buf[1] = 0xff;
                BigEndian::write_u32(&mut buf[2..6], zc_id);
            }
        }
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 6 {
            return None;
        }
        if bytes[0] == 0xff && bytes[1] == 0xff {
            Some(DbKey::Mempool {
                zc_id: BigEndian::read_u32(&bytes[2..6]),
            })
        } else {
            let h = ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32;
            Some(DbKey::Mined {
                height: block::Height(h),
                dup_id: bytes[3],
                tx_index: BigEndian::read_u16(&bytes[4..6]),
            })
        }
    }
}

/// STXO key: `txKey(6B) ‖ outIndex(2B BE)` (spec §6).
pub fn stxo_key(tx_key: DbKey, out_index: u16) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[..6].copy_from_slice(&tx_key.to_bytes());
    BigEndian::write_u16(&mut buf[6..8], out_index);
    buf
}

pub fn stxo_key_parts(bytes: &[u8]) -> Option<(DbKey, u16)> {
    if bytes.len() != 8 {
        return None;
    }
    Some((DbKey::from_bytes(&bytes[..6])?, BigEndian::read_u16(&bytes[6..8])))
}

/// Supernode spentness key: `hgtx(4B) ‖ txIndex(2B) ‖ outIndex(2B)` (spec §6).
pub fn spentness_key(height_x: HeightX, tx_index: u16, out_index: u16) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf[..4].copy_from_slice(&height_x.to_bytes());
    BigEndian::write_u16(&mut buf[4..6], tx_index);
    BigEndian::write_u16(&mut buf[6..8], out_index);
    buf
}

/// SSH key: `0x03 ‖ scrAddr` (spec §6).
pub fn ssh_key(scr_addr: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + scr_addr.len());
    buf.push(prefix::SSH);
    buf.extend_from_slice(scr_addr);
    buf
}

/// Sub-SSH key: `0x03 ‖ scrAddr ‖ heightX(4B)` (spec §6).
pub fn sub_ssh_key(scr_addr: &[u8], height_x: HeightX) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + scr_addr.len() + 4);
    buf.push(prefix::SSH);
    buf.extend_from_slice(scr_addr);
    buf.extend_from_slice(&height_x.to_bytes());
    buf
}

/// The lower bound of every Sub-SSH key for `scr_addr`, for range scans.
pub fn sub_ssh_prefix(scr_addr: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + scr_addr.len());
    buf.push(prefix::SSH);
    buf.extend_from_slice(scr_addr);
    buf
}

pub fn scr_addr_from_ssh_key(key: &[u8]) -> Option<&[u8]> {
    if key.first() != Some(&prefix::SSH) {
        return None;
    }
    Some(&key[1..])
}

pub fn scr_addr_from_sub_ssh_key(key: &[u8]) -> Option<(&[u8], HeightX)> {
    if key.first() != Some(&prefix::SSH) || key.len() < 1 + 4 {
        return None;
    }
    let body = &key[1..];
    let (scr_addr, height_x_bytes) = body.split_at(body.len() - 4);
    Some((scr_addr, HeightX::from_bytes(height_x_bytes)?))
}

/// TXHINTS key: `0x02 ‖ first4(txhash)` (spec §6).
pub fn tx_hints_key(prefix: transaction::HashPrefix) -> [u8; 5] {
    let mut buf = [0u8; 5];
    buf[0] = self::prefix::TXHINTS;
    buf[1..].copy_from_slice(&prefix.0);
    buf
}

/// ZC DB record keys: `0x04 ‖ zcKey` for the tx, `0x04 ‖ zcKey ‖ outIdx(2B BE)`
/// for an output (spec §6).
pub fn zc_tx_key(zc_key: DbKey) -> [u8; 7] {
    let mut buf = [0u8; 7];
    buf[0] = prefix::ZERO_CONF;
    buf[1..].copy_from_slice(&zc_key.to_bytes());
    buf
}

pub fn zc_output_key(zc_key: DbKey, out_index: u16) -> [u8; 9] {
    let mut buf = [0u8; 9];
    buf[0] = prefix::ZERO_CONF;
    buf[1..7].copy_from_slice(&zc_key.to_bytes());
    BigEndian::write_u16(&mut buf[7..9], out_index);
    buf
}

/// `HEADHASH` key: `0x06 ‖ hash(32B)` → the header's `heightX`.
pub fn header_hash_key(hash: block::Hash) -> [u8; 33] {
    let mut buf = [0u8; 33];
    buf[0] = prefix::HEADHASH;
    buf[1..].copy_from_slice(&hash.0);
    buf
}

/// `HEADHGT` key: `0x07 ‖ heightX(4B)` → the `StoredHeader` record.
pub fn header_height_key(height_x: HeightX) -> [u8; 5] {
    let mut buf = [0u8; 5];
    buf[0] = prefix::HEADHGT;
    buf[1..].copy_from_slice(&height_x.to_bytes());
    buf
}

/// The DB-info record's fixed key (spec §6).
pub const DBINFO_KEY: [u8; 1] = [prefix::DBINFO];

/// `DBUtils::getFilterPoolKey(fileNum)` (spec §6): the per-block-file
/// transaction-hash filter pool's key.
pub fn filter_pool_key(file_num: u32) -> [u8; 5] {
    let mut buf = [0u8; 5];
    buf[0] = b'F';
    BigEndian::write_u32(&mut buf[1..], file_num);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_x_round_trips() {
        let hx = HeightX::new(block::Height(123_456), 7);
        let bytes = hx.to_bytes();
        assert_eq!(HeightX::from_bytes(&bytes), Some(hx));
    }

    #[test]
    fn db_key_round_trips_mined_and_mempool() {
        let mined = DbKey::mined(block::Height(500), 0, 42);
        assert_eq!(DbKey::from_bytes(&mined.to_bytes()), Some(mined));

        let zc = DbKey::mempool(99);
        assert_eq!(DbKey::from_bytes(&zc.to_bytes()), Some(zc));
        assert!(zc.is_mempool());
        assert!(!mined.is_mempool());
    }

    #[test]
    fn mined_keys_sort_by_height_then_dup_then_index() {
        let a = DbKey::mined(block::Height(1), 0, 0).to_bytes();
        let b = DbKey::mined(block::Height(1), 0, 1).to_bytes();
        let c = DbKey::mined(block::Height(2), 0, 0).to_bytes();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn stxo_key_round_trips() {
        let tx_key = DbKey::mined(block::Height(10), 1, 2);
        let key = stxo_key(tx_key, 5);
        assert_eq!(stxo_key_parts(&key), Some((tx_key, 5)));
    }

    #[test]
    fn sub_ssh_key_recovers_scr_addr_and_height() {
        let scr_addr = vec![0x00u8, 1, 2, 3];
        let hx = HeightX::new(block::Height(7), 0);
        let key = sub_ssh_key(&scr_addr, hx);
        let (addr, got_hx) = scr_addr_from_sub_ssh_key(&key).unwrap();
        assert_eq!(addr, scr_addr.as_slice());
        assert_eq!(got_hx, hx);
    }
}
