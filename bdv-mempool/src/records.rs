//! The ZERO_CONF table's persisted shapes (spec §4.4, §6): enough to reload
//! the pool across a restart without waiting on every peer to re-announce
//! its mempool.

use bdv_chain::BitcoinSerialize;
use bdv_store::error::Result;
use bdv_store::sled_format::{SledDeserialize, SledSerialize};

/// One unconfirmed transaction's raw bytes, keyed by `keys::zc_tx_key`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ZcTxRecord {
    pub raw: Vec<u8>,
}

impl SledSerialize for ZcTxRecord {
    fn sled_serialize(&self) -> Vec<u8> {
        self.raw.clone()
    }
}

impl SledDeserialize for ZcTxRecord {
    fn sled_deserialize(_height: bdv_chain::block::Height, bytes: &[u8]) -> Result<Self> {
        Ok(ZcTxRecord { raw: bytes.to_vec() })
    }
}

impl ZcTxRecord {
    pub fn from_tx(tx: &bdv_chain::transaction::Transaction) -> ZcTxRecord {
        ZcTxRecord {
            raw: tx
                .bitcoin_serialize_to_vec()
                .expect("serializing to an in-memory buffer is infallible"),
        }
    }
}
