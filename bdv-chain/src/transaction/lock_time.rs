use std::io::{self, Read, Write};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    block,
    serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError},
};

/// A transaction's `nLockTime` field: either a block height or a Unix
/// timestamp below which the transaction may not be mined, per Bitcoin's
/// long-standing convention of splitting the `u32` range at 500,000,000.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LockTime {
    Height(block::Height),
    Time(DateTime<Utc>),
}

impl LockTime {
    /// Values below this threshold are interpreted as block heights.
    pub const MIN_TIMESTAMP: u32 = 500_000_000;
    pub const MAX_TIMESTAMP: u32 = u32::MAX;

    pub fn raw(self) -> u32 {
        match self {
            LockTime::Height(h) => h.0,
            LockTime::Time(t) => t.timestamp() as u32,
        }
    }
}

impl BitcoinSerialize for LockTime {
    fn bitcoin_serialize<W: Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.raw().bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for LockTime {
    fn bitcoin_deserialize<R: Read>(reader: R) -> Result<Self, SerializationError> {
        let raw = u32::bitcoin_deserialize(reader)?;
        if raw < Self::MIN_TIMESTAMP {
            Ok(LockTime::Height(block::Height(raw)))
        } else {
            Ok(LockTime::Time(Utc.timestamp(raw as i64, 0)))
        }
    }
}
