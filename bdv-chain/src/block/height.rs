use std::io::{self, Read, Write};

use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A block height, counted from the genesis block at height 0.
///
/// Stored in the KV store's mined-tx and Sub-SSH keys as a 3-byte
/// big-endian integer (spec §3, §6); `bitcoin_serialize`/`bitcoin_deserialize`
/// here are the little-endian 4-byte wire/consensus encoding instead — the
/// KV store's 3-byte big-endian `heightX` encoding lives in `bdv-store`'s
/// `keys` module, since it is a storage convention, not a consensus one.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(proptest_derive::Arbitrary))]
pub struct Height(pub u32);

impl Height {
    pub const MIN: Height = Height(0);
    /// The largest height representable in the 3-byte big-endian `heightX`
    /// encoding used throughout the KV store (spec §6).
    pub const MAX: Height = Height(0x00ff_ffff);
}

impl BitcoinSerialize for Height {
    fn bitcoin_serialize<W: Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for Height {
    fn bitcoin_deserialize<R: Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Height(u32::bitcoin_deserialize(reader)?))
    }
}

impl std::fmt::Display for Height {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
