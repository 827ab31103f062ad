use std::{fmt, io};

use crate::serialization::{sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError};
use bdv_serde_derive::BtcSerialize;
#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

use super::Transaction;

/// A transaction hash (txid). Displayed and persisted in the reversed,
/// big-endian byte order Bitcoin conventionally uses.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, BtcSerialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash(pub [u8; 32]);

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.write_str(&hex::encode(&reversed))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut reversed = self.0;
        reversed.reverse();
        f.debug_tuple("transaction::Hash")
            .field(&hex::encode(&reversed))
            .finish()
    }
}

impl BitcoinDeserialize for Hash {
    fn bitcoin_deserialize<R: io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Hash(<[u8; 32]>::bitcoin_deserialize(reader)?))
    }
}

/// The first 4 bytes of a transaction hash, used as the TXHINTS table's key
/// prefix (spec §3, §6). Many hashes can share a prefix; TXHINTS stores the
/// resulting collisions as an ordered list.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct HashPrefix(pub [u8; 4]);

impl From<Hash> for HashPrefix {
    fn from(hash: Hash) -> Self {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&hash.0[..4]);
        HashPrefix(bytes)
    }
}

impl<'a> From<&'a Transaction> for Hash {
    fn from(tx: &'a Transaction) -> Self {
        let mut writer = sha256d::Writer::default();
        tx.bitcoin_serialize(&mut writer)
            .expect("hash writer is infallible");
        Hash(writer.finish())
    }
}

impl std::str::FromStr for Hash {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; 32];
        if hex::decode_to_slice(s, &mut bytes[..]).is_err() {
            return Err(SerializationError::Parse("txid hex decoding error"));
        }
        bytes.reverse();
        Ok(Hash(bytes))
    }
}
