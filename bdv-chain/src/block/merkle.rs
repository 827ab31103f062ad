//! The transaction Merkle tree root committed to by a block header.

use std::{
    io::{self, Read, Write},
    iter::FromIterator,
};

use crate::{
    serialization::{sha256d, BitcoinDeserialize, BitcoinSerialize, SerializationError},
    transaction,
};

/// The root of a block's transaction Merkle tree.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(proptest_derive::Arbitrary))]
pub struct Root(pub [u8; 32]);

impl std::fmt::Debug for Root {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl BitcoinSerialize for Root {
    fn bitcoin_serialize<W: Write>(&self, mut target: W) -> Result<(), io::Error> {
        target.write_all(&self.0)
    }
}

impl BitcoinDeserialize for Root {
    fn bitcoin_deserialize<R: Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Root(<[u8; 32]>::bitcoin_deserialize(reader)?))
    }
}

/// Computes the Merkle root over the Bitcoin-standard pairwise sha256d tree,
/// duplicating the last element of an odd-length level.
impl FromIterator<transaction::Hash> for Root {
    fn from_iter<T: IntoIterator<Item = transaction::Hash>>(iter: T) -> Self {
        let mut level: Vec<[u8; 32]> = iter.into_iter().map(|h| h.0).collect();
        if level.is_empty() {
            return Root([0; 32]);
        }
        while level.len() > 1 {
            if level.len() % 2 == 1 {
                level.push(*level.last().unwrap());
            }
            level = level
                .chunks_exact(2)
                .map(|pair| {
                    let mut writer = sha256d::Writer::default();
                    std::io::Write::write_all(&mut writer, &pair[0]).unwrap();
                    std::io::Write::write_all(&mut writer, &pair[1]).unwrap();
                    writer.finish()
                })
                .collect();
        }
        Root(level[0])
    }
}
