//! Block difficulty ("nBits") encoding.

use std::io::{self, Read, Write};

use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// A compact representation of a 256-bit difficulty target, in Bitcoin's
/// "nBits" format: a 1-byte exponent and a 3-byte mantissa.
///
/// The BDV core never validates proof of work against this value — it only
/// stores and forwards it, and uses the decoded cumulative work for the
/// header index's `organize` tie-break (spec §4.2).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(proptest_derive::Arbitrary))]
pub struct CompactDifficulty(pub u32);

impl CompactDifficulty {
    /// Approximate "work" contributed by a block at this difficulty, used
    /// only to rank candidate chain tips by cumulative difficulty. This is
    /// not a consensus computation; ties are broken deterministically by
    /// header hash rather than by exact work arithmetic.
    pub fn approx_work(self) -> u128 {
        let exponent = (self.0 >> 24) as u32;
        let mantissa = (self.0 & 0x00ff_ffff) as u128;
        if mantissa == 0 {
            return 0;
        }
        // Larger mantissa/exponent encodes an *easier* (lower) target, so
        // work is inversely related; shift the other direction from how a
        // target would be reconstructed.
        let shift = exponent.min(32);
        mantissa << (8 * (32u32.saturating_sub(shift)).min(96))
    }
}

impl BitcoinSerialize for CompactDifficulty {
    fn bitcoin_serialize<W: Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(&mut target)
    }
}

impl BitcoinDeserialize for CompactDifficulty {
    fn bitcoin_deserialize<R: Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(CompactDifficulty(u32::bitcoin_deserialize(reader)?))
    }
}
