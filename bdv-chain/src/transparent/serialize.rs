use std::io::{self, Read, Write};

use crate::{
    cached::Cached,
    serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError},
};

use super::{CoinbaseData, Input, OutPoint, Script};

/// The `OutPoint` a coinbase input's wire encoding always carries: an
/// all-zero previous-tx hash and an index of `0xffffffff`. There is no other
/// way to distinguish a coinbase input from an ordinary one on the wire.
const COINBASE_INDEX: u32 = 0xffff_ffff;

impl BitcoinDeserialize for OutPoint {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(OutPoint {
            hash: crate::transaction::Hash::bitcoin_deserialize(&mut reader)?,
            index: u32::bitcoin_deserialize(&mut reader)?,
        })
    }
}

impl BitcoinSerialize for Input {
    fn bitcoin_serialize<W: Write>(&self, mut writer: W) -> Result<(), io::Error> {
        match self {
            Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            } => {
                outpoint.bitcoin_serialize(&mut writer)?;
                unlock_script.bitcoin_serialize(&mut writer)?;
                sequence.bitcoin_serialize(&mut writer)
            }
            Input::Coinbase {
                data, sequence, ..
            } => {
                [0u8; 32].bitcoin_serialize(&mut writer)?;
                COINBASE_INDEX.bitcoin_serialize(&mut writer)?;
                data.bitcoin_serialize(&mut writer)?;
                sequence.bitcoin_serialize(&mut writer)
            }
        }
    }
}

impl BitcoinDeserialize for Input {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let outpoint = OutPoint::bitcoin_deserialize(&mut reader)?;

        if outpoint.hash.0 == [0u8; 32] && outpoint.index == COINBASE_INDEX {
            let data = CoinbaseData::bitcoin_deserialize(&mut reader)?;
            let sequence = u32::bitcoin_deserialize(&mut reader)?;
            Ok(Input::Coinbase {
                height: None,
                data,
                sequence,
            })
        } else {
            let unlock_script = Script::bitcoin_deserialize(&mut reader)?;
            let sequence = u32::bitcoin_deserialize(&mut reader)?;
            Ok(Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            })
        }
    }
}

impl Input {
    /// Caches the BIP-34 height carried in this input's coinbase scriptSig.
    /// No-op on `PrevOut` inputs.
    pub fn set_coinbase_height(&mut self, value: crate::block::Height) {
        if let Input::Coinbase { height, .. } = self {
            *height = Some(Cached::from(value));
        }
    }
}
