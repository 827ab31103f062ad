//! Small wire types shared by several [`super::Message`] variants.

use std::io::{Read, Write};

use bdv_chain::parameters::Network;
use bdv_chain::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use bitflags::bitflags;

/// A nonce used to detect self-connections, and to identify in-flight `ping`s.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Nonce(pub u64);

impl From<u64> for Nonce {
    fn from(n: u64) -> Nonce {
        Nonce(n)
    }
}

impl BitcoinSerialize for Nonce {
    fn bitcoin_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        self.0.bitcoin_serialize(&mut writer)
    }
}

impl BitcoinDeserialize for Nonce {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Nonce(u64::bitcoin_deserialize(&mut reader)?))
    }
}

/// The protocol version a peer advertises in its `version` message.
#[derive(Copy, Clone, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(pub u32);

impl BitcoinSerialize for ProtocolVersion {
    fn bitcoin_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        self.0.bitcoin_serialize(&mut writer)
    }
}

impl BitcoinDeserialize for ProtocolVersion {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(ProtocolVersion(u32::bitcoin_deserialize(&mut reader)?))
    }
}

bitflags! {
    /// Services advertised by a peer in its `version` message and in `addr` gossip.
    ///
    /// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#version)
    pub struct PeerServices: u64 {
        /// The peer can serve the full block chain.
        const NODE_NETWORK = 1 << 0;
        /// The peer can answer `getutxo` (BIP 64). Unused by modern nodes.
        const NODE_GETUTXO = 1 << 1;
        /// The peer supports bloom-filtered connections (BIP 37).
        const NODE_BLOOM = 1 << 2;
        /// The peer supports segregated witness (BIP 144).
        const NODE_WITNESS = 1 << 3;
        /// The peer serves only a recent window of blocks (BIP 159).
        const NODE_NETWORK_LIMITED = 1 << 10;
    }
}

impl BitcoinSerialize for PeerServices {
    fn bitcoin_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        self.bits().bitcoin_serialize(&mut writer)
    }
}

impl BitcoinDeserialize for PeerServices {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let bits = u64::bitcoin_deserialize(&mut reader)?;
        // Ignore unknown high bits rather than rejecting the peer outright.
        Ok(PeerServices::from_bits_truncate(bits))
    }
}

/// A bloom filter, as installed by `filterload` and extended by `filteradd`.
#[derive(Clone, Eq, PartialEq)]
pub struct Filter(pub Vec<u8>);

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Filter").field(&self.0.len()).finish()
    }
}

/// The tweak applied to a peer's bloom filter hash functions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Tweak(pub u32);

/// The 4-byte magic bytes that prefix every message on the wire.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Magic(pub [u8; 4]);

impl std::fmt::Debug for Magic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Magic").field(&hex::encode(&self.0)).finish()
    }
}

impl From<Network> for Magic {
    fn from(network: Network) -> Magic {
        Magic(network.magic())
    }
}
