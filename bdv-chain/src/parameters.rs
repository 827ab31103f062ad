//! Network parameters: which chain a node/session is speaking to.

pub mod genesis;

pub use genesis::GENESIS_PREVIOUS_BLOCK_HASH;

/// The Bitcoin network a BDV session or block file belongs to.
///
/// `register_bdv(magic)` (spec §4.6) validates the magic bytes a client
/// supplies against one of these; the block-file reader validates the same
/// magic at the start of every block record (spec §6).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(proptest_derive::Arbitrary))]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// The 4-byte magic that prefixes every message on the wire and every
    /// record in a block-dat file for this network.
    pub const fn magic(self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0xf9, 0xbe, 0xb4, 0xd9],
            Network::Testnet => [0x0b, 0x11, 0x09, 0x07],
            Network::Regtest => [0xfa, 0xbf, 0xb5, 0xda],
        }
    }

    /// Looks up the network whose magic bytes match, if any.
    pub fn from_magic(magic: [u8; 4]) -> Option<Network> {
        [Network::Mainnet, Network::Testnet, Network::Regtest]
            .iter()
            .copied()
            .find(|n| n.magic() == magic)
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Network::Mainnet => "Mainnet",
            Network::Testnet => "Testnet",
            Network::Regtest => "Regtest",
        };
        f.write_str(s)
    }
}
