//! The 12-byte, NUL-padded ASCII command name carried in every message header.

use std::io::Read;

use bdv_chain::serialization::{BitcoinDeserialize, SerializationError};

/// Identifies which [`super::Message`] variant a header's body holds.
///
/// `Alert` is kept even though the message itself is never constructed
/// (deprecated and insecure) so a peer that still sends one is recognized
/// and dropped, rather than tripping the "unknown command" error path.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Command {
    Addr,
    Alert,
    Block,
    BlockTxn,
    CmpctBlock,
    FeeFilter,
    FilterAdd,
    FilterClear,
    FilterLoad,
    GetAddr,
    GetBlocks,
    GetBlockTxn,
    GetData,
    GetHeaders,
    Headers,
    Inv,
    MemPool,
    MerkleBlock,
    NotFound,
    Ping,
    Pong,
    Reject,
    SendCmpct,
    SendHeaders,
    Tx,
    Verack,
    Version,
}

impl Command {
    /// The 12-byte, NUL-padded wire representation of this command.
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Command::Addr => b"addr\0\0\0\0\0\0\0\0",
            Command::Alert => b"alert\0\0\0\0\0\0\0",
            Command::Block => b"block\0\0\0\0\0\0\0",
            Command::BlockTxn => b"blocktxn\0\0\0\0",
            Command::CmpctBlock => b"cmpctblock\0\0",
            Command::FeeFilter => b"feefilter\0\0\0",
            Command::FilterAdd => b"filteradd\0\0\0",
            Command::FilterClear => b"filterclear\0",
            Command::FilterLoad => b"filterload\0\0",
            Command::GetAddr => b"getaddr\0\0\0\0\0",
            Command::GetBlocks => b"getblocks\0\0\0",
            Command::GetBlockTxn => b"getblocktxn\0",
            Command::GetData => b"getdata\0\0\0\0\0",
            Command::GetHeaders => b"getheaders\0\0",
            Command::Headers => b"headers\0\0\0\0\0",
            Command::Inv => b"inv\0\0\0\0\0\0\0\0\0",
            Command::MemPool => b"mempool\0\0\0\0\0",
            Command::MerkleBlock => b"merkleblock\0",
            Command::NotFound => b"notfound\0\0\0\0",
            Command::Ping => b"ping\0\0\0\0\0\0\0\0",
            Command::Pong => b"pong\0\0\0\0\0\0\0\0",
            Command::Reject => b"reject\0\0\0\0\0\0",
            Command::SendCmpct => b"sendcmpct\0\0\0",
            Command::SendHeaders => b"sendheaders\0",
            Command::Tx => b"tx\0\0\0\0\0\0\0\0\0\0",
            Command::Verack => b"verack\0\0\0\0\0\0",
            Command::Version => b"version\0\0\0\0\0",
        }
    }
}

impl BitcoinDeserialize for Command {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let bytes = <[u8; 12]>::bitcoin_deserialize(&mut reader)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(12);
        match &bytes[..end] {
            b"addr" => Ok(Command::Addr),
            b"alert" => Ok(Command::Alert),
            b"block" => Ok(Command::Block),
            b"blocktxn" => Ok(Command::BlockTxn),
            b"cmpctblock" => Ok(Command::CmpctBlock),
            b"feefilter" => Ok(Command::FeeFilter),
            b"filteradd" => Ok(Command::FilterAdd),
            b"filterclear" => Ok(Command::FilterClear),
            b"filterload" => Ok(Command::FilterLoad),
            b"getaddr" => Ok(Command::GetAddr),
            b"getblocks" => Ok(Command::GetBlocks),
            b"getblocktxn" => Ok(Command::GetBlockTxn),
            b"getdata" => Ok(Command::GetData),
            b"getheaders" => Ok(Command::GetHeaders),
            b"headers" => Ok(Command::Headers),
            b"inv" => Ok(Command::Inv),
            b"mempool" => Ok(Command::MemPool),
            b"merkleblock" => Ok(Command::MerkleBlock),
            b"notfound" => Ok(Command::NotFound),
            b"ping" => Ok(Command::Ping),
            b"pong" => Ok(Command::Pong),
            b"reject" => Ok(Command::Reject),
            b"sendcmpct" => Ok(Command::SendCmpct),
            b"sendheaders" => Ok(Command::SendHeaders),
            b"tx" => Ok(Command::Tx),
            b"verack" => Ok(Command::Verack),
            b"version" => Ok(Command::Version),
            _ => Err(SerializationError::Parse("unrecognized command string")),
        }
    }
}
