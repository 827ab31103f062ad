//! Gossiped peer addresses, as carried in the `addr` message.

use std::io::{Read, Write};
use std::net::SocketAddr;

use bdv_chain::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};
use chrono::{DateTime, TimeZone, Utc};

use crate::protocol::external::types::PeerServices;

/// One entry of an `addr` message: a peer's address, the services it last
/// advertised, and when that was last seen true.
///
/// [Bitcoin reference](https://en.bitcoin.it/wiki/Protocol_documentation#addr)
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MetaAddr {
    /// The peer's address and port.
    pub addr: SocketAddr,
    /// Services the peer advertised as of `last_seen`.
    pub services: PeerServices,
    /// The last time this address was seen offering `services`.
    pub last_seen: DateTime<Utc>,
}

impl BitcoinSerialize for MetaAddr {
    fn bitcoin_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        (self.last_seen.timestamp() as u32).bitcoin_serialize(&mut writer)?;
        self.services.bitcoin_serialize(&mut writer)?;
        self.addr.bitcoin_serialize(&mut writer)
    }
}

impl BitcoinDeserialize for MetaAddr {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let timestamp = u32::bitcoin_deserialize(&mut reader)?;
        let services = PeerServices::bitcoin_deserialize(&mut reader)?;
        let addr = SocketAddr::bitcoin_deserialize(&mut reader)?;
        Ok(MetaAddr {
            addr,
            services,
            last_seen: Utc.timestamp(timestamp as i64, 0),
        })
    }
}
