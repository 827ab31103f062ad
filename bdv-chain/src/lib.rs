//! Core Bitcoin data types shared by the BDV server: blocks, transactions,
//! transparent outputs, and the consensus-critical wire serialization used
//! both on the P2P wire and inside the KV store's persisted records.
//!
//! This crate deliberately does not implement block or transaction
//! validation; it only parses and serializes. Validation is the upstream
//! node's and the header-chain organizer's job (see `bdv-store`).

#[macro_use]
extern crate serde;

pub mod amount;
pub mod block;
pub mod cached;
pub mod compactint;
pub mod fmt;
pub mod parameters;
pub mod serialization;
pub mod transaction;
pub mod transparent;
pub mod work;

pub use serialization::{BitcoinDeserialize, BitcoinDeserializeInto, BitcoinSerialize, SerializationError};
