//! The Bitcoin P2P message boundary used by BDV's zero-confirmation watcher
//! and broadcast engine.
//!
//! This crate is deliberately narrow: it owns the wire format (the
//! [`protocol::external::Message`] enum and its [`protocol::external::Codec`])
//! and nothing about peer discovery, connection management, or handshake
//! orchestration. BDV only ever speaks to a single, operator-configured local
//! node, so there is no peer set, address book, or retry/backoff policy to
//! build here — just enough of the wire protocol for `bdv-mempool` to watch
//! `inv`/`tx` traffic and rebroadcast transactions via `getdata`/`tx`.

pub mod constants;
pub mod meta_addr;
pub mod protocol;

pub use meta_addr::MetaAddr;
pub use protocol::external::{Codec, InventoryHash, Message, Version};
