//! Per-client session state, command dispatch, and notification fan-out
//! for connected BDV clients: the layer between a running server's shared
//! KV store/header index/mempool and whatever transport actually carries
//! bytes to and from a client.
//!
//! A [`session::Session`] owns one client's registered wallets and
//! reassembles its commands into strict message-id order before
//! dispatching them; a [`registry::SessionRegistry`] tracks every live
//! session and keeps the process-wide watched-scrAddr set the mempool
//! parser filters against up to date; [`notification::NotificationDispatcher`]
//! fans server-side events back out to whichever sessions care, serialized
//! per session the same way command dispatch is.

pub mod command;
pub mod error;
pub mod notification;
pub mod reassembly;
pub mod registry;
pub mod session;
pub mod spinlock;
pub mod wallet;

pub use error::{Error, Result};
pub use registry::SessionRegistry;
pub use session::{DispatchOutcome, Session, SharedServices};

/// A connection's opaque identifier, assigned by whatever accepts the
/// underlying transport connection (a 10-byte id, matching the size BDV
/// clients historically negotiate a session under).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct BdvId(pub [u8; 10]);
