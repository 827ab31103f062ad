//! A single registered wallet's watched address set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use bdv_store::scr_addr::ScrAddr;

/// A client-supplied wallet (or lockbox) identifier, opaque to this crate.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct WalletId(pub Vec<u8>);

/// A registration request's completion marker:
/// every `register_wallet`/`register_lockbox`/`unregister_addresses` call
/// is asynchronous and completes via a `refresh` notification carrying
/// this id back to the caller.
pub type RefreshId = u32;

/// One wallet a session has registered, and the scrAddrs it watches.
///
/// `is_new` distinguishes a wallet that has never been scanned before (so
/// its addresses need a full-history scan once the session goes online)
/// from one a client is simply re-registering after reconnecting.
#[derive(Clone, Debug)]
pub struct WalletRegistration {
    pub id: WalletId,
    pub is_new: bool,
    pub is_lockbox: bool,
    pub scr_addrs: HashSet<ScrAddr>,
    /// Set once this wallet's initial scan (or the scan of whatever
    /// addresses were most recently added to it) has completed and its
    /// `refresh` notification has been sent.
    pub scan_complete: bool,
    /// The `registrationId` of whichever `register_wallet`/`register_lockbox`
    /// call is still owed its scan — what `go_online` replays once the
    /// session comes online, if the wallet was registered while offline.
    pub registration_id: RefreshId,
}

impl WalletRegistration {
    pub fn new(
        id: WalletId,
        scr_addrs: HashSet<ScrAddr>,
        is_new: bool,
        is_lockbox: bool,
        registration_id: RefreshId,
    ) -> Self {
        WalletRegistration {
            id,
            is_new,
            is_lockbox,
            scr_addrs,
            scan_complete: false,
            registration_id,
        }
    }
}
