//! The wire-level command and reply shapes: every operation a
//! connected client can issue, and the reply each one produces. The actual
//! wire encoding of these is a transport concern left to whatever `bdvd`
//! wires a session up to; this module only defines the typed surface
//! [`crate::session::Session::dispatch`] accepts and returns.

use serde::{Deserialize, Serialize};

use bdv_chain::{block, transaction};
use bdv_store::keys::DbKey;
use bdv_store::records::StoredHeader;
use bdv_store::scr_addr::ScrAddr;

use crate::wallet::{RefreshId, WalletId};

/// One command body, carried inside a [`crate::reassembly::ReassemblyBuffer`]
/// envelope keyed by a monotonic message id.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Command {
    /// Declares the client's protocol magic and begins the handshake.
    RegisterBdv { magic: [u8; 4] },

    RegisterWallet {
        wallet_id: WalletId,
        scr_addrs: Vec<ScrAddr>,
        is_new: bool,
        registration_id: RefreshId,
    },
    RegisterLockbox {
        wallet_id: WalletId,
        scr_addrs: Vec<ScrAddr>,
        registration_id: RefreshId,
    },
    UnregisterAddresses {
        wallet_id: WalletId,
        scr_addrs: Vec<ScrAddr>,
        registration_id: RefreshId,
    },

    /// Declares the client ready to receive `new_block`/`zc`/`refresh`
    /// notifications.
    GoOnline,

    HeaderByHash {
        hash: block::Hash,
    },
    HeaderByHeight {
        height: block::Height,
    },

    TxByHash {
        hash: transaction::Hash,
    },
    TxsByHash {
        hashes: Vec<transaction::Hash>,
    },
    TxHeightOnly {
        hash: transaction::Hash,
    },

    WalletBalance {
        wallet_id: WalletId,
    },
    CombinedBalance {
        wallet_ids: Vec<WalletId>,
    },
    WalletTxCount {
        wallet_id: WalletId,
    },

    /// Selects enough unspent outputs to cover `target_value`, preferring
    /// two outputs over many small ones when a single large one isn't
    /// available.
    SpendableUtxosForValue {
        wallet_id: WalletId,
        target_value: i64,
    },
    RbfUtxos {
        wallet_id: WalletId,
    },

    AddressBook {
        wallet_id: WalletId,
    },

    LedgerPageCount {
        wallet_id: WalletId,
    },
    LedgerPage {
        wallet_id: WalletId,
        page: u32,
    },

    FeeEstimate {
        target_blocks: u32,
    },
    FeeSchedule,

    /// Confirmed plus zero-conf spentness of an arbitrary output, not
    /// restricted to outputs this session's wallets own.
    SpentnessForOutput {
        tx_key: DbKey,
        out_index: u16,
    },

    /// Every outpoint touching `scr_addr` since `since_height`, also
    /// considering unconfirmed activity at or above `since_zc_id`.
    OutpointsForAddressSince {
        scr_addr: ScrAddr,
        since_height: block::Height,
        since_zc_id: u32,
    },
    UtxosForAddress {
        scr_addr: ScrAddr,
        include_zc: bool,
    },

    BroadcastZc {
        raw_txs: Vec<Vec<u8>>,
    },
    BroadcastThroughRpc {
        raw_tx: Vec<u8>,
    },

    Shutdown {
        cookie: Vec<u8>,
    },
    ShutdownNode {
        cookie: Vec<u8>,
    },
}

/// One reply body, produced in response to a [`Command`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Reply {
    Registered,
    Refresh {
        registration_id: RefreshId,
    },
    OnlineAck,

    Header(StoredHeader),
    Tx(Vec<u8>),
    Txs(Vec<Vec<u8>>),
    TxHeight(Option<(block::Height, u8)>),

    Balance {
        confirmed: i64,
        unconfirmed: i64,
    },
    TxCount(u64),

    Utxos(Vec<UtxoView>),

    AddressBook(Vec<ScrAddr>),

    LedgerPageCount(u32),
    LedgerPage(Vec<LedgerPageEntry>),

    FeeEstimate {
        sat_per_kb: u64,
    },
    FeeSchedule(Vec<(u32, u64)>),

    Spentness {
        confirmed_spender: Option<DbKey>,
        zc_spender: Option<DbKey>,
    },

    Outpoints(Vec<(DbKey, u16)>),

    BroadcastAccepted {
        hashes: Vec<transaction::Hash>,
    },

    ShutdownAck,
}

/// One spendable output as returned to a client, independent of the
/// internal [`bdv_store::records::StxoRecord`]/[`bdv_store::records::
/// TxioEntry`] shapes those are read out of.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UtxoView {
    pub tx_key: DbKey,
    pub out_index: u16,
    pub value: i64,
    pub scr_addr: ScrAddr,
    pub height: Option<block::Height>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerPageEntry {
    pub tx_key: DbKey,
    pub scr_addr: ScrAddr,
    pub value_delta: i64,
    pub height: Option<block::Height>,
}
