//! A single zero-confirmation transaction's resolution state as it moves
//! through the parser pipeline (spec §4.4, §9 design note).
//!
//! `InputResolution` never pointer-chases a spent output back through a
//! chain of unconfirmed parents: every lookup goes through TXHINTS/STXO
//! (mined) or the *current* snapshot (unconfirmed), so a tx's resolution is
//! always relative to one consistent view of the pool rather than whatever
//! state existed when an ancestor was first parsed.

use std::sync::Arc;

use bdv_chain::amount::{Amount, NonNegative};
use bdv_chain::transaction::{self, Transaction};
use bdv_store::keys::DbKey;
use bdv_store::scr_addr::ScrAddr;

/// A TxIO pair's output half's address, keyed by the owning tx's zc key and
/// output index — what [`crate::snapshot::Pool`]'s denormalized maps index
/// on (spec §3 "TxIO pair").
pub type TxioKey = (DbKey, u16);

/// The atomic unit of per-scrAddr mempool activity (spec §3 "TxIO pair"):
/// one unconfirmed output plus, once another pool tx spends it, the db key
/// of whatever spends it.
#[derive(Clone, Debug, PartialEq)]
pub struct TxIoPair {
    pub scr_addr: ScrAddr,
    pub output_key: TxioKey,
    pub value: Amount<NonNegative>,
    /// The zc key of the tx spending this output, if any pool tx does.
    pub spender_key: Option<DbKey>,
    pub is_coinbase: bool,
    pub is_rbf: bool,
    pub is_chained_zc: bool,
}

impl TxIoPair {
    /// Never persisted, always recomputed from `spender_key` (spec §3 "UTXO
    /// flag").
    pub fn is_utxo(&self) -> bool {
        self.spender_key.is_none()
    }
}

/// Where a single input's spent output was found, resolved fresh against
/// the snapshot on every (re-)resolution pass rather than cached across
/// them (spec §4.4 "never pointer-chase").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InputResolution {
    /// The spent output is already mined, at this DB key.
    Mined(DbKey),
    /// The spent output is itself an unconfirmed output, at this ZC key.
    Zc(DbKey),
    /// Neither the mined UTXO set nor the current pool has this outpoint
    /// yet; the input stays unresolved until the parser is re-run.
    Unresolved,
}

/// A parsed transaction's lifecycle state (spec §4.4 step 1-2).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxState {
    /// Freshly deserialized, no resolution attempted yet.
    Uninitialized,
    /// Every input resolved; ready to commit.
    Resolved,
    /// At least one input resolved to another unconfirmed tx that is
    /// itself not yet `Resolved`; this tx is re-queued behind it.
    ResolveAgain,
    /// At least one input has no known spent output anywhere.
    Unresolved,
    /// Turned out to reference a transaction that is already mined under
    /// the same hash (a node reflecting our own broadcast back to us).
    Mined,
    /// Failed basic structural checks (deserialization, duplicate inputs,
    /// spending an already-spent-and-confirmed output).
    Invalid,
    /// Already being tracked, or excluded by policy (AlreadyInMempool/
    /// AlreadyInChain): drop without further processing.
    Skip,
}

/// One tx as the parser sees it, carrying its own resolution scratch space
/// between passes (spec §4.4).
#[derive(Clone)]
pub struct ParsedTx {
    pub hash: transaction::Hash,
    pub tx: Arc<Transaction>,
    pub zc_key: DbKey,
    pub state: TxState,
    /// Resolution of each input, in input order; `Unresolved` entries are
    /// what `ResolveAgain`/`Unresolved` states are keyed off of.
    pub input_resolution: Vec<InputResolution>,
    /// The union of every scrAddr this tx's outputs and (resolved) inputs
    /// touch that some session has registered (spec §4.4 "Filter").
    pub scr_addrs_touched: Vec<ScrAddr>,
    /// This tx's own outputs as TxIO pairs, in output order (spec §3) —
    /// what [`crate::snapshot::Pool::insert`] folds into its
    /// scrAddr→txio-key and zcKey→outIdx→TxIOPair maps.
    pub output_txios: Vec<TxIoPair>,
    /// Whether any input opts in to replace-by-fee (BIP125: a sequence
    /// number below the no-RBF floor).
    pub is_rbf: bool,
    /// Whether any input spends an output of another still-unconfirmed tx
    /// (spec §3 "chained ZC" status flag).
    pub is_chained_zc: bool,
    pub first_seen: std::time::Instant,
}

/// Inputs below this sequence number signal BIP125 opt-in replace-by-fee.
const RBF_SEQUENCE_FLOOR: u32 = 0xffff_fffe;

impl ParsedTx {
    pub fn new(zc_key: DbKey, tx: Arc<Transaction>) -> ParsedTx {
        let hash = tx.hash();
        let input_count = tx.inputs.len();
        let is_rbf = tx.inputs.iter().any(|input| match input {
            bdv_chain::transparent::Input::PrevOut { sequence, .. } => *sequence < RBF_SEQUENCE_FLOOR,
            bdv_chain::transparent::Input::Coinbase { .. } => false,
        });
        ParsedTx {
            hash,
            tx,
            zc_key,
            state: TxState::Uninitialized,
            input_resolution: vec![InputResolution::Unresolved; input_count],
            scr_addrs_touched: Vec::new(),
            output_txios: Vec::new(),
            is_rbf,
            is_chained_zc: false,
            first_seen: std::time::Instant::now(),
        }
    }

    pub fn is_fully_resolved(&self) -> bool {
        self.input_resolution
            .iter()
            .all(|r| !matches!(r, InputResolution::Unresolved))
    }
}

impl std::fmt::Debug for ParsedTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedTx")
            .field("hash", &self.hash)
            .field("zc_key", &self.zc_key)
            .field("state", &self.state)
            .finish()
    }
}
