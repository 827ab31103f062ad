//! Protocol constants used when speaking to a local Bitcoin node.

use crate::protocol::external::types::ProtocolVersion;

/// The protocol version BDV advertises in its own `version` message.
///
/// 70015 is the version that introduced `sendheaders` and `feefilter`,
/// both of which the codec understands; there's no reason to advertise less.
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion(70015);

/// The user agent string BDV advertises in its `version` message.
pub const USER_AGENT: &str = "/bdv:1.0.0-alpha.1/";
