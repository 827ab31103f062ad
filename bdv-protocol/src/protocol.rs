//! The Bitcoin P2P wire protocol: messages and their framing.

pub mod external;
