/// The maximum size of a Bitcoin block, in bytes.
pub const MAX_BLOCK_BYTES: u64 = 4_000_000;
