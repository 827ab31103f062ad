//! Known-good wire-format byte vectors, borrowed from real mainnet data
//! (the genesis block), for tests that need a realistic header/transaction
//! to deserialize without constructing one field-by-field.

use lazy_static::lazy_static;

fn unhex(s: &str) -> Vec<u8> {
    hex::decode(s).expect("vector is valid hex")
}

lazy_static! {
    /// The mainnet genesis block header, 80 bytes, wire order.
    pub static ref DUMMY_HEADER: Vec<u8> = unhex("0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c");

    /// The mainnet genesis block's single coinbase transaction, wire order.
    pub static ref DUMMY_TX1: Vec<u8> = unhex("01000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000");

    /// Just the coinbase input from [`DUMMY_TX1`] (outpoint, scriptSig, sequence).
    pub static ref DUMMY_INPUT1: Vec<u8> = unhex("0000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff");

    /// Just the single output from [`DUMMY_TX1`] (value, lock_script).
    pub static ref DUMMY_OUTPUT1: Vec<u8> = unhex("00f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac");
}
