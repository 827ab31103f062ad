//! `scrAddr`: the network-independent script identifier used as the key
//! into the SSH/Sub-SSH tables, grounded on `original_source/cppForSwig`'s
//! `BtcUtils` script-type tagging (a one-byte script-type tag followed by
//! the script's hash or raw bytes) rather than `bdv-chain::transparent::
//! Address`'s base58, network-bound address encoding — the KV store never
//! needs to round-trip through base58, and a single scrAddr must identify
//! the same script regardless of which network magic `bdv-chain::
//! transparent::Address` would encode it under.

use serde::{Deserialize, Serialize};

use bdv_chain::transparent::Script;

/// One-byte script-type tags, mirroring `cppForSwig/BtcUtils.h`'s
/// `TXOUT_SCRIPT_*` enumeration.
mod tag {
    pub const P2PKH: u8 = 0x00;
    pub const P2SH: u8 = 0x05;
    pub const P2PK_COMPRESSED: u8 = 0x01;
    pub const P2PK_UNCOMPRESSED: u8 = 0x02;
    pub const MULTISIG: u8 = 0xfe;
    pub const OP_RETURN: u8 = 0x6a;
    pub const NONSTANDARD: u8 = 0xff;
}

/// A network-independent script identifier: a one-byte type tag followed by
/// the script's hash (P2PKH/P2SH), public key (P2PK), or raw bytes
/// (nonstandard/multisig/OP_RETURN fallback).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ScrAddr(pub Vec<u8>);

impl ScrAddr {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Classifies `script` by its standard-template shape and returns the
    /// scrAddr BDV would file script-history activity under.
    pub fn from_script(script: &Script) -> ScrAddr {
        let bytes = &script.0;

        // OP_DUP OP_HASH160 <20> OP_EQUALVERIFY OP_CHECKSIG
        if bytes.len() == 25
            && bytes[0] == 0x76
            && bytes[1] == 0xa9
            && bytes[2] == 0x14
            && bytes[23] == 0x88
            && bytes[24] == 0xac
        {
            return ScrAddr::tagged(tag::P2PKH, &bytes[3..23]);
        }

        // OP_HASH160 <20> OP_EQUAL
        if bytes.len() == 23 && bytes[0] == 0xa9 && bytes[1] == 0x14 && bytes[22] == 0x87 {
            return ScrAddr::tagged(tag::P2SH, &bytes[2..22]);
        }

        // <33-byte compressed pubkey> OP_CHECKSIG
        if bytes.len() == 35 && bytes[0] == 0x21 && bytes[34] == 0xac {
            return ScrAddr::tagged(tag::P2PK_COMPRESSED, &bytes[1..34]);
        }

        // <65-byte uncompressed pubkey> OP_CHECKSIG
        if bytes.len() == 67 && bytes[0] == 0x41 && bytes[66] == 0xac {
            return ScrAddr::tagged(tag::P2PK_UNCOMPRESSED, &bytes[1..66]);
        }

        if bytes.first() == Some(&0x6a) {
            return ScrAddr::tagged(tag::OP_RETURN, bytes);
        }

        if bytes.last() == Some(&0xae) {
            // OP_CHECKMULTISIG
            return ScrAddr::tagged(tag::MULTISIG, bytes);
        }

        ScrAddr::tagged(tag::NONSTANDARD, bytes)
    }

    fn tagged(tag: u8, payload: &[u8]) -> ScrAddr {
        let mut buf = Vec::with_capacity(1 + payload.len());
        buf.push(tag);
        buf.extend_from_slice(payload);
        ScrAddr(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p2pkh_script(hash: [u8; 20]) -> Script {
        let mut v = vec![0x76, 0xa9, 0x14];
        v.extend_from_slice(&hash);
        v.push(0x88);
        v.push(0xac);
        Script(v)
    }

    #[test]
    fn classifies_p2pkh() {
        let hash = [7u8; 20];
        let scr = ScrAddr::from_script(&p2pkh_script(hash));
        assert_eq!(scr.0[0], tag::P2PKH);
        assert_eq!(&scr.0[1..], &hash[..]);
    }

    #[test]
    fn classifies_p2sh() {
        let mut v = vec![0xa9, 0x14];
        v.extend_from_slice(&[3u8; 20]);
        v.push(0x87);
        let scr = ScrAddr::from_script(&Script(v));
        assert_eq!(scr.0[0], tag::P2SH);
    }

    #[test]
    fn falls_back_to_nonstandard() {
        let scr = ScrAddr::from_script(&Script(vec![0x51, 0x52, 0x93]));
        assert_eq!(scr.0[0], tag::NONSTANDARD);
    }
}
