use proptest::{arbitrary::any, prelude::*};

use crate::serialization::{BitcoinDeserializeInto, BitcoinSerialize};

use super::super::*;

proptest! {
    #[test]
    fn block_hash_roundtrip(hash in any::<Hash>()) {
        bdv_test::init();

        let bytes = hash.bitcoin_serialize_to_vec()?;
        let other_hash: Hash = bytes.bitcoin_deserialize_into()?;

        prop_assert_eq![hash, other_hash];
    }

    #[test]
    fn block_hash_display_fromstr_roundtrip(hash in any::<Hash>()) {
        bdv_test::init();

        let display = format!("{}", hash);
        let parsed = display.parse::<Hash>().expect("hash should parse");
        prop_assert_eq!(hash, parsed);
    }

    #[test]
    fn blockheader_roundtrip(header in any::<Header>()) {
        bdv_test::init();

        let bytes = header.bitcoin_serialize_to_vec().unwrap();
        let other_header: Header = bytes.bitcoin_deserialize_into()?;

        prop_assert_eq![header, other_header];
    }

    #[test]
    fn partial_chain_heights_increase(blocks in Block::partial_chain_strategy(Height(1), 8)) {
        bdv_test::init();

        for (i, block) in blocks.iter().enumerate() {
            prop_assert_eq!(block.coinbase_height(), Some(Height(1 + i as u32)));
        }
    }
}
