use proptest::prelude::*;

use crate::serialization::{BitcoinDeserialize, BitcoinSerialize};

use super::{CoinbaseData, Input, OutPoint, Output};

proptest! {
    #[test]
    fn outpoint_roundtrip(outpoint in any::<OutPoint>()) {
        bdv_test::init();

        let bytes = outpoint.bitcoin_serialize_to_vec().unwrap();
        let other = OutPoint::bitcoin_deserialize(&bytes[..])?;

        prop_assert_eq![outpoint, other];
    }

    #[test]
    fn output_roundtrip(output in any::<Output>()) {
        bdv_test::init();

        let bytes = output.bitcoin_serialize_to_vec().unwrap();
        let other = Output::bitcoin_deserialize(&bytes[..])?;

        prop_assert_eq![output, other];
    }

    #[test]
    fn prevout_input_roundtrip(input in any::<Input>()) {
        bdv_test::init();

        let bytes = input.bitcoin_serialize_to_vec().unwrap();
        let other = Input::bitcoin_deserialize(&bytes[..])?;

        prop_assert_eq![input, other];
    }

    #[test]
    fn coinbase_data_roundtrip(data in any::<CoinbaseData>()) {
        bdv_test::init();

        let bytes = data.bitcoin_serialize_to_vec().unwrap();
        let other = CoinbaseData::bitcoin_deserialize(&bytes[..])?;

        prop_assert_eq![data, other];
    }
}
