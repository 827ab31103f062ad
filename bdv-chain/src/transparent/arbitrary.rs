use proptest::{collection::vec, prelude::*};

use super::{CoinbaseData, Input, OutPoint, Output, Script};

impl Arbitrary for CoinbaseData {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        vec(any::<u8>(), 2..100).prop_map(CoinbaseData).boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

/// Only generates `PrevOut` inputs. Coinbase inputs are only ever valid in
/// the first position of a block's transaction list, so `Input::vec_strategy`
/// below builds them separately rather than through this general strategy.
impl Arbitrary for Input {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<OutPoint>(), any::<Script>(), any::<u32>())
            .prop_map(|(outpoint, unlock_script, sequence)| Input::PrevOut {
                outpoint,
                unlock_script,
                sequence,
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Input {
    /// Generates a vector of `len + 1` inputs: one coinbase input followed by
    /// `len` ordinary prevout inputs, mirroring every real block but the
    /// genesis block.
    pub fn vec_strategy(len: usize) -> BoxedStrategy<Vec<Input>> {
        let coinbase = (any::<CoinbaseData>(), any::<u32>()).prop_map(|(data, sequence)| {
            Input::Coinbase {
                height: None,
                data,
                sequence,
            }
        });
        let remainder = vec(any::<Input>(), len);

        (coinbase, remainder)
            .prop_map(|(first, mut rest)| {
                rest.insert(0, first);
                rest
            })
            .boxed()
    }
}

impl Output {
    pub fn vec_strategy(len: usize) -> BoxedStrategy<Vec<Output>> {
        vec(any::<Output>(), 0..=len).boxed()
    }
}
