use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::{arbitrary::any, collection::vec, prelude::*};

use crate::{block, cached::Cached, transparent};

use super::{LockTime, Transaction};

impl Transaction {
    /// Generates a vector of transactions for a single block: the first is
    /// always a coinbase transaction, followed by `len` ordinary transactions.
    pub fn vec_strategy(len: usize) -> BoxedStrategy<Vec<Arc<Self>>> {
        let coinbase = Transaction::coinbase_strategy().prop_map(Arc::new);
        let remainder = vec(any::<Transaction>().prop_map(Arc::new), len);

        (coinbase, remainder)
            .prop_map(|(first, mut rest)| {
                rest.insert(0, first);
                rest
            })
            .boxed()
    }

    fn coinbase_strategy() -> BoxedStrategy<Self> {
        (
            transparent::Input::vec_strategy(0),
            vec(any::<transparent::Output>(), 1..10),
            any::<LockTime>(),
        )
            .prop_map(|(inputs, outputs, locktime)| Transaction {
                version: 1,
                inputs,
                outputs,
                locktime,
                hash: Cached::new(),
            })
            .boxed()
    }
}

impl Arbitrary for LockTime {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        prop_oneof![
            (block::Height::MIN.0..=block::Height::MAX.0)
                .prop_map(|n| LockTime::Height(block::Height(n))),
            (LockTime::MIN_TIMESTAMP..=LockTime::MAX_TIMESTAMP)
                .prop_map(|n| LockTime::Time(Utc.timestamp(n as i64, 0)))
        ]
        .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Arbitrary for Transaction {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            vec(any::<transparent::Input>(), 1..10),
            vec(any::<transparent::Output>(), 0..10),
            any::<LockTime>(),
        )
            .prop_map(|(inputs, outputs, locktime)| Transaction {
                version: 1,
                inputs,
                outputs,
                locktime,
                hash: Cached::new(),
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
