use std::sync::Arc;

use crate::work::difficulty::CompactDifficulty;

use super::*;

use chrono::{TimeZone, Utc};
use proptest::{
    arbitrary::{any, Arbitrary},
    collection::vec,
    prelude::*,
};

impl Arbitrary for Block {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (any::<Header>(), Transaction::vec_strategy(2))
            .prop_map(|(header, transactions)| Self {
                header,
                transactions,
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

impl Block {
    /// Returns a strategy for creating Vecs of blocks with increasing height,
    /// starting from `start_height`.
    pub fn partial_chain_strategy(start_height: Height, count: usize) -> BoxedStrategy<Vec<Arc<Self>>> {
        vec(Block::arbitrary_with(()), count)
            .prop_map(move |blocks| {
                blocks
                    .into_iter()
                    .enumerate()
                    .map(|(i, mut block)| {
                        block
                            .header
                            .set_reported_height(start_height.0 as usize + i);
                        Arc::new(block)
                    })
                    .collect()
            })
            .boxed()
    }
}

impl Arbitrary for Header {
    type Parameters = ();

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        (
            // version is interpreted as i32 in the spec, so we are limited to i32::MAX here
            (4u32..(i32::MAX as u32)),
            any::<Hash>(),
            any::<merkle::Root>(),
            // time is interpreted as u32 in the spec, but rust timestamps are i64
            (0i64..(u32::MAX as i64)),
            any::<CompactDifficulty>(),
            (0u32..(u32::MAX)),
        )
            .prop_map(
                |(
                    version,
                    previous_block_hash,
                    merkle_root,
                    timestamp,
                    difficulty_threshold,
                    nonce,
                )| {
                    Header::new(
                        version,
                        previous_block_hash,
                        merkle_root,
                        Utc.timestamp(timestamp, 0),
                        difficulty_threshold,
                        nonce,
                    )
                },
            )
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}
