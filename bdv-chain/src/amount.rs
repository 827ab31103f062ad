//! Bitcoin amounts, denominated in satoshis.

use std::{
    fmt,
    io::{self, Read, Write},
    marker::PhantomData,
};

use thiserror::Error;

use crate::serialization::{BitcoinDeserialize, BitcoinSerialize, SerializationError};

/// The maximum number of satoshis that will ever exist (21 million BTC).
pub const MAX_MONEY: i64 = 21_000_000 * 100_000_000;

/// A constraint on the range an [`Amount`] may take.
pub trait Constraint: Copy + Clone {
    /// Check that `value` satisfies this constraint.
    fn validate(value: i64) -> Result<i64, AmountError>;
}

/// Marker type: an [`Amount`] that must be non-negative (an output value, a
/// UTXO balance, a fee rate). This is the constraint used for everything the
/// BDV KV store persists.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NonNegative;

impl Constraint for NonNegative {
    fn validate(value: i64) -> Result<i64, AmountError> {
        if value < 0 {
            return Err(AmountError::Negative(value));
        }
        if value > MAX_MONEY {
            return Err(AmountError::TooLarge(value));
        }
        Ok(value)
    }
}

/// Marker type: an [`Amount`] that may be negative (a ledger-entry delta, a
/// net wallet balance change).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NegativeAllowed;

impl Constraint for NegativeAllowed {
    fn validate(value: i64) -> Result<i64, AmountError> {
        if value.abs() > MAX_MONEY {
            return Err(AmountError::TooLarge(value));
        }
        Ok(value)
    }
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmountError {
    #[error("amount {0} is negative, which this constraint forbids")]
    Negative(i64),
    #[error("amount {0} exceeds the maximum possible number of satoshis")]
    TooLarge(i64),
}

/// An amount of satoshis, constrained by `C` to a valid range.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Amount<C = NonNegative>(i64, #[serde(skip)] PhantomData<C>);

impl<C: Constraint> Amount<C> {
    pub fn zero() -> Self {
        Amount(0, PhantomData)
    }

    pub fn try_from(value: i64) -> Result<Self, AmountError> {
        Ok(Amount(C::validate(value)?, PhantomData))
    }

    pub fn i64(self) -> i64 {
        self.0
    }
}

impl<C> fmt::Debug for Amount<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Amount").field(&self.0).finish()
    }
}

impl<C> fmt::Display for Amount<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<C: Constraint> std::ops::Add for Amount<C> {
    type Output = Amount<C>;

    fn add(self, rhs: Self) -> Self::Output {
        Amount::try_from(self.0 + rhs.0).expect("adding two valid amounts stays in range")
    }
}

impl<C: Constraint> BitcoinSerialize for Amount<C> {
    fn bitcoin_serialize<W: Write>(&self, mut target: W) -> Result<(), io::Error> {
        self.0.bitcoin_serialize(&mut target)
    }
}

impl<C: Constraint> BitcoinDeserialize for Amount<C> {
    fn bitcoin_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let raw = i64::bitcoin_deserialize(&mut reader)?;
        Amount::try_from(raw).map_err(|_| SerializationError::Parse("amount out of range"))
    }
}

#[cfg(any(test, feature = "proptest-impl"))]
impl<C: Constraint + 'static> proptest::arbitrary::Arbitrary for Amount<C> {
    type Parameters = ();
    type Strategy = proptest::strategy::BoxedStrategy<Self>;

    fn arbitrary_with(_args: ()) -> Self::Strategy {
        use proptest::prelude::*;
        (0i64..=MAX_MONEY)
            .prop_map(|v| Amount::try_from(v).expect("value is in range"))
            .boxed()
    }
}
