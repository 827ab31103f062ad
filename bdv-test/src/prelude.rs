//! Common imports for integration and property tests across the workspace.

pub use color_eyre::eyre::{eyre, Report};
pub use proptest::prelude::*;

pub use crate::init;

/// The `Result` alias most tests return so they can use `?` on eyre
/// `Report`s and proptest's `TestCaseError`.
pub type Result<T> = color_eyre::eyre::Result<T>;
