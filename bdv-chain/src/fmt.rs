//! Small formatting helpers shared across the data model.

use std::fmt;

/// Wraps a `Display` value so it can be used in a `Debug` field list,
/// printing the `Display` representation instead of a `Debug` derive.
///
/// Used for hash fields, where `Display` already reverses the byte order
/// into the conventional big-endian hex string.
pub struct DisplayToDebug<T>(pub T);

impl<T: fmt::Display> fmt::Debug for DisplayToDebug<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
