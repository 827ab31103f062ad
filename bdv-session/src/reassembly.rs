//! Strict-order message reassembly: "messages carry a monotonic
//! id; the session reassembles multi-packet messages and processes them
//! strictly in id order." A session may receive packet id 4 before id 3
//! (two different worker threads drained them off the shared queue out of
//! order); the reassembly buffer holds id 4 back until id 3 has been
//! processed.

use std::collections::BTreeMap;

/// Buffers out-of-order arrivals and releases them strictly in ascending
/// id order, with no gaps.
pub struct ReassemblyBuffer<T> {
    next_expected: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> Default for ReassemblyBuffer<T> {
    fn default() -> Self {
        ReassemblyBuffer::new()
    }
}

impl<T> ReassemblyBuffer<T> {
    pub fn new() -> Self {
        ReassemblyBuffer {
            next_expected: 1,
            pending: BTreeMap::new(),
        }
    }

    pub fn last_processed(&self) -> u64 {
        self.next_expected.saturating_sub(1)
    }

    /// Buffers `item` under `id`. A duplicate id (a retransmit) silently
    /// replaces the pending copy rather than erroring, since a retransmit
    /// is always byte-identical.
    pub fn push(&mut self, id: u64, item: T) {
        if id < self.next_expected {
            return; // already processed; a stale retransmit
        }
        self.pending.insert(id, item);
    }

    /// Drains every buffered message that is now ready to process in
    /// order, starting from whatever id comes next. Returns them in the
    /// order they must be processed.
    pub fn drain_ready(&mut self) -> Vec<T> {
        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next_expected) {
            ready.push(item);
            self.next_expected += 1;
        }
        ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn releases_buffered_messages_in_order_once_the_gap_is_filled() {
        let mut buf = ReassemblyBuffer::new();
        buf.push(2, "second");
        buf.push(4, "fourth");
        assert!(buf.drain_ready().is_empty());

        buf.push(1, "first");
        assert_eq!(buf.drain_ready(), vec!["first", "second"]);

        buf.push(3, "third");
        assert_eq!(buf.drain_ready(), vec!["third", "fourth"]);
        assert_eq!(buf.last_processed(), 4);
    }

    #[test]
    fn a_stale_retransmit_below_the_watermark_is_dropped() {
        let mut buf: ReassemblyBuffer<&str> = ReassemblyBuffer::new();
        buf.push(1, "first");
        assert_eq!(buf.drain_ready(), vec!["first"]);
        buf.push(1, "first-again");
        assert!(buf.drain_ready().is_empty());
    }
}
