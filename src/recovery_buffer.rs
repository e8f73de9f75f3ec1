use std::collections::VecDeque;

use bytes::Bytes;

use crate::seq::SequenceNumber;

/// Bounded in-memory ring of the most recently transmitted encoded messages. Entries form
///  a contiguous sequence range `[low, high]` where `high` is the last transmitted
///  sequence number; inserting beyond the capacity evicts from the low end. Lookups are
///  O(1) index arithmetic. Anything evicted here is still resolvable from the recovery log.
pub struct RecoveryBuffer {
    capacity: usize,
    low: SequenceNumber,
    entries: VecDeque<Bytes>,
}

impl RecoveryBuffer {
    pub fn new(capacity: usize) -> RecoveryBuffer {
        assert!(capacity > 0, "recovery buffer capacity must be at least 1");
        RecoveryBuffer {
            capacity,
            low: SequenceNumber::ZERO,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// `(low, high)` of the retained range, `None` while empty.
    pub fn bounds(&self) -> Option<(SequenceNumber, SequenceNumber)> {
        if self.entries.is_empty() {
            None
        } else {
            Some((self.low, self.low.plus(self.entries.len() as u64 - 1)))
        }
    }

    pub fn insert(&mut self, seq: SequenceNumber, encoded: Bytes) {
        match self.bounds() {
            None => self.low = seq,
            Some((_, high)) => debug_assert_eq!(seq, high.next(), "recovery buffer entries must stay contiguous"),
        }

        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.low += 1;
        }
        self.entries.push_back(encoded);
    }

    pub fn lookup(&self, seq: SequenceNumber) -> Option<Bytes> {
        let idx = seq.checked_minus(self.low)?;
        self.entries.get(idx as usize).cloned()
    }

    /// The prefix of `[seq, seq + count)` that lies wholly inside the retained range. A
    ///  request starting below `low` gets nothing here (the caller supplements from the
    ///  log); a request reaching past `high` gets the in-buffer portion only.
    pub fn lookup_range(&self, seq: SequenceNumber, count: usize) -> Vec<Bytes> {
        let Some(start_idx) = seq.checked_minus(self.low) else {
            return Vec::new();
        };
        let start_idx = start_idx as usize;
        if start_idx >= self.entries.len() {
            return Vec::new();
        }

        let end_idx = self.entries.len().min(start_idx + count);
        self.entries.range(start_idx..end_idx).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.low = SequenceNumber::ZERO;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
