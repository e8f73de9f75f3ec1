use std::fmt::{Display, Formatter};
use std::ops::AddAssign;

/// Sequence number of a message in a stream. Sequence numbers are 1-based and strictly
///  monotonic; `ZERO` means 'no message yet' (an empty log, an empty recovery buffer).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SequenceNumber(u64);

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);
    /// the first sequence number assigned on a fresh stream
    pub const FIRST: SequenceNumber = SequenceNumber(1);

    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(
            self.0.checked_add(1)
                .expect("sequence number space exhausted")
        )
    }

    pub fn plus(&self, offset: u64) -> SequenceNumber {
        SequenceNumber(
            self.0.checked_add(offset)
                .expect("sequence number space exhausted")
        )
    }

    pub fn checked_minus(&self, other: SequenceNumber) -> Option<u64> {
        self.0.checked_sub(other.0)
    }

    /// iterates over the half-open range `[self, end)`
    pub fn to(self, end: SequenceNumber) -> impl Iterator<Item = SequenceNumber> {
        (self.0..end.0).map(SequenceNumber)
    }
}

impl AddAssign<u64> for SequenceNumber {
    fn add_assign(&mut self, rhs: u64) {
        self.0 = self.0.checked_add(rhs)
            .expect("sequence number space exhausted");
    }
}
