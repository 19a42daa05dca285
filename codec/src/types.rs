//! Sequence-space arithmetic over the wrapping 16-bit snapshot counter.

use std::fmt;

/// A snapshot sequence number.
///
/// Sequence ids wrap at 65536 and are only ever compared through
/// [`distance`](Self::distance). Comparisons are meaningful while the two
/// ids are less than 32768 ticks apart, the same rule TCP applies to its
/// sequence numbers. Sessions that silently desynchronize for longer than
/// that will misorder ids; this is an accepted limitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SequenceId(u16);

impl SequenceId {
    /// The first id a sender assigns.
    pub const ZERO: Self = Self(0);

    /// Creates a sequence id.
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Returns the following id, wrapping after 65535.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }

    /// Signed distance from `other` to `self` (`self - other`), in ticks.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn distance(self, other: Self) -> i32 {
        self.0.wrapping_sub(other.0) as i16 as i32
    }

    /// Returns `true` if `self` was generated after `other`.
    #[must_use]
    pub const fn is_newer_than(self, other: Self) -> bool {
        self.distance(other) > 0
    }

    /// Returns `true` if `self` is at most `window` ticks away from
    /// `reference`, in either direction.
    #[must_use]
    pub const fn within_window(self, reference: Self, window: usize) -> bool {
        self.distance(reference).unsigned_abs() as usize <= window
    }

    /// Ring slot for this id in a history of `capacity` entries.
    ///
    /// The id is already unsigned, so slots are continuous across the
    /// 65535 -> 0 boundary whenever `capacity` divides 65536.
    #[must_use]
    pub const fn slot(self, capacity: usize) -> usize {
        self.0 as usize % capacity
    }
}

impl From<u16> for SequenceId {
    fn from(id: u16) -> Self {
        Self(id)
    }
}

impl From<SequenceId> for u16 {
    fn from(id: SequenceId) -> Self {
        id.0
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
