//! Configurable limits for bounded decoding.

/// Wire-level limits for message decoding.
///
/// These limits are enforced before any body iteration so a hostile or
/// corrupted datagram cannot force large allocations downstream. Snapshot
/// size limits belong to the codec layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum message size in bytes.
    pub max_message_bytes: usize,

    /// Maximum length of a diff change mask in bytes.
    pub max_mask_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            // Largest UDP payload over IPv4
            max_message_bytes: 65_507,

            // One bit per 4-byte word of the largest message
            max_mask_bytes: 65_507 / 32 + 1,
        }
    }
}

impl Limits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_message_bytes: 4096,
            max_mask_bytes: 128,
        }
    }

    /// Creates limits with no restrictions (use with caution).
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_message_bytes: usize::MAX,
            max_mask_bytes: usize::MAX,
        }
    }
}
