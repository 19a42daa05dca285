//! Word-level diff encoding and merging.
//!
//! Snapshots are compared in 4-byte words. Bit `i` of the change mask
//! (`mask[i / 8] & (1 << (i % 8))`) is set when word `i` of the new snapshot
//! differs from the base, and the changed words follow in ascending order.
//! A word the base does not fully cover is always sent, and so is a partial
//! tail word of the new snapshot.

use wire::{diff_body_len, mask_popcount, WireDiff, WORD_SIZE};

use crate::error::{CodecError, CodecResult, DiffReason};
use crate::scratch::DiffScratch;
use crate::SequenceId;

/// A diff against an earlier snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffMessage {
    /// Snapshot the diff applies to.
    pub base_id: SequenceId,
    /// Change mask over word positions.
    pub mask: Vec<u8>,
    /// Changed words in mask order.
    pub words: Vec<u32>,
}

impl DiffMessage {
    /// Copies a borrowed wire diff into an owned message.
    #[must_use]
    pub fn from_wire(diff: &WireDiff<'_>) -> Self {
        Self {
            base_id: SequenceId::new(diff.base_id),
            mask: diff.mask.to_vec(),
            words: diff.words().collect(),
        }
    }

    /// Exact size of the diff body on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        diff_body_len(self.mask.len(), self.words.len())
    }

    /// Returns `true` if word `index` is flagged as changed.
    #[must_use]
    pub fn is_changed(&self, index: usize) -> bool {
        self.mask
            .get(index / 8)
            .is_some_and(|byte| byte & (1 << (index % 8)) != 0)
    }

    /// Iterates changed word indices in ascending order.
    pub fn changed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        set_bits(&self.mask)
    }
}

/// Number of words needed to cover `len` bytes.
#[must_use]
pub const fn word_count(len: usize) -> usize {
    len.div_ceil(WORD_SIZE)
}

/// Number of mask bytes needed for `words` word positions.
#[must_use]
pub const fn mask_len(words: usize) -> usize {
    words.div_ceil(8)
}

/// Diffs `new` against `old`.
///
/// Returns `None` when the diff would not be strictly smaller than sending
/// `new` whole, unless `always_diff` is set. The returned vectors come from
/// `scratch`; hand them back with [`DiffScratch::recycle`] once sent.
pub fn encode_diff(
    base_id: SequenceId,
    new: &[u8],
    old: &[u8],
    always_diff: bool,
    scratch: &mut DiffScratch,
) -> Option<DiffMessage> {
    let words_total = word_count(new.len());
    let (mut mask, mut words) = scratch.take_vectors(mask_len(words_total));

    for (index, chunk) in new.chunks(WORD_SIZE).enumerate() {
        let start = index * WORD_SIZE;
        let unchanged = chunk.len() == WORD_SIZE
            && old
                .get(start..start + WORD_SIZE)
                .is_some_and(|prev| prev == chunk);
        if !unchanged {
            mask[index / 8] |= 1 << (index % 8);
            words.push(pack_word(chunk));
        }
    }

    if always_diff || diff_body_len(mask.len(), words.len()) < new.len() {
        Some(DiffMessage {
            base_id,
            mask,
            words,
        })
    } else {
        scratch.return_vectors(mask, words);
        None
    }
}

/// Applies `diff` on top of `base`, writing the result into `out`.
///
/// `out` is grown to cover the highest changed word when `base` is shorter.
/// The result may carry up to three padding bytes past the end of the new
/// snapshot; callers trim it with [`framed_len`](crate::framed_len).
pub fn merge_diff(
    base: &[u8],
    diff: &DiffMessage,
    out: &mut Vec<u8>,
    limit: usize,
) -> CodecResult<()> {
    merge_words(base, &diff.mask, diff.words.iter().copied(), out, limit)
}

pub(crate) fn merge_words<I>(
    base: &[u8],
    mask: &[u8],
    words: I,
    out: &mut Vec<u8>,
    limit: usize,
) -> CodecResult<()>
where
    I: ExactSizeIterator<Item = u32>,
{
    let mask_bits = mask_popcount(mask);
    if mask_bits != words.len() {
        return Err(CodecError::InvalidDiff {
            reason: DiffReason::WordCountMismatch {
                mask_bits,
                words: words.len(),
            },
        });
    }

    let highest = set_bits(mask).last();
    let needed = highest.map_or(0, |index| (index + 1) * WORD_SIZE);
    if needed > limit.saturating_add(WORD_SIZE - 1) {
        return Err(CodecError::InvalidDiff {
            reason: DiffReason::MergedTooLarge { needed, limit },
        });
    }

    out.clear();
    out.extend_from_slice(base);
    if out.len() < needed {
        out.resize(needed, 0);
    }
    for (index, word) in set_bits(mask).zip(words) {
        let start = index * WORD_SIZE;
        out[start..start + WORD_SIZE].copy_from_slice(&word.to_le_bytes());
    }
    Ok(())
}

fn pack_word(chunk: &[u8]) -> u32 {
    let mut bytes = [0u8; WORD_SIZE];
    bytes[..chunk.len()].copy_from_slice(chunk);
    u32::from_le_bytes(bytes)
}

fn set_bits(mask: &[u8]) -> impl Iterator<Item = usize> + '_ {
    mask.iter().enumerate().flat_map(|(byte_index, &byte)| {
        let mut bits = byte;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let bit = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(byte_index * 8 + bit)
        })
    })
}
