//! Reusable scratch buffers for diff encoding and merging.

use crate::diff::DiffMessage;

/// Upper bound on pooled vectors of each kind.
const MAX_POOLED: usize = 8;

/// Scratch buffers owned by one session.
///
/// Mask and word vectors handed out by the scratch belong to the caller
/// until they come back through [`recycle`](Self::recycle); nothing here is
/// shared between two live diffs.
#[derive(Debug, Default)]
pub struct DiffScratch {
    masks: Vec<Vec<u8>>,
    words: Vec<Vec<u32>>,
    merge: Vec<u8>,
}

impl DiffScratch {
    /// Creates a new scratch buffer with no pre-allocated capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a pooled diff's vectors for reuse.
    pub fn recycle(&mut self, diff: DiffMessage) {
        let DiffMessage { mask, words, .. } = diff;
        self.return_vectors(mask, words);
    }

    /// Number of pooled (mask, words) vectors currently available.
    #[must_use]
    pub fn pooled(&self) -> (usize, usize) {
        (self.masks.len(), self.words.len())
    }

    pub(crate) fn take_vectors(&mut self, mask_len: usize) -> (Vec<u8>, Vec<u32>) {
        let mut mask = self.masks.pop().unwrap_or_default();
        mask.clear();
        mask.resize(mask_len, 0);
        let mut words = self.words.pop().unwrap_or_default();
        words.clear();
        (mask, words)
    }

    pub(crate) fn return_vectors(&mut self, mut mask: Vec<u8>, mut words: Vec<u32>) {
        if self.masks.len() < MAX_POOLED {
            mask.clear();
            self.masks.push(mask);
        }
        if self.words.len() < MAX_POOLED {
            words.clear();
            self.words.push(words);
        }
    }

    pub(crate) fn merge_buf(&mut self) -> &mut Vec<u8> {
        &mut self.merge
    }
}
