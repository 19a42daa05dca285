//! Message encoding and body framing.

use crate::error::{DecodeError, EncodeError, FramingError, LimitKind, WireResult};
use crate::header::{decode_header, encode_header, MessageHeader, MessageKind, HEADER_SIZE};
use crate::limits::Limits;

/// Size of one diff word in bytes.
pub const WORD_SIZE: usize = 4;

/// Borrowed view of a diff body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireDiff<'a> {
    /// Sequence id of the snapshot the diff applies to.
    pub base_id: u16,
    /// Change mask, bit `i` is `mask[i / 8] & (1 << (i % 8))`.
    pub mask: &'a [u8],
    /// Changed words as little-endian `u32`s, in ascending bit order.
    pub words: &'a [u8],
}

impl WireDiff<'_> {
    /// Returns the number of changed words carried by the body.
    #[must_use]
    pub const fn word_count(&self) -> usize {
        self.words.len() / WORD_SIZE
    }

    /// Iterates the changed words in mask order.
    pub fn words(&self) -> impl ExactSizeIterator<Item = u32> + '_ {
        self.words
            .chunks_exact(WORD_SIZE)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }
}

/// A decoded wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMessage<'a> {
    /// A complete framed snapshot.
    Full {
        header: MessageHeader,
        snapshot: &'a [u8],
    },
    /// A diff against an earlier snapshot.
    Diff {
        header: MessageHeader,
        diff: WireDiff<'a>,
    },
    /// An acknowledgment.
    Ack { header: MessageHeader },
}

impl WireMessage<'_> {
    /// Returns the message header.
    #[must_use]
    pub const fn header(&self) -> &MessageHeader {
        match self {
            Self::Full { header, .. } | Self::Diff { header, .. } | Self::Ack { header } => header,
        }
    }
}

/// Counts the set bits of a change mask.
#[must_use]
pub fn mask_popcount(mask: &[u8]) -> usize {
    mask.iter().map(|byte| byte.count_ones() as usize).sum()
}

/// Returns the exact encoded size of a diff body.
#[must_use]
pub fn diff_body_len(mask_len: usize, word_count: usize) -> usize {
    let len_prefix = u32::try_from(mask_len).map_or(5, varu32_len);
    2 + len_prefix + mask_len + word_count * WORD_SIZE
}

/// Appends a full snapshot message to `out`.
pub fn encode_full(fingerprint: u64, label: u16, snapshot: &[u8], out: &mut Vec<u8>) -> usize {
    let header = MessageHeader::new(MessageKind::Full, fingerprint, label);
    out.reserve(HEADER_SIZE + snapshot.len());
    encode_header(&header, out);
    out.extend_from_slice(snapshot);
    HEADER_SIZE + snapshot.len()
}

/// Appends a diff message to `out`.
pub fn encode_diff(
    fingerprint: u64,
    label: u16,
    base_id: u16,
    mask: &[u8],
    words: &[u32],
    out: &mut Vec<u8>,
) -> Result<usize, EncodeError> {
    let mask_len =
        u32::try_from(mask.len()).map_err(|_| EncodeError::LengthOverflow { length: mask.len() })?;
    let expected = mask_popcount(mask);
    if expected != words.len() {
        return Err(EncodeError::WordCountMismatch {
            expected,
            actual: words.len(),
        });
    }

    let body_len = diff_body_len(mask.len(), words.len());
    out.reserve(HEADER_SIZE + body_len);
    let header = MessageHeader::new(MessageKind::Diff, fingerprint, label);
    encode_header(&header, out);
    out.extend_from_slice(&base_id.to_le_bytes());
    write_varu32(mask_len, out);
    out.extend_from_slice(mask);
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
    Ok(HEADER_SIZE + body_len)
}

/// Appends an ack message to `out`.
pub fn encode_ack(fingerprint: u64, id: u16, out: &mut Vec<u8>) -> usize {
    encode_header(&MessageHeader::new(MessageKind::Ack, fingerprint, id), out)
}

/// Decodes a wire message into a header and a borrowed body view.
pub fn decode_message<'a>(buf: &'a [u8], limits: &Limits) -> WireResult<WireMessage<'a>> {
    if buf.len() > limits.max_message_bytes {
        return Err(DecodeError::LimitsExceeded {
            kind: LimitKind::MessageBytes,
            limit: limits.max_message_bytes,
            actual: buf.len(),
        });
    }

    let header = decode_header(buf)?;
    let body = &buf[HEADER_SIZE..];
    match header.kind {
        MessageKind::Full => Ok(WireMessage::Full {
            header,
            snapshot: body,
        }),
        MessageKind::Diff => {
            let diff = decode_diff_body(body, limits)?;
            Ok(WireMessage::Diff { header, diff })
        }
        MessageKind::Ack => {
            if !body.is_empty() {
                return Err(DecodeError::TrailingData {
                    kind: MessageKind::Ack,
                    remaining: body.len(),
                });
            }
            Ok(WireMessage::Ack { header })
        }
    }
}

fn decode_diff_body<'a>(body: &'a [u8], limits: &Limits) -> WireResult<WireDiff<'a>> {
    let Some(base) = body.get(..2) else {
        return Err(FramingError::Truncated {
            needed: 2,
            available: body.len(),
        }
        .into());
    };
    let base_id = u16::from_le_bytes([base[0], base[1]]);

    let (mask_len, offset) = read_varu32(body, 2)?;
    let mask_len = mask_len as usize;
    if mask_len > limits.max_mask_bytes {
        return Err(DecodeError::LimitsExceeded {
            kind: LimitKind::MaskBytes,
            limit: limits.max_mask_bytes,
            actual: mask_len,
        });
    }
    let mask_end = offset + mask_len;
    let Some(mask) = body.get(offset..mask_end) else {
        return Err(FramingError::Truncated {
            needed: mask_end,
            available: body.len(),
        }
        .into());
    };

    let words = &body[mask_end..];
    let expected = mask_popcount(mask);
    let needed = expected * WORD_SIZE;
    if words.len() < needed {
        return Err(DecodeError::WordCountMismatch {
            expected,
            actual_bytes: words.len(),
        });
    }
    if words.len() > needed {
        return Err(DecodeError::TrailingData {
            kind: MessageKind::Diff,
            remaining: words.len() - needed,
        });
    }

    Ok(WireDiff {
        base_id,
        mask,
        words,
    })
}

fn read_varu32(buf: &[u8], mut offset: usize) -> Result<(u32, usize), DecodeError> {
    let mut value = 0u32;
    let mut shift = 0u32;
    for _ in 0..5 {
        let Some(&byte) = buf.get(offset) else {
            return Err(FramingError::Truncated {
                needed: offset + 1,
                available: buf.len(),
            }
            .into());
        };
        offset += 1;
        value |= u32::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, offset));
        }
        shift += 7;
    }
    Err(FramingError::InvalidVarint.into())
}

fn write_varu32(mut value: u32, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

const fn varu32_len(mut value: u32) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_roundtrip() {
        let mut buf = Vec::new();
        let written = encode_full(42, 7, &[1, 2, 3, 4, 5], &mut buf);
        assert_eq!(written, buf.len());

        let msg = decode_message(&buf, &Limits::for_testing()).unwrap();
        match msg {
            WireMessage::Full { header, snapshot } => {
                assert_eq!(header.kind, MessageKind::Full);
                assert_eq!(header.fingerprint, 42);
                assert_eq!(header.sequence, 7);
                assert_eq!(snapshot, &[1, 2, 3, 4, 5]);
            }
            other => panic!("expected full, got {other:?}"),
        }
    }

    #[test]
    fn diff_roundtrip() {
        let mask = [0b0000_0101u8, 0b1000_0000];
        let words = [0xDEAD_BEEFu32, 1, 0x0102_0304];
        let mut buf = Vec::new();
        let written = encode_diff(9, 100, 98, &mask, &words, &mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(written, HEADER_SIZE + diff_body_len(mask.len(), words.len()));

        let msg = decode_message(&buf, &Limits::for_testing()).unwrap();
        let WireMessage::Diff { header, diff } = msg else {
            panic!("expected diff, got {msg:?}");
        };
        assert_eq!(header.sequence, 100);
        assert_eq!(diff.base_id, 98);
        assert_eq!(diff.mask, &mask);
        assert_eq!(diff.word_count(), 3);
        assert_eq!(diff.words().collect::<Vec<_>>(), words);
    }

    #[test]
    fn ack_roundtrip() {
        let mut buf = Vec::new();
        assert_eq!(encode_ack(5, 65535, &mut buf), HEADER_SIZE);
        let msg = decode_message(&buf, &Limits::for_testing()).unwrap();
        assert_eq!(msg.header().kind, MessageKind::Ack);
        assert_eq!(msg.header().sequence, 65535);
    }

    #[test]
    fn encode_diff_rejects_word_count_mismatch() {
        let mut buf = Vec::new();
        let err = encode_diff(0, 1, 0, &[0b11], &[1], &mut buf).unwrap_err();
        assert_eq!(
            err,
            EncodeError::WordCountMismatch {
                expected: 2,
                actual: 1
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_ack_with_body() {
        let mut buf = Vec::new();
        encode_ack(0, 1, &mut buf);
        buf.push(0);
        let err = decode_message(&buf, &Limits::for_testing()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TrailingData {
                kind: MessageKind::Ack,
                remaining: 1
            }
        ));
    }

    #[test]
    fn decode_rejects_truncated_words() {
        let mut buf = Vec::new();
        encode_diff(0, 2, 1, &[0b11], &[1, 2], &mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        let err = decode_message(&buf, &Limits::for_testing()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::WordCountMismatch { expected: 2, .. }
        ));
    }

    #[test]
    fn decode_rejects_trailing_words() {
        let mut buf = Vec::new();
        encode_diff(0, 2, 1, &[0b1], &[1], &mut buf).unwrap();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        let err = decode_message(&buf, &Limits::for_testing()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::TrailingData {
                kind: MessageKind::Diff,
                remaining: 4
            }
        ));
    }

    #[test]
    fn decode_rejects_truncated_mask() {
        let mut buf = Vec::new();
        encode_header(&MessageHeader::new(MessageKind::Diff, 0, 1), &mut buf);
        buf.extend_from_slice(&[0, 0, 4, 0xFF]);
        let err = decode_message(&buf, &Limits::for_testing()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Framing(FramingError::Truncated { .. })
        ));
    }

    #[test]
    fn decode_rejects_invalid_varint() {
        let mut buf = Vec::new();
        encode_header(&MessageHeader::new(MessageKind::Diff, 0, 1), &mut buf);
        buf.extend_from_slice(&[0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
        let err = decode_message(&buf, &Limits::unlimited()).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::Framing(FramingError::InvalidVarint)
        ));
    }

    #[test]
    fn decode_enforces_mask_limit() {
        let mask = vec![0u8; 16];
        let mut buf = Vec::new();
        encode_diff(0, 1, 0, &mask, &[], &mut buf).unwrap();
        let limits = Limits {
            max_message_bytes: 4096,
            max_mask_bytes: 8,
        };
        let err = decode_message(&buf, &limits).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LimitsExceeded {
                kind: LimitKind::MaskBytes,
                limit: 8,
                actual: 16
            }
        ));
    }

    #[test]
    fn decode_enforces_message_limit() {
        let mut buf = Vec::new();
        encode_full(0, 1, &[0u8; 64], &mut buf);
        let limits = Limits {
            max_message_bytes: 32,
            max_mask_bytes: 8,
        };
        let err = decode_message(&buf, &limits).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LimitsExceeded {
                kind: LimitKind::MessageBytes,
                ..
            }
        ));
    }

    #[test]
    fn diff_body_len_counts_varint_prefix() {
        assert_eq!(diff_body_len(0, 0), 3);
        assert_eq!(diff_body_len(1, 1), 2 + 1 + 1 + 4);
        assert_eq!(diff_body_len(200, 0), 2 + 2 + 200);
    }

    #[test]
    fn popcount_counts_all_bytes() {
        assert_eq!(mask_popcount(&[]), 0);
        assert_eq!(mask_popcount(&[0xFF, 0x01, 0x80]), 10);
    }
}
