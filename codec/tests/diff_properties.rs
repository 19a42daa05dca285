use codec::{
    decode_snapshot, encode_diff, encode_snapshot, framed_len, merge_diff, BincodeCodec,
    DiffScratch, SequenceId,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Payload {
    id: u8,
    name: String,
    values: Vec<u32>,
}

fn payload() -> impl Strategy<Value = Payload> {
    (
        any::<u8>(),
        "[a-z]{0,24}",
        prop::collection::vec(any::<u32>(), 0..48),
    )
        .prop_map(|(id, name, values)| Payload { id, name, values })
}

proptest! {
    #[test]
    fn prop_merge_reconstructs_new_payload(old in payload(), new in payload(), always in any::<bool>()) {
        let codec = BincodeCodec::<Payload>::new();
        let mut old_bytes = Vec::new();
        let mut new_bytes = Vec::new();
        encode_snapshot(&codec, &old, &mut old_bytes).unwrap();
        encode_snapshot(&codec, &new, &mut new_bytes).unwrap();

        let mut scratch = DiffScratch::new();
        let Some(diff) = encode_diff(SequenceId::ZERO, &new_bytes, &old_bytes, always, &mut scratch) else {
            prop_assert!(!always);
            return Ok(());
        };
        prop_assert!(always || diff.encoded_len() < new_bytes.len());

        let mut merged = Vec::new();
        merge_diff(&old_bytes, &diff, &mut merged, 1 << 20).unwrap();
        let end = framed_len(&merged).unwrap();
        merged.truncate(end);
        prop_assert_eq!(&merged, &new_bytes);
        let decoded: Payload = decode_snapshot(&codec, &merged).unwrap();
        prop_assert_eq!(decoded, new);
    }

    #[test]
    fn prop_changed_words_match_mask(old in prop::collection::vec(any::<u8>(), 0..96), new in prop::collection::vec(any::<u8>(), 0..96)) {
        let mut scratch = DiffScratch::new();
        let diff = encode_diff(SequenceId::ZERO, &new, &old, true, &mut scratch).unwrap();
        prop_assert_eq!(diff.changed_indices().count(), diff.words.len());
        prop_assert_eq!(diff.mask.len(), codec::mask_len(codec::word_count(new.len())));

        let mut merged = Vec::new();
        merge_diff(&old, &diff, &mut merged, 1 << 20).unwrap();
        prop_assert_eq!(&merged[..new.len()], &new[..]);
    }
}
