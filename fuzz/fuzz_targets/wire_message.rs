#![no_main]

use libfuzzer_sys::fuzz_target;
use wire::{decode_message, Limits, WireMessage};

fuzz_target!(|data: &[u8]| {
    let Ok(msg) = decode_message(data, &Limits::for_testing()) else {
        return;
    };
    // A decoded diff always carries exactly one word per mask bit.
    if let WireMessage::Diff { diff, .. } = msg {
        assert_eq!(diff.word_count(), wire::mask_popcount(diff.mask));
        assert_eq!(diff.words().count(), diff.word_count());
    }
});
