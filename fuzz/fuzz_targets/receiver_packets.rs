#![no_main]

use std::sync::Arc;

use codec::{BincodeCodec, ReceiverSession, SessionConfig};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let payload = Arc::new(BincodeCodec::<Vec<u32>>::new());
    let mut session: ReceiverSession<Vec<u32>, ()> =
        ReceiverSession::new(payload, SessionConfig::for_testing()).unwrap();
    let fingerprint = session.fingerprint();

    // Split the input into packets and stamp each with the session's
    // fingerprint so the fuzzer reaches the diff and history paths.
    let mut idx = 0usize;
    while idx < data.len() && idx < 4096 {
        let len = (data[idx] as usize % 120).saturating_add(1);
        idx += 1;
        let end = (idx + len).min(data.len());
        let mut packet = data[idx..end].to_vec();
        idx = end;
        if packet.len() >= wire::HEADER_SIZE {
            packet[..2].copy_from_slice(&wire::MAGIC.to_le_bytes());
            packet[2] = wire::VERSION;
            packet[4..12].copy_from_slice(&fingerprint.to_le_bytes());
        }

        let before = session.current();
        match session.handle_packet(&(), &packet) {
            Ok(outcome) => {
                if let Some(current) = session.current() {
                    if outcome.ack().is_none() {
                        assert_eq!(Some(current), before);
                    }
                }
            }
            Err(_) => assert_eq!(session.current(), before),
        }
    }
});
