//! Arbitrary bytes must decode or fail cleanly, and whatever decodes must
//! encode back to something that decodes to the same message.

#![no_main]

use libfuzzer_sys::fuzz_target;
use teamlink_proto::{ConnectionMessage, NumberedMessage};

fuzz_target!(|data: &[u8]| {
    let Ok(numbered) = NumberedMessage::<ConnectionMessage>::from_bytes(data) else {
        return;
    };
    let _ = numbered.message.kind();

    let bytes = numbered.to_bytes().expect("decoded message re-encodes");
    let again = NumberedMessage::<ConnectionMessage>::from_bytes(&bytes).expect("re-encoded message decodes");
    assert_eq!(again, numbered);
});
