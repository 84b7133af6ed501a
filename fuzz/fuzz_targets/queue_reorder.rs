//! Feed a queue indices in fuzzer-chosen order, with duplicates.
//!
//! Whatever the order, delivered messages are exactly `0..n` in sequence,
//! each once.

#![no_main]

use libfuzzer_sys::fuzz_target;
use teamlink_core::{MessageQueue, QueueEvent};
use teamlink_proto::NumberedMessage;

fuzz_target!(|data: &[u8]| {
    let mut queue = MessageQueue::<u64>::new();
    queue.start();

    let mut delivered = Vec::new();
    for &byte in data {
        let index = u64::from(byte % 64);
        for event in queue.receive(NumberedMessage { index, message: index }) {
            match event {
                QueueEvent::Deliver(message) => delivered.push(message),
                QueueEvent::RequestResend(from) => assert_eq!(from, delivered.len() as u64),
            }
        }
    }

    let expected: Vec<u64> = (0..delivered.len() as u64).collect();
    assert_eq!(delivered, expected);
    assert_eq!(queue.next_inbound_index(), delivered.len() as u64);
});
