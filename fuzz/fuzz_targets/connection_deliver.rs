//! Arbitrary frames delivered to a started connection never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use teamlink_core::{Connection, ConnectionConfig};
use teamlink_harness::{SimEnv, fixtures};

fuzz_target!(|frames: Vec<Vec<u8>>| {
    let Ok(team) = fixtures::team("alice", &["bob"]) else {
        return;
    };
    let mut connection =
        Connection::new(SimEnv::with_seed(0), fixtures::member("alice", &team), ConnectionConfig::default());
    let _ = connection.start(&[]);

    for frame in &frames {
        let _ = connection.deliver(frame);
    }
    let _ = connection.tick();
});
