//! Shared test helpers.

use teamlink_harness::scenario::World;
use teamlink_proto::ConnectionErrorType;

/// Log to the test writer, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// The error that ended `name`'s connection, whichever side detected it.
#[allow(dead_code)]
pub fn ended_with(world: &World, name: &str) -> Option<ConnectionErrorType> {
    let local = world.local_error(name).unwrap();
    local.or_else(|| world.remote_error(name).unwrap())
}
