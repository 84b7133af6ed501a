//! Reusable oracles.

use teamlink_core::ConnectionState;
use teamlink_proto::ConnectionErrorType;

use crate::scenario::{OracleFn, World};

/// Every connection reached `connected`.
pub fn all_connected() -> OracleFn {
    Box::new(|world: &World| {
        for name in world.names() {
            let state = world.state(&name).map_err(|e| e.to_string())?;
            if state != ConnectionState::Connected {
                return Err(format!("{name} is {state}, expected connected"));
            }
        }
        Ok(())
    })
}

/// Every connection is disconnected.
pub fn all_disconnected() -> OracleFn {
    Box::new(|world: &World| {
        if world.all_disconnected() {
            Ok(())
        } else {
            Err(format!("not every connection is disconnected: {:?}", states(world)))
        }
    })
}

/// Both ends of a connection agree on the session key.
pub fn session_keys_match(a: &'static str, b: &'static str) -> OracleFn {
    Box::new(move |world: &World| {
        let a_key = world.connection(a).map_err(|e| e.to_string())?.has_session_key();
        let b_key = world.connection(b).map_err(|e| e.to_string())?.has_session_key();
        if !(a_key && b_key) {
            return Err(format!("missing session key ({a}: {a_key}, {b}: {b_key})"));
        }
        Ok(())
    })
}

/// `detector` failed with `error_type` and `peer` was told so.
pub fn failed_with(detector: &'static str, peer: &'static str, error_type: ConnectionErrorType) -> OracleFn {
    Box::new(move |world: &World| {
        let local = world.local_error(detector).map_err(|e| e.to_string())?;
        let remote = world.remote_error(peer).map_err(|e| e.to_string())?;
        if local != Some(error_type) {
            return Err(format!("{detector} detected {local:?}, expected {error_type:?}"));
        }
        if remote != Some(error_type) {
            return Err(format!("{peer} was told {remote:?}, expected {error_type:?}"));
        }
        Ok(())
    })
}

/// Run every oracle; the first failure wins.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world: &World| oracles.iter().try_for_each(|oracle| oracle(world)))
}

fn states(world: &World) -> Vec<(String, String)> {
    world
        .names()
        .into_iter()
        .map(|name| {
            let state = world.state(&name).map_or_else(|e| e.to_string(), |s| s.to_string());
            (name, state)
        })
        .collect()
}
