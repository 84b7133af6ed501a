//! Deterministic identities and contexts for tests.
//!
//! Keys are derived from names, so `user("alice")` is the same Alice in every
//! test and every run.

use teamlink_core::Context;
use teamlink_crypto::{KeysetWithSecrets, hash};
use teamlink_proto::{DeviceWithSecrets, ServerWithSecrets, UserWithSecrets};

use crate::team::{MemoryTeam, TeamError};

/// Team name used by [`team`].
pub const TEAM_NAME: &str = "spies";

fn secret(label: &str, name: &str) -> [u8; 64] {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&hash(label, format!("{name}/signature").as_bytes()).0);
    bytes[32..].copy_from_slice(&hash(label, format!("{name}/encryption").as_bytes()).0);
    bytes
}

/// A user whose keys are derived from `user_id`.
pub fn user(user_id: &str) -> UserWithSecrets {
    UserWithSecrets {
        user_id: user_id.to_owned(),
        user_name: user_id.to_owned(),
        keys: KeysetWithSecrets::from_secret_bytes(user_id, &secret("teamlink/fixture/user", user_id)),
    }
}

/// Device id for `user_id`'s device called `device_name`.
pub fn device_id(user_id: &str, device_name: &str) -> String {
    format!("{user_id}::{device_name}")
}

/// A device whose keys are derived from its id.
pub fn device(user_id: &str, device_name: &str) -> DeviceWithSecrets {
    let device_id = device_id(user_id, device_name);
    DeviceWithSecrets {
        user_id: user_id.to_owned(),
        device_name: device_name.to_owned(),
        keys: KeysetWithSecrets::from_secret_bytes(
            device_id.clone(),
            &secret("teamlink/fixture/device", &device_id),
        ),
        device_id,
        device_info: Some(format!("{device_name} (simulated)")),
    }
}

/// A laptop for `user_id`, the default device in most tests.
pub fn laptop(user_id: &str) -> DeviceWithSecrets {
    device(user_id, "laptop")
}

/// A sync server.
pub fn server(host: &str) -> ServerWithSecrets {
    ServerWithSecrets {
        host: host.to_owned(),
        keys: KeysetWithSecrets::from_secret_bytes(host, &secret("teamlink/fixture/server", host)),
    }
}

/// `device` with keys that are not the ones on the team.
pub fn impostor(device: &DeviceWithSecrets) -> DeviceWithSecrets {
    DeviceWithSecrets {
        keys: KeysetWithSecrets::from_secret_bytes(
            device.device_id.clone(),
            &secret("teamlink/fixture/impostor", &device.device_id),
        ),
        ..device.clone()
    }
}

/// A team founded by `founder` (on its laptop) with every user in `members`
/// added directly, each with a laptop.
pub fn team(founder: &str, members: &[&str]) -> Result<MemoryTeam, TeamError> {
    let seed = founder.bytes().fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
    let team = MemoryTeam::create(TEAM_NAME, &user(founder), &laptop(founder), seed)?;
    for member in members {
        team.add_member(&user(member), &[laptop(member).redact()])?;
    }
    Ok(team)
}

/// Context for `user_id`'s laptop, holding its own copy of `team`.
pub fn member(user_id: &str, team: &MemoryTeam) -> Context<MemoryTeam> {
    let device = laptop(user_id);
    Context::Member { team: team.fork(&device.device_id), user: user(user_id), device }
}

/// Context for `user_id` on `device`, sharing `team` as is.
pub fn member_on(user_id: &str, device: DeviceWithSecrets, team: MemoryTeam) -> Context<MemoryTeam> {
    Context::Member { user: user(user_id), device, team }
}

/// Context for a new user holding a member invitation.
pub fn invitee_member(user_id: &str, seed: &str) -> Context<MemoryTeam> {
    Context::InviteeMember {
        user: user(user_id),
        device: laptop(user_id),
        invitation_seed: seed.to_owned(),
    }
}

/// Context for a new device of `user_id` holding a device invitation.
pub fn invitee_device(user_id: &str, device_name: &str, seed: &str) -> Context<MemoryTeam> {
    Context::InviteeDevice {
        user_name: user_id.to_owned(),
        device: device(user_id, device_name),
        invitation_seed: seed.to_owned(),
    }
}

/// Context for a sync server, holding its own copy of `team`.
pub fn server_context(host: &str, team: &MemoryTeam) -> Context<MemoryTeam> {
    Context::Server { server: server(host), team: team.fork(host) }
}
