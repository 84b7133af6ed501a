//! Authentication, invitation and timeout failures.

mod common;

use std::time::Duration;

use teamlink_core::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionError, ConnectionEvent, ConnectionState,
    Environment, Team,
};
use teamlink_harness::{
    SimEnv,
    fixtures::{self, impostor, invitee_member, laptop, member, member_on},
    scenario::{NetworkConfig, Scenario, World, WorldError, oracle},
};
use teamlink_proto::{ConnectionErrorType, ConnectionMessage, IdentityClaim, NumberedMessage};

fn frame(index: u64, message: ConnectionMessage) -> Vec<u8> {
    NumberedMessage { index, message }.to_bytes().unwrap()
}

fn transmitted(actions: &[ConnectionAction<teamlink_harness::MemoryTeam>]) -> Vec<ConnectionMessage> {
    actions
        .iter()
        .filter_map(|action| match action {
            ConnectionAction::Transmit(bytes) => Some(NumberedMessage::from_bytes(bytes).unwrap().message),
            ConnectionAction::Emit(_) => None,
        })
        .collect()
}

fn emitted_error(actions: &[ConnectionAction<teamlink_harness::MemoryTeam>]) -> Option<ConnectionErrorType> {
    actions.iter().find_map(|action| match action {
        ConnectionAction::Emit(ConnectionEvent::LocalError(payload)) => Some(payload.error_type),
        _ => None,
    })
}

#[test]
fn wrong_signature_key_fails_identity_proof() {
    common::init_tracing();
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let eve = impostor(&laptop("bob"));

    Scenario::new("impostor")
        .connect("alice", member("alice", &team), "eve", member_on("bob", eve, team.fork("bob::laptop")))
        .oracle(oracle::all_of(vec![
            oracle::failed_with("alice", "eve", ConnectionErrorType::IdentityProofInvalid),
            oracle::all_disconnected(),
        ]))
        .run()
        .unwrap();
}

#[test]
fn wrong_encryption_key_fails_negotiation() {
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let mut bob = laptop("bob");
    bob.keys.encryption = impostor(&bob).keys.encryption;

    let world = Scenario::new("wrong encryption key")
        .connect("alice", member("alice", &team), "bob", member_on("bob", bob, team.fork("bob::laptop")))
        .oracle(oracle::all_disconnected())
        .run()
        .unwrap();

    // Signatures were fine, so both sides got as far as negotiating
    for name in ["alice", "bob"] {
        assert!(world.changes(name).unwrap().iter().any(|c| c == "negotiating"));
        assert_eq!(common::ended_with(&world, name), Some(ConnectionErrorType::EncryptionFailure));
        assert!(!world.connection(name).unwrap().has_session_key());
    }
    assert_eq!(world.local_error("bob").unwrap(), Some(ConnectionErrorType::EncryptionFailure));
}

#[test]
fn unknown_device_is_rejected() {
    let ours = fixtures::team("alice", &[]).unwrap();
    let theirs = fixtures::team("mallory", &[]).unwrap();

    let world = Scenario::new("strangers")
        .connect("alice", member("alice", &ours), "mallory", member("mallory", &theirs))
        .oracle(oracle::all_disconnected())
        .run()
        .unwrap();

    assert_eq!(common::ended_with(&world, "alice"), Some(ConnectionErrorType::DeviceUnknown));
    assert_eq!(common::ended_with(&world, "mallory"), Some(ConnectionErrorType::DeviceUnknown));
}

#[test]
fn invitation_cannot_be_used_twice() {
    let team = fixtures::team("alice", &[]).unwrap();
    team.invite_member("passw0rd").unwrap();
    let alice_team = team.fork("alice::laptop");

    let mut world = World::new(5);
    world
        .connect(
            "alice",
            member_on("alice", laptop("alice"), alice_team.clone()),
            "bob",
            invitee_member("bob", "passw0rd"),
        )
        .unwrap();
    world
        .connect(
            "alice-again",
            member_on("alice", laptop("alice"), alice_team.clone()),
            "carol",
            invitee_member("carol", "passw0rd"),
        )
        .unwrap();
    world.start("alice").unwrap();
    world.start("bob").unwrap();
    world.run().unwrap();
    world.start("alice-again").unwrap();
    world.start("carol").unwrap();
    world.run().unwrap();

    assert_eq!(world.state("bob").unwrap(), ConnectionState::Connected);
    assert_eq!(world.remote_error("carol").unwrap(), Some(ConnectionErrorType::InvitationProofInvalid));
    assert!(!alice_team.has_member("carol"));
}

#[test]
fn revoked_invitation_is_rejected() {
    let team = fixtures::team("alice", &[]).unwrap();
    let id = team.invite_member("passw0rd").unwrap();
    team.revoke_invitation(&id).unwrap();

    Scenario::new("revoked")
        .connect("alice", member("alice", &team), "bob", invitee_member("bob", "passw0rd"))
        .oracle(oracle::failed_with("alice", "bob", ConnectionErrorType::InvitationProofInvalid))
        .run()
        .unwrap();
}

#[test]
fn accepting_a_team_without_our_invitation_fails() {
    let env = SimEnv::with_seed(1);
    let mut bob = Connection::new(env, invitee_member("bob", "passw0rd"), ConnectionConfig::default());
    bob.start(&[]);

    // A team that never invited bob
    let other = fixtures::team("mallory", &[]).unwrap();

    bob.deliver(&frame(0, ConnectionMessage::RequestIdentity)).unwrap();
    bob.deliver(&frame(1, ConnectionMessage::ClaimIdentity(IdentityClaim::Member {
        device_id: "mallory::laptop".into(),
    })))
    .unwrap();
    assert_eq!(bob.state().to_string(), "authenticating.awaitingInvitationAcceptance");

    let actions = bob
        .deliver(&frame(2, ConnectionMessage::AcceptInvitation {
            serialized_graph: other.save().unwrap(),
            team_keyring: other.team_keyring().unwrap(),
        }))
        .unwrap();

    assert_eq!(emitted_error(&actions), Some(ConnectionErrorType::JoinedWrongTeam));
    assert_eq!(bob.state(), ConnectionState::Disconnected);
    assert!(bob.team().is_none());
}

#[test]
fn silent_peer_times_out() {
    let team = fixtures::team("alice", &[]).unwrap();
    team.invite_member("passw0rd").unwrap();

    // Losing alice's ACCEPT_INVITATION leaves both sides waiting
    let mut world = World::with_network(9, NetworkConfig::reliable().drop_frame("alice", 2));
    world.connect("alice", member("alice", &team), "bob", invitee_member("bob", "passw0rd")).unwrap();
    world.start_and_run().unwrap();

    assert_eq!(world.frames_dropped(), 1);
    assert_eq!(world.state("bob").unwrap().to_string(), "authenticating.awaitingInvitationAcceptance");

    world.advance(Duration::from_secs(6)).unwrap();
    world.run().unwrap();
    assert!(!world.state("bob").unwrap().is_terminal());

    world.advance(Duration::from_secs(2)).unwrap();
    world.run().unwrap();
    assert_eq!(world.local_error("bob").unwrap(), Some(ConnectionErrorType::Timeout));
    assert_eq!(common::ended_with(&world, "alice"), Some(ConnectionErrorType::Timeout));
    assert!(world.all_disconnected());
}

#[test]
fn custom_timeout_is_honored() {
    let team = fixtures::team("alice", &[]).unwrap();
    team.invite_member("passw0rd").unwrap();

    let world = Scenario::new("short timeout")
        .network(NetworkConfig::reliable().drop_frame("alice", 2))
        .timeout(Duration::from_secs(1))
        .connect("alice", member("alice", &team), "bob", invitee_member("bob", "passw0rd"))
        .oracle(Box::new(|_| Ok(())))
        .run()
        .unwrap();

    let deadline = world.connection("bob").unwrap().next_deadline().unwrap();
    assert_eq!(deadline - world.env().now(), Duration::from_secs(1));
}

#[test]
fn sending_before_connected_is_refused() {
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let mut world = World::new(2);
    world.connect("alice", member("alice", &team), "bob", member("bob", &team)).unwrap();
    world.start_all().unwrap();

    let result = world.send("alice", b"too early");
    assert!(matches!(result, Err(WorldError::Connection { source: ConnectionError::NotConnected, .. })));
}

#[test]
fn delivering_before_start_is_refused() {
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let mut alice = Connection::new(SimEnv::with_seed(4), member("alice", &team), ConnectionConfig::default());
    let result = alice.deliver(&frame(0, ConnectionMessage::RequestIdentity));
    assert_eq!(result.err(), Some(ConnectionError::NotStarted));
}

#[test]
fn garbage_cipher_fails_with_encryption_failure() {
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let mut world = Scenario::new("garbage")
        .connect("alice", member("alice", &team), "bob", member("bob", &team))
        .oracle(oracle::all_connected())
        .run()
        .unwrap();

    let index = world.frames_sent("alice").unwrap() as u64;
    world.inject("bob", frame(index, ConnectionMessage::EncryptedMessage { cipher: vec![7; 64] })).unwrap();
    world.run().unwrap();

    assert_eq!(world.local_error("bob").unwrap(), Some(ConnectionErrorType::EncryptionFailure));
    assert_eq!(world.remote_error("alice").unwrap(), Some(ConnectionErrorType::EncryptionFailure));
}

#[test]
fn undecodable_buffered_frames_are_skipped() {
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let mut alice = Connection::new(SimEnv::with_seed(5), member("alice", &team), ConnectionConfig::default());

    let buffered = vec![b"garbage".to_vec(), frame(0, ConnectionMessage::RequestIdentity), vec![0xff; 3]];
    let actions = alice.start(&buffered);

    let kinds: Vec<&str> = transmitted(&actions).iter().map(ConnectionMessage::kind).collect();
    assert_eq!(kinds, vec!["REQUEST_IDENTITY", "CLAIM_IDENTITY"]);
    assert!(alice.is_started());
    assert_eq!(alice.state(), ConnectionState::AwaitingIdentityClaim);
    assert_eq!(emitted_error(&actions), None);
}

#[test]
fn sending_after_disconnect_is_refused() {
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let mut world = Scenario::new("send after stop")
        .connect("alice", member("alice", &team), "bob", member("bob", &team))
        .oracle(oracle::all_connected())
        .run()
        .unwrap();

    world.stop("alice").unwrap();
    world.run().unwrap();
    let sent = world.frames_sent("alice").unwrap();

    let result = world.send("alice", b"too late");
    assert!(matches!(result, Err(WorldError::Connection { source: ConnectionError::Disconnected, .. })));
    assert_eq!(world.frames_sent("alice").unwrap(), sent);
}

#[test]
fn repeated_identity_claim_keeps_the_first() {
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let mut alice = Connection::new(SimEnv::with_seed(6), member("alice", &team), ConnectionConfig::default());
    alice.start(&[]);

    let claim = |device_id: &str| ConnectionMessage::ClaimIdentity(IdentityClaim::Member { device_id: device_id.into() });
    alice.deliver(&frame(0, claim("bob::laptop"))).unwrap();
    alice.deliver(&frame(1, claim("mallory::laptop"))).unwrap();
    let actions = alice.deliver(&frame(2, ConnectionMessage::RequestIdentity)).unwrap();

    let challenged: Vec<String> = transmitted(&actions)
        .into_iter()
        .filter_map(|message| match message {
            ConnectionMessage::ChallengeIdentity { challenge } => Some(challenge.device_id),
            _ => None,
        })
        .collect();
    assert_eq!(challenged, vec!["bob::laptop".to_owned()]);
    assert_eq!(emitted_error(&actions), None);
}
