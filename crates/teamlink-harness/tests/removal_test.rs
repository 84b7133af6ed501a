//! Connected peers are dropped once the team removes them.

mod common;

use teamlink_core::{ConnectionState, Team};
use teamlink_harness::{
    MemoryTeam,
    fixtures::{self, laptop, member, member_on, server, server_context},
    scenario::{Scenario, World, oracle},
};
use teamlink_proto::ConnectionErrorType;

fn connected(team: &MemoryTeam, a: &str, b: &str) -> World {
    Scenario::new(format!("{a} and {b}"))
        .connect(a, member(a, team), b, member(b, team))
        .oracle(oracle::all_connected())
        .run()
        .unwrap()
}

fn team_of(world: &World, name: &str) -> MemoryTeam {
    world.connection(name).unwrap().team().unwrap().clone()
}

#[test]
fn removed_member_is_disconnected() {
    common::init_tracing();
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let mut world = connected(&team, "alice", "bob");

    let alice_team = team_of(&world, "alice");
    alice_team.remove_member("bob").unwrap();
    world.team_changed(&alice_team).unwrap();
    world.run().unwrap();

    assert_eq!(world.local_error("alice").unwrap(), Some(ConnectionErrorType::MemberRemoved));
    assert_eq!(world.remote_error("bob").unwrap(), Some(ConnectionErrorType::MemberRemoved));
    assert!(world.all_disconnected());
    // Bob learned about his removal before being dropped
    assert!(team_of(&world, "bob").member_was_removed("bob"));
}

#[test]
fn removed_device_is_disconnected() {
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let mut world = connected(&team, "alice", "bob");

    let alice_team = team_of(&world, "alice");
    alice_team.remove_device("bob::laptop").unwrap();
    world.team_changed(&alice_team).unwrap();
    world.run().unwrap();

    assert_eq!(world.local_error("alice").unwrap(), Some(ConnectionErrorType::DeviceRemoved));
    assert_eq!(world.remote_error("bob").unwrap(), Some(ConnectionErrorType::DeviceRemoved));
}

#[test]
fn removed_server_is_disconnected() {
    let team = fixtures::team("alice", &[]).unwrap();
    let host = "sync.example.com";
    team.add_server(host, server(host).keys.redact()).unwrap();

    let mut world = Scenario::new("server")
        .connect("alice", member("alice", &team), "server", server_context(host, &team))
        .oracle(oracle::all_connected())
        .run()
        .unwrap();

    let alice_team = team_of(&world, "alice");
    alice_team.remove_server(host).unwrap();
    world.team_changed(&alice_team).unwrap();
    world.run().unwrap();

    assert_eq!(world.local_error("alice").unwrap(), Some(ConnectionErrorType::ServerRemoved));
    assert_eq!(world.remote_error("server").unwrap(), Some(ConnectionErrorType::ServerRemoved));
}

#[test]
fn removal_relayed_through_a_third_peer() {
    let team = fixtures::team("alice", &["bob", "carol"]).unwrap();
    let alice_team = team.fork("alice::laptop");

    let mut world = World::new(21);
    world
        .connect(
            "alice:bob",
            member_on("alice", laptop("alice"), alice_team.clone()),
            "bob",
            member("bob", &team),
        )
        .unwrap();
    world
        .connect(
            "alice:carol",
            member_on("alice", laptop("alice"), alice_team.clone()),
            "carol",
            member("carol", &team),
        )
        .unwrap();
    world.start_and_run().unwrap();
    assert!(world.all_connected());

    // Carol removes bob; alice only hears about it from carol
    let carol_team = team_of(&world, "carol");
    carol_team.remove_member("bob").unwrap();
    world.team_changed(&carol_team).unwrap();
    world.run().unwrap();

    assert!(alice_team.member_was_removed("bob"));
    assert_eq!(world.local_error("alice:bob").unwrap(), Some(ConnectionErrorType::MemberRemoved));
    assert_eq!(world.remote_error("bob").unwrap(), Some(ConnectionErrorType::MemberRemoved));
    assert_eq!(world.state("alice:carol").unwrap(), ConnectionState::Connected);
    assert_eq!(world.state("carol").unwrap(), ConnectionState::Connected);
}
