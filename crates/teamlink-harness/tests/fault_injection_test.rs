//! Handshakes over a lossy, duplicating, reordering network.
//!
//! The message queue must hide all of it: every scenario here ends exactly as
//! it would on a perfect link.

mod common;

use proptest::prelude::*;
use teamlink_core::{ConnectionEvent, Team};
use teamlink_harness::{
    fixtures::{self, invitee_member, member},
    scenario::{NetworkConfig, Scenario, World, oracle},
};

#[test]
fn lost_claim_is_resent() {
    common::init_tracing();
    let team = fixtures::team("alice", &["bob"]).unwrap();

    // Frame 1 is alice's CLAIM_IDENTITY; bob notices the gap at her challenge
    let world = Scenario::new("lost claim")
        .network(NetworkConfig::reliable().drop_frame("alice", 1))
        .connect("alice", member("alice", &team), "bob", member("bob", &team))
        .oracle(oracle::all_connected())
        .run()
        .unwrap();

    assert_eq!(world.frames_dropped(), 1);
}

#[test]
fn several_losses_on_both_sides() {
    let team = fixtures::team("alice", &[]).unwrap();
    team.invite_member("passw0rd").unwrap();

    // Alice's CLAIM_IDENTITY, then bob's ACCEPT_IDENTITY (his fifth frame,
    // counting the resend request he sends for the first loss)
    let network = NetworkConfig::reliable().drop_frame("alice", 1).drop_frame("bob", 4);
    let world = Scenario::new("lossy invitation")
        .network(network)
        .connect("alice", member("alice", &team), "bob", invitee_member("bob", "passw0rd"))
        .oracle(oracle::all_connected())
        .run()
        .unwrap();

    assert_eq!(world.frames_dropped(), 2);
    assert!(world.connection("alice").unwrap().team().unwrap().has_member("bob"));
}

#[test]
fn duplicated_frames_are_harmless() {
    let team = fixtures::team("alice", &["bob"]).unwrap();
    let network = NetworkConfig { duplicate: true, ..NetworkConfig::reliable() };

    let mut world = Scenario::new("duplicates")
        .network(network)
        .connect("alice", member("alice", &team), "bob", member("bob", &team))
        .oracle(oracle::all_connected())
        .run()
        .unwrap();

    world.send("alice", b"once").unwrap();
    world.run().unwrap();
    assert_eq!(world.messages("bob").unwrap(), vec![b"once".to_vec()]);
    assert_eq!(world.count_events("bob", |e| matches!(e, ConnectionEvent::Connected)).unwrap(), 1);
}

fn hostile() -> NetworkConfig {
    NetworkConfig { reorder: true, duplicate: true, ..NetworkConfig::reliable() }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn members_connect_under_any_ordering(seed in any::<u64>()) {
        let team = fixtures::team("alice", &["bob"]).unwrap();
        let mut world = World::with_network(seed, hostile());
        world.connect("alice", member("alice", &team), "bob", member("bob", &team)).unwrap();
        world.start_and_run().unwrap();

        prop_assert!(world.all_connected());
        prop_assert_eq!(world.local_error("alice").unwrap(), None);
        prop_assert_eq!(world.local_error("bob").unwrap(), None);
    }

    #[test]
    fn invitee_joins_under_any_ordering(seed in any::<u64>()) {
        let team = fixtures::team("alice", &[]).unwrap();
        team.invite_member("passw0rd").unwrap();

        let mut world = World::with_network(seed, hostile());
        world.connect("alice", member("alice", &team), "bob", invitee_member("bob", "passw0rd")).unwrap();
        world.start_and_run().unwrap();

        prop_assert!(world.all_connected());
        let alice_team = world.connection("alice").unwrap().team().unwrap();
        let bob_team = world.connection("bob").unwrap().team().unwrap();
        prop_assert_eq!(alice_team.head(), bob_team.head());
    }

    #[test]
    fn messages_arrive_in_send_order(seed in any::<u64>(), count in 1usize..12) {
        let team = fixtures::team("alice", &["bob"]).unwrap();
        let mut world = World::with_network(seed, hostile());
        world.connect("alice", member("alice", &team), "bob", member("bob", &team)).unwrap();
        world.start_and_run().unwrap();

        let sent: Vec<Vec<u8>> = (0..count).map(|i| format!("message {i}").into_bytes()).collect();
        for payload in &sent {
            world.send("alice", payload).unwrap();
        }
        world.run().unwrap();

        prop_assert_eq!(world.messages("bob").unwrap(), sent);
    }
}
