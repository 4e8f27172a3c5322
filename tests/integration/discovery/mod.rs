//! Peer discovery threads over a scripted transport.

use std::time::Duration;

use stripe_sync::core::ServerId;
use stripe_sync::discovery::{
    BackoffPolicy, DiscoveryConfig, MembershipDiscovery, PeerConfig, PeerState,
};

use crate::fixtures::transport::{Attempt, MessagingEvent, RecordingMessaging, ScriptedTransport};

const WAIT: Duration = Duration::from_secs(5);

fn server(name: &str) -> ServerId {
    ServerId::new(name).expect("server id")
}

fn peer(name: &str) -> PeerConfig {
    PeerConfig {
        server: server(name),
        addr: format!("{name}.stripe:9510"),
    }
}

fn config(peers: Vec<PeerConfig>) -> DiscoveryConfig {
    DiscoveryConfig {
        local: server("self"),
        peers,
        backoff: BackoffPolicy {
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
        },
    }
}

fn connected_count(events: &[MessagingEvent], name: &str) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, MessagingEvent::Connected { server, .. } if server.as_str() == name))
        .count()
}

#[test]
fn connects_after_refusals_and_skips_self() {
    let transport = ScriptedTransport::new();
    let messaging = RecordingMessaging::new();
    transport.script(
        &server("active"),
        vec![Attempt::Refuse, Attempt::Refuse, Attempt::Accept],
    );

    let discovery = MembershipDiscovery::new(
        config(vec![peer("self"), peer("active")]),
        transport.clone(),
        messaging.clone(),
    );
    let states = discovery.peer_states();
    assert_eq!(states.len(), 1, "own entry is not a peer");
    assert_eq!(states.get(&server("active")), Some(&PeerState::Unknown));

    let handle = discovery.start().expect("start discovery");
    assert!(messaging.wait_until(WAIT, |events| connected_count(events, "active") == 1));
    assert_eq!(
        handle.peer_states().get(&server("active")),
        Some(&PeerState::Connected)
    );
    assert_eq!(transport.attempts(&server("active")), 3);
    assert_eq!(transport.attempts(&server("self")), 0);

    handle.shutdown();
    assert_eq!(
        messaging.events(),
        vec![
            MessagingEvent::Connected {
                server: server("active"),
                channel: "active.stripe:9510#3".to_string(),
            },
            MessagingEvent::Lost {
                server: server("active"),
            },
        ]
    );
}

#[test]
fn lost_link_triggers_rediscovery() {
    let transport = ScriptedTransport::new();
    let messaging = RecordingMessaging::new();
    transport.script(
        &server("active"),
        vec![Attempt::Accept, Attempt::Refuse, Attempt::Accept],
    );

    let handle = MembershipDiscovery::new(
        config(vec![peer("active")]),
        transport.clone(),
        messaging.clone(),
    )
    .start()
    .expect("start discovery");

    assert!(messaging.wait_until(WAIT, |events| connected_count(events, "active") == 1));
    assert!(transport.drop_link(&server("active")));

    assert!(messaging.wait_until(WAIT, |events| connected_count(events, "active") == 2));
    let events = messaging.events();
    assert!(matches!(events[1], MessagingEvent::Lost { .. }));
    assert_eq!(transport.attempts(&server("active")), 3);

    handle.shutdown();
}

#[test]
fn peers_are_independent() {
    let transport = ScriptedTransport::new();
    let messaging = RecordingMessaging::new();
    transport.script(&server("a"), vec![Attempt::Accept]);

    let handle = MembershipDiscovery::new(
        config(vec![peer("a"), peer("b")]),
        transport.clone(),
        messaging.clone(),
    )
    .start()
    .expect("start discovery");

    assert!(messaging.wait_until(WAIT, |events| connected_count(events, "a") == 1));
    // "b" keeps failing without holding "a" back.
    let deadline = std::time::Instant::now() + WAIT;
    while transport.attempts(&server("b")) < 3 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(transport.attempts(&server("b")) >= 3);
    assert_ne!(
        handle.peer_states().get(&server("b")),
        Some(&PeerState::Connected)
    );

    handle.shutdown();
}

#[test]
fn repeated_peer_entries_run_one_loop() {
    let transport = ScriptedTransport::new();
    let messaging = RecordingMessaging::new();
    transport.script(&server("active"), vec![Attempt::Accept]);

    let mut second = peer("active");
    second.addr = "active.backup:9510".to_string();
    let discovery = MembershipDiscovery::new(
        config(vec![peer("active"), second, peer("active")]),
        transport.clone(),
        messaging.clone(),
    );
    assert_eq!(discovery.peer_states().len(), 1);

    let handle = discovery.start().expect("start discovery");
    assert!(messaging.wait_until(WAIT, |events| connected_count(events, "active") == 1));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(transport.attempts(&server("active")), 1);

    handle.shutdown();
    assert_eq!(
        messaging.events()[0],
        MessagingEvent::Connected {
            server: server("active"),
            channel: "active.stripe:9510#1".to_string(),
        }
    );
}
