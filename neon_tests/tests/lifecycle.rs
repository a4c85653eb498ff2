// Session lifecycle over the in-memory network: leaving, liveness eviction,
// host shutdown, connect timeouts, and transport failure.

use neon_protocol::{ClientId, ConnectRequest, Message, PROTOCOL_VERSION, SessionId};
use neon_session::{
    ClientEvent, ConnectionState, HostError, HostEvent, ProcessError, diagnostics,
};
use neon_tests::{RELAY_ADDR, TestSession};

const SESSION: SessionId = SessionId(12345);

#[test]
fn client_disconnect_frees_name_and_id() {
    let mut session = TestSession::new(SESSION);
    let mut alice = session.client("Alice");
    session.join(&mut alice, SESSION);
    session.host.poll_events();

    alice.disconnect().unwrap();
    assert_eq!(alice.state(), ConnectionState::Disconnected);
    assert_eq!(alice.client_id(), ClientId::UNASSIGNED);
    session.deliver();
    assert_eq!(session.host.client_count(), 0);
    assert_eq!(
        session.host.poll_events(),
        vec![HostEvent::ClientDisconnected {
            client_id: ClientId(1),
            name: "Alice".into(),
        }]
    );

    let mut again = session.client("Alice");
    session.join(&mut again, SESSION);
    assert!(again.is_connected());
    assert_eq!(again.client_id(), ClientId(1));
}

#[test]
fn silent_member_is_evicted_and_told() {
    let mut session = TestSession::new(SESSION);
    let mut alice = session.client("Alice");
    session.join(&mut alice, SESSION);
    alice.drain_events();
    session.host.poll_events();

    // Exactly at the timeout the member is still in.
    session.clock.advance_millis(15_000);
    session.deliver();
    assert_eq!(session.host.client_count(), 1);

    session.clock.advance_millis(1);
    session.deliver();
    assert_eq!(session.host.client_count(), 0);
    assert_eq!(
        session.host.poll_events(),
        vec![HostEvent::ClientTimedOut {
            client_id: ClientId(1),
            name: "Alice".into(),
        }]
    );

    alice.process_packets().unwrap();
    assert!(!alice.is_connected());
    assert_eq!(
        alice.drain_events(),
        vec![ClientEvent::HostDisconnected {
            reason: "timed out".into(),
        }]
    );
}

#[test]
fn any_traffic_keeps_member_alive() {
    let mut session = TestSession::new(SESSION);
    let mut alice = session.client("Alice");
    session.join(&mut alice, SESSION);

    for _ in 0..4 {
        session.clock.advance_millis(10_000);
        alice.send_packet(0x10, ClientId::HOST, b"tick").unwrap();
        session.deliver();
    }
    assert_eq!(session.host.client_count(), 1);
    assert!(session.host.members().all(|m| m.last_seen == 41_000));
}

#[test]
fn host_stop_notifies_every_member() {
    let mut session = TestSession::new(SESSION);
    let mut alice = session.client("Alice");
    let mut bob = session.client("Bob");
    session.join(&mut alice, SESSION);
    session.join(&mut bob, SESSION);
    alice.drain_events();
    bob.drain_events();

    // Stop raised before the loop runs: the loop exits at once and tears
    // the session down.
    session.host.stop_signal().stop();
    session.host.start().unwrap();
    assert_eq!(session.host.client_count(), 0);
    assert!(!session.host.status().is_running());

    session.relay.pump().unwrap();
    for client in [&mut alice, &mut bob] {
        client.process_packets().unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(
            client.drain_events(),
            vec![ClientEvent::HostDisconnected {
                reason: "host shutting down".into(),
            }]
        );
    }
}

#[test]
fn connect_without_host_times_out() {
    let mut session = TestSession::new(SESSION);
    let mut lost = session.client("Lost");
    lost.connect(SessionId(777), RELAY_ADDR).unwrap();
    session.deliver();
    lost.process_packets().unwrap();
    assert_eq!(lost.state(), ConnectionState::Connecting);

    session.clock.advance_millis(10_000);
    let err = lost.process_packets().unwrap_err();
    assert!(matches!(err, ProcessError::ConnectFailed(_)));
    assert_eq!(lost.state(), ConnectionState::Disconnected);
    assert!(session.relay.dropped() >= 1);
}

#[test]
fn request_for_other_session_is_dropped() {
    let mut session = TestSession::new(SESSION);
    session.host.poll_events();
    let relay_addr = session.relay.local_addr().unwrap();
    let host_addr = session.host.local_addr().unwrap();

    let request = Message::ConnectRequest(ConnectRequest {
        client_version: PROTOCOL_VERSION,
        target_session_id: SessionId(999),
        game_identifier: 0,
        desired_name: "Carol".into(),
    })
    .into_frame(ClientId::UNASSIGNED, ClientId::HOST);
    session
        .network
        .inject(relay_addr, host_addr, &request.encode())
        .unwrap();
    session.host.process_packets().unwrap();

    assert_eq!(session.host.client_count(), 0);
    assert!(session.host.poll_events().is_empty());
    assert_eq!(session.network.pending(relay_addr), 0);
}

#[test]
fn broken_host_transport_is_fatal() {
    let mut session = TestSession::new(SESSION);
    let host_addr = session.host.local_addr().unwrap();
    session.network.set_faulty(host_addr, true);

    let err = session.host.start().unwrap_err();
    assert!(matches!(err, HostError::Registration(_)));
    assert!(session.host.last_error().is_some());
    assert!(!session.host.status().is_running());
}

#[test]
fn spawned_host_failure_reaches_joining_thread() {
    let TestSession { network, host, .. } = TestSession::new(SESSION);
    network.set_faulty(host.local_addr().unwrap(), true);

    diagnostics::clear_last_error();
    let handle = host.spawn().unwrap();
    let err = handle.join().unwrap_err();
    assert!(matches!(err, HostError::Registration(_)));
    assert_eq!(diagnostics::last_error(), Some(err.to_string()));
}
