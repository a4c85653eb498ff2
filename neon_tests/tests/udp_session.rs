// Smoke test over real UDP sockets on loopback: relay on its own thread,
// host spawned through `Host::spawn`, client polled from the test thread.
// Timing is wall-clock here, so assertions go through `wait_until`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use neon_protocol::{ClientId, SessionId};
use neon_session::{Client, ClientEvent, Host, HostEvent, Transport, UdpTransport};
use neon_tests::{LoopbackRelay, init_tracing, wait_until};

const SESSION: SessionId = SessionId(4242);

#[test]
fn udp_session_round_trip() {
    init_tracing();
    let relay_transport = UdpTransport::bind("127.0.0.1:0").unwrap();
    let relay_addr = relay_transport.local_addr().unwrap().to_string();
    let mut relay = LoopbackRelay::new(relay_transport);
    let relay_stop = Arc::new(AtomicBool::new(false));
    let relay_thread = {
        let stop = relay_stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                let _ = relay.pump();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let handle = Host::new(SESSION, &relay_addr).unwrap().spawn().unwrap();
    assert!(wait_until(|| handle.is_running()));
    // Give the relay a moment to bind the registration.
    thread::sleep(Duration::from_millis(50));

    let mut alice = Client::new("Alice").unwrap();
    alice.set_auto_ping(false);
    alice.connect(SESSION, &relay_addr).unwrap();
    assert!(wait_until(|| {
        let _ = alice.process_packets();
        alice.is_connected()
    }));
    assert_eq!(alice.client_id(), ClientId(1));
    assert_eq!(alice.session_id(), SESSION);
    assert!(wait_until(|| handle.client_count() == 1));

    alice.send_ping().unwrap();
    assert!(wait_until(|| {
        let _ = alice.process_packets();
        alice.last_rtt().is_some()
    }));

    let events = handle.poll_events();
    assert!(events.contains(&HostEvent::ClientConnected {
        client_id: ClientId(1),
        name: "Alice".into(),
        session_id: SESSION,
    }));

    alice.drain_events();
    handle.stop().unwrap();
    assert!(wait_until(|| {
        let _ = alice.process_packets();
        !alice.is_connected()
    }));
    assert!(alice.drain_events().contains(&ClientEvent::HostDisconnected {
        reason: "host shutting down".into(),
    }));

    relay_stop.store(true, Ordering::SeqCst);
    relay_thread.join().unwrap();
}
