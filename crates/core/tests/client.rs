mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{Setup, is_connected, is_disconnected};
use tether::{
    Channel, ClientConfig, ClientEvent, ConnectOptions, ConnectionState, DisconnectReason,
    LinkConditions, SendError,
};

#[test]
fn test_connected_fires_once() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());
    assert_eq!(setup.events, vec![ClientEvent::Connected]);

    setup.run_for(Duration::from_secs(5));
    assert_eq!(setup.count(is_connected), 1);
    assert_eq!(setup.peer.handshakes, 1);
    assert!(setup.client.is_connected());
}

#[test]
fn test_send_before_connected_is_dropped() {
    let mut setup = Setup::new();
    setup.client.connect("host", 7777, ConnectOptions::default());

    assert_eq!(
        setup.client.send(b"too early", Channel::Reliable),
        Err(SendError::NotConnected)
    );
    // only the handshake request went out
    assert_eq!(setup.client.socket().sent_count(), 1);

    setup.step();
    setup.run_for(Duration::from_secs(1));
    assert!(setup.peer.received.is_empty());
}

#[test]
fn test_events_ordered_over_a_session() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());

    setup.peer.send_reliable(b"welcome");
    setup.step();
    setup.step();
    setup.client.disconnect();
    setup.run_for(Duration::from_millis(100));

    assert_eq!(
        setup.events,
        vec![
            ClientEvent::Connected,
            ClientEvent::Data {
                channel: Channel::Reliable,
                payload: Bytes::from_static(b"welcome"),
            },
            ClientEvent::Disconnected {
                reason: DisconnectReason::Graceful
            },
        ]
    );
    assert_eq!(setup.peer.disconnects.len(), 3);
    assert_eq!(setup.client.connection_state(), None);
}

#[test]
fn test_handshake_failure_never_connects() {
    let mut setup = Setup::new();
    setup.peer.responsive = false;
    setup.client.connect("host", 7777, ConnectOptions::default());

    setup.run_for(Duration::from_secs(11));

    assert_eq!(setup.count(is_connected), 0);
    assert_eq!(
        setup.events,
        vec![ClientEvent::Disconnected {
            reason: DisconnectReason::Timeout
        }]
    );
}

#[test]
fn test_idle_timeout_disconnects_once() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());
    setup.peer.responsive = false;

    setup.run_for(Duration::from_secs(9));
    assert!(setup.client.is_connected());

    setup.run_for(Duration::from_secs(2));
    assert!(!setup.client.is_connected());
    assert_eq!(setup.count(is_disconnected), 1);
    assert_eq!(
        setup.events.last(),
        Some(&ClientEvent::Disconnected {
            reason: DisconnectReason::Timeout
        })
    );

    setup.run_for(Duration::from_secs(5));
    assert_eq!(setup.count(is_disconnected), 1);
}

#[test]
fn test_keepalive_holds_idle_session() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());

    setup.run_for(Duration::from_secs(30));
    assert!(setup.client.is_connected());
    assert!(setup.peer.pings >= 15);
}

#[test]
fn test_peer_close() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());

    setup.peer.send_disconnect(DisconnectReason::Graceful);
    setup.step();

    assert_eq!(
        setup.events.last(),
        Some(&ClientEvent::Disconnected {
            reason: DisconnectReason::ClosedByPeer
        })
    );
    assert!(!setup.client.is_connected());
}

#[test]
fn test_reliable_delivery_under_loss() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions {
        fast_resend: 2,
        ..ConnectOptions::default()
    });
    setup
        .client
        .socket_mut()
        .set_outbound_conditions(LinkConditions::lossy(20.0));
    setup
        .client
        .socket_mut()
        .set_inbound_conditions(LinkConditions::lossy(20.0));

    let mut expected: Vec<Vec<u8>> = (0..40u8).map(|i| vec![i; 1 + i as usize * 7]).collect();
    expected.insert(20, (0..4000u32).map(|i| i as u8).collect());
    for message in &expected {
        setup.client.send(message, Channel::Reliable).unwrap();
    }

    let delivered = setup.run_until(3_000, |setup| {
        setup.peer.reliable_messages().len() == expected.len()
    });
    assert!(delivered, "only {} messages arrived", setup.peer.reliable_messages().len());
    assert_eq!(setup.peer.reliable_messages(), expected);
    assert!(setup.client.is_connected());

    let stats = setup.client.stats().unwrap();
    assert!(stats.retransmits + stats.fast_retransmits > 0);
}

#[test]
fn test_reliable_receive_under_loss() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());
    setup
        .client
        .socket_mut()
        .set_inbound_conditions(LinkConditions::lossy(30.0));

    let expected: Vec<Bytes> = (0..30u32)
        .map(|i| Bytes::from(format!("message {}", i)))
        .collect();
    for message in &expected {
        setup.peer.send_reliable(message);
    }

    let delivered = setup.run_until(3_000, |setup| setup.data().len() == expected.len());
    assert!(delivered);
    let received: Vec<Bytes> = setup.data().into_iter().map(|(_, payload)| payload).collect();
    assert_eq!(received, expected);
}

#[test]
fn test_unreliable_not_retransmitted_nor_deduplicated() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());

    setup.client.send(b"once", Channel::Unreliable).unwrap();
    setup.run_for(Duration::from_secs(3));
    let unreliable: Vec<_> = setup
        .peer
        .received
        .iter()
        .filter(|(channel, _)| *channel == Channel::Unreliable)
        .collect();
    assert_eq!(unreliable.len(), 1);

    setup.peer.send_unreliable(b"twice");
    setup.peer.send_unreliable(b"twice");
    setup.step();
    assert_eq!(
        setup.data(),
        vec![
            (Channel::Unreliable, Bytes::from_static(b"twice")),
            (Channel::Unreliable, Bytes::from_static(b"twice")),
        ]
    );
}

#[test]
fn test_oversized_unreliable_rejected() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());

    let result = setup.client.send(&vec![0u8; 1196], Channel::Unreliable);
    assert!(matches!(result, Err(SendError::Oversized { max: 1195, .. })));
    assert!(setup.client.is_connected());
}

#[test]
fn test_pause_defers_intake() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());

    setup.client.pause();
    setup.peer.send_unreliable(b"while paused");
    setup.run_for(Duration::from_secs(15));

    // held in the socket, and no idle timeout while paused
    assert!(setup.data().is_empty());
    assert!(setup.client.socket().pending_inbound() > 0);
    assert_eq!(
        setup.client.connection_state(),
        Some(ConnectionState::Connected)
    );

    setup.client.unpause();
    setup.step();
    assert_eq!(
        setup.data().first(),
        Some(&(Channel::Unreliable, Bytes::from_static(b"while paused")))
    );
    assert!(setup.client.is_connected());
}

#[test]
fn test_sends_while_paused_are_delivered() {
    let mut setup = Setup::new();
    setup.connect(ConnectOptions::default());

    setup.client.pause();
    setup.client.send(b"queued", Channel::Reliable).unwrap();
    setup.run_for(Duration::from_secs(1));
    setup.client.unpause();
    setup.run_for(Duration::from_secs(1));

    assert_eq!(
        setup.peer.reliable_messages(),
        vec![Bytes::from_static(b"queued")]
    );
}

#[test]
fn test_ping_estimates_rtt_and_offset() {
    let config = ClientConfig {
        ping_frequency: Duration::from_secs(1),
        ..ClientConfig::default()
    };
    let mut setup = Setup::with_config(config);
    setup.peer.clock_skew = 100.0;
    setup
        .client
        .socket_mut()
        .set_inbound_conditions(LinkConditions::latency(50));

    setup.client.connect("host", 7777, ConnectOptions::default());
    let connected = setup.run_until(20, |setup| setup.client.is_connected());
    assert!(connected);

    // two full round trips: one right after connecting, one a second later
    setup.run_for(Duration::from_millis(1_500));
    assert_eq!(setup.peer.pings, 2);

    // 10ms until the peer answers, 50ms back
    let time = setup.client.network_time();
    assert!((time.rtt() - 0.06).abs() < 1e-6, "rtt {}", time.rtt());
    assert!(time.rtt_sd() < 1e-6);

    let (min, max) = time.offset_bounds();
    assert!(min <= -100.0 && -100.0 <= max);
    assert!((setup.client.time() - (setup.clock_secs() + 100.0)).abs() < 0.06);
}
