#![allow(dead_code)]

use std::time::Duration;

use bytes::Bytes;
use tether::net::Endpoint;
use tether::reliability::{ChannelConfig, ReliableChannel};
use tether::{
    Channel, Client, ClientConfig, ClientEvent, Clock, ConnectOptions, DisconnectReason,
    ManualClock, Packet, PacketType, SimulatedSocket,
};

pub const SESSION: u32 = 0x00C0_FFEE;
pub const STEP_MS: u64 = 10;

/// Minimal server side of the protocol, driven by hand from the tests.
pub struct Peer {
    pub session: u32,
    pub responsive: bool,
    /// Added to the local clock when the peer reports its time.
    pub clock_skew: f64,
    pub channel: ReliableChannel,
    pub received: Vec<(Channel, Bytes)>,
    pub handshakes: usize,
    pub pings: usize,
    pub disconnects: Vec<DisconnectReason>,
    outgoing: Vec<Vec<u8>>,
}

impl Peer {
    pub fn new() -> Self {
        Self {
            session: SESSION,
            responsive: true,
            clock_skew: 0.0,
            channel: ReliableChannel::new(&ChannelConfig::default()),
            received: Vec::new(),
            handshakes: 0,
            pings: 0,
            disconnects: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    pub fn send_reliable(&mut self, data: &[u8]) {
        self.channel.send(data).unwrap();
    }

    pub fn send_unreliable(&mut self, data: &[u8]) {
        self.push(PacketType::Unreliable(Bytes::copy_from_slice(data)));
    }

    pub fn send_disconnect(&mut self, reason: DisconnectReason) {
        self.push(PacketType::Disconnect { reason });
    }

    fn push(&mut self, payload: PacketType) {
        self.outgoing
            .push(Packet::new(self.session, payload).serialize().to_vec());
    }

    /// Consumes what the client sent and returns the datagrams to deliver back.
    pub fn exchange(
        &mut self,
        sent: Vec<(Vec<u8>, Endpoint)>,
        now: Duration,
    ) -> Vec<Vec<u8>> {
        if !self.responsive {
            return Vec::new();
        }

        for (datagram, _) in sent {
            let packet = Packet::deserialize(&datagram).unwrap();
            match packet.payload {
                PacketType::HandshakeRequest { token } => {
                    self.handshakes += 1;
                    self.push(PacketType::HandshakeAck { token });
                }
                PacketType::Ping { time } => {
                    self.pings += 1;
                    self.push(PacketType::PingReply {
                        echo: time,
                        time: now.as_secs_f64() + self.clock_skew,
                    });
                }
                PacketType::Reliable(frame) => {
                    self.channel.on_frame(frame);
                    while let Some(message) = self.channel.pop_message() {
                        self.received.push((Channel::Reliable, message));
                    }
                }
                PacketType::Unreliable(payload) => {
                    self.received.push((Channel::Unreliable, payload));
                }
                PacketType::Disconnect { reason } => {
                    if self.disconnects.is_empty() {
                        self.push(PacketType::Disconnect {
                            reason: DisconnectReason::Graceful,
                        });
                    }
                    self.disconnects.push(reason);
                }
                PacketType::HandshakeAck { .. } | PacketType::PingReply { .. } => {
                    panic!("client sent a server-side packet");
                }
            }
        }

        for frame in self.channel.flush(now, None).frames {
            self.push(PacketType::Reliable(frame));
        }
        std::mem::take(&mut self.outgoing)
    }

    pub fn reliable_messages(&self) -> Vec<Bytes> {
        self.received
            .iter()
            .filter(|(channel, _)| *channel == Channel::Reliable)
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

pub struct Setup {
    pub clock: ManualClock,
    pub client: Client<SimulatedSocket, ManualClock>,
    pub peer: Peer,
    pub events: Vec<ClientEvent>,
}

impl Setup {
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Self {
        let clock = ManualClock::new();
        let socket = SimulatedSocket::new(clock.clone());
        Self {
            client: Client::with_clock(socket, clock.clone(), config),
            clock,
            peer: Peer::new(),
            events: Vec::new(),
        }
    }

    pub fn connect(&mut self, options: ConnectOptions) {
        self.client.connect("host", 7777, options);
        self.collect();
        self.step();
        assert!(self.client.is_connected(), "handshake did not complete");
    }

    /// Advances time by one step: the peer answers what the client sent
    /// during the previous step, then the client ticks.
    pub fn step(&mut self) {
        self.clock.advance(Duration::from_millis(STEP_MS));
        let now = self.clock.now();

        let sent = self.client.socket_mut().take_sent();
        for datagram in self.peer.exchange(sent, now) {
            self.client.socket_mut().inject(datagram);
        }

        self.client.tick();
        self.collect();
    }

    pub fn run_for(&mut self, duration: Duration) {
        let steps = duration.as_millis() as u64 / STEP_MS;
        for _ in 0..steps {
            self.step();
        }
    }

    /// Steps until `done` holds, at most `max_steps` times.
    pub fn run_until(
        &mut self,
        max_steps: usize,
        mut done: impl FnMut(&Self) -> bool,
    ) -> bool {
        for _ in 0..max_steps {
            if done(&*self) {
                return true;
            }
            self.step();
        }
        done(&*self)
    }

    pub fn clock_secs(&self) -> f64 {
        self.clock.now().as_secs_f64()
    }

    pub fn collect(&mut self) {
        self.events.extend(self.client.drain_events());
    }

    pub fn data(&self) -> Vec<(Channel, Bytes)> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ClientEvent::Data { channel, payload } => Some((*channel, payload.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: fn(&ClientEvent) -> bool) -> usize {
        self.events.iter().filter(|event| wanted(event)).count()
    }
}

pub fn is_connected(event: &ClientEvent) -> bool {
    matches!(event, ClientEvent::Connected)
}

pub fn is_disconnected(event: &ClientEvent) -> bool {
    matches!(event, ClientEvent::Disconnected { .. })
}
