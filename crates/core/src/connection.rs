use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use bytes::Bytes;

use crate::config::{ClientConfig, ConnectOptions};
use crate::event::ClientEvent;
use crate::net::{
    DatagramSocket, DisconnectReason, Endpoint, NetworkStats, Packet, PacketType,
};
use crate::reliability::{Channel, ReliableChannel, SendError, UnreliableChannel};
use crate::sync::NetworkTime;

const RECEIVE_BUFFER_SIZE: usize = 64 * 1024;
const DISCONNECT_NOTICE_COPIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshaking,
    Authenticated,
    Connected,
    Disconnecting,
    Disconnected,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Disconnected
    }
}

/// One session with one peer, from handshake to teardown.
///
/// The connection owns neither the socket nor the clock; the client hands
/// both in on every call. Once `Disconnected` it stays there and must be
/// replaced for the next session.
#[derive(Debug)]
pub struct Connection {
    endpoint: Endpoint,
    state: ConnectionState,
    session: u32,
    token: u64,
    config: ClientConfig,
    options: ConnectOptions,
    reliable: ReliableChannel,
    unreliable: UnreliableChannel,
    created_at: Duration,
    last_receive: Duration,
    last_handshake: Duration,
    disconnect_started: Duration,
    next_update: Duration,
    paused: bool,
    stats: NetworkStats,
    events: VecDeque<ClientEvent>,
    buffer: Vec<u8>,
}

impl Connection {
    /// Starts the handshake with `endpoint`. A socket failure on the very
    /// first request leaves the connection already `Disconnected`.
    pub fn open<S: DatagramSocket>(
        socket: &mut S,
        endpoint: Endpoint,
        options: ConnectOptions,
        config: ClientConfig,
        now: Duration,
    ) -> Self {
        let channel_config = options.channel_config(&config);
        let mut connection = Self {
            endpoint,
            state: ConnectionState::Handshaking,
            session: 0,
            token: rand::random(),
            reliable: ReliableChannel::new(&channel_config),
            unreliable: UnreliableChannel::new(&channel_config),
            created_at: now,
            last_receive: now,
            last_handshake: now,
            disconnect_started: now,
            next_update: now,
            paused: false,
            stats: NetworkStats::default(),
            events: VecDeque::new(),
            buffer: vec![0u8; RECEIVE_BUFFER_SIZE],
            config,
            options,
        };

        log::info!("Connecting to {}", connection.endpoint);
        connection.send_handshake(socket, now);
        connection
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn created_at(&self) -> Duration {
        self.created_at
    }

    pub fn last_receive(&self) -> Duration {
        self.last_receive
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    /// One iteration: drain the socket, run timers, then flush channel output.
    pub fn tick<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        time: &mut NetworkTime,
        now: Duration,
    ) {
        if self.state.is_terminal() {
            return;
        }

        self.receive(socket, time, now);
        self.update_timers(socket, time, now);

        if self.state == ConnectionState::Connected
            && (self.options.no_delay || now >= self.next_update)
        {
            self.next_update = now + self.options.interval();
            self.flush(socket, time, now);
        }
    }

    pub fn send<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        time: &NetworkTime,
        data: &[u8],
        channel: Channel,
        now: Duration,
    ) -> Result<(), SendError> {
        if self.state != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }

        match channel {
            Channel::Reliable => {
                self.reliable.send(data)?;
            }
            Channel::Unreliable => self.unreliable.send(data)?,
        }
        self.stats.messages_sent += 1;

        if self.options.no_delay {
            self.flush(socket, time, now);
        }
        Ok(())
    }

    pub fn disconnect<S: DatagramSocket>(&mut self, socket: &mut S, now: Duration) {
        match self.state {
            ConnectionState::Handshaking | ConnectionState::Authenticated => {
                log::info!("Aborting handshake with {}", self.endpoint);
                self.fail(socket, DisconnectReason::Aborted);
            }
            ConnectionState::Connected => {
                log::info!("Disconnecting from {}", self.endpoint);
                self.reliable.clear();
                self.unreliable.clear();
                self.send_disconnect_notice(socket, DisconnectReason::Graceful);
                self.state = ConnectionState::Disconnecting;
                self.disconnect_started = now;
            }
            ConnectionState::Disconnecting | ConnectionState::Disconnected => {
                log::warn!("Disconnect requested while already {:?}", self.state);
            }
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            log::info!("Pausing connection to {}", self.endpoint);
            self.paused = true;
        }
    }

    pub fn unpause(&mut self, now: Duration) {
        if self.paused {
            log::info!("Resuming connection to {}", self.endpoint);
            self.paused = false;
            self.last_receive = now;
        }
    }

    fn receive<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        time: &mut NetworkTime,
        now: Duration,
    ) {
        if self.paused {
            return;
        }

        let mut buffer = std::mem::take(&mut self.buffer);
        while !self.state.is_terminal() {
            match socket.try_receive(&mut buffer) {
                Ok(Some(size)) => self.on_datagram(socket, time, &buffer[..size], now),
                Ok(None) => break,
                Err(e) => {
                    log::warn!("Receive from {} failed: {}", self.endpoint, e);
                    self.finish(DisconnectReason::SocketError);
                }
            }
        }
        self.buffer = buffer;
    }

    fn on_datagram<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        time: &mut NetworkTime,
        data: &[u8],
        now: Duration,
    ) {
        let packet = match Packet::deserialize(data) {
            Ok(packet) => packet,
            Err(e) => {
                log::warn!("Malformed datagram from {}: {}", self.endpoint, e);
                self.fail(socket, DisconnectReason::ProtocolViolation);
                return;
            }
        };
        self.stats.record_received(data.len());

        if self.state == ConnectionState::Handshaking {
            self.on_handshake_packet(socket, packet, now);
            return;
        }

        if packet.session != self.session {
            log::debug!(
                "Dropped {:?} for session {}, expected {}",
                packet.opcode(),
                packet.session,
                self.session
            );
            self.stats.packets_dropped += 1;
            return;
        }
        self.last_receive = now;

        match packet.payload {
            // late copies of our own resent handshake
            PacketType::HandshakeRequest { .. } | PacketType::HandshakeAck { .. } => {}
            PacketType::Ping { time: remote } => {
                self.send_packet(
                    socket,
                    PacketType::PingReply {
                        echo: remote,
                        time: now.as_secs_f64(),
                    },
                );
            }
            PacketType::PingReply { echo, time: remote } => {
                if time.on_pong(now, echo, remote) {
                    self.stats.rtt_ms = (time.rtt() * 1000.0) as f32;
                    self.stats.rtt_variance = (time.rtt_var() * 1_000_000.0) as f32;
                } else {
                    self.stats.packets_dropped += 1;
                }
            }
            PacketType::Disconnect { reason } => {
                if self.state == ConnectionState::Disconnecting {
                    self.finish(DisconnectReason::Graceful);
                } else {
                    log::info!("{} closed the connection ({})", self.endpoint, reason.as_str());
                    self.finish(DisconnectReason::ClosedByPeer);
                }
            }
            PacketType::Reliable(frame) => {
                self.reliable.on_frame(frame);
                while let Some(payload) = self.reliable.pop_message() {
                    self.deliver(Channel::Reliable, payload);
                }
            }
            PacketType::Unreliable(payload) => self.deliver(Channel::Unreliable, payload),
        }
    }

    fn on_handshake_packet<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        packet: Packet,
        now: Duration,
    ) {
        match packet.payload {
            PacketType::HandshakeAck { token } if token == self.token => {
                self.session = packet.session;
                self.state = ConnectionState::Authenticated;
                self.last_receive = now;
                log::debug!("Authenticated with {} as session {}", self.endpoint, self.session);

                self.state = ConnectionState::Connected;
                self.next_update = now;
                self.events.push_back(ClientEvent::Connected);
                log::info!("Connected to {}", self.endpoint);
            }
            PacketType::HandshakeAck { .. } => {
                log::warn!("Handshake token mismatch from {}", self.endpoint);
                self.fail(socket, DisconnectReason::ProtocolViolation);
            }
            PacketType::Disconnect { reason } => {
                log::warn!("{} rejected the connection ({})", self.endpoint, reason.as_str());
                self.finish(DisconnectReason::Rejected);
            }
            other => {
                log::debug!("Ignoring {:?} before the handshake completed", other.opcode());
                self.stats.packets_dropped += 1;
            }
        }
    }

    fn deliver(&mut self, channel: Channel, payload: Bytes) {
        if self.state != ConnectionState::Connected {
            return;
        }
        self.stats.messages_received += 1;
        self.events.push_back(ClientEvent::Data { channel, payload });
    }

    fn update_timers<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        time: &mut NetworkTime,
        now: Duration,
    ) {
        match self.state {
            ConnectionState::Handshaking => {
                if now.saturating_sub(self.created_at) >= self.config.handshake_timeout {
                    log::warn!("Handshake with {} timed out", self.endpoint);
                    self.fail(socket, DisconnectReason::Timeout);
                } else if now.saturating_sub(self.last_handshake)
                    >= self.config.handshake_resend_interval
                {
                    log::debug!("Resending handshake to {}", self.endpoint);
                    self.send_handshake(socket, now);
                }
            }
            ConnectionState::Connected => {
                let idle = now.saturating_sub(self.last_receive);
                if !self.paused && idle > self.config.idle_timeout {
                    log::warn!("No traffic from {} for {:?}", self.endpoint, idle);
                    self.fail(socket, DisconnectReason::Timeout);
                    return;
                }
                if time.poll_ping(now) {
                    self.send_packet(
                        socket,
                        PacketType::Ping {
                            time: now.as_secs_f64(),
                        },
                    );
                }
            }
            ConnectionState::Disconnecting => {
                if now.saturating_sub(self.disconnect_started) >= self.config.disconnect_timeout {
                    self.finish(DisconnectReason::Graceful);
                }
            }
            ConnectionState::Authenticated | ConnectionState::Disconnected => {}
        }
    }

    fn flush<S: DatagramSocket>(&mut self, socket: &mut S, time: &NetworkTime, now: Duration) {
        let estimate = time.has_sample().then(|| (time.rtt(), time.rtt_sd()));
        let flush = self.reliable.flush(now, estimate);

        self.stats.retransmits += u64::from(flush.retransmits);
        self.stats.fast_retransmits += u64::from(flush.fast_retransmits);
        if let Some(window) = self.reliable.congestion_window() {
            self.stats.congestion_window = window;
        }

        if flush.dead_link && !self.paused {
            log::warn!(
                "Dead link to {}: segment unacknowledged after {} sends",
                self.endpoint,
                self.config.dead_link
            );
            self.fail(socket, DisconnectReason::DeadLink);
            return;
        }

        for frame in flush.frames {
            if !self.send_packet(socket, PacketType::Reliable(frame)) {
                return;
            }
        }

        let outgoing: Vec<Bytes> = self.unreliable.take_outgoing().collect();
        for payload in outgoing {
            if !self.send_packet(socket, PacketType::Unreliable(payload)) {
                return;
            }
        }
    }

    fn send_handshake<S: DatagramSocket>(&mut self, socket: &mut S, now: Duration) {
        self.last_handshake = now;
        self.send_packet(socket, PacketType::HandshakeRequest { token: self.token });
    }

    fn send_disconnect_notice<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        reason: DisconnectReason,
    ) {
        for _ in 0..DISCONNECT_NOTICE_COPIES {
            if let Err(e) = self.transmit(socket, PacketType::Disconnect { reason }) {
                log::debug!("Disconnect notice to {} failed: {}", self.endpoint, e);
                break;
            }
        }
    }

    fn transmit<S: DatagramSocket>(
        &mut self,
        socket: &mut S,
        payload: PacketType,
    ) -> io::Result<()> {
        let datagram = Packet::new(self.session, payload).serialize();
        socket.send_to(&datagram, &self.endpoint)?;
        self.stats.record_sent(datagram.len());
        Ok(())
    }

    /// Sends one packet, turning a socket error into a terminal fault.
    fn send_packet<S: DatagramSocket>(&mut self, socket: &mut S, payload: PacketType) -> bool {
        match self.transmit(socket, payload) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Send to {} failed: {}", self.endpoint, e);
                self.finish(DisconnectReason::SocketError);
                false
            }
        }
    }

    /// Fault path: tell the peer when the socket still works, then finish.
    fn fail<S: DatagramSocket>(&mut self, socket: &mut S, reason: DisconnectReason) {
        if self.state.is_terminal() {
            return;
        }
        if !matches!(reason, DisconnectReason::SocketError | DisconnectReason::ClosedByPeer) {
            self.send_disconnect_notice(socket, reason);
        }
        self.finish(reason);
    }

    fn finish(&mut self, reason: DisconnectReason) {
        if self.state.is_terminal() {
            return;
        }

        match reason {
            DisconnectReason::Graceful | DisconnectReason::ClosedByPeer => {
                log::info!("Disconnected from {} ({})", self.endpoint, reason.as_str())
            }
            _ => log::warn!("Disconnected from {} ({})", self.endpoint, reason.as_str()),
        }

        self.state = ConnectionState::Disconnected;
        self.reliable.clear();
        self.unreliable.clear();
        self.events.push_back(ClientEvent::Disconnected { reason });
    }
}
