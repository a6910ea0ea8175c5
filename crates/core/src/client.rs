use std::collections::VecDeque;

use crate::clock::{Clock, MonotonicClock};
use crate::config::{ClientConfig, ConnectOptions};
use crate::connection::{Connection, ConnectionState};
use crate::event::ClientEvent;
use crate::net::{DatagramSocket, Endpoint, NetworkStats};
use crate::reliability::{Channel, SendError};
use crate::sync::NetworkTime;

#[derive(Debug)]
enum ClientState {
    NoConnection,
    Active(Box<Connection>),
}

/// Entry point an application holds: one socket, at most one connection.
///
/// Nothing happens in the background. The owner calls `tick` once per loop
/// iteration and drains the resulting events afterwards.
#[derive(Debug)]
pub struct Client<S: DatagramSocket, C: Clock = MonotonicClock> {
    socket: S,
    clock: C,
    config: ClientConfig,
    time: NetworkTime,
    state: ClientState,
    connected: bool,
    events: VecDeque<ClientEvent>,
}

impl<S: DatagramSocket> Client<S, MonotonicClock> {
    pub fn new(socket: S, config: ClientConfig) -> Self {
        Self::with_clock(socket, MonotonicClock::new(), config)
    }
}

impl<S: DatagramSocket, C: Clock> Client<S, C> {
    pub fn with_clock(socket: S, clock: C, config: ClientConfig) -> Self {
        let time = NetworkTime::new(config.ping_frequency, config.ping_window_size);
        Self {
            socket,
            clock,
            config,
            time,
            state: ClientState::NoConnection,
            connected: false,
            events: VecDeque::new(),
        }
    }

    pub fn connect(&mut self, host: &str, port: u16, options: ConnectOptions) {
        if let ClientState::Active(connection) = &self.state {
            log::warn!(
                "Connect to {}:{} ignored, already {:?} with {}",
                host,
                port,
                connection.state(),
                connection.endpoint()
            );
            return;
        }

        // estimates from an earlier session say nothing about this one
        self.time.reset();

        let connection = Connection::open(
            &mut self.socket,
            Endpoint::new(host, port),
            options,
            self.config.clone(),
            self.clock.now(),
        );
        self.state = ClientState::Active(Box::new(connection));
        self.collect_events();
    }

    /// Queues `payload` on `channel`. Without a connected session the payload
    /// is dropped with a warning.
    pub fn send(&mut self, payload: &[u8], channel: Channel) -> Result<(), SendError> {
        let now = self.clock.now();
        let result = match &mut self.state {
            ClientState::Active(connection) if self.connected => {
                connection.send(&mut self.socket, &self.time, payload, channel, now)
            }
            _ => Err(SendError::NotConnected),
        };

        if let Err(e) = &result {
            log::warn!("Dropped {} byte {:?} message: {}", payload.len(), channel, e);
        }
        self.collect_events();
        result
    }

    pub fn disconnect(&mut self) {
        let now = self.clock.now();
        match &mut self.state {
            ClientState::Active(connection) => connection.disconnect(&mut self.socket, now),
            ClientState::NoConnection => {
                log::warn!("Disconnect ignored, not connected");
            }
        }
        self.collect_events();
    }

    pub fn tick(&mut self) {
        let now = self.clock.now();
        if let ClientState::Active(connection) = &mut self.state {
            connection.tick(&mut self.socket, &mut self.time, now);
        }
        self.collect_events();
    }

    pub fn pause(&mut self) {
        match &mut self.state {
            ClientState::Active(connection) => connection.pause(),
            ClientState::NoConnection => log::warn!("Pause ignored, not connected"),
        }
    }

    pub fn unpause(&mut self) {
        let now = self.clock.now();
        match &mut self.state {
            ClientState::Active(connection) => connection.unpause(now),
            ClientState::NoConnection => log::warn!("Unpause ignored, not connected"),
        }
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.events.drain(..)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Lifecycle state of the live connection, `None` when there is none.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        match &self.state {
            ClientState::Active(connection) => Some(connection.state()),
            ClientState::NoConnection => None,
        }
    }

    pub fn stats(&self) -> Option<&NetworkStats> {
        match &self.state {
            ClientState::Active(connection) => Some(connection.stats()),
            ClientState::NoConnection => None,
        }
    }

    pub fn network_time(&self) -> &NetworkTime {
        &self.time
    }

    /// Synchronized time in seconds.
    pub fn time(&self) -> f64 {
        self.time.time(self.clock.now())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn socket_mut(&mut self) -> &mut S {
        &mut self.socket
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn collect_events(&mut self) {
        let ClientState::Active(connection) = &mut self.state else {
            return;
        };

        let mut finished = false;
        for event in connection.drain_events() {
            match &event {
                ClientEvent::Connected => self.connected = true,
                ClientEvent::Disconnected { .. } => {
                    self.connected = false;
                    finished = true;
                }
                ClientEvent::Data { .. } => {}
            }
            self.events.push_back(event);
        }

        // the connection is dropped only once it has reported its end
        if finished {
            self.state = ClientState::NoConnection;
        }
    }
}
