pub mod average;
pub mod client;
pub mod clock;
pub mod config;
pub mod connection;
pub mod event;
pub mod net;
pub mod reliability;
pub mod sync;

pub use average::MovingAverage;
pub use client::Client;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ClientConfig, ConnectOptions};
pub use connection::{Connection, ConnectionState};
pub use event::ClientEvent;
pub use net::{
    DatagramSocket, DisconnectReason, Endpoint, LinkConditions, NetworkStats, Packet,
    PacketError, PacketType, SimulatedSocket, UdpDatagramSocket,
};
pub use reliability::{Channel, ChannelConfig, SendError};
pub use sync::{DEFAULT_PING_FREQUENCY, DEFAULT_PING_WINDOW_SIZE, NetworkTime};
