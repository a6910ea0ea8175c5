use bytes::Bytes;

use crate::net::DisconnectReason;
use crate::reliability::Channel;

/// Notifications queued by the connection and drained by the owner after
/// each call into the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Handshake completed. Fires at most once per connection, before any data.
    Connected,
    Data { channel: Channel, payload: Bytes },
    /// Terminal. Fires exactly once per connection that was opened.
    Disconnected { reason: DisconnectReason },
}
