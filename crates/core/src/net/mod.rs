mod protocol;
mod simulator;
mod socket;
mod stats;

pub use protocol::{
    ACK_BITS, AckHeader, DEFAULT_MTU, DisconnectReason, MAX_SEGMENTS_PER_PACKET, Opcode,
    PACKET_HEADER_SIZE, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet, PacketError, PacketType,
    RELIABLE_HEADER_SIZE, ReliableFrame, SEGMENT_HEADER_SIZE, SegmentFrame, sequence_diff,
    sequence_greater_than,
};
pub use simulator::{LinkConditions, SimulatedSocket};
pub use socket::{DatagramSocket, Endpoint, UdpDatagramSocket};
pub use stats::NetworkStats;
