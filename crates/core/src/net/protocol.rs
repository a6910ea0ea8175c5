use bytes::{Buf, BufMut, Bytes, BytesMut};

pub const DEFAULT_MTU: usize = 1200;
pub const PROTOCOL_VERSION: u8 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x5445_5448;

/// opcode + session id
pub const PACKET_HEADER_SIZE: usize = 5;
/// ack cursor + ack bits + window + segment count
pub const RELIABLE_HEADER_SIZE: usize = 11;
/// sequence + fragment + length
pub const SEGMENT_HEADER_SIZE: usize = 7;
pub const MAX_SEGMENTS_PER_PACKET: usize = u8::MAX as usize;
pub const ACK_BITS: u32 = 32;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

/// Signed distance from `from` to `to` in wrap-around sequence space.
#[inline]
pub fn sequence_diff(to: u32, from: u32) -> i32 {
    to.wrapping_sub(from) as i32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    HandshakeRequest = 1,
    HandshakeAck = 2,
    Ping = 3,
    PingReply = 4,
    Disconnect = 5,
    Reliable = 6,
    Unreliable = 7,
}

impl TryFrom<u8> for Opcode {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => Self::HandshakeRequest,
            2 => Self::HandshakeAck,
            3 => Self::Ping,
            4 => Self::PingReply,
            5 => Self::Disconnect,
            6 => Self::Reliable,
            7 => Self::Unreliable,
            other => return Err(PacketError::UnknownOpcode(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DisconnectReason {
    Graceful = 0,
    Rejected = 1,
    Timeout = 2,
    ProtocolViolation = 3,
    DeadLink = 4,
    SocketError = 5,
    Aborted = 6,
    ClosedByPeer = 7,
}

impl TryFrom<u8> for DisconnectReason {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Graceful,
            1 => Self::Rejected,
            2 => Self::Timeout,
            3 => Self::ProtocolViolation,
            4 => Self::DeadLink,
            5 => Self::SocketError,
            6 => Self::Aborted,
            7 => Self::ClosedByPeer,
            other => return Err(PacketError::InvalidReason(other)),
        })
    }
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::Graceful => "disconnected",
            DisconnectReason::Rejected => "rejected",
            DisconnectReason::Timeout => "timed out",
            DisconnectReason::ProtocolViolation => "protocol violation",
            DisconnectReason::DeadLink => "dead link",
            DisconnectReason::SocketError => "socket error",
            DisconnectReason::Aborted => "aborted",
            DisconnectReason::ClosedByPeer => "closed by peer",
        }
    }
}

/// Cumulative ack plus a bitmap of segments buffered beyond it.
///
/// `cursor` is the next sequence the receiver expects; bit `i` of `bits` means
/// `cursor + i + 1` has been received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckHeader {
    pub cursor: u32,
    pub bits: u32,
    pub window: u16,
}

impl AckHeader {
    pub fn acknowledges(&self, sequence: u32) -> bool {
        if sequence_greater_than(self.cursor, sequence) {
            return true;
        }
        let diff = sequence.wrapping_sub(self.cursor);
        diff >= 1 && diff <= ACK_BITS && self.bits & (1 << (diff - 1)) != 0
    }

    /// Highest sequence number this header reports as received, if any.
    pub fn highest_acked(&self) -> Option<u32> {
        if self.bits != 0 {
            let top = ACK_BITS - self.bits.leading_zeros();
            Some(self.cursor.wrapping_add(top))
        } else if self.cursor != 0 {
            Some(self.cursor.wrapping_sub(1))
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFrame {
    pub sequence: u32,
    /// Number of fragments of the same message that follow this one.
    pub fragment: u8,
    pub payload: Bytes,
}

impl SegmentFrame {
    pub fn encoded_len(&self) -> usize {
        SEGMENT_HEADER_SIZE + self.payload.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReliableFrame {
    pub ack: AckHeader,
    pub segments: Vec<SegmentFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PacketType {
    HandshakeRequest { token: u64 },
    HandshakeAck { token: u64 },
    Ping { time: f64 },
    PingReply { echo: f64, time: f64 },
    Disconnect { reason: DisconnectReason },
    Reliable(ReliableFrame),
    Unreliable(Bytes),
}

impl PacketType {
    pub fn opcode(&self) -> Opcode {
        match self {
            PacketType::HandshakeRequest { .. } => Opcode::HandshakeRequest,
            PacketType::HandshakeAck { .. } => Opcode::HandshakeAck,
            PacketType::Ping { .. } => Opcode::Ping,
            PacketType::PingReply { .. } => Opcode::PingReply,
            PacketType::Disconnect { .. } => Opcode::Disconnect,
            PacketType::Reliable(_) => Opcode::Reliable,
            PacketType::Unreliable(_) => Opcode::Unreliable,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub session: u32,
    pub payload: PacketType,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("truncated {field}: needed {needed} bytes, {remaining} left")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("bad protocol magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported protocol version {0}")]
    VersionMismatch(u8),
    #[error("invalid disconnect reason {0}")]
    InvalidReason(u8),
    #[error("{0} trailing bytes after packet")]
    TrailingBytes(usize),
}

fn ensure(buf: &Bytes, field: &'static str, needed: usize) -> Result<(), PacketError> {
    if buf.remaining() < needed {
        return Err(PacketError::Truncated {
            field,
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

impl Packet {
    pub fn new(session: u32, payload: PacketType) -> Self {
        Self { session, payload }
    }

    pub fn opcode(&self) -> Opcode {
        self.payload.opcode()
    }

    pub fn encoded_len(&self) -> usize {
        PACKET_HEADER_SIZE
            + match &self.payload {
                PacketType::HandshakeRequest { .. } | PacketType::HandshakeAck { .. } => 13,
                PacketType::Ping { .. } => 8,
                PacketType::PingReply { .. } => 16,
                PacketType::Disconnect { .. } => 1,
                PacketType::Reliable(frame) => {
                    RELIABLE_HEADER_SIZE
                        + frame
                            .segments
                            .iter()
                            .map(SegmentFrame::encoded_len)
                            .sum::<usize>()
                }
                PacketType::Unreliable(payload) => payload.len(),
            }
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.opcode() as u8);
        buf.put_u32(self.session);

        match &self.payload {
            PacketType::HandshakeRequest { token } | PacketType::HandshakeAck { token } => {
                buf.put_u32(PROTOCOL_MAGIC);
                buf.put_u8(PROTOCOL_VERSION);
                buf.put_u64(*token);
            }
            PacketType::Ping { time } => buf.put_f64(*time),
            PacketType::PingReply { echo, time } => {
                buf.put_f64(*echo);
                buf.put_f64(*time);
            }
            PacketType::Disconnect { reason } => buf.put_u8(*reason as u8),
            PacketType::Reliable(frame) => {
                debug_assert!(frame.segments.len() <= MAX_SEGMENTS_PER_PACKET);
                buf.put_u32(frame.ack.cursor);
                buf.put_u32(frame.ack.bits);
                buf.put_u16(frame.ack.window);
                buf.put_u8(frame.segments.len() as u8);
                for segment in &frame.segments {
                    buf.put_u32(segment.sequence);
                    buf.put_u8(segment.fragment);
                    buf.put_u16(segment.payload.len() as u16);
                    buf.put_slice(&segment.payload);
                }
            }
            PacketType::Unreliable(payload) => buf.put_slice(payload),
        }

        buf.freeze()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        if data.is_empty() {
            return Err(PacketError::Empty);
        }

        let mut buf = Bytes::copy_from_slice(data);
        let opcode = Opcode::try_from(buf.get_u8())?;
        ensure(&buf, "session", 4)?;
        let session = buf.get_u32();

        let payload = match opcode {
            Opcode::HandshakeRequest | Opcode::HandshakeAck => {
                ensure(&buf, "handshake", 13)?;
                let magic = buf.get_u32();
                if magic != PROTOCOL_MAGIC {
                    return Err(PacketError::BadMagic(magic));
                }
                let version = buf.get_u8();
                if version != PROTOCOL_VERSION {
                    return Err(PacketError::VersionMismatch(version));
                }
                let token = buf.get_u64();
                if opcode == Opcode::HandshakeRequest {
                    PacketType::HandshakeRequest { token }
                } else {
                    PacketType::HandshakeAck { token }
                }
            }
            Opcode::Ping => {
                ensure(&buf, "ping", 8)?;
                PacketType::Ping {
                    time: buf.get_f64(),
                }
            }
            Opcode::PingReply => {
                ensure(&buf, "ping reply", 16)?;
                PacketType::PingReply {
                    echo: buf.get_f64(),
                    time: buf.get_f64(),
                }
            }
            Opcode::Disconnect => {
                ensure(&buf, "disconnect reason", 1)?;
                PacketType::Disconnect {
                    reason: DisconnectReason::try_from(buf.get_u8())?,
                }
            }
            Opcode::Reliable => PacketType::Reliable(Self::read_reliable(&mut buf)?),
            Opcode::Unreliable => PacketType::Unreliable(buf.split_off(0)),
        };

        if buf.has_remaining() {
            return Err(PacketError::TrailingBytes(buf.remaining()));
        }

        Ok(Self { session, payload })
    }

    fn read_reliable(buf: &mut Bytes) -> Result<ReliableFrame, PacketError> {
        ensure(buf, "reliable header", RELIABLE_HEADER_SIZE)?;
        let ack = AckHeader {
            cursor: buf.get_u32(),
            bits: buf.get_u32(),
            window: buf.get_u16(),
        };
        let count = buf.get_u8() as usize;

        let mut segments = Vec::with_capacity(count);
        for _ in 0..count {
            ensure(buf, "segment header", SEGMENT_HEADER_SIZE)?;
            let sequence = buf.get_u32();
            let fragment = buf.get_u8();
            let len = buf.get_u16() as usize;
            ensure(buf, "segment payload", len)?;
            segments.push(SegmentFrame {
                sequence,
                fragment,
                payload: buf.split_to(len),
            });
        }

        Ok(ReliableFrame { ack, segments })
    }
}
