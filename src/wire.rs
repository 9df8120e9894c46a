//! Binary message framing.
//!
//! Every message starts with the 4-byte [`MAGIC_COOKIE`] and a 1-byte type
//! tag. All integers are big-endian.
//!
//! | Message | Bytes | Layout |
//! |---|---|---|
//! | Offer | 9 | cookie · type=0x2 · udp_port(2) · tcp_port(2) |
//! | Request | 13 | cookie · type=0x3 · size(8) |
//! | Payload | 21+N | cookie · type=0x4 · total_segments(8) · segment_index(8) · data(N) |

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;
use crate::params::MAGIC_COOKIE;

/// Length of the cookie and type tag shared by all messages.
pub const COMMON_HEADER_LEN: usize = 5;
/// Encoded length of an [`Offer`].
pub const OFFER_LEN: usize = COMMON_HEADER_LEN + 4;
/// Encoded length of a [`Request`].
pub const REQUEST_LEN: usize = COMMON_HEADER_LEN + 8;
/// Encoded length of a [`Payload`] header, before its data block.
pub const PAYLOAD_HEADER_LEN: usize = COMMON_HEADER_LEN + 16;

/// Type tag carried in the fifth byte of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Server advertisement.
    Offer = 0x2,
    /// Client request for a UDP transfer.
    Request = 0x3,
    /// One segment of a UDP transfer.
    Payload = 0x4,
}

impl MessageType {
    fn header_len(self) -> usize {
        match self {
            MessageType::Offer => OFFER_LEN,
            MessageType::Request => REQUEST_LEN,
            MessageType::Payload => PAYLOAD_HEADER_LEN,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, DecodeError> {
        match tag {
            0x2 => Ok(MessageType::Offer),
            0x3 => Ok(MessageType::Request),
            0x4 => Ok(MessageType::Payload),
            other => Err(DecodeError::BadTag(other)),
        }
    }
}

/// The ports a server accepts transfers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offer {
    /// Port of the server's UDP transfer socket.
    pub udp_port: u16,
    /// Port of the server's TCP listener.
    pub tcp_port: u16,
}

/// A client's request for a UDP transfer of `size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Number of bytes to transfer.
    pub size: u64,
}

/// One segment of a UDP transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Number of segments in the whole transfer.
    pub total_segments: u64,
    /// 0-based position of this segment.
    pub segment_index: u64,
    /// Segment content.
    pub data: Bytes,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// See [`Offer`].
    Offer(Offer),
    /// See [`Request`].
    Request(Request),
    /// See [`Payload`].
    Payload(Payload),
}

impl Message {
    /// Type tag of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Offer(_) => MessageType::Offer,
            Message::Request(_) => MessageType::Request,
            Message::Payload(_) => MessageType::Payload,
        }
    }

    /// Number of bytes [`Message::encode`] produces.
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::Payload(p) => PAYLOAD_HEADER_LEN + p.data.len(),
            other => other.message_type().header_len(),
        }
    }

    /// Serialize into a fresh buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Append the wire form of this message to `buf`.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u32(MAGIC_COOKIE);
        buf.put_u8(self.message_type() as u8);
        match self {
            Message::Offer(o) => {
                buf.put_u16(o.udp_port);
                buf.put_u16(o.tcp_port);
            }
            Message::Request(r) => buf.put_u64(r.size),
            Message::Payload(p) => {
                buf.put_u64(p.total_segments);
                buf.put_u64(p.segment_index);
                buf.put_slice(&p.data);
            }
        }
    }

    /// Parse one datagram.
    ///
    /// Trailing bytes after an Offer or Request are ignored; everything after
    /// a Payload header is its data block.
    pub fn decode(mut buf: &[u8]) -> Result<Message, DecodeError> {
        let actual = buf.len();
        if actual < COMMON_HEADER_LEN {
            return Err(DecodeError::Truncated {
                expected: COMMON_HEADER_LEN,
                actual,
            });
        }

        let cookie = buf.get_u32();
        if cookie != MAGIC_COOKIE {
            return Err(DecodeError::BadMagic(cookie));
        }

        let kind = MessageType::try_from(buf.get_u8())?;
        let expected = kind.header_len();
        if actual < expected {
            return Err(DecodeError::Truncated { expected, actual });
        }

        let message = match kind {
            MessageType::Offer => Message::Offer(Offer {
                udp_port: buf.get_u16(),
                tcp_port: buf.get_u16(),
            }),
            MessageType::Request => Message::Request(Request {
                size: buf.get_u64(),
            }),
            MessageType::Payload => Message::Payload(Payload {
                total_segments: buf.get_u64(),
                segment_index: buf.get_u64(),
                data: Bytes::copy_from_slice(buf),
            }),
        };
        Ok(message)
    }
}
