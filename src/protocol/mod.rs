//! Wire protocol for the signaling channel
//!
//! Every message travels as one frame:
//!
//! ```text
//! +--------+--------+--------+--------+
//! |        Length (4B, BE)            |
//! +--------+--------+--------+--------+
//! |  Type  |          Body ...        |
//! +--------+--------+--------+--------+
//! ```
//!
//! `Length` counts the type byte plus the body, not itself. Integers are
//! big-endian; strings are a 4-byte byte count followed by raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Identity of a link or stream within one engine.
///
/// Allocated monotonically starting at 1 and never recycled; 0 is reserved.
/// A handle is only meaningful to the engine that allocated it — frames
/// always carry the *destination's* handle for a stream.
pub type Handle = u32;

/// Size of the frame length prefix
pub const LEN_PREFIX_SIZE: usize = 4;

/// Sanity bound on inbound frame payloads (1 MiB). Locally produced frames
/// stay far below this; anything larger is a broken peer.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Protocol errors. All of these are fatal to the signaling connection they
/// occur on: once a frame fails to parse the byte stream is unrecoverable.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown message type: {0}")]
    UnknownType(u8),

    #[error("frame truncated")]
    Truncated,

    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("string field is not valid UTF-8")]
    InvalidString,
}

/// Message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Connector asks the listener to expose a target
    ListenRequest = 1,
    /// Listener reports the public port it bound
    ListenResponse = 2,
    /// A public client connected; open the matching stream
    TunnelConnectRequest = 3,
    /// Stream pair established, handles exchanged
    TunnelConnectResponse = 4,
    /// Stream payload bytes
    TunnelDataIndication = 5,
    /// One side tore a stream down
    TunnelDisconnectRequest = 6,
    /// Acknowledgement of a teardown
    TunnelDisconnectResponse = 7,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::ListenRequest),
            2 => Ok(MessageType::ListenResponse),
            3 => Ok(MessageType::TunnelConnectRequest),
            4 => Ok(MessageType::TunnelConnectResponse),
            5 => Ok(MessageType::TunnelDataIndication),
            6 => Ok(MessageType::TunnelDisconnectRequest),
            7 => Ok(MessageType::TunnelDisconnectResponse),
            _ => Err(ProtocolError::UnknownType(value)),
        }
    }
}

/// A signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ListenRequest {
        proxy_address: String,
        proxy_port: u32,
    },
    ListenResponse {
        proxy_address: String,
        proxy_port: u32,
        tunnel_address: String,
        tunnel_port: u32,
    },
    TunnelConnectRequest {
        data_handle: Handle,
        client_address: String,
        proxy_address: String,
        proxy_port: u32,
    },
    TunnelConnectResponse {
        data_handle: Handle,
        proxy_handle: Handle,
    },
    TunnelDataIndication {
        peer_handle: Handle,
        data: Bytes,
    },
    TunnelDisconnectRequest {
        peer_handle: Handle,
    },
    TunnelDisconnectResponse {
        peer_handle: Handle,
    },
}

impl Message {
    /// Wire type tag of this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::ListenRequest { .. } => MessageType::ListenRequest,
            Message::ListenResponse { .. } => MessageType::ListenResponse,
            Message::TunnelConnectRequest { .. } => MessageType::TunnelConnectRequest,
            Message::TunnelConnectResponse { .. } => MessageType::TunnelConnectResponse,
            Message::TunnelDataIndication { .. } => MessageType::TunnelDataIndication,
            Message::TunnelDisconnectRequest { .. } => MessageType::TunnelDisconnectRequest,
            Message::TunnelDisconnectResponse { .. } => MessageType::TunnelDisconnectResponse,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Message::ListenRequest { proxy_address, .. } => string_len(proxy_address) + 4,
            Message::ListenResponse {
                proxy_address,
                tunnel_address,
                ..
            } => string_len(proxy_address) + 4 + string_len(tunnel_address) + 4,
            Message::TunnelConnectRequest {
                client_address,
                proxy_address,
                ..
            } => 4 + string_len(client_address) + string_len(proxy_address) + 4,
            Message::TunnelConnectResponse { .. } => 8,
            Message::TunnelDataIndication { data, .. } => 4 + 4 + data.len(),
            Message::TunnelDisconnectRequest { .. } => 4,
            Message::TunnelDisconnectResponse { .. } => 4,
        }
    }

    /// Encode to a complete frame, length prefix included
    pub fn encode(&self) -> BytesMut {
        let payload_len = 1 + self.body_len();
        let mut buf = BytesMut::with_capacity(LEN_PREFIX_SIZE + payload_len);

        buf.put_u32(payload_len as u32);
        buf.put_u8(self.message_type() as u8);

        match self {
            Message::ListenRequest {
                proxy_address,
                proxy_port,
            } => {
                put_string(&mut buf, proxy_address);
                buf.put_u32(*proxy_port);
            }
            Message::ListenResponse {
                proxy_address,
                proxy_port,
                tunnel_address,
                tunnel_port,
            } => {
                put_string(&mut buf, proxy_address);
                buf.put_u32(*proxy_port);
                put_string(&mut buf, tunnel_address);
                buf.put_u32(*tunnel_port);
            }
            Message::TunnelConnectRequest {
                data_handle,
                client_address,
                proxy_address,
                proxy_port,
            } => {
                buf.put_u32(*data_handle);
                put_string(&mut buf, client_address);
                put_string(&mut buf, proxy_address);
                buf.put_u32(*proxy_port);
            }
            Message::TunnelConnectResponse {
                data_handle,
                proxy_handle,
            } => {
                buf.put_u32(*data_handle);
                buf.put_u32(*proxy_handle);
            }
            Message::TunnelDataIndication { peer_handle, data } => {
                buf.put_u32(*peer_handle);
                buf.put_u32(data.len() as u32);
                buf.extend_from_slice(data);
            }
            Message::TunnelDisconnectRequest { peer_handle } => {
                buf.put_u32(*peer_handle);
            }
            Message::TunnelDisconnectResponse { peer_handle } => {
                buf.put_u32(*peer_handle);
            }
        }

        buf
    }

    /// Decode a framed payload (everything after the length prefix).
    ///
    /// Fails on an unknown tag, a body that runs short, or bytes left over
    /// after the body claims to be complete.
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        if !payload.has_remaining() {
            return Err(ProtocolError::Truncated);
        }

        let message_type = MessageType::try_from(payload.get_u8())?;

        let msg = match message_type {
            MessageType::ListenRequest => Message::ListenRequest {
                proxy_address: get_string(&mut payload)?,
                proxy_port: get_u32(&mut payload)?,
            },
            MessageType::ListenResponse => Message::ListenResponse {
                proxy_address: get_string(&mut payload)?,
                proxy_port: get_u32(&mut payload)?,
                tunnel_address: get_string(&mut payload)?,
                tunnel_port: get_u32(&mut payload)?,
            },
            MessageType::TunnelConnectRequest => Message::TunnelConnectRequest {
                data_handle: get_u32(&mut payload)?,
                client_address: get_string(&mut payload)?,
                proxy_address: get_string(&mut payload)?,
                proxy_port: get_u32(&mut payload)?,
            },
            MessageType::TunnelConnectResponse => Message::TunnelConnectResponse {
                data_handle: get_u32(&mut payload)?,
                proxy_handle: get_u32(&mut payload)?,
            },
            MessageType::TunnelDataIndication => Message::TunnelDataIndication {
                peer_handle: get_u32(&mut payload)?,
                data: get_bytes(&mut payload)?,
            },
            MessageType::TunnelDisconnectRequest => Message::TunnelDisconnectRequest {
                peer_handle: get_u32(&mut payload)?,
            },
            MessageType::TunnelDisconnectResponse => Message::TunnelDisconnectResponse {
                peer_handle: get_u32(&mut payload)?,
            },
        };

        if payload.has_remaining() {
            return Err(ProtocolError::TrailingBytes(payload.remaining()));
        }

        Ok(msg)
    }
}

fn string_len(s: &str) -> usize {
    4 + s.len()
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn get_u32(buf: &mut Bytes) -> Result<u32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u32())
}

fn get_bytes(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = get_u32(buf)? as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.split_to(len))
}

fn get_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let raw = get_bytes(buf)?;
    String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidString)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let mut encoded = Message::encode(&msg).freeze();
        let len = encoded.get_u32() as usize;
        assert_eq!(len, encoded.remaining());
        let decoded = Message::decode(encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_listen_request_wire_format() {
        let msg = Message::ListenRequest {
            proxy_address: "www.google.com".to_string(),
            proxy_port: 443,
        };
        let encoded = msg.encode();

        // 23 = 1 tag + 4 strlen + 14 address bytes + 4 port
        assert_eq!(&encoded[0..4], &[0x00, 0x00, 0x00, 0x17]);
        assert_eq!(encoded[4], 0x01);
        assert_eq!(&encoded[5..9], &[0x00, 0x00, 0x00, 0x0E]);
        assert_eq!(&encoded[9..23], b"www.google.com");
        assert_eq!(&encoded[23..27], &[0x00, 0x00, 0x01, 0xBB]);
        assert_eq!(encoded.len(), 27);
    }

    #[test]
    fn test_roundtrip_all_variants() {
        roundtrip(Message::ListenRequest {
            proxy_address: "example.test".into(),
            proxy_port: 80,
        });
        roundtrip(Message::ListenResponse {
            proxy_address: "example.test".into(),
            proxy_port: 80,
            tunnel_address: "0.0.0.0".into(),
            tunnel_port: 40123,
        });
        roundtrip(Message::TunnelConnectRequest {
            data_handle: 2,
            client_address: "203.0.113.9:51842".into(),
            proxy_address: "example.test".into(),
            proxy_port: 80,
        });
        roundtrip(Message::TunnelConnectResponse {
            data_handle: 2,
            proxy_handle: 3,
        });
        roundtrip(Message::TunnelDataIndication {
            peer_handle: 3,
            data: Bytes::from_static(b"PING"),
        });
        roundtrip(Message::TunnelDisconnectRequest { peer_handle: 3 });
        roundtrip(Message::TunnelDisconnectResponse { peer_handle: 2 });
    }

    #[test]
    fn test_empty_strings_and_payload() {
        roundtrip(Message::ListenRequest {
            proxy_address: String::new(),
            proxy_port: 0,
        });
        roundtrip(Message::TunnelDataIndication {
            peer_handle: 1,
            data: Bytes::new(),
        });
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = Message::decode(Bytes::from_static(&[0x08, 0, 0, 0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(8)));

        let err = Message::decode(Bytes::from_static(&[0x00])).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(0)));
    }

    #[test]
    fn test_short_body_rejected() {
        // DisconnectRequest with only two bytes of handle
        let err = Message::decode(Bytes::from_static(&[0x06, 0x00, 0x01])).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));

        // ListenRequest whose string length runs past the buffer
        let mut buf = BytesMut::new();
        buf.put_u8(0x01);
        buf.put_u32(64);
        buf.extend_from_slice(b"short");
        let err = Message::decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));

        // Empty payload has no tag at all
        let err = Message::decode(Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = Message::TunnelDisconnectRequest { peer_handle: 7 }.encode();
        frame.put_u8(0xFF);
        let mut payload = frame.freeze();
        payload.advance(LEN_PREFIX_SIZE);
        let err = Message::decode(payload).unwrap_err();
        assert!(matches!(err, ProtocolError::TrailingBytes(1)));
    }

    #[test]
    fn test_invalid_utf8_string_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(0x01);
        buf.put_u32(2);
        buf.extend_from_slice(&[0xC3, 0x28]);
        buf.put_u32(80);
        let err = Message::decode(buf.freeze()).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidString));
    }

    #[test]
    fn test_data_indication_carries_raw_bytes() {
        let data = Bytes::from((0u8..=255).collect::<Vec<u8>>());
        let msg = Message::TunnelDataIndication {
            peer_handle: 42,
            data: data.clone(),
        };
        let encoded = msg.encode();

        // 1 tag + 4 handle + 4 count + 256 bytes
        assert_eq!(&encoded[0..4], &265u32.to_be_bytes());
        assert_eq!(encoded[4], 0x05);
        assert_eq!(&encoded[5..9], &42u32.to_be_bytes());
        assert_eq!(&encoded[9..13], &256u32.to_be_bytes());
        assert_eq!(&encoded[13..], &data[..]);
    }
}
