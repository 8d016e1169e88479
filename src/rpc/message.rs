// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::Bytes;
use zerocopy::{
    BigEndian, FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, U32, U64,
};

use crate::rpc::error::RpcError;

/// Size of the fixed header part of every frame. An error status may
/// append its message after these bytes, inside the same frame.
pub const MESSAGE_HEADER_LEN: usize = 24;

/// Message discriminator carried in the header `kind` byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    ReadRequest   = 1,
    ReadResponse  = 2,
    WriteRequest  = 3,
    WriteResponse = 4,
}

impl MessageKind {
    /// Whether a raw data payload follows the header frame on the wire.
    #[inline]
    pub fn carries_payload(self) -> bool {
        matches!(self, MessageKind::WriteRequest | MessageKind::ReadResponse)
    }

    #[inline]
    pub fn is_request(self) -> bool {
        matches!(self, MessageKind::ReadRequest | MessageKind::WriteRequest)
    }

    /// The response kind matching a request kind.
    #[inline]
    pub fn response_kind(self) -> MessageKind {
        match self {
            MessageKind::ReadRequest => MessageKind::ReadResponse,
            MessageKind::WriteRequest => MessageKind::WriteResponse,
            other => other,
        }
    }
}

/// Wire view of the `kind` byte.
#[repr(transparent)]
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, ZFromBytes, IntoBytes, KnownLayout,
    Immutable,
)]
pub struct RawMessageKind(u8);

impl RawMessageKind {
    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Decode to the high-level enum, `None` for bytes outside the
    /// protocol.
    #[inline]
    pub fn kind_known(&self) -> Option<MessageKind> {
        match self.0 {
            1 => Some(MessageKind::ReadRequest),
            2 => Some(MessageKind::ReadResponse),
            3 => Some(MessageKind::WriteRequest),
            4 => Some(MessageKind::WriteResponse),
            _ => None,
        }
    }
}

impl From<MessageKind> for RawMessageKind {
    #[inline]
    fn from(kind: MessageKind) -> Self {
        Self(kind as u8)
    }
}

/// Result of one operation as reported by the replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Good,
    /// Failure with a human-readable message; the message travels as the
    /// trailing bytes of the header frame.
    Error(String),
}

impl Status {
    #[inline]
    pub fn is_good(&self) -> bool {
        matches!(self, Status::Good)
    }
}

/// Wire view of the `status` byte (0 = good, 1 = error).
#[repr(transparent)]
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, ZFromBytes, IntoBytes, KnownLayout,
    Immutable,
)]
pub struct RawStatus(u8);

impl RawStatus {
    pub const ERROR: RawStatus = RawStatus(1);
    pub const GOOD: RawStatus = RawStatus(0);

    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub fn is_good(&self) -> bool {
        self.0 == 0
    }
}

/// Fixed-layout header of every frame, big-endian on the wire.
///
/// The length prefix in front of a frame covers this header plus the
/// optional trailing error message; the data payload declared in
/// `length` is sent as a second, unframed chunk so large buffers never
/// pass through the structured serializer.
#[repr(C)]
#[derive(Debug, Default, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct MessageHeader {
    pub id: U64<BigEndian>,      // 0..8
    pub kind: RawMessageKind,    // 8
    pub status: RawStatus,       // 9
    reserved: [u8; 2],           // 10..12
    pub offset: U64<BigEndian>,  // 12..20
    pub length: U32<BigEndian>,  // 20..24
}

impl MessageHeader {
    fn new(id: u64, kind: MessageKind, status: RawStatus, offset: u64, length: u32) -> Self {
        Self {
            id: U64::new(id),
            kind: kind.into(),
            status,
            reserved: [0; 2],
            offset: U64::new(offset),
            length: U32::new(length),
        }
    }

    /// Split a header frame into the fixed header and its trailing bytes.
    fn parse(frame: &[u8]) -> Result<(Self, &[u8]), RpcError> {
        Self::read_from_prefix(frame).map_err(|_| {
            RpcError::Protocol(format!(
                "header frame of {} bytes is shorter than {MESSAGE_HEADER_LEN}",
                frame.len()
            ))
        })
    }
}

/// One block-I/O operation requested by a caller.
///
/// `id` is the per-connection correlation token; the client assigns it
/// right before the request is enqueued, so callers construct requests
/// with `id == 0` and never see that value on the wire (0 is rejected by
/// the decoder).
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub kind: MessageKind,
    pub offset: u64,
    pub length: u32,
    /// Present only for `WriteRequest`; `length` bytes.
    pub payload: Bytes,
}

impl Request {
    pub fn read(offset: u64, length: u32) -> Self {
        Self {
            id: 0,
            kind: MessageKind::ReadRequest,
            offset,
            length,
            payload: Bytes::new(),
        }
    }

    pub fn write(offset: u64, payload: Bytes) -> Self {
        Self {
            id: 0,
            kind: MessageKind::WriteRequest,
            offset,
            length: payload.len() as u32,
            payload,
        }
    }

    /// Serialize the header frame (the payload is sent separately).
    pub fn encode_frame(&self) -> Vec<u8> {
        MessageHeader::new(self.id, self.kind, RawStatus::GOOD, self.offset, self.length)
            .as_bytes()
            .to_vec()
    }

    /// Parse a request header frame. The payload, if any, is filled in by
    /// the wire layer afterwards.
    pub fn decode_frame(frame: &[u8]) -> Result<Self, RpcError> {
        let (hdr, _trailing) = MessageHeader::parse(frame)?;
        let kind = hdr
            .kind
            .kind_known()
            .filter(|k| k.is_request())
            .ok_or_else(|| {
                RpcError::Protocol(format!("invalid request kind 0x{:02x}", hdr.kind.raw()))
            })?;
        let id = hdr.id.get();
        if id == 0 {
            return Err(RpcError::Protocol("request with correlation id 0".into()));
        }
        Ok(Self {
            id,
            kind,
            offset: hdr.offset.get(),
            length: hdr.length.get(),
            payload: Bytes::new(),
        })
    }
}

/// The result of exactly one [`Request`], correlated by `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: u64,
    pub kind: MessageKind,
    pub status: Status,
    pub length: u32,
    /// Present only for a good `ReadResponse`; `length` bytes.
    pub payload: Bytes,
}

impl Response {
    /// Successful read completion carrying the data back to the caller.
    pub fn read(id: u64, payload: Bytes) -> Self {
        Self {
            id,
            kind: MessageKind::ReadResponse,
            status: Status::Good,
            length: payload.len() as u32,
            payload,
        }
    }

    /// Successful write completion.
    pub fn write(id: u64) -> Self {
        Self {
            id,
            kind: MessageKind::WriteResponse,
            status: Status::Good,
            length: 0,
            payload: Bytes::new(),
        }
    }

    /// Failure completion for the given request kind. Carries no data.
    pub fn error(id: u64, request_kind: MessageKind, message: String) -> Self {
        Self {
            id,
            kind: request_kind.response_kind(),
            status: Status::Error(message),
            length: 0,
            payload: Bytes::new(),
        }
    }

    /// Serialize the header frame; an error message rides behind the
    /// fixed header inside the same frame.
    pub fn encode_frame(&self) -> Vec<u8> {
        let (status, message) = match &self.status {
            Status::Good => (RawStatus::GOOD, &[][..]),
            Status::Error(msg) => (RawStatus::ERROR, msg.as_bytes()),
        };
        let hdr = MessageHeader::new(self.id, self.kind, status, 0, self.length);
        let mut frame = Vec::with_capacity(MESSAGE_HEADER_LEN + message.len());
        frame.extend_from_slice(hdr.as_bytes());
        frame.extend_from_slice(message);
        frame
    }

    pub fn decode_frame(frame: &[u8]) -> Result<Self, RpcError> {
        let (hdr, trailing) = MessageHeader::parse(frame)?;
        let kind = hdr
            .kind
            .kind_known()
            .filter(|k| !k.is_request())
            .ok_or_else(|| {
                RpcError::Protocol(format!("invalid response kind 0x{:02x}", hdr.kind.raw()))
            })?;
        let id = hdr.id.get();
        if id == 0 {
            return Err(RpcError::Protocol("response with correlation id 0".into()));
        }
        let status = if hdr.status.is_good() {
            Status::Good
        } else {
            Status::Error(String::from_utf8_lossy(trailing).into_owned())
        };
        Ok(Self {
            id,
            kind,
            status,
            length: hdr.length.get(),
            payload: Bytes::new(),
        })
    }
}
