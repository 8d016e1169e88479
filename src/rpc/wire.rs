// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::rpc::{
    error::RpcError,
    message::{Request, Response},
};

/// Fixed width of the big-endian length prefix in front of every header
/// frame. Both peers must be built with the same value; it is a protocol
/// constant, never negotiated on the wire.
pub const LENGTH_PREFIX_LEN: usize = 4;

#[inline]
pub fn encode_length(len: u32) -> [u8; LENGTH_PREFIX_LEN] {
    len.to_be_bytes()
}

#[inline]
pub fn decode_length(bytes: [u8; LENGTH_PREFIX_LEN]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Write one length-prefixed frame.
pub async fn send_frame<W>(conn: &mut W, frame: &[u8]) -> Result<(), RpcError>
where W: AsyncWrite + Unpin {
    let len =
        u32::try_from(frame.len()).map_err(|_| RpcError::FrameTooLarge(frame.len()))?;
    conn.write_all(&encode_length(len)).await?;
    conn.write_all(frame).await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// End-of-stream before the first prefix byte is the peer closing the
/// connection and maps to `ConnectionClosed`; end-of-stream anywhere
/// later is a corrupted frame and maps to `ShortRead`.
pub async fn read_frame<R>(conn: &mut R) -> Result<BytesMut, RpcError>
where R: AsyncRead + Unpin {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    read_full(conn, &mut prefix, true).await?;

    let len = decode_length(prefix) as usize;
    if len == 0 {
        return Err(RpcError::Protocol("zero-length frame".into()));
    }

    let mut frame = BytesMut::zeroed(len);
    read_full(conn, &mut frame, false).await?;
    Ok(frame)
}

/// Raw unframed copy of a payload chunk; the byte count was already
/// agreed through the header.
pub async fn send_payload<W>(conn: &mut W, payload: &[u8]) -> Result<(), RpcError>
where W: AsyncWrite + Unpin {
    conn.write_all(payload).await?;
    Ok(())
}

/// Counterpart of [`send_payload`]: read exactly `length` raw bytes.
pub async fn read_payload<R>(conn: &mut R, length: usize) -> Result<Bytes, RpcError>
where R: AsyncRead + Unpin {
    let mut payload = BytesMut::zeroed(length);
    read_full(conn, &mut payload, false).await?;
    Ok(payload.freeze())
}

/// Write a request: header frame, then the raw payload iff the kind
/// carries one.
pub async fn send_request<W>(conn: &mut W, request: &Request) -> Result<(), RpcError>
where W: AsyncWrite + Unpin {
    send_frame(conn, &request.encode_frame()).await?;
    if request.kind.carries_payload() {
        send_payload(conn, &request.payload).await?;
    }
    Ok(())
}

/// Read one request: header frame, then `header.length` raw payload
/// bytes iff the kind carries a payload.
pub async fn read_request<R>(conn: &mut R) -> Result<Request, RpcError>
where R: AsyncRead + Unpin {
    let frame = read_frame(conn).await?;
    let mut request = Request::decode_frame(&frame)?;
    if request.kind.carries_payload() {
        request.payload = read_payload(conn, request.length as usize).await?;
    }
    Ok(request)
}

/// Write a response: header frame (with any error message inside), then
/// the raw payload iff the kind carries one.
pub async fn send_response<W>(conn: &mut W, response: &Response) -> Result<(), RpcError>
where W: AsyncWrite + Unpin {
    send_frame(conn, &response.encode_frame()).await?;
    if response.kind.carries_payload() {
        send_payload(conn, &response.payload).await?;
    }
    Ok(())
}

pub async fn read_response<R>(conn: &mut R) -> Result<Response, RpcError>
where R: AsyncRead + Unpin {
    let frame = read_frame(conn).await?;
    let mut response = Response::decode_frame(&frame)?;
    if response.kind.carries_payload() {
        response.payload = read_payload(conn, response.length as usize).await?;
    }
    Ok(response)
}

/// Fill `buf` completely. With `clean_eof`, end-of-stream before the
/// first byte is `ConnectionClosed`; in every other case running out of
/// bytes is `ShortRead`.
async fn read_full<R>(
    conn: &mut R,
    buf: &mut [u8],
    clean_eof: bool,
) -> Result<(), RpcError>
where R: AsyncRead + Unpin {
    let mut filled = 0;
    while filled < buf.len() {
        let n = conn.read(&mut buf[filled..]).await?;
        if n == 0 {
            if clean_eof && filled == 0 {
                return Err(RpcError::ConnectionClosed);
            }
            return Err(RpcError::ShortRead { got: filled, want: buf.len() });
        }
        filled += n;
    }
    Ok(())
}
