// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{io, time::Duration};

use thiserror::Error;

/// Failures of the replica transfer channel.
///
/// Transport-level variants (`Protocol`, `ShortRead`, `ConnectionClosed`)
/// are recovered locally by the affected loop and never cross task
/// boundaries; callers of [`crate::rpc::client::RpcClient::call`] only
/// ever observe `CallTimeout`, `SendQueueClosed`, `ConnectionClosed` or
/// `Remote`.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The encoded frame does not fit the fixed-width length prefix.
    #[error("frame of {0} bytes exceeds the length prefix range")]
    FrameTooLarge(usize),

    /// Structurally invalid frame: zero length, unknown kind byte,
    /// truncated header, invalid correlation id.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The stream ended in the middle of a frame.
    #[error("stream ended mid-frame after {got} of {want} bytes")]
    ShortRead { got: usize, want: usize },

    /// The peer closed the connection at a frame boundary. This is the
    /// normal end-of-stream signal, not a corruption.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// No response arrived for a call within the configured window. The
    /// pending entry is abandoned; a late response is dropped harmlessly.
    #[error("call {id} timed out after {timeout:?}")]
    CallTimeout { id: u64, timeout: Duration },

    /// The client send queue is gone (the client was closed).
    #[error("send queue closed")]
    SendQueueClosed,

    /// The replica answered this operation with a failure status.
    #[error("remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}
