//! Client and server halves of the replica transfer protocol.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Multiplexing RPC client with per-call timeouts.
pub mod client;
/// Transport-level error taxonomy.
pub mod error;
/// Request/Response model and the fixed-layout wire header.
pub mod message;
/// Pipelined RPC server (read loop, worker pool, write loop).
pub mod server;
/// Length-prefixed frame codec over a byte stream.
pub mod wire;
