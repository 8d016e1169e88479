//! Data plane of a network-attached block device: a SCSI frontend maps
//! READ/WRITE commands onto a private length-prefixed RPC protocol served
//! by a file-backed replica process.
// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Handles configuration, config-path resolution, and logging.
pub mod cfg;
/// Replica-side storage: block store trait, file store, request handler.
pub mod replica;
/// Wire codec plus the client and server halves of the replica protocol.
pub mod rpc;
/// SCSI frontend: opcode dispatch, CDB parsing, and the kernel-bridge
/// seam.
pub mod scsi;
