//! Kernel-facing SCSI frontend: turns READ/WRITE CDBs into replica RPCs
//! and delegates everything else to the bridge emulation helpers.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Injected capability traits over the userspace SCSI-target bridge.
pub mod bridge;
/// LBA / transfer-length extraction from command descriptor blocks.
pub mod cdb;
/// Per-device command pump and dispatch.
pub mod device;
/// SCSI operation codes and the dispatch table.
pub mod opcode;
