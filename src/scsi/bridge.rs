// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;

/// Completion status reported back to the kernel bridge for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiStatus {
    /// SAM GOOD.
    Good,
    /// CHECK CONDITION with medium-error sense data; the bridge formats
    /// the sense bytes.
    MediumError,
    /// Opcode this handler does not implement.
    NotHandled,
}

/// One fetched SCSI command together with access to its kernel-owned
/// scatter-gather buffer and the bridge's synchronous emulation helpers.
///
/// The emulation helpers answer entirely from device metadata, so they
/// complete inline without touching the replica.
pub trait ScsiCommand: Send + 'static {
    /// Raw command descriptor block; byte 0 is the operation code.
    fn cdb(&self) -> &[u8];

    /// Copy bytes into the scatter-gather buffer (data-in path). Returns
    /// the number of bytes actually copied, which may fall short of
    /// `src.len()` when the kernel buffer is smaller than expected.
    fn copy_to_host(&mut self, src: &[u8]) -> usize;

    /// Copy bytes out of the scatter-gather buffer (data-out path).
    /// Returns the number of bytes actually copied.
    fn copy_from_host(&mut self, dst: &mut [u8]) -> usize;

    fn emulate_inquiry(&mut self) -> ScsiStatus;
    fn emulate_test_unit_ready(&mut self) -> ScsiStatus;
    /// READ CAPACITY 16; answers with the device geometry.
    fn emulate_service_action_in(&mut self, lbas: u64, block_size: u32) -> ScsiStatus;
    fn emulate_mode_sense(&mut self) -> ScsiStatus;
    fn emulate_mode_select(&mut self) -> ScsiStatus;
}

/// Narrow view of the userspace SCSI-target bridge for one exported
/// device. The production implementation wraps the native target
/// library; tests substitute an in-memory mock, keeping the mapper free
/// of any kernel dependency.
pub trait TargetBridge: Send + Sync + 'static {
    type Cmd: ScsiCommand;

    /// `hw_block_size` device attribute.
    fn block_size(&self) -> Result<u32>;
    /// Exported device size in bytes.
    fn device_size(&self) -> Result<u64>;
    /// Device configuration string (backing volume identity).
    fn config_string(&self) -> Result<String>;

    /// Bracket the start of one command batch.
    fn processing_start(&self);
    /// Fetch the next pending command, if any.
    fn next_command(&self) -> Option<Self::Cmd>;
    /// Bracket the end of one command batch.
    fn processing_complete(&self);
    /// Park until the kernel queues more commands.
    fn wait_for_commands(&self) -> impl Future<Output = Result<()>> + Send;

    /// Report the completion status for one command. Callers must
    /// serialize completions per device.
    fn complete(&self, cmd: Self::Cmd, status: ScsiStatus);
}
