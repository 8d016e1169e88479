use std::sync::Arc;

use anyhow::{Context, Result, ensure};
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::{
    rpc::{
        client::RpcClient,
        error::RpcError,
        message::{Request, Response},
    },
    scsi::{
        bridge::{ScsiCommand, ScsiStatus, TargetBridge},
        cdb,
        opcode::{self, CommandClass},
    },
};

/// Capability for moving bytes to and from the backing volume.
///
/// [`RpcClient`] is the production implementation; mapper tests plug in
/// an in-memory fake so dispatch logic runs without any socket.
pub trait RemoteVolume: Send + Sync + 'static {
    fn read(
        &self,
        offset: u64,
        length: u32,
    ) -> impl Future<Output = Result<Bytes, RpcError>> + Send;

    fn write(
        &self,
        offset: u64,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), RpcError>> + Send;
}

impl RemoteVolume for RpcClient {
    async fn read(&self, offset: u64, length: u32) -> Result<Bytes, RpcError> {
        let response: Response = self.call(Request::read(offset, length)).await?;
        Ok(response.payload)
    }

    async fn write(&self, offset: u64, payload: Bytes) -> Result<(), RpcError> {
        self.call(Request::write(offset, payload)).await?;
        Ok(())
    }
}

/// Per-device SCSI frontend.
///
/// Pumps commands out of the kernel bridge and dispatches each one:
/// passthrough opcodes are answered inline by the bridge emulation
/// helpers, READ/WRITE commands become volume RPCs. Every data-moving
/// command runs on its own task so one slow volume round-trip never
/// stalls command fetch; completions are independent notifications and
/// only need to be serialized, which one mutex per device provides.
pub struct Device<B, V>
where
    B: TargetBridge,
    V: RemoteVolume,
{
    inner: Arc<DeviceInner<B, V>>,
}

impl<B, V> Clone for Device<B, V>
where
    B: TargetBridge,
    V: RemoteVolume,
{
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct DeviceInner<B, V>
where
    B: TargetBridge,
    V: RemoteVolume,
{
    bridge: B,
    volume: V,
    block_size: u32,
    lbas: u64,
    completion: Mutex<()>,
}

impl<B, V> Device<B, V>
where
    B: TargetBridge,
    V: RemoteVolume,
{
    /// Attach to one exported device: read the geometry and keep the
    /// volume handle. Failure aborts only this attach, never the
    /// process.
    pub fn attach(bridge: B, volume: V) -> Result<Self> {
        let block_size = bridge
            .block_size()
            .context("cannot find valid hw_block_size")?;
        ensure!(block_size > 0, "hw_block_size must be > 0");
        let size = bridge.device_size().context("cannot find valid disk size")?;
        let config = bridge
            .config_string()
            .context("cannot find configuration string")?;
        let lbas = size / block_size as u64;
        debug!(%config, size, block_size, "device attached");

        Ok(Self {
            inner: Arc::new(DeviceInner {
                bridge,
                volume,
                block_size,
                lbas,
                completion: Mutex::new(()),
            }),
        })
    }

    pub fn block_size(&self) -> u32 {
        self.inner.block_size
    }

    pub fn lbas(&self) -> u64 {
        self.inner.lbas
    }

    /// Pump commands until the bridge reports failure: drain every
    /// pending command (spawning one task per command), then park until
    /// the kernel queues more.
    pub async fn run(&self) -> Result<()> {
        loop {
            self.inner.bridge.processing_start();
            while let Some(cmd) = self.inner.bridge.next_command() {
                let device = self.clone();
                tokio::spawn(async move { device.process(cmd).await });
            }
            self.inner
                .bridge
                .wait_for_commands()
                .await
                .context("wait for next command failed")?;
        }
    }

    /// Handle one command and report its completion, serialized per
    /// device.
    pub async fn process(&self, mut cmd: B::Cmd) {
        let status = self.handle(&mut cmd).await;

        let _completing = self.inner.completion.lock().await;
        self.inner.bridge.complete(cmd, status);
        self.inner.bridge.processing_complete();
    }

    async fn handle(&self, cmd: &mut B::Cmd) -> ScsiStatus {
        let Some(&op) = cmd.cdb().first() else {
            warn!("empty CDB");
            return ScsiStatus::NotHandled;
        };

        match opcode::classify(op) {
            Some(CommandClass::Inquiry) => cmd.emulate_inquiry(),
            Some(CommandClass::TestUnitReady) => cmd.emulate_test_unit_ready(),
            Some(CommandClass::ServiceActionIn16) => {
                cmd.emulate_service_action_in(self.inner.lbas, self.inner.block_size)
            },
            Some(CommandClass::ModeSense) => cmd.emulate_mode_sense(),
            Some(CommandClass::ModeSelect) => cmd.emulate_mode_select(),
            Some(CommandClass::Read) => self.handle_read(cmd).await,
            Some(CommandClass::Write) => self.handle_write(cmd).await,
            None => {
                warn!("unknown command 0x{op:02x}");
                ScsiStatus::NotHandled
            },
        }
    }

    async fn handle_read(&self, cmd: &mut B::Cmd) -> ScsiStatus {
        let Some((offset, length)) = self.byte_range(cmd.cdb()) else {
            return ScsiStatus::MediumError;
        };

        let data = match self.inner.volume.read(offset, length).await {
            Ok(data) => data,
            Err(err) => {
                error!(offset, length, %err, "read failed");
                return ScsiStatus::MediumError;
            },
        };
        if data.len() != length as usize {
            error!(
                offset,
                length,
                got = data.len(),
                "read failed: volume returned short payload"
            );
            return ScsiStatus::MediumError;
        }

        let copied = cmd.copy_to_host(&data);
        if copied != length as usize {
            error!(copied, length, "read failed: unable to complete buffer copy");
            return ScsiStatus::MediumError;
        }
        ScsiStatus::Good
    }

    async fn handle_write(&self, cmd: &mut B::Cmd) -> ScsiStatus {
        let Some((offset, length)) = self.byte_range(cmd.cdb()) else {
            return ScsiStatus::MediumError;
        };

        let mut buf = vec![0u8; length as usize];
        let copied = cmd.copy_from_host(&mut buf);
        if copied != length as usize {
            error!(copied, length, "write failed: unable to complete buffer copy");
            return ScsiStatus::MediumError;
        }

        match self.inner.volume.write(offset, Bytes::from(buf)).await {
            Ok(()) => ScsiStatus::Good,
            Err(err) => {
                error!(offset, length, %err, "write failed");
                ScsiStatus::MediumError
            },
        }
    }

    /// Map the CDB's block range onto a byte `(offset, length)` pair
    /// using the device geometry.
    fn byte_range(&self, cdb: &[u8]) -> Option<(u64, u32)> {
        let range = match cdb::parse_block_range(cdb) {
            Ok(range) => range,
            Err(err) => {
                error!(%err, "cannot parse data-moving CDB");
                return None;
            },
        };
        let offset = range.lba * self.inner.block_size as u64;
        let Some(length) = range.blocks.checked_mul(self.inner.block_size) else {
            error!(
                blocks = range.blocks,
                block_size = self.inner.block_size,
                "transfer length overflows"
            );
            return None;
        };
        Some((offset, length))
    }
}
