// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use bytes::Bytes;
use netblock_rs::{
    rpc::error::RpcError,
    scsi::{
        bridge::{ScsiCommand, ScsiStatus, TargetBridge},
        device::{Device, RemoteVolume},
        opcode,
    },
};

const BLOCK_SIZE: u32 = 512;
const VOLUME_SIZE: usize = 1024 * 1024;

/// Local newtype over `Arc` so the in-crate trait impls below satisfy
/// the orphan rule (a foreign trait cannot be implemented directly for
/// `Arc<LocalType>`), while still sharing state through the `Arc`.
struct Shared<T>(Arc<T>);

impl<T> std::ops::Deref for Shared<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

/// In-memory stand-in for the replica, recording the requests it sees.
struct MemVolume {
    data: Mutex<Vec<u8>>,
    reads: Mutex<Vec<(u64, u32)>>,
    writes: Mutex<Vec<(u64, usize)>>,
    fail: bool,
}

impl MemVolume {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(vec![0u8; VOLUME_SIZE]),
            reads: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            fail,
        })
    }
}

impl RemoteVolume for Shared<MemVolume> {
    async fn read(&self, offset: u64, length: u32) -> Result<Bytes, RpcError> {
        self.reads.lock().expect("lock").push((offset, length));
        if self.fail {
            return Err(RpcError::Remote("injected failure".into()));
        }
        let data = self.data.lock().expect("lock");
        let start = offset as usize;
        Ok(Bytes::copy_from_slice(&data[start..start + length as usize]))
    }

    async fn write(&self, offset: u64, payload: Bytes) -> Result<(), RpcError> {
        self.writes.lock().expect("lock").push((offset, payload.len()));
        if self.fail {
            return Err(RpcError::Remote("injected failure".into()));
        }
        let mut data = self.data.lock().expect("lock");
        let start = offset as usize;
        data[start..start + payload.len()].copy_from_slice(&payload);
        Ok(())
    }
}

/// One command with an in-memory scatter-gather buffer.
struct MockCommand {
    cdb: Vec<u8>,
    host_buf: Vec<u8>,
    /// Cap on bytes the copy helpers move, to provoke short copies.
    copy_limit: usize,
    emulated: Option<&'static str>,
    geometry_seen: Option<(u64, u32)>,
}

impl MockCommand {
    fn new(cdb: &[u8]) -> Self {
        Self {
            cdb: cdb.to_vec(),
            host_buf: Vec::new(),
            copy_limit: usize::MAX,
            emulated: None,
            geometry_seen: None,
        }
    }

    fn with_host_data(mut self, data: Vec<u8>) -> Self {
        self.host_buf = data;
        self
    }

    fn with_copy_limit(mut self, limit: usize) -> Self {
        self.copy_limit = limit;
        self
    }
}

impl ScsiCommand for MockCommand {
    fn cdb(&self) -> &[u8] {
        &self.cdb
    }

    fn copy_to_host(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.copy_limit);
        self.host_buf = src[..n].to_vec();
        n
    }

    fn copy_from_host(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.copy_limit).min(self.host_buf.len());
        dst[..n].copy_from_slice(&self.host_buf[..n]);
        n
    }

    fn emulate_inquiry(&mut self) -> ScsiStatus {
        self.emulated = Some("inquiry");
        ScsiStatus::Good
    }

    fn emulate_test_unit_ready(&mut self) -> ScsiStatus {
        self.emulated = Some("test_unit_ready");
        ScsiStatus::Good
    }

    fn emulate_service_action_in(&mut self, lbas: u64, block_size: u32) -> ScsiStatus {
        self.emulated = Some("service_action_in");
        self.geometry_seen = Some((lbas, block_size));
        ScsiStatus::Good
    }

    fn emulate_mode_sense(&mut self) -> ScsiStatus {
        self.emulated = Some("mode_sense");
        ScsiStatus::Good
    }

    fn emulate_mode_select(&mut self) -> ScsiStatus {
        self.emulated = Some("mode_select");
        ScsiStatus::Good
    }
}

/// Bridge mock: geometry from constants, completions recorded.
struct MockBridge {
    completions: Mutex<Vec<(MockCommand, ScsiStatus)>>,
    batches_completed: AtomicUsize,
}

impl MockBridge {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            completions: Mutex::new(Vec::new()),
            batches_completed: AtomicUsize::new(0),
        })
    }

    fn take_completion(&self) -> (MockCommand, ScsiStatus) {
        self.completions.lock().expect("lock").pop().expect("no completion recorded")
    }
}

impl TargetBridge for Shared<MockBridge> {
    type Cmd = MockCommand;

    fn block_size(&self) -> Result<u32> {
        Ok(BLOCK_SIZE)
    }

    fn device_size(&self) -> Result<u64> {
        Ok(VOLUME_SIZE as u64)
    }

    fn config_string(&self) -> Result<String> {
        Ok("file/vol0".into())
    }

    fn processing_start(&self) {}

    fn next_command(&self) -> Option<Self::Cmd> {
        None
    }

    fn processing_complete(&self) {
        self.batches_completed.fetch_add(1, Ordering::SeqCst);
    }

    async fn wait_for_commands(&self) -> Result<()> {
        Ok(())
    }

    fn complete(&self, cmd: Self::Cmd, status: ScsiStatus) {
        self.completions.lock().expect("lock").push((cmd, status));
    }
}

fn attach(
    volume: Arc<MemVolume>,
) -> (Device<Shared<MockBridge>, Shared<MemVolume>>, Arc<MockBridge>) {
    let bridge = MockBridge::new();
    let device =
        Device::attach(Shared(Arc::clone(&bridge)), Shared(volume)).expect("attach");
    (device, bridge)
}

fn read10(lba: u32, blocks: u16) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = opcode::READ_10;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
    cdb
}

fn write10(lba: u32, blocks: u16) -> [u8; 16] {
    let mut cdb = [0u8; 16];
    cdb[0] = opcode::WRITE_10;
    cdb[2..6].copy_from_slice(&lba.to_be_bytes());
    cdb[7..9].copy_from_slice(&blocks.to_be_bytes());
    cdb
}

#[tokio::test]
async fn attach_computes_the_geometry() {
    let (device, _) = attach(MemVolume::new(false));
    assert_eq!(device.block_size(), BLOCK_SIZE);
    assert_eq!(device.lbas(), VOLUME_SIZE as u64 / BLOCK_SIZE as u64);
}

#[tokio::test]
async fn read10_maps_lba_to_byte_range() {
    let volume = MemVolume::new(false);
    {
        let mut data = volume.data.lock().expect("lock");
        for (i, b) in data[51200..55296].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
    }
    let (device, bridge) = attach(Arc::clone(&volume));

    device.process(MockCommand::new(&read10(100, 8))).await;

    let (cmd, status) = bridge.take_completion();
    assert_eq!(status, ScsiStatus::Good);
    // LBA 100 * 512 and 8 blocks * 512.
    assert_eq!(*volume.reads.lock().expect("lock"), vec![(51200, 4096)]);
    let expected: Vec<u8> = (0..4096).map(|i| (i % 251) as u8).collect();
    assert_eq!(cmd.host_buf, expected);
}

#[tokio::test]
async fn write10_moves_host_bytes_to_the_volume() {
    let volume = MemVolume::new(false);
    let (device, bridge) = attach(Arc::clone(&volume));

    let payload = vec![0xa5u8; 4096];
    let cmd = MockCommand::new(&write10(0, 8)).with_host_data(payload.clone());
    device.process(cmd).await;

    let (_, status) = bridge.take_completion();
    assert_eq!(status, ScsiStatus::Good);
    assert_eq!(*volume.writes.lock().expect("lock"), vec![(0, 4096)]);
    assert_eq!(&volume.data.lock().expect("lock")[..4096], &payload[..]);
}

#[tokio::test]
async fn short_copy_into_host_is_a_medium_error() {
    let volume = MemVolume::new(false);
    let (device, bridge) = attach(volume);

    let cmd = MockCommand::new(&read10(0, 8)).with_copy_limit(100);
    device.process(cmd).await;

    let (_, status) = bridge.take_completion();
    assert_eq!(status, ScsiStatus::MediumError);
}

#[tokio::test]
async fn short_copy_from_host_is_a_medium_error() {
    let volume = MemVolume::new(false);
    let (device, bridge) = attach(Arc::clone(&volume));

    let cmd = MockCommand::new(&write10(0, 8))
        .with_host_data(vec![1u8; 4096])
        .with_copy_limit(100);
    device.process(cmd).await;

    let (_, status) = bridge.take_completion();
    assert_eq!(status, ScsiStatus::MediumError);
    assert!(
        volume.writes.lock().expect("lock").is_empty(),
        "a short copy must not reach the volume"
    );
}

#[tokio::test]
async fn volume_failure_is_a_medium_error() {
    let volume = MemVolume::new(true);
    let (device, bridge) = attach(volume);

    device.process(MockCommand::new(&read10(0, 1))).await;
    let (_, status) = bridge.take_completion();
    assert_eq!(status, ScsiStatus::MediumError);

    let cmd = MockCommand::new(&write10(0, 1)).with_host_data(vec![0u8; 512]);
    device.process(cmd).await;
    let (_, status) = bridge.take_completion();
    assert_eq!(status, ScsiStatus::MediumError);
}

#[tokio::test]
async fn passthrough_opcodes_never_touch_the_volume() {
    let volume = MemVolume::new(false);
    let (device, bridge) = attach(Arc::clone(&volume));

    for (cdb0, expected) in [
        (opcode::INQUIRY, "inquiry"),
        (opcode::TEST_UNIT_READY, "test_unit_ready"),
        (opcode::MODE_SENSE_6, "mode_sense"),
        (opcode::MODE_SENSE_10, "mode_sense"),
        (opcode::MODE_SELECT_6, "mode_select"),
        (opcode::MODE_SELECT_10, "mode_select"),
    ] {
        let mut cdb = [0u8; 16];
        cdb[0] = cdb0;
        device.process(MockCommand::new(&cdb)).await;

        let (cmd, status) = bridge.take_completion();
        assert_eq!(status, ScsiStatus::Good);
        assert_eq!(cmd.emulated, Some(expected));
    }

    assert!(volume.reads.lock().expect("lock").is_empty());
    assert!(volume.writes.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn read_capacity_reports_the_device_geometry() {
    let volume = MemVolume::new(false);
    let (device, bridge) = attach(volume);

    let mut cdb = [0u8; 16];
    cdb[0] = opcode::SERVICE_ACTION_IN_16;
    device.process(MockCommand::new(&cdb)).await;

    let (cmd, status) = bridge.take_completion();
    assert_eq!(status, ScsiStatus::Good);
    let lbas = VOLUME_SIZE as u64 / BLOCK_SIZE as u64;
    assert_eq!(cmd.geometry_seen, Some((lbas, BLOCK_SIZE)));
}

#[tokio::test]
async fn unknown_opcode_is_not_handled() {
    let volume = MemVolume::new(false);
    let (device, bridge) = attach(volume);

    let mut cdb = [0u8; 16];
    cdb[0] = 0x42; // UNMAP, deliberately unsupported
    device.process(MockCommand::new(&cdb)).await;

    let (_, status) = bridge.take_completion();
    assert_eq!(status, ScsiStatus::NotHandled);
}

#[tokio::test]
async fn every_completion_closes_its_batch() {
    let volume = MemVolume::new(false);
    let (device, bridge) = attach(volume);

    for _ in 0..4 {
        device.process(MockCommand::new(&read10(0, 1))).await;
    }
    assert_eq!(bridge.batches_completed.load(Ordering::SeqCst), 4);
}

/// Bridge with a finite command queue: the pump must drain it all, then
/// surface the bridge failure from the wait call.
struct PumpBridge {
    queue: Mutex<VecDeque<MockCommand>>,
    completions: Mutex<Vec<ScsiStatus>>,
}

impl TargetBridge for Shared<PumpBridge> {
    type Cmd = MockCommand;

    fn block_size(&self) -> Result<u32> {
        Ok(BLOCK_SIZE)
    }

    fn device_size(&self) -> Result<u64> {
        Ok(VOLUME_SIZE as u64)
    }

    fn config_string(&self) -> Result<String> {
        Ok("file/vol0".into())
    }

    fn processing_start(&self) {}

    fn next_command(&self) -> Option<Self::Cmd> {
        self.queue.lock().expect("lock").pop_front()
    }

    fn processing_complete(&self) {}

    async fn wait_for_commands(&self) -> Result<()> {
        anyhow::bail!("device removed")
    }

    fn complete(&self, _cmd: Self::Cmd, status: ScsiStatus) {
        self.completions.lock().expect("lock").push(status);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_drains_every_queued_command() {
    let volume = MemVolume::new(false);
    let bridge = Arc::new(PumpBridge {
        queue: Mutex::new(VecDeque::from([
            MockCommand::new(&read10(0, 1)),
            MockCommand::new(&write10(0, 1)).with_host_data(vec![3u8; 512]),
            MockCommand::new(&read10(8, 2)),
        ])),
        completions: Mutex::new(Vec::new()),
    });
    let device =
        Device::attach(Shared(Arc::clone(&bridge)), Shared(volume)).expect("attach");

    device.run().await.expect_err("bridge reported removal");

    // Commands complete on their own tasks after run() returns.
    for _ in 0..100 {
        if bridge.completions.lock().expect("lock").len() == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let completions = bridge.completions.lock().expect("lock");
    assert_eq!(completions.len(), 3, "every queued command must complete");
    assert!(completions.iter().all(|s| *s == ScsiStatus::Good));
}
