// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fs::{self, File, OpenOptions},
    io,
    os::unix::fs::FileExt,
    path::Path,
    sync::Arc,
};

use anyhow::{Context, Result, ensure};
use bytes::Bytes;
use tokio::task;
use tracing::info;

/// Byte-addressed storage behind one replica.
pub trait BlockStore: Send + Sync + 'static {
    /// Read exactly `length` bytes starting at `offset`.
    fn read_at(
        &self,
        offset: u64,
        length: u32,
    ) -> impl Future<Output = Result<Bytes>> + Send;

    /// Write the whole buffer starting at `offset`.
    fn write_at(&self, offset: u64, data: Bytes)
    -> impl Future<Output = Result<()>> + Send;
}

/// Plain-file store. Reads past end-of-file zero-fill the tail, so a
/// sparse or freshly created volume reads as zeroes.
#[derive(Debug, Clone)]
pub struct FileStore {
    file: Arc<File>,
}

impl FileStore {
    /// Idempotent bootstrap: reuse the backing file if it exists,
    /// otherwise create it and truncate it to `size` bytes.
    pub fn open<P: AsRef<Path>>(path: P, size: u64) -> Result<Self> {
        let path = path.as_ref();

        match fs::metadata(path) {
            Ok(meta) => {
                ensure!(!meta.is_dir(), "backing path {path:?} is a directory");
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let file = File::create(path)
                    .with_context(|| format!("cannot create backing file {path:?}"))?;
                file.set_len(size)
                    .with_context(|| format!("cannot resize backing file {path:?}"))?;
                info!(?path, size, "created backing file");
            },
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("cannot stat backing file {path:?}"));
            },
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("cannot open backing file {path:?}"))?;

        Ok(Self { file: Arc::new(file) })
    }
}

impl BlockStore for FileStore {
    async fn read_at(&self, offset: u64, length: u32) -> Result<Bytes> {
        let file = Arc::clone(&self.file);
        task::spawn_blocking(move || -> Result<Bytes> {
            let mut buf = vec![0u8; length as usize];
            let mut filled = 0;
            while filled < buf.len() {
                let n = file
                    .read_at(&mut buf[filled..], offset + filled as u64)
                    .context("read failed")?;
                if n == 0 {
                    // Past end-of-file; the rest of the buffer stays
                    // zeroed.
                    break;
                }
                filled += n;
            }
            Ok(Bytes::from(buf))
        })
        .await
        .context("blocking read task failed")?
    }

    async fn write_at(&self, offset: u64, data: Bytes) -> Result<()> {
        let file = Arc::clone(&self.file);
        task::spawn_blocking(move || -> Result<()> {
            file.write_all_at(&data, offset).context("write failed")?;
            Ok(())
        })
        .await
        .context("blocking write task failed")?
    }
}
