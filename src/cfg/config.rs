// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// SCSI frontend side: where the replica lives and how long a call
    /// may stay in flight.
    pub frontend: FrontendConfig,
    /// Replica side: listen address, backing file, worker pool.
    pub replica: ReplicaConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct FrontendConfig {
    #[serde(rename = "ReplicaAddress")]
    /// `host:port` of the replica this frontend attaches to.
    pub replica_address: String,

    #[serde(rename = "CallTimeout", with = "serde_secs")]
    /// Per-call timeout; a call with no response by then fails and its
    /// late response is discarded.
    pub call_timeout: Duration,

    #[serde(rename = "QueueDepth", default = "default_queue_depth")]
    /// Bound of the client send queue.
    pub queue_depth: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ReplicaConfig {
    #[serde(rename = "ListenAddress")]
    /// `host:port` the replica daemon binds.
    pub listen_address: String,

    #[serde(rename = "DiskPath")]
    /// Backing file, created and sized on first start.
    pub disk_path: String,

    #[serde(rename = "DiskSize")]
    /// Backing file size in bytes for a fresh volume.
    pub disk_size: u64,

    #[serde(rename = "Workers", default = "default_workers")]
    /// Concurrent request workers per accepted connection; also the
    /// request/response queue bound.
    pub workers: usize,
}

fn default_queue_depth() -> usize {
    128
}

fn default_workers() -> usize {
    128
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants of the loaded values.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            !self.frontend.replica_address.is_empty(),
            "ReplicaAddress must not be empty"
        );
        ensure!(
            self.frontend.call_timeout > Duration::ZERO,
            "CallTimeout must be > 0"
        );
        ensure!(self.frontend.queue_depth >= 1, "QueueDepth must be >= 1");

        ensure!(
            !self.replica.listen_address.is_empty(),
            "ListenAddress must not be empty"
        );
        ensure!(!self.replica.disk_path.is_empty(), "DiskPath must not be empty");
        ensure!(self.replica.disk_size > 0, "DiskSize must be > 0");
        ensure!(self.replica.workers >= 1, "Workers must be >= 1");

        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
