// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::{Context, Result};
use netblock_rs::cfg::{cli::resolve_config_path, config::Config};

#[test]
fn load_default_config() -> Result<()> {
    let cfg = resolve_config_path(Some("tests/config.yaml"))
        .and_then(Config::load_from_file)
        .context("failed to resolve or load config")?;

    assert_eq!(cfg.frontend.replica_address, "127.0.0.1:5000");
    assert_eq!(cfg.frontend.call_timeout, Duration::from_secs(5));
    assert_eq!(cfg.frontend.queue_depth, 128);
    assert_eq!(cfg.replica.disk_size, 1073741824);
    assert_eq!(cfg.replica.workers, 128);
    Ok(())
}

#[test]
fn queue_depth_and_workers_default_when_omitted() -> Result<()> {
    let yaml = r#"
frontend:
  ReplicaAddress: "10.0.0.1:5000"
  CallTimeout: 30
replica:
  ListenAddress: "0.0.0.0:5000"
  DiskPath: "vol.img"
  DiskSize: 4096
"#;
    let mut cfg: Config = serde_yaml::from_str(yaml)?;
    cfg.validate_and_normalize()?;
    assert_eq!(cfg.frontend.queue_depth, 128);
    assert_eq!(cfg.replica.workers, 128);
    Ok(())
}

#[test]
fn zero_disk_size_is_rejected() {
    let yaml = r#"
frontend:
  ReplicaAddress: "10.0.0.1:5000"
  CallTimeout: 30
replica:
  ListenAddress: "0.0.0.0:5000"
  DiskPath: "vol.img"
  DiskSize: 0
"#;
    let mut cfg: Config = serde_yaml::from_str(yaml).expect("parse");
    assert!(cfg.validate_and_normalize().is_err());
}

#[test]
fn zero_timeout_is_rejected() {
    let yaml = r#"
frontend:
  ReplicaAddress: "10.0.0.1:5000"
  CallTimeout: 0
replica:
  ListenAddress: "0.0.0.0:5000"
  DiskPath: "vol.img"
  DiskSize: 4096
"#;
    let mut cfg: Config = serde_yaml::from_str(yaml).expect("parse");
    assert!(cfg.validate_and_normalize().is_err());
}
