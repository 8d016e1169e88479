// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Default config location relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "tests/config.yaml";

/// Resolve the config file path to a canonical absolute path.
///
/// Precedence: explicit argument, then the `NETBLOCK_CONFIG` environment
/// variable, then [`DEFAULT_CONFIG_PATH`].
pub fn resolve_config_path(arg: Option<&str>) -> Result<PathBuf> {
    let rel = match arg {
        Some(path) => path.to_owned(),
        None => std::env::var("NETBLOCK_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned()),
    };

    let p = Path::new(&rel);
    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}
