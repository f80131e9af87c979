// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::{
    fs::{OpenOptions, Permissions, set_permissions},
    io::{ErrorKind, Write},
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::Path,
};

use anyhow::{Context, Result};
use tracing::{debug, info};

/// Write `contents` to `path`, creating or truncating it with `mode`.
///
/// The mode is re-applied so a pre-existing file with looser permissions is
/// tightened too.
pub(crate) fn write_with_mode(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .with_context(|| format!("failed to open {} for writing", path.display()))?;
    set_permissions(path, Permissions::from_mode(mode))?;
    file.write_all(contents)?;
    file.sync_all()?;
    Ok(())
}

/// Remove a file, treating "already gone" as success.
///
/// Returns `true` if a file was removed.
pub(crate) fn remove_if_present(path: &Path) -> Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!(file = %path.display(), "Removed file");
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(file = %path.display(), "File already removed");
            Ok(false)
        }
        Err(e) => Err(e).with_context(|| format!("failed to remove file {}", path.display())),
    }
}
