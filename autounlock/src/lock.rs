// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::{
    fs::{File, OpenOptions},
    os::unix::fs::OpenOptionsExt,
    path::Path,
};

use anyhow::{Context, Result};
use libautounlock::Error;
use nix::fcntl::{Flock, FlockArg};
use tracing::trace;

const LOCK_FILE_MODE: u32 = 0o600;

/// Held for the life of the process.  Dropping it releases the lock.
#[derive(Debug)]
pub(crate) struct InstanceLock {
    _flock: Flock<File>,
}

/// Take an exclusive, non-blocking lock on `path`.
pub(crate) fn acquire(path: &Path) -> Result<InstanceLock> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .mode(LOCK_FILE_MODE)
        .open(path)
        .with_context(|| Error::Lock(format!("failed to open lock file {}", path.display())))?;
    let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
        .map_err(|(_file, errno)| Error::Lock(format!("{}: {errno}", path.display())))?;
    trace!(lock = %path.display(), "Acquired instance lock");
    Ok(InstanceLock { _flock: flock })
}

#[cfg(test)]
mod test {
    use anyhow::Result;
    use libautounlock::{Error, classify};
    use tempfile::TempDir;

    use super::acquire;

    #[test]
    fn acquire_is_exclusive() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("autounlock.lock");

        let first = acquire(&path)?;
        let err = acquire(&path).unwrap_err();
        assert!(matches!(classify(&err), Some(Error::Lock(_))));

        drop(first);
        let _again = acquire(&path)?;
        Ok(())
    }
}
