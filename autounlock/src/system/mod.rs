// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The array host and keyfile tester for the NAS platform.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use bon::Builder;
use config::{Config, ConfigError, File, FileFormat};
use libautounlock::{ArrayHost, KeyfileTester, STATUS_STOPPED};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::{config::HostConfig, error::Error};

/// Reads array state from the platform status file and starts the array
/// with the platform command
#[derive(Builder, Clone, Debug)]
pub(crate) struct SystemHost {
    #[builder(into)]
    marker_file: PathBuf,
    #[builder(into)]
    status_file: PathBuf,
    #[builder(into)]
    status_key: String,
    start_command: Vec<String>,
    /// Must exist before a start is attempted
    #[builder(into)]
    keyfile: PathBuf,
}

impl SystemHost {
    pub(crate) fn from_config(config: &HostConfig, keyfile: &Path) -> Self {
        Self::builder()
            .marker_file(config.marker_file().clone())
            .status_file(config.status_file().clone())
            .status_key(config.status_key().clone())
            .start_command(config.start_command().clone())
            .keyfile(keyfile)
            .build()
    }
}

/// The value of `key` outside any section of an ini document
fn ini_value(contents: &str, key: &str) -> Result<Option<String>> {
    let status = Config::builder()
        .add_source(File::from_str(contents, FileFormat::Ini))
        .build()?;
    match status.get_string(key) {
        Ok(value) => Ok(Some(value)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl ArrayHost for SystemHost {
    fn is_target_platform(&self) -> bool {
        self.marker_file.exists()
    }

    fn array_state(&self) -> Result<String> {
        let status_file = self.status_file.display().to_string();
        let contents = std::fs::read_to_string(&self.status_file)
            .with_context(|| Error::StatusFile(status_file.clone()))?;
        let state = ini_value(&contents, &self.status_key)
            .with_context(|| Error::StatusFile(status_file))?
            .unwrap_or_default();
        debug!(state = %state, "Read array state");
        Ok(state)
    }

    async fn start_array(&self) -> Result<()> {
        if !self.keyfile.exists() {
            return Err(anyhow!("keyfile not found: {}", self.keyfile.display()));
        }
        if !self.verify_array_status(STATUS_STOPPED) {
            return Err(anyhow!("array is not stopped"));
        }
        let (program, args) = self
            .start_command
            .split_first()
            .ok_or_else(|| libautounlock::Error::Config("start command is empty".into()))?;

        info!("Starting array");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .with_context(|| Error::Command(program.clone()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "failed to start array: {}, output: {}{}",
                output.status,
                String::from_utf8_lossy(&output.stdout).trim(),
                String::from_utf8_lossy(&output.stderr).trim(),
            ));
        }
        info!("Array start requested");
        Ok(())
    }
}

/// Tries a keyfile against every LUKS device on the system
#[derive(Builder, Clone, Debug)]
pub(crate) struct LuksTester {
    #[builder(into)]
    lsblk: PathBuf,
    #[builder(into)]
    cryptsetup: PathBuf,
}

impl LuksTester {
    pub(crate) fn from_config(config: &HostConfig) -> Self {
        Self::builder()
            .lsblk(config.lsblk().clone())
            .cryptsetup(config.cryptsetup().clone())
            .build()
    }

    async fn luks_devices(&self) -> Result<Vec<BlockDevice>> {
        let output = Command::new(&self.lsblk)
            .args(["-Jpo", "NAME,FSTYPE", "-Q", "FSTYPE=='crypto_LUKS'"])
            .output()
            .await
            .with_context(|| Error::Command(self.lsblk.display().to_string()))?;
        if !output.status.success() {
            return Err(anyhow!("lsblk failed: {}", output.status));
        }
        let devices: BlockDevices =
            serde_json::from_slice(&output.stdout).context("failed to parse lsblk output")?;
        Ok(devices.blockdevices)
    }
}

#[derive(Debug, Deserialize)]
struct BlockDevices {
    #[serde(default)]
    blockdevices: Vec<BlockDevice>,
}

#[derive(Debug, Deserialize)]
struct BlockDevice {
    name: String,
    fstype: Option<String>,
}

impl KeyfileTester for LuksTester {
    async fn test_keyfile(&self, keyfile: &Path) -> Result<()> {
        info!(keyfile = %keyfile.display(), "Verifying that the keyfile can unlock disks");
        if !keyfile.exists() {
            return Err(anyhow!("keyfile not found: {}", keyfile.display()));
        }

        for device in self.luks_devices().await? {
            debug!(device = device.name, fstype = ?device.fstype, "Found block device");
            let status = Command::new(&self.cryptsetup)
                .args(["luksOpen", "--test-passphrase", "--key-file"])
                .arg(keyfile)
                .arg(&device.name)
                .status()
                .await
                .with_context(|| Error::Command(self.cryptsetup.display().to_string()))?;
            if status.success() {
                info!(device = device.name, "Keyfile unlocks LUKS device");
                return Ok(());
            }
            error!(device = device.name, "Keyfile failed to unlock LUKS device");
        }
        Err(anyhow!("keyfile could not decrypt any LUKS devices"))
    }
}
