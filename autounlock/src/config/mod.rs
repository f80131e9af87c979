// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::path::PathBuf;

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat, Source};
use getset::{CopyGetters, Getters};
use libautounlock::WorkflowPaths;
use serde::{Deserialize, Serialize};
use tracing_subscriber_init::TracingConfig;

use crate::{error::Error, utils::to_path_buf};

const PLUGIN_DIR: &str = "/boot/config/plugins/auto-unlock";

/// Trait to allow default paths to be supplied to [`load`]
pub(crate) trait PathDefaults {
    /// Environment variable prefix
    fn env_prefix(&self) -> String;
    /// The absolute path to use for the config file
    fn config_absolute_path(&self) -> Option<String>;
    /// The default file path to use
    fn default_file_path(&self) -> String;
    /// The default file name to use
    fn default_file_name(&self) -> String;
    /// The abolute path to use for tracing output
    fn tracing_absolute_path(&self) -> Option<String>;
}

#[derive(Clone, CopyGetters, Debug, Deserialize, Eq, Getters, PartialEq, Serialize)]
#[serde(default)]
pub(crate) struct ConfigAutounlock {
    #[getset(get_copy = "pub(crate)")]
    verbose: u8,
    #[getset(get_copy = "pub(crate)")]
    quiet: u8,
    #[getset(get_copy = "pub(crate)")]
    enable_std_output: bool,
    #[getset(get = "pub(crate)")]
    tracing: Tracing,
    #[getset(get = "pub(crate)")]
    paths: Paths,
    #[getset(get = "pub(crate)")]
    host: HostConfig,
    /// Single instance lock
    #[getset(get = "pub(crate)")]
    lock_file: PathBuf,
    /// Logging is raised to at least debug while this file exists
    #[getset(get = "pub(crate)")]
    debug_marker: PathBuf,
}

impl Default for ConfigAutounlock {
    fn default() -> Self {
        Self {
            verbose: 0,
            quiet: 0,
            enable_std_output: true,
            tracing: Tracing::default(),
            paths: Paths::default(),
            host: HostConfig::default(),
            lock_file: PathBuf::from("/run/autounlock.lock"),
            debug_marker: PathBuf::from("/boot/config/plugins/auto-unlock/debug"),
        }
    }
}

impl ConfigAutounlock {
    pub(crate) fn debug_enabled(&self) -> bool {
        self.debug_marker.exists()
    }

    #[cfg(test)]
    pub(crate) fn with_debug_marker(mut self, debug_marker: PathBuf) -> Self {
        self.debug_marker = debug_marker;
        self
    }
}

impl TracingConfig for ConfigAutounlock {
    fn quiet(&self) -> u8 {
        self.quiet
    }

    fn verbose(&self) -> u8 {
        self.verbose
    }

    fn with_target(&self) -> bool {
        self.tracing.with_target
    }

    fn with_thread_ids(&self) -> bool {
        self.tracing.with_thread_ids
    }

    fn with_thread_names(&self) -> bool {
        self.tracing.with_thread_names
    }

    fn with_line_number(&self) -> bool {
        self.tracing.with_line_number
    }

    fn with_level(&self) -> bool {
        self.tracing.with_level
    }
}

/// Tracing configuration
#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, CopyGetters, Debug, Deserialize, Eq, Getters, PartialEq, Serialize)]
#[serde(default)]
pub(crate) struct Tracing {
    /// Should we trace the event target
    #[getset(get_copy = "pub(crate)")]
    with_target: bool,
    /// Should we trace the thread id
    #[getset(get_copy = "pub(crate)")]
    with_thread_ids: bool,
    /// Should we trace the thread names
    #[getset(get_copy = "pub(crate)")]
    with_thread_names: bool,
    /// Should we trace the line numbers
    #[getset(get_copy = "pub(crate)")]
    with_line_number: bool,
    /// Should we trace the level
    #[getset(get_copy = "pub(crate)")]
    with_level: bool,
    /// Additional tracing directives
    #[getset(get = "pub(crate)")]
    directives: Option<String>,
}

impl Default for Tracing {
    fn default() -> Self {
        Self {
            with_target: false,
            with_thread_ids: false,
            with_thread_names: false,
            with_line_number: false,
            with_level: true,
            directives: None,
        }
    }
}

/// The files the workflow works on
#[derive(Clone, Debug, Deserialize, Eq, Getters, PartialEq, Serialize)]
#[getset(get = "pub(crate)")]
#[serde(default)]
pub(crate) struct Paths {
    /// Share path list
    config: PathBuf,
    /// Persisted scheme parameters
    state: PathBuf,
    /// Plaintext keyfile
    keyfile: PathBuf,
    /// Sealed keyfile
    encrypted_file: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            config: PathBuf::from(PLUGIN_DIR).join("config.txt"),
            state: PathBuf::from(PLUGIN_DIR).join("state.json"),
            keyfile: PathBuf::from("/root/keyfile"),
            encrypted_file: PathBuf::from(PLUGIN_DIR).join("unlock.enc"),
        }
    }
}

impl From<&Paths> for WorkflowPaths {
    fn from(paths: &Paths) -> Self {
        WorkflowPaths::builder()
            .config(paths.config.clone())
            .state(paths.state.clone())
            .keyfile(paths.keyfile.clone())
            .encrypted_file(paths.encrypted_file.clone())
            .build()
    }
}

/// Where the platform keeps array state and tooling
#[derive(Clone, Debug, Deserialize, Eq, Getters, PartialEq, Serialize)]
#[getset(get = "pub(crate)")]
#[serde(default)]
pub(crate) struct HostConfig {
    /// Present only on the target platform
    marker_file: PathBuf,
    /// ini style file holding the array state
    status_file: PathBuf,
    /// Key of the array state in the status file
    status_key: String,
    /// Program and arguments that start the array
    start_command: Vec<String>,
    /// Block device lister
    lsblk: PathBuf,
    /// LUKS tool used to test the keyfile
    cryptsetup: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            marker_file: PathBuf::from("/etc/unraid-version"),
            status_file: PathBuf::from("/var/local/emhttp/var.ini"),
            status_key: "fsState".to_string(),
            start_command: vec![
                "/usr/local/sbin/emcmd".to_string(),
                "startState=STOPPED&cmdStart=Start".to_string(),
            ],
            lsblk: PathBuf::from("/bin/lsblk"),
            cryptsetup: PathBuf::from("/sbin/cryptsetup"),
        }
    }
}

/// Load the configuration.  The command line wins over the environment,
/// which wins over the file.
pub(crate) fn load<'a, S, T, D>(cli: &S, defaults: &D) -> Result<T>
where
    T: Deserialize<'a>,
    S: Source + Clone + Send + Sync + 'static,
    D: PathDefaults,
{
    let config_file_path = config_file_path(defaults)?;
    let config = Config::builder()
        .add_source(
            File::from(config_file_path)
                .format(FileFormat::Toml)
                .required(false),
        )
        .add_source(
            Environment::with_prefix(&defaults.env_prefix())
                .separator("_")
                .try_parsing(true),
        )
        .add_source(cli.clone())
        .build()
        .with_context(|| Error::ConfigBuild)?;
    config
        .try_deserialize::<T>()
        .with_context(|| Error::ConfigDeserialize)
}

fn config_file_path<D>(defaults: &D) -> Result<PathBuf>
where
    D: PathDefaults,
{
    let default_fn = || -> Result<PathBuf> { default_config_file_path(defaults) };
    defaults
        .config_absolute_path()
        .as_ref()
        .map_or_else(default_fn, to_path_buf)
}

fn default_config_file_path<D>(defaults: &D) -> Result<PathBuf>
where
    D: PathDefaults,
{
    let mut config_file_path = dirs2::config_dir().ok_or(Error::ConfigDir)?;
    config_file_path.push(defaults.default_file_path());
    config_file_path.push(defaults.default_file_name());
    let _ = config_file_path.set_extension("toml");
    Ok(config_file_path)
}

#[cfg(test)]
mod test {
    use std::{fs, path::PathBuf};

    use anyhow::Result;
    use clap::Parser;
    use tempfile::TempDir;

    use super::{ConfigAutounlock, load};
    use crate::runtime::cli::Cli;

    fn load_with(args: &[&str]) -> Result<ConfigAutounlock> {
        let cli = Cli::try_parse_from(args)?;
        load::<Cli, ConfigAutounlock, Cli>(&cli, &cli)
    }

    #[test]
    fn defaults_work() -> Result<()> {
        let dir = TempDir::new()?;
        let missing = dir.path().join("absent.toml");
        let config = load_with(&[
            "autounlock",
            "-c",
            &missing.to_string_lossy(),
            "reset",
        ])?;
        assert!(config.enable_std_output());
        assert_eq!(config.lock_file(), &PathBuf::from("/run/autounlock.lock"));
        assert_eq!(
            config.debug_marker(),
            &PathBuf::from("/boot/config/plugins/auto-unlock/debug")
        );
        assert_eq!(
            config.paths().state(),
            &PathBuf::from("/boot/config/plugins/auto-unlock/state.json")
        );
        assert_eq!(config.host().status_key(), "fsState");
        assert_eq!(config.host().start_command().len(), 2);
        Ok(())
    }

    #[test]
    fn file_and_cli_override() -> Result<()> {
        let dir = TempDir::new()?;
        let file = dir.path().join("autounlock.toml");
        fs::write(
            &file,
            r#"
lock_file = "/tmp/test.lock"

[paths]
keyfile = "/tmp/keyfile"
state = "/tmp/from-file.json"

[host]
start_command = ["/bin/true"]

[tracing]
directives = "hickory_proto=warn"
"#,
        )?;
        let config = load_with(&[
            "autounlock",
            "-vv",
            "-c",
            &file.to_string_lossy(),
            "--state",
            "/tmp/from-cli.json",
            "unlock",
            "--test",
        ])?;
        assert_eq!(config.verbose(), 2);
        assert_eq!(config.lock_file(), &PathBuf::from("/tmp/test.lock"));
        assert_eq!(config.paths().keyfile(), &PathBuf::from("/tmp/keyfile"));
        assert_eq!(config.paths().state(), &PathBuf::from("/tmp/from-cli.json"));
        assert_eq!(config.host().start_command(), &vec!["/bin/true".to_string()]);
        assert_eq!(
            config.tracing().directives().as_deref(),
            Some("hickory_proto=warn")
        );
        Ok(())
    }
}
