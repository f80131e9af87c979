// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use clap::{ArgAction, Parser, Subcommand};
use config::{ConfigError, Map, Source, Value, ValueKind};
use getset::Getters;
use libautounlock::{DEFAULT_RETRY_DELAY_SECS, DEFAULT_SERVER_TIMEOUT_SECS, MAX_SHARES};

use crate::config::PathDefaults;

#[derive(Clone, Debug, Getters, Parser)]
#[command(author, version, about, long_about = None)]
#[getset(get = "pub(crate)")]
pub(crate) struct Cli {
    /// Set logging verbosity.  More v's, more verbose.
    #[clap(
        short,
        long,
        action = ArgAction::Count,
        help = "Turn up logging verbosity (multiple will turn it up more)",
        conflicts_with = "quiet",
    )]
    verbose: u8,
    /// Set logging quietness.  More q's, more quiet.
    #[clap(
        short,
        long,
        action = ArgAction::Count,
        help = "Turn down logging verbosity (multiple will turn it down more)",
        conflicts_with = "verbose",
    )]
    quiet: u8,
    /// Enable logging to stderr in addition to the tracing output file
    #[clap(short, long, help = "Enable logging to stderr")]
    enable_std_output: bool,
    /// The absolute path to a non-standard config file
    #[clap(short, long, help = "Specify the absolute path to the config file")]
    config_absolute_path: Option<String>,
    /// The absolute path to a tracing output file
    #[clap(
        short,
        long,
        help = "Specify the absolute path to the tracing output file"
    )]
    tracing_absolute_path: Option<String>,
    #[clap(long, help = "Path to the share path list")]
    config: Option<String>,
    #[clap(long, help = "Path to the state file")]
    state: Option<String>,
    #[clap(long, help = "Path to the plaintext keyfile")]
    keyfile: Option<String>,
    #[clap(long, alias = "encryptedfile", help = "Path to the encrypted keyfile")]
    encrypted_file: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub(crate) enum Commands {
    /// Split a new wrapping key, seal the keyfile with it and print the shares
    Setup {
        #[clap(
            long,
            default_value_t = 3,
            value_parser = clap::value_parser!(u16).range(1..=i64::from(MAX_SHARES)),
            help = "Number of shares required to unlock"
        )]
        threshold: u16,
        #[clap(
            long,
            default_value_t = 5,
            value_parser = clap::value_parser!(u16).range(1..=i64::from(MAX_SHARES)),
            help = "Total number of shares to generate"
        )]
        shares: u16,
    },
    /// Collect shares, recover the keyfile and start the array
    Unlock {
        #[clap(
            long,
            env = "RETRY_DELAY",
            default_value_t = DEFAULT_RETRY_DELAY_SECS,
            help = "Seconds to wait between collection rounds"
        )]
        retry_delay: u16,
        #[clap(
            long,
            env = "SERVER_TIMEOUT",
            default_value_t = DEFAULT_SERVER_TIMEOUT_SECS,
            help = "Timeout for each share fetch in seconds"
        )]
        server_timeout: u16,
        #[clap(long, help = "Recover and test the keyfile without starting the array")]
        test: bool,
    },
    /// Fetch one share and verify it against the current state
    #[command(alias = "testpath")]
    TestPath {
        /// The share path to test
        path: String,
        #[clap(
            long,
            env = "SERVER_TIMEOUT",
            default_value_t = DEFAULT_SERVER_TIMEOUT_SECS,
            help = "Timeout for the share fetch in seconds"
        )]
        server_timeout: u16,
    },
    /// Remove the state, the encrypted keyfile and the share path list
    Reset {
        #[clap(long, help = "Reset without asking for confirmation")]
        force: bool,
    },
}

impl Source for Cli {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new((*self).clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let mut map = Map::new();
        let origin = String::from("command line");
        let _old = map.insert(
            "verbose".to_string(),
            Value::new(Some(&origin), ValueKind::U64(u8::into(self.verbose))),
        );
        let _old = map.insert(
            "quiet".to_string(),
            Value::new(Some(&origin), ValueKind::U64(u8::into(self.quiet))),
        );
        if self.enable_std_output {
            let _old = map.insert(
                "enable_std_output".to_string(),
                Value::new(Some(&origin), ValueKind::Boolean(true)),
            );
        }
        for (key, value) in [
            ("paths.config", &self.config),
            ("paths.state", &self.state),
            ("paths.keyfile", &self.keyfile),
            ("paths.encrypted_file", &self.encrypted_file),
        ] {
            if let Some(value) = value {
                let _old = map.insert(
                    key.to_string(),
                    Value::new(Some(&origin), ValueKind::String(value.clone())),
                );
            }
        }
        Ok(map)
    }
}

impl PathDefaults for Cli {
    fn env_prefix(&self) -> String {
        env!("CARGO_PKG_NAME").to_ascii_uppercase()
    }

    fn config_absolute_path(&self) -> Option<String> {
        self.config_absolute_path.clone()
    }

    fn default_file_path(&self) -> String {
        env!("CARGO_PKG_NAME").to_string()
    }

    fn default_file_name(&self) -> String {
        env!("CARGO_PKG_NAME").to_string()
    }

    fn tracing_absolute_path(&self) -> Option<String> {
        self.tracing_absolute_path.clone()
    }
}

#[cfg(test)]
mod test {
    use anyhow::Result;
    use clap::Parser;
    use config::Source;

    use super::{Cli, Commands};

    #[test]
    fn setup_defaults_work() -> Result<()> {
        let cli = Cli::try_parse_from(["autounlock", "setup"])?;
        assert!(matches!(
            cli.command(),
            Commands::Setup {
                threshold: 3,
                shares: 5
            }
        ));
        Ok(())
    }

    #[test]
    fn setup_rejects_out_of_range() {
        assert!(Cli::try_parse_from(["autounlock", "setup", "--threshold", "0"]).is_err());
        assert!(Cli::try_parse_from(["autounlock", "setup", "--shares", "101"]).is_err());
    }

    #[test]
    fn unlock_and_test_path_work() -> Result<()> {
        let cli = Cli::try_parse_from([
            "autounlock",
            "unlock",
            "--retry-delay",
            "5",
            "--server-timeout",
            "7",
            "--test",
        ])?;
        assert!(matches!(
            cli.command(),
            Commands::Unlock {
                retry_delay: 5,
                server_timeout: 7,
                test: true
            }
        ));

        let cli = Cli::try_parse_from(["autounlock", "testpath", "dns:share.example.com"])?;
        match cli.command() {
            Commands::TestPath { path, .. } => assert_eq!(path, "dns:share.example.com"),
            other => panic!("unexpected command {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["autounlock", "-v", "-q", "reset"]).is_err());
    }

    #[test]
    fn source_collects_paths() -> Result<()> {
        let cli = Cli::try_parse_from([
            "autounlock",
            "-e",
            "--keyfile",
            "/tmp/keyfile",
            "reset",
            "--force",
        ])?;
        let map = cli.collect()?;
        assert!(map.contains_key("paths.keyfile"));
        assert!(!map.contains_key("paths.state"));
        assert!(map.contains_key("enable_std_output"));
        Ok(())
    }
}
