// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::{
    ffi::OsString,
    io::{BufRead, Write, stdin, stdout},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::style::{Stylize, style};
use libautounlock::{FetcherRegistry, SetupReport, TokioClock, UnlockOptions, Workflow};
use tracing::{error, trace};

use crate::{
    config::{ConfigAutounlock, load},
    error::Error,
    lock::acquire,
    logging::initialize,
    runtime::cli::{Cli, Commands},
    system::{LuksTester, SystemHost},
};

pub(crate) mod cli;

pub(crate) async fn run<I, T>(args: Option<I>) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    // Parse the command line
    let cli = if let Some(args) = args {
        Cli::try_parse_from(args)?
    } else {
        Cli::try_parse()?
    };

    // Load the configuration
    let config =
        load::<Cli, ConfigAutounlock, Cli>(&cli, &cli).with_context(|| Error::ConfigLoad)?;

    // Initialize tracing
    initialize(&config, &config, &cli, None).with_context(|| Error::TracingInit)?;

    trace!("configuration loaded");
    trace!("tracing initialized");

    let _lock = acquire(config.lock_file())?;

    let keyfile = config.paths().keyfile().clone();
    let workflow = Workflow::builder()
        .paths(config.paths().into())
        .registry(Arc::new(FetcherRegistry::with_defaults()))
        .host(SystemHost::from_config(config.host(), &keyfile))
        .tester(LuksTester::from_config(config.host()))
        .clock(TokioClock)
        .build();

    workflow.prechecks().await.with_context(|| Error::Prechecks)?;
    trace!("prechecks passed");

    match cli.command() {
        Commands::Setup { threshold, shares } => {
            let report = workflow.setup(*threshold, *shares).await?;
            print_report(&report);
        }
        Commands::Unlock {
            retry_delay,
            server_timeout,
            test,
        } => {
            let options = UnlockOptions::builder()
                .retry_delay(Duration::from_secs(u64::from(*retry_delay)))
                .server_timeout(Duration::from_secs(u64::from(*server_timeout)))
                .test(*test)
                .build();
            workflow.unlock(options).await?;
        }
        Commands::TestPath {
            path,
            server_timeout,
        } => {
            workflow
                .test_path(path, Duration::from_secs(u64::from(*server_timeout)))
                .await?;
            println!("{}", "Share retrieved and verified".green().bold());
        }
        Commands::Reset { force } => {
            if workflow.reset(*force, confirm_reset)? {
                println!("{}", "Reset complete".green().bold());
            } else {
                println!("Reset cancelled.");
            }
        }
    }
    Ok(())
}

fn print_report(report: &SetupReport) {
    println!("{} {}", "Total Shares:".green().bold(), report.total());
    println!(
        "{} {}",
        "Unlock Threshold:".green().bold(),
        report.threshold()
    );
    println!();
    println!(
        "{}",
        "Record each share somewhere separate.  They will not be shown again.".bold()
    );
    println!();
    for share in report.shares() {
        println!("{share}");
    }
}

fn confirm_reset() -> bool {
    let prompt = style("This removes the state, the encrypted keyfile and the share list. Continue? [y/N] ")
        .red()
        .bold();
    print!("{prompt}");
    if let Err(e) = stdout().flush() {
        error!("{e}");
    }
    let mut answer = String::new();
    match stdin().lock().read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(e) => {
            error!("{:#}", anyhow::Error::new(e).context(Error::Confirmation));
            false
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
