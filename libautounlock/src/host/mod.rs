// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! The platform the array lives on, and bounded waits against it.

use std::{future::Future, path::Path, time::Duration};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::{clock::Clock, error::Error};

/// The storage array and the platform it runs on
pub trait ArrayHost: Send + Sync {
    /// Whether this is the platform the array tooling expects
    fn is_target_platform(&self) -> bool;

    /// The raw array state, e.g. `Stopped` or `Started`
    ///
    /// # Errors
    ///
    /// * If the state cannot be read, an error is returned.
    ///
    fn array_state(&self) -> Result<String>;

    /// Case-insensitive comparison of the array state against `expected`.
    /// A read failure counts as a mismatch.
    fn verify_array_status(&self, expected: &str) -> bool {
        match self.array_state() {
            Ok(state) => state.eq_ignore_ascii_case(expected),
            Err(e) => {
                warn!("Failed to read array status: {e:#}");
                false
            }
        }
    }

    /// Ask the platform to start the array
    ///
    /// # Errors
    ///
    /// * If the start command fails, an error is returned.
    ///
    fn start_array(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Checks a candidate keyfile against the encrypted devices
pub trait KeyfileTester: Send + Sync {
    /// Succeeds if `keyfile` opens at least one encrypted device
    ///
    /// # Errors
    ///
    /// * If no device accepts the keyfile, an error is returned.
    ///
    fn test_keyfile(&self, keyfile: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// Poll until the array reports `expected`, giving up after `timeout`.
///
/// # Errors
///
/// * If the deadline passes first, a timeout error is returned.
///
pub async fn wait_for_array_status<H, C>(
    host: &H,
    clock: &C,
    expected: &str,
    timeout: Duration,
    retry_delay: Duration,
) -> Result<()>
where
    H: ArrayHost,
    C: Clock,
{
    let deadline = clock.now() + timeout;
    loop {
        if host.verify_array_status(expected) {
            info!("Array status is {expected}");
            return Ok(());
        }
        if clock.now() >= deadline {
            return Err(Error::Timeout {
                what: format!("array status {expected}"),
                timeout,
            }
            .into());
        }
        debug!("Array not {expected} yet, waiting {}s", retry_delay.as_secs());
        clock.sleep(retry_delay).await;
    }
}

/// Poll until the array state can be read and is non-empty.
///
/// # Errors
///
/// * If the deadline passes first, a timeout error is returned.
///
pub async fn wait_for_readiness<H, C>(
    host: &H,
    clock: &C,
    timeout: Duration,
    retry_delay: Duration,
) -> Result<()>
where
    H: ArrayHost,
    C: Clock,
{
    let deadline = clock.now() + timeout;
    loop {
        match host.array_state() {
            Ok(state) if !state.is_empty() => {
                info!("Array ready, status {state}");
                return Ok(());
            }
            Ok(_) => debug!("Array status empty"),
            Err(e) => debug!("Array status unavailable: {e:#}"),
        }
        if clock.now() >= deadline {
            return Err(Error::Timeout {
                what: "array readiness".to_string(),
                timeout,
            }
            .into());
        }
        clock.sleep(retry_delay).await;
    }
}
