// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::time::Duration;

/// Delay between polls of the array state
pub const ARRAY_RETRY_DELAY: Duration = Duration::from_secs(15);
/// Bound on waiting for the array to report `Stopped`
pub const ARRAY_STATUS_TIMEOUT: Duration = Duration::from_secs(120);
/// Bound on waiting for the array to start, and for host readiness
pub const ARRAY_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Delay before the single retry of a failed array start
pub const START_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Array state before unlock
pub const STATUS_STOPPED: &str = "Stopped";
/// Array state after unlock
pub const STATUS_STARTED: &str = "Started";

/// AES-256-GCM key length
pub const ENCRYPTION_KEY_BYTES: usize = 32;
/// AES-GCM nonce length
pub const NONCE_BYTES: usize = 12;
/// HMAC-SHA256 tag length appended to every share
pub const SIGNATURE_BYTES: usize = 32;
/// Inclusive lower bound of the envelope padding
pub const MIN_PADDING_LENGTH: usize = 64;
/// Exclusive upper bound of the envelope padding
pub const MAX_PADDING_LENGTH: usize = 1_048_576;
/// Upper bound on threshold and total share count
pub const MAX_SHARES: u16 = 100;

/// Mode for the encrypted and decrypted keyfiles
pub const ENCRYPTION_FILE_MODE: u32 = 0o600;
/// Mode for the state file
pub const STATE_FILE_MODE: u32 = 0o600;
/// Mode for the state directory
pub const STATE_DIR_MODE: u32 = 0o700;

/// Largest accepted HTTP share body
pub const MAX_HTTP_RESPONSE_BYTES: usize = 512;

/// Default delay between collection rounds, in seconds
pub const DEFAULT_RETRY_DELAY_SECS: u16 = 60;
/// Default per-fetch timeout, in seconds
pub const DEFAULT_SERVER_TIMEOUT_SECS: u16 = 30;
