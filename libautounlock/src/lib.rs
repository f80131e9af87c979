// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Unattended array unlock from threshold-shared key material.
//!
//! A random wrapping key is split into signed shares, any `threshold` of
//! which recover it.  The keyfile that opens the array is sealed under the
//! wrapping key.  At boot the shares are gathered from wherever the operator
//! put them (web servers, DNS, cloud secret stores, object storage), the
//! wrapping key is rebuilt and checked, and the keyfile is recovered just
//! long enough to start the array.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use anyhow::Result;
//! # use libautounlock::{ArrayHost, FetcherRegistry, KeyfileTester, TokioClock, UnlockOptions, Workflow, WorkflowPaths};
//! # async fn example<H: ArrayHost, T: KeyfileTester>(host: H, tester: T) -> Result<()> {
//! let paths = WorkflowPaths::builder()
//!     .config("/boot/config/plugins/auto-unlock/config.txt")
//!     .state("/boot/config/plugins/auto-unlock/state.json")
//!     .keyfile("/root/keyfile")
//!     .encrypted_file("/boot/config/plugins/auto-unlock/unlock.enc")
//!     .build();
//! let workflow = Workflow::builder()
//!     .paths(paths)
//!     .registry(Arc::new(FetcherRegistry::with_defaults()))
//!     .host(host)
//!     .tester(tester)
//!     .clock(TokioClock)
//!     .build();
//! workflow.prechecks().await?;
//! workflow.unlock(UnlockOptions::builder().build()).await?;
//! # Ok(())
//! # }
//! ```

mod clock;
mod collect;
mod constants;
mod envelope;
mod error;
mod fetch;
mod host;
mod primitives;
mod share;
mod state;
mod utils;
mod workflow;

pub use self::clock::{Clock, TokioClock};
pub use self::collect::ShareCollector;
pub use self::constants::{
    ARRAY_RETRY_DELAY, ARRAY_STATUS_TIMEOUT, ARRAY_TIMEOUT, DEFAULT_RETRY_DELAY_SECS,
    DEFAULT_SERVER_TIMEOUT_SECS, ENCRYPTION_KEY_BYTES, MAX_HTTP_RESPONSE_BYTES, MAX_PADDING_LENGTH,
    MAX_SHARES, MIN_PADDING_LENGTH, NONCE_BYTES, SIGNATURE_BYTES, START_RETRY_DELAY,
    STATUS_STARTED, STATUS_STOPPED,
};
pub use self::envelope::{Envelope, decrypt_file, encrypt_file, open_envelope, seal_envelope};
pub use self::error::{Error, classify};
pub use self::fetch::{
    CLOUD_PRIORITY, DNS_PRIORITY, DnsFetcher, Fetch, Fetcher, FetcherRegistry, HTTP_PRIORITY,
    HttpFetcher, OBJECT_PRIORITY, ObjectFetcher, ParameterStoreFetcher, SecretStoreFetcher,
};
pub use self::host::{ArrayHost, KeyfileTester, wait_for_array_status, wait_for_readiness};
pub use self::primitives::{random_bytes, sign_share, verify_share};
pub use self::share::{
    KeyShare, SHARE_PAYLOAD_BYTES, SharedSecret, combine_secret, create_secret, encode_share,
    get_share,
};
pub use self::state::{PersistedState, read_share_paths};
pub use self::workflow::{SetupReport, UnlockOptions, Workflow, WorkflowPaths};
