// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Unlock an encrypted array at boot from threshold-shared key material

mod config;
mod error;
mod lock;
mod logging;
mod runtime;
mod system;
mod utils;

use std::process;

use crate::error::{clap_or_error, success};

#[tokio::main]
async fn main() {
    process::exit(
        runtime::run(None::<Vec<&str>>)
            .await
            .map_or_else(clap_or_error, success),
    )
}
