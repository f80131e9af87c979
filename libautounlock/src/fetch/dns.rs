// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use anyhow::{Context, Result};
use hickory_resolver::TokioAsyncResolver;
use tracing::trace;

use super::{DNS_PRIORITY, Fetch};
use crate::error::Error;

const PREFIX: &str = "dns:";

/// Reads a share from the TXT records of `dns:<domain>`
#[derive(Clone, Copy, Debug, Default)]
pub struct DnsFetcher;

impl DnsFetcher {
    fn domain(path: &str) -> Result<&str> {
        let domain = path.strip_prefix(PREFIX).unwrap_or(path).trim();
        if domain.is_empty() {
            return Err(Error::Config("dns path has no domain".into()).into());
        }
        Ok(domain)
    }
}

impl Fetch for DnsFetcher {
    fn name(&self) -> &'static str {
        "dns"
    }

    fn matches(&self, path: &str) -> bool {
        path.starts_with(PREFIX)
    }

    fn priority(&self) -> i32 {
        DNS_PRIORITY
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        let domain = Self::domain(path)?;
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .with_context(|| Error::Fetch("failed to load system resolver configuration".into()))?;
        let lookup = resolver
            .txt_lookup(domain)
            .await
            .with_context(|| Error::Fetch("TXT lookup failed".into()))?;

        trace!(records = lookup.iter().count(), "Resolved TXT records");
        Ok(join_txt(
            lookup
                .iter()
                .flat_map(|record| record.txt_data().iter().map(|part| &part[..])),
        ))
    }
}

/// Concatenate TXT character strings with no delimiter.  No data yields an
/// empty share, which then fails verification.
fn join_txt<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let bytes: Vec<u8> = parts.into_iter().flatten().copied().collect();
    String::from_utf8_lossy(&bytes).into_owned()
}
