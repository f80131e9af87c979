// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Share retrieval backends and the priority ordered registry that picks one
//! per path.

use std::{
    future::Future,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use anyhow::Result;
use tracing::trace;

use crate::error::Error;

pub use self::{
    cloud::{ParameterStoreFetcher, SecretStoreFetcher},
    dns::DnsFetcher,
    http::HttpFetcher,
    object::ObjectFetcher,
};

mod cloud;
mod dns;
mod http;
mod object;

/// Priority of the DNS TXT backend
pub const DNS_PRIORITY: i32 = 10;
/// Priority of the HTTP(S) backend
pub const HTTP_PRIORITY: i32 = 20;
/// Priority of the cloud secret and parameter store backends
pub const CLOUD_PRIORITY: i32 = 25;
/// Priority of the generic object backend, the catch-all
pub const OBJECT_PRIORITY: i32 = 100;

/// A share retrieval backend
pub trait Fetch: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Whether this backend handles `path`
    fn matches(&self, path: &str) -> bool;

    /// Lower runs first
    fn priority(&self) -> i32;

    /// Retrieve the share text stored at `path`
    ///
    /// # Errors
    ///
    /// * If the share cannot be retrieved, an error is returned.
    ///
    fn fetch(&self, path: &str) -> impl Future<Output = Result<String>> + Send;
}

/// The standard backends
#[derive(Clone, Debug)]
pub enum Fetcher {
    /// `dns:<domain>`
    Dns(DnsFetcher),
    /// `http://`, `https://`, `https+insecure://`
    Http(HttpFetcher),
    /// `aws-secrets://`
    SecretStore(SecretStoreFetcher),
    /// `aws-ssm://`
    ParameterStore(ParameterStoreFetcher),
    /// Everything else
    Object(ObjectFetcher),
}

impl Fetch for Fetcher {
    fn name(&self) -> &'static str {
        match self {
            Self::Dns(f) => f.name(),
            Self::Http(f) => f.name(),
            Self::SecretStore(f) => f.name(),
            Self::ParameterStore(f) => f.name(),
            Self::Object(f) => f.name(),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Dns(f) => f.matches(path),
            Self::Http(f) => f.matches(path),
            Self::SecretStore(f) => f.matches(path),
            Self::ParameterStore(f) => f.matches(path),
            Self::Object(f) => f.matches(path),
        }
    }

    fn priority(&self) -> i32 {
        match self {
            Self::Dns(f) => f.priority(),
            Self::Http(f) => f.priority(),
            Self::SecretStore(f) => f.priority(),
            Self::ParameterStore(f) => f.priority(),
            Self::Object(f) => f.priority(),
        }
    }

    async fn fetch(&self, path: &str) -> Result<String> {
        match self {
            Self::Dns(f) => f.fetch(path).await,
            Self::Http(f) => f.fetch(path).await,
            Self::SecretStore(f) => f.fetch(path).await,
            Self::ParameterStore(f) => f.fetch(path).await,
            Self::Object(f) => f.fetch(path).await,
        }
    }
}

/// Backends kept sorted by ascending priority
#[derive(Debug)]
pub struct FetcherRegistry<F = Fetcher> {
    fetchers: RwLock<Vec<F>>,
}

impl<F> Default for FetcherRegistry<F> {
    fn default() -> Self {
        Self {
            fetchers: RwLock::new(Vec::new()),
        }
    }
}

impl FetcherRegistry<Fetcher> {
    /// A registry holding the five standard backends
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::default();
        registry.register(Fetcher::Dns(DnsFetcher));
        registry.register(Fetcher::Http(HttpFetcher));
        registry.register(Fetcher::SecretStore(SecretStoreFetcher));
        registry.register(Fetcher::ParameterStore(ParameterStoreFetcher));
        registry.register(Fetcher::Object(ObjectFetcher));
        registry
    }
}

impl<F> FetcherRegistry<F>
where
    F: Fetch + Clone,
{
    /// Add a backend.  Equal priorities keep registration order.
    pub fn register(&self, fetcher: F) {
        let mut fetchers = write(&self.fetchers);
        trace!(name = fetcher.name(), priority = fetcher.priority(), "Registering fetcher");
        fetchers.push(fetcher);
        fetchers.sort_by_key(Fetch::priority);
    }

    /// A snapshot of the registered backends in dispatch order
    #[must_use]
    pub fn fetchers(&self) -> Vec<F> {
        read(&self.fetchers).clone()
    }

    /// The first backend, in priority order, that handles `path`
    #[must_use]
    pub fn find(&self, path: &str) -> Option<F> {
        read(&self.fetchers)
            .iter()
            .find(|f| f.matches(path))
            .cloned()
    }

    /// Fetch one share through the first matching backend, bounded by
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// * If no backend handles `path`, a configuration error is returned.
    /// * If the backend fails or the timeout elapses, a fetch error is returned.
    ///
    pub async fn fetch_share(&self, path: &str, timeout: Duration) -> Result<String> {
        let fetcher = self
            .find(path)
            .ok_or_else(|| Error::Config("no fetcher available for path".into()))?;
        trace!(name = fetcher.name(), "Dispatching fetch");
        match tokio::time::timeout(timeout, fetcher.fetch(path)).await {
            Ok(result) => result,
            Err(_elapsed) => Err(Error::Fetch(format!(
                "{} fetch timed out after {}s",
                fetcher.name(),
                timeout.as_secs()
            ))
            .into()),
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
