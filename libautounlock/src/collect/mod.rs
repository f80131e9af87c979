// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Concurrent, retrying share collection.
//!
//! Every round fetches all untried paths at once and waits for all of them
//! before looking at the threshold.  A path counts as tried once its fetch
//! succeeds, so unreachable sources are retried next round while sources
//! returning bad shares are not.  A path no backend can use at all is marked
//! tried and skipped.

use std::{
    collections::BTreeSet,
    mem,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::Result;
use bon::Builder;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::{
    clock::{Clock, TokioClock},
    constants::{DEFAULT_RETRY_DELAY_SECS, DEFAULT_SERVER_TIMEOUT_SECS},
    error::{Error, classify},
    fetch::{Fetch, Fetcher, FetcherRegistry},
    share::{KeyShare, get_share},
};

/// Gathers verified shares from the configured paths
#[derive(Builder, Debug)]
pub struct ShareCollector<F = Fetcher, C = TokioClock> {
    /// Backends used for every fetch
    registry: Arc<FetcherRegistry<F>>,
    /// Time source for the pause between rounds
    clock: C,
    /// Pause between rounds
    #[builder(default = Duration::from_secs(u64::from(DEFAULT_RETRY_DELAY_SECS)))]
    retry_interval: Duration,
    /// Bound on each single fetch
    #[builder(default = Duration::from_secs(u64::from(DEFAULT_SERVER_TIMEOUT_SECS)))]
    server_timeout: Duration,
    /// Run one round over every path and report, whatever the array does
    #[builder(default)]
    test: bool,
}

#[derive(Default)]
struct Progress {
    tried: BTreeSet<usize>,
    seen: BTreeSet<u16>,
    shares: Vec<KeyShare>,
}

impl<F, C> ShareCollector<F, C>
where
    F: Fetch + Clone + 'static,
    C: Clock,
{
    /// Collect at least `threshold` distinct verified shares.
    ///
    /// `still_pending` is checked before every round, outside test mode, and
    /// collection stops with a state conflict as soon as it returns `false`.
    ///
    /// # Errors
    ///
    /// * If `still_pending` returns `false`, a state conflict error is returned.
    /// * If every path has been tried and the threshold was not met, an insufficient shares
    ///   error is returned.
    ///
    pub async fn collect<P>(
        &self,
        paths: &[String],
        signing_key: &[u8],
        threshold: u16,
        still_pending: P,
    ) -> Result<Vec<KeyShare>>
    where
        P: Fn() -> bool,
    {
        let need = usize::from(threshold);
        let signing_key = Arc::new(Zeroizing::new(signing_key.to_vec()));
        let progress = Arc::new(Mutex::new(Progress::default()));
        let mut round = 0usize;

        loop {
            if !self.test && !still_pending() {
                return Err(Error::StateConflict("array is no longer stopped".into()).into());
            }
            round += 1;

            let untried: Vec<(usize, String)> = {
                let progress = lock(&progress);
                paths
                    .iter()
                    .enumerate()
                    .filter(|(index, _)| !progress.tried.contains(index))
                    .map(|(index, path)| (index, path.clone()))
                    .collect()
            };
            debug!(round, paths = untried.len(), "Starting collection round");

            let mut tasks = JoinSet::new();
            for (index, path) in untried {
                let registry = Arc::clone(&self.registry);
                let progress = Arc::clone(&progress);
                let signing_key = Arc::clone(&signing_key);
                let timeout = self.server_timeout;
                let _handle = tasks.spawn(async move {
                    attempt(&registry, &progress, &signing_key, index, &path, timeout).await;
                });
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    warn!("Share task did not complete: {e}");
                }
            }

            let (have, all_tried) = {
                let progress = lock(&progress);
                (progress.shares.len(), progress.tried.len() >= paths.len())
            };
            if have >= need && !self.test {
                break;
            }
            if all_tried || self.test {
                break;
            }
            warn!(
                "Only retrieved {have} of {need} shares, retrying in {}s",
                self.retry_interval.as_secs()
            );
            self.clock.sleep(self.retry_interval).await;
        }

        let shares = mem::take(&mut lock(&progress).shares);
        if shares.len() < need {
            return Err(Error::InsufficientShares {
                have: shares.len(),
                need,
            }
            .into());
        }
        info!("Retrieved {} shares, need {need}", shares.len());
        Ok(shares)
    }
}

async fn attempt<F>(
    registry: &FetcherRegistry<F>,
    progress: &Mutex<Progress>,
    signing_key: &[u8],
    index: usize,
    path: &str,
    timeout: Duration,
) where
    F: Fetch + Clone,
{
    let number = index + 1;
    let text = match registry.fetch_share(path, timeout).await {
        Ok(text) => Zeroizing::new(text),
        Err(e) if classify(&e).is_some_and(Error::is_unusable_path) => {
            error!("Share path {number} is unusable, skipping it: {e:#}");
            let _newly_tried = lock(progress).tried.insert(index);
            return;
        }
        Err(e) => {
            warn!("Failed to fetch share {number}: {e:#}");
            return;
        }
    };
    let decoded = get_share(&text, signing_key);

    let mut progress = lock(progress);
    let _newly_tried = progress.tried.insert(index);
    match decoded {
        Ok(share) => {
            if progress.seen.insert(share.identifier()) {
                info!("Retrieved share {number}");
                progress.shares.push(share);
            } else {
                debug!("Share {number} duplicates identifier {}, discarded", share.identifier());
            }
        }
        Err(e) => warn!("Share {number} failed verification: {e:#}"),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
