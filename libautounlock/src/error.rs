// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use std::time::Duration;

/// Errors produced by the unlock engine.
///
/// Functions in this crate return [`anyhow::Result`] and attach one of these
/// as the outermost context, so callers can classify a failure with
/// [`anyhow::Error::downcast_ref`].
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad or missing configuration, state, or share path
    #[error("configuration error: {0}")]
    Config(String),
    /// Share parameters out of range
    #[error("invalid share parameters: threshold {threshold}, shares {shares} (need 1 <= threshold <= shares <= {max})")]
    InvalidShareParameters {
        /// requested threshold
        threshold: u16,
        /// requested total shares
        shares: u16,
        /// the upper bound for both
        max: u16,
    },
    /// A backend failed to retrieve a share
    #[error("failed to fetch share: {0}")]
    Fetch(String),
    /// A retrieved share did not decode or verify
    #[error("share verification failed: {0}")]
    Verification(String),
    /// The secret could not be reconstructed from the given shares
    #[error("could not reconstruct secret: {0}")]
    Reconstruction(String),
    /// Share collection ended below the threshold
    #[error("tried all paths, could not retrieve enough valid shares: have {have}, need {need}")]
    InsufficientShares {
        /// unique valid shares collected
        have: usize,
        /// the threshold
        need: usize,
    },
    /// AEAD failure or key/nonce length violation
    #[error("crypto error: {0}")]
    Crypto(String),
    /// The external system left the expected state
    #[error("state conflict: {0}")]
    StateConflict(String),
    /// A bounded wait ran past its deadline
    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout {
        /// what we were waiting for
        what: String,
        /// the bound
        timeout: Duration,
    },
    /// Another instance holds the lock
    #[error("another instance is already running: {0}")]
    Lock(String),
}

impl Error {
    /// A share path failing this way will never succeed, so the collector
    /// skips it instead of retrying.
    #[must_use]
    pub fn is_unusable_path(&self) -> bool {
        matches!(self, Error::Config(_))
    }
}

/// Find the outermost [`Error`] in an [`anyhow::Error`].
///
/// Context layers are only visible through [`anyhow::Error::downcast_ref`],
/// so that is tried before walking the plain source chain.
#[must_use]
pub fn classify(err: &anyhow::Error) -> Option<&Error> {
    err.downcast_ref::<Error>()
        .or_else(|| err.chain().find_map(|cause| cause.downcast_ref::<Error>()))
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use anyhow::{Context, anyhow};

    use super::{Error, classify};

    #[test]
    fn classify_finds_context() {
        let err = Err::<(), _>(anyhow!("connection refused"))
            .with_context(|| Error::Fetch("path 2".to_string()))
            .unwrap_err();
        assert!(matches!(classify(&err), Some(Error::Fetch(_))));
        assert!(!classify(&err).is_some_and(Error::is_unusable_path));
    }

    #[test]
    fn classify_sees_through_plain_context() {
        let err = Err::<(), _>(anyhow!("connection refused"))
            .with_context(|| Error::Fetch("HTTP request failed".to_string()))
            .context("failed to fetch share")
            .unwrap_err();
        assert!(matches!(classify(&err), Some(Error::Fetch(_))));
    }

    #[test]
    fn classify_prefers_outermost() {
        let err = Err::<(), _>(Error::Fetch("path 1".to_string()))
            .with_context(|| Error::Config("bad state".to_string()))
            .unwrap_err();
        assert!(matches!(classify(&err), Some(Error::Config(_))));

        let err = anyhow::Error::new(Error::Verification("tag".to_string()));
        assert!(matches!(classify(&err), Some(Error::Verification(_))));
    }

    #[test]
    fn classify_none_for_foreign_errors() {
        let err = anyhow!("plain");
        assert!(classify(&err).is_none());
    }

    #[test]
    fn timeout_message_has_duration() {
        let err = Error::Timeout {
            what: "array status Started".to_string(),
            timeout: Duration::from_secs(120),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 120s waiting for array status Started"
        );
        assert!(!err.is_unusable_path());
        assert!(Error::Config("no backend".to_string()).is_unusable_path());
    }
}
