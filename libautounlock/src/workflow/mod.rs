// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Setup, unlock, path testing and reset.

use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use bon::Builder;
use getset::{CopyGetters, Getters};
use tracing::{error, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    clock::{Clock, TokioClock},
    collect::ShareCollector,
    constants::{
        ARRAY_RETRY_DELAY, ARRAY_STATUS_TIMEOUT, ARRAY_TIMEOUT, DEFAULT_RETRY_DELAY_SECS,
        DEFAULT_SERVER_TIMEOUT_SECS, START_RETRY_DELAY, STATUS_STARTED, STATUS_STOPPED,
    },
    envelope::{decrypt_file, encrypt_file},
    error::Error,
    fetch::{Fetch, Fetcher, FetcherRegistry},
    host::{ArrayHost, KeyfileTester, wait_for_array_status, wait_for_readiness},
    share::{combine_secret, create_secret, encode_share, get_share},
    state::{PersistedState, read_share_paths},
    utils::remove_if_present,
};

/// The files the workflow reads and writes
#[derive(Builder, Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct WorkflowPaths {
    /// Share path list, one per line
    #[builder(into)]
    config: PathBuf,
    /// Persisted scheme parameters
    #[builder(into)]
    state: PathBuf,
    /// Plaintext keyfile, present only transiently
    #[builder(into)]
    keyfile: PathBuf,
    /// The sealed keyfile
    #[builder(into)]
    encrypted_file: PathBuf,
}

/// Unlock tuning
#[derive(Builder, Clone, Copy, CopyGetters, Debug)]
#[getset(get_copy = "pub")]
pub struct UnlockOptions {
    /// Pause between collection rounds
    #[builder(default = Duration::from_secs(u64::from(DEFAULT_RETRY_DELAY_SECS)))]
    retry_delay: Duration,
    /// Bound on each single fetch
    #[builder(default = Duration::from_secs(u64::from(DEFAULT_SERVER_TIMEOUT_SECS)))]
    server_timeout: Duration,
    /// Decrypt and test the keyfile, but leave the array alone
    #[builder(default)]
    test: bool,
}

/// The result of a setup, shown to the operator exactly once
#[derive(CopyGetters, Getters, Zeroize, ZeroizeOnDrop)]
pub struct SetupReport {
    /// Number of shares produced
    #[getset(get_copy = "pub")]
    total: u16,
    /// Shares needed to unlock
    #[getset(get_copy = "pub")]
    threshold: u16,
    /// Base64 signed shares
    #[getset(get = "pub")]
    shares: Vec<String>,
}

impl fmt::Debug for SetupReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupReport")
            .field("total", &self.total)
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

/// Removes a file when dropped
struct RemoveOnDrop<'a>(&'a Path);

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(e) = remove_if_present(self.0) {
            error!("Failed to remove keyfile: {e:#}");
        }
    }
}

/// Drives the operator commands against a host
#[derive(Builder)]
pub struct Workflow<H, T, F = Fetcher, C = TokioClock> {
    paths: WorkflowPaths,
    registry: Arc<FetcherRegistry<F>>,
    host: H,
    tester: T,
    clock: C,
}

impl<H, T, F, C> Workflow<H, T, F, C>
where
    H: ArrayHost,
    T: KeyfileTester,
    F: Fetch + Clone + 'static,
    C: Clock + Clone,
{
    /// Refuse to run off the target platform, then wait for the array
    /// tooling to report a state.
    ///
    /// # Errors
    ///
    /// * If this is not the target platform, a configuration error is returned.
    /// * If the array state never becomes readable, a timeout error is returned.
    ///
    pub async fn prechecks(&self) -> Result<()> {
        if !self.host.is_target_platform() {
            return Err(Error::Config("not running on the target platform".into()).into());
        }
        wait_for_readiness(&self.host, &self.clock, ARRAY_TIMEOUT, ARRAY_RETRY_DELAY)
            .await
            .context("array status never became available")
    }

    /// Split a new wrapping key, seal the keyfile under it and remove the
    /// plaintext keyfile.
    ///
    /// # Errors
    ///
    /// * If the keyfile does not open any device, an error is returned.
    /// * If the share parameters are invalid, an error is returned.
    /// * If the state or the encrypted keyfile cannot be written, an error is returned.
    ///
    pub async fn setup(&self, threshold: u16, total: u16) -> Result<SetupReport> {
        self.tester
            .test_keyfile(&self.paths.keyfile)
            .await
            .context("keyfile test failed")?;
        info!("Keyfile test succeeded");

        let secret = create_secret(threshold, total)?;
        PersistedState::from_secret(&secret, threshold)
            .write(&self.paths.state)
            .context("failed to write state")?;
        info!(state = %self.paths.state.display(), "Wrote state");

        encrypt_file(
            &self.paths.keyfile,
            &self.paths.encrypted_file,
            secret.secret(),
            secret.nonce(),
        )
        .context("failed to encrypt file")?;
        if let Err(e) = remove_if_present(&self.paths.keyfile) {
            error!("Failed to remove keyfile: {e:#}");
        }
        info!(encrypted = %self.paths.encrypted_file.display(), "Encrypted keyfile");

        Ok(SetupReport {
            total,
            threshold,
            shares: secret.shares().iter().map(|s| encode_share(s)).collect(),
        })
    }

    /// Collect shares, recover the keyfile and start the array.  The
    /// plaintext keyfile never outlives this call.
    ///
    /// # Errors
    ///
    /// * If the array is already started or never reports stopped, an error is returned.
    /// * If state or the share path list cannot be read, an error is returned.
    /// * If not enough shares are collected, or reconstruction or decryption fails,
    ///   an error is returned.
    /// * If the array cannot be started, an error is returned.
    ///
    pub async fn unlock(&self, options: UnlockOptions) -> Result<()> {
        if !options.test {
            if self.host.verify_array_status(STATUS_STARTED) {
                return Err(Error::StateConflict(
                    "array is already started, aborting unlock".into(),
                )
                .into());
            }
            wait_for_array_status(
                &self.host,
                &self.clock,
                STATUS_STOPPED,
                ARRAY_STATUS_TIMEOUT,
                ARRAY_RETRY_DELAY,
            )
            .await
            .context("failed to verify array stopped")?;
        }

        let state = PersistedState::read(&self.paths.state)?;
        let share_paths = read_share_paths(&self.paths.config)?;
        let collector = ShareCollector::builder()
            .registry(Arc::clone(&self.registry))
            .clock(self.clock.clone())
            .retry_interval(options.retry_delay)
            .server_timeout(options.server_timeout)
            .test(options.test)
            .build();
        let shares = collector
            .collect(&share_paths, state.signing_key(), state.threshold(), || {
                !self.host.verify_array_status(STATUS_STARTED)
            })
            .await
            .context("failed to get shares")?;
        let secret = combine_secret(&shares, state.threshold(), state.verification_key())
            .context("failed to combine secret")?;

        let _keyfile = RemoveOnDrop(&self.paths.keyfile);
        decrypt_file(
            &self.paths.encrypted_file,
            &self.paths.keyfile,
            secret.as_slice(),
            state.nonce(),
        )
        .context("failed to decrypt file")?;
        info!(keyfile = %self.paths.keyfile.display(), "Decrypted keyfile");

        if options.test {
            self.tester
                .test_keyfile(&self.paths.keyfile)
                .await
                .context("keyfile test failed")?;
            info!("Keyfile test succeeded");
            return Ok(());
        }

        if let Err(e) = self.host.start_array().await {
            warn!(
                "Failed to start array, retrying in {}s: {e:#}",
                START_RETRY_DELAY.as_secs()
            );
            self.clock.sleep(START_RETRY_DELAY).await;
            if self.host.verify_array_status(STATUS_STARTED) {
                info!("Array started on its own");
                return Ok(());
            }
            self.host
                .start_array()
                .await
                .context("failed to start array")?;
        }

        wait_for_array_status(
            &self.host,
            &self.clock,
            STATUS_STARTED,
            ARRAY_TIMEOUT,
            ARRAY_RETRY_DELAY,
        )
        .await
        .context("failed to verify array started")
    }

    /// Fetch a single share and verify it against the persisted signing key.
    ///
    /// # Errors
    ///
    /// * If the share cannot be fetched, decoded or verified, an error is returned.
    /// * If state cannot be read, an error is returned.
    ///
    pub async fn test_path(&self, path: &str, server_timeout: Duration) -> Result<()> {
        let text = self
            .registry
            .fetch_share(path, server_timeout)
            .await
            .context("failed to fetch share")?;
        info!("Retrieved share");

        let state = PersistedState::read(&self.paths.state)?;
        let share = get_share(&text, state.signing_key()).context("failed to decode/verify share")?;
        info!(identifier = share.identifier(), "Successfully retrieved and verified share");
        Ok(())
    }

    /// Remove state, the encrypted keyfile and the share path list.
    ///
    /// Unless `force` is set, `confirm` decides; a declined reset returns
    /// `Ok(false)` and touches nothing.
    ///
    /// # Errors
    ///
    /// * If a file exists but cannot be removed, an error is returned.
    ///
    pub fn reset<P>(&self, force: bool, confirm: P) -> Result<bool>
    where
        P: FnOnce() -> bool,
    {
        if !force && !confirm() {
            info!("Reset cancelled");
            return Ok(false);
        }
        for file in [
            &self.paths.state,
            &self.paths.encrypted_file,
            &self.paths.config,
        ] {
            let _removed = remove_if_present(file)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use std::{fs, path::Path, sync::Arc, time::Duration};

    use anyhow::Result;
    use tempfile::TempDir;

    use super::{UnlockOptions, Workflow, WorkflowPaths};
    use crate::{
        clock::test::ManualClock,
        constants::START_RETRY_DELAY,
        error::{Error, classify},
        fetch::{Fetcher, FetcherRegistry},
        host::{
            ArrayHost,
            test::{MockHost, MockTester},
        },
        share::create_secret,
    };

    const KEYFILE: &[u8] = b"correct horse battery staple\n";

    type TestWorkflow = Workflow<MockHost, MockTester, Fetcher, ManualClock>;

    struct Fixture {
        dir: TempDir,
        paths: WorkflowPaths,
        host: MockHost,
        tester: MockTester,
        clock: ManualClock,
    }

    impl Fixture {
        fn new(host: MockHost) -> Result<Self> {
            let dir = TempDir::new()?;
            let paths = WorkflowPaths::builder()
                .config(dir.path().join("config.txt"))
                .state(dir.path().join("state").join("state.json"))
                .keyfile(dir.path().join("keyfile"))
                .encrypted_file(dir.path().join("unlock.enc"))
                .build();
            fs::write(paths.keyfile(), KEYFILE)?;
            Ok(Self {
                dir,
                paths,
                host,
                tester: MockTester::accepting(KEYFILE),
                clock: ManualClock::new(),
            })
        }

        fn workflow(&self) -> TestWorkflow {
            Workflow::builder()
                .paths(self.paths.clone())
                .registry(Arc::new(FetcherRegistry::with_defaults()))
                .host(self.host.clone())
                .tester(self.tester.clone())
                .clock(self.clock.clone())
                .build()
        }

        /// Write the chosen shares to files and list them, plus `extra`
        /// lines, in the share path list
        fn place_shares(&self, shares: &[String], pick: &[usize], extra: &[&str]) -> Result<()> {
            let mut lines = vec!["# shares".to_string()];
            for &i in pick {
                let path = self.dir.path().join(format!("share{}", i + 1));
                fs::write(&path, format!("{}\n", shares[i]))?;
                lines.push(path.to_string_lossy().into_owned());
            }
            lines.extend(extra.iter().map(|s| (*s).to_string()));
            fs::write(self.paths.config(), lines.join("\n"))?;
            Ok(())
        }
    }

    fn options() -> UnlockOptions {
        UnlockOptions::builder()
            .retry_delay(Duration::from_secs(1))
            .server_timeout(Duration::from_secs(5))
            .build()
    }

    fn exists(path: &Path) -> bool {
        path.try_exists().unwrap_or(false)
    }

    #[tokio::test]
    async fn setup_then_unlock_works() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]))?;
        let workflow = fixture.workflow();

        let report = workflow.setup(2, 3).await?;
        assert_eq!(report.total(), 3);
        assert_eq!(report.threshold(), 2);
        assert_eq!(report.shares().len(), 3);
        assert!(!exists(fixture.paths.keyfile()));
        assert!(exists(fixture.paths.state()));
        assert!(exists(fixture.paths.encrypted_file()));

        fixture.place_shares(report.shares(), &[0, 2], &[])?;
        workflow.unlock(options()).await?;

        assert_eq!(fixture.host.starts(), 1);
        assert!(fixture.host.verify_array_status("Started"));
        assert!(!exists(fixture.paths.keyfile()));
        Ok(())
    }

    #[tokio::test]
    async fn unlock_test_mode_tests_keyfile_and_leaves_array() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Started")]))?;
        let workflow = fixture.workflow();
        let report = workflow.setup(2, 2).await?;
        fixture.place_shares(report.shares(), &[0, 1], &[])?;

        let options = UnlockOptions::builder().test(true).build();
        workflow.unlock(options).await?;

        assert_eq!(fixture.host.starts(), 0);
        assert_eq!(fixture.tester.tested().len(), 2);
        assert!(!exists(fixture.paths.keyfile()));
        Ok(())
    }

    #[tokio::test]
    async fn unlock_refuses_started_array() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Started")]))?;
        let err = fixture.workflow().unlock(options()).await.unwrap_err();
        assert!(matches!(classify(&err), Some(Error::StateConflict(_))));
        Ok(())
    }

    #[tokio::test]
    async fn unlock_retries_start_once() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]).failing_starts(1))?;
        let workflow = fixture.workflow();
        let report = workflow.setup(1, 1).await?;
        fixture.place_shares(report.shares(), &[0], &[])?;

        workflow.unlock(options()).await?;
        assert_eq!(fixture.host.starts(), 2);
        assert!(fixture.clock.sleeps().contains(&START_RETRY_DELAY));
        Ok(())
    }

    #[tokio::test]
    async fn unlock_fails_after_second_start_failure() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]).failing_starts(2))?;
        let workflow = fixture.workflow();
        let report = workflow.setup(1, 1).await?;
        fixture.place_shares(report.shares(), &[0], &[])?;

        assert!(workflow.unlock(options()).await.is_err());
        assert_eq!(fixture.host.starts(), 2);
        assert!(!exists(fixture.paths.keyfile()));
        Ok(())
    }

    #[tokio::test]
    async fn unlock_skips_unreachable_paths() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]))?;
        let workflow = fixture.workflow();
        let report = workflow.setup(2, 3).await?;
        let missing = fixture.dir.path().join("missing-share");
        fixture.place_shares(report.shares(), &[1, 2], &[&missing.to_string_lossy()])?;

        workflow.unlock(options()).await?;
        assert!(fixture.clock.sleeps().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unlock_skips_malformed_paths() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]))?;
        let workflow = fixture.workflow();
        let report = workflow.setup(2, 3).await?;
        fixture.place_shares(report.shares(), &[0, 1], &["aws-ssm://typo-no-credentials"])?;

        workflow.unlock(options()).await?;
        assert_eq!(fixture.host.starts(), 1);
        assert!(fixture.clock.sleeps().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unlock_with_too_few_shares_fails() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]))?;
        let workflow = fixture.workflow();
        let report = workflow.setup(2, 3).await?;
        let foreign = create_secret(2, 3)?;
        let foreign_path = fixture.dir.path().join("foreign");
        fs::write(&foreign_path, super::encode_share(&foreign.shares()[0]))?;
        fixture.place_shares(report.shares(), &[1], &[&foreign_path.to_string_lossy()])?;

        let err = workflow.unlock(options()).await.unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(Error::InsufficientShares { have: 1, need: 2 })
        ));
        assert_eq!(fixture.host.starts(), 0);
        assert!(!exists(fixture.paths.keyfile()));
        Ok(())
    }

    #[tokio::test]
    async fn setup_rejects_bad_keyfile() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]))?;
        fs::write(fixture.paths.keyfile(), b"wrong passphrase")?;
        assert!(fixture.workflow().setup(2, 3).await.is_err());
        assert!(!exists(fixture.paths.state()));
        assert!(!exists(fixture.paths.encrypted_file()));
        assert!(exists(fixture.paths.keyfile()));
        Ok(())
    }

    #[tokio::test]
    async fn setup_rejects_bad_parameters() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]))?;
        let err = fixture.workflow().setup(4, 3).await.unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(Error::InvalidShareParameters { .. })
        ));
        assert!(exists(fixture.paths.keyfile()));
        Ok(())
    }

    #[tokio::test]
    async fn test_path_works() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]))?;
        let workflow = fixture.workflow();
        let report = workflow.setup(2, 3).await?;

        let good = fixture.dir.path().join("good");
        fs::write(&good, &report.shares()[1])?;
        workflow
            .test_path(&good.to_string_lossy(), Duration::from_secs(5))
            .await?;

        let foreign = create_secret(2, 3)?;
        let bad = fixture.dir.path().join("bad");
        fs::write(&bad, super::encode_share(&foreign.shares()[0]))?;
        let err = workflow
            .test_path(&bad.to_string_lossy(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(classify(&err), Some(Error::Verification(_))));
        Ok(())
    }

    #[test]
    fn reset_works() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[Some("Stopped")]))?;
        let workflow = fixture.workflow();
        let paths = &fixture.paths;
        fs::create_dir_all(fixture.dir.path().join("state"))?;
        for file in [paths.config(), paths.state(), paths.encrypted_file()] {
            fs::write(file, b"x")?;
        }

        assert!(!workflow.reset(false, || false)?);
        assert!(exists(paths.state()));

        assert!(workflow.reset(false, || true)?);
        assert!(!exists(paths.config()));
        assert!(!exists(paths.state()));
        assert!(!exists(paths.encrypted_file()));
        assert!(exists(paths.keyfile()));

        assert!(workflow.reset(true, || false)?);
        Ok(())
    }

    #[tokio::test]
    async fn prechecks_works() -> Result<()> {
        let fixture = Fixture::new(MockHost::with_states(&[None, Some("Stopped")]))?;
        fixture.workflow().prechecks().await?;

        let fixture = Fixture::new(MockHost::foreign())?;
        let err = fixture.workflow().prechecks().await.unwrap_err();
        assert!(matches!(classify(&err), Some(Error::Config(_))));
        Ok(())
    }
}
