// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Persisted scheme parameters and the share path list.

use std::{
    fmt,
    fs::DirBuilder,
    os::unix::fs::DirBuilderExt,
    path::Path,
};

use anyhow::{Context, Result};
use bon::Builder;
use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    constants::{STATE_DIR_MODE, STATE_FILE_MODE},
    error::Error,
    share::SharedSecret,
    utils::write_with_mode,
};

/// What unlock needs to find and verify shares.  The wrapping secret is never
/// part of this.
#[derive(
    Builder, Clone, CopyGetters, Deserialize, Eq, Getters, PartialEq, Serialize, Zeroize, ZeroizeOnDrop,
)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// Compressed verification point of the scheme instance
    #[getset(get = "pub")]
    #[serde(with = "b64")]
    #[builder(into)]
    verification_key: Vec<u8>,
    /// HMAC key every share is signed with
    #[getset(get = "pub")]
    #[serde(with = "b64")]
    #[builder(into)]
    signing_key: Vec<u8>,
    /// AES-GCM nonce the keyfile was sealed with
    #[getset(get = "pub")]
    #[serde(with = "b64")]
    #[builder(into)]
    nonce: Vec<u8>,
    /// Shares needed to reconstruct
    #[getset(get_copy = "pub")]
    threshold: u16,
}

impl fmt::Debug for PersistedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedState")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl PersistedState {
    /// The persisted subset of a freshly created secret
    #[must_use]
    pub fn from_secret(secret: &SharedSecret, threshold: u16) -> Self {
        Self::builder()
            .verification_key(secret.verification_key().as_slice())
            .signing_key(secret.signing_key().as_slice())
            .nonce(secret.nonce().as_slice())
            .threshold(threshold)
            .build()
    }

    /// Load state from a JSON file.
    ///
    /// # Errors
    ///
    /// * If the file cannot be read or parsed, an error is returned.
    ///
    pub fn read(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| Error::Config(format!("failed to read state file {}", path.display())))?;
        let state = serde_json::from_slice(&data)
            .with_context(|| Error::Config("failed to parse state file".into()))?;
        Ok(state)
    }

    /// Write state as pretty JSON (mode 0600), creating the parent
    /// directory (mode 0700) if needed.
    ///
    /// # Errors
    ///
    /// * If the directory cannot be created or the file written, an error is returned.
    ///
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            DirBuilder::new()
                .recursive(true)
                .mode(STATE_DIR_MODE)
                .create(parent)
                .with_context(|| format!("failed to create state directory {}", parent.display()))?;
        }
        let mut data = serde_json::to_vec_pretty(self).context("failed to serialize state")?;
        let written = write_with_mode(path, &data, STATE_FILE_MODE);
        data.zeroize();
        written.context("failed to write state file")
    }
}

/// Read the share path list: one path per line, trimmed, with blank lines
/// and `#` comments skipped.
///
/// # Errors
///
/// * If the file cannot be read, an error is returned.
///
pub fn read_share_paths(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path).with_context(|| {
        Error::Config(format!("failed to open config file {}", path.display()))
    })?;
    let paths: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    debug!(count = paths.len(), "Read share paths");
    Ok(paths)
}

mod b64 {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize as _, Deserializer, Serializer, de::Error as _};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use std::{fs, os::unix::fs::PermissionsExt};

    use anyhow::Result;
    use tempfile::TempDir;

    use super::{PersistedState, read_share_paths};
    use crate::{
        error::{Error, classify},
        share::create_secret,
    };

    #[test]
    fn state_round_trip_works() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("nested").join("state.json");
        let secret = create_secret(2, 3)?;
        let state = PersistedState::from_secret(&secret, 2);
        state.write(&path)?;

        assert_eq!(PersistedState::read(&path)?, state);
        assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o600);
        let parent = path.parent().map(fs::metadata).transpose()?;
        assert_eq!(parent.map(|m| m.permissions().mode() & 0o777), Some(0o700));
        Ok(())
    }

    #[test]
    fn state_json_is_camel_case_base64() -> Result<()> {
        let state = PersistedState::builder()
            .verification_key(vec![1u8, 2, 3])
            .signing_key(vec![0xffu8; 4])
            .nonce(Vec::<u8>::new())
            .threshold(3)
            .build();
        let json: serde_json::Value = serde_json::to_value(&state)?;
        assert_eq!(json["verificationKey"], "AQID");
        assert_eq!(json["signingKey"], "/////w==");
        assert_eq!(json["nonce"], "");
        assert_eq!(json["threshold"], 3);
        Ok(())
    }

    #[test]
    fn debug_hides_keys() {
        let state = PersistedState::builder()
            .verification_key(vec![7u8; 32])
            .signing_key(vec![9u8; 32])
            .nonce(vec![1u8; 12])
            .threshold(2)
            .build();
        let debug = format!("{state:?}");
        assert!(debug.contains("threshold: 2"));
        assert!(!debug.contains("signing_key"));
    }

    #[test]
    fn missing_or_corrupt_state_is_config_error() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("state.json");
        let err = PersistedState::read(&path).unwrap_err();
        assert!(matches!(classify(&err), Some(Error::Config(_))));

        fs::write(&path, b"{\"verificationKey\": \"not base64!\"}")?;
        let err = PersistedState::read(&path).unwrap_err();
        assert!(matches!(classify(&err), Some(Error::Config(_))));
        Ok(())
    }

    #[test]
    fn read_share_paths_works() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.txt");
        fs::write(
            &path,
            "# share locations\n\n  dns:share1.example.com  \nhttps://example.com/s2\n\t\n# https://old.example.com\n/mnt/usb/share3\n",
        )?;
        assert_eq!(
            read_share_paths(&path)?,
            vec![
                "dns:share1.example.com".to_string(),
                "https://example.com/s2".to_string(),
                "/mnt/usb/share3".to_string(),
            ]
        );
        Ok(())
    }
}
