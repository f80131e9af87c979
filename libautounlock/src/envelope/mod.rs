// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Length obscuring AES-256-GCM envelope for the keyfile.

use std::path::Path;

use anyhow::{Context, Result};
use aws_lc_rs::{
    aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey},
    rand,
};
use bincode::{Decode, Encode, config::standard, decode_from_slice, encode_to_vec};
use bon::Builder;
use getset::Getters;
use rand_range::padding_length;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{
    constants::{ENCRYPTION_FILE_MODE, ENCRYPTION_KEY_BYTES, NONCE_BYTES},
    error::Error,
    utils::write_with_mode,
};

/// The plaintext and a random length run of padding, sealed as one unit
#[derive(Builder, Decode, Encode, Getters, Zeroize, ZeroizeOnDrop)]
#[getset(get = "pub")]
pub struct Envelope {
    /// The real keyfile contents
    #[builder(into)]
    plaintext: Vec<u8>,
    /// Random bytes, discarded on open
    #[builder(into)]
    padding: Vec<u8>,
}

/// Seal `plaintext` with fresh random padding under `(key, nonce)`.
///
/// Keys longer than 32 bytes and nonces longer than 12 bytes are truncated.
///
/// # Errors
///
/// * If the key or nonce is too short, an error is returned.
/// * If padding generation, serialization, or sealing fails, an error is returned.
///
pub fn seal_envelope(plaintext: &[u8], key: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    let sealing_key = aead_key(key)?;
    let nonce = aead_nonce(nonce)?;

    let mut padding = vec![0u8; padding_length()];
    rand::fill(&mut padding).with_context(|| Error::Crypto("failed to generate padding".into()))?;
    let envelope = Envelope::builder()
        .plaintext(plaintext)
        .padding(padding)
        .build();

    let mut in_out = encode_to_vec(&envelope, standard())
        .with_context(|| Error::Crypto("failed to serialize encryption data".into()))?;
    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| Error::Crypto("failed to seal envelope".into()))?;
    Ok(in_out)
}

/// Authenticate and open a sealed envelope, returning only the plaintext.
///
/// # Errors
///
/// * If the key or nonce is too short, an error is returned.
/// * If authentication fails, an error is returned and nothing is decoded.
/// * If the envelope cannot be deserialized, an error is returned.
///
pub fn open_envelope(ciphertext: &[u8], key: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    let opening_key = aead_key(key)?;
    let nonce = aead_nonce(nonce)?;

    let mut in_out = ciphertext.to_vec();
    let opened = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| Error::Crypto("failed to decrypt: authentication failed".into()))?;
    let decoded: Result<(Envelope, usize)> = decode_from_slice(opened, standard()).map_err(|_| {
        Error::Crypto("failed to deserialize encryption data (file may be in old format)".into())
            .into()
    });
    in_out.zeroize();
    let (envelope, _size) = decoded?;
    Ok(envelope.plaintext.clone())
}

/// Encrypt `input` into `output` (mode 0600).
///
/// # Errors
///
/// * If the input cannot be read or the output written, an error is returned.
/// * See [`seal_envelope`].
///
pub fn encrypt_file(input: &Path, output: &Path, key: &[u8], nonce: &[u8]) -> Result<()> {
    let mut plaintext = std::fs::read(input)
        .with_context(|| format!("failed to read input file {}", input.display()))?;
    let sealed = seal_envelope(&plaintext, key, nonce);
    plaintext.zeroize();
    let ciphertext = sealed?;
    trace!(bytes = ciphertext.len(), "Sealed envelope");
    write_with_mode(output, &ciphertext, ENCRYPTION_FILE_MODE)
        .context("failed to write output file")
}

/// Decrypt `input` into `output` (mode 0600).  Nothing is written unless the
/// ciphertext authenticates.
///
/// # Errors
///
/// * If the input cannot be read or the output written, an error is returned.
/// * See [`open_envelope`].
///
pub fn decrypt_file(input: &Path, output: &Path, key: &[u8], nonce: &[u8]) -> Result<()> {
    let ciphertext = std::fs::read(input)
        .with_context(|| format!("failed to read input file {}", input.display()))?;
    let mut plaintext = open_envelope(&ciphertext, key, nonce)?;
    let written = write_with_mode(output, &plaintext, ENCRYPTION_FILE_MODE)
        .context("failed to write output file");
    plaintext.zeroize();
    written
}

fn aead_key(key: &[u8]) -> Result<LessSafeKey> {
    let key = require_len(key, ENCRYPTION_KEY_BYTES, "key")?;
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| Error::Crypto("failed to create cipher".into()))?;
    Ok(LessSafeKey::new(unbound))
}

fn aead_nonce(nonce: &[u8]) -> Result<Nonce> {
    let nonce = require_len(nonce, NONCE_BYTES, "nonce")?;
    let mut bytes = [0u8; NONCE_BYTES];
    bytes.copy_from_slice(nonce);
    Ok(Nonce::assume_unique_for_key(bytes))
}

fn require_len<'a>(bytes: &'a [u8], length: usize, what: &str) -> Result<&'a [u8]> {
    if bytes.len() < length {
        return Err(Error::Crypto(format!(
            "{what} too short, must be at least {length} bytes, length: {}",
            bytes.len()
        ))
        .into());
    }
    Ok(&bytes[..length])
}

mod rand_range {
    use rand::{Rng as _, rng};

    use crate::constants::{MAX_PADDING_LENGTH, MIN_PADDING_LENGTH};

    pub(super) fn padding_length() -> usize {
        rng().random_range(MIN_PADDING_LENGTH..MAX_PADDING_LENGTH)
    }
}

#[cfg(test)]
mod test {
    use std::{collections::BTreeSet, fs, os::unix::fs::PermissionsExt};

    use anyhow::Result;
    use tempfile::TempDir;

    use super::{decrypt_file, encrypt_file, open_envelope, seal_envelope};
    use crate::{
        constants::MIN_PADDING_LENGTH,
        error::{Error, classify},
        primitives::random_bytes,
    };

    const TAG_BYTES: usize = 16;

    #[test]
    fn round_trip_works() -> Result<()> {
        let key = random_bytes::<32>()?;
        let nonce = random_bytes::<12>()?;
        for plaintext in [&b""[..], b"k", &[0xffu8; 4096][..]] {
            let sealed = seal_envelope(plaintext, &key, &nonce)?;
            assert_eq!(open_envelope(&sealed, &key, &nonce)?, plaintext);
        }
        Ok(())
    }

    #[test]
    fn ciphertext_length_varies_and_is_padded() -> Result<()> {
        let key = random_bytes::<32>()?;
        let nonce = random_bytes::<12>()?;
        let plaintext = b"a keyfile of modest size";
        let lengths: BTreeSet<usize> = (0..8)
            .map(|_| seal_envelope(plaintext, &key, &nonce).map(|c| c.len()))
            .collect::<Result<_>>()?;
        assert!(lengths.len() > 1);
        for len in lengths {
            assert!(len >= plaintext.len() + MIN_PADDING_LENGTH + TAG_BYTES);
        }
        Ok(())
    }

    #[test]
    fn wrong_key_nonce_or_byte_fails() -> Result<()> {
        let key = random_bytes::<32>()?;
        let nonce = random_bytes::<12>()?;
        let sealed = seal_envelope(b"secret keyfile", &key, &nonce)?;

        let err = open_envelope(&sealed, &random_bytes::<32>()?, &nonce).unwrap_err();
        assert!(matches!(classify(&err), Some(Error::Crypto(_))));
        assert!(open_envelope(&sealed, &key, &random_bytes::<12>()?).is_err());

        let mut flipped = sealed.clone();
        flipped[3] ^= 0x01;
        assert!(open_envelope(&flipped, &key, &nonce).is_err());
        Ok(())
    }

    #[test]
    fn short_key_or_nonce_is_an_error() {
        let err = seal_envelope(b"x", &[0u8; 31], &[0u8; 12]).unwrap_err();
        assert!(err.to_string().contains("key too short"));
        let err = seal_envelope(b"x", &[0u8; 32], &[0u8; 11]).unwrap_err();
        assert!(err.to_string().contains("nonce too short"));
    }

    #[test]
    fn long_key_and_nonce_are_truncated() -> Result<()> {
        let key = random_bytes::<48>()?;
        let nonce = random_bytes::<24>()?;
        let sealed = seal_envelope(b"data", &key, &nonce)?;
        assert_eq!(open_envelope(&sealed, &key[..32], &nonce[..12])?, b"data");
        Ok(())
    }

    #[test]
    fn file_round_trip_works() -> Result<()> {
        let dir = TempDir::new()?;
        let keyfile = dir.path().join("keyfile");
        let encrypted = dir.path().join("unlock.enc");
        let restored = dir.path().join("restored");
        fs::write(&keyfile, b"luks passphrase bytes\n")?;

        let key = random_bytes::<32>()?;
        let nonce = random_bytes::<12>()?;
        encrypt_file(&keyfile, &encrypted, &key, &nonce)?;
        assert_eq!(fs::metadata(&encrypted)?.permissions().mode() & 0o777, 0o600);

        decrypt_file(&encrypted, &restored, &key, &nonce)?;
        assert_eq!(fs::read(&restored)?, b"luks passphrase bytes\n");
        assert_eq!(fs::metadata(&restored)?.permissions().mode() & 0o777, 0o600);
        Ok(())
    }

    #[test]
    fn failed_decrypt_writes_nothing() -> Result<()> {
        let dir = TempDir::new()?;
        let keyfile = dir.path().join("keyfile");
        let encrypted = dir.path().join("unlock.enc");
        let restored = dir.path().join("restored");
        fs::write(&keyfile, b"secret")?;
        let nonce = random_bytes::<12>()?;
        encrypt_file(&keyfile, &encrypted, &random_bytes::<32>()?, &nonce)?;

        assert!(decrypt_file(&encrypted, &restored, &random_bytes::<32>()?, &nonce).is_err());
        assert!(!restored.exists());
        Ok(())
    }
}
