// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use anyhow::{Context, Result};
use aws_lc_rs::{hmac, rand};

use crate::{constants::SIGNATURE_BYTES, error::Error};

/// Fill a fixed size array from the system CSPRNG.
///
/// # Errors
///
/// * If the random number generator fails, an error is returned.
///
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    rand::fill(&mut bytes).with_context(|| Error::Crypto("random generation failed".into()))?;
    Ok(bytes)
}

/// Append an HMAC-SHA256 tag over `message` keyed by `key`.
#[must_use]
pub fn sign_share(key: &[u8], message: &[u8]) -> Vec<u8> {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, message);
    let mut signed = Vec::with_capacity(message.len() + SIGNATURE_BYTES);
    signed.extend_from_slice(message);
    signed.extend_from_slice(tag.as_ref());
    signed
}

/// Check the trailing tag of `signed` and return the message in front of it.
///
/// The comparison is constant time.
///
/// # Errors
///
/// * If `signed` is shorter than the tag, an error is returned.
/// * If the tag does not verify under `key`, an error is returned.
///
pub fn verify_share<'a>(signed: &'a [u8], key: &[u8]) -> Result<&'a [u8]> {
    if signed.len() < SIGNATURE_BYTES {
        return Err(Error::Verification("signed message too short".into()).into());
    }
    let (message, tag) = signed.split_at(signed.len() - SIGNATURE_BYTES);
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, message, tag)
        .map_err(|_| Error::Verification("invalid signature".into()))?;
    Ok(message)
}
