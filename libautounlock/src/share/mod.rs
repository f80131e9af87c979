// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

//! Threshold secret sharing over the ristretto255 prime order group.
//!
//! The wrapping secret is a random scalar `s`.  A polynomial of degree
//! `threshold - 1` with `s` as its constant term is evaluated at the share
//! identifiers `1..=total`.  The verification key `s·G` identifies the scheme
//! instance and lets reconstruction confirm it produced the right secret.

use std::{collections::BTreeMap, fmt};

use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use curve25519_dalek::{
    ristretto::{CompressedRistretto, RistrettoPoint},
    scalar::Scalar,
};
use getset::{CopyGetters, Getters};
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    constants::{MAX_SHARES, NONCE_BYTES, SIGNATURE_BYTES},
    error::Error,
    primitives::{random_bytes, sign_share, verify_share},
};

use self::lagrange::{Polynomial, interpolate_at_zero};

mod lagrange;

const GROUP_RISTRETTO255: u8 = 0x01;
const SCALAR_BYTES: usize = 32;
const POINT_BYTES: usize = 32;

/// Length of an encoded (unsigned) share
pub const SHARE_PAYLOAD_BYTES: usize = 1 + 2 + SCALAR_BYTES + POINT_BYTES;

/// Everything produced by a single setup.
///
/// Only the verification key, signing key and nonce are ever persisted.  The
/// secret and the signed shares are wiped when this value is dropped.
#[derive(Getters, Zeroize, ZeroizeOnDrop)]
#[getset(get = "pub")]
pub struct SharedSecret {
    /// The wrapping key
    secret: [u8; SCALAR_BYTES],
    /// Compressed `secret·G`
    verification_key: [u8; POINT_BYTES],
    /// HMAC key used to sign every share
    signing_key: [u8; SIGNATURE_BYTES],
    /// AES-GCM nonce used with the wrapping key
    nonce: [u8; NONCE_BYTES],
    /// Signed share blobs, `payload ‖ tag`
    shares: Vec<Vec<u8>>,
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("shares", &self.shares.len())
            .finish_non_exhaustive()
    }
}

/// A decoded, verified share.
#[derive(Clone, CopyGetters, Eq, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct KeyShare {
    /// The evaluation point, also used to spot duplicate shares
    #[getset(get_copy = "pub")]
    identifier: u16,
    value: Scalar,
    /// The verification key of the scheme instance this share belongs to
    #[getset(get_copy = "pub")]
    verification_key: [u8; POINT_BYTES],
}

impl fmt::Debug for KeyShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyShare")
            .field("identifier", &self.identifier)
            .finish_non_exhaustive()
    }
}

impl KeyShare {
    /// Encode as `group ‖ identifier (be) ‖ value ‖ verification key`
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SHARE_PAYLOAD_BYTES);
        out.push(GROUP_RISTRETTO255);
        out.extend_from_slice(&self.identifier.to_be_bytes());
        out.extend_from_slice(self.value.as_bytes());
        out.extend_from_slice(&self.verification_key);
        out
    }

    /// Decode a share payload produced by [`KeyShare::encode`].
    ///
    /// # Errors
    ///
    /// * If the payload has the wrong length or group, an error is returned.
    /// * If the identifier is zero, an error is returned.
    /// * If the value is not a canonical scalar or the verification key is not a valid point,
    ///   an error is returned.
    ///
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SHARE_PAYLOAD_BYTES {
            return Err(Error::Verification(format!(
                "malformed share payload: {} bytes, expected {SHARE_PAYLOAD_BYTES}",
                bytes.len()
            ))
            .into());
        }
        let (group, rest) = bytes.split_at(1);
        if group[0] != GROUP_RISTRETTO255 {
            return Err(Error::Verification(format!("unknown share group {:#04x}", group[0])).into());
        }
        let (id_bytes, rest) = rest.split_at(2);
        let identifier = u16::from_be_bytes([id_bytes[0], id_bytes[1]]);
        if identifier == 0 {
            return Err(Error::Verification("share identifier must be non-zero".into()).into());
        }
        let (value_bytes, vk_bytes) = rest.split_at(SCALAR_BYTES);
        let mut canonical = [0u8; SCALAR_BYTES];
        canonical.copy_from_slice(value_bytes);
        let value = Option::<Scalar>::from(Scalar::from_canonical_bytes(canonical))
            .ok_or_else(|| Error::Verification("share value is not a canonical scalar".into()))?;
        canonical.zeroize();
        let verification_key = decompress(vk_bytes)
            .map_err(|_| Error::Verification("share verification key is not a valid point".into()))?
            .compress()
            .to_bytes();
        Ok(Self {
            identifier,
            value,
            verification_key,
        })
    }
}

/// Generate a random wrapping secret and split it into `total` signed shares,
/// any `threshold` of which reconstruct it.
///
/// # Errors
///
/// * If `threshold` or `total` is outside `1..=100`, or `threshold > total`, an error is returned.
/// * If the random number generator fails, an error is returned.
///
pub fn create_secret(threshold: u16, total: u16) -> Result<SharedSecret> {
    if threshold == 0 || total == 0 || threshold > total || total > MAX_SHARES {
        return Err(Error::InvalidShareParameters {
            threshold,
            shares: total,
            max: MAX_SHARES,
        }
        .into());
    }
    trace!("Generating {total} shares with threshold {threshold}");

    let secret = random_scalar()?;
    let polynomial = Polynomial::from_secret(secret, usize::from(threshold))?;
    let verification_key = RistrettoPoint::mul_base(&secret).compress().to_bytes();
    let signing_key = random_bytes::<SIGNATURE_BYTES>()?;
    let nonce = random_bytes::<NONCE_BYTES>()?;

    let shares = (1..=total)
        .map(|identifier| {
            let share = KeyShare {
                identifier,
                value: polynomial.evaluate(Scalar::from(identifier)),
                verification_key,
            };
            let mut payload = share.encode();
            let signed = sign_share(&signing_key, &payload);
            payload.zeroize();
            signed
        })
        .collect();

    Ok(SharedSecret {
        secret: secret.to_bytes(),
        verification_key,
        signing_key,
        nonce,
        shares,
    })
}

/// Reconstruct the wrapping secret from decoded shares.
///
/// Shares are deduplicated by identifier.  Reconstruction refuses to run on
/// fewer than `threshold` distinct shares, and the result is checked against
/// `verification_key`, so a wrong secret is never returned.
///
/// # Errors
///
/// * If the verification key is not a valid point, an error is returned.
/// * If a share belongs to a different scheme instance, or two shares with the same identifier
///   disagree, an error is returned.
/// * If there are fewer than `threshold` distinct shares, an error is returned.
/// * If the interpolated secret does not match the verification key, an error is returned.
///
pub fn combine_secret(
    shares: &[KeyShare],
    threshold: u16,
    verification_key: &[u8],
) -> Result<Zeroizing<[u8; SCALAR_BYTES]>> {
    let expected = decompress(verification_key)?;

    let mut distinct = BTreeMap::new();
    for share in shares {
        if share.verification_key.as_slice() != verification_key {
            return Err(Error::Reconstruction(format!(
                "share {} belongs to a different secret",
                share.identifier
            ))
            .into());
        }
        match distinct.get(&share.identifier) {
            Some(value) if *value != share.value => {
                return Err(Error::Reconstruction(format!(
                    "conflicting values for share {}",
                    share.identifier
                ))
                .into());
            }
            Some(_) => {}
            None => {
                let _old = distinct.insert(share.identifier, share.value);
            }
        }
    }

    if distinct.len() < usize::from(threshold) {
        return Err(Error::Reconstruction(format!(
            "have {} distinct shares, need {threshold}",
            distinct.len()
        ))
        .into());
    }

    let points: Vec<(Scalar, Scalar)> = distinct
        .into_iter()
        .map(|(id, value)| (Scalar::from(id), value))
        .collect();
    let mut secret = interpolate_at_zero(&points)?;

    if RistrettoPoint::mul_base(&secret) != expected {
        secret.zeroize();
        return Err(Error::Reconstruction(
            "reconstructed secret does not match the verification key".into(),
        )
        .into());
    }

    let bytes = Zeroizing::new(secret.to_bytes());
    secret.zeroize();
    Ok(bytes)
}

/// Decode a base64 signed share, verify its tag, and decode the payload.
///
/// # Errors
///
/// * If `encoded` is not valid base64, an error is returned.
/// * If the tag does not verify under `signing_key`, an error is returned.
/// * If the payload is malformed, an error is returned.
///
pub fn get_share(encoded: &str, signing_key: &[u8]) -> Result<KeyShare> {
    let signed = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::Verification(format!("failed to decode base64 share: {e}")))?;
    let payload = verify_share(&signed, signing_key)?;
    KeyShare::decode(payload)
}

/// Base64 encode a signed share blob for display.
#[must_use]
pub fn encode_share(signed: &[u8]) -> String {
    STANDARD.encode(signed)
}

fn random_scalar() -> Result<Scalar> {
    let mut wide = random_bytes::<64>()?;
    let scalar = Scalar::from_bytes_mod_order_wide(&wide);
    wide.zeroize();
    Ok(scalar)
}

fn decompress(bytes: &[u8]) -> Result<RistrettoPoint> {
    let point = CompressedRistretto::from_slice(bytes)
        .ok()
        .and_then(|compressed| compressed.decompress())
        .ok_or_else(|| Error::Config("verification key is not a valid ristretto255 point".into()))?;
    Ok(point)
}
