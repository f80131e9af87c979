// Copyright (c) 2025 autounlock developers
//
// Licensed under the Apache License, Version 2.0
// <LICENSE-APACHE or https://www.apache.org/licenses/LICENSE-2.0> or the MIT
// license <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. All files in the project carrying such notice may not be copied,
// modified, or distributed except according to those terms.

use anyhow::Result;
use curve25519_dalek::scalar::Scalar;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{error::Error, primitives::random_bytes};

/// `f(x) = a_0 + a_1·x + … + a_{t-1}·x^{t-1}` with `a_0` the secret
#[derive(Zeroize, ZeroizeOnDrop)]
pub(super) struct Polynomial {
    coefficients: Vec<Scalar>,
}

impl Polynomial {
    pub(super) fn from_secret(secret: Scalar, threshold: usize) -> Result<Self> {
        let mut coefficients = Vec::with_capacity(threshold);
        coefficients.push(secret);
        for _ in 1..threshold {
            let mut wide = random_bytes::<64>()?;
            coefficients.push(Scalar::from_bytes_mod_order_wide(&wide));
            wide.zeroize();
        }
        Ok(Self { coefficients })
    }

    /// Horner's method
    pub(super) fn evaluate(&self, x: Scalar) -> Scalar {
        self.coefficients
            .iter()
            .rev()
            .fold(Scalar::ZERO, |acc, coeff| acc * x + coeff)
    }
}

/// Interpolate `f(0)` from distinct `(x, y)` points.
pub(super) fn interpolate_at_zero(points: &[(Scalar, Scalar)]) -> Result<Scalar> {
    if points.is_empty() {
        return Err(Error::Reconstruction("cannot interpolate with zero shares".into()).into());
    }

    let mut result = Scalar::ZERO;
    for (i, (x_i, y_i)) in points.iter().enumerate() {
        let mut basis = Scalar::ONE;
        for (j, (x_j, _)) in points.iter().enumerate() {
            if i != j {
                let denominator = x_i - x_j;
                if denominator == Scalar::ZERO {
                    return Err(Error::Reconstruction("duplicate share identifier".into()).into());
                }
                basis *= -x_j * denominator.invert();
            }
        }
        result += y_i * basis;
    }
    Ok(result)
}
