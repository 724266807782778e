use nalgebra::*;
use mathru::special::gamma;
use std::f64::consts::LN_2;
use super::{Density, Family};
use crate::error::{Error, Result};

// The Normal-Wishart natural parameter vector is laid out as
// [np1_11 .. np1_DD, np2_1 .. np2_D, np3, np4] with np1 a D x D matrix
// stored row by row. The dimension is recovered from the vector length by
// solving D^2 + D - (len - 2) = 0. The log-normalizer is defined whenever
// np3 > 0 and np1 - np2 (x) np2 / np3 is positive-definite; the definiteness
// check is the Cholesky factorization used for the log-determinant itself.

/// Conjugate prior/posterior for a Normal likelihood with full precision
/// matrix: a Normal over the mean conditional on the precision, and a
/// Wishart over the precision.
impl Density {

    /// Builds a Normal-Wishart density from the expected mean, a symmetric
    /// positive-definite scale matrix and the prior pseudo-observation count.
    pub fn normal_wishart(
        mean : &DVector<f64>,
        scale : &DMatrix<f64>,
        prior_count : f64
    ) -> Result<Density> {
        let d = mean.nrows();
        if d == 0 || scale.nrows() != scale.ncols() || scale.nrows() != d {
            return Err(Error::ShapeMismatch {
                expected : d,
                found : scale.nrows().max(scale.ncols()),
                context : "Normal-Wishart mean/scale"
            });
        }
        if prior_count <= 0.0 {
            return Err(Error::NumericalInstability { context : "Normal-Wishart prior count" });
        }
        let np1 = scale + (mean * mean.transpose()).scale(prior_count);
        let mut eta = DVector::zeros(d * d + d + 2);
        for i in 0..d {
            for j in 0..d {
                eta[i * d + j] = np1[(i, j)];
            }
        }
        for i in 0..d {
            eta[d * d + i] = prior_count * mean[i];
        }
        eta[d * d + d] = prior_count;
        eta[d * d + d + 1] = prior_count - 1.;
        Density::new(Family::NormalWishart, eta)
    }

}

pub(crate) struct Blocks {
    pub np1 : DMatrix<f64>,
    pub np2 : DVector<f64>,
    pub np3 : f64,
    pub np4 : f64,
    pub dim : usize
}

pub(crate) fn split_nparams(eta : &DVector<f64>) -> Result<Blocks> {
    let len = eta.nrows();
    if len < 4 {
        return Err(Error::ShapeMismatch {
            expected : 4,
            found : len,
            context : "Normal-Wishart natural parameters"
        });
    }
    let d = (0.5 * (-1. + (1. + 4. * (len - 2) as f64).sqrt())) as usize;
    if d * d + d + 2 != len {
        return Err(Error::ShapeMismatch {
            expected : d * d + d + 2,
            found : len,
            context : "Normal-Wishart natural parameters"
        });
    }
    let np1 = DMatrix::from_fn(d, d, |i, j| eta[i * d + j]);
    let np2 = DVector::from_fn(d, |i, _| eta[d * d + i]);
    Ok(Blocks {
        np1,
        np2,
        np3 : eta[len - 2],
        np4 : eta[len - 1],
        dim : d
    })
}

// Log-determinant and inverse of np1 - np2 (x) np2 / np3 in one pass; a
// failed factorization means the parameters left the natural domain.
fn factorize(b : &Blocks, context : &'static str) -> Result<(f64, DMatrix<f64>)> {
    if b.np3 <= 0.0 {
        return Err(Error::NumericalInstability { context });
    }
    let m = &b.np1 - (&b.np2 * b.np2.transpose()).unscale(b.np3);
    // The factorization reads the lower triangle only; symmetrizing first
    // makes the log-determinant sensitive to both halves of np1, as the
    // gradient formula assumes.
    let m = (&m + m.transpose()).scale(0.5);
    let chol = Cholesky::new(m).ok_or(Error::NumericalInstability { context })?;
    let l = chol.l();
    let mut logdet = 0.0;
    for i in 0..b.dim {
        logdet += l[(i, i)].ln();
    }
    Ok((2. * logdet, chol.inverse()))
}

pub(crate) fn log_norm(eta : &DVector<f64>) -> Result<f64> {
    let b = split_nparams(eta)?;
    let (logdet, _) = factorize(&b, "Normal-Wishart log-normalizer")?;
    let d = b.dim as f64;
    if b.np4 + 1. <= 0.0 {
        return Err(Error::NumericalInstability { context : "Normal-Wishart log-normalizer" });
    }
    let mut lognorm = 0.5 * ((b.np4 + d) * d * LN_2 - d * b.np3.ln());
    lognorm += -0.5 * (b.np4 + d) * logdet;
    for i in 1..=b.dim {
        lognorm += gamma::Gamma::ln_gamma(0.5 * (b.np4 + d + 1. - i as f64));
    }
    Ok(lognorm)
}

pub(crate) fn grad_log_norm(eta : &DVector<f64>) -> Result<DVector<f64>> {
    let b = split_nparams(eta)?;
    let (logdet, inv) = factorize(&b, "Normal-Wishart log-normalizer gradient")?;
    let d = b.dim;
    let df = d as f64;
    if b.np4 + 1. <= 0.0 {
        return Err(Error::NumericalInstability { context : "Normal-Wishart log-normalizer gradient" });
    }

    let outer = (&b.np2 * b.np2.transpose()).unscale(b.np3);
    let grad1 = inv.scale(-0.5 * (b.np4 + df));
    let grad2 = (&inv * b.np2.unscale(b.np3)).scale(b.np4 + df);
    let grad3 = -df / (2. * b.np3)
        - 0.5 * (b.np4 + df) * (&inv * outer.unscale(b.np3)).trace();
    let mut grad4 = -0.5 * logdet + 0.5 * df * LN_2;
    for i in 1..=d {
        grad4 += 0.5 * gamma::digamma(0.5 * (b.np4 + df + 1. - i as f64));
    }

    let mut grad = DVector::zeros(d * d + d + 2);
    for i in 0..d {
        for j in 0..d {
            grad[i * d + j] = grad1[(i, j)];
        }
    }
    for i in 0..d {
        grad[d * d + i] = grad2[i];
    }
    grad[d * d + d] = grad3;
    grad[d * d + d + 1] = grad4;
    Ok(grad)
}
