use nalgebra::*;
use mathru::special::gamma;
use super::{Density, Family};
use crate::error::{Error, Result};

// The Normal-Gamma natural parameter vector holds four blocks of dimension D:
// np1 = c m^2 + 2 b, np2 = c m, np3 = c, np4 = 2 a - 1, where (a, b) are the
// per-dimension Gamma shape/rate and c the pseudo-observation count. The
// log-normalizer requires np3 > 0 and np1 - np2^2 / np3 > 0 on every
// dimension; violations are reported rather than clamped.

/// Conjugate prior/posterior for a Normal likelihood with diagonal precision:
/// a Normal over the mean conditional on each dimension's precision, and
/// independent Gammas over the precisions.
impl Density {

    /// Builds a Normal-Gamma density from an interpretable parameterization:
    /// the expected mean, the expected (diagonal) precision and the strength
    /// of the prior expressed as a pseudo-observation count.
    pub fn normal_gamma(
        mean : &DVector<f64>,
        precision : &DVector<f64>,
        prior_count : f64
    ) -> Result<Density> {
        if mean.nrows() == 0 || mean.nrows() != precision.nrows() {
            return Err(Error::ShapeMismatch {
                expected : mean.nrows(),
                found : precision.nrows(),
                context : "Normal-Gamma mean/precision"
            });
        }
        if prior_count <= 0.0 || precision.iter().any(|p| *p <= 0.0 ) {
            return Err(Error::NumericalInstability { context : "Normal-Gamma hyperparameters" });
        }
        let d = mean.nrows();
        let mut eta = DVector::zeros(4 * d);
        for i in 0..d {
            // Gamma shape a = c p; rate b = c.
            eta[i] = prior_count * mean[i].powi(2) + 2. * prior_count;
            eta[d + i] = prior_count * mean[i];
            eta[2 * d + i] = prior_count;
            eta[3 * d + i] = 2. * prior_count * precision[i] - 1.;
        }
        Density::new(Family::NormalGamma, eta)
    }

}

fn split_blocks(eta : &DVector<f64>) -> Result<usize> {
    let len = eta.nrows();
    if len == 0 || len % 4 != 0 {
        return Err(Error::ShapeMismatch {
            expected : 4 * (len / 4).max(1),
            found : len,
            context : "Normal-Gamma natural parameters"
        });
    }
    Ok(len / 4)
}

pub(crate) fn log_norm(eta : &DVector<f64>) -> Result<f64> {
    let d = split_blocks(eta)?;
    let mut lognorm = 0.0;
    for i in 0..d {
        let (np1, np2, np3, np4) = (eta[i], eta[d + i], eta[2 * d + i], eta[3 * d + i]);
        if np3 <= 0.0 || np4 + 1. <= 0.0 {
            return Err(Error::NumericalInstability { context : "Normal-Gamma log-normalizer" });
        }
        let rate = 0.5 * (np1 - np2.powi(2) / np3);
        if rate <= 0.0 {
            return Err(Error::NumericalInstability { context : "Normal-Gamma log-normalizer" });
        }
        lognorm += gamma::Gamma::ln_gamma(0.5 * (np4 + 1.)) - 0.5 * np3.ln()
            - 0.5 * (np4 + 1.) * rate.ln();
    }
    Ok(lognorm)
}

pub(crate) fn grad_log_norm(eta : &DVector<f64>) -> Result<DVector<f64>> {
    let d = split_blocks(eta)?;
    let mut grad = DVector::zeros(4 * d);
    for i in 0..d {
        let (np1, np2, np3, np4) = (eta[i], eta[d + i], eta[2 * d + i], eta[3 * d + i]);
        let diff = np1 - np2.powi(2) / np3;
        if np3 <= 0.0 || np4 + 1. <= 0.0 || diff <= 0.0 {
            return Err(Error::NumericalInstability { context : "Normal-Gamma log-normalizer gradient" });
        }
        grad[i] = -(np4 + 1.) / (2. * diff);
        grad[d + i] = (np2 * (np4 + 1.)) / (np3 * np1 - np2.powi(2));
        grad[2 * d + i] = -1. / (2. * np3)
            - (np2.powi(2) * (np4 + 1.)) / (2. * np3 * (np3 * np1 - np2.powi(2)));
        grad[3 * d + i] = 0.5 * gamma::digamma(0.5 * (np4 + 1.)) - 0.5 * (0.5 * diff).ln();
    }
    Ok(grad)
}
