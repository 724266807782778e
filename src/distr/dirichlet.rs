use nalgebra::*;
use mathru::special::gamma;
use super::{Density, Family};
use crate::error::{Error, Result};

/// The Dirichlet is the conjugate prior over the weights of a categorical
/// draw; its natural parameters are the prior counts minus one, so a vector
/// of unit counts maps to the zero vector.
impl Density {

    pub fn dirichlet(prior_counts : &DVector<f64>) -> Result<Density> {
        if prior_counts.nrows() == 0 {
            return Err(Error::ShapeMismatch {
                expected : 1,
                found : 0,
                context : "Dirichlet prior counts"
            });
        }
        if prior_counts.iter().any(|c| *c <= 0.0 || !c.is_finite()) {
            return Err(Error::NumericalInstability { context : "Dirichlet prior counts" });
        }
        let eta = prior_counts.map(|c| c - 1.0);
        Density::new(Family::Dirichlet, eta)
    }

}

pub(crate) fn log_norm(eta : &DVector<f64>) -> Result<f64> {
    let alphas = eta.map(|e| e + 1.0);
    if alphas.iter().any(|a| *a <= 0.0 || !a.is_finite()) {
        return Err(Error::NumericalInstability { context : "Dirichlet log-normalizer" });
    }
    let total : f64 = alphas.sum();
    Ok(-gamma::Gamma::ln_gamma(total) + alphas.iter().map(|a| gamma::Gamma::ln_gamma(*a)).sum::<f64>())
}

pub(crate) fn grad_log_norm(eta : &DVector<f64>) -> Result<DVector<f64>> {
    let alphas = eta.map(|e| e + 1.0);
    if alphas.iter().any(|a| *a <= 0.0 || !a.is_finite()) {
        return Err(Error::NumericalInstability { context : "Dirichlet log-normalizer gradient" });
    }
    let psi_total = gamma::digamma(alphas.sum());
    Ok(alphas.map(|a| gamma::digamma(a) - psi_total))
}
