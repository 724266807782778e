use nalgebra::*;
use serde::{Serialize, Deserialize};
use finitediff::FiniteDiff;
use crate::error::{Error, Result};

pub mod dirichlet;

pub mod normal_gamma;

pub mod normal_wishart;

/// Tag identifying which member of the exponential family a density belongs
/// to. Each variant carries its own log-normalizer and gradient rule, so
/// supporting a new family means adding a variant arm here and a module with
/// its formulas; the KL divergence and the mixture machinery stay untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    Dirichlet,
    NormalGamma,
    NormalWishart
}

impl Family {

    /// Value of the log-partition function at the informed natural parameter.
    pub fn log_norm(&self, eta : &DVector<f64>) -> Result<f64> {
        match self {
            Family::Dirichlet => dirichlet::log_norm(eta),
            Family::NormalGamma => normal_gamma::log_norm(eta),
            Family::NormalWishart => normal_wishart::log_norm(eta)
        }
    }

    /// Closed-form gradient of the log-partition function, which equals the
    /// expected value of the sufficient statistics under the density.
    pub fn grad_log_norm(&self, eta : &DVector<f64>) -> Result<DVector<f64>> {
        match self {
            Family::Dirichlet => dirichlet::grad_log_norm(eta),
            Family::NormalGamma => normal_gamma::grad_log_norm(eta),
            Family::NormalWishart => normal_wishart::grad_log_norm(eta)
        }
    }

}

/// Capability of evaluating the gradient of a family log-normalizer at a
/// natural parameter vector. The density abstraction is written against this
/// seam so that the analytic rules can be swapped for an independent
/// derivation (finite differences here; an autodiff engine in principle)
/// without touching any family-specific code.
pub trait GradientOracle {

    fn grad(&self, family : Family, eta : &DVector<f64>) -> Result<DVector<f64>>;

}

/// Default oracle: the closed-form gradient carried by each family.
#[derive(Debug, Clone, Copy)]
pub struct Analytic;

impl GradientOracle for Analytic {

    fn grad(&self, family : Family, eta : &DVector<f64>) -> Result<DVector<f64>> {
        family.grad_log_norm(eta)
    }

}

/// Central finite-difference oracle. Used to cross-validate the analytic
/// gradients; an evaluation that steps outside the natural-parameter domain
/// yields non-finite entries and is reported as an instability.
#[derive(Debug, Clone, Copy)]
pub struct NumericDiff;

impl GradientOracle for NumericDiff {

    fn grad(&self, family : Family, eta : &DVector<f64>) -> Result<DVector<f64>> {
        let x : Vec<f64> = eta.iter().copied().collect();
        let f = |v : &Vec<f64>| {
            let eta = DVector::from_column_slice(&v[..]);
            family.log_norm(&eta).unwrap_or(std::f64::NAN)
        };
        let g = x.central_diff(&f);
        if g.iter().any(|gi| !gi.is_finite()) {
            return Err(Error::NumericalInstability { context : "finite-difference gradient" });
        }
        Ok(DVector::from_vec(g))
    }

}

/// A member of the exponential family held in natural-parameter form. The
/// log-normalizer value and the expected sufficient statistics (its gradient)
/// are cached and always refer to the current parameter vector: the parameter
/// is only ever replaced wholesale, and both cached quantities are recomputed
/// before the new vector is committed. A failed recomputation leaves the
/// density in its previous, still-consistent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Density {

    family : Family,

    eta : DVector<f64>,

    log_norm : f64,

    suff_stats : DVector<f64>

}

impl Density {

    /// Builds a density of the given family directly from a natural
    /// parameter vector. Most callers should prefer the hyperparameter
    /// constructors (Density::dirichlet, Density::normal_gamma,
    /// Density::normal_wishart) defined in the family modules.
    pub fn new(family : Family, eta : DVector<f64>) -> Result<Self> {
        let log_norm = family.log_norm(&eta)?;
        let suff_stats = family.grad_log_norm(&eta)?;
        Ok(Self { family, eta, log_norm, suff_stats })
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn natural_params(&self) -> &DVector<f64> {
        &self.eta
    }

    /// Cached value of the log-partition function, O(1).
    pub fn log_norm(&self) -> f64 {
        self.log_norm
    }

    /// Cached expected sufficient statistics, O(1).
    pub fn expected_sufficient_statistics(&self) -> &DVector<f64> {
        &self.suff_stats
    }

    /// Replaces the whole natural parameter vector, refreshing the cached
    /// log-normalizer and expected sufficient statistics through the default
    /// analytic oracle. On error the previous state is kept.
    pub fn set_natural_params(&mut self, eta : DVector<f64>) -> Result<()> {
        self.set_natural_params_with(eta, &Analytic)
    }

    /// Same as set_natural_params, with an explicit gradient oracle.
    pub fn set_natural_params_with(
        &mut self,
        eta : DVector<f64>,
        oracle : &dyn GradientOracle
    ) -> Result<()> {
        if eta.nrows() != self.eta.nrows() {
            return Err(Error::ShapeMismatch {
                expected : self.eta.nrows(),
                found : eta.nrows(),
                context : "natural parameter update"
            });
        }
        let log_norm = self.family.log_norm(&eta)?;
        let suff_stats = oracle.grad(self.family, &eta)?;
        self.eta = eta;
        self.log_norm = log_norm;
        self.suff_stats = suff_stats;
        Ok(())
    }

}

/// Kullback-Leibler divergence KL(posterior || prior) between two densities
/// of the same family, computed as the Bregman divergence generated by the
/// convex log-normalizer:
///
/// F(eta_prior) - F(eta_post) - grad F(eta_post) . (eta_prior - eta_post)
///
/// No family-specific code is involved, so any pair of valid densities of
/// the same family (and dimension) can be compared.
pub fn kl_divergence(posterior : &Density, prior : &Density) -> Result<f64> {
    if posterior.family != prior.family {
        return Err(Error::FamilyMismatch);
    }
    if posterior.eta.nrows() != prior.eta.nrows() {
        return Err(Error::ShapeMismatch {
            expected : posterior.eta.nrows(),
            found : prior.eta.nrows(),
            context : "KL divergence"
        });
    }
    let diff = prior.natural_params() - posterior.natural_params();
    Ok(prior.log_norm() - posterior.log_norm()
        - posterior.expected_sufficient_statistics().dot(&diff))
}
