use nalgebra::*;
use rand::prelude::*;
use serde::{Serialize, Deserialize};
use crate::distr::Density;
use crate::error::{Error, Result};
use super::ConjugateModel;

/// Bayesian Normal model with diagonal covariance: one Normal-Gamma
/// prior/posterior pair over the mean and the per-dimension precisions.
/// Sufficient statistics of an observation row x are laid out as the four
/// blocks [x^2, x, 1, 1], matching the Normal-Gamma natural parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalDiagonalCovariance {

    dim : usize,

    prior : Density,

    posterior : Density

}

impl NormalDiagonalCovariance {

    /// Creates the model from the expected mean, the expected diagonal
    /// precision and the prior pseudo-observation count. With random_init,
    /// only the posterior mean is perturbed by one standard deviation of
    /// per-dimension Gaussian noise; the prior is left untouched.
    pub fn create(
        mean : &DVector<f64>,
        precision : &DVector<f64>,
        prior_count : f64,
        random_init : bool
    ) -> Result<Self> {
        let prior = Density::normal_gamma(mean, precision, prior_count)?;
        let posterior = if random_init {
            let mut rng = rand::thread_rng();
            let noisy = DVector::from_fn(mean.nrows(), |i, _| {
                let z : f64 = rng.sample(rand_distr::StandardNormal);
                mean[i] + z / precision[i].sqrt()
            });
            Density::normal_gamma(&noisy, precision, prior_count)?
        } else {
            prior.clone()
        };
        Ok(Self { dim : mean.nrows(), prior, posterior })
    }

    /// Expected mean under the posterior.
    pub fn mean(&self) -> DVector<f64> {
        let eta = self.posterior.natural_params();
        let d = self.dim;
        DVector::from_fn(d, |i, _| eta[d + i] / eta[2 * d + i])
    }

    /// Expected diagonal precision under the posterior.
    pub fn precision(&self) -> DVector<f64> {
        let eta = self.posterior.natural_params();
        let d = self.dim;
        DVector::from_fn(d, |i, _| {
            let (np1, np2, np3, np4) = (eta[i], eta[d + i], eta[2 * d + i], eta[3 * d + i]);
            (np4 + 1.) / (np1 - np2.powi(2) / np3)
        })
    }

    /// Expected covariance under the posterior (diagonal matrix).
    pub fn cov(&self) -> DMatrix<f64> {
        DMatrix::from_diagonal(&self.precision().map(|p| 1. / p))
    }

    /// Posterior pseudo-observation count.
    pub fn count(&self) -> f64 {
        self.posterior.natural_params()[2 * self.dim]
    }

    fn check_width(&self, found : usize, context : &'static str) -> Result<()> {
        if found != self.dim {
            return Err(Error::ShapeMismatch { expected : self.dim, found, context });
        }
        Ok(())
    }

}

impl ConjugateModel for NormalDiagonalCovariance {

    fn obs_dim(&self) -> usize {
        self.dim
    }

    fn prior(&self) -> &Density {
        &self.prior
    }

    fn posterior(&self) -> &Density {
        &self.posterior
    }

    fn posterior_mut(&mut self) -> &mut Density {
        &mut self.posterior
    }

    fn sufficient_statistics(&self, y : DMatrixSlice<'_, f64>) -> Result<DMatrix<f64>> {
        self.check_width(y.ncols(), "diagonal Normal observations")?;
        let (n, d) = (y.nrows(), self.dim);
        let mut t = DMatrix::zeros(n, 4 * d);
        for i in 0..n {
            for j in 0..d {
                let x = y[(i, j)];
                t[(i, j)] = x * x;
                t[(i, d + j)] = x;
                t[(i, 2 * d + j)] = 1.;
                t[(i, 3 * d + j)] = 1.;
            }
        }
        Ok(t)
    }

    fn sufficient_statistics_from_mean_var(
        &self,
        mean : DMatrixSlice<'_, f64>,
        var : DMatrixSlice<'_, f64>
    ) -> Result<DMatrix<f64>> {
        self.check_width(mean.ncols(), "diagonal Normal mean statistics")?;
        if mean.shape() != var.shape() {
            return Err(Error::ShapeMismatch {
                expected : mean.ncols(),
                found : var.ncols(),
                context : "diagonal Normal variance statistics"
            });
        }
        let (n, d) = (mean.nrows(), self.dim);
        let mut t = DMatrix::zeros(n, 4 * d);
        for i in 0..n {
            for j in 0..d {
                t[(i, j)] = mean[(i, j)].powi(2) + var[(i, j)];
                t[(i, d + j)] = mean[(i, j)];
                t[(i, 2 * d + j)] = 1.;
                t[(i, 3 * d + j)] = 1.;
            }
        }
        Ok(t)
    }

    // Deterministic rule: displace the two posterior means by half a
    // standard deviation per dimension, keeping precision and count.
    fn split(&self) -> Result<(Self, Self)> {
        let mean = self.mean();
        let precision = self.precision();
        let count = self.count();
        let shift = precision.map(|p| 0.5 / p.sqrt());
        let left = Density::normal_gamma(&(&mean - &shift), &precision, count)?;
        let right = Density::normal_gamma(&(&mean + &shift), &precision, count)?;
        Ok((
            Self { dim : self.dim, prior : self.prior.clone(), posterior : left },
            Self { dim : self.dim, prior : self.prior.clone(), posterior : right }
        ))
    }

}

/// Bayesian Normal model with full covariance: a Normal-Wishart
/// prior/posterior pair over the mean and the precision matrix. Sufficient
/// statistics of a row x are [vec(x (x) x), x, 1, 1], matching the
/// Normal-Wishart natural parameter layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalFullCovariance {

    dim : usize,

    prior : Density,

    posterior : Density

}

impl NormalFullCovariance {

    pub fn create(
        mean : &DVector<f64>,
        scale : &DMatrix<f64>,
        prior_count : f64,
        random_init : bool
    ) -> Result<Self> {
        let prior = Density::normal_wishart(mean, scale, prior_count)?;
        let posterior = if random_init {
            let mut rng = rand::thread_rng();
            let noisy = DVector::from_fn(mean.nrows(), |i, _| {
                let z : f64 = rng.sample(rand_distr::StandardNormal);
                mean[i] + z * scale[(i, i)].sqrt()
            });
            Density::normal_wishart(&noisy, scale, prior_count)?
        } else {
            prior.clone()
        };
        Ok(Self { dim : mean.nrows(), prior, posterior })
    }

    pub fn mean(&self) -> DVector<f64> {
        let eta = self.posterior.natural_params();
        let d = self.dim;
        let count = eta[d * d + d];
        DVector::from_fn(d, |i, _| eta[d * d + i] / count)
    }

    /// Scale matrix of the posterior Wishart block.
    pub fn scatter(&self) -> DMatrix<f64> {
        let eta = self.posterior.natural_params();
        let d = self.dim;
        let count = eta[d * d + d];
        DMatrix::from_fn(d, d, |i, j| {
            eta[i * d + j] - eta[d * d + i] * eta[d * d + j] / count
        })
    }

    pub fn count(&self) -> f64 {
        let eta = self.posterior.natural_params();
        eta[eta.nrows() - 2]
    }

    fn check_width(&self, found : usize, context : &'static str) -> Result<()> {
        if found != self.dim {
            return Err(Error::ShapeMismatch { expected : self.dim, found, context });
        }
        Ok(())
    }

}

impl ConjugateModel for NormalFullCovariance {

    fn obs_dim(&self) -> usize {
        self.dim
    }

    fn prior(&self) -> &Density {
        &self.prior
    }

    fn posterior(&self) -> &Density {
        &self.posterior
    }

    fn posterior_mut(&mut self) -> &mut Density {
        &mut self.posterior
    }

    fn sufficient_statistics(&self, y : DMatrixSlice<'_, f64>) -> Result<DMatrix<f64>> {
        self.check_width(y.ncols(), "full-covariance Normal observations")?;
        let (n, d) = (y.nrows(), self.dim);
        let mut t = DMatrix::zeros(n, d * d + d + 2);
        for i in 0..n {
            for j in 0..d {
                for k in 0..d {
                    t[(i, j * d + k)] = y[(i, j)] * y[(i, k)];
                }
                t[(i, d * d + j)] = y[(i, j)];
            }
            t[(i, d * d + d)] = 1.;
            t[(i, d * d + d + 1)] = 1.;
        }
        Ok(t)
    }

    fn sufficient_statistics_from_mean_var(
        &self,
        mean : DMatrixSlice<'_, f64>,
        var : DMatrixSlice<'_, f64>
    ) -> Result<DMatrix<f64>> {
        self.check_width(mean.ncols(), "full-covariance Normal mean statistics")?;
        if mean.shape() != var.shape() {
            return Err(Error::ShapeMismatch {
                expected : mean.ncols(),
                found : var.ncols(),
                context : "full-covariance Normal variance statistics"
            });
        }
        let (n, d) = (mean.nrows(), self.dim);
        let mut t = DMatrix::zeros(n, d * d + d + 2);
        for i in 0..n {
            for j in 0..d {
                for k in 0..d {
                    // E[x_j x_k] under a diagonal variational posterior.
                    let mut m = mean[(i, j)] * mean[(i, k)];
                    if j == k {
                        m += var[(i, j)];
                    }
                    t[(i, j * d + k)] = m;
                }
                t[(i, d * d + j)] = mean[(i, j)];
            }
            t[(i, d * d + d)] = 1.;
            t[(i, d * d + d + 1)] = 1.;
        }
        Ok(t)
    }

    fn split(&self) -> Result<(Self, Self)> {
        let mean = self.mean();
        let scatter = self.scatter();
        let count = self.count();
        let shift = DVector::from_fn(self.dim, |i, _| 0.5 * scatter[(i, i)].sqrt());
        let left = Density::normal_wishart(&(&mean - &shift), &scatter, count)?;
        let right = Density::normal_wishart(&(&mean + &shift), &scatter, count)?;
        Ok((
            Self { dim : self.dim, prior : self.prior.clone(), posterior : left },
            Self { dim : self.dim, prior : self.prior.clone(), posterior : right }
        ))
    }

}
