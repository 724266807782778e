use nalgebra::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::error::Error as StdError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::f64::consts::PI;
use crate::distr::{Density, kl_divergence};
use crate::error::{Error, Result};

pub mod normal;

pub use normal::*;

pub mod mixture;

pub use mixture::*;

/// Contract between a conjugate Bayesian model and the mixture engine. A
/// model owns a prior and a posterior density of the same family, knows how
/// to collapse observation rows into the sufficient statistics the family
/// expects, and applies the stochastic natural-gradient rule to its own
/// posterior. The split operation is deliberately part of this seam: how a
/// component is perturbed into two sub-components is a per-family strategy,
/// not something the mixture can decide.
pub trait ConjugateModel
    where Self : Sized
{

    /// Dimensionality of a single observation row.
    fn obs_dim(&self) -> usize;

    fn prior(&self) -> &Density;

    fn posterior(&self) -> &Density;

    fn posterior_mut(&mut self) -> &mut Density;

    /// Maps observation rows into sufficient-statistic rows.
    fn sufficient_statistics(&self, y : DMatrixSlice<'_, f64>) -> Result<DMatrix<f64>>;

    /// Approximate sufficient statistics derived from the per-observation
    /// mean and variance of a variational posterior over the observed space,
    /// substituted for the exact ones by amortized-inference callers.
    fn sufficient_statistics_from_mean_var(
        &self,
        mean : DMatrixSlice<'_, f64>,
        var : DMatrixSlice<'_, f64>
    ) -> Result<DMatrix<f64>>;

    /// Splits the model into two sub-components covering the region of the
    /// parent, typically by displacing the posterior location in opposite
    /// directions while keeping its spread.
    fn split(&self) -> Result<(Self, Self)>;

    /// Row of expected natural parameters contributed by this component when
    /// building per-observation parameters for an external generative model.
    fn expected_natural_params_row(&self) -> DVector<f64> {
        self.posterior().expected_sufficient_statistics().clone()
    }

    /// Stochastic natural-gradient step on the posterior:
    /// eta += lrate * (eta_prior + scale * acc_stats - eta). With conjugate
    /// priors this is a convex combination of valid natural parameters, so
    /// the posterior remains a member of the family after every step.
    fn natural_grad_update(
        &mut self,
        acc_stats : DVectorSlice<'_, f64>,
        scale : f64,
        lrate : f64
    ) -> Result<()> {
        let dim = self.posterior().natural_params().nrows();
        if acc_stats.nrows() != dim {
            return Err(Error::ShapeMismatch {
                expected : dim,
                found : acc_stats.nrows(),
                context : "natural-gradient statistics"
            });
        }
        let natural_grad = self.prior().natural_params()
            + acc_stats.clone_owned().scale(scale)
            - self.posterior().natural_params();
        let new_eta = self.posterior().natural_params() + natural_grad.scale(lrate);
        self.posterior_mut().set_natural_params(new_eta)
    }

    /// Per-observation expected log-likelihood under the posterior, i.e. the
    /// inner product of the sufficient statistics with the expected natural
    /// parameters plus the Gaussian log base measure.
    fn exp_llh(&self, y : DMatrixSlice<'_, f64>) -> Result<DVector<f64>> {
        let t = self.sufficient_statistics(y)?;
        let base = -0.5 * y.ncols() as f64 * (2. * PI).ln();
        Ok((&t * self.posterior().expected_sufficient_statistics()).add_scalar(base))
    }

    /// Same as exp_llh, also returning the statistics summed over the batch.
    fn exp_llh_with_stats(&self, y : DMatrixSlice<'_, f64>) -> Result<(DVector<f64>, DVector<f64>)> {
        let t = self.sufficient_statistics(y)?;
        let base = -0.5 * y.ncols() as f64 * (2. * PI).ln();
        let llh = (&t * self.posterior().expected_sufficient_statistics()).add_scalar(base);
        Ok((llh, t.row_sum().transpose()))
    }

    fn kl_div_posterior_prior(&self) -> Result<f64> {
        kl_divergence(self.posterior(), self.prior())
    }

}

/// Writes any serializable model as pretty-printed JSON.
pub fn save<M, W>(model : &M, mut writer : W) -> std::result::Result<(), Box<dyn StdError>>
where
    M : Serialize,
    W : Write
{
    let content = serde_json::to_string_pretty(model)?;
    writer.write_all(content.as_bytes())?;
    Ok(())
}

pub fn save_to_path<M, P>(model : &M, path : P) -> std::result::Result<(), Box<dyn StdError>>
where
    M : Serialize,
    P : AsRef<Path>
{
    let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
    save(model, file)
}

/// Reads a model back from its JSON representation.
pub fn load<M, R>(mut reader : R) -> std::result::Result<M, Box<dyn StdError>>
where
    M : DeserializeOwned,
    R : Read
{
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    let model = serde_json::from_str(&content[..])?;
    Ok(model)
}

pub fn load_from_path<M, P>(path : P) -> std::result::Result<M, Box<dyn StdError>>
where
    M : DeserializeOwned,
    P : AsRef<Path>
{
    let f = File::open(path)?;
    load(f)
}
