use nalgebra::*;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;
use crate::distr::{Density, kl_divergence};
use crate::error::{Error, Result};
use super::ConjugateModel;

/// Per-batch accumulated statistics: the responsibility-weighted sum of the
/// component sufficient statistics (one row per component) and the total
/// responsibility mass assigned to each component. Produced by inference,
/// consumed immediately by the natural-gradient update; never persisted.
#[derive(Debug, Clone)]
pub struct AccStats {

    pub comp_stats : DMatrix<f64>,

    pub weight_stats : DVector<f64>

}

/// Bayesian mixture model over conjugate exponential-family components, with
/// a Dirichlet prior/posterior over the mixing weights. Inference is the
/// expectation step of variational EM: sufficient statistics of the batch
/// are scored against the cached matrix of posterior expected natural
/// parameters (one row per component, the expected log-weight appended), and
/// a numerically stable log-sum-exp yields the per-observation expected
/// log-likelihood and the responsibilities. Updates are stochastic
/// natural-gradient steps scaled to correct for mini-batch subsampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mixture<M> {

    prior_weights : Density,

    posterior_weights : Density,

    components : Vec<M>,

    // Row i holds component i's posterior expected sufficient statistics
    // concatenated with its expected log-weight. Must be rebuilt whenever
    // any posterior is replaced; scoring against a stale matrix is a
    // correctness bug.
    nparam_matrix : DMatrix<f64>

}

impl<M : ConjugateModel> Mixture<M> {

    /// Creates a mixture from per-component prior counts and an ordered list
    /// of components. The posterior over the weights starts at the prior.
    pub fn new(prior_counts : &DVector<f64>, components : Vec<M>) -> Result<Self> {
        if components.is_empty() || components.len() != prior_counts.nrows() {
            return Err(Error::ShapeMismatch {
                expected : components.len().max(1),
                found : prior_counts.nrows(),
                context : "mixture prior counts"
            });
        }
        let stat_dim = components[0].posterior().expected_sufficient_statistics().nrows();
        for comp in components.iter().skip(1) {
            let found = comp.posterior().expected_sufficient_statistics().nrows();
            if found != stat_dim {
                return Err(Error::ShapeMismatch {
                    expected : stat_dim,
                    found,
                    context : "mixture component statistics"
                });
            }
        }
        let prior_weights = Density::dirichlet(prior_counts)?;
        let posterior_weights = Density::dirichlet(prior_counts)?;
        let mut mixture = Self {
            prior_weights,
            posterior_weights,
            components,
            nparam_matrix : DMatrix::zeros(0, 0)
        };
        mixture.prepare();
        Ok(mixture)
    }

    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    pub fn components(&self) -> &[M] {
        &self.components
    }

    pub fn prior_weights(&self) -> &Density {
        &self.prior_weights
    }

    pub fn posterior_weights(&self) -> &Density {
        &self.posterior_weights
    }

    /// Expected mixing weights under the posterior.
    pub fn weights(&self) -> DVector<f64> {
        let w = self.posterior_weights.expected_sufficient_statistics().map(|s| s.exp());
        let total = w.sum();
        w.unscale(total)
    }

    /// Sufficient statistics of the batch: the component statistics with a
    /// trailing unit column supporting the log-weight term.
    pub fn sufficient_statistics(&self, y : DMatrixSlice<'_, f64>) -> Result<DMatrix<f64>> {
        let dim = self.components[0].obs_dim();
        if y.ncols() != dim {
            return Err(Error::ShapeMismatch {
                expected : dim,
                found : y.ncols(),
                context : "mixture observations"
            });
        }
        let t = self.components[0].sufficient_statistics(y)?;
        let ncols = t.ncols();
        Ok(t.insert_column(ncols, 1.0))
    }

    // Rebuilds the cached natural-parameter matrix from the current
    // component posteriors and weight posterior.
    fn prepare(&mut self) {
        let k = self.components.len();
        let s = self.components[0].posterior().expected_sufficient_statistics().nrows();
        let log_weights = self.posterior_weights.expected_sufficient_statistics();
        let mut matrix = DMatrix::zeros(k, s + 1);
        for (i, comp) in self.components.iter().enumerate() {
            let ess = comp.posterior().expected_sufficient_statistics();
            for j in 0..s {
                matrix[(i, j)] = ess[j];
            }
            matrix[(i, s)] = log_weights[i];
        }
        self.nparam_matrix = matrix;
    }

    // Scores statistic rows against the cached matrix; returns the row-wise
    // log-sum-exp (max subtracted before exponentiating) and the
    // responsibilities.
    fn infer(&self, t : &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>) {
        let scores = t * self.nparam_matrix.transpose();
        let (n, k) = scores.shape();
        let mut lse = DVector::zeros(n);
        let mut resps = DMatrix::zeros(n, k);
        for i in 0..n {
            let row_max = scores.row(i).max();
            let sum : f64 = scores.row(i).iter().map(|s| (s - row_max).exp()).sum();
            lse[i] = row_max + sum.ln();
            for j in 0..k {
                resps[(i, j)] = (scores[(i, j)] - lse[i]).exp();
            }
        }
        (lse, resps)
    }

    fn accumulate(&self, t : &DMatrix<f64>, resps : &DMatrix<f64>) -> AccStats {
        let s = t.ncols() - 1;
        AccStats {
            comp_stats : resps.transpose() * t.columns(0, s),
            weight_stats : resps.row_sum().transpose()
        }
    }

    /// Per-observation responsibilities (posterior probability of each
    /// component having generated the observation); rows sum to one.
    pub fn responsibilities(&self, y : DMatrixSlice<'_, f64>) -> Result<DMatrix<f64>> {
        let t = self.sufficient_statistics(y)?;
        let (_, resps) = self.infer(&t);
        Ok(resps)
    }

    /// Per-observation expected log-likelihood with respect to the posterior
    /// over the parameters.
    pub fn exp_llh(&self, y : DMatrixSlice<'_, f64>) -> Result<DVector<f64>> {
        let t = self.sufficient_statistics(y)?;
        let (lse, _) = self.infer(&t);
        let base = -0.5 * self.components[0].obs_dim() as f64 * (2. * PI).ln();
        Ok(lse.add_scalar(base))
    }

    /// Expected log-likelihood together with the accumulated statistics
    /// feeding the natural-gradient update.
    pub fn exp_llh_with_stats(&self, y : DMatrixSlice<'_, f64>) -> Result<(DVector<f64>, AccStats)> {
        let t = self.sufficient_statistics(y)?;
        let (lse, resps) = self.infer(&t);
        let acc = self.accumulate(&t, &resps);
        let base = -0.5 * self.components[0].obs_dim() as f64 * (2. * PI).ln();
        Ok((lse.add_scalar(base), acc))
    }

    /// Expected natural parameters of the model for each observation, given
    /// approximate sufficient statistics derived from a variational
    /// posterior (per-observation mean and variance). This lets an external
    /// amortized-inference model (e.g. the encoder of a latent-variable
    /// generative model) reuse the responsibility machinery unchanged.
    pub fn expected_natural_params(
        &self,
        mean : DMatrixSlice<'_, f64>,
        var : DMatrixSlice<'_, f64>
    ) -> Result<(DMatrix<f64>, AccStats)> {
        let t = self.components[0].sufficient_statistics_from_mean_var(mean, var)?;
        let ncols = t.ncols();
        let t = t.insert_column(ncols, 1.0);
        let (_, resps) = self.infer(&t);

        let s = t.ncols() - 1;
        let mut rows = DMatrix::zeros(self.components.len(), s);
        for (i, comp) in self.components.iter().enumerate() {
            let row = comp.expected_natural_params_row();
            for j in 0..s {
                rows[(i, j)] = row[j];
            }
        }
        let acc = self.accumulate(&t, &resps);
        Ok((&resps * rows, acc))
    }

    /// Natural-gradient step on all posteriors from one batch of accumulated
    /// statistics. scale corrects for mini-batch subsampling (total data
    /// size over batch size) so the full-data natural gradient is
    /// approximated without bias. Every new parameter vector is validated
    /// before any posterior is replaced: a step that drives any component or
    /// the weights outside its natural domain returns an error with the
    /// whole mixture (cached matrix included) still in its previous state.
    pub fn natural_grad_update(
        &mut self,
        acc_stats : &AccStats,
        scale : f64,
        lrate : f64
    ) -> Result<()> {
        let k = self.components.len();
        if acc_stats.comp_stats.nrows() != k || acc_stats.weight_stats.nrows() != k {
            return Err(Error::ShapeMismatch {
                expected : k,
                found : acc_stats.comp_stats.nrows(),
                context : "accumulated statistics"
            });
        }
        let mut new_posteriors = Vec::with_capacity(k);
        for (i, comp) in self.components.iter().enumerate() {
            let row = acc_stats.comp_stats.row(i).transpose();
            let eta = comp.posterior().natural_params();
            if row.nrows() != eta.nrows() {
                return Err(Error::ShapeMismatch {
                    expected : eta.nrows(),
                    found : row.nrows(),
                    context : "accumulated statistics"
                });
            }
            let natural_grad = comp.prior().natural_params() + row.scale(scale) - eta;
            let new_eta = eta + natural_grad.scale(lrate);
            new_posteriors.push(Density::new(comp.posterior().family(), new_eta)?);
        }
        let natural_grad = self.prior_weights.natural_params()
            + acc_stats.weight_stats.scale(scale)
            - self.posterior_weights.natural_params();
        let new_eta = self.posterior_weights.natural_params() + natural_grad.scale(lrate);
        let new_weights = Density::new(self.posterior_weights.family(), new_eta)?;

        for (comp, posterior) in self.components.iter_mut().zip(new_posteriors) {
            *comp.posterior_mut() = posterior;
        }
        self.posterior_weights = new_weights;
        self.prepare();
        Ok(())
    }

    /// KL divergence between all posteriors and their priors: the weights'
    /// divergence plus each component's. Reported by training loops as part
    /// of an evidence-lower-bound objective.
    pub fn kl_div_posterior_prior(&self) -> Result<f64> {
        let mut total = kl_divergence(&self.posterior_weights, &self.prior_weights)?;
        for comp in &self.components {
            total += comp.kl_div_posterior_prior()?;
        }
        Ok(total)
    }

    /// Doubles the model order: every component is split by its own
    /// family-specific rule, and each Dirichlet weight is halved across the
    /// two children (counts 0.5 * eta + 1 per duplicate), preserving the
    /// expected category probabilities.
    pub fn split(&self) -> Result<Mixture<M>> {
        let k = self.components.len();
        let mut prior_counts = DVector::zeros(2 * k);
        let mut post_counts = DVector::zeros(2 * k);
        for i in 0..k {
            let p = 0.5 * self.prior_weights.natural_params()[i] + 1.;
            let q = 0.5 * self.posterior_weights.natural_params()[i] + 1.;
            prior_counts[2 * i] = p;
            prior_counts[2 * i + 1] = p;
            post_counts[2 * i] = q;
            post_counts[2 * i + 1] = q;
        }
        let prior_weights = Density::dirichlet(&prior_counts)?;
        let posterior_weights = Density::dirichlet(&post_counts)?;

        let mut components = Vec::with_capacity(2 * k);
        for comp in &self.components {
            let (left, right) = comp.split()?;
            components.push(left);
            components.push(right);
        }

        let mut mixture = Mixture {
            prior_weights,
            posterior_weights,
            components,
            nparam_matrix : DMatrix::zeros(0, 0)
        };
        mixture.prepare();
        Ok(mixture)
    }

}
