/// Error taxonomy shared by all density and mixture operations.
pub mod error;

/// Exponential-family densities in natural-parameter form: the per-family
/// log-normalizer library, the cached value/gradient density abstraction,
/// and the family-agnostic Bregman/KL divergence.
pub mod distr;

/// Conjugate Bayesian models built on top of the densities: Normal models
/// with diagonal (Normal-Gamma) and full (Normal-Wishart) covariance
/// posteriors, and the mixture engine performing natural-gradient
/// variational updates.
pub mod model;
