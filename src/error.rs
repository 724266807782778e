use thiserror::Error;

/// Errors emitted by density construction and posterior updates. Shape errors
/// are raised eagerly at construction and are not recoverable; numerical
/// instabilities are surfaced to the caller (typically a training loop, which
/// may react by lowering its learning rate) instead of being clamped away.
#[derive(Debug, Error)]
pub enum Error {

    #[error("shape mismatch at {context}: expected dimension {expected}, found {found}")]
    ShapeMismatch {
        expected : usize,
        found : usize,
        context : &'static str
    },

    #[error("log-normalizer ill-defined at {context}")]
    NumericalInstability {
        context : &'static str
    },

    #[error("KL divergence requires densities of the same family")]
    FamilyMismatch

}

pub type Result<T> = std::result::Result<T, Error>;
