//! Error taxonomy for the engine.
//!
//! Only truly unrecoverable conditions (bad weights, a bug in move indexing)
//! are modeled as hard errors; everything a worker can hit mid-simulation is
//! absorbed instead (see `search::play_simulation`), so `EngineError` is
//! small and each variant maps to one of the taxonomy entries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid weights file: {0}")]
    InvalidWeights(String),

    #[error("evaluator backend failed: {0}")]
    EvaluatorFailure(String),

    #[error("self-check mismatch between backends: {0}")]
    SelfCheckMismatch(String),

    #[error("malformed FEN: {0}")]
    InvalidFen(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
