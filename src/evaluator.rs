//! The `Evaluator` contract — the single external capability the search
//! engine depends on. Real network backends (CPU/GPU/tablebase) live
//! outside this crate; this module defines the seam plus a couple of
//! deterministic test doubles used by the engine's own test suite. A
//! capability trait rather than a concrete struct keeps the search engine
//! decoupled from any one backend implementation.

use crate::position::{BoardHistory, Move};

/// One network forward pass: a side-to-move-relative win probability, plus
/// a prior over the legal moves of the position queried. Priors need not be
/// normalized; the node expansion path renormalizes them.
#[derive(Debug, Clone)]
pub struct EvalResult {
    pub value: f32,
    pub priors: Vec<(Move, f32)>,
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("evaluator backend failed: {0}")]
    Backend(String),
    #[error("evaluator returned a degenerate output: {0}")]
    Degenerate(String),
}

/// A single capability: score the position at the tip of `history`.
/// Implementations may batch internally; from the caller's point of view
/// this call blocks until a result (or failure) is available.
pub trait Evaluator: Sync + Send {
    fn evaluate(&self, history: &BoardHistory) -> Result<EvalResult, EvalError>;
}

/// Returns `value = 0.5` and a uniform prior over the position's legal
/// moves.
pub struct UniformEvaluator;

impl Evaluator for UniformEvaluator {
    fn evaluate(&self, history: &BoardHistory) -> Result<EvalResult, EvalError> {
        let legal = history.cur().legal_moves();
        if legal.is_empty() {
            return Err(EvalError::Degenerate("no legal moves at a queried leaf".into()));
        }
        let prior = 1.0 / legal.len() as f32;
        Ok(EvalResult {
            value: 0.5,
            priors: legal.into_iter().map(|mv| (mv, prior)).collect(),
        })
    }
}

/// Always returns a fixed value and uniform priors; useful when a test
/// wants to drive the search toward a specific mating line
/// without the evaluator's value ever dominating the search.
pub struct FixedEvaluator {
    pub value: f32,
}

impl Evaluator for FixedEvaluator {
    fn evaluate(&self, history: &BoardHistory) -> Result<EvalResult, EvalError> {
        let legal = history.cur().legal_moves();
        if legal.is_empty() {
            return Err(EvalError::Degenerate("no legal moves at a queried leaf".into()));
        }
        let prior = 1.0 / legal.len() as f32;
        Ok(EvalResult {
            value: self.value,
            priors: legal.into_iter().map(|mv| (mv, prior)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_evaluator_sums_to_one() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let result = UniformEvaluator.evaluate(&history).unwrap();
        assert_eq!(result.priors.len(), 20);
        let sum: f32 = result.priors.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }
}
