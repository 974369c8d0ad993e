//! Training Recorder — captures one `TimeStep` per root search in
//! self-play and hands the accumulated sequence to a `Chunker` at game
//! end.
//!
//! Kept as an explicit, engine-owned struct (constructed once per engine,
//! threaded by reference) rather than a process-wide singleton, for the
//! same testability reason the transposition table and move-index tables
//! are owned structs too: independent engines in the same process must not
//! share state.

use cozy_chess::Color;

use crate::chunker::Chunker;
use crate::evaluator::Evaluator;
use crate::node::Node;
use crate::planes::{self, EncodingVersion, InputPlanes};
use crate::policy_index::PolicyIndex;
use crate::position::BoardHistory;

/// One recorded self-play position: the input planes at the time of the
/// search, the visit-count policy target, and enough metadata to convert
/// the eventual game result into this step's to-move view.
pub struct TimeStep {
    pub planes: InputPlanes,
    pub policy: Vec<f32>,
    pub to_move: Color,
    /// The network's raw value query at this position, kept for logging.
    pub net_winrate: f32,
    /// The root node's own visit-weighted eval, kept for logging.
    pub root_uct_winrate: f32,
    /// `root.best_root_child(color)`'s eval, kept for logging.
    pub child_uct_winrate: f32,
    pub bestmove_visits: u32,
}

pub struct TrainingRecorder {
    steps: Vec<TimeStep>,
    version: EncodingVersion,
}

impl TrainingRecorder {
    pub fn new(version: EncodingVersion) -> Self {
        TrainingRecorder {
            steps: Vec::new(),
            version,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Captures one `TimeStep` from a completed root search. `root`'s
    /// children must already be sorted by the best-move comparator (the
    /// search engine does this before the tree is dropped). Returns `false`
    /// (and records nothing) if the root children's total visit count is
    /// zero — transpositions can make `root.visits()` itself untrustworthy,
    /// so the total is summed directly from the children instead.
    pub fn record(
        &mut self,
        history: &BoardHistory,
        root: &Node,
        evaluator: &dyn Evaluator,
        policy_index: &PolicyIndex,
    ) -> bool {
        if !root.has_children() {
            return false;
        }
        let color = history.cur().side_to_move();
        let children = root.children();
        let total_visits: u64 = children.iter().map(|c| c.visits() as u64).sum();
        if total_visits == 0 {
            return false;
        }

        let net_winrate = match evaluator.evaluate(history) {
            Ok(result) => result.value,
            Err(_) => return false,
        };

        let root_uct_winrate = root.eval(color, root.init_eval());
        let best = &children[0];
        let child_uct_winrate = best.eval(color, best.init_eval());
        let bestmove_visits = best.visits();

        let mut policy = vec![0.0f32; policy_index.len()];
        for child in children.iter() {
            let Some(mv) = child.mv() else { continue };
            if let Some(idx) = policy_index.lookup(mv, color) {
                policy[idx] = child.visits() as f32 / total_visits as f32;
            }
        }

        let planes = planes::encode(history, self.version);
        self.steps.push(TimeStep {
            planes,
            policy,
            to_move: color,
            net_winrate,
            root_uct_winrate,
            child_uct_winrate,
            bestmove_visits,
        });
        true
    }

    /// Writes every recorded step to `chunker` in recording order, then
    /// clears the sequence. `result` is
    /// the game outcome from white's perspective (`1.0` white win, `0.0`
    /// draw, `-1.0` black win); each step's stored result is flipped to
    /// that step's to-move view.
    pub fn dump_training(&mut self, result: f32, chunker: &mut Chunker) -> std::io::Result<()> {
        for step in &self.steps {
            let signed_result = if step.to_move == Color::White {
                result
            } else {
                -result
            };
            chunker.write_record(&step.planes, &step.policy, signed_result)?;
        }
        chunker.flush()?;
        self.steps.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::UniformEvaluator;
    use crate::node::Node;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn record_skips_when_root_has_no_children() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let root = Node::new_root(0.5);
        let evaluator = UniformEvaluator;
        let policy_index = PolicyIndex::new();
        let mut recorder = TrainingRecorder::new(EncodingVersion::V2);
        assert!(!recorder.record(&history, &root, &evaluator, &policy_index));
        assert_eq!(recorder.len(), 0);
    }

    #[test]
    fn record_captures_policy_summing_to_one() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let root = Node::new_root(0.5);
        let node_count = AtomicU64::new(1);
        let evaluator = UniformEvaluator;
        root.create_children(&node_count, &history, &evaluator);
        for child in root.children_mut().iter() {
            child.update(0.5);
        }

        let policy_index = PolicyIndex::new();
        let mut recorder = TrainingRecorder::new(EncodingVersion::V2);
        assert!(recorder.record(&history, &root, &evaluator, &policy_index));
        assert_eq!(recorder.len(), 1);
        let sum: f32 = recorder.steps[0].policy.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }
}
