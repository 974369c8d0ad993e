//! Position Adapter — `Position` and `BoardHistory`.
//!
//! The actual chess rules — legal move generation, make/unmake, draw
//! detection, Zobrist hashing — are provided by `cozy_chess`. This module
//! is a thin capability bound over that library: it adapts
//! `cozy_chess::Board` to the shapes the search engine needs and owns the
//! bits that are not the external library's job — the
//! rule-50/repetition-aware `full_key` and the append-only game history.

use cozy_chess::{Board, Color, GameStatus};
use std::hash::{Hash, Hasher};

pub use cozy_chess::Move;

use crate::config::T_HISTORY;
use crate::error::{EngineError, EngineResult};

/// One immutable position in a game, plus the bookkeeping `full_key`
/// needs (rule50 count, repetition count) that a bare chess library has
/// no reason to track on its own.
#[derive(Clone)]
pub struct Position {
    board: Board,
    key: u64,
    rule50: u16,
    repetitions: u8,
    full_key: u64,
}

fn zobrist_key(board: &Board) -> u64 {
    // cozy_chess::Board's Hash impl is a proper Zobrist hash; we just need
    // a stable 64-bit value out of it, not the trait's generic Hasher dance.
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    board.hash(&mut hasher);
    hasher.finish()
}

fn mix_full_key(key: u64, rule50: u16, repetitions: u8) -> u64 {
    // Not a cryptographic mix, just enough to make `full_key` differ
    // whenever rule50 or repetitions differ even if `key` matches.
    const R50_PRIME: u64 = 0x9E3779B97F4A7C15;
    const REP_PRIME: u64 = 0xC2B2AE3D27D4EB4F;
    key ^ (rule50 as u64).wrapping_mul(R50_PRIME) ^ (repetitions as u64).wrapping_mul(REP_PRIME)
}

impl Position {
    pub fn root(fen: &str) -> EngineResult<Self> {
        let board = Board::from_fen(fen, false).map_err(|e| EngineError::InvalidFen(format!("{e:?}")))?;
        let key = zobrist_key(&board);
        Ok(Position {
            board,
            key,
            rule50: 0,
            repetitions: 0,
            full_key: mix_full_key(key, 0, 0),
        })
    }

    pub fn startpos() -> Self {
        let board = Board::default();
        let key = zobrist_key(&board);
        Position {
            board,
            key,
            rule50: 0,
            repetitions: 0,
            full_key: mix_full_key(key, 0, 0),
        }
    }

    /// Applies `mv` (assumed legal), computing the child's rule50 count and
    /// repetition count against `prior_positions` (the ancestors sharing the
    /// same game, most-recent-last).
    fn make(&self, mv: Move, prior_positions: &[Position]) -> Position {
        let is_reversible = self.board.piece_on(mv.from).map(|p| p != cozy_chess::Piece::Pawn).unwrap_or(true)
            && self.board.piece_on(mv.to).is_none();
        let mut board = self.board.clone();
        board.play(mv);
        let key = zobrist_key(&board);
        let rule50 = if is_reversible { self.rule50 + 1 } else { 0 };
        let repetitions = prior_positions
            .iter()
            .rev()
            .take(rule50 as usize)
            .filter(|p| p.key == key)
            .count()
            .min(u8::MAX as usize) as u8;
        Position {
            board,
            key,
            rule50,
            repetitions,
            full_key: mix_full_key(key, rule50, repetitions),
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn full_key(&self) -> u64 {
        self.full_key
    }

    pub fn rule50(&self) -> u16 {
        self.rule50
    }

    pub fn repetitions(&self) -> u8 {
        self.repetitions
    }

    pub fn side_to_move(&self) -> Color {
        self.board.side_to_move()
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves = Vec::new();
        self.board.generate_moves(|piece_moves| {
            moves.extend(piece_moves);
            false
        });
        moves
    }

    pub fn is_checkmate(&self) -> bool {
        self.board.status() == GameStatus::Won
    }

    pub fn is_stalemate(&self) -> bool {
        self.board.status() == GameStatus::Drawn && self.legal_moves().is_empty()
    }

    /// Insufficient material, 50-move rule (when not already checkmate), or
    /// threefold repetition. Checkmate/stalemate are reported separately by
    /// `is_checkmate`/`is_stalemate`; a caller that only wants "no legal
    /// moves" should check both plus `legal_moves().is_empty()`.
    pub fn is_draw(&self) -> bool {
        if self.board.status() == GameStatus::Drawn {
            return true;
        }
        if self.rule50 >= 100 && self.board.status() != GameStatus::Won {
            return true;
        }
        // repetitions counts prior occurrences of this exact key; 2 prior
        // occurrences plus the current one is threefold.
        self.repetitions >= 2
    }
}

/// An append-only sequence of positions starting at a root FEN, with the
/// moves that connect consecutive entries (needed by `find_new_root` to
/// replay a path through an existing tree).
#[derive(Clone)]
pub struct BoardHistory {
    positions: Vec<Position>,
    moves: Vec<Move>,
}

impl BoardHistory {
    pub fn new(root: Position) -> Self {
        BoardHistory {
            positions: vec![root],
            moves: Vec::new(),
        }
    }

    pub fn from_fen(fen: &str) -> EngineResult<Self> {
        Ok(BoardHistory::new(Position::root(fen)?))
    }

    pub fn cur(&self) -> &Position {
        self.positions.last().expect("history is never empty")
    }

    pub fn make_move(&mut self, mv: Move) {
        let next = self.cur().make(mv, &self.positions);
        self.positions.push(next);
        self.moves.push(mv);
    }

    pub fn undo_move(&mut self) {
        self.positions.pop();
        self.moves.pop();
        debug_assert!(!self.positions.is_empty());
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    /// Moves played since the ancestor at `idx` (inclusive start), used by
    /// `find_new_root` to replay a path through the existing search tree.
    pub fn moves_since(&self, idx: usize) -> &[Move] {
        &self.moves[idx..]
    }

    /// Retains only the last `T_HISTORY` positions. Earlier states are not
    /// needed as network input and would bloat the per-worker copy made at
    /// the top of every simulation.
    pub fn shallow_clone(&self) -> Self {
        let start = self.positions.len().saturating_sub(T_HISTORY);
        let keep_positions = self.positions[start..].to_vec();
        // moves[i] connects positions[i] to positions[i+1], so keeping the
        // last `keep_positions.len() - 1` moves stays aligned.
        let moves_start = self.moves.len().saturating_sub(keep_positions.len().saturating_sub(1));
        BoardHistory {
            positions: keep_positions,
            moves: self.moves[moves_start..].to_vec(),
        }
    }

    pub fn last_n(&self, n: usize) -> &[Position] {
        let start = self.positions.len().saturating_sub(n);
        &self.positions[start..]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shallow_clone_preserves_last_position_and_caps_length() {
        let mut history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        for _ in 0..12 {
            let mv = history.cur().legal_moves()[0];
            history.make_move(mv);
        }
        let clone = history.shallow_clone();
        assert!(clone.positions().len() <= T_HISTORY);
        assert_eq!(clone.cur().key(), history.cur().key());
        assert_eq!(clone.cur().full_key(), history.cur().full_key());
    }

    #[test]
    fn transposed_positions_share_key_and_full_key() {
        // d4 d5 e4  vs  e4 d5 d4 -> same position, same rule50 (0 reversible-capture state)
        let moves_a = ["d2d4", "d7d5", "e2e4"];
        let moves_b = ["e2e4", "d7d5", "d2d4"];

        let play = |mvs: &[&str]| {
            let mut history = BoardHistory::from_fen(
                "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            )
            .unwrap();
            for mv in mvs {
                let mv: Move = mv.parse().unwrap();
                history.make_move(mv);
            }
            history
        };

        let a = play(&moves_a);
        let b = play(&moves_b);
        assert_eq!(a.cur().key(), b.cur().key());
        assert_eq!(a.cur().full_key(), b.cur().full_key());
    }

    #[test]
    fn full_key_differs_on_rule50_or_repetition() {
        let base = Position::startpos();
        let k1 = mix_full_key(base.key, 0, 0);
        let k2 = mix_full_key(base.key, 1, 0);
        let k3 = mix_full_key(base.key, 0, 1);
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
        assert_ne!(k2, k3);
    }

    #[test]
    fn make_undo_round_trips_key() {
        let mut history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let key_before = history.cur().key();
        let mv = history.cur().legal_moves()[0];
        history.make_move(mv);
        assert_ne!(history.cur().key(), key_before);
        history.undo_move();
        assert_eq!(history.cur().key(), key_before);
    }
}
