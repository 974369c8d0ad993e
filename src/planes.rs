//! Input plane encoding — the bitplane
//! representation fed to the `Evaluator` and recorded by the Training
//! Recorder. Shared between those two callers so the layout only needs to
//! be gotten right once.
//!
//! Piece occupancy planes are read straight out of `cozy_chess::Board`'s
//! per-color/per-piece bitboards; the "own/opponent" and vertical-flip
//! framing needed for the v2 color-relative encoding is grounded on the
//! same canonicalization `policy_index` already applies to moves.

use cozy_chess::{Board, Color, Piece};

use crate::config::T_HISTORY;
use crate::position::{BoardHistory, Position};

const OWN_PIECES: [Piece; 6] = [
    Piece::Pawn,
    Piece::Knight,
    Piece::Bishop,
    Piece::Rook,
    Piece::Queen,
    Piece::King,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingVersion {
    V1,
    V2,
}

impl EncodingVersion {
    fn planes_per_position(self) -> usize {
        match self {
            EncodingVersion::V1 => 14,
            EncodingVersion::V2 => 13,
        }
    }
}

/// A plane is a 64-bit bitboard: one bit per square for occupancy planes, or
/// a constant `0`/`u64::MAX` for boolean feature planes, or a replicated
/// byte value for scalar planes (rule50, move count) — the same "hex chars
/// for 64 bits" shape the training chunk format serializes.
pub type Plane = u64;

fn flip_vertical(bb: u64) -> u64 {
    bb.swap_bytes()
}

fn scalar_plane(value: u8) -> Plane {
    (value as u64) * 0x0101010101010101
}

fn piece_planes(board: &Board, color: Color, flip: bool) -> [Plane; 6] {
    let mut planes = [0u64; 6];
    for (i, &piece) in OWN_PIECES.iter().enumerate() {
        let bb = (board.colors(color) & board.pieces(piece)).0;
        planes[i] = if flip { flip_vertical(bb) } else { bb };
    }
    planes
}

/// The full set of planes for one network query: `T_HISTORY` positions'
/// worth of history planes (most-recent first, zero-padded at the tail for
/// short games) plus the scalar/boolean feature planes.
#[derive(Debug, Clone)]
pub struct InputPlanes {
    pub version: EncodingVersion,
    pub history: Vec<Plane>,
    pub castling: [Plane; 4],
    pub side_to_move: Plane,
    pub rule50: Plane,
    pub move_count: Plane,
    pub padding: Plane,
}

impl InputPlanes {
    pub fn planes_per_position(&self) -> usize {
        self.version.planes_per_position()
    }

    /// Total plane count, matching the network's expected input depth.
    pub fn total_planes(&self) -> usize {
        self.history.len() + self.castling.len() + 3
    }
}

/// Encodes `history` . The board is vertically flipped for v2
/// networks when black is to move, so "own side" is always at the bottom of
/// the 8x8 grid; v1 networks never flip (repetition history is kept in
/// absolute orientation instead, matching the legacy two-plane repetition
/// encoding).
pub fn encode(history: &BoardHistory, version: EncodingVersion) -> InputPlanes {
    let cur = history.cur();
    let cur_color = cur.side_to_move();
    let flip = version == EncodingVersion::V2 && cur_color == Color::Black;

    let positions = history.last_n(T_HISTORY);
    let planes_per_pos = version.planes_per_position();
    let mut planes = Vec::with_capacity(T_HISTORY * planes_per_pos);

    for pos in positions.iter().rev() {
        encode_one_position(pos, cur_color, flip, version, &mut planes);
    }
    let pad = T_HISTORY.saturating_sub(positions.len());
    for _ in 0..pad {
        planes.extend(std::iter::repeat(0u64).take(planes_per_pos));
    }

    let castling = encode_castling(cur, flip);
    let side_to_move = if cur_color == Color::Black { u64::MAX } else { 0 };
    let rule50 = scalar_plane(cur.rule50().min(u8::MAX as u16) as u8);
    let move_count = match version {
        EncodingVersion::V1 => scalar_plane(history.moves().len().min(u8::MAX as usize) as u8),
        EncodingVersion::V2 => 0,
    };
    let padding = match version {
        EncodingVersion::V1 => 0,
        EncodingVersion::V2 => u64::MAX,
    };

    InputPlanes {
        version,
        history: planes,
        castling,
        side_to_move,
        rule50,
        move_count,
        padding,
    }
}

fn encode_one_position(
    pos: &Position,
    cur_color: Color,
    flip: bool,
    version: EncodingVersion,
    out: &mut Vec<Plane>,
) {
    let board = pos.board();
    out.extend(piece_planes(board, cur_color, flip));
    out.extend(piece_planes(board, !cur_color, flip));
    let rep_ge1 = if pos.repetitions() >= 1 { u64::MAX } else { 0 };
    out.push(rep_ge1);
    if version == EncodingVersion::V1 {
        let rep_ge2 = if pos.repetitions() >= 2 { u64::MAX } else { 0 };
        out.push(rep_ge2);
    }
}

fn encode_castling(pos: &Position, flip: bool) -> [Plane; 4] {
    let board = pos.board();
    let cur = pos.side_to_move();
    let opp = !cur;
    let rights_plane = |color: Color, kingside: bool| {
        let rights = board.castle_rights(color);
        let has = if kingside {
            rights.short.is_some()
        } else {
            rights.long.is_some()
        };
        if has { u64::MAX } else { 0 }
    };
    let own_king = rights_plane(cur, true);
    let own_queen = rights_plane(cur, false);
    let opp_king = rights_plane(opp, true);
    let opp_queen = rights_plane(opp, false);
    // castling planes are constant across all squares already; flip is a
    // no-op for a constant bitboard, kept explicit for readability.
    let _ = flip;
    [own_king, own_queen, opp_king, opp_queen]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_game_zero_pads_missing_history() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let planes = encode(&history, EncodingVersion::V2);
        assert_eq!(planes.history.len(), T_HISTORY * 13);
        // only the most-recent (and only) position is real; the rest are padding.
        let trailing_zero_positions = T_HISTORY - 1;
        let tail = &planes.history[13..];
        assert_eq!(tail.len(), trailing_zero_positions * 13);
        assert!(tail.iter().all(|&p| p == 0));
    }

    #[test]
    fn side_to_move_plane_matches_color() {
        let mut history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let white_planes = encode(&history, EncodingVersion::V2);
        assert_eq!(white_planes.side_to_move, 0);

        let mv = history.cur().legal_moves()[0];
        history.make_move(mv);
        let black_planes = encode(&history, EncodingVersion::V2);
        assert_eq!(black_planes.side_to_move, u64::MAX);
    }

    #[test]
    fn v1_has_two_repetition_planes_v2_has_one() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let v1 = encode(&history, EncodingVersion::V1);
        let v2 = encode(&history, EncodingVersion::V2);
        assert_eq!(v1.planes_per_position(), 14);
        assert_eq!(v2.planes_per_position(), 13);
    }

    #[test]
    fn own_pieces_never_overlap_opponent_pieces() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let planes = encode(&history, EncodingVersion::V2);
        for i in 0..6 {
            let own = planes.history[i];
            let opp = planes.history[6 + i];
            assert_eq!(own & opp, 0);
        }
    }
}
