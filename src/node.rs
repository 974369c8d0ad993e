//! Tree Node — the MCTS node, including PUCT selection with first-play
//! urgency, virtual loss, expansion, Dirichlet noise and proportional
//! randomization.
//!
//! A small, focused struct with `new`/update-style methods and in-file
//! tests, using atomics and an owned-subtree (`Box<Node>` children) shape
//! rather than an arena or `Rc<RefCell<_>>`, since worker threads mutate
//! the shared tree concurrently during virtual-loss application and
//! backup.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use cozy_chess::Color;
use rand::Rng;
use rand_distr::{Dirichlet, Distribution};

use crate::config::{Config, VIRTUAL_LOSS_COUNT};
use crate::evaluator::Evaluator;
use crate::position::{BoardHistory, Move};

const ACTIVE: u8 = 0;
const PRUNED: u8 = 1;

/// A node in the search tree. Children are owned exclusively by their
/// parent; the node itself is shared via
/// `&Node` borrows that live for the duration of one `think()` call.
///
/// `children` is published exactly once via `has_children` (acquire/release,
///  "Ordering guarantees"): before that flag is observed true, no
/// thread may read `children`; after it is observed true, the vector's
/// length and order never change again until the whole tree is dropped or a
/// subtree is adopted as a new root (both single-threaded operations). That
/// invariant is what makes the `UnsafeCell` read in `children()` sound.
pub struct Node {
    mv: Option<Move>,
    prior_bits: AtomicU32,
    init_eval: f32,
    visits: AtomicU32,
    white_eval_sum_bits: AtomicU64,
    virtual_loss: AtomicI32,
    status: AtomicU8,
    has_children: AtomicBool,
    is_expanding: Mutex<bool>,
    children: UnsafeCell<Vec<Box<Node>>>,
}

// SAFETY: `children` is only mutated under `is_expanding` (single writer,
// one-time publish) or from the single thread that owns the tree between
// `think()` calls (sort, dirichlet noise, proportional swap); concurrent
// reads only ever happen after the one-time publish has completed.
unsafe impl Sync for Node {}

impl Node {
    fn new(mv: Option<Move>, prior: f32, init_eval: f32) -> Self {
        Node {
            mv,
            prior_bits: AtomicU32::new(prior.to_bits()),
            init_eval,
            visits: AtomicU32::new(0),
            white_eval_sum_bits: AtomicU64::new(0.0f64.to_bits()),
            virtual_loss: AtomicI32::new(0),
            status: AtomicU8::new(ACTIVE),
            has_children: AtomicBool::new(false),
            is_expanding: Mutex::new(false),
            children: UnsafeCell::new(Vec::new()),
        }
    }

    pub fn new_root(init_eval: f32) -> Box<Self> {
        Box::new(Node::new(None, 1.0, init_eval))
    }

    pub fn mv(&self) -> Option<Move> {
        self.mv
    }

    pub fn prior(&self) -> f32 {
        f32::from_bits(self.prior_bits.load(Ordering::Relaxed))
    }

    pub fn set_prior(&self, prior: f32) {
        self.prior_bits.store(prior.to_bits(), Ordering::Relaxed);
    }

    pub fn init_eval(&self) -> f32 {
        self.init_eval
    }

    pub fn visits(&self) -> u32 {
        self.visits.load(Ordering::Relaxed)
    }

    pub fn virtual_loss(&self) -> i32 {
        self.virtual_loss.load(Ordering::Relaxed)
    }

    pub fn white_eval_sum(&self) -> f64 {
        f64::from_bits(self.white_eval_sum_bits.load(Ordering::Relaxed))
    }

    pub fn is_active(&self) -> bool {
        self.status.load(Ordering::Relaxed) == ACTIVE
    }

    pub fn set_active(&self, active: bool) {
        self.status
            .store(if active { ACTIVE } else { PRUNED }, Ordering::Relaxed);
    }

    pub fn has_children(&self) -> bool {
        self.has_children.load(Ordering::Acquire)
    }

    /// Total node count of this subtree, including `self`. Used to seed
    /// `node_count` correctly when a `think()` call adopts a previously
    /// grown tree via `find_new_root` instead of starting from a bare root.
    pub fn subtree_size(&self) -> u64 {
        if !self.has_children() {
            return 1;
        }
        1 + self.children().iter().map(|c| c.subtree_size()).sum::<u64>()
    }

    /// Reads the published children. Panics (via `debug_assert!`) if called
    /// before `has_children()` is true, in debug builds only — callers are
    /// expected to have already checked.
    pub fn children(&self) -> &[Box<Node>] {
        debug_assert!(self.has_children());
        unsafe { &*self.children.get() }
    }

    /// Mutable access for operations that only ever run with no worker
    /// threads active: the post-join sort in `think()`'s step 5, root
    /// Dirichlet noise, and root proportional randomization.
    pub fn children_mut(&self) -> &mut Vec<Box<Node>> {
        unsafe { &mut *self.children.get() }
    }

    pub fn add_virtual_loss(&self) {
        self.virtual_loss.fetch_add(VIRTUAL_LOSS_COUNT, Ordering::Relaxed);
    }

    pub fn undo_virtual_loss(&self) {
        self.virtual_loss.fetch_sub(VIRTUAL_LOSS_COUNT, Ordering::Relaxed);
    }

    /// Atomically increments `visits` and adds `eval` (a white-perspective
    /// probability) to `white_eval_sum`, via a relaxed compare-exchange loop
    /// since there is no native atomic f64 add.
    pub fn update(&self, eval: f32) {
        self.visits.fetch_add(1, Ordering::Relaxed);
        let mut current = self.white_eval_sum_bits.load(Ordering::Relaxed);
        loop {
            let new = f64::from_bits(current) + eval as f64;
            match self.white_eval_sum_bits.compare_exchange_weak(
                current,
                new.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(prev) => current = prev,
            }
        }
    }

    /// Overwrites `visits`/`white_eval_sum` with a transposition table's
    /// recorded statistics. Used only when the TT holds
    /// strictly more visits than this node, which is the only case the
    /// caller invokes this in.
    pub fn seed_from_tt(&self, visits: u32, eval_sum: f64) {
        self.visits.store(visits, Ordering::Relaxed);
        self.white_eval_sum_bits
            .store(eval_sum.to_bits(), Ordering::Relaxed);
    }

    /// Returns the evaluation of this node from `color`'s point of view,
    /// falling back to `parent_init_eval` (flipped to `color`) while this
    /// node is unvisited and carries no virtual loss.
    pub fn eval(&self, color: Color, parent_init_eval: f32) -> f32 {
        let visits = self.visits.load(Ordering::Relaxed) as i64;
        let vl = self.virtual_loss.load(Ordering::Relaxed) as i64;
        let combined = visits + vl;
        let white_score = if combined > 0 {
            let sum = self.white_eval_sum();
            let adjusted = if color == Color::Black {
                sum + vl as f64
            } else {
                sum
            };
            (adjusted / combined as f64) as f32
        } else {
            parent_init_eval
        };
        if color == Color::Black {
            1.0 - white_score
        } else {
            white_score
        }
    }

    /// Expands a leaf. Returns the leaf's
    /// white-perspective eval on success; `None` if another thread is
    /// already expanding, the position has no legal moves (caller treats it
    /// as terminal), or the evaluator failed.
    pub fn create_children(
        &self,
        node_count: &AtomicU64,
        history: &BoardHistory,
        evaluator: &dyn Evaluator,
    ) -> Option<f32> {
        if self.has_children() {
            return None;
        }
        {
            let mut expanding = self.is_expanding.lock().unwrap();
            if self.has_children() || *expanding {
                return None;
            }
            *expanding = true;
        }

        let outcome = (|| {
            let eval_result = evaluator.evaluate(history).ok()?;
            let pos = history.cur();
            let legal = pos.legal_moves();
            if legal.is_empty() {
                return None;
            }
            let color = pos.side_to_move();
            let white_value = if color == Color::Black {
                1.0 - eval_result.value
            } else {
                eval_result.value
            };

            let mut move_priors: Vec<(Move, f32)> = legal
                .into_iter()
                .map(|mv| {
                    let prior = eval_result
                        .priors
                        .iter()
                        .find(|(m, _)| *m == mv)
                        .map(|(_, p)| *p)
                        .unwrap_or(0.0);
                    (mv, prior)
                })
                .collect();

            let sum: f32 = move_priors.iter().map(|(_, p)| p).sum();
            if sum > 1e-6 {
                for (_, p) in move_priors.iter_mut() {
                    *p /= sum;
                }
            } else {
                let uniform = 1.0 / move_priors.len() as f32;
                for (_, p) in move_priors.iter_mut() {
                    *p = uniform;
                }
            }
            move_priors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            let children: Vec<Box<Node>> = move_priors
                .into_iter()
                .map(|(mv, prior)| Box::new(Node::new(Some(mv), prior, white_value)))
                .collect();
            let added = children.len() as u64;

            unsafe {
                *self.children.get() = children;
            }
            self.has_children.store(true, Ordering::Release);
            node_count.fetch_add(added, Ordering::Relaxed);
            Some(white_value)
        })();

        *self.is_expanding.lock().unwrap() = false;
        outcome
    }

    /// PUCT selection with first-play urgency.
    /// `color` is the side to move *at this node* (the one choosing among
    /// `self`'s children).
    pub fn uct_select_child<'a>(&'a self, color: Color, is_root: bool, root_noise_applied: bool, config: &Config) -> &'a Node {
        let children = self.children();
        let parent_visits: u64 = children.iter().map(|c| c.visits() as u64).sum();
        let numerator = (parent_visits as f32).sqrt();

        let total_visited_prior: f32 = children
            .iter()
            .filter(|c| c.visits() > 0)
            .map(|c| c.prior())
            .sum();

        let fpu_reduction = if is_root && root_noise_applied {
            0.0
        } else {
            config.fpu_reduction * total_visited_prior.sqrt()
        };

        let raw_parent_eval = if config.fpu_dynamic_eval && parent_visits > 0 {
            let white_sum: f64 = children.iter().map(|c| c.white_eval_sum()).sum();
            let visits_only: u64 = children.iter().map(|c| c.visits() as u64).sum();
            let white_eval = (white_sum / visits_only.max(1) as f64) as f32;
            if color == Color::Black {
                1.0 - white_eval
            } else {
                white_eval
            }
        } else if color == Color::Black {
            1.0 - self.init_eval
        } else {
            self.init_eval
        };
        let fpu_eval = raw_parent_eval - fpu_reduction;

        let mut best: Option<&Node> = None;
        let mut best_score = f32::NEG_INFINITY;
        for child in children.iter() {
            if !child.is_active() {
                continue;
            }
            let visits = child.visits();
            let q = if visits > 0 {
                child.eval(color, self.init_eval)
            } else {
                fpu_eval
            };
            let u = config.puct * child.prior() * numerator / (1.0 + visits as f32);
            let score = q + u;
            if score > best_score {
                best_score = score;
                best = Some(child);
            }
        }
        best.expect("uct_select_child called with no ACTIVE child")
    }

    /// Root-only Dirichlet noise. `rng` is caller-supplied so a seeded
    /// `config.rng_seed` search reproduces the same noise draw.
    pub fn apply_dirichlet_noise(&self, epsilon: f32, alpha: f32, rng: &mut impl Rng) {
        let children = self.children_mut();
        let n = children.len();
        if n == 0 {
            return;
        }
        let Ok(dirichlet) = Dirichlet::new(&vec![alpha as f64; n]) else {
            return;
        };
        let noise = dirichlet.sample(rng);
        if noise.iter().sum::<f64>() < 1e-12 {
            return;
        }
        for (child, eta) in children.iter().zip(noise) {
            let prior = child.prior();
            child.set_prior((1.0 - epsilon) * prior + epsilon * eta as f32);
        }
    }

    /// Root-only proportional randomization for self-play. Swaps the sampled
    /// child into index 0. `rng` is caller-supplied so a seeded
    /// `config.rng_seed` search reproduces the same draw.
    pub fn randomize_first_proportionally(
        &self,
        tau: f32,
        color: Color,
        config: &Config,
        rng: &mut impl Rng,
    ) {
        let children = self.children_mut();
        if children.len() < 2 {
            return;
        }
        let parent_visits: u64 = children.iter().map(|c| c.visits() as u64).sum();
        if parent_visits == 0 {
            return;
        }
        let best_eval = children
            .iter()
            .map(|c| c.eval(color, c.init_eval()))
            .fold(f32::NEG_INFINITY, f32::max);
        let best_visits = children.iter().map(|c| c.visits()).max().unwrap_or(0);

        let weights: Vec<f32> = children
            .iter()
            .map(|c| {
                let within_eval =
                    (best_eval - c.eval(color, c.init_eval())).abs() <= config.rand_eval_maxdiff;
                let within_visits =
                    c.visits() as f32 >= config.rand_visit_floor * best_visits as f32;
                if within_eval && within_visits && parent_visits > 0 {
                    (c.visits() as f32 / parent_visits as f32).powf(1.0 / tau.max(1e-6))
                } else {
                    0.0
                }
            })
            .collect();
        let total: f32 = weights.iter().sum();
        if total <= 0.0 {
            return;
        }
        let mut pick = rng.random::<f32>() * total;
        let mut index = 0;
        for (i, w) in weights.iter().enumerate() {
            if pick < *w {
                index = i;
                break;
            }
            pick -= *w;
            index = i;
        }
        children.swap(0, index);
    }

    /// Root re-use: searches `new_history` backwards for the position
    /// `prev_root` was grown from (identified by `prev_root_full_key`),
    /// then walks the recorded moves from there forward through
    /// `prev_root`'s tree, transferring ownership of the matching subtree
    /// so it becomes the new root. Returns `None` if that position is no
    /// longer in `new_history`, or if the tree never explored one of the
    /// moves played since — the caller then discards `prev_root` and
    /// starts a fresh tree.
    pub fn find_new_root(
        prev_root: Box<Node>,
        prev_root_full_key: u64,
        new_history: &BoardHistory,
    ) -> Option<Box<Node>> {
        let start = new_history
            .positions()
            .iter()
            .rposition(|p| p.full_key() == prev_root_full_key)?;
        let moves = new_history.moves_since(start);

        let mut root = prev_root;
        for &mv in moves {
            if !root.has_children() {
                return None;
            }
            let children = std::mem::take(root.children_mut());
            let matched = children.into_iter().find(|c| c.mv() == Some(mv))?;
            root = matched;
        }
        root.mv = None;
        Some(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_loss_round_trips_to_zero() {
        let node = Node::new(None, 1.0, 0.5);
        node.add_virtual_loss();
        node.add_virtual_loss();
        node.undo_virtual_loss();
        node.undo_virtual_loss();
        assert_eq!(node.virtual_loss(), 0);
    }

    #[test]
    fn update_accumulates_visits_and_eval_in_bounds() {
        let node = Node::new(None, 1.0, 0.5);
        node.update(0.8);
        node.update(0.2);
        assert_eq!(node.visits(), 2);
        let avg = node.white_eval_sum() / node.visits() as f64;
        assert!((0.0..=1.0).contains(&avg));
    }

    #[test]
    fn unvisited_child_falls_back_to_parent_init_eval() {
        let node = Node::new(None, 1.0, 0.7);
        let white = node.eval(Color::White, 0.7);
        let black = node.eval(Color::Black, 0.7);
        assert!((white - 0.7).abs() < 1e-6);
        assert!((black - 0.3).abs() < 1e-6);
    }

    /// With the default (non-dynamic) FPU and Black to move, the unvisited
    /// fallback must be computed on the flipped (Black-relative) eval, not
    /// the raw white-perspective `init_eval`. `init_eval = 0.9` (White
    /// heavily favored) makes the two conventions disagree enough to flip
    /// the winning child: correctly flipped, the visited child's middling
    /// Q (0.5) beats the pessimistic unvisited fallback (0.1); left
    /// unflipped, the unvisited child's falsely optimistic fallback (0.9)
    /// would win instead.
    #[test]
    fn black_to_move_fpu_fallback_uses_flipped_parent_eval() {
        let root = Node::new(None, 1.0, 0.9);
        let visited_mv: Move = "e2e4".parse().unwrap();
        let unvisited_mv: Move = "d2d4".parse().unwrap();
        let visited = Box::new(Node::new(Some(visited_mv), 0.5, 0.9));
        visited.update(0.5);
        let unvisited = Box::new(Node::new(Some(unvisited_mv), 0.5, 0.9));
        unsafe {
            *root.children.get() = vec![visited, unvisited];
        }
        root.has_children.store(true, Ordering::Release);

        let config = Config {
            fpu_reduction: 0.0,
            fpu_dynamic_eval: false,
            ..Config::default()
        };

        let selected = root.uct_select_child(Color::Black, false, false, &config);
        assert_eq!(selected.mv(), Some(visited_mv));
    }

    #[test]
    fn find_new_root_adopts_previously_explored_subtree() {
        use crate::position::BoardHistory;

        let mut history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let prev_root_full_key = history.cur().full_key();

        let e4: Move = "e2e4".parse().unwrap();
        let d4: Move = "d2d4".parse().unwrap();
        let explored = Box::new(Node::new(Some(e4), 0.5, 0.5));
        explored.update(0.6);
        let unexplored = Box::new(Node::new(Some(d4), 0.5, 0.5));

        let prev_root = Box::new(Node::new(None, 1.0, 0.5));
        unsafe {
            *prev_root.children.get() = vec![explored, unexplored];
        }
        prev_root.has_children.store(true, Ordering::Release);

        history.make_move(e4);

        let reused = Node::find_new_root(prev_root, prev_root_full_key, &history)
            .expect("e2e4 was previously explored");
        assert_eq!(reused.mv(), None);
        assert_eq!(reused.visits(), 1);
    }

    #[test]
    fn find_new_root_returns_none_when_move_never_explored() {
        use crate::position::BoardHistory;

        let mut history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let prev_root_full_key = history.cur().full_key();
        let prev_root = Box::new(Node::new(None, 1.0, 0.5));

        let e4: Move = "e2e4".parse().unwrap();
        history.make_move(e4);

        assert!(Node::find_new_root(prev_root, prev_root_full_key, &history).is_none());
    }

    #[test]
    fn find_new_root_returns_none_when_position_not_in_history() {
        use crate::position::BoardHistory;

        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let prev_root = Box::new(Node::new(None, 1.0, 0.5));

        assert!(Node::find_new_root(prev_root, 0xDEAD_BEEF, &history).is_none());
    }
}
