//! Search Engine — the top-level `think` loop, the per-worker
//! `play_simulation` descent, stop conditions, periodic pruning and the
//! best-move rule.
//!
//! This engine always runs the same algorithm (PUCT + virtual loss +
//! neural eval), so there is no pluggable expansion/simulation policy to
//! select between; `Search` is a small owning struct that bundles the
//! pieces a `think()` call needs (a transposition table and an evaluator)
//! rather than reaching for process-wide globals.
//!
//! Worker concurrency uses `std::thread::scope` to bound N-1 spawned
//! threads plus the calling thread around a shared `AtomicBool` stop flag
//! and `AtomicU64` playout counter, since every worker here mutates one
//! shared tree rather than draining an independent work queue.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use cozy_chess::Color;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Config;
use crate::evaluator::Evaluator;
use crate::node::Node;
use crate::policy_index::PolicyIndex;
use crate::position::{BoardHistory, Move};
use crate::training::TrainingRecorder;
use crate::tt::TranspositionTable;

/// The result of one `play_simulation` descent: a white-perspective
/// probability to back up, or nothing if the simulation contributed no
/// statistics this round.
type SimResult = Option<f32>;

/// Time budget for one `think()` call, in milliseconds from entry. Supplied
/// by an external time manager (out of scope ); `None` means
/// "search until another stop condition fires".
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeBudget {
    pub optimum_ms: Option<u64>,
    pub maximum_ms: Option<u64>,
}

/// Outcome of one `think()` call. `root_moves` is every root child's move
/// and visit count after the search stopped, sorted by the same best-move
/// comparator as `best_move` — useful for UCI `info` lines and for tests
/// that check the full visit distribution. `tree`/`tree_full_key` identify
/// the grown root; pass both back into the next `think()` call's
/// `prev_tree` to let `find_new_root` reuse the matching subtree instead of
/// rebuilding from scratch.
pub struct SearchOutput {
    pub best_move: Option<Move>,
    pub playouts: u64,
    pub root_moves: Vec<(Move, u32)>,
    pub tree: Box<Node>,
    pub tree_full_key: u64,
}

/// Owns the pieces a search needs across its lifetime: the transposition
/// table and the evaluator capability. Each `think()` call either adopts a
/// prior root via `Node::find_new_root` (when the caller passes one in and
/// the played moves stayed inside the previously explored subtree) or grows
/// a fresh tree.
pub struct Search<'a> {
    tt: &'a TranspositionTable,
    evaluator: &'a dyn Evaluator,
}

impl<'a> Search<'a> {
    pub fn new(tt: &'a TranspositionTable, evaluator: &'a dyn Evaluator) -> Self {
        Search { tt, evaluator }
    }

    /// Runs one search from `history.cur()` — the top-level loop.
    /// `stop` lets a caller request early termination (e.g. a UCI `stop`
    /// command); `self_play` selects whether Dirichlet noise/proportional
    /// randomization are applied per `config`. `recorder`/`policy_index` are
    /// only consulted when `self_play` is true. `prev_tree`, if supplied, is
    /// the `(tree, tree_full_key)` pair returned by an earlier `think()`
    /// call on an ancestor position; `find_new_root` adopts the matching
    /// subtree when the moves played since then stayed inside it, otherwise
    /// a fresh tree is grown.
    #[allow(clippy::too_many_arguments)]
    pub fn think(
        &self,
        history: &BoardHistory,
        config: &Config,
        budget: TimeBudget,
        stop: &AtomicBool,
        self_play: bool,
        recorder: Option<(&mut TrainingRecorder, &PolicyIndex)>,
        prev_tree: Option<(Box<Node>, u64)>,
    ) -> SearchOutput {
        let reused = prev_tree
            .and_then(|(prev_root, prev_full_key)| Node::find_new_root(prev_root, prev_full_key, history));
        let root = reused.unwrap_or_else(|| Node::new_root(self.evaluator_root_eval(history)));
        let node_count = AtomicU64::new(root.subtree_size());
        let playouts = AtomicU64::new(0);
        let root_color = history.cur().side_to_move();
        let mut rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let root_pos = history.cur();
        let root_is_terminal =
            root_pos.is_draw() || root_pos.is_stalemate() || root_pos.legal_moves().is_empty();
        let root_eval = if root_is_terminal {
            None
        } else if root.has_children() {
            Some(root.init_eval())
        } else {
            root.create_children(&node_count, history, self.evaluator)
        };
        let root_noise_applied = if root_eval.is_some() && config.noise {
            root.apply_dirichlet_noise(config.noise_epsilon, config.noise_alpha, &mut rng);
            true
        } else {
            false
        };

        if !root.has_children() {
            return SearchOutput {
                best_move: None,
                playouts: 0,
                root_moves: Vec::new(),
                tree: root,
                tree_full_key: history.cur().full_key(),
            };
        }

        let started = Instant::now();
        let worker_count = config.num_threads.max(1);

        std::thread::scope(|scope| {
            for _ in 1..worker_count {
                scope.spawn(|| {
                    self.worker_loop(
                        &root,
                        root_color,
                        history,
                        &node_count,
                        &playouts,
                        config,
                        budget,
                        stop,
                        started,
                        root_noise_applied,
                    );
                });
            }
            self.worker_loop(
                &root,
                root_color,
                history,
                &node_count,
                &playouts,
                config,
                budget,
                stop,
                started,
                root_noise_applied,
            );
        });

        let total_playouts = playouts.load(Ordering::Relaxed);

        sort_children_by_best_move_rule(&root, root_color);

        if self_play {
            if let Some((recorder, policy_index)) = recorder {
                recorder.record(history, &root, self.evaluator, policy_index);
            }
            if total_playouts > 0 && config.randomize {
                let tau = tempdecay_tau(config, history.moves().len());
                root.randomize_first_proportionally(tau, root_color, config, &mut rng);
            }
        }

        let best = resign_filtered_best(&root, root_color, config, total_playouts);
        let root_moves = root
            .children()
            .iter()
            .filter_map(|c| c.mv().map(|mv| (mv, c.visits())))
            .collect();
        let tree_full_key = history.cur().full_key();
        SearchOutput {
            best_move: best,
            playouts: total_playouts,
            root_moves,
            tree: root,
            tree_full_key,
        }
    }

    /// A cheap initial value for the root node, used only as the FPU
    /// fallback before the root is ever evaluated; any evaluator failure at
    /// this stage just leaves it at the neutral 0.5 and the subsequent
    /// `create_children` call will surface the same failure again.
    fn evaluator_root_eval(&self, history: &BoardHistory) -> f32 {
        match self.evaluator.evaluate(history) {
            Ok(result) => {
                let color = history.cur().side_to_move();
                if color == Color::Black {
                    1.0 - result.value
                } else {
                    result.value
                }
            }
            Err(_) => 0.5,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn worker_loop(
        &self,
        root: &Node,
        root_color: Color,
        history: &BoardHistory,
        node_count: &AtomicU64,
        playouts: &AtomicU64,
        config: &Config,
        budget: TimeBudget,
        stop: &AtomicBool,
        started: Instant,
        root_noise_applied: bool,
    ) {
        let mut last_prune = Instant::now();
        loop {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            if node_count.load(Ordering::Relaxed) >= config.max_nodes {
                return;
            }
            if playouts.load(Ordering::Relaxed) >= config.max_playouts {
                return;
            }
            let elapsed_ms = started.elapsed().as_millis() as u64;
            if let Some(maximum) = budget.maximum_ms {
                if elapsed_ms >= maximum {
                    return;
                }
            }
            let decided = only_one_active_child(root);
            if decided {
                return;
            }
            if let Some(optimum) = budget.optimum_ms {
                if elapsed_ms >= optimum && best_child_sufficiently_ahead(root) {
                    return;
                }
            }

            if last_prune.elapsed() >= Duration::from_millis(250) {
                prune_hopeless_children(root, root_color, playouts.load(Ordering::Relaxed), config);
                last_prune = Instant::now();
            }

            let mut sim_history = history.shallow_clone();
            let result = self.play_simulation(
                &mut sim_history,
                root,
                root_color,
                node_count,
                config,
                root_noise_applied,
                true,
            );
            if result.is_some() {
                playouts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// One root-to-leaf descent, expansion and root-ward backup. `node` is a borrow that stays valid for the whole
    /// search; recursion depth is bounded by game length.
    #[allow(clippy::too_many_arguments)]
    fn play_simulation(
        &self,
        history: &mut BoardHistory,
        node: &Node,
        node_color: Color,
        node_count: &AtomicU64,
        config: &Config,
        root_noise_applied: bool,
        is_root: bool,
    ) -> SimResult {
        let hash = history.cur().key();
        self.tt.sync(hash, node);
        node.add_virtual_loss();

        let result = if !node.has_children() {
            let pos = history.cur();
            if pos.is_draw() || pos.is_stalemate() || pos.legal_moves().is_empty() {
                let board_score = if pos.is_checkmate() {
                    if pos.side_to_move() == Color::Black {
                        1
                    } else {
                        -1
                    }
                } else {
                    0
                };
                Some(match board_score {
                    s if s > 0 => 1.0,
                    s if s < 0 => 0.0,
                    _ => 0.5,
                })
            } else if node_count.load(Ordering::Relaxed) < crate::config::MAX_TREE_SIZE {
                node.create_children(node_count, history, self.evaluator)
            } else {
                tracing::debug!(
                    node_count = node_count.load(Ordering::Relaxed),
                    cap = crate::config::MAX_TREE_SIZE,
                    "tree size cap reached, scoring leaf without expansion"
                );
                self.evaluator
                    .evaluate(history)
                    .ok()
                    .map(|eval_result| {
                        if pos.side_to_move() == Color::Black {
                            1.0 - eval_result.value
                        } else {
                            eval_result.value
                        }
                    })
            }
        } else {
            let child = node.uct_select_child(node_color, is_root, root_noise_applied, config);
            let mv = child.mv().expect("non-root children always carry a move");
            history.make_move(mv);
            let child_color = history.cur().side_to_move();
            self.play_simulation(
                history,
                child,
                child_color,
                node_count,
                config,
                root_noise_applied,
                false,
            )
        };

        if let Some(eval) = result {
            node.update(eval);
        }
        node.undo_virtual_loss();
        self.tt.update(hash, node);
        result
    }
}

fn only_one_active_child(root: &Node) -> bool {
    if !root.has_children() {
        return false;
    }
    root.children().iter().filter(|c| c.is_active()).count() <= 1
}

/// True when the most-visited ACTIVE child has accumulated enough visits
/// that no other ACTIVE child could match it even if it received every
/// playout from here on — the "best child is sufficiently ahead" test the
/// `optimum` time budget uses.
fn best_child_sufficiently_ahead(root: &Node) -> bool {
    if !root.has_children() {
        return false;
    }
    let mut top_two = root
        .children()
        .iter()
        .filter(|c| c.is_active())
        .map(|c| c.visits())
        .sorted_by_key(|&v| std::cmp::Reverse(v));
    let Some(leader_visits) = top_two.next() else {
        return false;
    };
    let runner_up = top_two.next().unwrap_or(0);
    leader_visits > runner_up
}

/// Marks children that cannot catch the current leader within the
/// remaining playout budget as `PRUNED`. A
/// child catches up only by accumulating 100% of whatever playouts remain,
/// so any child whose visits plus all remaining playouts still falls short
/// of the leader's current visits is hopeless.
fn prune_hopeless_children(root: &Node, _color: Color, playouts_so_far: u64, config: &Config) {
    if !root.has_children() {
        return;
    }
    let children = root.children();
    if children.is_empty() {
        return;
    }
    let leader_visits = children.iter().map(|c| c.visits()).max().unwrap_or(0);
    let remaining = config.max_playouts.saturating_sub(playouts_so_far);
    for child in children.iter() {
        if !child.is_active() {
            continue;
        }
        if child.visits() == leader_visits {
            continue;
        }
        let ceiling = child.visits() as u64 + remaining;
        if ceiling < leader_visits as u64 {
            child.set_active(false);
        }
    }
}

/// Stable three-key comparator: visits
/// descending; ties at zero visits broken by prior descending; ties at
/// nonzero visits broken by eval at `color` descending.
fn sort_children_by_best_move_rule(root: &Node, color: Color) {
    if !root.has_children() {
        return;
    }
    let children = root.children_mut();
    children.sort_by(|a, b| {
        b.visits().cmp(&a.visits()).then_with(|| {
            if a.visits() == 0 {
                b.prior()
                    .partial_cmp(&a.prior())
                    .unwrap_or(std::cmp::Ordering::Equal)
            } else {
                b.eval(color, b.init_eval())
                    .partial_cmp(&a.eval(color, a.init_eval()))
                    .unwrap_or(std::cmp::Ordering::Equal)
            }
        })
    });
}

/// Self-play temperature decay: full temperature for the first
/// `config.tempdecay` plies, then greedy (tau -> 0, i.e. effectively 1.0
/// since `randomize_first_proportionally` treats very small tau as
/// near-deterministic via the `powf(1/tau)` exponent).
fn tempdecay_tau(config: &Config, ply: usize) -> f32 {
    if config.tempdecay == 0 || ply >= config.tempdecay as usize {
        1e-3
    } else {
        1.0
    }
}

/// Applies the (optional) resignation policy: if the best child's eval at
/// `color` is below `config.resignpct` and enough visits have accumulated,
/// returns `None` ("resign") instead of the sorted-best move.
fn resign_filtered_best(
    root: &Node,
    color: Color,
    config: &Config,
    playouts: u64,
) -> Option<Move> {
    if !root.has_children() {
        return None;
    }
    let children = root.children();
    let best = children.first()?;
    if config.resignpct > 0 && playouts >= config.min_resign_moves as u64 {
        let threshold = config.resignpct as f32 / 100.0;
        let eval = best.eval(color, best.init_eval());
        if eval < threshold {
            tracing::warn!(eval, threshold, "resignation threshold crossed");
            return None;
        }
    }
    best.mv()
}

/// Walks the principal variation from `root`, following the same
/// best-move comparator at each step.
pub fn principal_variation(root: &Node, mut color: Color) -> Vec<Move> {
    let mut pv = Vec::new();
    let mut node = root;
    loop {
        if !node.has_children() || node.children().is_empty() {
            break;
        }
        sort_children_by_best_move_rule(node, color);
        let next = &node.children()[0];
        let Some(mv) = next.mv() else { break };
        pv.push(mv);
        node = next;
        color = !color;
    }
    pv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{FixedEvaluator, UniformEvaluator};
    use crate::position::BoardHistory;

    fn cfg(num_threads: usize, max_playouts: u64) -> Config {
        Config {
            num_threads,
            max_playouts,
            ..Config::default()
        }
    }

    /// 200 single-threaded playouts from the start position with a
    /// uniform mock evaluator yield exactly 200 playouts across exactly 20
    /// root children.
    #[test]
    fn start_position_yields_exact_playout_count() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let tt = TranspositionTable::with_capacity(1024);
        let evaluator = UniformEvaluator;
        let search = Search::new(&tt, &evaluator);
        let stop = AtomicBool::new(false);

        let output = search.think(&history, &cfg(1, 200), TimeBudget::default(), &stop, false, None, None);

        assert_eq!(output.playouts, 200);
        assert_eq!(output.root_moves.len(), 20);
        let visit_sum: u32 = output.root_moves.iter().map(|(_, v)| v).sum();
        assert_eq!(visit_sum as u64, 200);
    }

    /// A king-only position is drawn by insufficient material; no children
    /// are ever created and every simulation backs up 0.5.
    #[test]
    fn insufficient_material_never_expands() {
        let history = BoardHistory::from_fen("8/8/8/4k3/8/8/2K5/8 w - - 0 1").unwrap();
        let tt = TranspositionTable::with_capacity(1024);
        let evaluator = UniformEvaluator;
        let search = Search::new(&tt, &evaluator);
        let stop = AtomicBool::new(false);

        let output = search.think(&history, &cfg(1, 50), TimeBudget::default(), &stop, false, None, None);

        assert_eq!(output.best_move, None);
        assert_eq!(output.playouts, 0);
    }

    /// From a mate-in-one position, with a uniform mock evaluator,
    /// sufficient playouts make `Ra8` the most-visited root child.
    #[test]
    fn mate_in_one_prefers_mating_move() {
        let history = BoardHistory::from_fen("6k1/5ppp/8/8/8/8/5PPP/R5K1 w - - 0 1").unwrap();
        let tt = TranspositionTable::with_capacity(1024);
        let evaluator = UniformEvaluator;
        let search = Search::new(&tt, &evaluator);
        let stop = AtomicBool::new(false);

        let output = search.think(&history, &cfg(1, 2000), TimeBudget::default(), &stop, false, None, None);

        let mating_move: Move = "a1a8".parse().unwrap();
        assert_eq!(output.best_move, Some(mating_move));
    }

    /// A stalemate position yields no move and requires no playouts at all.
    #[test]
    fn stalemate_returns_no_move_with_zero_playouts() {
        let history = BoardHistory::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        let tt = TranspositionTable::with_capacity(1024);
        let evaluator = UniformEvaluator;
        let search = Search::new(&tt, &evaluator);
        let stop = AtomicBool::new(false);

        let output = search.think(&history, &cfg(1, 50), TimeBudget::default(), &stop, false, None, None);

        assert_eq!(output.best_move, None);
        assert_eq!(output.playouts, 0);
    }

    #[test]
    fn fixed_evaluator_drives_search_without_panicking() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let tt = TranspositionTable::with_capacity(1024);
        let evaluator = FixedEvaluator { value: 0.6 };
        let search = Search::new(&tt, &evaluator);
        let stop = AtomicBool::new(false);

        let output = search.think(&history, &cfg(1, 100), TimeBudget::default(), &stop, false, None, None);

        assert!(output.best_move.is_some());
        assert_eq!(output.playouts, 100);
    }

    /// `num_threads = 1` plus a fixed `rng_seed` must reproduce the exact
    /// same Dirichlet noise draw and proportional-randomization pick across
    /// repeated searches from the same position.
    #[test]
    fn rng_seed_makes_self_play_search_deterministic() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let tt = TranspositionTable::with_capacity(1024);
        let evaluator = UniformEvaluator;
        let search = Search::new(&tt, &evaluator);
        let stop = AtomicBool::new(false);
        let config = Config {
            num_threads: 1,
            max_playouts: 200,
            noise: true,
            randomize: true,
            rng_seed: Some(42),
            ..Config::default()
        };

        let first = search.think(&history, &config, TimeBudget::default(), &stop, true, None, None);
        let second = search.think(&history, &config, TimeBudget::default(), &stop, true, None, None);

        assert_eq!(first.best_move, second.best_move);
        assert_eq!(first.root_moves, second.root_moves);
    }

    /// Playing the move `think()` picked and searching again from there
    /// adopts the matching child as the new root instead of starting over:
    /// the reused root's visit count already reflects the playouts spent on
    /// it during the first call, on top of the second call's own playouts.
    #[test]
    fn think_reuses_subtree_across_root_relocation() {
        let history = BoardHistory::from_fen(
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        )
        .unwrap();
        let tt = TranspositionTable::with_capacity(1024);
        let evaluator = UniformEvaluator;
        let search = Search::new(&tt, &evaluator);
        let stop = AtomicBool::new(false);

        let first = search.think(&history, &cfg(1, 200), TimeBudget::default(), &stop, false, None, None);
        let best_move = first.best_move.expect("root should have a best move");
        let inherited_visits = first
            .tree
            .children()
            .iter()
            .find(|c| c.mv() == Some(best_move))
            .map(|c| c.visits())
            .expect("best move must be one of the root's children");
        assert!(inherited_visits > 0);

        let mut next_history = history.clone();
        next_history.make_move(best_move);

        let second = search.think(
            &next_history,
            &cfg(1, 50),
            TimeBudget::default(),
            &stop,
            false,
            None,
            Some((first.tree, first.tree_full_key)),
        );

        assert_eq!(second.tree.mv(), None);
        assert_eq!(second.tree.visits(), inherited_visits + second.playouts as u32);
    }
}
