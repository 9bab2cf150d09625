//! The search controller.
//!
//! [`UctSearch`] owns the worker pool, the evaluation feeder, and the tree.
//! `think` advances the root to the caller's position, lets the workers
//! run against the time/visit/playout budget, then picks a move with the
//! pass and resign heuristics applied. `ponder` searches the same position
//! until input arrives.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::Serialize;
use tengen_core::{Centis, Color, Move, Position, TimeControl};
use tracing::{debug, info, warn};

use crate::analysis::{dump_progress, dump_stats, output_analysis, principal_variation, AnalysisSink};
use crate::config::{plan_memory, ConfigError, PassFlag, SearchConfig, TimeManagement};
use crate::evaluator::Network;
use crate::node::Node;
use crate::tree::{AdvanceOutcome, SearchTree};
use crate::worker::{feeder_loop, worker_loop, EvalRequest, Shared};

/// Playout/visit limits at or above this value mean "unlimited". Held at
/// half the integer range so concurrent overshoot cannot overflow.
pub const UNLIMITED_PLAYOUTS: i32 = i32::MAX / 2;

/// Snapshot of search counters, serializable for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SearchStats {
    pub playouts: i32,
    pub positions: i32,
    pub root_visits: f64,
    pub tree_nodes: usize,
}

/// Visit distribution over root children at the end of a search, handed to
/// the training hook.
#[derive(Debug, Clone)]
pub struct RootSample {
    pub to_move: Color,
    pub winrate: f64,
    pub visits: Vec<(Move, f64)>,
}

/// Hook point for training-data collection. The engine only calls it; what
/// happens to the sample is an external concern.
pub trait TrainingRecorder<P: Position>: Send {
    fn record(&self, state: &P, sample: RootSample);
}

/// Parallel MCTS driver over a shared tree.
pub struct UctSearch<P: Position> {
    shared: Arc<Shared<P>>,
    workers: Vec<JoinHandle<()>>,
    feeder: Option<JoinHandle<()>>,
    time_control: Box<dyn TimeControl>,
    last_rootstate: Option<P>,
    rng: ChaCha20Rng,
    analysis_sink: Option<AnalysisSink>,
    training: Option<Box<dyn TrainingRecorder<P>>>,
}

impl<P: Position> UctSearch<P> {
    /// Spin up the worker pool and the evaluation feeder. Workers park
    /// until the first `think` or `ponder`.
    pub fn new(
        cfg: SearchConfig,
        initial_state: P,
        network: Arc<dyn Network<P>>,
        time_control: Box<dyn TimeControl>,
    ) -> Self {
        let (eval_tx, eval_rx) = crossbeam_channel::unbounded::<EvalRequest<P>>();
        let tree = SearchTree::new(initial_state);
        let rng = ChaCha20Rng::seed_from_u64(cfg.rng_seed);
        let num_threads = cfg.num_threads;
        let shared = Arc::new(Shared::new(cfg, tree, network, eval_tx));

        let feeder = {
            let shared = Arc::clone(&shared);
            std::thread::spawn(move || feeder_loop(shared, eval_rx))
        };
        let workers = (0..num_threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(shared, index))
            })
            .collect();

        Self {
            shared,
            workers,
            feeder: Some(feeder),
            time_control,
            last_rootstate: None,
            rng,
            analysis_sink: None,
            training: None,
        }
    }

    /// Install the sink that receives `info move ...` analysis lines.
    pub fn set_analysis_sink(&mut self, sink: AnalysisSink) {
        self.analysis_sink = Some(sink);
    }

    /// Install the training-sample hook.
    pub fn set_training_recorder(&mut self, recorder: Box<dyn TrainingRecorder<P>>) {
        self.training = Some(recorder);
    }

    pub fn set_playout_limit(&self, playouts: i32) {
        let clamped = playouts.clamp(1, UNLIMITED_PLAYOUTS);
        self.shared.max_playouts.store(clamped, Ordering::Release);
    }

    pub fn set_visit_limit(&self, visits: i32) {
        let clamped = visits.clamp(1, UNLIMITED_PLAYOUTS);
        self.shared.max_visits.store(clamped, Ordering::Release);
    }

    /// Apply a total memory budget, splitting it between the network cache
    /// and the tree. Fails without touching anything if the split leaves
    /// too little room for the tree.
    pub fn set_max_memory(
        &self,
        max_memory: usize,
        cache_ratio_percent: usize,
    ) -> Result<(), ConfigError> {
        let plan = plan_memory(
            max_memory,
            cache_ratio_percent,
            self.shared.network.base_memory(),
        )?;
        self.shared.tree.set_max_tree_bytes(plan.max_tree_bytes);
        info!(
            tree_mib = plan.max_tree_bytes / (1024 * 1024),
            cache_mib = plan.max_cache_bytes / (1024 * 1024),
            "memory budget applied"
        );
        Ok(())
    }

    pub fn stats(&self) -> SearchStats {
        SearchStats {
            playouts: self.shared.playouts.load(Ordering::Acquire),
            positions: self.shared.positions.load(Ordering::Acquire),
            root_visits: self.shared.root_visits(),
            tree_nodes: self.shared.tree.size().node_count(),
        }
    }

    /// Current principal variation from the root.
    pub fn principal_variation(&self) -> Vec<Move> {
        let (root, mut state) = {
            let guard = self.shared.tree.read();
            (Arc::clone(&guard.root), guard.rootstate.clone())
        };
        principal_variation(&mut state, &root)
    }

    /// Search the given position and return the move to play.
    pub fn think(&mut self, game_state: &P, color: Color, passflag: PassFlag) -> Move {
        let start = Instant::now();
        self.update_root(game_state, Some(color));

        let (board_size, movenum, game_over) = {
            let guard = self.shared.tree.read();
            (
                guard.rootstate.board_size(),
                guard.rootstate.movenum(),
                guard.rootstate.passes() >= 2,
            )
        };
        if game_over {
            // Two passes already ended the game: concede or pass out on
            // the final count alone.
            self.shared.run.store(false, Ordering::Release);
            let rootstate = {
                let guard = self.shared.tree.read();
                guard.rootstate.clone()
            };
            let relative_score = match color {
                Color::Black => rootstate.final_score() as f64,
                Color::White => -rootstate.final_score() as f64,
            };
            self.last_rootstate = Some(rootstate);
            let resign_allowed = passflag != PassFlag::NoResign
                && self.shared.cfg.resign_threshold().is_some();
            return if relative_score < 0.0 && resign_allowed {
                Move::Resign
            } else {
                Move::Pass
            };
        }
        let time_for_move = self
            .time_control
            .max_time_for_move(board_size, color, movenum);
        info!(
            "thinking at most {:.1} seconds",
            time_for_move as f64 / 100.0
        );

        let mut last_update: Centis = 0;
        let mut last_output: Centis = 0;
        loop {
            std::thread::sleep(Duration::from_millis(20));
            let elapsed = centis_since(start);

            let interval = self.shared.cfg.analyze_interval_centis;
            if interval > 0 && elapsed - last_output > interval {
                last_output = elapsed;
                self.emit_analysis();
            }
            // Progress dump every couple of seconds.
            if elapsed - last_update > 250 {
                last_update = elapsed;
                let guard = self.shared.tree.read();
                dump_progress(
                    &guard.rootstate,
                    &guard.root,
                    self.shared.playouts.load(Ordering::Acquire),
                    self.shared.positions.load(Ordering::Acquire),
                );
            }

            let keep_running = self.shared.is_running()
                && !self.shared.stop_thinking(elapsed, time_for_move)
                && self.have_alternate_moves(elapsed, time_for_move);
            if !keep_running {
                break;
            }
        }
        self.shared.run.store(false, Ordering::Release);

        let (root, rootstate) = {
            let guard = self.shared.tree.read();
            (Arc::clone(&guard.root), guard.rootstate.clone())
        };

        // Reactivate everything the time manager pruned.
        if let Some(children) = root.read_children() {
            for child in children.iter() {
                child.set_active(true);
            }
        }

        if !root.has_children() {
            self.last_rootstate = Some(rootstate);
            return Move::Pass;
        }

        if let Some(recorder) = &self.training {
            recorder.record(&rootstate, root_sample(&rootstate, &root));
        }

        let best = self.select_best_move(&rootstate, &root, passflag);

        dump_stats(&rootstate, &root);
        let elapsed = centis_since(start).max(1);
        let stats = self.stats();
        info!(
            visits = stats.root_visits,
            nodes = stats.tree_nodes,
            playouts = stats.playouts,
            playouts_per_s = stats.playouts as f64 * 100.0 / elapsed as f64,
            positions_per_s = stats.positions as f64 * 100.0 / elapsed as f64,
            "search finished"
        );

        self.last_rootstate = Some(rootstate);
        best
    }

    /// Search the given position until input arrives or the budget runs
    /// out. `input_pending` is polled between slices.
    pub fn ponder<F: Fn() -> bool>(&mut self, game_state: &P, allow_analysis: bool, input_pending: F) {
        let start = Instant::now();
        self.update_root(game_state, None);

        let mut last_output: Centis = 0;
        let mut keep_running;
        loop {
            std::thread::sleep(Duration::from_millis(20));
            let interval = self.shared.cfg.analyze_interval_centis;
            if allow_analysis && interval > 0 {
                let elapsed = centis_since(start);
                if elapsed - last_output > interval {
                    last_output = elapsed;
                    self.emit_analysis();
                }
            }
            keep_running = self.shared.is_running() && !self.shared.stop_thinking(0, 1);
            if input_pending() || !keep_running {
                break;
            }
        }

        // A ponder that exhausted its budget disarms; one interrupted by
        // input leaves the search armed when configured to.
        let armed = keep_running && self.shared.cfg.ponder_keeps_search_armed;
        self.shared.run.store(armed, Ordering::Release);

        let (root, rootstate) = {
            let guard = self.shared.tree.read();
            (Arc::clone(&guard.root), guard.rootstate.clone())
        };
        root.sort_children(rootstate.to_move());
        dump_stats(&rootstate, &root);
        self.last_rootstate = Some(rootstate);
    }

    // ------------------------------------------------------------------
    // Root management
    // ------------------------------------------------------------------

    /// Bring the tree up to the caller's position and restart the workers.
    /// Blocks until the first simulation has (re)prepared the root.
    fn update_root(&mut self, game_state: &P, to_move: Option<Color>) {
        // Pause new simulations while counters and flags are reset.
        self.shared.run.store(false, Ordering::Release);

        let mut new_state = game_state.clone();
        if let Some(color) = to_move {
            new_state.set_to_move(color);
        }
        let force_fresh = self.shared.failed.swap(false, Ordering::AcqRel);
        if force_fresh {
            warn!("previous search failed, discarding the tree");
        }

        let outcome =
            self.shared
                .tree
                .advance_root(new_state, self.last_rootstate.as_ref(), force_fresh);
        debug!(?outcome, "root update");
        if outcome == AdvanceOutcome::Reused {
            debug!("going forward in the tree");
        }
        // Cleared to prevent accidental reuse; re-established when a move
        // is actually produced.
        self.last_rootstate = None;

        self.shared.playouts.store(0, Ordering::Release);
        self.shared.positions.store(0, Ordering::Release);
        self.shared.root_prepared.store(false, Ordering::Release);
        self.shared.run.store(true, Ordering::Release);
        self.shared.notify_all();

        // A finished game (two passes) has nothing to prepare: simulations
        // score it terminally without ever expanding the root.
        let terminal = {
            let guard = self.shared.tree.read();
            guard.rootstate.passes() >= 2
        };
        if terminal {
            return;
        }

        // The first worker to reach the root expands (or refreshes) it and
        // flips `root_prepared`. Bail out rather than spin if the search
        // cannot make progress (network failure, shutdown, memory cap).
        while !self.shared.root_prepared.load(Ordering::Acquire) {
            if !self.shared.is_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    // ------------------------------------------------------------------
    // Termination
    // ------------------------------------------------------------------

    /// Upper bound on playouts the remaining budget can still deliver.
    fn est_playouts_left(&self, elapsed_centis: Centis, time_for_move: Centis) -> i32 {
        let playouts = self.shared.playouts.load(Ordering::Acquire);
        let max_playouts = self.shared.max_playouts.load(Ordering::Acquire);
        let max_visits = self.shared.max_visits.load(Ordering::Acquire);
        let playouts_left = (max_playouts - playouts)
            .min(max_visits - self.shared.root_visits() as i32)
            .max(0);

        // Wait for at least one second and 100 playouts so the playout
        // rate is reliable.
        if elapsed_centis < 100 || playouts < 100 {
            return playouts_left;
        }
        let playout_rate = playouts as f64 / elapsed_centis as f64;
        let time_left = (time_for_move - elapsed_centis).max(0);
        playouts_left.min((playout_rate * time_left as f64).ceil() as i32)
    }

    /// Deactivate root children that can no longer catch up with the visit
    /// leader in the remaining time. Returns how many fell behind.
    fn prune_noncontenders(
        &self,
        root: &Arc<Node>,
        elapsed_centis: Centis,
        time_for_move: Centis,
        prune: bool,
    ) -> usize {
        let Some(children) = root.read_children() else {
            return 0;
        };
        let n_first = children
            .iter()
            .filter(|c| c.valid())
            .map(|c| c.visits() as i32)
            .max()
            .unwrap_or(0);
        let min_required_visits = n_first - self.est_playouts_left(elapsed_centis, time_for_move);

        let mut pruned = 0;
        for child in children.iter().filter(|c| c.valid()) {
            let has_enough_visits = child.visits() as i32 >= min_required_visits;
            if prune {
                child.set_active(has_enough_visits);
            }
            if !has_enough_visits {
                pruned += 1;
            }
        }
        pruned
    }

    /// Whether more than one root child is still worth searching. When a
    /// single contender remains the search can stop early, subject to the
    /// time-management policy and whether saved time carries over.
    fn have_alternate_moves(&self, elapsed_centis: Centis, time_for_move: Centis) -> bool {
        let tm = self.shared.cfg.time_manage;
        if tm == TimeManagement::Off {
            return true;
        }
        let prune = tm != TimeManagement::NoPruning;

        let (root, color) = {
            let guard = self.shared.tree.read();
            (Arc::clone(&guard.root), guard.rootstate.to_move())
        };
        let child_count = root.read_children().map_or(0, |c| c.len());
        if child_count == 0 {
            return true;
        }
        let pruned = self.prune_noncontenders(&root, elapsed_centis, time_for_move, prune);
        if pruned < child_count - 1 {
            return true;
        }

        // One contender left. If the saved time cannot be banked anyway,
        // keep thinking unless fast time management asks for quick replies.
        if !self.time_control.can_accumulate_time(color)
            || self.shared.max_playouts.load(Ordering::Acquire) < UNLIMITED_PLAYOUTS
        {
            if tm != TimeManagement::Fast {
                return true;
            }
        }
        if time_for_move - elapsed_centis > 50 {
            info!(
                "{:.1}s left, stopping early",
                (time_for_move - elapsed_centis) as f64 / 100.0
            );
        }
        false
    }

    // ------------------------------------------------------------------
    // Best move
    // ------------------------------------------------------------------

    /// Pick the move to play: most-visited child, adjusted by the pass and
    /// resign heuristics.
    fn select_best_move(&mut self, rootstate: &P, root: &Arc<Node>, passflag: PassFlag) -> Move {
        let color = rootstate.to_move();

        // Make sure best is first.
        root.sort_children(color);

        // Early game: randomize among the top children proportionally to
        // their visit counts.
        if rootstate.movenum() < self.shared.cfg.random_cnt {
            root.randomize_first_proportionally(&mut self.rng);
        }

        let (mut best_move, mut best_eval) = {
            let children = match root.read_children() {
                Some(c) if !c.is_empty() => c,
                _ => return Move::Pass,
            };
            let first = &children[0];
            let eval = if first.first_visit() {
                0.5
            } else {
                first.raw_eval(color)
            };
            (first.get_move(), eval)
        };

        if passflag == PassFlag::NoPass {
            if best_move == Move::Pass {
                match self.nopass_child(root) {
                    Some(nopass) => {
                        info!("preferring not to pass");
                        best_move = nopass.get_move();
                        best_eval = if nopass.first_visit() {
                            1.0
                        } else {
                            nopass.raw_eval(color)
                        };
                    }
                    None => info!("pass is the only acceptable move"),
                }
            }
        } else if !self.shared.cfg.dumb_pass {
            let relative_score = match color {
                Color::Black => rootstate.final_score() as f64,
                Color::White => -rootstate.final_score() as f64,
            };
            if best_move == Move::Pass {
                // Passing is on top. Check whether passing wins on the
                // final count before ending the game with it.
                if relative_score < 0.0 {
                    info!("passing loses, looking for an alternative");
                    match self.nopass_child(root) {
                        Some(nopass) => {
                            best_move = nopass.get_move();
                            best_eval = if nopass.first_visit() {
                                1.0
                            } else {
                                nopass.raw_eval(color)
                            };
                        }
                        None => info!("no alternative to passing"),
                    }
                } else if relative_score > 0.0 {
                    info!("passing wins");
                } else {
                    // A drawn count: take a searched alternative that
                    // believes it can do better than a draw.
                    if let Some(nopass) = self.nopass_child(root) {
                        if !nopass.first_visit() && nopass.raw_eval(color) > 0.5 {
                            info!("avoiding pass, an alternative might win");
                            best_move = nopass.get_move();
                            best_eval = nopass.raw_eval(color);
                        }
                    }
                }
            } else if rootstate.last_move() == Some(Move::Pass) {
                // The opponent passed and we did not consider answering
                // with a pass. Should the game end right here?
                if relative_score > 0.0 {
                    info!("passing wins, passing out");
                    best_move = Move::Pass;
                } else if relative_score == 0.0 && best_eval < 0.5 {
                    info!("passing draws and the position looks bad, passing out");
                    best_move = Move::Pass;
                }
            }
        }

        if best_move != Move::Pass && self.should_resign(rootstate, passflag, best_eval) {
            info!(
                "eval ({:.2}%) looks hopeless, resigning",
                100.0 * best_eval
            );
            best_move = Move::Resign;
        }

        best_move
    }

    /// Best non-pass child, children assumed sorted best-first.
    fn nopass_child(&self, root: &Arc<Node>) -> Option<Arc<Node>> {
        let children = root.read_children()?;
        children
            .iter()
            .find(|c| c.get_move() != Move::Pass && c.valid())
            .cloned()
    }

    fn should_resign(&self, rootstate: &P, passflag: PassFlag, best_eval: f64) -> bool {
        if passflag == PassFlag::NoResign {
            return false;
        }
        let Some(resign_threshold) = self.shared.cfg.resign_threshold() else {
            return false;
        };

        let board_area = rootstate.board_area();
        let movenum = rootstate.movenum();
        if movenum <= board_area / 4 {
            // Too early in the game to resign.
            return false;
        }
        if best_eval > resign_threshold {
            return false;
        }

        let color = rootstate.to_move();
        let handicap = rootstate.handicap();
        let is_default_resign = self.shared.cfg.resign_pct < 0;
        if handicap > 0 && color == Color::White && is_default_resign {
            let handicap_threshold = resign_threshold / (1 + handicap) as f64;
            // Blend toward the standard threshold over the opening.
            let blend_ratio = (movenum as f64 / (0.6 * board_area as f64)).min(1.0);
            let blended =
                blend_ratio * resign_threshold + (1.0 - blend_ratio) * handicap_threshold;
            if best_eval > blended {
                return false;
            }
        }

        true
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Arc<Shared<P>> {
        &self.shared
    }

    fn emit_analysis(&self) {
        let Some(sink) = &self.analysis_sink else {
            return;
        };
        let guard = self.shared.tree.read();
        let root = Arc::clone(&guard.root);
        let rootstate = guard.rootstate.clone();
        drop(guard);
        output_analysis(&rootstate, &root, sink);
    }
}

impl<P: Position> Drop for UctSearch<P> {
    fn drop(&mut self) {
        self.shared.terminate.store(true, Ordering::Release);
        self.shared.run.store(false, Ordering::Release);
        self.shared.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        if let Some(feeder) = self.feeder.take() {
            let _ = feeder.join();
        }
        self.shared.tree.wait_destroyers();
    }
}

fn centis_since(start: Instant) -> Centis {
    (start.elapsed().as_millis() / 10) as Centis
}

fn root_sample<P: Position>(rootstate: &P, root: &Arc<Node>) -> RootSample {
    let color = rootstate.to_move();
    let visits = root
        .read_children()
        .map(|children| {
            children
                .iter()
                .map(|c| (c.get_move(), c.visits()))
                .collect()
        })
        .unwrap_or_default();
    RootSample {
        to_move: color,
        winrate: root.raw_eval(color),
        visits,
    }
}
