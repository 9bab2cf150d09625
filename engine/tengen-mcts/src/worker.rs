//! Simulation workers and the backup engine.
//!
//! Each worker repeatedly snapshots the root under a short reader, deep
//! copies the root position, and descends the tree. Reaching an unexpanded
//! leaf it submits the position to the evaluation feeder and immediately
//! moves on; the feeder batches requests, runs the network, and performs
//! the expansion and backup on its own thread when results arrive.
//!
//! Virtual-loss accounting uses an entry-add discipline: a simulation adds
//! one unit to every node it enters, the root included. A simulation that
//! bounces off a node being expanded (`Fail`) leaves its units in place and
//! hands responsibility to the expander through the node's accumulated
//! counter; the expander later removes `1 + accumulated` units along its
//! path, which is the bounced simulations' path as well.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tengen_core::{Color, Position};
use tracing::{debug, error, warn};

use crate::config::SearchConfig;
use crate::evaluator::{EvalQuery, NetResult, Network, NUM_SYMMETRIES};
use crate::node::{Node, NodeAction};
use crate::tree::SearchTree;

/// One step of a recorded simulation path: the node entered and the edge
/// factor it was entered with (reserved weighting, currently 1.0).
pub(crate) struct PathEntry {
    pub node: Arc<Node>,
    pub factor: f64,
}

/// A leaf submitted to the network, carrying everything the backup needs.
pub(crate) struct EvalRequest<P: Position> {
    pub state: P,
    pub symmetry: u8,
    pub path: Vec<PathEntry>,
    pub pending: Arc<AtomicI32>,
}

/// State shared between the controller, the workers, and the feeder.
pub(crate) struct Shared<P: Position> {
    pub cfg: SearchConfig,
    pub tree: SearchTree<P>,
    pub network: Arc<dyn Network<P>>,
    pub eval_tx: Sender<EvalRequest<P>>,
    /// Workers simulate only while set.
    pub run: AtomicBool,
    /// Shutdown flag; workers and the feeder exit.
    pub terminate: AtomicBool,
    /// A network failure happened; the tree is poisoned until the next
    /// root advance.
    pub failed: AtomicBool,
    /// Release/acquire flag: once true, the root's children are readable.
    pub root_prepared: AtomicBool,
    pub playouts: AtomicI32,
    pub positions: AtomicI32,
    pub max_playouts: AtomicI32,
    pub max_visits: AtomicI32,
    pub park: Mutex<()>,
    pub cv: Condvar,
}

impl<P: Position> Shared<P> {
    pub fn new(
        cfg: SearchConfig,
        tree: SearchTree<P>,
        network: Arc<dyn Network<P>>,
        eval_tx: Sender<EvalRequest<P>>,
    ) -> Self {
        let max_playouts = cfg.max_playouts;
        let max_visits = cfg.max_visits;
        Self {
            cfg,
            tree,
            network,
            eval_tx,
            run: AtomicBool::new(false),
            terminate: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            root_prepared: AtomicBool::new(false),
            playouts: AtomicI32::new(0),
            positions: AtomicI32::new(0),
            max_playouts: AtomicI32::new(max_playouts),
            max_visits: AtomicI32::new(max_visits),
            park: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    /// Whether new simulations may start.
    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::Acquire)
            && !self.terminate.load(Ordering::Acquire)
            && !self.failed.load(Ordering::Acquire)
            && self.tree.within_budget()
    }

    /// Root visit count, read under a short reader.
    pub fn root_visits(&self) -> f64 {
        let guard = self.tree.read();
        guard.root.visits()
    }

    /// The budget-based termination check shared by workers and the
    /// controller. Workers pass `(0, 1)` so only the playout and visit
    /// caps apply.
    pub fn stop_thinking(&self, elapsed_centis: i64, budget_centis: i64) -> bool {
        self.playouts.load(Ordering::Acquire) >= self.max_playouts.load(Ordering::Acquire)
            || self.root_visits() as i64 >= self.max_visits.load(Ordering::Acquire) as i64
            || elapsed_centis >= budget_centis
    }

    pub fn notify_all(&self) {
        let _guard = self.park.lock().unwrap();
        self.cv.notify_all();
    }

    /// Abort the current search after a fatal evaluator error.
    pub fn fail_search(&self) {
        self.failed.store(true, Ordering::Release);
        self.run.store(false, Ordering::Release);
        self.notify_all();
    }
}

/// Terminal evaluation: win 1, loss 0, draw 0.5, Black's perspective.
pub(crate) fn eval_from_score(board_score: f32) -> f64 {
    if board_score > 0.0 {
        1.0
    } else if board_score < 0.0 {
        0.0
    } else {
        0.5
    }
}

/// Back up one completed simulation along its recorded path: one
/// (factor-weighted) visit and the evaluation at every node, while
/// unwinding this simulation's virtual loss plus `extra_vl` units per node
/// on behalf of simulations that bounced off the expanded leaf.
pub(crate) fn backup_path(path: &[PathEntry], eval_black: f64, extra_vl: u32) {
    let mut factor = 1.0;
    for entry in path.iter().rev() {
        factor *= entry.factor;
        entry.node.record_backup(eval_black, factor, 1 + extra_vl);
    }
}

/// Unwind virtual loss along a path without backing anything up (failed or
/// aborted simulations).
pub(crate) fn unwind_path(path: &[PathEntry], units: u32) {
    for entry in path.iter().rev() {
        entry.node.remove_virtual_loss(units);
    }
}

/// Worker thread body: simulate while allowed, park otherwise.
pub(crate) fn worker_loop<P: Position>(shared: Arc<Shared<P>>, index: usize) {
    let mut rng = ChaCha20Rng::seed_from_u64(shared.cfg.rng_seed.wrapping_add(index as u64));
    debug!(worker = index, "search worker started");
    loop {
        if shared.terminate.load(Ordering::Acquire) {
            return;
        }
        // An unprepared root always gets its preparation simulation, even
        // when a reused tree already satisfies the visit budget.
        let must_prepare = !shared.root_prepared.load(Ordering::Acquire);
        if shared.is_running() && (must_prepare || !shared.stop_thinking(0, 1)) {
            run_one(&shared, &mut rng);
        } else {
            let guard = shared.park.lock().unwrap();
            let _ = shared
                .cv
                .wait_timeout(guard, Duration::from_millis(10))
                .unwrap();
        }
    }
}

/// Start one simulation from the current root generation.
fn run_one<P: Position>(shared: &Arc<Shared<P>>, rng: &mut ChaCha20Rng) {
    let (root, state, pending) = {
        let guard = shared.tree.read();
        let pending = Arc::clone(&guard.pending);
        pending.fetch_add(1, Ordering::AcqRel);
        (Arc::clone(&guard.root), guard.rootstate.clone(), pending)
    };
    play_simulation(shared, state, root, pending, rng);
}

/// Descend from `root`, resolving each node's arbitration until the
/// simulation either submits a leaf for evaluation, backs up a terminal or
/// cached value, or bounces out.
pub(crate) fn play_simulation<P: Position>(
    shared: &Arc<Shared<P>>,
    mut state: P,
    root: Arc<Node>,
    pending: Arc<AtomicI32>,
    rng: &mut ChaCha20Rng,
) {
    let mut path: Vec<PathEntry> = Vec::with_capacity(64);
    let mut node = root;
    let mut factor = 1.0f64;
    let mut is_root = true;

    loop {
        node.add_virtual_loss(1);
        path.push(PathEntry {
            node: Arc::clone(&node),
            factor,
        });

        // Two consecutive passes end the game: score deterministically
        // instead of consulting the network.
        if state.passes() >= 2 {
            let eval = eval_from_score(state.final_score());
            backup_path(&path, eval, 0);
            shared.playouts.fetch_add(1, Ordering::AcqRel);
            pending.fetch_sub(1, Ordering::AcqRel);
            return;
        }

        // An unprepared root is reclaimed for one forced evaluation even
        // when its children survived a root advance.
        let force_write = is_root && !shared.root_prepared.load(Ordering::Acquire);
        match node.arbitrate(force_write) {
            NodeAction::Write => {
                let symmetry = shared
                    .cfg
                    .fixed_symmetry
                    .unwrap_or_else(|| rng.gen_range(0..NUM_SYMMETRIES));
                let request = EvalRequest {
                    state,
                    symmetry,
                    path,
                    pending,
                };
                if let Err(send_error) = shared.eval_tx.send(request) {
                    error!("evaluation queue closed unexpectedly");
                    abort_request(send_error.0);
                    shared.fail_search();
                }
                return;
            }
            NodeAction::Fail => {
                // Our virtual loss stays on the path; the expander unwinds
                // it via the accumulated counter.
                pending.fetch_sub(1, Ordering::AcqRel);
                return;
            }
            NodeAction::Backup => {
                let eval = node.net_eval(Color::Black);
                backup_path(&path, eval, 0);
                shared.playouts.fetch_add(1, Ordering::AcqRel);
                pending.fetch_sub(1, Ordering::AcqRel);
                return;
            }
            NodeAction::Read => {
                let selected = node.select_child(state.to_move(), is_root, &shared.cfg);
                node.release_reader();
                match selected {
                    Some((child, child_factor)) => {
                        let mv = child.get_move();
                        state.play(mv);
                        if !mv.is_pass() && state.superko() {
                            child.invalidate();
                            unwind_path(&path, 1);
                            pending.fetch_sub(1, Ordering::AcqRel);
                            return;
                        }
                        node = child;
                        factor = child_factor;
                    }
                    None => {
                        // Every child is dead; fall back to this node's
                        // cached evaluation.
                        warn!("all children invalidated, backing up cached eval");
                        let eval = node.net_eval(Color::Black);
                        backup_path(&path, eval, 0);
                        shared.playouts.fetch_add(1, Ordering::AcqRel);
                        pending.fetch_sub(1, Ordering::AcqRel);
                        return;
                    }
                }
            }
        }
        is_root = false;
    }
}

// ============================================================================
// Backup engine (evaluation feeder)
// ============================================================================

/// Expand a leaf from its network result and back the evaluation up the
/// recorded path. Runs on the feeder thread, which owns the WRITE side of
/// the leaf's arbitration until `finish_expansion`.
pub(crate) fn apply_net_result<P: Position>(
    shared: &Arc<Shared<P>>,
    request: EvalRequest<P>,
    result: NetResult,
) {
    let EvalRequest {
        state,
        path,
        pending,
        ..
    } = request;
    let Some(last) = path.last() else {
        return;
    };
    let leaf = Arc::clone(&last.node);

    let is_root = path.len() == 1;
    let first_visit = leaf.first_visit();
    let min_psa_ratio = if is_root {
        0.0
    } else {
        shared.tree.min_psa_ratio()
    };

    leaf.create_children(&result, &state, min_psa_ratio);
    // Publishes the children and collects the virtual loss injected by
    // simulations that bounced while we were expanding.
    let accumulated = leaf.finish_expansion();

    if first_visit {
        backup_path(&path, result.winrate as f64, accumulated);
    } else {
        unwind_path(&path, 1 + accumulated);
    }

    if is_root && !shared.root_prepared.load(Ordering::Acquire) {
        // Late results for a detached root must not prepare the new one.
        let is_current_root = {
            let guard = shared.tree.read();
            Arc::ptr_eq(&guard.root, &leaf)
        };
        if is_current_root {
            prepare_root(shared, &leaf);
            shared.root_prepared.store(true, Ordering::Release);
            shared.notify_all();
        }
    }

    shared.playouts.fetch_add(1, Ordering::AcqRel);
    shared.positions.fetch_add(1, Ordering::AcqRel);
    pending.fetch_sub(1, Ordering::AcqRel);
}

/// Drop an in-flight request without backing up (shutdown or network
/// failure): the leaf is poisoned and all virtual loss is unwound,
/// including what bounced simulations left behind.
pub(crate) fn abort_request<P: Position>(request: EvalRequest<P>) {
    let EvalRequest { path, pending, .. } = request;
    if let Some(last) = path.last() {
        let accumulated = last.node.abort_expansion();
        unwind_path(&path, 1 + accumulated);
    }
    pending.fetch_sub(1, Ordering::AcqRel);
}

/// Root preparation after its first expansion: optional Dirichlet noise
/// over the child priors.
fn prepare_root<P: Position>(shared: &Arc<Shared<P>>, root: &Arc<Node>) {
    if shared.cfg.noise {
        let mut rng = ChaCha20Rng::seed_from_u64(shared.cfg.rng_seed);
        root.apply_dirichlet_noise(
            shared.cfg.dirichlet_alpha,
            shared.cfg.dirichlet_epsilon,
            &mut rng,
        );
    }
}

/// Feeder thread body: batch queued leaves, run the network, dispatch
/// backups. Results that arrive after shutdown are dropped; a network
/// error aborts the search with everything unwound.
pub(crate) fn feeder_loop<P: Position>(shared: Arc<Shared<P>>, rx: Receiver<EvalRequest<P>>) {
    let batch_target = shared.cfg.eval_batch_size;
    let mut batch: Vec<EvalRequest<P>> = Vec::with_capacity(batch_target);

    loop {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(first) => batch.push(first),
            Err(RecvTimeoutError::Timeout) => {
                if shared.terminate.load(Ordering::Acquire) {
                    break;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        // Collect more requests without blocking, up to the batch size or a
        // short deadline, whichever comes first.
        let deadline = Instant::now() + Duration::from_micros(500);
        while batch.len() < batch_target {
            match rx.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                    std::thread::yield_now();
                }
            }
        }

        let queries: Vec<EvalQuery<P>> = batch
            .iter()
            .map(|r| EvalQuery {
                state: r.state.clone(),
                symmetry: r.symmetry,
            })
            .collect();

        match shared.network.evaluate_batch(&queries) {
            Ok(results) if results.len() == batch.len() => {
                for (request, result) in batch.drain(..).zip(results) {
                    if shared.terminate.load(Ordering::Acquire) {
                        abort_request(request);
                    } else {
                        apply_net_result(&shared, request, result);
                    }
                }
            }
            Ok(results) => {
                error!(
                    expected = batch.len(),
                    got = results.len(),
                    "network returned a mismatched batch, aborting search"
                );
                shared.fail_search();
                for request in batch.drain(..) {
                    abort_request(request);
                }
            }
            Err(e) => {
                error!(error = %e, "network evaluation failed, aborting search");
                shared.fail_search();
                for request in batch.drain(..) {
                    abort_request(request);
                }
            }
        }
    }

    // Unwind anything still queued at shutdown.
    while let Ok(request) = rx.try_recv() {
        abort_request(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockPosition;
    use tengen_core::Move;
    use tengen_core::Vertex;

    fn entry(node: &Arc<Node>) -> PathEntry {
        node.add_virtual_loss(1);
        PathEntry {
            node: Arc::clone(node),
            factor: 1.0,
        }
    }

    fn make_chain(len: usize) -> (Arc<crate::tree::TreeSize>, Vec<Arc<Node>>) {
        let size = Arc::new(crate::tree::TreeSize::new());
        let nodes = (0..len)
            .map(|i| Node::new(Move::Play(Vertex(i as u16)), 0.5, Arc::clone(&size)))
            .collect();
        (size, nodes)
    }

    #[test]
    fn test_eval_from_score() {
        assert_eq!(eval_from_score(10.0), 1.0);
        assert_eq!(eval_from_score(-0.5), 0.0);
        assert_eq!(eval_from_score(0.0), 0.5);
    }

    #[test]
    fn test_backup_path_balances_virtual_loss() {
        let (_size, nodes) = make_chain(3);
        let path: Vec<PathEntry> = nodes.iter().map(entry).collect();

        for node in &nodes {
            assert_eq!(node.virtual_loss(), 1);
        }
        backup_path(&path, 0.75, 0);

        for node in &nodes {
            assert_eq!(node.virtual_loss(), 0);
            assert_eq!(node.visits(), 1.0);
            assert!((node.value_sum() - 0.75).abs() < 1e-9);
        }
    }

    #[test]
    fn test_backup_path_unwinds_bounced_simulations() {
        let (_size, nodes) = make_chain(2);
        // Expander descends once, two other simulations bounce off the
        // leaf: three units of virtual loss on every path node.
        let path: Vec<PathEntry> = nodes.iter().map(entry).collect();
        for node in &nodes {
            node.add_virtual_loss(2);
        }

        backup_path(&path, 0.5, 2);

        for node in &nodes {
            assert_eq!(node.virtual_loss(), 0);
            // Bounced simulations contribute no visits.
            assert_eq!(node.visits(), 1.0);
        }
    }

    #[test]
    fn test_backup_path_factor_product() {
        let (_size, nodes) = make_chain(3);
        let mut path: Vec<PathEntry> = nodes.iter().map(entry).collect();
        // Edge factors multiply from each node down to the leaf.
        path[1].factor = 0.5;
        path[2].factor = 0.5;

        backup_path(&path, 1.0, 0);

        assert_eq!(nodes[2].visits(), 0.5);
        assert_eq!(nodes[1].visits(), 0.25);
        assert_eq!(nodes[0].visits(), 0.25);
        assert!((nodes[0].value_sum() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_unwind_path_removes_only_virtual_loss() {
        let (_size, nodes) = make_chain(2);
        let path: Vec<PathEntry> = nodes.iter().map(entry).collect();

        unwind_path(&path, 1);

        for node in &nodes {
            assert_eq!(node.virtual_loss(), 0);
            assert_eq!(node.visits(), 0.0);
        }
    }

    #[test]
    fn test_abort_request_unwinds_accumulated() {
        let (_size, nodes) = make_chain(1);
        let leaf = &nodes[0];
        let path = vec![entry(leaf)];
        assert_eq!(leaf.arbitrate(false), NodeAction::Write);
        // One simulation bounces while the expansion is in flight.
        leaf.add_virtual_loss(1);
        assert_eq!(leaf.arbitrate(false), NodeAction::Fail);

        let pending = Arc::new(AtomicI32::new(1));
        abort_request(EvalRequest {
            state: MockPosition::empty(3),
            symmetry: 0,
            path,
            pending: Arc::clone(&pending),
        });

        assert_eq!(leaf.virtual_loss(), 0);
        assert!(!leaf.valid());
        assert_eq!(pending.load(Ordering::Acquire), 0);
    }
}
