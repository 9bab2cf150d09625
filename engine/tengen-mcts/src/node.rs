//! MCTS tree node with lock-free statistics and a spin reader/writer lock.
//!
//! A node records the move that entered it, the network prior for that
//! edge, and the statistics accumulated by backups. Stats are plain atomics
//! so concurrent simulations never block each other; the only exclusion in
//! the hot path is the expansion transition, arbitrated by a packed state
//! word (see [`Node::arbitrate`]).
//!
//! Visit counts and value sums are stored as f64 bit patterns: backups are
//! weighted by the multiplicative edge factor on the recorded path, so
//! increments are not necessarily integral.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use rand::Rng;
use tengen_core::{Color, Move, Position};

use crate::config::SearchConfig;
use crate::evaluator::NetResult;
use crate::tree::TreeSize;

// ============================================================================
// Atomic float helpers
// ============================================================================

/// f64 stored as bits in an AtomicU64, with add via CAS loop.
#[derive(Debug)]
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn fetch_add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }
}

/// f32 stored as bits in an AtomicU32. Store/load only.
#[derive(Debug)]
pub(crate) struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Release)
    }
}

// ============================================================================
// Reader/writer spin lock
// ============================================================================

const WRITER: u32 = 128;

/// Reader/writer counter packed into a single atomic.
///
/// Values 0..=127 count readers; 128 means an exclusive writer; values
/// above 128 appear transiently while a writer waits for readers to drain.
/// Readers never touch the kernel and impose no ordering on each other,
/// which is what keeps many concurrent selectors cheap. Only one thread
/// (the controller) may ever attempt the writer side.
#[derive(Debug)]
pub struct NodeLock(AtomicU32);

impl Default for NodeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeLock {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    pub fn acquire_reader(&self) {
        loop {
            if self.0.load(Ordering::Relaxed) >= WRITER {
                std::hint::spin_loop();
                continue;
            }
            if self.0.fetch_add(1, Ordering::Acquire) >= WRITER {
                // A writer arrived between the check and the add; undo.
                self.0.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
            return;
        }
    }

    pub fn release_reader(&self) {
        self.0.fetch_sub(1, Ordering::Release);
    }

    pub fn acquire_writer(&self) {
        self.0.fetch_add(WRITER, Ordering::Acquire);
        while self.0.load(Ordering::Acquire) != WRITER {
            std::hint::spin_loop();
        }
    }

    pub fn release_writer(&self) {
        self.0.fetch_sub(WRITER, Ordering::Release);
    }
}

// ============================================================================
// Expansion state machine
// ============================================================================

// The expansion state and the accumulated-virtual-loss counter share one
// word: state in the top two bits, the counter below. The expanding writer
// publishes its children and collects the accumulated count with a single
// `swap`, so a concurrent FAIL bump is either consumed by that swap or
// rejected by its CAS and retried; none can be stranded.
const STATE_SHIFT: u32 = 30;
const ACC_VL_MASK: u32 = (1 << STATE_SHIFT) - 1;
const IDLE: u32 = 0 << STATE_SHIFT;
const WRITING: u32 = 1 << STATE_SHIFT;
const READY: u32 = 2 << STATE_SHIFT;
const INVALID: u32 = 3 << STATE_SHIFT;

/// Decision handed to a simulation arriving at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAction {
    /// The caller owns the expansion: submit the position to the network.
    Write,
    /// Another simulation is expanding this node; the caller's virtual loss
    /// has been recorded for the expander to unwind. Bounce out.
    Fail,
    /// Node is expanded; a reader is now held and the caller must descend
    /// (and release the reader after selecting a child).
    Read,
    /// Node is dead (superko or all children invalid); back up its cached
    /// evaluation without descending.
    Backup,
}

// ============================================================================
// Node
// ============================================================================

/// One node of the search tree. Edges to children are owned `Arc`s; a
/// simulation's recorded path keeps detached subtrees alive until their
/// backups land.
pub struct Node {
    mv: Move,
    /// Prior probability of the edge into this node. Mutated only by root
    /// noise injection.
    policy: AtomicF32,
    /// Cached network winrate (Black's perspective), set at expansion.
    net_eval: AtomicF32,
    visits: AtomicF64,
    /// Factor-weighted sum of backed-up Black winrates.
    value_sum: AtomicF64,
    /// In-flight simulations currently below this node.
    virtual_loss: AtomicU32,
    /// Packed expansion state and accumulated virtual loss.
    expand: AtomicU32,
    /// Inactive root children are skipped by selection (time-management
    /// pruning); reset before a move is emitted.
    active: AtomicBool,
    lock: NodeLock,
    children: UnsafeCell<Vec<Arc<Node>>>,
    size: Arc<TreeSize>,
}

// Safety: `children` is written exactly once, while `expand` reads WRITING
// and the writing thread is the only one that won the IDLE -> WRITING CAS.
// Readers observe the vector only after the releasing swap to READY, and
// hold a reader on `lock` while iterating; in-place reordering happens only
// under the writer side of `lock`. All other fields are atomics.
unsafe impl Send for Node {}
unsafe impl Sync for Node {}

impl Node {
    pub fn new(mv: Move, policy: f32, size: Arc<TreeSize>) -> Arc<Node> {
        size.register(1);
        Arc::new(Node {
            mv,
            policy: AtomicF32::new(policy),
            net_eval: AtomicF32::new(0.5),
            visits: AtomicF64::new(0.0),
            value_sum: AtomicF64::new(0.0),
            virtual_loss: AtomicU32::new(0),
            expand: AtomicU32::new(IDLE),
            active: AtomicBool::new(true),
            lock: NodeLock::new(),
            children: UnsafeCell::new(Vec::new()),
            size,
        })
    }

    #[inline]
    pub fn get_move(&self) -> Move {
        self.mv
    }

    #[inline]
    pub fn policy(&self) -> f32 {
        self.policy.load()
    }

    #[inline]
    pub fn visits(&self) -> f64 {
        self.visits.load()
    }

    #[inline]
    pub fn first_visit(&self) -> bool {
        self.visits() == 0.0
    }

    #[inline]
    pub fn value_sum(&self) -> f64 {
        self.value_sum.load()
    }

    #[inline]
    pub fn virtual_loss(&self) -> u32 {
        self.virtual_loss.load(Ordering::Acquire)
    }

    /// Cached network winrate from the given color's perspective.
    #[inline]
    pub fn net_eval(&self, color: Color) -> f64 {
        let v = self.net_eval.load() as f64;
        match color {
            Color::Black => v,
            Color::White => 1.0 - v,
        }
    }

    /// Mean backed-up winrate from the given color's perspective.
    /// 0.5 before the first visit.
    pub fn raw_eval(&self, color: Color) -> f64 {
        let visits = self.visits();
        if visits == 0.0 {
            return 0.5;
        }
        let black = self.value_sum() / visits;
        match color {
            Color::Black => black,
            Color::White => 1.0 - black,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    #[inline]
    fn state(&self) -> u32 {
        self.expand.load(Ordering::Acquire) & !ACC_VL_MASK
    }

    #[inline]
    pub fn is_expanded(&self) -> bool {
        self.state() == READY
    }

    #[inline]
    pub fn valid(&self) -> bool {
        self.state() != INVALID
    }

    /// Mark this node dead. Selection skips it and arriving simulations get
    /// [`NodeAction::Backup`].
    pub fn invalidate(&self) {
        self.expand.store(INVALID, Ordering::Release);
    }

    #[inline]
    pub fn add_virtual_loss(&self, units: u32) {
        self.virtual_loss.fetch_add(units, Ordering::AcqRel);
    }

    #[inline]
    pub fn remove_virtual_loss(&self, units: u32) {
        let _ = self
            .virtual_loss
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(v.saturating_sub(units))
            });
    }

    /// Account one backup at this node: `weight` visits, `eval * weight`
    /// value, and `vl_units` of virtual loss unwound in the same RMW
    /// sequence.
    pub fn record_backup(&self, eval_black: f64, weight: f64, vl_units: u32) {
        self.visits.fetch_add(weight);
        self.value_sum.fetch_add(eval_black * weight);
        if vl_units > 0 {
            self.remove_virtual_loss(vl_units);
        }
    }

    /// Decide what an arriving simulation should do here.
    ///
    /// On [`NodeAction::Read`] a reader is held; the caller releases it
    /// after child selection. On [`NodeAction::Fail`] the caller's pending
    /// virtual loss has already been handed to the expander.
    ///
    /// `force_write` reclaims an already-expanded node for one more
    /// network evaluation; existing children and their statistics are
    /// kept. The controller uses this on a reused root so the first
    /// simulation after an advance refreshes and re-prepares it.
    pub fn arbitrate(&self, force_write: bool) -> NodeAction {
        loop {
            let word = self.expand.load(Ordering::Acquire);
            match word & !ACC_VL_MASK {
                INVALID => return NodeAction::Backup,
                READY => {
                    if force_write {
                        if self
                            .expand
                            .compare_exchange(word, WRITING, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                        {
                            return NodeAction::Write;
                        }
                        continue;
                    }
                    self.lock.acquire_reader();
                    // Invalidation may land while the reader is acquired.
                    if !self.valid() {
                        self.lock.release_reader();
                        return NodeAction::Backup;
                    }
                    return NodeAction::Read;
                }
                IDLE => {
                    if self
                        .expand
                        .compare_exchange(word, WRITING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return NodeAction::Write;
                    }
                }
                _ => {
                    // WRITING: hand our virtual loss to the expander. The
                    // CAS fails if the writer finished first, in which case
                    // the outer loop re-reads and descends normally.
                    if self
                        .expand
                        .compare_exchange(word, word + 1, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return NodeAction::Fail;
                    }
                }
            }
        }
    }

    pub fn release_reader(&self) {
        self.lock.release_reader();
    }

    /// Publish the children written during expansion and collect the
    /// virtual-loss units injected by simulations that bounced off the
    /// WRITING state. Single swap: nothing can be added after collection.
    pub fn finish_expansion(&self) -> u32 {
        let old = self.expand.swap(READY, Ordering::AcqRel);
        old & ACC_VL_MASK
    }

    /// Abort a failed expansion (network error). The node becomes INVALID;
    /// returns the accumulated virtual loss so the caller can unwind it.
    pub fn abort_expansion(&self) -> u32 {
        let old = self.expand.swap(INVALID, Ordering::AcqRel);
        old & ACC_VL_MASK
    }

    // ------------------------------------------------------------------
    // Children access
    // ------------------------------------------------------------------

    /// Iterate children under a reader. Returns `None` for unexpanded or
    /// invalid nodes.
    pub fn read_children(&self) -> Option<ChildrenGuard<'_>> {
        if self.state() != READY {
            return None;
        }
        self.lock.acquire_reader();
        if self.state() != READY {
            self.lock.release_reader();
            return None;
        }
        Some(ChildrenGuard { node: self })
    }

    #[inline]
    fn children_slice(&self) -> &[Arc<Node>] {
        // Caller holds a reader or the exclusive writer/expander.
        unsafe { &*self.children.get() }
    }

    pub fn has_children(&self) -> bool {
        self.read_children().map_or(false, |c| !c.is_empty())
    }

    /// Look up the child entered by `mv`.
    pub fn find_child(&self, mv: Move) -> Option<Arc<Node>> {
        let children = self.read_children()?;
        children.iter().find(|c| c.get_move() == mv).cloned()
    }

    /// The valid child with the most visits, for PV extraction.
    pub fn best_child_by_visits(&self) -> Option<Arc<Node>> {
        let children = self.read_children()?;
        children
            .iter()
            .filter(|c| c.valid())
            .max_by(|a, b| {
                a.visits()
                    .partial_cmp(&b.visits())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    /// Sort children best-first: visits descending, winrate as tie-break.
    /// Controller only; excludes readers while reordering.
    pub fn sort_children(&self, color: Color) {
        if self.state() != READY {
            return;
        }
        self.lock.acquire_writer();
        // Safety: exclusive writer held.
        let children = unsafe { &mut *self.children.get() };
        children.sort_by(|a, b| {
            let key_a = (a.visits(), a.raw_eval(color));
            let key_b = (b.visits(), b.raw_eval(color));
            key_b.partial_cmp(&key_a).unwrap_or(std::cmp::Ordering::Equal)
        });
        self.lock.release_writer();
    }

    /// Move a child chosen proportionally to visit counts to the front.
    /// Used to randomize the opening moves of a game.
    pub fn randomize_first_proportionally<R: Rng>(&self, rng: &mut R) {
        if self.state() != READY {
            return;
        }
        self.lock.acquire_writer();
        // Safety: exclusive writer held.
        let children = unsafe { &mut *self.children.get() };
        let total: f64 = children.iter().map(|c| c.visits()).sum();
        if total > 0.0 {
            let mut pick = rng.gen_range(0.0..total);
            let mut chosen = 0;
            for (i, child) in children.iter().enumerate() {
                pick -= child.visits();
                if pick <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            children.swap(0, chosen);
        }
        self.lock.release_writer();
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// PUCT child selection. The caller holds a reader (from
    /// [`NodeAction::Read`]).
    ///
    /// Returns the chosen child and the edge factor (reserved weighting,
    /// currently always 1.0), or `None` when every child is invalid or
    /// deactivated.
    pub fn select_child(
        &self,
        to_move: Color,
        is_root: bool,
        cfg: &SearchConfig,
    ) -> Option<(Arc<Node>, f64)> {
        let children = self.children_slice();

        let mut child_visits = 0.0f64;
        let mut visited_policy = 0.0f64;
        for child in children {
            if !child.valid() {
                continue;
            }
            let v = child.visits();
            child_visits += v;
            if v > 0.0 {
                visited_policy += child.policy() as f64;
            }
        }

        let numerator = child_visits.max(1.0).sqrt();
        let fpu_reduction = if is_root {
            cfg.fpu_root_reduction
        } else {
            cfg.fpu_reduction
        };
        // First-play urgency: start unvisited children slightly below the
        // parent's own evaluation, sinking as more priors get explored.
        let fpu_eval = self.net_eval(to_move) - fpu_reduction * visited_policy.sqrt();

        let mut best: Option<&Arc<Node>> = None;
        let mut best_score = f64::NEG_INFINITY;
        let mut best_policy = f64::NEG_INFINITY;
        for child in children {
            if !child.valid() {
                continue;
            }
            if is_root && !child.is_active() {
                continue;
            }
            let policy = child.policy() as f64;
            let visits = child.visits();
            let vl = child.virtual_loss() as f64;
            let q = if visits > 0.0 {
                let wins = match to_move {
                    Color::Black => child.value_sum(),
                    Color::White => visits - child.value_sum(),
                };
                (wins + cfg.virtual_loss_penalty * vl) / (visits + vl)
            } else {
                fpu_eval
            };
            let u = cfg.puct * policy * numerator / (1.0 + visits + vl);
            let score = q + u;
            if score > best_score || (score == best_score && policy > best_policy) {
                best = Some(child);
                best_score = score;
                best_policy = policy;
            }
        }

        best.map(|child| (Arc::clone(child), 1.0))
    }

    // ------------------------------------------------------------------
    // Expansion
    // ------------------------------------------------------------------

    /// Materialise children from a network result. Only the thread that won
    /// the WRITE arbitration may call this, before `finish_expansion`.
    ///
    /// The raw policy is filtered to the legal moves of `state`,
    /// renormalised, and children below `min_psa_ratio` times the best
    /// prior are dropped to bound fan-out. Children are created sorted by
    /// prior, descending. A re-expansion (forced root refresh) only
    /// updates the cached evaluation and keeps the existing children.
    pub fn create_children<P: Position>(
        &self,
        result: &NetResult,
        state: &P,
        min_psa_ratio: f64,
    ) {
        debug_assert_eq!(self.expand.load(Ordering::Acquire) & !ACC_VL_MASK, WRITING);

        self.net_eval.store(result.winrate);

        if !self.children_slice().is_empty() {
            return;
        }

        let area = state.board_area();
        let mut priors: Vec<(Move, f32)> = state
            .legal_vertices()
            .into_iter()
            .map(|v| {
                let p = result.policy.get(v.index()).copied().unwrap_or(0.0);
                (Move::Play(v), p)
            })
            .collect();
        priors.push((Move::Pass, result.policy.get(area).copied().unwrap_or(0.0)));

        let total: f32 = priors.iter().map(|(_, p)| p).sum();
        if total > 0.0 {
            for (_, p) in priors.iter_mut() {
                *p /= total;
            }
        } else {
            // Degenerate policy: fall back to uniform over legal moves.
            let uniform = 1.0 / priors.len() as f32;
            for (_, p) in priors.iter_mut() {
                *p = uniform;
            }
        }

        let max_psa = priors.iter().map(|(_, p)| *p).fold(0.0f32, f32::max);
        let threshold = (min_psa_ratio as f32) * max_psa;
        priors.retain(|(_, p)| *p >= threshold);
        priors.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let nodes: Vec<Arc<Node>> = priors
            .into_iter()
            .map(|(mv, p)| Node::new(mv, p, Arc::clone(&self.size)))
            .collect();

        // Safety: exclusive expander; no reader can observe the vector
        // before the releasing swap in `finish_expansion`.
        unsafe {
            *self.children.get() = nodes;
        }
    }

    /// Mix Dirichlet noise into the children's priors. Root only, called
    /// while the expander still owns the node.
    pub fn apply_dirichlet_noise<R: Rng>(&self, alpha: f64, epsilon: f64, rng: &mut R) {
        use rand_distr::{Distribution, Gamma};

        let children = self.children_slice();
        if children.is_empty() {
            return;
        }
        let gamma = match Gamma::new(alpha, 1.0) {
            Ok(g) => g,
            Err(_) => return,
        };
        let mut noise: Vec<f64> = (0..children.len()).map(|_| gamma.sample(rng)).collect();
        let total: f64 = noise.iter().sum();
        if total <= 0.0 {
            return;
        }
        for n in noise.iter_mut() {
            *n /= total;
        }
        for (child, n) in children.iter().zip(noise) {
            let mixed = (1.0 - epsilon) * child.policy() as f64 + epsilon * n;
            child.policy.store(mixed as f32);
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.size.release(1);
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("move", &self.mv)
            .field("visits", &self.visits())
            .field("policy", &self.policy())
            .field("virtual_loss", &self.virtual_loss())
            .finish_non_exhaustive()
    }
}

/// Reader guard over a node's children.
pub struct ChildrenGuard<'a> {
    node: &'a Node,
}

impl Deref for ChildrenGuard<'_> {
    type Target = [Arc<Node>];

    fn deref(&self) -> &Self::Target {
        self.node.children_slice()
    }
}

impl Drop for ChildrenGuard<'_> {
    fn drop(&mut self) {
        self.node.lock.release_reader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::MockPosition;
    use tengen_core::Vertex;

    fn test_size() -> Arc<TreeSize> {
        Arc::new(TreeSize::new())
    }

    fn uniform_result(area: usize) -> NetResult {
        NetResult {
            policy: vec![1.0 / (area + 1) as f32; area + 1],
            winrate: 0.5,
        }
    }

    #[test]
    fn test_lock_reader_counts() {
        let lock = NodeLock::new();
        lock.acquire_reader();
        lock.acquire_reader();
        lock.release_reader();
        lock.release_reader();
        lock.acquire_writer();
        lock.release_writer();
    }

    #[test]
    fn test_arbitrate_write_then_fail_then_read() {
        let size = test_size();
        let node = Node::new(Move::Pass, 1.0, Arc::clone(&size));

        assert_eq!(node.arbitrate(false), NodeAction::Write);
        // A second arrival while expanding bounces and hands over its loss.
        assert_eq!(node.arbitrate(false), NodeAction::Fail);
        assert_eq!(node.arbitrate(false), NodeAction::Fail);

        let state = MockPosition::empty(3);
        node.create_children(&uniform_result(9), &state, 0.0);
        let accumulated = node.finish_expansion();
        assert_eq!(accumulated, 2);

        assert_eq!(node.arbitrate(false), NodeAction::Read);
        node.release_reader();
    }

    #[test]
    fn test_arbitrate_invalid_backs_up() {
        let node = Node::new(Move::Pass, 1.0, test_size());
        node.invalidate();
        assert_eq!(node.arbitrate(false), NodeAction::Backup);
        assert!(!node.valid());
    }

    #[test]
    fn test_record_backup_and_eval_perspective() {
        let node = Node::new(Move::Pass, 1.0, test_size());
        node.add_virtual_loss(2);
        node.record_backup(0.75, 1.0, 2);
        node.record_backup(0.25, 1.0, 0);

        assert_eq!(node.visits(), 2.0);
        assert_eq!(node.virtual_loss(), 0);
        assert!((node.raw_eval(Color::Black) - 0.5).abs() < 1e-9);
        assert!((node.raw_eval(Color::White) - 0.5).abs() < 1e-9);

        node.record_backup(1.0, 1.0, 0);
        assert!(node.raw_eval(Color::Black) > 0.5);
        assert!(node.raw_eval(Color::White) < 0.5);
    }

    #[test]
    fn test_virtual_loss_never_negative() {
        let node = Node::new(Move::Pass, 1.0, test_size());
        node.remove_virtual_loss(3);
        assert_eq!(node.virtual_loss(), 0);
    }

    #[test]
    fn test_create_children_filters_and_sorts() {
        let size = test_size();
        let node = Node::new(Move::Pass, 1.0, Arc::clone(&size));
        assert_eq!(node.arbitrate(false), NodeAction::Write);

        // 3x3 board with two occupied points; the network loves vertex 4.
        let mut state = MockPosition::empty(3);
        state.occupy(Vertex(0));
        state.occupy(Vertex(1));
        let mut policy = vec![0.01; 10];
        policy[4] = 0.5;
        policy[0] = 0.9; // illegal, must be ignored
        let result = NetResult {
            policy,
            winrate: 0.6,
        };

        node.create_children(&result, &state, 0.0);
        node.finish_expansion();

        let children = node.read_children().unwrap();
        // 7 legal vertices + pass.
        assert_eq!(children.len(), 8);
        // Sorted by prior, so the favourite comes first.
        assert_eq!(children[0].get_move(), Move::Play(Vertex(4)));
        // Renormalised over legal moves only.
        let total: f32 = children.iter().map(|c| c.policy()).sum();
        assert!((total - 1.0).abs() < 1e-5);
        drop(children);

        assert!((node.net_eval(Color::Black) - 0.6).abs() < 1e-6);
        assert!((node.net_eval(Color::White) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_create_children_min_psa_prunes() {
        let node = Node::new(Move::Pass, 1.0, test_size());
        assert_eq!(node.arbitrate(false), NodeAction::Write);

        let state = MockPosition::empty(3);
        let mut policy = vec![0.001; 10];
        policy[4] = 0.9;
        let result = NetResult {
            policy,
            winrate: 0.5,
        };

        node.create_children(&result, &state, 0.1);
        node.finish_expansion();

        let children = node.read_children().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].get_move(), Move::Play(Vertex(4)));
    }

    #[test]
    fn test_select_child_prefers_prior_when_unvisited() {
        let node = Node::new(Move::Pass, 1.0, test_size());
        assert_eq!(node.arbitrate(false), NodeAction::Write);
        let state = MockPosition::empty(3);
        let mut policy = vec![0.05; 10];
        policy[2] = 0.55;
        node.create_children(
            &NetResult {
                policy,
                winrate: 0.5,
            },
            &state,
            0.0,
        );
        node.finish_expansion();

        let cfg = SearchConfig::for_testing();
        assert_eq!(node.arbitrate(false), NodeAction::Read);
        let (child, factor) = node.select_child(Color::Black, false, &cfg).unwrap();
        node.release_reader();
        assert_eq!(child.get_move(), Move::Play(Vertex(2)));
        assert_eq!(factor, 1.0);
    }

    #[test]
    fn test_select_child_virtual_loss_diversifies() {
        let node = Node::new(Move::Pass, 1.0, test_size());
        assert_eq!(node.arbitrate(false), NodeAction::Write);
        let state = MockPosition::empty(3);
        let mut policy = vec![0.05; 10];
        policy[2] = 0.55;
        node.create_children(
            &NetResult {
                policy,
                winrate: 0.5,
            },
            &state,
            0.0,
        );
        node.finish_expansion();

        let cfg = SearchConfig::for_testing();
        assert_eq!(node.arbitrate(false), NodeAction::Read);
        let (first, _) = node.select_child(Color::Black, false, &cfg).unwrap();
        // Pile enough pending simulations on the favourite and selection
        // moves elsewhere.
        first.add_virtual_loss(50);
        let (second, _) = node.select_child(Color::Black, false, &cfg).unwrap();
        node.release_reader();
        assert_ne!(first.get_move(), second.get_move());
    }

    #[test]
    fn test_select_child_skips_invalid_and_inactive() {
        let node = Node::new(Move::Pass, 1.0, test_size());
        assert_eq!(node.arbitrate(false), NodeAction::Write);
        let state = MockPosition::empty(2);
        node.create_children(&uniform_result(4), &state, 0.0);
        node.finish_expansion();

        assert_eq!(node.arbitrate(false), NodeAction::Read);
        {
            let children = node.read_children().unwrap();
            for child in children.iter() {
                child.invalidate();
            }
        }
        let cfg = SearchConfig::for_testing();
        assert!(node.select_child(Color::Black, false, &cfg).is_none());
        node.release_reader();
    }

    #[test]
    fn test_sort_children_by_visits_then_eval() {
        let node = Node::new(Move::Pass, 1.0, test_size());
        assert_eq!(node.arbitrate(false), NodeAction::Write);
        let state = MockPosition::empty(2);
        node.create_children(&uniform_result(4), &state, 0.0);
        node.finish_expansion();

        {
            let children = node.read_children().unwrap();
            children[1].record_backup(1.0, 3.0, 0);
            children[3].record_backup(0.0, 3.0, 0);
            children[2].record_backup(1.0, 1.0, 0);
        }
        node.sort_children(Color::Black);

        let children = node.read_children().unwrap();
        // Equal visits: the Black-favourable child sorts first.
        assert_eq!(children[0].visits(), 3.0);
        assert!(children[0].raw_eval(Color::Black) > children[1].raw_eval(Color::Black));
        assert_eq!(children[1].visits(), 3.0);
        assert_eq!(children[2].visits(), 1.0);
    }

    #[test]
    fn test_dirichlet_noise_keeps_distribution() {
        use rand::SeedableRng;

        let node = Node::new(Move::Pass, 1.0, test_size());
        assert_eq!(node.arbitrate(false), NodeAction::Write);
        let state = MockPosition::empty(3);
        node.create_children(&uniform_result(9), &state, 0.0);
        node.finish_expansion();

        let before: Vec<f32> = node
            .read_children()
            .unwrap()
            .iter()
            .map(|c| c.policy())
            .collect();

        let mut rng = rand_chacha::ChaCha20Rng::seed_from_u64(7);
        node.apply_dirichlet_noise(0.3, 0.25, &mut rng);

        let after: Vec<f32> = node
            .read_children()
            .unwrap()
            .iter()
            .map(|c| c.policy())
            .collect();
        assert_ne!(before, after);
        let total: f32 = after.iter().sum();
        assert!((total - 1.0).abs() < 1e-4);
        for p in after {
            assert!(p >= 0.0);
        }
    }

    #[test]
    fn test_size_accounting_on_drop() {
        let size = test_size();
        {
            let node = Node::new(Move::Pass, 1.0, Arc::clone(&size));
            assert_eq!(node.arbitrate(false), NodeAction::Write);
            let state = MockPosition::empty(2);
            node.create_children(&uniform_result(4), &state, 0.0);
            node.finish_expansion();
            // Root + 4 vertices + pass.
            assert_eq!(size.node_count(), 6);
        }
        assert_eq!(size.node_count(), 0);
    }
}
