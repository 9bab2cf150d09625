//! Tree lifecycle: root ownership, reuse across moves, lazy destruction.
//!
//! The tree owns exactly one root. When the game advances, the matching
//! subtree is promoted in place and every detached ancestor is handed to a
//! background destroyer, which waits until the previous search generation
//! has fully drained (no pending simulations, no residual virtual loss)
//! before dropping. Replacing the root happens under the search-level
//! writer lock so no simulation can snapshot a half-swapped root.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tengen_core::{Move, Position};
use tracing::{debug, info};

use crate::node::{Node, NodeLock};

/// Approximate heap footprint of one node, for the tree-size cap.
/// The node itself plus the Arc control block and child-vector slot.
const NODE_FOOTPRINT: usize = std::mem::size_of::<Node>() + 4 * std::mem::size_of::<usize>();

/// Shared node accounting. Every node holds a handle and registers itself
/// at creation and release at drop, so the count stays exact through
/// background destruction.
#[derive(Debug, Default)]
pub struct TreeSize {
    nodes: AtomicUsize,
}

impl TreeSize {
    pub fn new() -> Self {
        Self {
            nodes: AtomicUsize::new(0),
        }
    }

    pub fn register(&self, n: usize) {
        self.nodes.fetch_add(n, Ordering::AcqRel);
    }

    pub fn release(&self, n: usize) {
        self.nodes.fetch_sub(n, Ordering::AcqRel);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.load(Ordering::Acquire)
    }

    pub fn bytes(&self) -> usize {
        self.node_count() * NODE_FOOTPRINT
    }
}

/// Root pointer, root position, and the pending-simulation counter of the
/// current search generation, all swapped together under the writer lock.
pub(crate) struct RootInner<P: Position> {
    pub root: Arc<Node>,
    pub rootstate: P,
    pub pending: Arc<AtomicI32>,
}

pub(crate) struct RootSlot<P: Position> {
    lock: NodeLock,
    inner: UnsafeCell<RootInner<P>>,
}

// Safety: `inner` is only reached through the guards below; the lock admits
// many readers or one writer, and `P: Sync` lets readers share `&P`.
unsafe impl<P: Position> Sync for RootSlot<P> {}

pub(crate) struct RootReadGuard<'a, P: Position> {
    slot: &'a RootSlot<P>,
}

impl<P: Position> std::ops::Deref for RootReadGuard<'_, P> {
    type Target = RootInner<P>;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.slot.inner.get() }
    }
}

impl<P: Position> Drop for RootReadGuard<'_, P> {
    fn drop(&mut self) {
        self.slot.lock.release_reader();
    }
}

pub(crate) struct RootWriteGuard<'a, P: Position> {
    slot: &'a RootSlot<P>,
}

impl<P: Position> std::ops::Deref for RootWriteGuard<'_, P> {
    type Target = RootInner<P>;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.slot.inner.get() }
    }
}

impl<P: Position> std::ops::DerefMut for RootWriteGuard<'_, P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.slot.inner.get() }
    }
}

impl<P: Position> Drop for RootWriteGuard<'_, P> {
    fn drop(&mut self) {
        self.slot.lock.release_writer();
    }
}

/// What a root advance did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The subtree below the played moves was promoted to the root.
    Reused,
    /// Nothing matched (or matching was impossible); fresh tree.
    Rebuilt,
}

/// The search tree: one root, shared size accounting, and the destroyer
/// pool for detached subtrees.
pub struct SearchTree<P: Position> {
    slot: RootSlot<P>,
    size: Arc<TreeSize>,
    max_tree_bytes: AtomicUsize,
    destroyers: Mutex<Vec<JoinHandle<()>>>,
}

impl<P: Position> SearchTree<P> {
    pub fn new(rootstate: P) -> Self {
        let size = Arc::new(TreeSize::new());
        let root = Node::new(Move::Pass, 0.0, Arc::clone(&size));
        Self {
            slot: RootSlot {
                lock: NodeLock::new(),
                inner: UnsafeCell::new(RootInner {
                    root,
                    rootstate,
                    pending: Arc::new(AtomicI32::new(0)),
                }),
            },
            size,
            max_tree_bytes: AtomicUsize::new(usize::MAX),
            destroyers: Mutex::new(Vec::new()),
        }
    }

    pub fn size(&self) -> &Arc<TreeSize> {
        &self.size
    }

    pub fn set_max_tree_bytes(&self, bytes: usize) {
        self.max_tree_bytes.store(bytes, Ordering::Release);
    }

    /// Whether the tree has room for further expansion.
    pub fn within_budget(&self) -> bool {
        self.size.bytes() < self.max_tree_bytes.load(Ordering::Acquire)
    }

    /// Expansion prune threshold, rising as the tree fills its budget.
    /// Never applied at the root.
    pub fn min_psa_ratio(&self) -> f64 {
        let max = self.max_tree_bytes.load(Ordering::Acquire);
        if max == usize::MAX {
            return 0.0;
        }
        let fullness = self.size.bytes() as f64 / max as f64;
        if fullness > 0.95 {
            0.01
        } else if fullness > 0.5 {
            0.001
        } else {
            0.0
        }
    }

    /// Shared read access to the current root generation. Workers snapshot
    /// and drop the guard before descending.
    pub(crate) fn read(&self) -> RootReadGuard<'_, P> {
        self.slot.lock.acquire_reader();
        RootReadGuard { slot: &self.slot }
    }

    /// Exclusive access for root replacement. Controller only.
    pub(crate) fn write(&self) -> RootWriteGuard<'_, P> {
        self.slot.lock.acquire_writer();
        RootWriteGuard { slot: &self.slot }
    }

    /// Replace the root for a new external position, reusing the subtree
    /// when the played moves can be matched against the old tree.
    ///
    /// `last_rootstate` is the position of the previous search's root;
    /// `force_fresh` discards unconditionally (set after a network
    /// failure). Detached nodes are handed to a background destroyer that
    /// waits out the old generation. Returns the outcome; per-search
    /// counters are the caller's to reset.
    pub fn advance_root(
        &self,
        new_state: P,
        last_rootstate: Option<&P>,
        force_fresh: bool,
    ) -> AdvanceOutcome {
        let mut guard = self.write();

        let mut to_delete: Vec<Arc<Node>> = Vec::new();
        let reused = !force_fresh
            && self.try_reuse(&mut guard, &new_state, last_rootstate, &mut to_delete);
        if !reused {
            let old = std::mem::replace(
                &mut guard.root,
                Node::new(Move::Pass, 0.0, Arc::clone(&self.size)),
            );
            to_delete.push(old);
        }
        guard.rootstate = new_state;
        let old_pending = std::mem::replace(&mut guard.pending, Arc::new(AtomicI32::new(0)));
        drop(guard);

        debug!(
            detached = to_delete.len(),
            reused, "root advanced, scheduling lazy destruction"
        );
        self.schedule_destruction(to_delete, old_pending);

        if reused {
            AdvanceOutcome::Reused
        } else {
            AdvanceOutcome::Rebuilt
        }
    }

    /// Walk the played moves down the old tree, detaching each passed root.
    /// On success `guard.root` is the promoted node and `to_delete` holds
    /// the detached ancestors; on failure the root is left in `to_delete`
    /// candidates untouched and the caller rebuilds.
    fn try_reuse(
        &self,
        guard: &mut RootWriteGuard<'_, P>,
        new_state: &P,
        last_rootstate: Option<&P>,
        to_delete: &mut Vec<Arc<Node>>,
    ) -> bool {
        let last = match last_rootstate {
            Some(s) => s,
            None => return false,
        };
        if last.komi() != new_state.komi() {
            return false;
        }
        if new_state.movenum() < last.movenum() {
            return false;
        }
        let depth = new_state.movenum() - last.movenum();

        // Rewind the new state to where the old root stood and collect the
        // moves in between.
        let mut test = new_state.clone();
        let mut moves = Vec::with_capacity(depth);
        for _ in 0..depth {
            match test.last_move() {
                Some(mv) => moves.push(mv),
                None => return false,
            }
            if !test.undo() {
                return false;
            }
        }
        if test.hash() != last.hash() {
            return false;
        }
        moves.reverse();

        // Replay forward, promoting the matching child each step.
        let mut replay = last.clone();
        let mut detached: Vec<Arc<Node>> = Vec::new();
        let mut current = Arc::clone(&guard.root);
        for mv in moves {
            let child = current.find_child(mv);
            detached.push(current);
            match child {
                Some(c) => {
                    replay.play(mv);
                    current = c;
                }
                None => {
                    info!("tree has not been expanded this far, rebuilding");
                    return false;
                }
            }
        }
        // Can differ if the same player moved twice in a row.
        if replay.hash() != new_state.hash() {
            return false;
        }
        // An invalidated node cannot serve as a root.
        if !current.valid() {
            return false;
        }

        guard.root = current;
        to_delete.append(&mut detached);
        true
    }

    /// Destroy detached subtrees in the background, strictly after the old
    /// generation has drained: its pending-simulation counter must reach
    /// zero and no detached node may carry virtual loss.
    fn schedule_destruction(&self, to_delete: Vec<Arc<Node>>, pending: Arc<AtomicI32>) {
        if to_delete.is_empty() {
            return;
        }
        let handle = std::thread::spawn(move || {
            loop {
                let drained = pending.load(Ordering::Acquire) <= 0
                    && to_delete.iter().all(|n| n.virtual_loss() == 0);
                if drained {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            debug!(subtrees = to_delete.len(), "dropping detached subtrees");
            drop(to_delete);
        });
        self.destroyers.lock().unwrap().push(handle);
    }

    /// Join every outstanding destroyer. Called on shutdown.
    pub fn wait_destroyers(&self) {
        let handles: Vec<_> = self.destroyers.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}
