//! Principal variation and analysis output.
//!
//! Analysis lines are protocol payload, not logs: they go through a
//! caller-supplied sink so the text front-end owns the byte stream. The
//! human-readable stats dump goes through `tracing` instead.

use std::sync::Arc;

use tengen_core::{Color, Move, Position};
use tracing::info;

use crate::node::Node;

/// Receives one complete analysis line per tick.
pub type AnalysisSink = Box<dyn Fn(&str) + Send + Sync>;

/// Follow the most-visited child from `node` downward, playing each move on
/// a copy of the position. Stops at the first unexpanded or unvisited node.
pub(crate) fn principal_variation<P: Position>(state: &mut P, node: &Arc<Node>) -> Vec<Move> {
    let mut pv = Vec::new();
    let mut current = Arc::clone(node);
    loop {
        let best = match current.best_child_by_visits() {
            Some(child) if !child.first_visit() => child,
            _ => break,
        };
        pv.push(best.get_move());
        state.play(best.get_move());
        current = best;
    }
    pv
}

pub(crate) fn pv_string<P: Position>(state: &P, node: &Arc<Node>) -> String {
    let size = state.board_size();
    let mut scratch = state.clone();
    principal_variation(&mut scratch, node)
        .iter()
        .map(|mv| mv.to_text(size))
        .collect::<Vec<_>>()
        .join(" ")
}

/// One root child's worth of analysis output.
struct AnalysisEntry {
    mv: String,
    visits: i32,
    winrate: f64,
    prior: f32,
    pv: String,
}

impl AnalysisEntry {
    fn info_string(&self, order: usize) -> String {
        format!(
            "info move {} visits {} winrate {} prior {} order {} pv {}",
            self.mv,
            self.visits,
            (self.winrate * 10000.0) as i32,
            (self.prior * 10000.0) as i32,
            order,
            self.pv
        )
    }
}

/// Emit one analysis line covering every visited root child, best first.
pub(crate) fn output_analysis<P: Position>(rootstate: &P, root: &Arc<Node>, sink: &AnalysisSink) {
    let color = rootstate.to_move();
    let size = rootstate.board_size();

    let mut entries: Vec<AnalysisEntry> = Vec::new();
    if let Some(children) = root.read_children() {
        for child in children.iter() {
            // Only send variations with visits.
            if child.first_visit() {
                continue;
            }
            let mv = child.get_move().to_text(size);
            let mut tmpstate = rootstate.clone();
            tmpstate.play(child.get_move());
            let continuation = pv_string(&tmpstate, child);
            let pv = if continuation.is_empty() {
                mv.clone()
            } else {
                format!("{} {}", mv, continuation)
            };
            entries.push(AnalysisEntry {
                mv,
                visits: child.visits() as i32,
                winrate: child.raw_eval(color),
                prior: child.policy(),
                pv,
            });
        }
    }
    if entries.is_empty() {
        return;
    }

    entries.sort_by(|a, b| {
        (b.visits, b.winrate)
            .partial_cmp(&(a.visits, a.winrate))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let line = entries
        .iter()
        .enumerate()
        .map(|(order, e)| e.info_string(order))
        .collect::<Vec<_>>()
        .join(" ");
    sink(&line);
}

/// One-line progress report during search.
pub(crate) fn dump_progress<P: Position>(
    rootstate: &P,
    root: &Arc<Node>,
    playouts: i32,
    positions: i32,
) {
    let color = rootstate.to_move();
    let winrate = 100.0 * root.raw_eval(color);
    let pv = pv_string(rootstate, root);
    info!(
        playouts,
        positions,
        visits = root.visits() as i64,
        winrate,
        pv = %pv,
        "search progress"
    );
}

/// Human-readable per-child summary at the end of a search. Assumes the
/// children were just sorted best-first. Always shows at least two moves
/// so a forced choice is still explainable.
pub(crate) fn dump_stats<P: Position>(rootstate: &P, root: &Arc<Node>) {
    let color = rootstate.to_move();
    let size = rootstate.board_size();
    let Some(children) = root.read_children() else {
        return;
    };
    if children.first().map_or(true, |c| c.first_visit()) {
        return;
    }

    for (i, child) in children.iter().enumerate() {
        if i >= 2 && child.first_visit() {
            break;
        }
        let mv = child.get_move().to_text(size);
        let mut tmpstate = rootstate.clone();
        tmpstate.play(child.get_move());
        let continuation = pv_string(&tmpstate, child);
        info!(
            "{:>4} -> {:7} (V: {:5.2}%) (N: {:5.2}%) PV: {} {}",
            mv,
            child.visits() as i64,
            100.0 * child.raw_eval(color),
            100.0 * child.policy(),
            mv,
            continuation
        );
    }
}
