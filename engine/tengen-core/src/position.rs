//! The board adapter contract.
//!
//! The search engine never inspects stones directly; everything it needs
//! from the rules engine goes through this trait. Implementations must be
//! cheap to clone: every simulation deep-copies the root position and plays
//! moves on its own copy.

use crate::moves::{Color, Move, Vertex};

/// A game position as seen by the search.
///
/// Values returned by `final_score` are from Black's perspective (positive
/// means Black wins by that margin).
pub trait Position: Clone + Send + Sync + 'static {
    /// Board side length (e.g. 19).
    fn board_size(&self) -> usize;

    /// Number of intersections, `board_size * board_size`.
    fn board_area(&self) -> usize {
        self.board_size() * self.board_size()
    }

    /// Side to move.
    fn to_move(&self) -> Color;

    /// Force the side to move (the protocol may ask either color to move).
    fn set_to_move(&mut self, color: Color);

    /// Number of moves played so far.
    fn movenum(&self) -> usize;

    /// Consecutive passes ending the move history (two ends the game).
    fn passes(&self) -> u32;

    /// The last move played, if any remain in the history.
    fn last_move(&self) -> Option<Move>;

    /// Current komi.
    fn komi(&self) -> f32;

    /// Handicap stones given at game start.
    fn handicap(&self) -> usize;

    /// Whole-board Zobrist hash of the current position.
    fn hash(&self) -> u64;

    /// Play a move. The move must be legal for the side to move.
    fn play(&mut self, mv: Move);

    /// Undo the last move. Returns false when there is no history left.
    fn undo(&mut self) -> bool;

    /// Whether the current position repeats an earlier whole-board position.
    /// Checked after `play`; a true result invalidates the move just played.
    fn superko(&self) -> bool;

    /// Whether the given move is legal for the side to move.
    fn is_legal(&self, mv: Move) -> bool;

    /// All legal vertex moves for the side to move. Pass is always legal and
    /// is not included here.
    fn legal_vertices(&self) -> Vec<Vertex>;

    /// Final score from Black's perspective, counting the board as it
    /// stands (Tromp-Taylor style).
    fn final_score(&self) -> f32;
}
