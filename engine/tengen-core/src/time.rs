//! Time-control contract.
//!
//! The search treats time policy as a callable: it asks for a per-move
//! budget once per `think` and polls nothing else. Budgets are expressed in
//! centiseconds, matching the text protocol's clock granularity.

use crate::moves::Color;

/// Centiseconds.
pub type Centis = i64;

/// Per-move time budget policy.
pub trait TimeControl: Send {
    /// Maximum time to spend on the next move.
    fn max_time_for_move(&self, board_size: usize, color: Color, movenum: usize) -> Centis;

    /// Whether unused time carries over for this color. When it cannot, the
    /// controller prefers to use the full budget rather than stopping early.
    fn can_accumulate_time(&self, color: Color) -> bool;
}

/// Fixed budget per move. The default policy for tests and analysis.
#[derive(Debug, Clone)]
pub struct FixedTime {
    pub centis_per_move: Centis,
}

impl FixedTime {
    pub fn new(centis_per_move: Centis) -> Self {
        Self { centis_per_move }
    }
}

impl TimeControl for FixedTime {
    fn max_time_for_move(&self, _board_size: usize, _color: Color, _movenum: usize) -> Centis {
        self.centis_per_move
    }

    fn can_accumulate_time(&self, _color: Color) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_time() {
        let tc = FixedTime::new(500);
        assert_eq!(tc.max_time_for_move(19, Color::Black, 0), 500);
        assert!(!tc.can_accumulate_time(Color::White));
    }
}
