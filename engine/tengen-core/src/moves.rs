//! Move and coordinate types shared across the engine.

use std::fmt;

use thiserror::Error;

/// Errors from parsing GTP-style move text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoveParseError {
    #[error("Empty move string")]
    Empty,

    #[error("Invalid column letter: {0:?}")]
    InvalidColumn(char),

    #[error("Invalid row: {0:?}")]
    InvalidRow(String),

    #[error("Vertex {0:?} is outside a {1}x{1} board")]
    OffBoard(String, usize),
}

/// The two players.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Black,
    White,
}

impl Color {
    /// The opposing color.
    #[inline]
    pub fn other(self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }
}

/// A board intersection, stored as a flat index in `0..board_area`.
///
/// The index is row-major from the lower-left corner, which is also the
/// layout of the network's policy head: policy slot `i` is `Vertex(i)` and
/// slot `board_area` is the pass move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vertex(pub u16);

impl Vertex {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Column and row for a given board size.
    #[inline]
    pub fn coords(self, size: usize) -> (usize, usize) {
        (self.index() % size, self.index() / size)
    }
}

/// A move as emitted by the engine and consumed by the board adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Move {
    Play(Vertex),
    Pass,
    Resign,
}

impl Move {
    /// Policy-head slot for this move, or `None` for resignation (which the
    /// network never scores).
    #[inline]
    pub fn policy_index(self, board_area: usize) -> Option<usize> {
        match self {
            Move::Play(v) => Some(v.index()),
            Move::Pass => Some(board_area),
            Move::Resign => None,
        }
    }

    #[inline]
    pub fn is_pass(self) -> bool {
        matches!(self, Move::Pass)
    }

    /// Parse GTP-style move text ("D4", "pass", "resign") for a board of
    /// the given size. Case-insensitive; the column letter `I` does not
    /// exist, per Go convention.
    pub fn from_text(text: &str, size: usize) -> Result<Move, MoveParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MoveParseError::Empty);
        }
        let lower = text.to_ascii_lowercase();
        if lower == "pass" {
            return Ok(Move::Pass);
        }
        if lower == "resign" {
            return Ok(Move::Resign);
        }

        let mut chars = lower.chars();
        let letter = chars.next().ok_or(MoveParseError::Empty)?;
        let col = match letter {
            'a'..='h' => letter as usize - 'a' as usize,
            'j'..='z' => letter as usize - 'a' as usize - 1,
            other => return Err(MoveParseError::InvalidColumn(other)),
        };

        let row_text = chars.as_str();
        let row: usize = row_text
            .parse()
            .map_err(|_| MoveParseError::InvalidRow(row_text.to_string()))?;
        if row == 0 {
            return Err(MoveParseError::InvalidRow(row_text.to_string()));
        }
        if col >= size || row > size {
            return Err(MoveParseError::OffBoard(text.to_string(), size));
        }

        Ok(Move::Play(Vertex(((row - 1) * size + col) as u16)))
    }

    /// GTP-style text for this move on a board of the given size.
    ///
    /// Columns skip the letter `I` following Go convention.
    pub fn to_text(self, size: usize) -> String {
        match self {
            Move::Pass => "pass".to_string(),
            Move::Resign => "resign".to_string(),
            Move::Play(v) => {
                let (col, row) = v.coords(size);
                let letter = if col < 8 {
                    (b'A' + col as u8) as char
                } else {
                    (b'A' + col as u8 + 1) as char
                };
                format!("{}{}", letter, row + 1)
            }
        }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Display assumes a 19x19 board; callers that know the size should
        // use `to_text`.
        write!(f, "{}", self.to_text(19))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_other() {
        assert_eq!(Color::Black.other(), Color::White);
        assert_eq!(Color::White.other(), Color::Black);
    }

    #[test]
    fn test_policy_index() {
        assert_eq!(Move::Play(Vertex(0)).policy_index(361), Some(0));
        assert_eq!(Move::Play(Vertex(360)).policy_index(361), Some(360));
        assert_eq!(Move::Pass.policy_index(361), Some(361));
        assert_eq!(Move::Resign.policy_index(361), None);
    }

    #[test]
    fn test_move_text_skips_i() {
        // Column 7 is H, column 8 jumps to J.
        assert_eq!(Move::Play(Vertex(7)).to_text(19), "H1");
        assert_eq!(Move::Play(Vertex(8)).to_text(19), "J1");
        assert_eq!(Move::Play(Vertex(19 * 3 + 3)).to_text(19), "D4");
        assert_eq!(Move::Pass.to_text(19), "pass");
    }

    #[test]
    fn test_from_text_round_trip() {
        for text in ["A1", "H1", "J1", "D4", "T19", "pass", "resign"] {
            let mv = Move::from_text(text, 19).unwrap();
            assert_eq!(mv.to_text(19), text);
        }
        // Case-insensitive.
        assert_eq!(Move::from_text("d4", 19), Move::from_text("D4", 19));
        assert_eq!(Move::from_text("PASS", 19).unwrap(), Move::Pass);
        assert_eq!(
            Move::from_text("J1", 19).unwrap(),
            Move::Play(Vertex(8))
        );
    }

    #[test]
    fn test_from_text_rejects_bad_input() {
        assert_eq!(Move::from_text("", 19), Err(MoveParseError::Empty));
        assert_eq!(Move::from_text("  ", 19), Err(MoveParseError::Empty));
        // There is no I column.
        assert_eq!(
            Move::from_text("I5", 19),
            Err(MoveParseError::InvalidColumn('i'))
        );
        assert_eq!(
            Move::from_text("5D", 19),
            Err(MoveParseError::InvalidColumn('5'))
        );
        assert_eq!(
            Move::from_text("D0", 19),
            Err(MoveParseError::InvalidRow("0".to_string()))
        );
        assert_eq!(
            Move::from_text("D", 19),
            Err(MoveParseError::InvalidRow("".to_string()))
        );
        // Legal syntax, wrong board.
        assert_eq!(
            Move::from_text("T19", 9),
            Err(MoveParseError::OffBoard("T19".to_string(), 9))
        );
        assert_eq!(
            Move::from_text("A10", 9),
            Err(MoveParseError::OffBoard("A10".to_string(), 9))
        );
    }
}
