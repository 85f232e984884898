//! Splits generated reply text into ordered segments.

use crate::defaults;
use crate::pipeline::frame::{Segment, TurnId};

/// Splits a reply at the boundary marker and numbers the pieces.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    marker: char,
}

impl Segmenter {
    /// Creates a segmenter splitting on `marker`.
    pub fn new(marker: char) -> Self {
        Self { marker }
    }

    /// Returns the boundary marker.
    pub fn marker(&self) -> char {
        self.marker
    }

    /// Splits `text` into the ordered segments of `turn`.
    ///
    /// Pieces are trimmed; pieces empty after trimming are dropped and do not
    /// consume a sequence number. Numbering restarts at 0 for every turn.
    pub fn segment(&self, turn: TurnId, text: &str) -> Vec<Segment> {
        let mut next_sequence = 0u64;
        let mut segments = Vec::new();

        for piece in text.split(self.marker) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            segments.push(Segment {
                turn,
                sequence: next_sequence,
                text: piece.to_string(),
            });
            next_sequence += 1;
        }

        segments
    }
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(defaults::SEGMENT_MARKER)
    }
}
