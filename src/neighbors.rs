//! Windowed neighbor search over a route sorted by linear position.
//!
//! For each capture the window only expands forward until the position gap
//! exceeds the threshold, so every unordered pair is produced exactly once
//! and the work is proportional to local density rather than route length.

use crate::Capture;

/// Iterator over index pairs `(i, j)` with `i < j` whose position gap is
/// within the distance threshold.
///
/// The input slice must be sorted ascending by position.
#[derive(Debug, Clone)]
pub struct NeighborPairs<'a> {
    captures: &'a [Capture],
    threshold: f64,
    anchor: usize,
    cursor: usize,
}

impl<'a> NeighborPairs<'a> {
    pub fn new(captures: &'a [Capture], threshold: f64) -> Self {
        Self {
            captures,
            threshold,
            anchor: 0,
            cursor: 1,
        }
    }
}

impl Iterator for NeighborPairs<'_> {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.captures.len();
        while self.anchor + 1 < n {
            if self.cursor < n {
                let gap = self.captures[self.cursor].position - self.captures[self.anchor].position;
                if gap <= self.threshold {
                    let pair = (self.anchor, self.cursor);
                    self.cursor += 1;
                    return Some(pair);
                }
            }
            // Window exhausted for this anchor
            self.anchor += 1;
            self.cursor = self.anchor + 1;
        }
        None
    }
}

/// Enumerate all candidate pairs in a sorted route.
///
/// # Example
/// ```
/// use chrono::Utc;
/// use tracededup::{candidate_pairs, Capture, Direction};
///
/// let at = |id: &str, position: f64| Capture {
///     id: id.to_string(),
///     position,
///     relative_position: None,
///     acquisition_id: "S1".to_string(),
///     direction: Direction::Minus,
///     sequence_index: 0,
///     captured_at: Utc::now(),
///     quality: 0.0,
/// };
/// let route = vec![at("a", 0.0), at("b", 4.0), at("c", 8.0)];
/// let pairs: Vec<_> = candidate_pairs(&route, 6.0).collect();
/// assert_eq!(pairs, vec![(0, 1), (1, 2)]);
/// ```
pub fn candidate_pairs(captures: &[Capture], threshold: f64) -> NeighborPairs<'_> {
    NeighborPairs::new(captures, threshold)
}
