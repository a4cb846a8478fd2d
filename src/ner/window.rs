// Overlapping token windows over a token stream

use serde::Serialize;

use crate::error::PipelineError;

/// Half-open range of token positions `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub fn len(&self) -> usize { self.end - self.start }

    pub fn is_empty(&self) -> bool { self.start >= self.end }
}

/// Validated window parameters for a stream of `token_count` tokens.
///
/// Cheap to copy; `iter()` can be called any number of times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    token_count: usize,
    max_chunk_length: usize,
    overlap: usize,
}

impl WindowPlan {
    pub fn new(token_count: usize, max_chunk_length: usize, overlap: usize) -> Result<Self, PipelineError> {
        if max_chunk_length == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "max_chunk_length must be greater than 0".into(),
            ));
        }
        if overlap >= max_chunk_length {
            return Err(PipelineError::InvalidConfiguration(format!(
                "overlap ({overlap}) must be smaller than max_chunk_length ({max_chunk_length})"
            )));
        }
        Ok(Self { token_count, max_chunk_length, overlap })
    }

    pub fn step(&self) -> usize { self.max_chunk_length - self.overlap }

    pub fn len(&self) -> usize { self.token_count.div_ceil(self.step()) }

    pub fn is_empty(&self) -> bool { self.token_count == 0 }

    pub fn iter(&self) -> Windows {
        Windows { plan: *self, next_start: 0 }
    }
}

impl IntoIterator for WindowPlan {
    type Item = Window;
    type IntoIter = Windows;

    fn into_iter(self) -> Windows { self.iter() }
}

#[derive(Debug, Clone)]
pub struct Windows {
    plan: WindowPlan,
    next_start: usize,
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let start = self.next_start;
        if start >= self.plan.token_count {
            return None;
        }
        let end = (start + self.plan.max_chunk_length).min(self.plan.token_count);
        self.next_start = start + self.plan.step();
        Some(Window { start, end })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn windows(n: usize, len: usize, overlap: usize) -> Vec<Window> {
        WindowPlan::new(n, len, overlap).unwrap().iter().collect()
    }

    #[test]
    fn empty_stream_has_no_windows() {
        let plan = WindowPlan::new(0, 500, 50).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.iter().count(), 0);
    }

    #[test]
    fn overlap_not_smaller_than_length_is_rejected() {
        assert!(matches!(WindowPlan::new(10, 5, 5), Err(PipelineError::InvalidConfiguration(_))));
        assert!(matches!(WindowPlan::new(10, 5, 7), Err(PipelineError::InvalidConfiguration(_))));
        assert!(matches!(WindowPlan::new(10, 0, 0), Err(PipelineError::InvalidConfiguration(_))));
    }

    #[test]
    fn steps_by_length_minus_overlap_and_clamps_last() {
        let ws = windows(10, 4, 1);
        let got: Vec<(usize, usize)> = ws.iter().map(|w| (w.start, w.end)).collect();
        assert_eq!(got, vec![(0, 4), (3, 7), (6, 10), (9, 10)]);
    }

    #[test]
    fn every_token_is_covered_without_gaps() {
        for n in 1..60 {
            for len in 1..12 {
                for overlap in 0..len {
                    let ws = windows(n, len, overlap);
                    assert_eq!(ws.first().map(|w| w.start), Some(0));
                    assert_eq!(ws.last().map(|w| w.end), Some(n));
                    for pair in ws.windows(2) {
                        assert_eq!(pair[1].start, pair[0].start + (len - overlap));
                        assert!(pair[1].start <= pair[0].end, "gap in n={n} len={len} overlap={overlap}");
                    }
                    for w in &ws {
                        assert!(w.len() <= len && !w.is_empty());
                    }
                    assert_eq!(ws.len(), WindowPlan::new(n, len, overlap).unwrap().len());
                }
            }
        }
    }

    #[test]
    fn plan_is_restartable() {
        let plan = WindowPlan::new(23, 5, 2).unwrap();
        let a: Vec<Window> = plan.iter().collect();
        let b: Vec<Window> = plan.into_iter().collect();
        assert_eq!(a, b);
    }
}
