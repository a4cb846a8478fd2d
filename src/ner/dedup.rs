use std::collections::HashSet;

use super::span::DocumentEntitySpan;

/// Sort by document start (stable) and drop repeated `(start, end, label)`.
///
/// The first occurrence wins outright; later duplicates are discarded even
/// when their score or surface text differ. Distinct mentions of the same
/// text at different offsets are all kept.
pub fn dedup_spans(mut spans: Vec<DocumentEntitySpan>) -> Vec<DocumentEntitySpan> {
    spans.sort_by_key(|s| s.start);
    let keep: Vec<bool> = {
        let mut seen = HashSet::with_capacity(spans.len());
        spans.iter().map(|s| seen.insert(s.key())).collect()
    };
    spans.into_iter().zip(keep).filter_map(|(s, k)| k.then_some(s)).collect()
}
