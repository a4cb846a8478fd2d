use anyhow::Context;
use serde::Serialize;

use crate::error::PipelineError;
use crate::labeler::EntityLabeler;
use crate::telemetry::{self};
use crate::tokenizer::{TokenStream, TokenizerAdapter};

use super::span::DocumentEntitySpan;
use super::window::{Window, WindowPlan};

/// Spans for one window with offsets into the whole document.
///
/// Empty or whitespace-only windows, and windows made only of special
/// tokens, yield no spans. Labeling errors propagate.
pub fn extract_window(
    window: Window,
    stream: &TokenStream,
    tokenizer: &dyn TokenizerAdapter,
    labeler: &mut dyn EntityLabeler,
    index: usize,
) -> Result<Vec<DocumentEntitySpan>, PipelineError> {
    let ids = &stream.ids()[window.start..window.end];
    let chunk_text = tokenizer
        .detokenize(ids)
        .with_context(|| format!("decode window {}", index))
        .map_err(|e| PipelineError::LabelingCapabilityFailure { window: index, message: format!("{e:#}") })?;
    if chunk_text.trim().is_empty() {
        return Ok(vec![]);
    }

    let raw = labeler
        .label(&chunk_text)
        .map_err(|e| PipelineError::LabelingCapabilityFailure { window: index, message: format!("{e:#}") })?;

    let Some(base) = stream.first_real_offset_from(window.start) else {
        return Ok(vec![]);
    };
    Ok(raw.into_iter().map(|span| span.into_document(base)).collect())
}

/// A window whose labeling call failed and was skipped.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedWindow {
    pub index: usize,
    pub window: Window,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct DocumentExtraction {
    pub spans: Vec<DocumentEntitySpan>,
    pub windows: usize,
    pub skipped: Vec<SkippedWindow>,
}

/// Run every window of `plan` in document order.
///
/// A failing window is logged and skipped so the rest of the document
/// still contributes its spans.
pub fn extract_document(
    plan: WindowPlan,
    stream: &TokenStream,
    tokenizer: &dyn TokenizerAdapter,
    labeler: &mut dyn EntityLabeler,
) -> DocumentExtraction {
    let log = telemetry::ner();
    let mut out = DocumentExtraction::default();
    for (index, window) in plan.iter().enumerate() {
        out.windows += 1;
        match extract_window(window, stream, tokenizer, labeler, index) {
            Ok(spans) => {
                log.debug(format!("window {} [{}, {}) → {} span(s)", index, window.start, window.end, spans.len()));
                out.spans.extend(spans);
            }
            Err(err) => {
                log.warn_kv(
                    &format!("⚠️  skipping window {}: {}", index, err),
                    [("window", index.to_string()), ("start", window.start.to_string()), ("end", window.end.to_string())],
                );
                out.skipped.push(SkippedWindow { index, window, reason: err.to_string() });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::labeler::testing::KeywordLabeler;
    use crate::ner::dedup::dedup_spans;
    use crate::ner::span::RawEntitySpan;
    use crate::tokenizer::testing::WhitespaceTokenizer;

    struct FixedLabeler(Vec<RawEntitySpan>);

    impl EntityLabeler for FixedLabeler {
        fn label(&mut self, _text: &str) -> Result<Vec<RawEntitySpan>> { Ok(self.0.clone()) }
    }

    struct VocabTokenizer;

    impl TokenizerAdapter for VocabTokenizer {
        fn tokenize(&self, _text: &str) -> Result<TokenStream> { unreachable!() }
        fn detokenize(&self, ids: &[u32]) -> Result<String> {
            let words: Vec<&str> = ids
                .iter()
                .filter_map(|id| match id { 10 => Some("fault"), 11 => Some("and"), 12 => Some("trap"), _ => None })
                .collect();
            Ok(words.join(" "))
        }
    }

    #[test]
    fn remaps_from_first_real_token_of_the_window() {
        // char spans [(0,5),(6,9),None,(10,14)], window [0,4)
        let stream = TokenStream::new(vec![10, 11, 1, 12], vec![Some((0, 5)), Some((6, 9)), None, Some((10, 14))]).unwrap();
        let mut labeler = FixedLabeler(vec![RawEntitySpan { text: "fault".into(), label: "EST".into(), score: 0.9, start: 0, end: 5 }]);
        let spans = extract_window(Window { start: 0, end: 4 }, &stream, &VocabTokenizer, &mut labeler, 0).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!((spans[0].start, spans[0].end), (0, 5));

        // a window starting on the special token uses the next real token as base
        let spans = extract_window(Window { start: 2, end: 4 }, &stream, &VocabTokenizer, &mut labeler, 1).unwrap();
        assert_eq!((spans[0].start, spans[0].end), (10, 15));
    }

    #[test]
    fn whitespace_only_windows_are_skipped_without_labeling() {
        let stream = TokenStream::new(vec![0, 1], vec![None, None]).unwrap();
        let mut labeler = KeywordLabeler::new([("x", "X", 1.0)]);
        let tok = WhitespaceTokenizer::new("");
        let spans = extract_window(Window { start: 0, end: 2 }, &stream, &tok, &mut labeler, 0).unwrap();
        assert!(spans.is_empty());
        assert!(labeler.calls.is_empty());
    }

    #[test]
    fn failing_window_is_skipped_and_others_survive() {
        let text = "fault one two three four fault five six seven eight fault";
        let tok = WhitespaceTokenizer::new(text);
        let stream = tok.tokenize(text).unwrap();
        let plan = WindowPlan::new(stream.len(), 4, 1).unwrap();
        let mut labeler = KeywordLabeler::new([("fault", "EST", 0.9)]).failing_on(1);

        let out = extract_document(plan, &stream, &tok, &mut labeler);
        assert_eq!(out.windows, plan.len());
        assert_eq!(out.skipped.len(), 1);
        assert_eq!(out.skipped[0].index, 1);
        let starts: Vec<usize> = dedup_spans(out.spans).iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![0, 25, 52]);
    }

    fn spans_for(text: &str, keywords: &[(&str, &str, f32)], len: usize, overlap: usize) -> Vec<(usize, usize, String)> {
        let tok = WhitespaceTokenizer::new(text);
        let stream = tok.tokenize(text).unwrap();
        let plan = WindowPlan::new(stream.len(), len, overlap).unwrap();
        let mut labeler = KeywordLabeler::new(keywords.iter().copied());
        let out = extract_document(plan, &stream, &tok, &mut labeler);
        assert!(out.skipped.is_empty());
        dedup_spans(out.spans).into_iter().map(|s| (s.start, s.end, s.label)).collect()
    }

    #[test]
    fn output_is_independent_of_window_parameters() {
        let text = "a rocha geradora da Bacia de Campos gera óleo que migra para o arenito \
                    onde a rocha geradora e a falha normal formam uma trapa estrutural na Bacia de Santos";
        let keywords = [
            ("rocha geradora", "ROCHA", 0.9),
            ("falha normal", "ESTRUTURA", 0.8),
            ("arenito", "ROCHA", 0.95),
            ("Campos", "BACIA", 0.7),
            ("Santos", "BACIA", 0.7),
        ];
        let reference = spans_for(text, &keywords, 1000, 0);
        assert_eq!(reference.len(), 6);
        for (s, e, _) in &reference {
            assert!(text.get(*s..*e).is_some());
        }
        for (len, overlap) in [(4, 1), (5, 2), (7, 3), (8, 1), (12, 5)] {
            assert_eq!(spans_for(text, &keywords, len, overlap), reference, "len={len} overlap={overlap}");
        }
    }
}
