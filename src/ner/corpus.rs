use anyhow::{Context, Result};
use serde::Serialize;

use crate::error::PipelineError;
use crate::labeler::EntityLabeler;
use crate::telemetry::{self};
use crate::telemetry::ops::ner::Phase as NerPhase;
use crate::tokenizer::TokenizerAdapter;

use super::aggregate::{aggregate, Aggregation, LabelPolicy};
use super::dedup::dedup_spans;
use super::extract::{extract_document, SkippedWindow};
use super::window::WindowPlan;

#[derive(Debug, Clone, Copy)]
pub struct ExtractConfig {
    pub max_chunk_length: usize,
    pub overlap: usize,
    pub label_policy: LabelPolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaperWindow {
    pub paper: usize,
    #[serde(flatten)]
    pub skipped: SkippedWindow,
}

#[derive(Debug, Default, Serialize)]
pub struct CorpusSummary {
    pub papers: usize,
    pub tokens: usize,
    pub windows: usize,
    /// Spans before deduplication.
    pub raw_spans: usize,
    pub unique_spans: usize,
    pub entities: usize,
    pub ambiguous: Vec<String>,
    pub skipped_windows: Vec<PaperWindow>,
}

#[derive(Debug, Default)]
pub struct CorpusExtraction {
    pub aggregation: Aggregation,
    pub summary: CorpusSummary,
}

/// A window longer than the labeler takes would be cut short and lose the
/// entities in its tail.
pub fn check_window_limit(max_chunk_length: usize, limit: usize) -> Result<(), PipelineError> {
    if max_chunk_length > limit {
        return Err(PipelineError::InvalidConfiguration(format!(
            "max_chunk_length ({}) exceeds the {} tokens the labeling model accepts",
            max_chunk_length, limit
        )));
    }
    Ok(())
}

/// Run window extraction over every paper and aggregate the result.
///
/// Each paper is tokenized, windowed and deduplicated on its own, so span
/// offsets are relative to the paper they came from. Aggregation is across
/// the whole corpus.
pub fn extract_corpus(
    papers: &[&str],
    cfg: ExtractConfig,
    tokenizer: &dyn TokenizerAdapter,
    labeler: &mut dyn EntityLabeler,
) -> Result<CorpusExtraction> {
    let log = telemetry::ner();
    // reject bad window parameters before touching any paper
    WindowPlan::new(0, cfg.max_chunk_length, cfg.overlap)?;
    if let Some(limit) = labeler.max_window_tokens() {
        check_window_limit(cfg.max_chunk_length, limit)?;
    }

    let mut summary = CorpusSummary { papers: papers.len(), ..Default::default() };
    let mut unique = Vec::new();
    for (paper, text) in papers.iter().enumerate() {
        let stream = {
            let _t = log.span(&NerPhase::Tokenize).entered();
            tokenizer.tokenize(text).with_context(|| format!("tokenize paper {}", paper))?
        };
        let plan = WindowPlan::new(stream.len(), cfg.max_chunk_length, cfg.overlap)?;

        let doc = {
            let _l = log.span(&NerPhase::Label).entered();
            extract_document(plan, &stream, tokenizer, labeler)
        };
        summary.tokens += stream.len();
        summary.windows += doc.windows;
        summary.raw_spans += doc.spans.len();
        summary.skipped_windows.extend(doc.skipped.into_iter().map(|skipped| PaperWindow { paper, skipped }));

        let spans = {
            let _d = log.span(&NerPhase::Dedup).entered();
            dedup_spans(doc.spans)
        };
        log.info(format!(
            "📄 paper {}/{}: tokens={} windows={} spans={}",
            paper + 1,
            papers.len(),
            stream.len(),
            doc.windows,
            spans.len()
        ));
        unique.extend(spans);
    }

    let aggregation = {
        let _a = log.span(&NerPhase::Aggregate).entered();
        aggregate(&unique, cfg.label_policy)
    };
    summary.unique_spans = unique.len();
    summary.entities = aggregation.entities.len();
    summary.ambiguous = aggregation.ambiguous.clone();
    Ok(CorpusExtraction { aggregation, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labeler::testing::KeywordLabeler;
    use crate::tokenizer::testing::WhitespaceTokenizer;

    const CORPUS: [&str; 2] = [
        "o arenito da Bacia de Campos recobre o arenito fino",
        "a falha corta o arenito na Bacia de Santos",
    ];

    fn cfg(max_chunk_length: usize, overlap: usize) -> ExtractConfig {
        ExtractConfig { max_chunk_length, overlap, label_policy: LabelPolicy::FirstSeen }
    }

    #[test]
    fn aggregates_across_papers() {
        let tok = WhitespaceTokenizer::new(&CORPUS.join(" "));
        let mut labeler = KeywordLabeler::new([("arenito", "ROCHA", 0.9), ("falha", "ESTRUTURA", 0.6)]);

        let out = extract_corpus(&CORPUS, cfg(4, 2), &tok, &mut labeler).unwrap();
        let entities = &out.aggregation.entities;
        assert_eq!(entities[0].entity, "arenito");
        assert_eq!(entities[0].count, 3);
        assert_eq!(entities[1].entity, "falha");
        assert_eq!(entities[1].count, 1);
        assert_eq!(out.summary.papers, 2);
        assert_eq!(out.summary.unique_spans, 4);
        assert!(out.summary.raw_spans >= out.summary.unique_spans);
        assert!(out.summary.skipped_windows.is_empty());
    }

    #[test]
    fn empty_paper_yields_no_windows_and_no_entities() {
        let tok = WhitespaceTokenizer::new("arenito");
        let mut labeler = KeywordLabeler::new([("arenito", "ROCHA", 0.9)]);

        let out = extract_corpus(&[""], cfg(4, 2), &tok, &mut labeler).unwrap();
        assert_eq!(out.summary.papers, 1);
        assert_eq!(out.summary.tokens, 0);
        assert_eq!(out.summary.windows, 0);
        assert_eq!(out.summary.entities, 0);
        assert!(out.aggregation.entities.is_empty());
        assert!(labeler.calls.is_empty());
    }

    #[test]
    fn windows_longer_than_the_labeler_limit_are_rejected() {
        let tok = WhitespaceTokenizer::new(&CORPUS.join(" "));
        let mut labeler = KeywordLabeler::new([("arenito", "ROCHA", 0.9)]).with_max_tokens(6);
        let err = extract_corpus(&CORPUS, cfg(8, 2), &tok, &mut labeler).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::InvalidConfiguration(_))));
        assert!(labeler.calls.is_empty());

        let out = extract_corpus(&CORPUS, cfg(6, 2), &tok, &mut labeler).unwrap();
        assert_eq!(out.aggregation.entities[0].count, 3);
    }

    #[test]
    fn skipped_windows_carry_their_paper() {
        let tok = WhitespaceTokenizer::new(&CORPUS.join(" "));
        let windows_in_first = WindowPlan::new(tok.tokenize(CORPUS[0]).unwrap().len(), 4, 1).unwrap().len();
        let mut labeler = KeywordLabeler::new([("arenito", "ROCHA", 0.9)]).failing_on(windows_in_first);

        let out = extract_corpus(&CORPUS, cfg(4, 1), &tok, &mut labeler).unwrap();
        assert_eq!(out.summary.skipped_windows.len(), 1);
        assert_eq!(out.summary.skipped_windows[0].paper, 1);
        assert_eq!(out.summary.skipped_windows[0].skipped.index, 0);
    }

    #[test]
    fn bad_window_parameters_fail_before_labeling() {
        let tok = WhitespaceTokenizer::new(&CORPUS.join(" "));
        let mut labeler = KeywordLabeler::new([("arenito", "ROCHA", 0.9)]);
        let err = extract_corpus(&CORPUS, cfg(50, 50), &tok, &mut labeler).unwrap_err();
        assert!(matches!(err.downcast_ref::<PipelineError>(), Some(PipelineError::InvalidConfiguration(_))));
        assert!(labeler.calls.is_empty());
    }
}
