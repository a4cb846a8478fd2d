use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use crate::error::PipelineError;
use crate::io::{self, CsvFormat, CsvRecord, CsvTable};
use crate::telemetry::{self};
use crate::telemetry::ops::consolidate::Phase as ConsolidatePhase;

use super::args::CsvArgs;

pub mod stem;

use stem::{PortugueseStemmer, Stemmer};

/// LLM terms shorter than this (in characters) are noise.
pub const MIN_LLM_TERM_CHARS: usize = 3;

pub const LABEL_JOINER: &str = " | ";

#[derive(Args, Debug)]
pub struct ConsolidateCmd {
    /// Output of `ner` (entity,label,...) or `llm-extract` (term)
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "output/consolidated_terms.csv")]
    output: PathBuf,
    #[command(flatten)]
    csv: CsvArgs,
}

/// Which upstream stage produced the input; decided by its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputShape {
    Ner,
    Llm,
}

impl InputShape {
    pub fn detect(table: &CsvTable) -> Result<Self, PipelineError> {
        let has = |name: &str| table.headers.iter().any(|h| h == name);
        if has("entity") && has("label") {
            Ok(InputShape::Ner)
        } else if has("term") {
            Ok(InputShape::Llm)
        } else {
            Err(PipelineError::InvalidConfiguration(format!(
                "cannot consolidate a file with columns [{}]; expected entity,label or term",
                table.headers.join(", ")
            )))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedTerm {
    /// Shortest cleaned spelling seen for the stem.
    pub term: String,
    pub labels: BTreeSet<String>,
    pub frequency: usize,
}

/// Row shape for NER input: labels are kept.
pub struct LabeledRow<'a>(pub &'a ConsolidatedTerm);
/// Row shape for LLM input: frequency only.
pub struct FrequencyRow<'a>(pub &'a ConsolidatedTerm);

impl CsvRecord for LabeledRow<'_> {
    const HEADER: &'static [&'static str] = &["term", "labels", "frequency"];
    fn fields(&self, _fmt: &CsvFormat) -> Vec<String> {
        let labels: Vec<&str> = self.0.labels.iter().map(String::as_str).collect();
        vec![self.0.term.clone(), labels.join(LABEL_JOINER), self.0.frequency.to_string()]
    }
}

impl CsvRecord for FrequencyRow<'_> {
    const HEADER: &'static [&'static str] = &["term", "frequency"];
    fn fields(&self, _fmt: &CsvFormat) -> Vec<String> {
        vec![self.0.term.clone(), self.0.frequency.to_string()]
    }
}

/// Group terms that share a stem key.
///
/// A term is trimmed and lower-cased, then each whitespace-separated word is
/// stemmed and the stems re-joined with single spaces. Terms shorter than
/// `min_chars` are dropped. Output is ordered by frequency, descending, with
/// ties in first-seen order.
pub fn consolidate<'a, I>(terms: I, stemmer: &dyn Stemmer, min_chars: usize) -> Vec<ConsolidatedTerm>
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, ConsolidatedTerm> = HashMap::new();
    for (raw, label) in terms {
        let clean = raw.trim().to_lowercase();
        if clean.is_empty() || clean.chars().count() < min_chars {
            continue;
        }
        let key = clean.split_whitespace().map(|w| stemmer.stem(w)).collect::<Vec<_>>().join(" ");

        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            ConsolidatedTerm { term: clean.clone(), labels: BTreeSet::new(), frequency: 0 }
        });
        group.frequency += 1;
        if clean.chars().count() < group.term.chars().count() {
            group.term = clean;
        }
        if let Some(label) = label.map(str::trim).filter(|l| !l.is_empty()) {
            group.labels.insert(label.to_string());
        }
    }

    let mut out: Vec<ConsolidatedTerm> = order.into_iter().filter_map(|k| groups.remove(&k)).collect();
    out.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    out
}

pub fn run(args: ConsolidateCmd) -> Result<()> {
    let log = telemetry::consolidate();
    let _g = log
        .root_span_kv([
            ("input", args.input.display().to_string()),
            ("output", args.output.display().to_string()),
        ])
        .entered();

    let fmt = args.csv.format()?;
    let (table, shape) = {
        let _l = log.span(&ConsolidatePhase::Load).entered();
        let table = CsvTable::read(&args.input, fmt.delimiter)?;
        let shape = InputShape::detect(&table)?;
        (table, shape)
    };
    log.info(format!("📥 {} row(s) of {:?} output", table.rows.len(), shape));

    let terms = {
        let _s = log.span(&ConsolidatePhase::Stem).entered();
        let stemmer = PortugueseStemmer::new();
        match shape {
            InputShape::Ner => {
                let (entity, label) = (table.column("entity")?, table.column("label")?);
                let rows = table.rows.iter().map(|r| (CsvTable::cell(r, entity), Some(CsvTable::cell(r, label))));
                consolidate(rows, &stemmer, 0)
            }
            InputShape::Llm => {
                let term = table.column("term")?;
                let rows = table.rows.iter().map(|r| (CsvTable::cell(r, term), None));
                consolidate(rows, &stemmer, MIN_LLM_TERM_CHARS)
            }
        }
    };

    let written = {
        let _w = log.span(&ConsolidatePhase::Write).entered();
        match shape {
            InputShape::Ner => io::write_records(&args.output, fmt, &terms.iter().map(LabeledRow).collect::<Vec<_>>())?,
            InputShape::Llm => io::write_records(&args.output, fmt, &terms.iter().map(FrequencyRow).collect::<Vec<_>>())?,
        }
    };
    for t in terms.iter().take(15) {
        log.debug(format!("  {} ×{}", t.term, t.frequency));
    }
    log.totals(written, 0, 0);

    if telemetry::config::json_mode() {
        #[derive(Serialize)]
        struct ConsolidateResult { shape: InputShape, input_rows: usize, terms: usize }
        log.result(&ConsolidateResult { shape, input_rows: table.rows.len(), terms: written })?;
    }
    Ok(())
}
