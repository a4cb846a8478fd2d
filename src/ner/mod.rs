use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::io::{self, CsvFormat, CsvRecord, DEFAULT_PAPER_DELIMITER};
use crate::labeler::onnx::{Device, ModelFiles, DEFAULT_MODEL_ID, MAX_WINDOW_TOKENS};
use crate::labeler::OnnxTokenClassifier;
use crate::pipeline::args::CsvArgs;
use crate::telemetry::{self};
use crate::telemetry::ops::ner::Phase as NerPhase;
use crate::tokenizer::{HfTokenizer, TokenizerAdapter};

pub mod aggregate;
pub mod corpus;
pub mod dedup;
pub mod extract;
pub mod span;
pub mod window;

use aggregate::{AggregatedEntity, LabelPolicy};
use corpus::{check_window_limit, extract_corpus, ExtractConfig};
use window::WindowPlan;

#[derive(Args, Debug)]
pub struct NerCmd {
    /// Concatenated corpus, papers separated by --paper-delimiter
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "output/ner_results.csv")]
    output: PathBuf,
    #[arg(long, default_value = DEFAULT_MODEL_ID)]
    model_id: String,
    /// Local ONNX file instead of the one published with the model
    #[arg(long)]
    onnx_path: Option<PathBuf>,
    /// Local tokenizer.json instead of the one published with the model
    #[arg(long)]
    tokenizer_path: Option<PathBuf>,
    /// Local config.json (id2label) instead of the one published with the model
    #[arg(long)]
    config_path: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Device::Cpu)]
    device: Device,
    /// Tokens per window
    #[arg(long, default_value_t = 500)]
    max_chunk_length: usize,
    /// Tokens shared by consecutive windows
    #[arg(long, default_value_t = 50)]
    overlap: usize,
    #[arg(long, value_enum, default_value_t = LabelPolicy::FirstSeen)]
    label_policy: LabelPolicy,
    #[arg(long, default_value = DEFAULT_PAPER_DELIMITER)]
    paper_delimiter: String,
    #[command(flatten)]
    csv: CsvArgs,
    #[arg(long, default_value_t = false)]
    apply: bool,
}

impl CsvRecord for AggregatedEntity {
    const HEADER: &'static [&'static str] = &["entity", "label", "count", "avg_score"];

    fn fields(&self, fmt: &CsvFormat) -> Vec<String> {
        vec![self.entity.clone(), self.label.clone(), self.count.to_string(), fmt.decimal(self.avg_score as f64)]
    }
}

pub fn run(args: NerCmd) -> Result<()> {
    let log = telemetry::ner();
    let _g = log
        .root_span_kv([
            ("input", args.input.display().to_string()),
            ("output", args.output.display().to_string()),
            ("model_id", args.model_id.clone()),
            ("device", format!("{:?}", args.device)),
            ("max_chunk_length", args.max_chunk_length.to_string()),
            ("overlap", args.overlap.to_string()),
            ("label_policy", format!("{:?}", args.label_policy)),
            ("apply", args.apply.to_string()),
        ])
        .entered();

    let fmt = args.csv.format()?;
    WindowPlan::new(0, args.max_chunk_length, args.overlap)?;
    check_window_limit(args.max_chunk_length, MAX_WINDOW_TOKENS)?;

    let corpus = io::load_text(&args.input)?;
    let papers = io::split_papers(&corpus, &args.paper_delimiter);
    log.info(format!("📚 {} paper(s) loaded from {}", papers.len(), args.input.display()));

    let tokenizer = {
        let _lm = log.span(&NerPhase::LoadModel).entered();
        match &args.tokenizer_path {
            Some(p) => HfTokenizer::from_file(p),
            None => HfTokenizer::from_pretrained(&args.model_id),
        }
        .context("load tokenizer")?
    };

    if !args.apply {
        let _sp = log.span(&NerPhase::Plan).entered();
        #[derive(Serialize)]
        struct NerPlan { model: String, papers: usize, tokens: usize, windows: usize, max_chunk_length: usize, overlap: usize, output: String }
        let mut plan = NerPlan {
            model: args.model_id.clone(),
            papers: papers.len(),
            tokens: 0,
            windows: 0,
            max_chunk_length: args.max_chunk_length,
            overlap: args.overlap,
            output: args.output.display().to_string(),
        };
        for (i, paper) in papers.iter().enumerate() {
            let stream = tokenizer.tokenize(paper).with_context(|| format!("tokenize paper {}", i))?;
            plan.tokens += stream.len();
            plan.windows += WindowPlan::new(stream.len(), args.max_chunk_length, args.overlap)?.len();
        }
        if telemetry::config::json_mode() {
            log.plan(&plan)?;
        } else {
            log.info(format!(
                "📝 NER plan: model={} papers={} tokens={} windows={} (len={} overlap={})",
                plan.model, plan.papers, plan.tokens, plan.windows, plan.max_chunk_length, plan.overlap
            ));
            log.info("   Use --apply to run extraction.");
        }
        return Ok(());
    }

    let mut labeler = {
        let _lm = log.span(&NerPhase::LoadModel).entered();
        let files = ModelFiles {
            onnx: args.onnx_path.as_deref(),
            tokenizer: args.tokenizer_path.as_deref(),
            config: args.config_path.as_deref(),
        };
        OnnxTokenClassifier::new(&args.model_id, files, args.device)?
    };

    let cfg = ExtractConfig {
        max_chunk_length: args.max_chunk_length,
        overlap: args.overlap,
        label_policy: args.label_policy,
    };
    let out = extract_corpus(&papers, cfg, &tokenizer, &mut labeler)?;

    let written = {
        let _w = log.span(&NerPhase::Write).entered();
        io::write_records(&args.output, fmt, &out.aggregation.entities)?
    };
    if !out.summary.ambiguous.is_empty() {
        log.warn(format!("⚠️  {} surface form(s) seen under more than one label", out.summary.ambiguous.len()));
    }
    log.totals(written, 0, out.summary.skipped_windows.len());
    log.info(format!("✅ {} entities written to {}", written, args.output.display()));

    if telemetry::config::json_mode() {
        log.result(&out.summary)?;
    }
    Ok(())
}
