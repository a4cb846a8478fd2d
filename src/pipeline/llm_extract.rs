use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use serde::Serialize;
use tracing::Instrument;

use crate::batch::{run_batches, BatchClassifier, BatchPolicy};
use crate::error::PipelineError;
use crate::io::{self, CsvFormat, CsvRecord, DEFAULT_PAPER_DELIMITER};
use crate::llm::{parse_json_array, ChatClient, ChatClientConfig, ChatCompletionRequest, LlmClient};
use crate::telemetry::{self};
use crate::telemetry::ops::llm_extract::Phase as ExtractPhase;

use super::args::{CsvArgs, PacingArgs};
use super::review::ReviewRow;

pub const STAGE: &str = "llm-extract";

const SYSTEM: &str = "You are a geologist and ontology engineer working on South Atlantic pre-salt \
petroleum systems. You extract conceptual knowledge from technical papers.";

const PROMPT: &str = r#"Extract every geological concept in the text below that would belong in a domain ontology.

Rules:
1. List all relevant concepts; do not rank or cap them.
2. Write each concept in English and in singular form.
3. Leave out non-geological words, named places such as wells or fields, people and companies.

Answer with a JSON array of strings and nothing else, for example:
["Microbial Carbonate", "Diagenesis", "Source Rock", "Structural Trap"]

TEXT:
"#;

#[derive(Args, Debug)]
pub struct LlmExtractCmd {
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "output/llm_extracted_terms.csv")]
    output: PathBuf,
    #[arg(long, default_value = "output/llm_extract_review.csv")]
    review_output: PathBuf,
    #[arg(long, default_value = DEFAULT_PAPER_DELIMITER)]
    paper_delimiter: String,
    #[command(flatten)]
    csv: CsvArgs,
    #[command(flatten)]
    pacing: PacingArgs,
    #[arg(long, default_value_t = false)]
    apply: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermRow {
    pub term: String,
}

impl CsvRecord for TermRow {
    const HEADER: &'static [&'static str] = &["term"];
    fn fields(&self, _fmt: &CsvFormat) -> Vec<String> { vec![self.term.clone()] }
}

/// One call per paper; the reply is the paper's term list.
pub struct PaperExtractor<'a> {
    client: &'a dyn LlmClient,
}

impl<'a> PaperExtractor<'a> {
    pub fn new(client: &'a dyn LlmClient) -> Self { Self { client } }
}

#[async_trait]
impl<'p> BatchClassifier<&'p str> for PaperExtractor<'_> {
    type Output = Vec<String>;

    async fn classify(&self, batch: &[&'p str]) -> Result<Vec<Vec<String>>, PipelineError> {
        let mut out = Vec::with_capacity(batch.len());
        for paper in batch {
            let req = ChatCompletionRequest::prompt(SYSTEM, format!("{PROMPT}{paper}"));
            let reply = self.client.chat_completion(req).await?;
            out.push(parse_json_array::<String>(&reply.content)?);
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
pub struct PaperTerms {
    pub terms: Vec<TermRow>,
    pub review: Vec<ReviewRow>,
}

/// Extract raw terms paper by paper. A blocked or unparsable paper is
/// routed to review and the remaining papers still run.
pub async fn extract_terms(
    papers: &[&str],
    client: &dyn LlmClient,
    pacing: &PacingArgs,
) -> Result<PaperTerms, PipelineError> {
    let log = telemetry::llm_extract();
    let policy = BatchPolicy::new(1, pacing.delay(), pacing.retry())?;
    let outcome = run_batches(papers, &policy, &PaperExtractor::new(client), &log).await?;

    let mut out = PaperTerms::default();
    for (paper, terms) in outcome.completed {
        log.debug(format!("{} term(s) from paper of {} bytes", terms.len(), paper.len()));
        out.terms.extend(terms.into_iter().map(|term| TermRow { term }));
    }
    for failed in outcome.failed {
        out.review.push(ReviewRow::new(format!("paper {}", failed.index + 1), "", STAGE, failed.error.to_string()));
    }
    Ok(out)
}

pub async fn run(args: LlmExtractCmd) -> Result<()> {
    let log = telemetry::llm_extract();
    let _g = log
        .root_span_kv([
            ("input", args.input.display().to_string()),
            ("output", args.output.display().to_string()),
            ("delay_ms", args.pacing.delay_ms.to_string()),
            ("max_retries", args.pacing.max_retries.to_string()),
            ("apply", args.apply.to_string()),
        ])
        .entered();

    let fmt = args.csv.format()?;
    let corpus = {
        let _l = log.span(&ExtractPhase::LoadCorpus).entered();
        io::load_text(&args.input)?
    };
    let papers = io::split_papers(&corpus, &args.paper_delimiter);

    if !args.apply {
        let _sp = log.span(&ExtractPhase::Plan).entered();
        #[derive(Serialize)]
        struct ExtractPlan { papers: usize, calls: usize, delay_ms: u64, output: String }
        let plan = ExtractPlan {
            papers: papers.len(),
            calls: papers.len(),
            delay_ms: args.pacing.delay_ms,
            output: args.output.display().to_string(),
        };
        if telemetry::config::json_mode() {
            log.plan(&plan)?;
        } else {
            log.info(format!("📝 LLM extract plan: papers={} calls={} delay_ms={}", plan.papers, plan.calls, plan.delay_ms));
            log.info("   Use --apply to call the LLM.");
        }
        return Ok(());
    }

    let client = ChatClient::new(ChatClientConfig::from_env())?;
    log.info(format!("🤖 extracting terms from {} paper(s) with {}", papers.len(), client.model()));
    let out = extract_terms(&papers, &client, &args.pacing)
        .instrument(log.span(&ExtractPhase::Extract))
        .await?;

    let _w = log.span(&ExtractPhase::Write).entered();
    let written = io::write_records(&args.output, fmt, &out.terms)?;
    let review = if out.review.is_empty() { 0 } else { io::write_records(&args.review_output, fmt, &out.review)? };
    log.totals(written, review, review);

    if telemetry::config::json_mode() {
        #[derive(Serialize)]
        struct ExtractResult { papers: usize, terms: usize, review: Vec<ReviewRow> }
        log.result(&ExtractResult { papers: papers.len(), terms: written, review: out.review })?;
    }
    Ok(())
}
