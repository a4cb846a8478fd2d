use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use clap::Args;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::batch::{run_batches, BatchClassifier, BatchPolicy};
use crate::error::PipelineError;
use crate::io::{self, CsvFormat, CsvRecord, CsvTable};
use crate::llm::{parse_json_array, ChatClient, ChatClientConfig, ChatCompletionRequest, LlmClient};
use crate::telemetry::{self};
use crate::telemetry::ops::define::Phase as DefinePhase;

use super::args::{BatchArgs, CsvArgs};
use super::review::ReviewRow;

pub const STAGE_CORRECT: &str = "correct";
pub const STAGE_DEFINE: &str = "define";

pub const UNKNOWN_TERM: &str = "UNKNOWN_TERM";
const MAX_CORRECTED_WORDS: usize = 5;

static REFUSAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(unknown term|no information|not enough information|termo desconhecido|não tenho informaç(ão|ões))")
        .expect("valid refusal regex")
});

const CORRECT_SYSTEM: &str =
    "You are a data-cleaning assistant that corrects and standardizes geology and petroleum terms.";

const CORRECT_PROMPT: &str = r#"Correct the technical term below using geology and petroleum conventions.

1. Split run-together words ("carbonatemounds" becomes "carbonate mounds").
2. Fix obvious typos.
3. Return a correct, well-formatted term unchanged.
4. Return exactly UNKNOWN_TERM when the term is nonsense or cannot be recognised.

Reply with the corrected term or UNKNOWN_TERM only.

Term: "#;

const DEFINE_SYSTEM: &str = "You are a senior geoscientist and ontology engineer specialised in oil and gas \
exploration, in particular the carbonate reservoirs of the Brazilian pre-salt. You process data in batches and \
always answer with a JSON array of objects.";

const DEFINE_PROMPT: &str = r#"Write a natural language definition (NLD) for every term in the batch below.

Rules for each definition:
1. Follow the Aristotelian form "X is a Y that Z".
2. Use the label to disambiguate the term; a term labelled BACIA names the basin, not a river or a state.
3. Be technical but clear, in at most three sentences.

INPUT: a JSON array of objects with "term" and "label".
OUTPUT: a JSON array with exactly one object per input item, in the same order, each with "term" and "nld".

BATCH:
"#;

#[derive(Args, Debug)]
pub struct DefineCmd {
    /// Consolidated NER terms (term,labels,...)
    #[arg(long)]
    input: PathBuf,
    #[arg(long, default_value = "output/terms_with_nlds.csv")]
    output: PathBuf,
    #[arg(long, default_value = "output/define_review.csv")]
    review_output: PathBuf,
    /// Take labels from this column
    #[arg(long, default_value = "labels")]
    label_column: String,
    #[command(flatten)]
    csv: CsvArgs,
    #[command(flatten)]
    batch: BatchArgs,
    #[arg(long, default_value_t = false)]
    apply: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TermInput {
    pub term: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DefinedTerm {
    pub term: String,
    pub nld: String,
    pub original_label: String,
}

impl CsvRecord for DefinedTerm {
    const HEADER: &'static [&'static str] = &["term", "nld", "original_label"];
    fn fields(&self, _fmt: &CsvFormat) -> Vec<String> {
        vec![self.term.clone(), self.nld.clone(), self.original_label.clone()]
    }
}

#[derive(Debug, Deserialize)]
pub struct DefinitionReply {
    #[serde(default)]
    pub term: String,
    #[serde(default)]
    pub nld: String,
}

/// Validate a correction answer for `original`.
pub fn check_correction(original: &str, answer: &str) -> Result<String, PipelineError> {
    let corrected = answer.trim().trim_matches('"').trim();
    if corrected.is_empty() || corrected == UNKNOWN_TERM {
        return Err(PipelineError::UnknownTerm(original.to_string()));
    }
    let words = corrected.split_whitespace().count();
    if words > MAX_CORRECTED_WORDS {
        return Err(PipelineError::MalformedStructuredResponse(format!(
            "correction has {words} words (max {MAX_CORRECTED_WORDS})"
        )));
    }
    Ok(corrected.to_string())
}

/// Whether a generated definition is a real one.
pub fn is_refusal(nld: &str) -> bool {
    nld.trim().is_empty() || REFUSAL.is_match(nld)
}

/// One correction call per term; the answer is returned raw.
struct Corrector<'a> {
    client: &'a dyn LlmClient,
}

#[async_trait]
impl BatchClassifier<TermInput> for Corrector<'_> {
    type Output = String;

    async fn classify(&self, batch: &[TermInput]) -> Result<Vec<String>, PipelineError> {
        let mut out = Vec::with_capacity(batch.len());
        for item in batch {
            let req = ChatCompletionRequest::prompt(CORRECT_SYSTEM, format!("{CORRECT_PROMPT}\"{}\"", item.term));
            out.push(self.client.chat_completion(req).await?.content);
        }
        Ok(out)
    }
}

/// One call per batch: `[{term,label}]` in, `[{term,nld}]` out.
struct Definer<'a> {
    client: &'a dyn LlmClient,
}

#[async_trait]
impl BatchClassifier<TermInput> for Definer<'_> {
    type Output = DefinitionReply;

    async fn classify(&self, batch: &[TermInput]) -> Result<Vec<DefinitionReply>, PipelineError> {
        let payload = serde_json::to_string_pretty(batch)
            .map_err(|e| PipelineError::InvalidConfiguration(format!("encode batch: {e}")))?;
        let req = ChatCompletionRequest::prompt(DEFINE_SYSTEM, format!("{DEFINE_PROMPT}{payload}"));
        let reply = self.client.chat_completion(req).await?;
        parse_json_array::<DefinitionReply>(&reply.content)
    }
}

#[derive(Debug, Default)]
pub struct Definitions {
    pub defined: Vec<DefinedTerm>,
    pub review: Vec<ReviewRow>,
}

/// Correct every term, then define the survivors in batches.
///
/// Terms the corrector does not recognise, empty or refused definitions and
/// whole failed batches end up in `review`; nothing is dropped silently.
pub async fn define_terms(
    terms: &[TermInput],
    client: &dyn LlmClient,
    batch: &BatchArgs,
) -> Result<Definitions, PipelineError> {
    let log = telemetry::define();
    let policy = batch.policy()?;
    let mut out = Definitions::default();

    let correct_policy = BatchPolicy { batch_size: 1, ..policy };
    let corrections = run_batches(terms, &correct_policy, &Corrector { client }, &log)
        .instrument(log.span(&DefinePhase::Correct))
        .await?;
    for failed in corrections.failed {
        for t in failed.records {
            out.review.push(ReviewRow::new(t.term, t.label, STAGE_CORRECT, failed.error.to_string()));
        }
    }
    let mut corrected = Vec::with_capacity(corrections.completed.len());
    for (input, answer) in corrections.completed {
        match check_correction(&input.term, &answer) {
            Ok(term) => corrected.push(TermInput { term, label: input.label }),
            Err(e) => {
                log.warn(format!("⚠️  '{}' sent to review: {}", input.term, e));
                out.review.push(ReviewRow::new(input.term, input.label, STAGE_CORRECT, e.to_string()).with_response(answer));
            }
        }
    }
    log.info(format!("✏️  {} of {} term(s) corrected", corrected.len(), terms.len()));

    let definitions = run_batches(&corrected, &policy, &Definer { client }, &log)
        .instrument(log.span(&DefinePhase::Define))
        .await?;
    if !definitions.failed.is_empty() {
        log.warn(format!("⚠️  {} definition batch(es) failed; {} term(s) routed to review", definitions.failed.len(), definitions.failed_records()));
    }
    for failed in definitions.failed {
        for t in failed.records {
            out.review.push(ReviewRow::new(t.term, t.label, STAGE_DEFINE, failed.error.to_string()));
        }
    }
    for (input, reply) in definitions.completed {
        // replies are matched by position; a renamed term is only worth a note
        if !reply.term.is_empty() && !reply.term.trim().eq_ignore_ascii_case(&input.term) {
            log.debug(format!("reply term '{}' answered for '{}'", reply.term, input.term));
        }
        let nld = reply.nld.trim().to_string();
        if is_refusal(&nld) {
            out.review.push(
                ReviewRow::new(input.term, input.label, STAGE_DEFINE, "no definition found").with_response(nld),
            );
        } else {
            out.defined.push(DefinedTerm { term: input.term, nld, original_label: input.label });
        }
    }
    Ok(out)
}

fn load_terms(path: &std::path::Path, delimiter: char, label_column: &str) -> Result<Vec<TermInput>, PipelineError> {
    let table = CsvTable::read(path, delimiter)?;
    let (term, label) = (table.column("term")?, table.column(label_column)?);
    Ok(table
        .rows
        .iter()
        .map(|r| TermInput { term: CsvTable::cell(r, term).trim().to_string(), label: CsvTable::cell(r, label).trim().to_string() })
        .filter(|t| !t.term.is_empty())
        .collect())
}

pub async fn run(args: DefineCmd) -> Result<()> {
    let log = telemetry::define();
    let _g = log
        .root_span_kv([
            ("input", args.input.display().to_string()),
            ("output", args.output.display().to_string()),
            ("batch_size", args.batch.batch_size.to_string()),
            ("delay_ms", args.batch.pacing.delay_ms.to_string()),
            ("apply", args.apply.to_string()),
        ])
        .entered();

    let fmt = args.csv.format()?;
    let policy = args.batch.policy()?;
    let terms = {
        let _l = log.span(&DefinePhase::Load).entered();
        load_terms(&args.input, fmt.delimiter, &args.label_column)?
    };

    if !args.apply {
        let _sp = log.span(&DefinePhase::Plan).entered();
        #[derive(Serialize)]
        struct DefinePlan { terms: usize, correction_calls: usize, max_definition_batches: usize, batch: BatchPolicy }
        let plan = DefinePlan {
            terms: terms.len(),
            correction_calls: terms.len(),
            max_definition_batches: policy.batch_count(terms.len()),
            batch: policy,
        };
        if telemetry::config::json_mode() {
            log.plan(&plan)?;
        } else {
            log.info(format!(
                "📝 Define plan: terms={} correction_calls={} definition_batches<={} batch_size={}",
                plan.terms, plan.correction_calls, plan.max_definition_batches, policy.batch_size
            ));
            log.info("   Use --apply to call the LLM.");
        }
        return Ok(());
    }

    let client = ChatClient::new(ChatClientConfig::from_env())?;
    log.info(format!("🤖 defining {} term(s) with {}", terms.len(), client.model()));
    let out = define_terms(&terms, &client, &args.batch).await?;

    let _w = log.span(&DefinePhase::Write).entered();
    let written = io::write_records(&args.output, fmt, &out.defined)?;
    let review = if out.review.is_empty() { 0 } else { io::write_records(&args.review_output, fmt, &out.review)? };
    log.totals(written, review, out.review.len());

    if telemetry::config::json_mode() {
        #[derive(Serialize)]
        struct DefineResult { terms: usize, defined: usize, review: Vec<ReviewRow> }
        log.result(&DefineResult { terms: terms.len(), defined: written, review: out.review })?;
    }
    Ok(())
}
